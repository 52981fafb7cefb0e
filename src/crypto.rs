//! Stream ciphers and the key material they are derived from.
//!
//! Everything here is a plain keystream: encryption and decryption are the
//! same XOR, only the per-direction stream positions differ. The cipher
//! carries no authenticity on its own, the protocol layer's rolling HMAC
//! chain is what rejects forged traffic.

use core::fmt::{Debug, Formatter};

use aes::{Aes128, Aes192, Aes256};
use chacha20::ChaCha20;
use cipher::{
    generic_array::GenericArray, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher as _,
};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use rand::{rngs::OsRng, TryRngCore};
use rc4::{consts::U16, Rc4};
use sha1::Sha1;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ConfigError, Error};

/// Stream cipher negotiated by name in the connection configuration.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum CipherKind {
    /// No encryption. The obfuscator and protocol layers still run.
    None,

    /// RC4 rekeyed per connection with `MD5(key || iv)`.
    Rc4Md5,

    /// AES-128 in CTR mode.
    #[default]
    Aes128Ctr,

    /// AES-192 in CTR mode.
    Aes192Ctr,

    /// AES-256 in CTR mode.
    Aes256Ctr,

    /// ChaCha20 with 96-bit nonces.
    ChaCha20Ietf,
}

impl CipherKind {
    /// Resolves a configuration method name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(CipherKind::None),
            "rc4-md5" => Some(CipherKind::Rc4Md5),
            "aes-128-ctr" => Some(CipherKind::Aes128Ctr),
            "aes-192-ctr" => Some(CipherKind::Aes192Ctr),
            "aes-256-ctr" => Some(CipherKind::Aes256Ctr),
            "chacha20-ietf" => Some(CipherKind::ChaCha20Ietf),
            _ => None,
        }
    }

    /// Master key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            CipherKind::None | CipherKind::Rc4Md5 | CipherKind::Aes128Ctr => 16,
            CipherKind::Aes192Ctr => 24,
            CipherKind::Aes256Ctr | CipherKind::ChaCha20Ietf => 32,
        }
    }

    /// Per-connection IV length in bytes. Zero for `none`.
    pub fn iv_len(&self) -> usize {
        match self {
            CipherKind::None => 0,
            CipherKind::Rc4Md5 | CipherKind::Aes128Ctr | CipherKind::Aes192Ctr
            | CipherKind::Aes256Ctr => 16,
            CipherKind::ChaCha20Ietf => 12,
        }
    }
}

/// The connection master key, derived from the shared password.
///
/// Low-entropy passwords are as weak here as anywhere: anyone who can guess
/// the password can decrypt captured traffic offline.
#[derive(Clone, Eq, PartialEq, Zeroize, ZeroizeOnDrop)]
pub(crate) struct MasterKey(Vec<u8>);

impl MasterKey {
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for MasterKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MasterKey").field(&"*****").finish()
    }
}

/// The OpenSSL `EVP_BytesToKey` construction with MD5 and no salt:
/// `D1 = MD5(password)`, `Dn = MD5(Dn-1 || password)`, concatenated and
/// truncated to `key_len`.
pub(crate) fn evp_bytes_to_key(password: &[u8], key_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(key_len.next_multiple_of(16));
    let mut prev: Option<[u8; 16]> = None;
    while out.len() < key_len {
        let mut hasher = Md5::new();
        if let Some(prev) = prev {
            hasher.update(prev);
        }
        hasher.update(password);
        let digest: [u8; 16] = hasher.finalize().into();
        out.extend_from_slice(&digest);
        prev = Some(digest);
    }
    out.truncate(key_len);
    out
}

pub(crate) fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac =
        <Hmac<Md5> as Mac>::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

pub(crate) fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; 20] {
    let mut mac =
        <Hmac<Sha1> as Mac>::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Encrypts a single AES-128 block in place.
///
/// The auth head uses CBC with a zero IV over exactly one block, which
/// collapses to one raw block encryption.
pub(crate) fn aes128_encrypt_block(key: &[u8; 16], block: &mut [u8; 16]) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    cipher.encrypt_block(GenericArray::from_mut_slice(block));
}

enum Keystream {
    Plain,
    Rc4Md5(Rc4<U16>),
    Aes128Ctr(Ctr128BE<Aes128>),
    Aes192Ctr(Ctr128BE<Aes192>),
    Aes256Ctr(Ctr128BE<Aes256>),
    ChaCha20Ietf(ChaCha20),
}

impl Keystream {
    fn new(kind: CipherKind, key: &[u8], iv: &[u8]) -> Self {
        match kind {
            CipherKind::None => Keystream::Plain,
            CipherKind::Rc4Md5 => {
                let mut hasher = Md5::new();
                hasher.update(key);
                hasher.update(iv);
                Keystream::Rc4Md5(Rc4::new(&hasher.finalize()))
            }
            CipherKind::Aes128Ctr => Keystream::Aes128Ctr(Ctr128BE::new(
                GenericArray::from_slice(key),
                GenericArray::from_slice(iv),
            )),
            CipherKind::Aes192Ctr => Keystream::Aes192Ctr(Ctr128BE::new(
                GenericArray::from_slice(key),
                GenericArray::from_slice(iv),
            )),
            CipherKind::Aes256Ctr => Keystream::Aes256Ctr(Ctr128BE::new(
                GenericArray::from_slice(key),
                GenericArray::from_slice(iv),
            )),
            CipherKind::ChaCha20Ietf => Keystream::ChaCha20Ietf(ChaCha20::new(
                GenericArray::from_slice(key),
                GenericArray::from_slice(iv),
            )),
        }
    }

    fn apply(&mut self, data: &mut [u8]) {
        match self {
            Keystream::Plain => {}
            Keystream::Rc4Md5(c) => c.apply_keystream(data),
            Keystream::Aes128Ctr(c) => c.apply_keystream(data),
            Keystream::Aes192Ctr(c) => c.apply_keystream(data),
            Keystream::Aes256Ctr(c) => c.apply_keystream(data),
            Keystream::ChaCha20Ietf(c) => c.apply_keystream(data),
        }
    }
}

/// Per-connection cipher with independent send and receive streams.
///
/// The send stream is keyed lazily on the first write, the receive stream
/// once the peer's IV prefix has arrived.
pub(crate) struct StreamCipher {
    kind: CipherKind,
    key: MasterKey,
    enc_iv: Vec<u8>,
    enc: Option<Keystream>,
    dec: Option<Keystream>,
}

impl StreamCipher {
    pub(crate) fn new(method: &str, password: &str) -> Result<Self, Error> {
        let kind = CipherKind::from_name(method).ok_or(ConfigError::UnsupportedCipher {
            name: method.to_string(),
        })?;
        let key = evp_bytes_to_key(password.as_bytes(), kind.key_len());
        Ok(Self {
            kind,
            key: MasterKey(key),
            enc_iv: Vec::new(),
            enc: None,
            dec: None,
        })
    }

    pub(crate) fn key(&self) -> &[u8] {
        self.key.as_slice()
    }

    pub(crate) fn iv_len(&self) -> usize {
        self.kind.iv_len()
    }

    pub(crate) fn enc_iv(&self) -> &[u8] {
        &self.enc_iv
    }

    pub(crate) fn enc_ready(&self) -> bool {
        self.enc.is_some()
    }

    pub(crate) fn dec_ready(&self) -> bool {
        self.dec.is_some()
    }

    /// Keys the send stream under a fresh random IV and returns the IV,
    /// which must travel to the peer ahead of any ciphertext.
    pub(crate) fn init_encrypt(&mut self) -> Vec<u8> {
        let mut iv = vec![0u8; self.kind.iv_len()];
        OsRng
            .try_fill_bytes(&mut iv)
            .expect("system random source failure");
        self.enc = Some(Keystream::new(self.kind, self.key.as_slice(), &iv));
        self.enc_iv = iv.clone();
        iv
    }

    pub(crate) fn init_decrypt(&mut self, iv: &[u8]) {
        self.dec = Some(Keystream::new(self.kind, self.key.as_slice(), iv));
    }

    pub(crate) fn encrypt(&mut self, data: &mut [u8]) {
        self.enc
            .as_mut()
            .expect("send stream keyed before first encrypt")
            .apply(data);
    }

    pub(crate) fn decrypt(&mut self, data: &mut [u8]) {
        self.dec
            .as_mut()
            .expect("receive stream keyed before first decrypt")
            .apply(data);
    }
}

impl Debug for StreamCipher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCipher")
            .field("kind", &self.kind)
            .field("enc_ready", &self.enc.is_some())
            .field("dec_ready", &self.dec.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evp_bytes_to_key_matches_openssl() {
        // First block is MD5 of the password.
        let key = evp_bytes_to_key(b"foobar", 16);
        assert_eq!(
            key,
            [
                0x38, 0x58, 0xf6, 0x22, 0x30, 0xac, 0x3c, 0x91, 0x5f, 0x30, 0x0c, 0x66,
                0x43, 0x12, 0xc6, 0x3f
            ]
        );

        // Longer keys chain MD5(prev || password).
        let long = evp_bytes_to_key(b"foobar", 32);
        assert_eq!(&long[..16], &key[..]);
        assert_ne!(&long[16..], &key[..]);
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(matches!(
            StreamCipher::new("aes-128-gcm", "secret"),
            Err(Error::Config(ConfigError::UnsupportedCipher { .. }))
        ));
    }

    #[test]
    fn none_cipher_is_identity_with_empty_iv() {
        let mut cipher = StreamCipher::new("none", "secret").unwrap();
        assert_eq!(cipher.iv_len(), 0);
        assert!(cipher.init_encrypt().is_empty());
        let mut data = *b"hello";
        cipher.encrypt(&mut data);
        assert_eq!(&data, b"hello");
    }

    #[test]
    fn all_methods_roundtrip_across_instances() {
        for method in [
            "rc4-md5",
            "aes-128-ctr",
            "aes-192-ctr",
            "aes-256-ctr",
            "chacha20-ietf",
        ] {
            let mut sender = StreamCipher::new(method, "secret").unwrap();
            let iv = sender.init_encrypt();
            assert_eq!(iv.len(), sender.iv_len());

            let mut data = b"the quick brown fox jumps over the lazy dog".to_vec();
            sender.encrypt(&mut data);
            assert_ne!(&data[..], b"the quick brown fox jumps over the lazy dog");

            let mut receiver = StreamCipher::new(method, "secret").unwrap();
            receiver.init_decrypt(&iv);
            receiver.decrypt(&mut data);
            assert_eq!(&data[..], b"the quick brown fox jumps over the lazy dog");
        }
    }

    #[test]
    fn keystream_position_survives_split_inputs() {
        let mut sender = StreamCipher::new("aes-256-ctr", "secret").unwrap();
        let iv = sender.init_encrypt();

        let mut head = [0u8; 21];
        let mut tail = [0u8; 43];
        sender.encrypt(&mut head);
        sender.encrypt(&mut tail);

        let mut receiver = StreamCipher::new("aes-256-ctr", "secret").unwrap();
        receiver.init_decrypt(&iv);
        let mut joined = [head.as_slice(), tail.as_slice()].concat();
        receiver.decrypt(&mut joined);
        assert_eq!(joined, vec![0u8; 64]);
    }

    #[test]
    fn directions_use_independent_streams() {
        let mut cipher = StreamCipher::new("rc4-md5", "secret").unwrap();
        let iv = cipher.init_encrypt();
        cipher.init_decrypt(&iv);

        // Same IV on both sides means the streams start identical but
        // advance independently.
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        cipher.encrypt(&mut a);
        cipher.decrypt(&mut b);
        assert_eq!(a, b);
        cipher.encrypt(&mut a);
        cipher.decrypt(&mut b);
        assert_eq!(a, b);
    }
}
