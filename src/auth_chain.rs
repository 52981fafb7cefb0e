//! The `auth_chain_a` and `auth_chain_b` protocols.
//!
//! Every connection opens with a 36-byte auth head that proves knowledge of
//! the shared key and mints a per-connection RC4 stream. All payload then
//! travels in chunks whose length field is masked, whose padding amount and
//! payload offset come from a shared deterministic PRNG, and whose trailing
//! HMAC is chained through every previous chunk of the same direction. A
//! single flipped bit anywhere desynchronizes the chain and is rejected.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use cipher::{generic_array::GenericArray, KeyInit, StreamCipher as _};
use rand::{
    rngs::{OsRng, StdRng},
    Rng, SeedableRng, TryRngCore,
};
use rc4::{consts::U16, Rc4};

use crate::{
    crypto::{aes128_encrypt_block, evp_bytes_to_key, hmac_md5},
    error::{Error, ProtocolViolation},
    prng::Shift128Plus,
    protocol::Protocol,
    server_info::ServerInfo,
    session::AuthData,
    specification::{
        AUTH_HEAD_LEN, CHUNK_OVERHEAD, CHUNK_PAYLOAD_MAX_LEN, CHUNK_TOTAL_MAX_LEN,
        CHUNK_UNPADDED_ABOVE, HEAD_CHUNK_PAYLOAD_MAX_LEN,
    },
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Variant {
    A,
    B,
}

impl Variant {
    fn salt(&self) -> &'static str {
        match self {
            Variant::A => "auth_chain_a",
            Variant::B => "auth_chain_b",
        }
    }
}

pub(crate) struct AuthChain {
    variant: Variant,
    info: ServerInfo,
    auth: Arc<AuthData>,
    random_client: Shift128Plus,
    random_server: Shift128Plus,
    encrypter: Option<Rc4<U16>>,
    decrypter: Option<Rc4<U16>>,
    header_sent: bool,
    last_client_hash: [u8; 16],
    last_server_hash: [u8; 16],
    user_key: Vec<u8>,
    chunk_id: u32,
    recv_id: u32,
    data_size_list: Vec<usize>,
    data_size_list2: Vec<usize>,
    rng: StdRng,
}

impl AuthChain {
    pub(crate) fn new_a(auth: Arc<AuthData>) -> Self {
        AuthChain::new(Variant::A, auth)
    }

    pub(crate) fn new_b(auth: Arc<AuthData>) -> Self {
        AuthChain::new(Variant::B, auth)
    }

    fn new(variant: Variant, auth: Arc<AuthData>) -> Self {
        let mut seed = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut seed)
            .expect("system random source failure");
        AuthChain {
            variant,
            info: ServerInfo::default(),
            auth,
            random_client: Shift128Plus::from_key(&[]),
            random_server: Shift128Plus::from_key(&[]),
            encrypter: None,
            decrypter: None,
            header_sent: false,
            last_client_hash: [0; 16],
            last_server_hash: [0; 16],
            user_key: Vec::new(),
            chunk_id: 0,
            recv_id: 1,
            data_size_list: Vec::new(),
            data_size_list2: Vec::new(),
            rng: StdRng::from_seed(seed),
        }
    }

    /// The uid and key this connection authenticates as: `uid:base64key`
    /// from the plugin argument, or a random uid under the master key.
    fn user_key_and_id(&mut self) -> ([u8; 4], Vec<u8>) {
        if let Some((id_str, key_str)) = self.info.param.split_once(':') {
            if let Ok(id) = id_str.trim().parse::<u32>() {
                if let Ok(key) = BASE64.decode(key_str.trim()) {
                    return (id.to_le_bytes(), key);
                }
            }
        }
        let mut uid = [0u8; 4];
        self.rng.fill(&mut uid);
        (uid, self.info.key.clone())
    }

    fn client_rand_len(&mut self, data_len: usize) -> usize {
        chunk_rand_len(
            self.variant,
            data_len,
            &mut self.random_client,
            &self.last_client_hash,
            &self.data_size_list,
            &self.data_size_list2,
            self.info.overhead,
        )
    }

    fn server_rand_len(&mut self, data_len: usize) -> usize {
        chunk_rand_len(
            self.variant,
            data_len,
            &mut self.random_server,
            &self.last_server_hash,
            &self.data_size_list,
            &self.data_size_list2,
            self.info.overhead,
        )
    }

    /// Packs one payload chunk, advancing the client-side hash chain.
    fn pack_data(&mut self, data: &[u8], out: &mut Vec<u8>) {
        let rand_len = self.client_rand_len(data.len());
        let chunk_len = 2 + rand_len + data.len();
        let start = out.len();
        out.resize(start + chunk_len + 2, 0);

        {
            let chunk = &mut out[start..];
            if data.is_empty() {
                self.rng.fill(&mut chunk[2..chunk_len]);
            } else {
                let data_pos = 2 + rand_start_pos(rand_len, &mut self.random_client);
                self.rng.fill(&mut chunk[2..data_pos]);
                chunk[data_pos..data_pos + data.len()].copy_from_slice(data);
                self.encrypter
                    .as_mut()
                    .expect("auth head packed before payload chunks")
                    .apply_keystream(&mut chunk[data_pos..data_pos + data.len()]);
                self.rng.fill(&mut chunk[data_pos + data.len()..chunk_len]);
            }
            chunk[0] = (data.len() as u8) ^ self.last_client_hash[14];
            chunk[1] = ((data.len() >> 8) as u8) ^ self.last_client_hash[15];
        }

        self.chunk_id += 1;
        let mut mac_key = self.user_key.clone();
        mac_key.extend_from_slice(&self.chunk_id.to_le_bytes());
        let hash = hmac_md5(&mac_key, &out[start..start + chunk_len]);
        out[start + chunk_len..].copy_from_slice(&hash[..2]);
        self.last_client_hash = hash;
    }

    /// Builds the 36-byte auth head, keys the per-connection RC4 stream, and
    /// packs the first payload chunk behind it.
    fn pack_auth_data(&mut self, data: &[u8], out: &mut Vec<u8>) {
        let (client_id, connection_id) = self.auth.next_connection();
        let mut head = [0u8; AUTH_HEAD_LEN];

        let mut mac_key = Vec::with_capacity(self.info.iv.len() + self.info.key.len());
        mac_key.extend_from_slice(&self.info.iv);
        mac_key.extend_from_slice(&self.info.key);

        self.rng.fill(&mut head[..4]);
        self.last_client_hash = hmac_md5(&mac_key, &head[..4]);
        head[4..12].copy_from_slice(&self.last_client_hash[..8]);

        let (mut uid, user_key) = self.user_key_and_id();
        for (i, byte) in uid.iter_mut().enumerate() {
            *byte ^= self.last_client_hash[8 + i];
        }
        head[12..16].copy_from_slice(&uid);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("SystemTime before UNIX EPOCH")
            .as_secs() as u32;
        let mut block = [0u8; 16];
        block[..4].copy_from_slice(&now.to_le_bytes());
        block[4..8].copy_from_slice(&client_id);
        block[8..12].copy_from_slice(&connection_id.to_le_bytes());
        block[12..14].copy_from_slice(&(self.info.overhead as u16).to_le_bytes());
        let mut key_material = BASE64.encode(&user_key);
        key_material.push_str(self.variant.salt());
        let block_key: [u8; 16] = evp_bytes_to_key(key_material.as_bytes(), 16)
            .try_into()
            .expect("evp output is exactly the requested length");
        aes128_encrypt_block(&block_key, &mut block);
        head[16..32].copy_from_slice(&block);

        self.last_server_hash = hmac_md5(&user_key, &head[..32]);
        head[32..36].copy_from_slice(&self.last_server_hash[..4]);

        let mut rc4_material = BASE64.encode(&user_key);
        rc4_material.push_str(&BASE64.encode(self.last_client_hash));
        let rc4_key = evp_bytes_to_key(rc4_material.as_bytes(), 16);
        self.encrypter = Some(Rc4::new(GenericArray::from_slice(&rc4_key)));
        self.decrypter = Some(Rc4::new(GenericArray::from_slice(&rc4_key)));
        self.user_key = user_key;

        out.extend_from_slice(&head);
        self.pack_data(data, out);
    }
}

impl Protocol for AuthChain {
    fn configure(&mut self, info: ServerInfo) {
        if self.variant == Variant::B {
            let (list1, list2) = data_size_lists(&info.key);
            self.data_size_list = list1;
            self.data_size_list2 = list2;
        }
        self.info = info;
    }

    fn overhead(&self) -> usize {
        CHUNK_OVERHEAD
    }

    fn pre_encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(data.len() + 256);
        let mut rest = data;
        if !self.header_sent {
            if rest.is_empty() {
                return Ok(out);
            }
            let head_len = rest.len().min(HEAD_CHUNK_PAYLOAD_MAX_LEN);
            let (head, tail) = rest.split_at(head_len);
            self.pack_auth_data(head, &mut out);
            self.header_sent = true;
            rest = tail;
        }
        while !rest.is_empty() {
            let n = rest.len().min(CHUNK_PAYLOAD_MAX_LEN);
            self.pack_data(&rest[..n], &mut out);
            rest = &rest[n..];
        }
        Ok(out)
    }

    fn post_decrypt(&mut self, data: &[u8]) -> Result<(Vec<u8>, usize), Error> {
        if !self.header_sent {
            return Err(ProtocolViolation::UnexpectedServerData.into());
        }
        let mut out = Vec::new();
        let mut consumed = 0;
        while data.len() - consumed > CHUNK_OVERHEAD {
            let rest = &data[consumed..];
            let data_len = (rest[0] ^ self.last_server_hash[14]) as usize
                | (((rest[1] ^ self.last_server_hash[15]) as usize) << 8);
            let rand_len = self.server_rand_len(data_len);
            let body_len = data_len + rand_len;
            if body_len >= CHUNK_TOTAL_MAX_LEN {
                return Err(ProtocolViolation::ChunkLenInvalid { received: body_len }.into());
            }
            let total = body_len + CHUNK_OVERHEAD;
            if total > rest.len() {
                break;
            }

            let mut mac_key = self.user_key.clone();
            mac_key.extend_from_slice(&self.recv_id.to_le_bytes());
            let hash = hmac_md5(&mac_key, &rest[..total - 2]);
            if hash[..2] != rest[total - 2..total] {
                return Err(ProtocolViolation::ChunkHmacMismatch {
                    recv_id: self.recv_id,
                }
                .into());
            }

            let data_pos = if data_len > 0 && rand_len > 0 {
                2 + rand_start_pos(rand_len, &mut self.random_server)
            } else {
                2
            };
            let mut payload = rest[data_pos..data_pos + data_len].to_vec();
            self.decrypter
                .as_mut()
                .expect("auth head packed before payload chunks")
                .apply_keystream(&mut payload);
            out.extend_from_slice(&payload);

            self.last_server_hash = hash;
            self.recv_id += 1;
            consumed += total;
        }
        Ok((out, consumed))
    }
}

/// Where the payload starts inside the padding of a chunk. Both ends derive
/// it from the same PRNG state, so it never travels on the wire.
fn rand_start_pos(rand_len: usize, random: &mut Shift128Plus) -> usize {
    if rand_len > 0 {
        (random.next() % 8_589_934_609 % rand_len as u64) as usize
    } else {
        0
    }
}

/// Padding length for a chunk, derived from the rolling hash so both ends
/// agree without transmitting it.
fn chunk_rand_len(
    variant: Variant,
    data_len: usize,
    random: &mut Shift128Plus,
    last_hash: &[u8; 16],
    list1: &[usize],
    list2: &[usize],
    overhead: usize,
) -> usize {
    if data_len > CHUNK_UNPADDED_ABOVE {
        return 0;
    }
    random.reseed_with_len(last_hash, data_len);

    if variant == Variant::B {
        let target = data_len + overhead;

        let pos = list1.partition_point(|&v| v < target);
        let final_pos = pos + (random.next() % list1.len() as u64) as usize;
        if final_pos < list1.len() {
            return list1[final_pos] - target;
        }

        let pos = list2.partition_point(|&v| v < target);
        let final_pos = pos + (random.next() % list2.len() as u64) as usize;
        if final_pos < list2.len() {
            return list2[final_pos] - target;
        }
        if final_pos < pos + list2.len() - 1 {
            return 0;
        }
    }

    if data_len > 1300 {
        (random.next() % 31) as usize
    } else if data_len > 900 {
        (random.next() % 127) as usize
    } else if data_len > 400 {
        (random.next() % 521) as usize
    } else {
        (random.next() % 1021) as usize
    }
}

/// The two sorted tables of preferred chunk sizes `auth_chain_b` steers
/// towards, derived deterministically from the master key.
fn data_size_lists(key: &[u8]) -> (Vec<usize>, Vec<usize>) {
    let mut random = Shift128Plus::from_key(key);

    let len1 = (random.next() % 8 + 4) as usize;
    let mut list1: Vec<usize> = (0..len1)
        .map(|_| (random.next() % 2340 % 2040 % 1440) as usize)
        .collect();
    list1.sort_unstable();

    let len2 = (random.next() % 16 + 8) as usize;
    let mut list2: Vec<usize> = (0..len2)
        .map(|_| (random.next() % 2340 % 2040 % 1440) as usize)
        .collect();
    list2.sort_unstable();

    (list1, list2)
}

#[cfg(test)]
mod tests {
    use cipher::BlockDecrypt;

    use super::*;
    use crate::specification::DEFAULT_HEAD_LEN;

    fn configured(variant: Variant, auth: Arc<AuthData>) -> AuthChain {
        let mut chain = match variant {
            Variant::A => AuthChain::new_a(auth),
            Variant::B => AuthChain::new_b(auth),
        };
        let mut info = ServerInfo::new("example.com", 8388, "");
        info.iv = (0..16).collect();
        info.key = evp_bytes_to_key(b"barfoo!", 16);
        info.head_len = DEFAULT_HEAD_LEN;
        info.overhead = chain.overhead();
        chain.configure(info);
        chain
    }

    /// The server side of the wire format, reimplemented from the decoder's
    /// point of view so client output is checked against an independent peer.
    struct TestServer {
        variant: Variant,
        user_key: Vec<u8>,
        last_client_hash: [u8; 16],
        last_server_hash: [u8; 16],
        recv_random: Shift128Plus,
        send_random: Shift128Plus,
        recv_rc4: Rc4<U16>,
        send_rc4: Rc4<U16>,
        list1: Vec<usize>,
        list2: Vec<usize>,
        recv_id: u32,
        send_id: u32,
    }

    impl TestServer {
        fn accept(variant: Variant, iv: &[u8], key: &[u8], head: &[u8]) -> Self {
            assert!(head.len() >= AUTH_HEAD_LEN);
            let mac_key = [iv, key].concat();
            let last_client_hash = hmac_md5(&mac_key, &head[..4]);
            assert_eq!(&last_client_hash[..8], &head[4..12], "uid hmac mismatch");

            let user_key = key.to_vec();
            let last_server_hash = hmac_md5(&user_key, &head[..32]);
            assert_eq!(&last_server_hash[..4], &head[32..36], "head hmac mismatch");

            // Recover the encrypted block and sanity-check its layout.
            let mut key_material = BASE64.encode(&user_key);
            key_material.push_str(variant.salt());
            let block_key: [u8; 16] =
                evp_bytes_to_key(key_material.as_bytes(), 16).try_into().unwrap();
            let mut block: [u8; 16] = head[16..32].try_into().unwrap();
            let aes = aes::Aes128::new(GenericArray::from_slice(&block_key));
            aes.decrypt_block(GenericArray::from_mut_slice(&mut block));
            assert_eq!(
                u16::from_le_bytes(block[12..14].try_into().unwrap()),
                CHUNK_OVERHEAD as u16
            );
            assert_eq!(&block[14..16], &[0, 0]);

            let mut rc4_material = BASE64.encode(&user_key);
            rc4_material.push_str(&BASE64.encode(last_client_hash));
            let rc4_key = evp_bytes_to_key(rc4_material.as_bytes(), 16);

            let (list1, list2) = match variant {
                Variant::A => (Vec::new(), Vec::new()),
                Variant::B => data_size_lists(key),
            };

            TestServer {
                variant,
                user_key,
                last_client_hash,
                last_server_hash,
                recv_random: Shift128Plus::from_key(&[]),
                send_random: Shift128Plus::from_key(&[]),
                recv_rc4: Rc4::new(GenericArray::from_slice(&rc4_key)),
                send_rc4: Rc4::new(GenericArray::from_slice(&rc4_key)),
                list1,
                list2,
                recv_id: 1,
                send_id: 0,
            }
        }

        /// Decodes client chunks, mirroring the client's send side.
        fn decode_client(&mut self, data: &[u8]) -> (Vec<u8>, usize) {
            let mut out = Vec::new();
            let mut consumed = 0;
            while data.len() - consumed > CHUNK_OVERHEAD {
                let rest = &data[consumed..];
                let data_len = (rest[0] ^ self.last_client_hash[14]) as usize
                    | (((rest[1] ^ self.last_client_hash[15]) as usize) << 8);
                let rand_len = chunk_rand_len(
                    self.variant,
                    data_len,
                    &mut self.recv_random,
                    &self.last_client_hash,
                    &self.list1,
                    &self.list2,
                    CHUNK_OVERHEAD,
                );
                let total = data_len + rand_len + CHUNK_OVERHEAD;
                if total > rest.len() {
                    break;
                }
                let mut mac_key = self.user_key.clone();
                mac_key.extend_from_slice(&self.recv_id.to_le_bytes());
                let hash = hmac_md5(&mac_key, &rest[..total - 2]);
                assert_eq!(&hash[..2], &rest[total - 2..total], "chunk hmac mismatch");

                let data_pos = if data_len > 0 && rand_len > 0 {
                    2 + rand_start_pos(rand_len, &mut self.recv_random)
                } else {
                    2
                };
                let mut payload = rest[data_pos..data_pos + data_len].to_vec();
                self.recv_rc4.apply_keystream(&mut payload);
                out.extend_from_slice(&payload);

                self.last_client_hash = hash;
                self.recv_id += 1;
                consumed += total;
            }
            (out, consumed)
        }

        /// Packs server chunks, mirroring what the client's receive side
        /// expects.
        fn pack_server(&mut self, data: &[u8]) -> Vec<u8> {
            let rand_len = chunk_rand_len(
                self.variant,
                data.len(),
                &mut self.send_random,
                &self.last_server_hash,
                &self.list1,
                &self.list2,
                CHUNK_OVERHEAD,
            );
            let chunk_len = 2 + rand_len + data.len();
            let mut chunk = vec![0u8; chunk_len + 2];
            if !data.is_empty() {
                let data_pos = 2 + rand_start_pos(rand_len, &mut self.send_random);
                let mut payload = data.to_vec();
                self.send_rc4.apply_keystream(&mut payload);
                chunk[data_pos..data_pos + data.len()].copy_from_slice(&payload);
            }
            chunk[0] = (data.len() as u8) ^ self.last_server_hash[14];
            chunk[1] = ((data.len() >> 8) as u8) ^ self.last_server_hash[15];

            self.send_id += 1;
            let mut mac_key = self.user_key.clone();
            mac_key.extend_from_slice(&self.send_id.to_le_bytes());
            let hash = hmac_md5(&mac_key, &chunk[..chunk_len]);
            chunk[chunk_len..].copy_from_slice(&hash[..2]);
            self.last_server_hash = hash;
            chunk
        }
    }

    fn roundtrip_to_server(variant: Variant) {
        let mut chain = configured(variant, Arc::new(AuthData::default()));
        let payload: Vec<u8> = (0..255u8).cycle().take(5000).collect();
        let wire = chain.pre_encrypt(&payload).unwrap();

        let mut server = TestServer::accept(
            variant,
            &chain.info.iv,
            &chain.info.key,
            &wire[..AUTH_HEAD_LEN],
        );
        let (got, consumed) = server.decode_client(&wire[AUTH_HEAD_LEN..]);
        assert_eq!(consumed, wire.len() - AUTH_HEAD_LEN);
        assert_eq!(got, payload);

        // Later writes keep the chain alive.
        let wire = chain.pre_encrypt(b"second write").unwrap();
        let (got, consumed) = server.decode_client(&wire);
        assert_eq!(consumed, wire.len());
        assert_eq!(got, b"second write");
    }

    #[test]
    fn client_stream_decodes_on_an_independent_server_a() {
        roundtrip_to_server(Variant::A);
    }

    #[test]
    fn client_stream_decodes_on_an_independent_server_b() {
        roundtrip_to_server(Variant::B);
    }

    #[test]
    fn server_responses_decode_even_byte_at_a_time() {
        let mut chain = configured(Variant::B, Arc::new(AuthData::default()));
        let wire = chain.pre_encrypt(b"open").unwrap();
        let mut server = TestServer::accept(
            Variant::B,
            &chain.info.iv,
            &chain.info.key,
            &wire[..AUTH_HEAD_LEN],
        );
        server.decode_client(&wire[AUTH_HEAD_LEN..]);

        let mut response = server.pack_server(b"alpha");
        response.extend_from_slice(&server.pack_server(b"beta"));

        let mut received = Vec::new();
        let mut buffered = Vec::new();
        for &byte in &response {
            buffered.push(byte);
            let (payload, consumed) = chain.post_decrypt(&buffered).unwrap();
            received.extend_from_slice(&payload);
            buffered.drain(..consumed);
        }
        assert!(buffered.is_empty());
        assert_eq!(received, b"alphabeta");
    }

    #[test]
    fn tampered_response_is_rejected() {
        let mut chain = configured(Variant::B, Arc::new(AuthData::default()));
        let wire = chain.pre_encrypt(b"open").unwrap();
        let mut server = TestServer::accept(
            Variant::B,
            &chain.info.iv,
            &chain.info.key,
            &wire[..AUTH_HEAD_LEN],
        );
        server.decode_client(&wire[AUTH_HEAD_LEN..]);

        let mut response = server.pack_server(b"alpha");
        let mid = response.len() / 2;
        response[mid] ^= 0x01;
        assert!(matches!(
            chain.post_decrypt(&response),
            Err(Error::Protocol(ProtocolViolation::ChunkHmacMismatch { .. }))
        ));
    }

    #[test]
    fn oversized_declared_chunk_is_rejected() {
        let mut chain = configured(Variant::B, Arc::new(AuthData::default()));
        let _ = chain.pre_encrypt(b"open").unwrap();

        // Forge a masked length field declaring a 65535-byte payload.
        let mut junk = vec![0u8; 32];
        junk[0] = 0xFF ^ chain.last_server_hash[14];
        junk[1] = 0xFF ^ chain.last_server_hash[15];
        assert!(matches!(
            chain.post_decrypt(&junk),
            Err(Error::Protocol(ProtocolViolation::ChunkLenInvalid { .. }))
        ));
    }

    #[test]
    fn server_data_before_the_auth_head_is_rejected() {
        let mut chain = configured(Variant::B, Arc::new(AuthData::default()));
        assert!(matches!(
            chain.post_decrypt(&[0u8; 16]),
            Err(Error::Protocol(ProtocolViolation::UnexpectedServerData))
        ));
    }

    #[test]
    fn empty_write_before_the_auth_head_produces_nothing() {
        let mut chain = configured(Variant::B, Arc::new(AuthData::default()));
        assert!(chain.pre_encrypt(&[]).unwrap().is_empty());
        assert!(!chain.header_sent);
    }

    #[test]
    fn empty_write_after_the_auth_head_produces_nothing() {
        let mut chain = configured(Variant::B, Arc::new(AuthData::default()));
        let _ = chain.pre_encrypt(b"open").unwrap();
        assert!(chain.pre_encrypt(&[]).unwrap().is_empty());
    }

    #[test]
    fn data_size_lists_are_sorted_and_bounded() {
        for seed in 0..32u8 {
            let key = evp_bytes_to_key(&[seed], 16);
            let (list1, list2) = data_size_lists(&key);
            assert!((4..12).contains(&list1.len()));
            assert!((8..24).contains(&list2.len()));
            for list in [&list1, &list2] {
                assert!(list.windows(2).all(|w| w[0] <= w[1]));
                assert!(list.iter().all(|&v| v < 1440));
            }
        }
    }

    #[test]
    fn large_payloads_are_never_padded() {
        let mut random = Shift128Plus::from_key(b"any");
        let (list1, list2) = data_size_lists(b"any");
        for variant in [Variant::A, Variant::B] {
            let len = chunk_rand_len(
                variant,
                CHUNK_UNPADDED_ABOVE + 1,
                &mut random,
                &[7u8; 16],
                &list1,
                &list2,
                CHUNK_OVERHEAD,
            );
            assert_eq!(len, 0);
        }
    }

    #[test]
    fn padding_derivation_is_deterministic() {
        let (list1, list2) = data_size_lists(b"key");
        let hash = [0x5Au8; 16];
        for data_len in [0usize, 1, 100, 401, 901, 1301, 1440] {
            let mut r1 = Shift128Plus::from_key(b"x");
            let mut r2 = Shift128Plus::from_key(b"y");
            let a = chunk_rand_len(Variant::B, data_len, &mut r1, &hash, &list1, &list2, 4);
            let b = chunk_rand_len(Variant::B, data_len, &mut r2, &hash, &list1, &list2, 4);
            // The reseed erases prior state, so both streams agree.
            assert_eq!(a, b);
        }
    }

    #[test]
    fn serialized_writers_keep_the_chain_and_chunk_ids_in_step() {
        let chain = Arc::new(std::sync::Mutex::new(configured(
            Variant::B,
            Arc::new(AuthData::default()),
        )));
        let wire = Arc::new(std::sync::Mutex::new(Vec::new()));

        // Send the auth head first, then let four threads contend for the
        // writer lock with distinct payloads.
        {
            let mut chain = chain.lock().unwrap();
            let head = chain.pre_encrypt(b"open").unwrap();
            wire.lock().unwrap().push(head);
        }
        let mut handles = Vec::new();
        for i in 0..4u8 {
            let chain = chain.clone();
            let wire = wire.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..8 {
                    let mut chain = chain.lock().unwrap();
                    let chunk = chain.pre_encrypt(&vec![b'a' + i; 50]).unwrap();
                    // Pushed before the chain lock drops, so the wire order
                    // matches the encode order.
                    wire.lock().unwrap().push(chunk);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let wire: Vec<u8> = wire.lock().unwrap().concat();
        let chain = chain.lock().unwrap();
        let mut server = TestServer::accept(
            Variant::B,
            &chain.info.iv,
            &chain.info.key,
            &wire[..AUTH_HEAD_LEN],
        );
        let (got, consumed) = server.decode_client(&wire[AUTH_HEAD_LEN..]);

        // Every chunk carried a valid hmac over the previous hash, and the
        // server's strictly incrementing counter ends one past the client's.
        assert_eq!(consumed, wire.len() - AUTH_HEAD_LEN);
        assert_eq!(server.recv_id, chain.chunk_id + 1);

        // Writes never interleave mid-chunk: after the opening bytes the
        // payload is 32 uniform runs of 50.
        assert_eq!(&got[..4], b"open");
        assert_eq!(got.len(), 4 + 32 * 50);
        for run in got[4..].chunks(50) {
            assert!(run.iter().all(|&b| b == run[0]));
        }
    }

    #[test]
    fn connections_sharing_a_session_all_authenticate() {
        let auth = Arc::new(AuthData::default());
        for _ in 0..3 {
            let mut chain = configured(Variant::B, auth.clone());
            let wire = chain.pre_encrypt(b"hello").unwrap();
            let mut server = TestServer::accept(
                Variant::B,
                &chain.info.iv,
                &chain.info.key,
                &wire[..AUTH_HEAD_LEN],
            );
            let (got, _) = server.decode_client(&wire[AUTH_HEAD_LEN..]);
            assert_eq!(got, b"hello");
        }
    }
}
