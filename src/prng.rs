//! The xorshift128+ generator both ends use to agree on padding lengths
//! and payload offsets without transmitting them.
//!
//! This is not a cryptographic generator and is never used as one. Its only
//! job is to be bit-identical on both ends when seeded from shared secrets,
//! so the exact shift constants and the seeding quirks below are load-bearing.

/// Deterministic xorshift128+ stream shared with the peer.
#[derive(Clone, Debug)]
pub(crate) struct Shift128Plus {
    v0: u64,
    v1: u64,
}

impl Shift128Plus {
    /// Seeds from the first 16 bytes of `key`, zero-padded if shorter.
    pub(crate) fn from_key(key: &[u8]) -> Self {
        let mut prng = Shift128Plus { v0: 0, v1: 0 };
        prng.reseed(key);
        prng
    }

    pub(crate) fn reseed(&mut self, key: &[u8]) {
        let mut bin = [0u8; 16];
        let n = key.len().min(16);
        bin[..n].copy_from_slice(&key[..n]);
        self.v0 = u64::from_le_bytes(bin[..8].try_into().unwrap());
        self.v1 = u64::from_le_bytes(bin[8..].try_into().unwrap());
    }

    /// Reseeds with the payload length spliced into the first two seed bytes,
    /// then burns four outputs. This is how each chunk derives its own
    /// padding stream from the rolling hash.
    pub(crate) fn reseed_with_len(&mut self, key: &[u8], data_len: usize) {
        let mut bin = [0u8; 16];
        let n = key.len().min(16);
        bin[..n].copy_from_slice(&key[..n]);
        bin[..2].copy_from_slice(&(data_len as u16).to_le_bytes());
        self.v0 = u64::from_le_bytes(bin[..8].try_into().unwrap());
        self.v1 = u64::from_le_bytes(bin[8..].try_into().unwrap());
        for _ in 0..4 {
            self.next();
        }
    }

    pub(crate) fn next(&mut self) -> u64 {
        let mut x = self.v0;
        let y = self.v1;
        self.v0 = y;
        x ^= x << 23;
        x ^= y ^ (x >> 17) ^ (y >> 26);
        self.v1 = x;
        x.wrapping_add(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_outputs_for_unit_seed() {
        // Worked by hand from the shift constants: seed v0=1, v1=0.
        let mut prng = Shift128Plus::from_key(&[1]);
        assert_eq!(prng.next(), 0x80_0041);
        assert_eq!(prng.next(), 0x100_0082);
    }

    #[test]
    fn same_seed_same_stream() {
        let key = b"0123456789abcdef";
        let mut a = Shift128Plus::from_key(key);
        let mut b = Shift128Plus::from_key(key);
        for _ in 0..64 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn long_keys_are_truncated_to_sixteen_bytes() {
        let mut a = Shift128Plus::from_key(b"0123456789abcdef-tail-ignored");
        let mut b = Shift128Plus::from_key(b"0123456789abcdef");
        assert_eq!(a.next(), b.next());
    }

    #[test]
    fn reseed_with_len_depends_on_length() {
        let key = b"0123456789abcdef";
        let mut a = Shift128Plus::from_key(key);
        let mut b = Shift128Plus::from_key(key);
        a.reseed_with_len(key, 100);
        b.reseed_with_len(key, 101);
        assert_ne!(a.next(), b.next());

        // And is itself deterministic.
        a.reseed_with_len(key, 100);
        b.reseed_with_len(key, 100);
        for _ in 0..16 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn length_splice_overrides_first_two_key_bytes() {
        let mut a = Shift128Plus::from_key(b"XX23456789abcdef");
        let mut b = Shift128Plus::from_key(b"YY23456789abcdef");
        a.reseed_with_len(b"XX23456789abcdef", 7);
        b.reseed_with_len(b"YY23456789abcdef", 7);
        assert_eq!(a.next(), b.next());
    }
}
