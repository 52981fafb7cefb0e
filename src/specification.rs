//! The informal specification of the ShadowsocksR client wire format.

// First outgoing packet of an `auth_chain_*` connection:
// ```text
// | check | uid_hmac | uid  | encrypted_block | head_hmac |   first chunk   |
// |  4B   |    8B    |  4B  |       16B       |     4B    |    variable     |
// |                 <- auth head ->                       |
// ```
pub(crate) const AUTH_HEAD_LEN: usize = 4 + 8 + 4 + 16 + 4; // 36

// Every subsequent unit of payload travels as a chunk:
// ```text
// | masked_len | random | payload | random | chunk_hmac |
// |     2B     |   ?B   |   ?B    |   ?B   |     2B     |
// |                <- hmac input ->        |
// ```
// The payload offset inside the random filler is derived from the shared
// pseudo-random stream, so only the two ends can locate it.
pub(crate) const CHUNK_OVERHEAD: usize = 4; // masked_len + chunk_hmac

/// Payloads above this length are never padded.
pub(crate) const CHUNK_UNPADDED_ABOVE: usize = 1440;

/// Maximum payload packed into a single chunk.
pub(crate) const CHUNK_PAYLOAD_MAX_LEN: usize = 2048;

/// Maximum payload packed into the chunk that rides along with the auth head.
pub(crate) const HEAD_CHUNK_PAYLOAD_MAX_LEN: usize = 1200;

/// Upper bound on `payload + padding` of an incoming chunk. Anything larger
/// cannot have been produced by a conforming peer.
pub(crate) const CHUNK_TOTAL_MAX_LEN: usize = 4096;

/// Rollover threshold for the per-client connection counter. Crossing it
/// forces a fresh client id.
pub(crate) const CONNECTION_ID_ROLLOVER: u32 = 0xFF00_0000;

/// Modulus for a freshly rolled connection counter.
pub(crate) const CONNECTION_ID_RANGE: u32 = 0xFF_FFFD;

/// Target address length assumed when the first payload does not carry a
/// recognizable SOCKS-style address.
pub(crate) const DEFAULT_HEAD_LEN: usize = 30;

// Scratch buffers for raw socket reads:
// chunk_total(4096) + masked_len(2) + chunk_hmac(2) + slack for an hmac-sha1
// trailer used by other protocol families.
pub(crate) const BUF_SIZE: usize = 4108;

/// Pooled scratch buffers kept around between connections.
pub(crate) const POOL_MAX_BUFS: usize = 2048;
