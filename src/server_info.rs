//! Connection parameters handed to the obfuscator and protocol layers.

use crate::specification::DEFAULT_HEAD_LEN;

/// Everything an obfuscator or protocol strategy needs to know about the
/// connection it is shaping.
///
/// Each layer receives its own copy, with `param` carrying that layer's
/// plugin argument. The IV and key slots are filled in lazily, right before
/// the first packet is built.
#[derive(Clone, Debug, Default)]
pub(crate) struct ServerInfo {
    pub(crate) host: String,
    pub(crate) port: u16,
    /// Layer-specific plugin argument, e.g. a host list for the HTTP
    /// obfuscators or `uid:base64key` for the auth protocols.
    pub(crate) param: String,
    /// IV chosen for the send direction of this connection.
    pub(crate) iv: Vec<u8>,
    /// Master key shared with the cipher layer.
    pub(crate) key: Vec<u8>,
    /// Length of the target-address prefix at the start of the first payload.
    pub(crate) head_len: usize,
    /// Framing overhead the protocol layer adds per chunk.
    pub(crate) overhead: usize,
}

impl ServerInfo {
    pub(crate) fn new(host: &str, port: u16, param: &str) -> Self {
        ServerInfo {
            host: host.to_string(),
            port,
            param: param.to_string(),
            iv: Vec::new(),
            key: Vec::new(),
            head_len: DEFAULT_HEAD_LEN,
            overhead: 0,
        }
    }

    /// Infers the target-address prefix length from the first payload, which
    /// by convention starts with a SOCKS-style address.
    pub(crate) fn set_head_len(&mut self, first_payload: &[u8]) {
        self.head_len = head_size(first_payload, DEFAULT_HEAD_LEN);
    }
}

fn head_size(data: &[u8], default: usize) -> usize {
    if data.is_empty() {
        return default;
    }
    match data[0] & 0x07 {
        // type(1) + ipv4(4) + port(2)
        1 => 7,
        // type(1) + ipv6(16) + port(2)
        4 => 19,
        // type(1) + len(1) + domain + port(2)
        3 if data.len() > 1 => 4 + data[1] as usize,
        _ => default,
    }
}
