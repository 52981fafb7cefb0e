//! SOCKS-style target address encoding.
//!
//! The first bytes of payload through a proxied connection tell the server
//! where to connect: an address type tag, the address, and a big-endian
//! port.

use std::net::SocketAddr;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Encodes a `host:port` target. IP literals become their binary form,
/// anything else travels as a length-prefixed domain name.
pub(crate) fn encode_target(addr: &str) -> Option<Vec<u8>> {
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        let mut out = Vec::with_capacity(19);
        match sock {
            SocketAddr::V4(v4) => {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&v4.ip().octets());
            }
            SocketAddr::V6(v6) => {
                out.push(ATYP_IPV6);
                out.extend_from_slice(&v6.ip().octets());
            }
        }
        out.extend_from_slice(&sock.port().to_be_bytes());
        return Some(out);
    }

    let (host, port) = addr.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if host.is_empty() || host.len() > 255 || host.contains(':') {
        return None;
    }
    let mut out = Vec::with_capacity(4 + host.len());
    out.push(ATYP_DOMAIN);
    out.push(host.len() as u8);
    out.extend_from_slice(host.as_bytes());
    out.extend_from_slice(&port.to_be_bytes());
    Some(out)
}
