//! Traffic-shape obfuscators.
//!
//! An obfuscator only changes what the byte stream looks like on the wire.
//! It carries no confidentiality and no authenticity; the cipher and
//! protocol layers underneath provide those.

use crate::{
    error::{ConfigError, Error},
    http_obfs::HttpObfs,
    server_info::ServerInfo,
    session::Session,
    tls_obfs::Tls12TicketAuth,
};

/// Outcome of feeding received bytes through an obfuscator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Decoded {
    /// The whole input decoded into this payload, which may be empty.
    Data(Vec<u8>),

    /// The input ends mid-unit. Keep it buffered and retry once at least
    /// this many more bytes have arrived.
    NeedMore(usize),

    /// The whole input was a handshake message that requires an immediate
    /// empty write before the read can make progress.
    SendBack,
}

/// Client-side traffic obfuscator.
///
/// `decode` consumes its input all-or-nothing: a [`Decoded::Data`] or
/// [`Decoded::SendBack`] outcome means every input byte was digested, while
/// [`Decoded::NeedMore`] digests nothing, so the caller re-feeds the grown
/// buffer. Re-feeding the same prefix is therefore always safe.
pub(crate) trait Obfuscator: Send {
    /// Installs the connection parameters. Called once, after the cipher
    /// picks its IV and before the first `encode`.
    fn configure(&mut self, info: ServerInfo);

    /// Wraps outgoing bytes for the wire. An empty input may still produce
    /// output while a handshake is in flight.
    fn encode(&mut self, data: &[u8]) -> Vec<u8>;

    /// Unwraps received bytes.
    fn decode(&mut self, data: &[u8]) -> Result<Decoded, Error>;
}

/// Builds an obfuscator by its wire name. An empty name selects `plain`.
pub(crate) fn new_obfuscator(
    name: &str,
    session: &Session,
) -> Result<Box<dyn Obfuscator>, Error> {
    match name.to_ascii_lowercase().as_str() {
        "" | "plain" => Ok(Box::new(Plain)),
        "http_simple" => Ok(Box::new(HttpObfs::get())),
        "http_post" => Ok(Box::new(HttpObfs::post())),
        "tls1.2_ticket_auth" => Ok(Box::new(Tls12TicketAuth::new(session.tls.clone()))),
        _ => Err(ConfigError::UnknownObfuscator {
            name: name.to_string(),
        }
        .into()),
    }
}

/// The identity obfuscator: bytes pass through untouched in both directions.
struct Plain;

impl Obfuscator for Plain {
    fn configure(&mut self, _info: ServerInfo) {}

    fn encode(&mut self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn decode(&mut self, data: &[u8]) -> Result<Decoded, Error> {
        Ok(Decoded::Data(data.to_vec()))
    }
}
