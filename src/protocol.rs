//! Authentication protocols layered under the cipher.
//!
//! A protocol frames plaintext before encryption and validates framed
//! plaintext after decryption. It is the only layer that authenticates the
//! peer; the obfuscator and cipher on top of it do not.

use crate::{
    auth_chain::AuthChain,
    error::{ConfigError, Error},
    server_info::ServerInfo,
    session::Session,
};

/// Client-side authentication protocol.
pub(crate) trait Protocol: Send {
    /// Installs the connection parameters. Called once, after the cipher
    /// picks its IV and before the first `pre_encrypt`.
    fn configure(&mut self, info: ServerInfo);

    /// Framing bytes this protocol adds per chunk, advertised to the layers
    /// that budget padding around it.
    fn overhead(&self) -> usize;

    /// Frames outgoing plaintext. The first non-empty call emits the
    /// connection's auth head ahead of the payload.
    fn pre_encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, Error>;

    /// Validates and unframes incoming plaintext. Returns the recovered
    /// payload and how many input bytes were digested; zero consumed means
    /// the input ends mid-chunk and must be re-fed once it has grown.
    fn post_decrypt(&mut self, data: &[u8]) -> Result<(Vec<u8>, usize), Error>;
}

/// Builds a protocol by its wire name. An empty name selects `origin`.
pub(crate) fn new_protocol(
    name: &str,
    session: &Session,
) -> Result<Box<dyn Protocol>, Error> {
    match name.to_ascii_lowercase().as_str() {
        "" | "origin" => Ok(Box::new(Origin)),
        "auth_chain_a" => Ok(Box::new(AuthChain::new_a(session.auth.clone()))),
        "auth_chain_b" => Ok(Box::new(AuthChain::new_b(session.auth.clone()))),
        _ => Err(ConfigError::UnknownProtocol {
            name: name.to_string(),
        }
        .into()),
    }
}

/// The identity protocol: no framing, no authentication.
struct Origin;

impl Protocol for Origin {
    fn configure(&mut self, _info: ServerInfo) {}

    fn overhead(&self) -> usize {
        0
    }

    fn pre_encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(data.to_vec())
    }

    fn post_decrypt(&mut self, data: &[u8]) -> Result<(Vec<u8>, usize), Error> {
        Ok((data.to_vec(), data.len()))
    }
}
