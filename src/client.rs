//! A convenience dialer for proxying TCP connections through one server.

use std::io::{self, ErrorKind};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::{
    config::Config,
    error::{ConfigError, Error},
    session::Session,
    socks,
    tokio_stream_impl::ProxyStream,
};

/// How long a [`dial`] waits for the TCP connection to the server before
/// failing with [`ErrorKind::TimedOut`]. Kept under a second so an
/// unreachable server fails the dial fast instead of hanging callers.
///
/// [`dial`]: SsrClient::dial
const DIAL_TIMEOUT: Duration = Duration::from_millis(800);

/// A dialer that opens proxied connections through one configured server.
///
/// All connections opened by the same `SsrClient` share a [`Session`], so
/// they present one client identity to the server. Cloning the client clones
/// the shared session, not the identity state behind it.
#[derive(Debug, Clone)]
pub struct SsrClient {
    config: Config,
    session: Session,
}

impl SsrClient {
    /// Builds a client from a validated configuration.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            session: Session::new(),
        })
    }

    /// Builds a client from an `ssr://` URL.
    pub fn from_url(url: &str) -> Result<Self, Error> {
        Self::new(Config::from_url(url)?)
    }

    /// Opens a proxied TCP connection to `target`, given as `host:port` with
    /// a domain name, IPv4 address, or bracketed IPv6 address.
    ///
    /// The returned stream reads from and writes to `target` directly; the
    /// relay request has already been sent.
    pub async fn dial(&self, target: &str) -> io::Result<ProxyStream<TcpStream>> {
        let target_addr = socks::encode_target(target).ok_or_else(|| {
            io::Error::from(Error::from(ConfigError::InvalidTargetAddr {
                addr: target.to_string(),
            }))
        })?;

        let server_addr = (self.config.server.as_str(), self.config.port);
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(server_addr))
            .await
            .map_err(|_| io::Error::new(ErrorKind::TimedOut, "server connect timed out"))??;

        let mut stream = ProxyStream::with_config_in(&self.config, &self.session, stream)?;
        stream.write_all(&target_addr).await?;
        debug!(
            server = %self.config.server,
            port = self.config.port,
            target,
            "proxied connection established"
        );
        Ok(stream)
    }

    /// UDP relaying is not supported; this always fails with
    /// [`ErrorKind::Unsupported`].
    pub async fn dial_udp(&self, _target: &str) -> io::Result<std::convert::Infallible> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "UDP relaying is not supported",
        ))
    }

    /// Returns the configuration this client dials with.
    pub fn config(&self) -> &Config {
        &self.config
    }
}
