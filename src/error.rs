//! All possible non-I/O transport errors.
//!
use core::{
    error,
    fmt::{Display, Formatter},
};
use std::io::{self, ErrorKind};

/// Enumeration of all possible non-I/O transport errors.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Error {
    /// The connection parameters are unusable. Raised before any traffic is
    /// exchanged, while building the cipher, obfuscator, or protocol layer.
    ///
    /// # Suggested error handling strategy
    ///
    /// This error is fatal and deterministic: retrying with the same
    /// configuration will fail again. Fix the configuration.
    Config(ConfigError),

    /// The peer deviated from the wire format. This could be due to the peer
    /// using a different key, random errors in the network, or active probing.
    ///
    /// # Suggested error handling strategy
    ///
    /// This error is fatal, meaning the connection cannot continue. Any
    /// buffered incoming data must be discarded, since its framing can no
    /// longer be trusted.
    Protocol(ProtocolViolation),
}

/// A connection was configured with parameters that can never work.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ConfigError {
    /// The cipher method name is not one of the supported stream ciphers.
    UnsupportedCipher {
        /// The rejected method name.
        name: String,
    },

    /// The obfuscator name is not one of the supported obfuscators.
    UnknownObfuscator {
        /// The rejected obfuscator name.
        name: String,
    },

    /// The protocol name is not one of the supported protocols.
    UnknownProtocol {
        /// The rejected protocol name.
        name: String,
    },

    /// An `ssr://` URL could not be parsed.
    InvalidUrl {
        /// A hint about which part of the URL was rejected.
        reason: &'static str,
    },

    /// A proxy target address could not be encoded.
    InvalidTargetAddr {
        /// The rejected address.
        addr: String,
    },
}

/// The peer sent bytes that do not form valid frames.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ProtocolViolation {
    /// The peer sent framed data before the local side opened the connection
    /// with its auth head. A conforming server never speaks first.
    UnexpectedServerData,

    /// The declared payload plus derived padding of an incoming chunk exceeds
    /// what a conforming peer can produce.
    ChunkLenInvalid {
        /// The computed `payload + padding` length.
        received: usize,
    },

    /// The trailing authenticator of an incoming chunk does not match.
    ChunkHmacMismatch {
        /// Receive counter of the failed chunk.
        recv_id: u32,
    },

    /// An HTTP obfuscator response header never terminated.
    HttpHeaderOverflow {
        /// Bytes buffered so far without finding the header terminator.
        received: usize,
    },

    /// A TLS obfuscator record did not start with the application-data magic.
    TlsBadRecordMagic {
        /// The first bytes of the offending record.
        received: [u8; 3],
    },

    /// The TLS obfuscator server hello failed its authenticator check.
    TlsServerHelloHmacMismatch,

    /// The TLS obfuscator peer sent handshake data in the wrong order.
    TlsHandshakeOutOfOrder,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Config(err) => write!(f, "Config: {}", err),
            Error::Protocol(err) => write!(f, "Protocol: {}", err),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::UnsupportedCipher { name } => {
                write!(f, "UnsupportedCipher: {:?}", name)
            }
            ConfigError::UnknownObfuscator { name } => {
                write!(f, "UnknownObfuscator: {:?}", name)
            }
            ConfigError::UnknownProtocol { name } => {
                write!(f, "UnknownProtocol: {:?}", name)
            }
            ConfigError::InvalidUrl { reason } => write!(f, "InvalidUrl: {}", reason),
            ConfigError::InvalidTargetAddr { addr } => {
                write!(f, "InvalidTargetAddr: {:?}", addr)
            }
        }
    }
}

impl Display for ProtocolViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtocolViolation::UnexpectedServerData => write!(f, "UnexpectedServerData"),
            ProtocolViolation::ChunkLenInvalid { received } => {
                write!(f, "ChunkLenInvalid: received {}", received)
            }
            ProtocolViolation::ChunkHmacMismatch { recv_id } => {
                write!(f, "ChunkHmacMismatch: chunk {}", recv_id)
            }
            ProtocolViolation::HttpHeaderOverflow { received } => {
                write!(f, "HttpHeaderOverflow: received {}", received)
            }
            ProtocolViolation::TlsBadRecordMagic { received } => {
                write!(f, "TlsBadRecordMagic: received {:02x?}", received)
            }
            ProtocolViolation::TlsServerHelloHmacMismatch => {
                write!(f, "TlsServerHelloHmacMismatch")
            }
            ProtocolViolation::TlsHandshakeOutOfOrder => write!(f, "TlsHandshakeOutOfOrder"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Config(err) => Some(err),
            Error::Protocol(err) => Some(err),
        }
    }
}

impl error::Error for ConfigError {}

impl error::Error for ProtocolViolation {}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        io::Error::new(ErrorKind::Other, e)
    }
}

impl From<ConfigError> for io::Error {
    fn from(e: ConfigError) -> Self {
        io::Error::new(ErrorKind::Other, Error::Config(e))
    }
}

impl From<ProtocolViolation> for io::Error {
    fn from(e: ProtocolViolation) -> Self {
        io::Error::new(ErrorKind::Other, Error::Protocol(e))
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<ProtocolViolation> for Error {
    fn from(e: ProtocolViolation) -> Self {
        Error::Protocol(e)
    }
}
