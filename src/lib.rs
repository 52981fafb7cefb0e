//! Ssrwire is a client-side implementation of the ShadowsocksR transport:
//! a layered obfuscation protocol that runs over reliable, ordered streams
//! and wraps application traffic in a stream cipher, a traffic obfuscator,
//! and an authentication protocol.
//!
//! ## Quick Start
//!
//! Ssrwire provides two interfaces: [`SsrPipeline`] and [`ProxyStream`].
//!
//! * [`SsrPipeline`]
//!
//!   The `SsrPipeline` is a deterministic state machine implementation of the
//!   transport logic, following the sans-I/O principle. It does not include
//!   any network I/O code or spawn internal threads; every call is handed the
//!   wire it should drive.
//!
//!   When using `SsrPipeline`, it needs to be bound to a reliable, ordered
//!   stream that implements the [`Read`] and [`Write`] traits (e.g.,
//!   [`TcpStream`]). `SsrPipeline` does not restrict the type of underlying
//!   transport, but it is typically used with TCP transports.
//!
//! * [`ProxyStream`]
//!
//!   For convenient use in asynchronous scenarios, ssrwire provides a
//!   ready-to-use asynchronous stream implementation based on tokio. It
//!   offers a future-based API. `ProxyStream` requires the underlying
//!   transport to implement the [`AsyncRead`] and [`AsyncWrite`] traits and
//!   the `tokio-stream-impl` feature to be enabled.
//!
//! ## Configuration
//!
//! Ssrwire provides the [`Config`] struct to configure the behavior of
//! [`SsrPipeline`] and [`ProxyStream`]. A configuration names three
//! independently pluggable layers:
//!
//! 1. Cipher
//!
//!    A stream cipher keyed from the shared password, selected by method
//!    name. See [`CipherKind`] for the supported methods.
//!
//! 2. Obfuscator
//!
//!    Disguises the byte stream as unrelated traffic. `plain` leaves the
//!    stream untouched; `http_simple` and `http_post` dress the first packet
//!    up as an HTTP request; `tls1.2_ticket_auth` mimics a TLS 1.2 session
//!    resumption handshake.
//!
//! 3. Protocol
//!
//!    Authenticates the stream against the server. `origin` is the bare
//!    Shadowsocks layout; `auth_chain_a` and `auth_chain_b` add per-chunk
//!    keyed authentication and length padding.
//!
//! Configurations can also be parsed from `ssr://` URLs via
//! [`Config::from_url`].
//!
//! Connections that should present one client identity to the server must
//! share a [`Session`].
//!
//! [`Read`]: std::io::Read
//! [`Write`]: std::io::Write
//! [`TcpStream`]: std::net::TcpStream
//! [`AsyncRead`]: tokio::io::AsyncRead
//! [`AsyncWrite`]: tokio::io::AsyncWrite
#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;

mod auth_chain;
mod crypto;
mod http_obfs;
mod obfs;
mod pipeline;
mod pool;
mod prng;
mod protocol;
mod server_info;
mod session;
#[cfg(any(test, feature = "tokio-stream-impl"))]
mod socks;
mod specification;
mod tls_obfs;

#[cfg(feature = "tokio-stream-impl")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-stream-impl")))]
mod client;
#[cfg(feature = "tokio-stream-impl")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-stream-impl")))]
mod tokio_stream_impl;

pub use config::Config;
pub use crypto::CipherKind;
pub use error::Error;
pub use session::Session;

pub use pipeline::{SsrPipeline, Wire};
#[cfg(feature = "tokio-stream-impl")]
pub use client::SsrClient;
#[cfg(feature = "tokio-stream-impl")]
pub use tokio_stream_impl::ProxyStream;

use std::sync::LazyLock;

use pool::BufferPool;

/// A global pool of read buffers shared by all pipelines.
///
/// Each pipeline holds one buffer for the lifetime of its connection and
/// returns it on drop, so short-lived connections reuse allocations.
static BUFFER_POOL: LazyLock<BufferPool> = LazyLock::new(|| BufferPool::with_capacity(64));
