//! The layered transport state machine, independent of any I/O runtime.
//!
//! A [`SsrPipeline`] owns the cipher, obfuscator, and protocol state of one
//! connection but not the connection itself: every call is handed the wire.
//! [`read_wire`] and [`write_wire`] drive blocking streams directly; a
//! non-blocking stream surfaces [`ErrorKind::WouldBlock`], after which the
//! same call can be retried without losing state.
//!
//! Outbound, payload flows protocol → cipher → obfuscator; inbound the same
//! layers unwind in reverse. Each inbound layer keeps its own undigested
//! buffer, so arbitrarily fragmented input reassembles exactly.
//!
//! [`read_wire`]: SsrPipeline::read_wire
//! [`write_wire`]: SsrPipeline::write_wire

use core::fmt;
use std::io::{self, ErrorKind, Read, Write};

use tracing::{debug, trace};

use crate::{
    config::Config,
    crypto::StreamCipher,
    error::Error,
    obfs::{new_obfuscator, Decoded, Obfuscator},
    pool::PooledBuf,
    protocol::{new_protocol, Protocol},
    server_info::ServerInfo,
    session::Session,
    BUFFER_POOL,
};

/// A byte stream the pipeline can both read and write.
///
/// Reads need write access too: some obfuscators acknowledge a handshake
/// with an immediate empty write before the read can make progress.
pub trait Wire: Read + Write {}

impl<T: Read + Write + ?Sized> Wire for T {}

/// Protocol state of one client connection, decoupled from its socket.
pub struct SsrPipeline {
    cipher: StreamCipher,
    obfs: Box<dyn Obfuscator>,
    protocol: Box<dyn Protocol>,
    obfs_info: ServerInfo,
    protocol_info: ServerInfo,
    /// Scratch buffer for raw socket reads.
    read_buf: PooledBuf,
    /// Raw bytes the obfuscator has not digested yet.
    obfs_recv: Vec<u8>,
    /// Decoded bytes withheld until the peer's IV prefix is complete.
    iv_recv: Vec<u8>,
    /// Decrypted bytes the protocol has not validated yet.
    chain_recv: Vec<u8>,
    /// Validated payload not yet handed to the caller.
    delivered: Vec<u8>,
    delivered_pos: usize,
    /// Encoded output not yet written to the wire.
    pending: Vec<u8>,
    pending_pos: usize,
    pending_consumed: usize,
}

impl fmt::Debug for SsrPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsrPipeline")
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

impl SsrPipeline {
    /// Builds the pipeline for one connection. Connections that should share
    /// a client identity must be built from the same [`Session`].
    pub fn with_config(config: &Config, session: &Session) -> Result<Self, Error> {
        let cipher = StreamCipher::new(&config.method, &config.password)?;
        let obfs = new_obfuscator(&config.obfs, session)?;
        let protocol = new_protocol(&config.protocol, session)?;
        Ok(SsrPipeline {
            cipher,
            obfs,
            protocol,
            obfs_info: ServerInfo::new(&config.server, config.port, &config.obfs_param),
            protocol_info: ServerInfo::new(
                &config.server,
                config.port,
                &config.protocol_param,
            ),
            read_buf: BUFFER_POOL.get(),
            obfs_recv: Vec::new(),
            iv_recv: Vec::new(),
            chain_recv: Vec::new(),
            delivered: Vec::new(),
            delivered_pos: 0,
            pending: Vec::new(),
            pending_pos: 0,
            pending_consumed: 0,
        })
    }

    /// Frames `data` and writes it to the wire, returning how much of `data`
    /// was accepted. On [`ErrorKind::WouldBlock`] the frame stays buffered;
    /// retry with the same `data` until the call succeeds.
    pub fn write_wire(&mut self, wire: &mut dyn Wire, data: &[u8]) -> io::Result<usize> {
        if self.pending_pos >= self.pending.len() {
            self.encode_pending(data)?;
            self.pending_consumed = data.len();
        }
        self.flush_pending(wire)?;
        if self.pending_consumed == 0 && !data.is_empty() {
            // An acknowledgment frame was in front; frame the caller's
            // data now that it has drained.
            self.encode_pending(data)?;
            self.pending_consumed = data.len();
            self.flush_pending(wire)?;
        }
        Ok(self.pending_consumed)
    }

    /// Flushes buffered frames and the wire itself.
    pub fn flush_wire(&mut self, wire: &mut dyn Wire) -> io::Result<()> {
        self.flush_pending(wire)?;
        wire.flush()
    }

    /// Reads from the wire until at least one byte of validated payload is
    /// available, EOF (`Ok(0)`) is reached cleanly, or the wire blocks.
    pub fn read_wire(&mut self, wire: &mut dyn Wire, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(n) = self.step(wire, buf)? {
                return Ok(n);
            }
        }
    }

    /// One pass through the inbound layers. `None` means no payload became
    /// available yet and the caller should go around again.
    fn step(&mut self, wire: &mut dyn Wire, buf: &mut [u8]) -> io::Result<Option<usize>> {
        if self.delivered_pos < self.delivered.len() {
            let n = (self.delivered.len() - self.delivered_pos).min(buf.len());
            buf[..n].copy_from_slice(&self.delivered[self.delivered_pos..self.delivered_pos + n]);
            self.delivered_pos += n;
            if self.delivered_pos == self.delivered.len() {
                self.delivered.clear();
                self.delivered_pos = 0;
            }
            return Ok(Some(n));
        }

        // An acknowledgment write interrupted by WouldBlock finishes first.
        self.flush_pending(wire)?;

        let n = wire.read(&mut self.read_buf)?;
        if n == 0 {
            return if self.obfs_recv.is_empty()
                && self.iv_recv.is_empty()
                && self.chain_recv.is_empty()
            {
                Ok(Some(0))
            } else {
                Err(io::Error::new(ErrorKind::UnexpectedEof, "wire closed mid-frame"))
            };
        }
        self.obfs_recv.extend_from_slice(&self.read_buf[..n]);

        let decoded = match self.obfs.decode(&self.obfs_recv) {
            Ok(Decoded::Data(decoded)) => {
                self.obfs_recv.clear();
                decoded
            }
            Ok(Decoded::NeedMore(_)) => return Ok(None),
            Ok(Decoded::SendBack) => {
                self.obfs_recv.clear();
                trace!("obfuscator requested an acknowledging write");
                self.write_wire(wire, &[])?;
                return Ok(None);
            }
            Err(e) => {
                self.drop_recv_buffers();
                return Err(e.into());
            }
        };
        if decoded.is_empty() {
            return Ok(None);
        }

        let mut ciphertext = if self.cipher.dec_ready() {
            decoded
        } else {
            // The peer's stream opens with its IV; withhold everything
            // until the full prefix has arrived.
            self.iv_recv.extend_from_slice(&decoded);
            if self.iv_recv.len() < self.cipher.iv_len() {
                return Ok(None);
            }
            let rest = self.iv_recv.split_off(self.cipher.iv_len());
            let iv = std::mem::take(&mut self.iv_recv);
            self.cipher.init_decrypt(&iv);
            if rest.is_empty() {
                return Ok(None);
            }
            rest
        };
        self.cipher.decrypt(&mut ciphertext);
        self.chain_recv.extend_from_slice(&ciphertext);

        let (payload, consumed) = match self.protocol.post_decrypt(&self.chain_recv) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.drop_recv_buffers();
                return Err(e.into());
            }
        };
        if consumed == 0 {
            return Ok(None);
        }
        self.chain_recv.drain(..consumed);
        if payload.is_empty() {
            return Ok(None);
        }

        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        if n < payload.len() {
            self.delivered = payload;
            self.delivered_pos = n;
        }
        Ok(Some(n))
    }

    fn encode_pending(&mut self, data: &[u8]) -> io::Result<()> {
        let iv = if self.cipher.enc_ready() {
            None
        } else {
            let iv = self.cipher.init_encrypt();
            self.configure_layers(data);
            Some(iv)
        };
        let mut framed = self.protocol.pre_encrypt(data).map_err(io::Error::from)?;
        self.cipher.encrypt(&mut framed);
        let plain = match iv {
            Some(mut iv) => {
                iv.extend_from_slice(&framed);
                iv
            }
            None => framed,
        };
        self.pending = self.obfs.encode(&plain);
        self.pending_pos = 0;
        Ok(())
    }

    /// Hands the lazily chosen IV, key, and first-payload shape to the
    /// obfuscator and protocol. Runs exactly once, on the first write.
    fn configure_layers(&mut self, first_payload: &[u8]) {
        let overhead = self.protocol.overhead();
        for info in [&mut self.obfs_info, &mut self.protocol_info] {
            info.iv = self.cipher.enc_iv().to_vec();
            info.key = self.cipher.key().to_vec();
            info.set_head_len(first_payload);
            info.overhead = overhead;
        }
        debug!(
            server = %self.obfs_info.host,
            port = self.obfs_info.port,
            head_len = self.obfs_info.head_len,
            "connection layers configured"
        );
        self.obfs.configure(self.obfs_info.clone());
        self.protocol.configure(self.protocol_info.clone());
    }

    fn flush_pending(&mut self, wire: &mut dyn Wire) -> io::Result<()> {
        while self.pending_pos < self.pending.len() {
            let n = wire.write(&self.pending[self.pending_pos..])?;
            if n == 0 {
                return Err(io::Error::new(ErrorKind::WriteZero, "wire closed mid-frame"));
            }
            self.pending_pos += n;
        }
        self.pending.clear();
        self.pending_pos = 0;
        Ok(())
    }

    /// Once framing fails the receive buffers cannot be trusted anymore.
    fn drop_recv_buffers(&mut self) {
        self.obfs_recv.clear();
        self.iv_recv.clear();
        self.chain_recv.clear();
        self.delivered.clear();
        self.delivered_pos = 0;
    }
}
