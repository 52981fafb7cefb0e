//! The `http_simple` and `http_post` obfuscators.
//!
//! The first outgoing packet is disguised as an innocuous HTTP request with
//! part of the payload percent-encoded into the request path and the rest
//! riding behind the headers. The server answers with one HTTP response.
//! After that single exchange both directions are raw passthrough.

use core::fmt::Write as _;

use rand::{rngs::{OsRng, StdRng}, Rng, SeedableRng, TryRngCore};

use crate::{
    error::{Error, ProtocolViolation},
    obfs::{Decoded, Obfuscator},
    server_info::ServerInfo,
};

/// Response headers are expected to fit well below this.
const MAX_RESPONSE_HEAD_LEN: usize = 8192;

/// Upper bound on the extra payload smuggled into the request path beyond
/// the IV and target address.
const PATH_EXTRA_MAX_LEN: usize = 64;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36 Edg/125.0.0.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
];

/// HTTP request mimicry, shared by the GET and POST flavors.
pub(crate) struct HttpObfs {
    info: ServerInfo,
    method_get: bool,
    raw_trans_sent: bool,
    raw_trans_received: bool,
    rng: StdRng,
}

impl HttpObfs {
    pub(crate) fn get() -> Self {
        HttpObfs::with_method(true)
    }

    pub(crate) fn post() -> Self {
        HttpObfs::with_method(false)
    }

    fn with_method(method_get: bool) -> Self {
        let mut seed = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut seed)
            .expect("system random source failure");
        HttpObfs {
            info: ServerInfo::default(),
            method_get,
            raw_trans_sent: false,
            raw_trans_received: false,
            rng: StdRng::from_seed(seed),
        }
    }

    /// The `Host` header value: a random entry from the plugin argument's
    /// comma-separated host list, or the server host itself. The port is
    /// omitted when it is the default HTTP port.
    fn host_header(&mut self) -> String {
        let hosts = self.info.param.split('#').next().unwrap_or("");
        let host = if hosts.is_empty() {
            self.info.host.clone()
        } else {
            let items: Vec<&str> = hosts.split(',').collect();
            items[self.rng.random_range(0..items.len())].trim().to_string()
        };
        if self.info.port == 80 {
            host
        } else {
            format!("{}:{}", host, self.info.port)
        }
    }

    fn boundary(&mut self) -> String {
        const ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        let mut out = String::from("----WebKitFormBoundary");
        for _ in 0..16 {
            out.push(ALNUM[self.rng.random_range(0..ALNUM.len())] as char);
        }
        out
    }
}

impl Obfuscator for HttpObfs {
    fn configure(&mut self, info: ServerInfo) {
        self.info = info;
    }

    fn encode(&mut self, data: &[u8]) -> Vec<u8> {
        if self.raw_trans_sent {
            return data.to_vec();
        }
        self.raw_trans_sent = true;

        // The IV plus target address must land in the path so the server can
        // recover them from the very first unit; anything past that is
        // optional stuffing.
        let head_size = self.info.iv.len() + self.info.head_len;
        let head_len = if data.len() > head_size + PATH_EXTRA_MAX_LEN {
            head_size + self.rng.random_range(0..PATH_EXTRA_MAX_LEN)
        } else {
            data.len()
        };
        let (head, body) = data.split_at(head_len);

        let mut path = String::with_capacity(1 + head.len() * 3);
        path.push('/');
        for byte in head {
            let _ = write!(path, "%{:02x}", byte);
        }

        let host = self.host_header();
        let user_agent = USER_AGENTS[self.rng.random_range(0..USER_AGENTS.len())];
        let request = if self.method_get {
            format!(
                "GET {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {user_agent}\r\nAccept: */*\r\nConnection: keep-alive\r\n\r\n"
            )
        } else {
            let boundary = self.boundary();
            format!(
                "POST {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {user_agent}\r\nAccept: */*\r\nContent-Type: multipart/form-data; boundary={boundary}\r\nConnection: keep-alive\r\n\r\n"
            )
        };

        let mut out = request.into_bytes();
        out.extend_from_slice(body);
        out
    }

    fn decode(&mut self, data: &[u8]) -> Result<Decoded, Error> {
        if self.raw_trans_received {
            return Ok(Decoded::Data(data.to_vec()));
        }
        match data.windows(4).position(|w| w == b"\r\n\r\n") {
            Some(pos) => {
                self.raw_trans_received = true;
                Ok(Decoded::Data(data[pos + 4..].to_vec()))
            }
            None if data.len() >= MAX_RESPONSE_HEAD_LEN => {
                Err(ProtocolViolation::HttpHeaderOverflow {
                    received: data.len(),
                }
                .into())
            }
            None => Ok(Decoded::NeedMore(1)),
        }
    }
}
