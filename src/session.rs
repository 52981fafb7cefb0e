//! State shared by every connection a client opens.
//!
//! The server correlates connections from one client by the identifiers
//! minted here, so all connections of a client must draw from the same
//! [`Session`]. Cloning a `Session` clones handles, not state.

use core::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};

use rand::{rngs::OsRng, TryRngCore};

use crate::specification::{CONNECTION_ID_RANGE, CONNECTION_ID_ROLLOVER};

/// Shared per-client state, handed to every connection built from it.
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub(crate) auth: Arc<AuthData>,
    pub(crate) tls: Arc<TlsSessionData>,
}

impl Session {
    /// Creates a fresh client identity.
    pub fn new() -> Self {
        Session::default()
    }
}

/// Client identity and connection counter used by the auth protocols.
#[derive(Default)]
pub(crate) struct AuthData(Mutex<AuthDataInner>);

#[derive(Default)]
struct AuthDataInner {
    client_id: Option<[u8; 4]>,
    connection_id: u32,
}

impl AuthData {
    /// Mints the identifiers for one new connection. The counter rolls the
    /// client id over well before it could repeat under the same id.
    pub(crate) fn next_connection(&self) -> ([u8; 4], u32) {
        let mut inner = self.0.lock().unwrap();
        inner.connection_id = inner.connection_id.wrapping_add(1);
        if inner.client_id.is_none() || inner.connection_id > CONNECTION_ID_ROLLOVER {
            let mut client_id = [0u8; 4];
            OsRng
                .try_fill_bytes(&mut client_id)
                .expect("system random source failure");
            let mut seed = [0u8; 4];
            OsRng
                .try_fill_bytes(&mut seed)
                .expect("system random source failure");
            inner.client_id = Some(client_id);
            inner.connection_id = u32::from_le_bytes(seed) % CONNECTION_ID_RANGE;
        }
        (inner.client_id.expect("client id minted above"), inner.connection_id)
    }
}

impl Debug for AuthData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuthData").field(&"*****").finish()
    }
}

/// The fake TLS client id reused across the handshakes of one client.
pub(crate) struct TlsSessionData {
    pub(crate) client_id: [u8; 32],
}

impl Default for TlsSessionData {
    fn default() -> Self {
        let mut client_id = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut client_id)
            .expect("system random source failure");
        TlsSessionData { client_id }
    }
}

impl Debug for TlsSessionData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TlsSessionData").field(&"*****").finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, thread};

    use super::*;

    #[test]
    fn connection_ids_advance_under_one_client_id() {
        let auth = AuthData::default();
        let (client_a, conn_a) = auth.next_connection();
        let (client_b, conn_b) = auth.next_connection();
        assert_eq!(client_a, client_b);
        assert_eq!(conn_b, conn_a + 1);
    }

    #[test]
    fn rollover_mints_a_fresh_identity() {
        let auth = AuthData::default();
        let (old_client, _) = auth.next_connection();
        auth.0.lock().unwrap().connection_id = CONNECTION_ID_ROLLOVER + 1;
        let (new_client, conn) = auth.next_connection();
        // A 4-byte collision is possible but vanishingly unlikely.
        assert_ne!(old_client, new_client);
        assert!(conn < CONNECTION_ID_RANGE);
    }

    #[test]
    fn concurrent_connections_get_distinct_counters() {
        let auth = Arc::new(AuthData::default());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let auth = auth.clone();
            handles.push(thread::spawn(move || {
                (0..64).map(|_| auth.next_connection().1).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "connection id {} repeated", id);
            }
        }
    }
}
