//! Per-client session state and credential verification.
//!
//! Every WebSocket connection gets a `StreamClient` entry in the global
//! session store for its lifetime. Only `Authenticated` sessions receive
//! binary frame pushes; a failed credential check keeps the session
//! retryable, it is never ejected.

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use base64::Engine as _;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use hashbrown::HashMap;
use lazy_static::lazy_static;

/// Authentication state of one stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    Closed,
}

/// One connected stream viewer.
#[derive(Debug, Clone)]
pub struct StreamClient {
    pub id: u32,
    pub auth: AuthState,
    /// Sequence number of the last frame delivered to this client.
    pub last_seq: u32,
}

lazy_static! {
    pub static ref SESSION_STORE: Mutex<CriticalSectionRawMutex, HashMap<u32, StreamClient>> =
        Mutex::new(HashMap::new());
}

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

pub struct SessionManager;

impl SessionManager {
    /// Register a new session in `Unauthenticated` state and return its id.
    pub async fn connect() -> u32 {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        SESSION_STORE.lock().await.insert(
            id,
            StreamClient {
                id,
                auth: AuthState::Unauthenticated,
                last_seq: 0,
            },
        );
        id
    }

    /// Record a credential check result for the session.
    ///
    /// A granted check moves the session to `Authenticated`; a failed one
    /// returns it to `Unauthenticated`, leaving it free to retry.
    pub async fn authenticate(
        id: u32,
        granted: bool,
    ) -> AuthState {
        let mut store = SESSION_STORE.lock().await;
        match store.get_mut(&id) {
            Some(client) => {
                client.auth = if granted {
                    AuthState::Authenticated
                } else {
                    AuthState::Unauthenticated
                };
                client.auth
            }
            None => AuthState::Closed,
        }
    }

    pub async fn is_authenticated(id: u32) -> bool {
        SESSION_STORE
            .lock()
            .await
            .get(&id)
            .map(|client| client.auth == AuthState::Authenticated)
            .unwrap_or(false)
    }

    /// Note a completed frame delivery to the session.
    pub async fn record_delivery(
        id: u32,
        seq: u32,
    ) {
        if let Some(client) = SESSION_STORE.lock().await.get_mut(&id) {
            client.last_seq = seq;
        }
    }

    /// Remove the session, returning its final record in `Closed` state.
    pub async fn disconnect(id: u32) -> Option<StreamClient> {
        SESSION_STORE.lock().await.remove(&id).map(|mut client| {
            client.auth = AuthState::Closed;
            client
        })
    }

    /// Retrieve a copy of the session record, if it is still connected.
    pub async fn client(id: u32) -> Option<StreamClient> {
        SESSION_STORE.lock().await.get(&id).cloned()
    }

    /// Returns the ids of all connected sessions.
    pub async fn list_sessions() -> Vec<u32> {
        SESSION_STORE.lock().await.keys().copied().collect()
    }
}

/// Pluggable credential check used by the WebSocket AUTH handshake and the
/// optional HTTP gate on `/move`.
pub trait Authenticator {
    fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> bool;
}

/// Literal equality check against configured credential strings.
///
/// No hashing, constant-time comparison, or rate limiting; a hardened
/// implementation can be substituted behind the same trait.
pub struct StaticCredentials {
    pub username: &'static str,
    pub password: &'static str,
}

impl Authenticator for StaticCredentials {
    fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> bool {
        username == self.username && password == self.password
    }
}

pub const AUTH_OK: &str = "AUTH_OK";
pub const AUTH_FAILED: &str = "AUTH_FAILED";

/// Split an `AUTH:<username>:<password>` control message into credentials.
pub fn parse_auth_message(message: &str) -> Option<(&str, &str)> {
    message.strip_prefix("AUTH:")?.split_once(':')
}

/// Check an HTTP `Authorization: Basic <base64>` header value.
pub fn verify_basic(
    authenticator: &dyn Authenticator,
    header: &str,
) -> bool {
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(text) = core::str::from_utf8(&decoded) else {
        return false;
    };
    let Some((username, password)) = text.split_once(':') else {
        return false;
    };
    authenticator.verify(username, password)
}
