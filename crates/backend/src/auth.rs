//! Process-wide authentication state
//!
//! Written only by the heartbeat loop when a refresh succeeds, read by every
//! backend call site. Readers take a consistent snapshot per call.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::info;

/// Token together with the moment it was issued or last refreshed
#[derive(Debug, Clone)]
pub struct AuthSnapshot {
    pub token: String,
    pub refreshed_at: Instant,
}

/// Lock-guarded auth token holder
#[derive(Debug)]
pub struct AuthState {
    inner: RwLock<AuthSnapshot>,
}

impl AuthState {
    /// Create auth state for a token issued now
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(AuthSnapshot {
                token: token.into(),
                refreshed_at: Instant::now(),
            }),
        }
    }

    /// Current token
    pub fn token(&self) -> String {
        self.inner.read().token.clone()
    }

    /// Consistent copy of token and refresh time
    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.read().clone()
    }

    /// Time since the token was issued or refreshed
    pub fn age(&self) -> Duration {
        self.inner.read().refreshed_at.elapsed()
    }

    /// Returns true if the token is older than `threshold`
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age() > threshold
    }

    /// Replace the token and reset the refresh timestamp
    pub fn replace(&self, token: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.token = token.into();
        inner.refreshed_at = Instant::now();
        info!("Auth token refreshed");
    }
}

/// Thread-safe handle to the auth state
pub type AuthStateHandle = Arc<AuthState>;
