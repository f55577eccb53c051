use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;

/// Bearer token obtained through `/auth`.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: String,
    pub issued_at: SystemTime,
}

/// Process-wide holder for the current session. Expiry is left to upstream.
#[derive(Default)]
pub struct SessionStore {
    current: ArcSwapOption<AuthSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, access_token: String) {
        info!("Stored new upstream access token");
        self.current.store(Some(Arc::new(AuthSession {
            access_token,
            issued_at: SystemTime::now(),
        })));
    }

    pub fn current(&self) -> Option<Arc<AuthSession>> {
        self.current.load_full()
    }

    pub fn token(&self) -> Option<String> {
        self.current
            .load_full()
            .map(|session| session.access_token.clone())
    }
}
