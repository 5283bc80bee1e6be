use axum::Router;
use chrono::Duration;
use std::sync::Arc;

use bank_sessions::{
    router,
    session::generators::{ManualClock, SequentialSessionIdGenerator},
    AppState, InMemorySessionStore, SessionConfig, SessionManager, SigningKey, TokenIssuer,
};

pub const RSA_KEY: &str = include_str!("../fixtures/rsa_pkcs8.pem");
#[allow(dead_code)]
pub const EC_KEY: &str = include_str!("../fixtures/ec_pkcs8.pem");

pub const APPLICATION_ID: &str = "test-application";
pub const AUDIENCE: &str = "https://api.enablebanking.com";

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub struct TestSetup {
    pub manager: Arc<SessionManager>,
    pub store: Arc<InMemorySessionStore>,
    pub clock: Arc<ManualClock>,
    pub issuer: TokenIssuer,
}

#[allow(dead_code)]
impl TestSetup {
    /// HTTP router over the same manager
    pub fn app(&self) -> Router {
        router(AppState::new(Arc::clone(&self.manager)))
    }

    /// Moves the manual clock to an absolute Unix time
    pub fn set_time(&self, unix_seconds: i64) {
        self.clock.set(unix_seconds);
    }
}

pub struct TestSetupBuilder {
    key_pem: &'static str,
    start_time: i64,
    ttl_secs: i64,
    refresh_margin_secs: i64,
    id_prefix: Option<String>,
}

#[allow(dead_code)]
impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            key_pem: RSA_KEY,
            start_time: 1000,
            ttl_secs: 600,
            refresh_margin_secs: 60,
            id_prefix: None,
        }
    }

    pub fn with_key(mut self, pem: &'static str) -> Self {
        self.key_pem = pem;
        self
    }

    pub fn with_start_time(mut self, unix_seconds: i64) -> Self {
        self.start_time = unix_seconds;
        self
    }

    pub fn with_ttl(mut self, seconds: i64) -> Self {
        self.ttl_secs = seconds;
        self
    }

    pub fn with_refresh_margin(mut self, seconds: i64) -> Self {
        self.refresh_margin_secs = seconds;
        self
    }

    /// Session ids become `prefix-1`, `prefix-2`, ... instead of UUIDs
    pub fn with_sequential_ids(mut self, prefix: &str) -> Self {
        self.id_prefix = Some(prefix.to_string());
        self
    }

    pub fn build(self) -> TestSetup {
        let key = Arc::new(SigningKey::from_pem(self.key_pem.as_bytes()).unwrap());
        let issuer = TokenIssuer::new(key, APPLICATION_ID, AUDIENCE);
        let store = Arc::new(InMemorySessionStore::new());
        let clock = Arc::new(ManualClock::at(self.start_time));

        let config = SessionConfig {
            ttl: Duration::seconds(self.ttl_secs),
            refresh_margin: Duration::seconds(self.refresh_margin_secs),
        };

        let mut manager =
            SessionManager::new(store.clone(), issuer.clone(), config).with_clock(clock.clone());
        if let Some(prefix) = self.id_prefix {
            manager = manager.with_id_generator(Arc::new(SequentialSessionIdGenerator::new(prefix)));
        }

        TestSetup {
            manager: Arc::new(manager),
            store,
            clock,
            issuer,
        }
    }
}

impl Default for TestSetupBuilder {
    fn default() -> Self {
        Self::new()
    }
}
