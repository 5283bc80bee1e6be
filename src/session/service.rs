use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{
    creator::SessionCreator,
    generators::{Clock, SessionIdGenerator, SystemClock, UuidSessionIdGenerator},
    repository::SessionStore,
    token::{client_fingerprint, TokenIssuer},
    types::{ActiveSession, SessionClaims, SessionResponse, SessionStats, SessionView, TokenResponse},
};
use crate::shared::{mask_sensitive, AppError};

/// Session lifetime settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a session and its token stay valid
    pub ttl: Duration,
    /// Sessions with less than this left are refreshed by `ensure_fresh`
    pub refresh_margin: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(1),
            refresh_margin: Duration::minutes(5),
        }
    }
}

/// Issues, refreshes, revokes and answers questions about bank-connection sessions.
///
/// Holds no session state of its own; every read goes to the store.
pub struct SessionManager {
    creator: SessionCreator,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, token_issuer: TokenIssuer, config: SessionConfig) -> Self {
        Self {
            creator: SessionCreator::new(Arc::new(UuidSessionIdGenerator::new()), token_issuer, config.ttl),
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn SessionIdGenerator>) -> Self {
        let token_issuer = self.creator.token_issuer().clone();
        self.creator = SessionCreator::new(id_generator, token_issuer, self.config.ttl);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Creates a session for the pair, superseding any current one
    #[instrument(skip(self, client_id), fields(client = %client_fingerprint(client_id)))]
    pub fn authenticate(&self, client_id: &str, bank_id: &str) -> Result<SessionResponse, AppError> {
        if client_id.trim().is_empty() || bank_id.trim().is_empty() {
            return Err(AppError::BadRequest(
                "client_id and bank_id must not be empty".to_string(),
            ));
        }

        let record = self.creator.create_record(client_id, bank_id, self.clock.now())?;
        let response = SessionResponse {
            session_id: record.session_id.clone(),
            bank_id: record.bank_id.clone(),
            expires_at: record.expires_at,
        };

        match self.store.put(record)? {
            Some(superseded) => info!(
                session_id = %response.session_id,
                superseded = %superseded,
                "Session created, previous session revoked"
            ),
            None => info!(session_id = %response.session_id, "Session created"),
        }

        Ok(response)
    }

    /// Returns the session's token while the session is active
    #[instrument(skip(self))]
    pub fn get_active_token(&self, session_id: &str) -> Result<TokenResponse, AppError> {
        let record = self
            .store
            .get(session_id)?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        let now = self.clock.now();
        if !record.is_active(now) {
            debug!(status = %record.effective_status(now), "Session is not active");
            return Err(AppError::SessionExpired(session_id.to_string()));
        }

        debug!(token = %mask_sensitive(&record.token), "Returning active token");
        Ok(TokenResponse {
            token: record.token,
            expires_at: record.expires_at,
        })
    }

    /// Replaces an active session with a new one for the same pair.
    ///
    /// The input session is revoked; callers must switch to the returned id.
    #[instrument(skip(self))]
    pub fn refresh(&self, session_id: &str) -> Result<SessionResponse, AppError> {
        let record = self
            .store
            .get(session_id)?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        let now = self.clock.now();
        if !record.is_active(now) {
            warn!(status = %record.effective_status(now), "Refusing to refresh inactive session");
            return Err(AppError::SessionExpired(session_id.to_string()));
        }

        let replacement = self
            .creator
            .create_record(&record.client_id, &record.bank_id, now)?;
        let response = SessionResponse {
            session_id: replacement.session_id.clone(),
            bank_id: replacement.bank_id.clone(),
            expires_at: replacement.expires_at,
        };

        self.store.replace(session_id, replacement)?;

        info!(new_session_id = %response.session_id, "Session refreshed");
        Ok(response)
    }

    /// Returns the session unchanged if it has more than the refresh margin left,
    /// otherwise refreshes it
    #[instrument(skip(self))]
    pub fn ensure_fresh(&self, session_id: &str) -> Result<SessionResponse, AppError> {
        let record = self
            .store
            .get(session_id)?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        let now = self.clock.now();
        if !record.is_active(now) {
            return Err(AppError::SessionExpired(session_id.to_string()));
        }

        if record.expires_at - now > self.config.refresh_margin {
            debug!(expires_at = %record.expires_at, "Session is fresh");
            return Ok(SessionResponse {
                session_id: record.session_id,
                bank_id: record.bank_id,
                expires_at: record.expires_at,
            });
        }

        info!(expires_at = %record.expires_at, "Session close to expiry, refreshing");
        self.refresh(session_id)
    }

    /// Revokes the session. Absent or already terminal sessions are not an error.
    #[instrument(skip(self))]
    pub fn revoke(&self, session_id: &str) -> Result<(), AppError> {
        if self.store.revoke(session_id, self.clock.now())? {
            info!("Session revoked");
        } else {
            debug!("Session absent or already inactive, nothing to revoke");
        }
        Ok(())
    }

    /// Active sessions for the client, one per bank connection.
    ///
    /// Computed fresh on every call; records are read as the iterator advances.
    #[instrument(skip(self, client_id))]
    pub fn list_active(
        &self,
        client_id: &str,
    ) -> Result<impl Iterator<Item = ActiveSession> + '_, AppError> {
        let now = self.clock.now();
        let session_ids = self.store.current_sessions(client_id)?;

        Ok(session_ids
            .into_iter()
            .filter_map(move |session_id| match self.store.get(&session_id) {
                Ok(Some(record)) if record.is_active(now) => Some(ActiveSession {
                    bank_id: record.bank_id,
                    session_id: record.session_id,
                    expires_at: record.expires_at,
                }),
                Ok(_) => None,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Skipping unreadable session");
                    None
                }
            }))
    }

    /// Sessions held against one bank, newest first.
    ///
    /// Terminal sessions still in the store are included only when `include_inactive` is set.
    #[instrument(skip(self))]
    pub fn list_by_bank(
        &self,
        bank_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<SessionView>, AppError> {
        let now = self.clock.now();

        let mut sessions: Vec<SessionView> = self
            .store
            .sessions_for_bank(bank_id)?
            .into_iter()
            .filter(|record| include_inactive || record.is_active(now))
            .map(|record| record.view(now))
            .collect();
        sessions.sort_by(|a, b| {
            b.issued_at
                .cmp(&a.issued_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });

        debug!(count = sessions.len(), "Listed sessions for bank");
        Ok(sessions)
    }

    /// Verifies a token and checks that its session is still active.
    ///
    /// Answers which bank connection the bearer of the token is allowed to use.
    #[instrument(skip(self, token))]
    pub fn validate(&self, token: &str) -> Result<SessionClaims, AppError> {
        let now = self.clock.now();
        let claims = self.creator.token_issuer().verify(token, now)?;

        let record = self
            .store
            .get(&claims.session_id)?
            .ok_or_else(|| AppError::InvalidToken("unknown session".to_string()))?;

        if !record.is_active(now) {
            warn!(session_id = %claims.session_id, "Token belongs to an inactive session");
            return Err(AppError::SessionExpired(claims.session_id));
        }

        debug!(session_id = %claims.session_id, bank_id = %claims.bank_id, "Token validated");
        Ok(claims)
    }

    /// Inspection view of one session
    #[instrument(skip(self))]
    pub fn session(&self, session_id: &str) -> Result<SessionView, AppError> {
        self.store
            .get(session_id)?
            .map(|record| record.view(self.clock.now()))
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))
    }

    #[instrument(skip(self))]
    pub fn stats(&self) -> Result<SessionStats, AppError> {
        self.store.stats(self.clock.now())
    }

    /// Evicts records that have been terminal for at least `grace_period`
    #[instrument(skip(self))]
    pub fn sweep(&self, grace_period: Duration) -> Result<usize, AppError> {
        self.store.sweep(self.clock.now(), grace_period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::generators::{ManualClock, SequentialSessionIdGenerator};
    use crate::session::keys::{test_keys::RSA_PKCS8, SigningKey};
    use crate::session::models::SessionStatus;
    use crate::session::repository::InMemorySessionStore;
    use rstest::rstest;

    struct Fixture {
        manager: SessionManager,
        clock: Arc<ManualClock>,
        store: Arc<InMemorySessionStore>,
    }

    fn create_test_manager() -> Fixture {
        let key = Arc::new(SigningKey::from_pem(RSA_PKCS8.as_bytes()).unwrap());
        let issuer = TokenIssuer::new(key, "app-123", "https://api.enablebanking.com");
        let store = Arc::new(InMemorySessionStore::new());
        let clock = Arc::new(ManualClock::at(1000));
        let config = SessionConfig {
            ttl: Duration::seconds(600),
            refresh_margin: Duration::seconds(60),
        };

        let manager = SessionManager::new(store.clone(), issuer, config)
            .with_clock(clock.clone())
            .with_id_generator(Arc::new(SequentialSessionIdGenerator::new("session")));

        Fixture {
            manager,
            clock,
            store,
        }
    }

    #[test]
    fn test_authenticate_creates_active_session() {
        let fx = create_test_manager();

        let session = fx.manager.authenticate("clientA", "bankX").unwrap();

        assert_eq!(session.session_id, "session-1");
        assert_eq!(session.bank_id, "bankX");
        assert_eq!(session.expires_at.timestamp(), 1600);
        assert_eq!(
            fx.manager.session("session-1").unwrap().status,
            SessionStatus::Active
        );
    }

    #[rstest]
    #[case("", "bankX")]
    #[case("clientA", "")]
    #[case("   ", "bankX")]
    fn test_authenticate_rejects_empty_identifiers(#[case] client: &str, #[case] bank: &str) {
        let fx = create_test_manager();
        let result = fx.manager.authenticate(client, bank);
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(fx.store.session_count(), 0);
    }

    #[rstest]
    #[case(1000, true)]
    #[case(1599, true)]
    #[case(1600, false)]
    #[case(1601, false)]
    fn test_get_active_token_expiry_boundary(#[case] now: i64, #[case] active: bool) {
        let fx = create_test_manager();
        let session = fx.manager.authenticate("clientA", "bankX").unwrap();

        fx.clock.set(now);
        let result = fx.manager.get_active_token(&session.session_id);

        if active {
            let token = result.unwrap();
            assert_eq!(token.expires_at.timestamp(), 1600);
        } else {
            assert!(matches!(result, Err(AppError::SessionExpired(_))));
        }
    }

    #[test]
    fn test_get_active_token_unknown_session() {
        let fx = create_test_manager();
        let result = fx.manager.get_active_token("does-not-exist");
        assert!(matches!(result, Err(AppError::SessionNotFound(_))));
    }

    #[test]
    fn test_refresh_returns_new_session_and_retires_old() {
        let fx = create_test_manager();
        let original = fx.manager.authenticate("clientA", "bankX").unwrap();

        fx.clock.set(1300);
        let refreshed = fx.manager.refresh(&original.session_id).unwrap();

        assert_ne!(refreshed.session_id, original.session_id);
        assert_eq!(refreshed.bank_id, "bankX");
        assert_eq!(refreshed.expires_at.timestamp(), 1900);

        assert!(matches!(
            fx.manager.get_active_token(&original.session_id),
            Err(AppError::SessionExpired(_))
        ));
        assert!(fx.manager.get_active_token(&refreshed.session_id).is_ok());

        // The old id cannot be refreshed a second time
        assert!(matches!(
            fx.manager.refresh(&original.session_id),
            Err(AppError::SessionExpired(_))
        ));
    }

    #[test]
    fn test_refresh_expired_session_fails() {
        let fx = create_test_manager();
        let session = fx.manager.authenticate("clientA", "bankX").unwrap();

        fx.clock.set(1600);
        assert!(matches!(
            fx.manager.refresh(&session.session_id),
            Err(AppError::SessionExpired(_))
        ));
        assert!(matches!(
            fx.manager.refresh("missing"),
            Err(AppError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_ensure_fresh_only_refreshes_near_expiry() {
        let fx = create_test_manager();
        let session = fx.manager.authenticate("clientA", "bankX").unwrap();

        fx.clock.set(1500);
        let same = fx.manager.ensure_fresh(&session.session_id).unwrap();
        assert_eq!(same.session_id, session.session_id);

        fx.clock.set(1545);
        let renewed = fx.manager.ensure_fresh(&session.session_id).unwrap();
        assert_ne!(renewed.session_id, session.session_id);
        assert_eq!(renewed.expires_at.timestamp(), 2145);
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let fx = create_test_manager();
        let session = fx.manager.authenticate("clientA", "bankX").unwrap();

        fx.manager.revoke(&session.session_id).unwrap();
        fx.manager.revoke(&session.session_id).unwrap();
        fx.manager.revoke("never-existed").unwrap();

        assert_eq!(
            fx.manager.session(&session.session_id).unwrap().status,
            SessionStatus::Revoked
        );
        assert!(matches!(
            fx.manager.get_active_token(&session.session_id),
            Err(AppError::SessionExpired(_))
        ));
    }

    #[test]
    fn test_list_active_is_fresh_per_call() {
        let fx = create_test_manager();
        fx.manager.authenticate("clientA", "bankX").unwrap();
        fx.manager.authenticate("clientA", "bankY").unwrap();
        fx.manager.authenticate("clientB", "bankX").unwrap();

        let mut banks: Vec<String> = fx
            .manager
            .list_active("clientA")
            .unwrap()
            .map(|s| s.bank_id)
            .collect();
        banks.sort();
        assert_eq!(banks, vec!["bankX".to_string(), "bankY".to_string()]);

        fx.manager.revoke("session-2").unwrap();
        let remaining: Vec<ActiveSession> = fx.manager.list_active("clientA").unwrap().collect();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id, "session-1");

        fx.clock.set(1600);
        assert_eq!(fx.manager.list_active("clientA").unwrap().count(), 0);
    }

    #[test]
    fn test_validate_token() {
        let fx = create_test_manager();
        let session = fx.manager.authenticate("clientA", "bankX").unwrap();
        let token = fx.manager.get_active_token(&session.session_id).unwrap().token;

        let claims = fx.manager.validate(&token).unwrap();
        assert_eq!(claims.session_id, session.session_id);
        assert_eq!(claims.bank_id, "bankX");

        fx.manager.revoke(&session.session_id).unwrap();
        assert!(matches!(
            fx.manager.validate(&token),
            Err(AppError::SessionExpired(_))
        ));
        assert!(matches!(
            fx.manager.validate("garbage"),
            Err(AppError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_list_by_bank() {
        let fx = create_test_manager();
        fx.manager.authenticate("clientA", "bankX").unwrap();
        fx.clock.set(1010);
        fx.manager.authenticate("clientA", "bankX").unwrap();
        fx.manager.authenticate("clientB", "bankX").unwrap();
        fx.manager.authenticate("clientB", "bankY").unwrap();

        let active: Vec<String> = fx
            .manager
            .list_by_bank("bankX", false)
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(active, vec!["session-2", "session-3"]);

        let all = fx.manager.list_by_bank("bankX", true).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].session_id, "session-1");
        assert_eq!(all[2].status, SessionStatus::Revoked);

        fx.clock.set(1700);
        assert!(fx.manager.list_by_bank("bankX", false).unwrap().is_empty());
        assert!(fx
            .manager
            .list_by_bank("bankX", true)
            .unwrap()
            .iter()
            .all(|s| s.status != SessionStatus::Active));
    }

    /// Second manager on the same store whose ids restart at `session-1`
    fn colliding_manager(fx: &Fixture) -> SessionManager {
        let key = Arc::new(SigningKey::from_pem(RSA_PKCS8.as_bytes()).unwrap());
        let issuer = TokenIssuer::new(key, "app-123", "https://api.enablebanking.com");
        SessionManager::new(fx.store.clone(), issuer, fx.manager.config().clone())
            .with_clock(fx.clock.clone())
            .with_id_generator(Arc::new(SequentialSessionIdGenerator::new("session")))
    }

    #[test]
    fn test_failed_authenticate_leaves_no_partial_state() {
        let fx = create_test_manager();
        let original = fx.manager.authenticate("clientA", "bankX").unwrap();

        let result = colliding_manager(&fx).authenticate("clientA", "bankX");
        assert!(matches!(result, Err(AppError::Internal)));

        assert_eq!(fx.store.session_count(), 1);
        let current = fx
            .store
            .get_current("clientA", "bankX", fx.clock.now())
            .unwrap()
            .unwrap();
        assert_eq!(current.session_id, original.session_id);
        assert_eq!(
            fx.manager.session(&original.session_id).unwrap().status,
            SessionStatus::Active
        );
    }

    #[test]
    fn test_failed_refresh_leaves_no_partial_state() {
        let fx = create_test_manager();
        fx.manager.authenticate("clientA", "bankX").unwrap();
        let target = fx.manager.authenticate("clientA", "bankY").unwrap();
        assert_eq!(target.session_id, "session-2");

        // The colliding manager's first id is taken, so its replacement cannot be stored
        let result = colliding_manager(&fx).refresh(&target.session_id);
        assert!(matches!(result, Err(AppError::Internal)));

        assert_eq!(fx.store.session_count(), 2);
        let current = fx
            .store
            .get_current("clientA", "bankY", fx.clock.now())
            .unwrap()
            .unwrap();
        assert_eq!(current.session_id, target.session_id);
        assert!(fx.manager.get_active_token(&target.session_id).is_ok());
        assert_eq!(
            fx.manager.session("session-1").unwrap().status,
            SessionStatus::Active
        );
    }

    #[test]
    fn test_authenticate_with_out_of_range_ttl_fails_cleanly() {
        let fx = create_test_manager();
        let key = Arc::new(SigningKey::from_pem(RSA_PKCS8.as_bytes()).unwrap());
        let issuer = TokenIssuer::new(key, "app-123", "https://api.enablebanking.com");
        let config = SessionConfig {
            ttl: Duration::seconds(9_000_000_000_000),
            refresh_margin: Duration::seconds(60),
        };
        let manager =
            SessionManager::new(fx.store.clone(), issuer, config).with_clock(fx.clock.clone());

        assert!(matches!(
            manager.authenticate("clientA", "bankX"),
            Err(AppError::Authentication(_))
        ));
        assert_eq!(fx.store.session_count(), 0);
    }

    #[test]
    fn test_sweep_and_stats() {
        let fx = create_test_manager();
        let first = fx.manager.authenticate("clientA", "bankX").unwrap();
        fx.manager.authenticate("clientA", "bankX").unwrap();

        let stats = fx.manager.stats().unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.revoked_sessions, 1);

        assert_eq!(fx.manager.sweep(Duration::zero()).unwrap(), 1);
        assert!(matches!(
            fx.manager.session(&first.session_id),
            Err(AppError::SessionNotFound(_))
        ));
        assert_eq!(fx.manager.stats().unwrap().total_sessions, 1);
    }
}
