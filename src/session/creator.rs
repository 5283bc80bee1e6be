use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::{generators::SessionIdGenerator, models::SessionRecord, token::TokenIssuer};
use crate::shared::AppError;

/// Builds fully signed session records without publishing them.
///
/// Nothing is written anywhere until the caller stores the returned record, so a failure
/// here leaves no trace.
pub struct SessionCreator {
    id_generator: Arc<dyn SessionIdGenerator>,
    token_issuer: TokenIssuer,
    ttl: Duration,
}

impl SessionCreator {
    pub fn new(
        id_generator: Arc<dyn SessionIdGenerator>,
        token_issuer: TokenIssuer,
        ttl: Duration,
    ) -> Self {
        Self {
            id_generator,
            token_issuer,
            ttl,
        }
    }

    pub fn token_issuer(&self) -> &TokenIssuer {
        &self.token_issuer
    }

    /// Creates an active record for the pair, valid from `now` for the configured TTL
    #[instrument(skip(self, client_id))]
    pub fn create_record(
        &self,
        client_id: &str,
        bank_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, AppError> {
        // Step 1: Generate session id
        let session_id = self.id_generator.generate();

        // Step 2: Compute validity window on whole seconds so the record matches the token
        let issued_at = now.trunc_subsecs(0);
        let expires_at = issued_at.checked_add_signed(self.ttl).ok_or_else(|| {
            warn!(ttl_secs = self.ttl.num_seconds(), "Session lifetime overflows the calendar");
            AppError::Authentication("session lifetime is out of range".to_string())
        })?;
        debug!(session_id = %session_id, %expires_at, "Computed session validity window");

        // Step 3: Sign token
        let claims = self
            .token_issuer
            .claims_for(&session_id, client_id, bank_id, issued_at, expires_at);
        let token = self.token_issuer.issue(&claims).map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Could not sign session token");
            AppError::Authentication(e.to_string())
        })?;

        // Step 4: Assemble record
        Ok(SessionRecord::new(
            session_id,
            client_id.to_string(),
            bank_id.to_string(),
            token,
            issued_at,
            expires_at,
        ))
    }
}
