use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Header, Validation};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::keys::SigningKey;
use super::types::SessionClaims;
use crate::shared::AppError;

/// Signs and verifies session tokens with a loaded key
#[derive(Clone, Debug)]
pub struct TokenIssuer {
    key: Arc<SigningKey>,
    issuer: String,
    audience: String,
}

impl TokenIssuer {
    pub fn new(key: Arc<SigningKey>, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            key,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    /// Builds the claim set for one session
    pub fn claims_for(
        &self,
        session_id: &str,
        client_id: &str,
        bank_id: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> SessionClaims {
        SessionClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: client_fingerprint(client_id),
            session_id: session_id.to_string(),
            bank_id: bank_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        }
    }

    /// Encodes and signs the claims
    #[instrument(skip(self, claims), fields(session_id = %claims.session_id))]
    pub fn issue(&self, claims: &SessionClaims) -> Result<String, AppError> {
        debug!(
            algorithm = %self.key.algorithm(),
            exp_timestamp = claims.exp,
            "Signing session token"
        );

        // The banking API picks the verification key by application id
        let mut header = Header::new(self.key.algorithm().jwt_algorithm());
        header.kid = Some(self.issuer.clone());

        encode(&header, claims, self.key.encoding_key())
        .map_err(|e| {
            debug!(error = %e, "Failed to encode JWT token");
            AppError::Signing(e.to_string())
        })
    }

    /// Checks signature, issuer and audience, then strict expiry against `now`
    #[instrument(skip(self, token))]
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, AppError> {
        let mut validation = Validation::new(self.key.algorithm().jwt_algorithm());
        // Expiry is checked below against the caller's clock, not the library's.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let claims = decode::<SessionClaims>(token, self.key.decoding_key(), &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Failed to decode JWT token");
                AppError::InvalidToken(rejection_reason(e.kind()).to_string())
            })?;

        let now_secs = now.timestamp();
        if now_secs >= claims.exp {
            debug!(exp = claims.exp, now = now_secs, "JWT token has expired");
            return Err(AppError::InvalidToken("token has expired".to_string()));
        }
        if now_secs < claims.iat {
            debug!(iat = claims.iat, now = now_secs, "JWT token used before issuance");
            return Err(AppError::InvalidToken("token is not yet valid".to_string()));
        }

        debug!(
            session_id = %claims.session_id,
            bank_id = %claims.bank_id,
            exp = claims.exp,
            "JWT token verified"
        );
        Ok(claims)
    }
}

fn rejection_reason(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidSignature => "bad signature",
        ErrorKind::InvalidAlgorithm => "unexpected signing algorithm",
        ErrorKind::InvalidIssuer => "unexpected issuer",
        ErrorKind::InvalidAudience => "unexpected audience",
        ErrorKind::MissingRequiredClaim(_) => "missing required claim",
        _ => "malformed token",
    }
}

/// Short SHA-256 fingerprint of a client id, so tokens never carry the raw identifier
pub fn client_fingerprint(client_id: &str) -> String {
    let digest = hex::encode(Sha256::digest(client_id.as_bytes()));
    digest[..16].to_string()
}
