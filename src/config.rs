use chrono::Duration as ChronoDuration;
use std::{env, fmt, path::PathBuf, time::Duration};
use tracing::{debug, warn};

use crate::session::{SessionConfig, SigningKey, SweepConfig, TokenIssuer};
use crate::shared::AppError;

const DEFAULT_KEY_PATH: &str = "./keys/private_key.pem";
const DEFAULT_BASE_URL: &str = "https://api.enablebanking.com";
/// Upper bound for any configured duration, about 68 years
const MAX_DURATION_SECS: u64 = i32::MAX as u64;

/// Where the signing key comes from
#[derive(Clone)]
pub enum KeySource {
    /// PEM text held in the environment
    Inline(String),
    File(PathBuf),
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Inline(_) => f.write_str("Inline(<redacted>)"),
            KeySource::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Password for an encrypted private key
#[derive(Clone)]
pub struct KeyPassword(String);

impl KeyPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for KeyPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyPassword(<redacted>)")
    }
}

/// The service's configuration, read once at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub key_source: KeySource,
    /// Set when the private key is an encrypted PKCS#8 PEM
    pub key_password: Option<KeyPassword>,
    /// Enable Banking application id, used as the token issuer
    pub application_id: String,
    /// Banking API base URL, used as the token audience
    pub base_url: String,
    pub session: SessionConfig,
    pub sweep: SweepConfig,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    /// Reads the configuration from the process environment, after loading `.env` if present
    pub fn from_env() -> Result<Self, AppError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(error = %e, "Could not load .env file");
            }
        }

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let key_source = match non_empty("ENABLE_BANKING_PRIVATE_KEY") {
            Some(pem) => KeySource::Inline(pem),
            None => KeySource::File(PathBuf::from(
                non_empty("ENABLE_BANKING_PRIVATE_KEY_PATH")
                    .unwrap_or_else(|| DEFAULT_KEY_PATH.to_string()),
            )),
        };

        let key_password = lookup("ENABLE_BANKING_PRIVATE_KEY_PASSWORD")
            .filter(|v| !v.is_empty())
            .map(KeyPassword::new);

        let application_id = non_empty("ENABLE_BANKING_APPLICATION_ID").ok_or_else(|| {
            AppError::Config("ENABLE_BANKING_APPLICATION_ID must be set".to_string())
        })?;
        let base_url =
            non_empty("ENABLE_BANKING_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let ttl_secs = parse_var(&non_empty, "SESSION_TTL_SECS", 3600u64)?;
        let refresh_margin_secs = parse_var(&non_empty, "SESSION_REFRESH_MARGIN_SECS", 300u64)?;
        let sweep_interval_secs = parse_var(&non_empty, "SESSION_SWEEP_INTERVAL_SECS", 300u64)?;
        let sweep_grace_secs = parse_var(&non_empty, "SESSION_SWEEP_GRACE_SECS", 600u64)?;

        if ttl_secs == 0 {
            return Err(AppError::Config(
                "SESSION_TTL_SECS must be greater than zero".to_string(),
            ));
        }
        if sweep_interval_secs == 0 || sweep_interval_secs > MAX_DURATION_SECS {
            return Err(AppError::Config(format!(
                "SESSION_SWEEP_INTERVAL_SECS must be between 1 and {} seconds",
                MAX_DURATION_SECS
            )));
        }
        if refresh_margin_secs >= ttl_secs {
            return Err(AppError::Config(
                "SESSION_REFRESH_MARGIN_SECS must be less than SESSION_TTL_SECS".to_string(),
            ));
        }

        let host = non_empty("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_var(&non_empty, "API_PORT", 8080u16)?;

        let config = Self {
            key_source,
            key_password,
            application_id,
            base_url,
            session: SessionConfig {
                ttl: seconds(ttl_secs, "SESSION_TTL_SECS")?,
                refresh_margin: seconds(refresh_margin_secs, "SESSION_REFRESH_MARGIN_SECS")?,
            },
            sweep: SweepConfig {
                interval: Duration::from_secs(sweep_interval_secs),
                grace_period: seconds(sweep_grace_secs, "SESSION_SWEEP_GRACE_SECS")?,
            },
            host,
            port,
        };

        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Loads the signing key from the configured source
    pub fn load_signing_key(&self) -> Result<SigningKey, AppError> {
        match (&self.key_source, &self.key_password) {
            (KeySource::Inline(pem), None) => SigningKey::from_pem(pem.as_bytes()),
            (KeySource::Inline(pem), Some(password)) => {
                SigningKey::from_encrypted_pem(pem.as_bytes(), password.as_bytes())
            }
            (KeySource::File(path), None) => SigningKey::from_file(path),
            (KeySource::File(path), Some(password)) => {
                SigningKey::from_encrypted_file(path, password.as_bytes())
            }
        }
    }

    /// Token issuer for the configured application and audience
    pub fn token_issuer(&self) -> Result<TokenIssuer, AppError> {
        let key = self.load_signing_key()?;
        Ok(TokenIssuer::new(
            std::sync::Arc::new(key),
            self.application_id.clone(),
            self.base_url.clone(),
        ))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} is not a valid number: {:?}", name, raw))),
        None => Ok(default),
    }
}

fn seconds(secs: u64, name: &str) -> Result<ChronoDuration, AppError> {
    if secs > MAX_DURATION_SECS {
        return Err(AppError::Config(format!(
            "{} must be at most {} seconds",
            name, MAX_DURATION_SECS
        )));
    }

    i64::try_from(secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .ok_or_else(|| AppError::Config(format!("{} is too large", name)))
}
