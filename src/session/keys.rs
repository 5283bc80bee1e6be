use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use std::fmt;
use std::path::Path;
use strum_macros::{Display, EnumString};
use tracing::{debug, instrument, warn};

use crate::shared::AppError;

/// Signature algorithms supported for session tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum KeyAlgorithm {
    #[strum(serialize = "RS256")]
    Rs256,
    #[strum(serialize = "ES256")]
    Es256,
}

impl KeyAlgorithm {
    pub fn jwt_algorithm(self) -> Algorithm {
        match self {
            KeyAlgorithm::Rs256 => Algorithm::RS256,
            KeyAlgorithm::Es256 => Algorithm::ES256,
        }
    }
}

/// Loaded private key plus the public half derived from it.
///
/// Immutable after load. `Debug` never prints key material.
#[derive(Clone)]
pub struct SigningKey {
    algorithm: KeyAlgorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    /// Parses a PEM private key.
    ///
    /// Accepts RSA keys (PKCS#8 or PKCS#1) for RS256 and P-256 keys (PKCS#8 or SEC1) for ES256.
    #[instrument(skip(pem))]
    pub fn from_pem(pem: &[u8]) -> Result<Self, AppError> {
        let text = pem_text(pem)?;

        if let Some(key) = load_rsa(text)? {
            debug!(algorithm = %key.algorithm, "Loaded RSA signing key");
            return Ok(key);
        }

        if let Some(key) = load_p256(text)? {
            debug!(algorithm = %key.algorithm, "Loaded P-256 signing key");
            return Ok(key);
        }

        if text.contains(ENCRYPTED_PEM_LABEL) {
            warn!("Key material is encrypted but no password was given");
            return Err(AppError::KeyFormat(
                "private key is encrypted, a password is required".to_string(),
            ));
        }

        warn!("Key material is neither an RSA nor a P-256 private key");
        Err(AppError::KeyFormat(
            "expected an RSA or P-256 private key in PEM format".to_string(),
        ))
    }

    /// Parses a password-protected PKCS#8 PEM key (`BEGIN ENCRYPTED PRIVATE KEY`)
    #[instrument(skip(pem, password))]
    pub fn from_encrypted_pem(pem: &[u8], password: &[u8]) -> Result<Self, AppError> {
        use p256::pkcs8::DecodePrivateKey as _;

        let text = pem_text(pem)?;

        if let Ok(private) = rsa::RsaPrivateKey::from_pkcs8_encrypted_pem(text, password) {
            debug!("Decrypted RSA signing key");
            return rsa_signing_key(&private);
        }

        if let Ok(secret) = p256::SecretKey::from_pkcs8_encrypted_pem(text, password) {
            debug!("Decrypted P-256 signing key");
            return p256_signing_key(&secret);
        }

        warn!("Could not decrypt key material");
        Err(AppError::KeyFormat(
            "cannot decrypt private key: wrong password or unsupported key".to_string(),
        ))
    }

    /// Reads and parses a PEM private key file
    #[instrument]
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        Self::from_pem(&read_key_file(path)?)
    }

    /// Reads and decrypts a password-protected PEM private key file
    #[instrument(skip(password))]
    pub fn from_encrypted_file(path: &Path, password: &[u8]) -> Result<Self, AppError> {
        Self::from_encrypted_pem(&read_key_file(path)?, password)
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

const ENCRYPTED_PEM_LABEL: &str = "BEGIN ENCRYPTED PRIVATE KEY";

fn pem_text(pem: &[u8]) -> Result<&str, AppError> {
    std::str::from_utf8(pem)
        .map_err(|_| AppError::KeyFormat("key material is not PEM text".to_string()))
}

fn read_key_file(path: &Path) -> Result<Vec<u8>, AppError> {
    std::fs::read(path).map_err(|e| {
        AppError::KeyFormat(format!(
            "cannot read private key file {}: {}",
            path.display(),
            e.kind()
        ))
    })
}

/// Returns `Ok(None)` when the PEM is not an RSA key at all
fn load_rsa(text: &str) -> Result<Option<SigningKey>, AppError> {
    use rsa::pkcs1::DecodeRsaPrivateKey as _;
    use rsa::pkcs8::DecodePrivateKey as _;
    use rsa::RsaPrivateKey;

    match RsaPrivateKey::from_pkcs8_pem(text)
        .ok()
        .or_else(|| RsaPrivateKey::from_pkcs1_pem(text).ok())
    {
        Some(private) => rsa_signing_key(&private).map(Some),
        None => Ok(None),
    }
}

fn rsa_signing_key(private: &rsa::RsaPrivateKey) -> Result<SigningKey, AppError> {
    use rsa::pkcs8::{EncodePrivateKey as _, EncodePublicKey as _, LineEnding};

    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|_| AppError::KeyFormat("cannot re-encode RSA private key".to_string()))?;
    let public_pem = private
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|_| AppError::KeyFormat("cannot derive RSA public key".to_string()))?;

    let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes())
        .map_err(|e| AppError::KeyFormat(format!("unusable RSA private key: {}", e)))?;
    let decoding = DecodingKey::from_rsa_pem(public_pem.as_bytes())
        .map_err(|e| AppError::KeyFormat(format!("unusable RSA public key: {}", e)))?;

    Ok(SigningKey {
        algorithm: KeyAlgorithm::Rs256,
        encoding,
        decoding,
    })
}

/// Returns `Ok(None)` when the PEM is not a P-256 key at all
fn load_p256(text: &str) -> Result<Option<SigningKey>, AppError> {
    use p256::pkcs8::DecodePrivateKey as _;
    use p256::SecretKey;

    match SecretKey::from_pkcs8_pem(text)
        .ok()
        .or_else(|| SecretKey::from_sec1_pem(text).ok())
    {
        Some(secret) => p256_signing_key(&secret).map(Some),
        None => Ok(None),
    }
}

fn p256_signing_key(secret: &p256::SecretKey) -> Result<SigningKey, AppError> {
    use p256::pkcs8::{EncodePrivateKey as _, EncodePublicKey as _, LineEnding};

    // jsonwebtoken only signs with PKCS#8 EC keys, so SEC1 input is re-encoded.
    let private_pem = secret
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|_| AppError::KeyFormat("cannot re-encode P-256 private key".to_string()))?;
    let public_pem = secret
        .public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|_| AppError::KeyFormat("cannot derive P-256 public key".to_string()))?;

    let encoding = EncodingKey::from_ec_pem(private_pem.as_bytes())
        .map_err(|e| AppError::KeyFormat(format!("unusable P-256 private key: {}", e)))?;
    let decoding = DecodingKey::from_ec_pem(public_pem.as_bytes())
        .map_err(|e| AppError::KeyFormat(format!("unusable P-256 public key: {}", e)))?;

    Ok(SigningKey {
        algorithm: KeyAlgorithm::Es256,
        encoding,
        decoding,
    })
}
