//! Session token verification for the external identity provider.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use service_core::error::AppError;
use service_core::middleware::rate_limit::RateLimitSubject;
use std::collections::HashMap;
use std::fs;

/// The authenticated caller, attached to the request by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            first_name: None,
            last_name: None,
        }
    }
}

impl RateLimitSubject for Identity {
    fn rate_limit_identifier(&self) -> String {
        format!("user:{}", self.user_id)
    }
}

/// Turns a bearer token into an [`Identity`] or rejects it.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Identity, AppError>;
}

/// Session JWT claims. Profile claims are only present when the provider's
/// session token template adds them.
#[derive(Debug, Deserialize)]
struct SessionClaims {
    sub: String,
    #[serde(default)]
    azp: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

/// Verifies RS256 session tokens against the provider's PEM public key.
#[derive(Clone)]
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    authorized_parties: Vec<String>,
}

impl JwtAuthenticator {
    pub fn from_pem(
        public_key_pem: &[u8],
        authorized_parties: Vec<String>,
    ) -> Result<Self, anyhow::Error> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| anyhow::anyhow!("Failed to parse session public key: {}", e))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            decoding_key,
            validation,
            authorized_parties,
        })
    }

    pub fn from_file(path: &str, authorized_parties: Vec<String>) -> Result<Self, anyhow::Error> {
        let pem = fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read session public key from {}: {}", path, e)
        })?;
        let authenticator = Self::from_pem(pem.as_bytes(), authorized_parties)?;
        tracing::info!("Session verification initialized with RS256 key");
        Ok(authenticator)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Identity, AppError> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)?.claims;

        if let Some(azp) = claims.azp.as_deref() {
            if !self.authorized_parties.is_empty()
                && !self.authorized_parties.iter().any(|party| party == azp)
            {
                return Err(AppError::Unauthorized(anyhow::anyhow!(
                    "Token issued for unauthorized party"
                )));
            }
        }

        Ok(Identity {
            user_id: claims.sub,
            email: claims.email.filter(|e| !e.is_empty()),
            first_name: claims.first_name,
            last_name: claims.last_name,
        })
    }
}

/// Fixed token table. With no tokens registered it rejects everything, which
/// is how the service runs when no session key is configured.
#[derive(Clone, Default)]
pub struct StaticAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Identity, AppError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Unknown session token")))
    }
}
