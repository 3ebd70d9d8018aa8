//! Identity provider custom token issuance

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::mapping::AccountIdentity;

/// Audience the identity provider expects on custom tokens
pub const CUSTOM_TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

/// Longest lifetime the identity provider accepts for a custom token
pub const MAX_TOKEN_TTL_SECS: i64 = 60 * 60;

#[derive(Error, Debug)]
pub enum IssuerError {
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Invalid account identity: {0}")]
    InvalidIdentity(String),

    #[error("Token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Signed, time-limited credential for one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub uid: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CustomTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub uid: String,
}

#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn create_custom_token(&self, account: &AccountIdentity) -> Result<Credential, IssuerError>;
}

/// Signs custom tokens locally with the service account credentials
pub struct CustomTokenIssuer {
    service_account_email: String,
    header: Header,
    encoding_key: EncodingKey,
    ttl: Duration,
}

impl CustomTokenIssuer {
    pub fn new(provider: &ProviderConfig) -> Result<Self, IssuerError> {
        let (header, encoding_key) = match provider.private_key {
            Some(ref pem) => {
                // Keys taken from environment variables carry escaped newlines
                let pem = pem.replace("\\n", "\n");
                let key = EncodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| IssuerError::InvalidKey(e.to_string()))?;
                let mut header = Header::new(Algorithm::RS256);
                header.kid = provider.private_key_id.clone();
                (header, key)
            }
            None => {
                if provider.signing_secret.is_empty() {
                    return Err(IssuerError::InvalidKey(
                        "neither a private key nor a signing secret is configured".to_string(),
                    ));
                }
                (
                    Header::new(Algorithm::HS256),
                    EncodingKey::from_secret(provider.signing_secret.as_bytes()),
                )
            }
        };

        let ttl_secs = i64::try_from(provider.token_ttl.as_secs())
            .unwrap_or(MAX_TOKEN_TTL_SECS)
            .clamp(1, MAX_TOKEN_TTL_SECS);

        Ok(Self {
            service_account_email: provider.client_email.clone(),
            header,
            encoding_key,
            ttl: Duration::seconds(ttl_secs),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.header.alg
    }
}

#[async_trait]
impl TokenIssuer for CustomTokenIssuer {
    async fn create_custom_token(&self, account: &AccountIdentity) -> Result<Credential, IssuerError> {
        let uid = account.uid();
        // Identity provider limit on uid length
        if uid.is_empty() || uid.chars().count() > 128 {
            return Err(IssuerError::InvalidIdentity(
                "uid must be a non-empty string of at most 128 characters".to_string(),
            ));
        }

        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = CustomTokenClaims {
            iss: self.service_account_email.clone(),
            sub: self.service_account_email.clone(),
            aud: CUSTOM_TOKEN_AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            uid: uid.to_string(),
        };

        let token = encode(&self.header, &claims, &self.encoding_key)?;
        debug!(uid, "Issued custom token");

        Ok(Credential {
            token,
            uid: uid.to_string(),
            expires_at,
        })
    }
}
