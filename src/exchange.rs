//! Identifier to credential exchange

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::issuer::{Credential, TokenIssuer};
use crate::keystore::identifier_digest;
use crate::mapping::MappingStore;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Missing identifier")]
    MissingIdentifier,

    #[error("No user for identifier")]
    UnknownIdentifier,

    #[error("{0}")]
    MappingStore(String),

    #[error("{0}")]
    CredentialIssuance(String),
}

impl ExchangeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ExchangeError::MissingIdentifier => StatusCode::BAD_REQUEST,
            ExchangeError::UnknownIdentifier => StatusCode::NOT_FOUND,
            ExchangeError::MappingStore(_) | ExchangeError::CredentialIssuance(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

/// Error body returned by the exchange endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ExchangeError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Request body of `POST /exchange`
#[derive(Debug, Default, Deserialize)]
pub struct ExchangeRequest {
    #[serde(default, alias = "fingerprintId")]
    pub identifier: Option<String>,
}

/// Success body of `POST /exchange`
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Stateless exchange of device identifiers for custom tokens
#[derive(Clone)]
pub struct ExchangeService {
    store: Arc<dyn MappingStore>,
    issuer: Arc<dyn TokenIssuer>,
}

impl ExchangeService {
    pub fn new(store: Arc<dyn MappingStore>, issuer: Arc<dyn TokenIssuer>) -> Self {
        Self { store, issuer }
    }

    pub async fn exchange(&self, identifier: Option<&str>) -> Result<Credential, ExchangeError> {
        let identifier = identifier
            .filter(|id| !id.is_empty())
            .ok_or(ExchangeError::MissingIdentifier)?;
        let digest = identifier_digest(identifier);

        let account = match self.store.lookup(identifier).await {
            // A record without a usable uid counts as a miss
            Ok(Some(account)) if !account.uid().is_empty() => account,
            Ok(_) => {
                warn!(identifier = %digest, "No account mapped to identifier");
                return Err(ExchangeError::UnknownIdentifier);
            }
            Err(e) => {
                error!(identifier = %digest, "Mapping store lookup failed: {}", e);
                return Err(ExchangeError::MappingStore(e.to_string()));
            }
        };

        let credential = self
            .issuer
            .create_custom_token(&account)
            .await
            .map_err(|e| {
                error!(uid = %account, "Custom token issuance failed: {}", e);
                ExchangeError::CredentialIssuance(e.to_string())
            })?;

        info!(identifier = %digest, uid = %account, "Credential issued");
        Ok(credential)
    }
}
