//! Fingerprint Auth - biometric sessions and credential exchange
//!
//! Client side: [`prompt::SessionManager`] drives single-shot biometric prompts
//! and [`keystore::DeviceIdentity`] yields the hardware-backed device identifier.
//! Server side: [`exchange::ExchangeService`] trades that identifier for a
//! signed custom token.

pub mod config;
pub mod exchange;
pub mod issuer;
pub mod keystore;
pub mod mapping;
pub mod plugin;
pub mod prompt;
pub mod rate_limit;
pub mod security;
pub mod web;

pub use config::{ExchangeConfig, ProviderConfig, ServiceAccount};
pub use exchange::{ExchangeError, ExchangeService};
pub use issuer::{Credential, CustomTokenIssuer, TokenIssuer};
pub use keystore::{DeviceIdentifier, DeviceIdentity, KeyAccessError, SecureKeyStore};
pub use mapping::{AccountIdentity, MappingStore, SqliteMappingStore};
pub use prompt::{AuthOutcome, BiometricPrompt, PromptCallback, SessionManager};

use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Store(#[from] mapping::StoreError),

    #[error(transparent)]
    Issuer(#[from] issuer::IssuerError),
}

/// Shared state of the exchange service
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ExchangeConfig>,
    pub exchange: ExchangeService,
}

impl AppState {
    /// Open the SQLite mapping store and build the custom token issuer
    pub async fn new(config: ExchangeConfig) -> Result<Self, StartupError> {
        let store = SqliteMappingStore::connect(&config.database_url).await?;
        let issuer = CustomTokenIssuer::new(&config.provider)?;

        Ok(Self::with_parts(config, Arc::new(store), Arc::new(issuer)))
    }

    pub fn with_parts(
        config: ExchangeConfig,
        store: Arc<dyn MappingStore>,
        issuer: Arc<dyn TokenIssuer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            exchange: ExchangeService::new(store, issuer),
        }
    }
}
