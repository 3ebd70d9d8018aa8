//! Common test utilities and helpers
#![allow(dead_code)]

use fingerprint_auth::mapping::InMemoryMappingStore;
use fingerprint_auth::prompt::{BiometricPrompt, PromptCallback, PromptError, PromptInfo};
use fingerprint_auth::{AppState, CustomTokenIssuer, ExchangeConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_SECRET: &str = "test_secret_key_for_testing_only_32_chars_long";

/// Platform prompt double that hands the callback back to the test
#[derive(Default)]
pub struct ScriptedPrompt {
    callback: Mutex<Option<PromptCallback>>,
    started: AtomicUsize,
    cancelled: AtomicUsize,
    refuse_with: Mutex<Option<String>>,
}

impl ScriptedPrompt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `authenticate` call fail to start
    pub fn refuse_next(&self, message: &str) {
        *self.refuse_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn callback(&self) -> PromptCallback {
        self.callback
            .lock()
            .unwrap()
            .clone()
            .expect("prompt was never started")
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl BiometricPrompt for ScriptedPrompt {
    fn authenticate(&self, _info: &PromptInfo, callback: PromptCallback) -> Result<(), PromptError> {
        if let Some(message) = self.refuse_with.lock().unwrap().take() {
            return Err(PromptError(message));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn cancel_authentication(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn test_config() -> ExchangeConfig {
    ExchangeConfig::builder()
        .database_url("sqlite::memory:")
        .signing_secret(TEST_SECRET)
        .rate_limit(0, std::time::Duration::from_secs(60))
        .build()
}

/// App state over an in-memory mapping store
pub fn test_app_state(mappings: &[(&str, &str)]) -> AppState {
    let config = test_config();
    let store = InMemoryMappingStore::with_mappings(mappings.iter().copied());
    let issuer = CustomTokenIssuer::new(&config.provider).unwrap();
    AppState::with_parts(config, Arc::new(store), Arc::new(issuer))
}

/// Assert that a result is an error matching a pattern
#[macro_export]
macro_rules! assert_error_matches {
    ($result:expr, $pattern:pat) => {
        match $result {
            Err($pattern) => (),
            Err(e) => panic!("Expected error matching {}, got {:?}", stringify!($pattern), e),
            Ok(_) => panic!("Expected error, got Ok"),
        }
    };
}
