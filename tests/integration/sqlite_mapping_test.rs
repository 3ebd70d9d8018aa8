//! Integration tests for the SQLite mapping store

use fingerprint_auth::mapping::{AccountIdentity, MappingStore, SqliteMappingStore};
use fingerprint_auth::{AppState, ExchangeError};
use std::sync::Arc;

#[path = "../common/mod.rs"]
mod common;

async fn memory_store() -> SqliteMappingStore {
    SqliteMappingStore::connect("sqlite::memory:").await.unwrap()
}

#[tokio::test]
async fn test_lookup_after_upsert() {
    let store = memory_store().await;

    assert!(store.lookup("dev-abc").await.unwrap().is_none());

    let mapping = store.upsert("dev-abc", "uid-789").await.unwrap();
    assert_eq!(mapping.fingerprint_id, "dev-abc");
    assert_eq!(mapping.uid, "uid-789");

    assert_eq!(
        store.lookup("dev-abc").await.unwrap(),
        Some(AccountIdentity::new("uid-789"))
    );
}

#[tokio::test]
async fn test_upsert_replaces_uid() {
    let store = memory_store().await;

    store.upsert("dev-abc", "uid-1").await.unwrap();
    store.upsert("dev-abc", "uid-2").await.unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(
        store.lookup("dev-abc").await.unwrap(),
        Some(AccountIdentity::new("uid-2"))
    );
}

#[tokio::test]
async fn test_remove_mapping() {
    let store = memory_store().await;
    store.upsert("dev-abc", "uid-789").await.unwrap();

    assert!(store.remove("dev-abc").await.unwrap());
    assert!(!store.remove("dev-abc").await.unwrap());
    assert!(store.lookup("dev-abc").await.unwrap().is_none());
}

#[tokio::test]
async fn test_exchange_over_sqlite() {
    let config = common::test_config();
    let store = Arc::new(memory_store().await);
    store.upsert("dev-abc", "uid-789").await.unwrap();
    let issuer = fingerprint_auth::CustomTokenIssuer::new(&config.provider).unwrap();
    let state = AppState::with_parts(config, store, Arc::new(issuer));

    let credential = state.exchange.exchange(Some("dev-abc")).await.unwrap();
    assert_eq!(credential.uid, "uid-789");

    assert_error_matches!(
        state.exchange.exchange(Some("unknown-123")).await,
        ExchangeError::UnknownIdentifier
    );
}
