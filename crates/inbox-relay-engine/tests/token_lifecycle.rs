mod common;

use common::{Harness, RefreshBehavior, expiring_credential, valid_credential};
use inbox_relay_engine::{
    AuthState, CheckpointStore, Credential, CredentialStore, HistoryId, MemoryStore,
    RefreshOutcome, RelayError, TokenGrant,
};
use std::time::Duration;

async fn store_with(credential: Credential) -> MemoryStore {
    let store = MemoryStore::new();
    CredentialStore::new(store.clone())
        .replace(&credential)
        .await
        .unwrap();
    store
}

async fn stored(store: &MemoryStore) -> Option<Credential> {
    CredentialStore::new(store.clone()).load().await.unwrap()
}

#[tokio::test]
async fn test_start_without_credential_waits_for_authorization() {
    let h = Harness::new(RefreshBehavior::Unavailable);

    let state = h.relay.start().await.unwrap();

    let AuthState::AwaitingAuthorization { url } = state else {
        panic!("expected authorization prompt, got {state:?}");
    };
    assert!(url.as_str().starts_with("https://accounts.example.com/"));
    assert!(!h.session.is_authorized().await);
    assert!(!h.relay.refresh_running().await);
    assert_eq!(h.mail.watch_calls(), 0);
}

#[tokio::test]
async fn test_start_with_valid_credential_registers_watch() {
    let store = store_with(valid_credential()).await;
    let h = Harness::with_store(store, RefreshBehavior::Unavailable);
    h.mail.set_watch_start(Some(42));

    assert_eq!(h.relay.start().await.unwrap(), AuthState::Restored);

    assert_eq!(h.auth.refresh_calls(), 0);
    assert!(h.relay.refresh_running().await);
    let checkpoint = CheckpointStore::new(h.store.clone()).load().await.unwrap();
    assert_eq!(checkpoint, Some(HistoryId::new(42)));

    h.relay.shutdown().await;
    assert!(!h.relay.refresh_running().await);
}

#[tokio::test]
async fn test_invalid_grant_removes_credential_and_blocks_reconciliation() {
    let store = store_with(expiring_credential()).await;
    CheckpointStore::new(store.clone())
        .save(HistoryId::new(100))
        .await
        .unwrap();
    let h = Harness::with_store(store, RefreshBehavior::InvalidGrant);

    let state = h.relay.start().await.unwrap();

    assert!(matches!(state, AuthState::AwaitingAuthorization { .. }));
    assert_eq!(stored(&h.store).await, None);
    assert!(!h.session.is_authorized().await);

    h.mail.add_record(105, &["abc"]);
    let err = h
        .relay
        .handle_notification(HistoryId::new(105))
        .await
        .unwrap_err();
    assert!(err.is_auth_invalid());
    let checkpoint = CheckpointStore::new(h.store.clone()).load().await.unwrap();
    assert_eq!(checkpoint, Some(HistoryId::new(100)));
}

#[tokio::test]
async fn test_rotation_keeps_refresh_token_when_omitted() {
    let store = store_with(expiring_credential()).await;
    let grant = TokenGrant {
        expires_in: Some(Duration::from_secs(3600)),
        ..TokenGrant::access_only("A2")
    };
    let h = Harness::with_store(store, RefreshBehavior::Grant(grant));
    h.relay.tokens().initialize().await.unwrap();

    let outcome = h.relay.tokens().ensure_fresh().await.unwrap();

    assert_eq!(outcome, RefreshOutcome::Rotated);
    let persisted = stored(&h.store).await.unwrap();
    assert_eq!(persisted.access_token, "A2");
    assert_eq!(persisted.refresh_token.as_deref(), Some("R"));
    assert_eq!(h.session.credential().await, Some(persisted));
}

#[tokio::test]
async fn test_rotation_replaces_refresh_token_when_issued() {
    let store = store_with(expiring_credential()).await;
    let grant = TokenGrant {
        refresh_token: Some("R2".to_owned()),
        ..TokenGrant::access_only("A2")
    };
    let h = Harness::with_store(store, RefreshBehavior::Grant(grant));
    h.relay.tokens().initialize().await.unwrap();

    h.relay.tokens().ensure_fresh().await.unwrap();

    let persisted = stored(&h.store).await.unwrap();
    assert_eq!(persisted.access_token, "A2");
    assert_eq!(persisted.refresh_token.as_deref(), Some("R2"));
}

#[tokio::test]
async fn test_transient_refresh_failure_keeps_credential() {
    let original = expiring_credential();
    let store = store_with(original.clone()).await;
    let h = Harness::with_store(store, RefreshBehavior::Unavailable);
    h.relay.tokens().initialize().await.unwrap();

    let err = h.relay.tokens().ensure_fresh().await.unwrap_err();

    assert!(matches!(err, RelayError::AuthTransient(_)));
    assert_eq!(stored(&h.store).await, Some(original.clone()));
    assert_eq!(h.session.credential().await, Some(original));
}

#[tokio::test]
async fn test_valid_token_is_not_refreshed() {
    let store = store_with(valid_credential()).await;
    let h = Harness::with_store(store, RefreshBehavior::InvalidGrant);
    h.relay.tokens().initialize().await.unwrap();

    assert_eq!(
        h.relay.tokens().ensure_fresh().await.unwrap(),
        RefreshOutcome::Fresh
    );
    assert_eq!(h.auth.refresh_calls(), 0);
}

#[tokio::test]
async fn test_rejected_watch_token_forces_refresh() {
    let store = store_with(valid_credential()).await;
    let h = Harness::with_store(
        store,
        RefreshBehavior::Grant(TokenGrant::access_only("A2")),
    );
    h.mail.set_watch_start(Some(42));
    h.relay.start().await.unwrap();
    assert_eq!(h.auth.refresh_calls(), 0);

    h.mail.set_rejects_token(true);
    let err = h.relay.register_watch().await.unwrap_err();

    assert!(err.is_auth_invalid());
    assert_eq!(h.auth.refresh_calls(), 1);
    let persisted = stored(&h.store).await.unwrap();
    assert_eq!(persisted.access_token, "A2");
    assert_eq!(persisted.refresh_token.as_deref(), Some("R"));
    assert!(h.session.is_authorized().await);

    h.mail.set_rejects_token(false);
    h.relay.register_watch().await.unwrap();
    h.relay.shutdown().await;
}

#[tokio::test]
async fn test_revocation_detected_by_watch_removes_credential() {
    let store = store_with(valid_credential()).await;
    let h = Harness::with_store(store, RefreshBehavior::Unavailable);
    h.mail.set_watch_start(Some(42));
    h.relay.start().await.unwrap();
    assert!(h.session.is_authorized().await);

    h.auth.set_refresh(RefreshBehavior::InvalidGrant);
    h.mail.set_rejects_token(true);
    let err = h.relay.register_watch().await.unwrap_err();

    assert!(err.is_auth_invalid());
    assert_eq!(h.auth.refresh_calls(), 1);
    assert_eq!(stored(&h.store).await, None);
    assert!(!h.session.is_authorized().await);

    // later notifications stop at the missing session
    let err = h
        .relay
        .handle_notification(HistoryId::new(50))
        .await
        .unwrap_err();
    assert!(err.is_auth_invalid());
    assert!(h.mail.history_calls().is_empty());
    h.relay.shutdown().await;
}

#[tokio::test]
async fn test_authorize_stores_credential_and_resumes() {
    let h = Harness::new(RefreshBehavior::Unavailable);
    h.mail.set_watch_start(Some(300));
    h.relay.start().await.unwrap();

    h.relay.authorize("good-code").await.unwrap();

    let persisted = stored(&h.store).await.unwrap();
    assert_eq!(persisted.access_token, "A-fresh");
    assert_eq!(persisted.refresh_token.as_deref(), Some("R-fresh"));
    assert!(h.session.is_authorized().await);
    assert!(h.relay.refresh_running().await);
    let checkpoint = CheckpointStore::new(h.store.clone()).load().await.unwrap();
    assert_eq!(checkpoint, Some(HistoryId::new(300)));

    // a second authorization replaces the timer instead of stacking one
    h.relay.authorize("good-code").await.unwrap();
    assert!(h.relay.refresh_running().await);
    h.relay.shutdown().await;
}

#[tokio::test]
async fn test_rejected_authorization_code_stores_nothing() {
    let h = Harness::new(RefreshBehavior::Unavailable);
    h.relay.start().await.unwrap();

    let err = h.relay.authorize("stale-code").await.unwrap_err();

    assert!(err.is_auth_invalid());
    assert_eq!(stored(&h.store).await, None);
    assert!(!h.relay.refresh_running().await);
}

#[tokio::test]
async fn test_unreadable_credential_is_discarded() {
    use inbox_relay_engine::KeyValueStore;
    use inbox_relay_engine::credential::CREDENTIAL_KEY;

    let store = MemoryStore::new();
    store.set(CREDENTIAL_KEY, "{not json").await.unwrap();
    let h = Harness::with_store(store, RefreshBehavior::Unavailable);

    let state = h.relay.start().await.unwrap();

    assert!(matches!(state, AuthState::AwaitingAuthorization { .. }));
    assert_eq!(h.store.get(CREDENTIAL_KEY).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_timer_ticks_once_per_period() {
    let store = store_with(expiring_credential()).await;
    let h = Harness::with_store(store, RefreshBehavior::Unavailable);
    h.relay.tokens().initialize().await.unwrap();

    let task = h.relay.tokens().spawn_refresh(Duration::from_secs(60));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.auth.refresh_calls(), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(h.auth.refresh_calls(), 1);

    // a transient failure waits for the next tick
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.auth.refresh_calls(), 1);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.auth.refresh_calls(), 2);
    assert!(stored(&h.store).await.is_some());

    task.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_refresh_timer_survives_revocation() {
    let store = store_with(expiring_credential()).await;
    let h = Harness::with_store(store, RefreshBehavior::InvalidGrant);
    h.relay.tokens().initialize().await.unwrap();

    let task = h.relay.tokens().spawn_refresh(Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(h.auth.refresh_calls(), 1);
    assert_eq!(stored(&h.store).await, None);
    assert!(!task.is_finished());

    // nothing left to refresh until the next authorization
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.auth.refresh_calls(), 1);

    task.stop().await;
}
