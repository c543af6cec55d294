mod common;
use common::temp_dir;

use reqflow::errors::ToolErrorKind;
use reqflow::models::Credential;
use reqflow::services::credential_store::CredentialStore;
use reqflow::services::logger::Logger;
use reqflow::services::token_watch::TokenWatcher;
use std::sync::Arc;
use std::time::Duration;

fn watcher() -> (Arc<CredentialStore>, Arc<TokenWatcher>) {
    let dir = temp_dir("token-watch");
    let store = Arc::new(CredentialStore::with_path(
        Logger::new("test"),
        dir.join("credentials.json"),
    ));
    let watcher = Arc::new(TokenWatcher::new(
        Logger::new("test"),
        store.clone(),
        Duration::from_millis(20),
    ));
    (store, watcher)
}

#[tokio::test]
async fn polling_stops_once_a_token_appears() {
    let (store, watcher) = watcher();
    let task = watcher.spawn();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(watcher.is_polling());
    assert!(watcher.poll_count() >= 2);
    assert!(watcher.current().is_none());

    store.set(&Credential::bearer("token-1")).expect("set");
    let credential = watcher
        .wait_for_token(Some(Duration::from_secs(2)))
        .await
        .expect("token observed");
    assert_eq!(credential.token, "token-1");

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!watcher.is_polling());
    let settled = watcher.poll_count();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(watcher.poll_count(), settled);

    task.abort();
}

#[tokio::test]
async fn clearing_credentials_resumes_polling() {
    let (store, watcher) = watcher();
    store.set(&Credential::bearer("token-1")).expect("set");
    let task = watcher.spawn();

    watcher
        .wait_for_token(Some(Duration::from_secs(2)))
        .await
        .expect("token observed");
    let mut updates = watcher.subscribe();

    store.clear().expect("clear");
    tokio::time::timeout(Duration::from_secs(2), updates.changed())
        .await
        .expect("cleared in time")
        .expect("watcher alive");
    assert!(watcher.current().is_none());

    let before = watcher.poll_count();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(watcher.is_polling());
    assert!(watcher.poll_count() > before);

    store.set(&Credential::bearer("token-2")).expect("set again");
    let credential = watcher
        .wait_for_token(Some(Duration::from_secs(2)))
        .await
        .expect("second token observed");
    assert_eq!(credential.token, "token-2");

    task.abort();
}

#[tokio::test]
async fn refreshed_token_replaces_the_observed_one() {
    let (store, watcher) = watcher();
    store.set(&Credential::bearer("old")).expect("set");
    let task = watcher.spawn();

    let first = watcher
        .wait_for_token(Some(Duration::from_secs(2)))
        .await
        .expect("token observed");
    assert_eq!(first.token, "old");
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!watcher.is_polling());
    let polls = watcher.poll_count();

    let mut updates = watcher.subscribe();
    store.set(&Credential::bearer("new")).expect("refresh");
    tokio::time::timeout(Duration::from_secs(2), updates.changed())
        .await
        .expect("refresh observed in time")
        .expect("watcher alive");

    assert_eq!(watcher.current().map(|c| c.token).as_deref(), Some("new"));
    let again = watcher
        .wait_for_token(Some(Duration::from_secs(2)))
        .await
        .expect("token");
    assert_eq!(again.token, "new");
    assert!(!watcher.is_polling());
    assert_eq!(watcher.poll_count(), polls);

    task.abort();
}

#[tokio::test]
async fn wait_for_token_times_out_when_signed_out() {
    let (_store, watcher) = watcher();
    let task = watcher.spawn();

    let err = watcher
        .wait_for_token(Some(Duration::from_millis(80)))
        .await
        .expect_err("no token");
    assert_eq!(err.kind, ToolErrorKind::Timeout);

    task.abort();
}
