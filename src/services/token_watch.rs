use crate::errors::ToolError;
use crate::models::Credential;
use crate::services::credential_store::CredentialStore;
use crate::services::logger::Logger;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Polls the credential store until a token shows up, then goes quiet
/// until the store is cleared. While quiet it still follows in-process
/// writes so a refreshed token replaces the old one.
pub struct TokenWatcher {
    logger: Logger,
    store: Arc<CredentialStore>,
    interval: Duration,
    polls: AtomicU64,
    polling: AtomicBool,
    current: watch::Sender<Option<Credential>>,
}

impl TokenWatcher {
    pub fn new(logger: Logger, store: Arc<CredentialStore>, interval: Duration) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            logger: logger.child("token_watch"),
            store,
            interval,
            polls: AtomicU64::new(0),
            polling: AtomicBool::new(false),
            current,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.current.subscribe()
    }

    pub fn current(&self) -> Option<Credential> {
        self.current.borrow().clone()
    }

    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    pub fn poll_once(&self) -> Result<Option<Credential>, ToolError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let credential = self.store.get()?;
        if let Some(found) = credential.as_ref() {
            self.publish(found);
        }
        Ok(credential)
    }

    fn publish(&self, found: &Credential) {
        self.current.send_if_modified(|slot| {
            if slot.as_ref() == Some(found) {
                return false;
            }
            *slot = Some(found.clone());
            true
        });
    }

    fn reload(&self) {
        match self.store.get() {
            Ok(Some(found)) => self.publish(&found),
            Ok(None) => {}
            Err(err) => self.logger.warn(
                "token reload failed",
                Some(&serde_json::json!({"error": err.message})),
            ),
        }
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        self.polling.store(true, Ordering::SeqCst);
        let watcher = Arc::clone(self);
        tokio::spawn(async move { watcher.run().await })
    }

    async fn run(self: Arc<Self>) {
        let mut clears = self.store.subscribe_clears();
        let mut writes = self.store.subscribe_writes();
        loop {
            clears.borrow_and_update();
            self.polling.store(true, Ordering::SeqCst);
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // Writes before this read are covered by it.
                writes.borrow_and_update();
                match self.poll_once() {
                    Ok(Some(_)) => break,
                    Ok(None) => {}
                    Err(err) => self.logger.warn(
                        "token poll failed",
                        Some(&serde_json::json!({"error": err.message})),
                    ),
                }
            }
            self.polling.store(false, Ordering::SeqCst);
            self.logger.debug(
                "token observed, polling stopped",
                Some(&serde_json::json!({"polls": self.poll_count()})),
            );

            loop {
                tokio::select! {
                    changed = clears.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        break;
                    }
                    changed = writes.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        self.reload();
                    }
                }
            }
            self.current.send_replace(None);
            self.logger.debug("credentials cleared, polling resumed", None);
        }
    }

    pub async fn wait_for_token(&self, timeout: Option<Duration>) -> Result<Credential, ToolError> {
        let mut rx = self.subscribe();
        let wait = async move {
            loop {
                if let Some(credential) = rx.borrow_and_update().clone() {
                    return Ok(credential);
                }
                if rx.changed().await.is_err() {
                    return Err(ToolError::internal("token watcher stopped"));
                }
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| ToolError::timeout("No token appeared before the timeout"))?,
            None => wait.await,
        }
    }
}
