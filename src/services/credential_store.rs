use crate::constants::credentials::{
    EXPIRES_AT_KEY, REFRESH_TOKEN_KEY, STATE_KEY, TOKEN_KEY, USER_KEY,
};
use crate::errors::ToolError;
use crate::models::{Credential, PendingAuthorization, UserProfile};
use crate::services::logger::Logger;
use crate::utils::fs_atomic::{read_json_object, write_json_file};
use crate::utils::paths::resolve_credentials_path;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::watch;

/// Durable credential slots shared by every process pointed at the same
/// file. Reads always go to disk so a token written by another process
/// (an authorization callback, a second window) is picked up.
pub struct CredentialStore {
    logger: Logger,
    file_path: PathBuf,
    write_lock: Mutex<()>,
    clears: watch::Sender<u64>,
    writes: watch::Sender<u64>,
}

impl CredentialStore {
    pub fn new(logger: Logger) -> Self {
        Self::with_path(logger, resolve_credentials_path())
    }

    pub fn with_path(logger: Logger, file_path: impl Into<PathBuf>) -> Self {
        let (clears, _) = watch::channel(0);
        let (writes, _) = watch::channel(0);
        Self {
            logger: logger.child("credentials"),
            file_path: file_path.into(),
            write_lock: Mutex::new(()),
            clears,
            writes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn load(&self) -> Result<Map<String, Value>, ToolError> {
        read_json_object(&self.file_path).map_err(|err| {
            ToolError::internal(format!("Failed to load credential store: {}", err))
        })
    }

    fn update<F>(&self, mutate: F) -> Result<(), ToolError>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|err| err.into_inner());
        let mut slots = self.load()?;
        mutate(&mut slots);
        write_json_file(&self.file_path, &Value::Object(slots)).map_err(|err| {
            ToolError::internal(format!("Failed to save credential store: {}", err))
        })
    }

    pub fn get(&self) -> Result<Option<Credential>, ToolError> {
        let slots = self.load()?;
        let token = slots
            .get(TOKEN_KEY)
            .and_then(|v| v.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty());
        let Some(token) = token else {
            return Ok(None);
        };
        let refresh_token = slots
            .get(REFRESH_TOKEN_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let expires_at = slots
            .get(EXPIRES_AT_KEY)
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));
        Ok(Some(Credential {
            token: token.to_string(),
            refresh_token,
            expires_at,
        }))
    }

    pub fn set(&self, credential: &Credential) -> Result<(), ToolError> {
        if credential.token.trim().is_empty() {
            return Err(ToolError::invalid_params("token must be a non-empty string"));
        }
        self.update(|slots| {
            slots.insert(TOKEN_KEY.to_string(), Value::String(credential.token.clone()));
            match &credential.refresh_token {
                Some(refresh) => {
                    slots.insert(REFRESH_TOKEN_KEY.to_string(), Value::String(refresh.clone()));
                }
                None => {
                    slots.remove(REFRESH_TOKEN_KEY);
                }
            }
            match credential.expires_at {
                Some(at) => {
                    slots.insert(EXPIRES_AT_KEY.to_string(), Value::String(at.to_rfc3339()));
                }
                None => {
                    slots.remove(EXPIRES_AT_KEY);
                }
            }
        })?;
        self.writes.send_modify(|generation| *generation += 1);
        self.logger.debug("credential stored", None);
        Ok(())
    }

    /// Drops the credential together with everything derived from it and
    /// re-arms token watchers.
    pub fn clear(&self) -> Result<(), ToolError> {
        self.update(|slots| {
            for key in [TOKEN_KEY, REFRESH_TOKEN_KEY, EXPIRES_AT_KEY, USER_KEY, STATE_KEY] {
                slots.remove(key);
            }
        })?;
        self.clears.send_modify(|generation| *generation += 1);
        self.logger.info("credentials cleared", None);
        Ok(())
    }

    pub fn profile(&self) -> Result<Option<UserProfile>, ToolError> {
        let slots = self.load()?;
        match slots.get(USER_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => match serde_json::from_value::<UserProfile>(value.clone()) {
                Ok(profile) => Ok(Some(profile)),
                Err(err) => {
                    self.logger.warn(
                        "ignoring unreadable cached profile",
                        Some(&serde_json::json!({"error": err.to_string()})),
                    );
                    Ok(None)
                }
            },
        }
    }

    pub fn set_profile(&self, profile: &UserProfile) -> Result<(), ToolError> {
        let value = serde_json::to_value(profile)?;
        self.update(|slots| {
            slots.insert(USER_KEY.to_string(), value);
        })
    }

    pub fn clear_profile(&self) -> Result<(), ToolError> {
        self.update(|slots| {
            slots.remove(USER_KEY);
        })
    }

    pub fn pending_authorization(&self) -> Result<Option<PendingAuthorization>, ToolError> {
        let slots = self.load()?;
        Ok(slots
            .get(STATE_KEY)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    pub fn set_pending_authorization(
        &self,
        pending: &PendingAuthorization,
    ) -> Result<(), ToolError> {
        let value = serde_json::to_value(pending)?;
        self.update(|slots| {
            slots.insert(STATE_KEY.to_string(), value);
        })
    }

    pub fn take_pending_authorization(&self) -> Result<Option<PendingAuthorization>, ToolError> {
        let pending = self.pending_authorization()?;
        if pending.is_some() {
            self.update(|slots| {
                slots.remove(STATE_KEY);
            })?;
        }
        Ok(pending)
    }

    pub fn subscribe_clears(&self) -> watch::Receiver<u64> {
        self.clears.subscribe()
    }

    /// Bumped by every `set`, including token refreshes.
    pub fn subscribe_writes(&self) -> watch::Receiver<u64> {
        self.writes.subscribe()
    }
}
