use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::services::oauth::GitLabOAuth;
use crate::services::token_watch::TokenWatcher;
use crate::utils::tool_errors::{read_positive_int, required_str, unknown_action_error};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const AUTH_ACTIONS: &[&str] = &[
    "authorize_url",
    "begin",
    "exchange",
    "refresh",
    "sign_out",
    "profile",
    "status",
    "dismiss_error",
    "repository_settings",
    "wait_for_token",
];

#[derive(Clone)]
pub struct AuthManager {
    logger: Logger,
    oauth: Arc<GitLabOAuth>,
    watcher: Arc<TokenWatcher>,
}

impl AuthManager {
    pub fn new(logger: Logger, oauth: Arc<GitLabOAuth>, watcher: Arc<TokenWatcher>) -> Self {
        Self {
            logger: logger.child("gitlab_auth"),
            oauth,
            watcher,
        }
    }

    pub async fn handle_action(&self, args: Value) -> Result<Value, ToolError> {
        let action = args.get("action");
        match action.and_then(|v| v.as_str()).unwrap_or("") {
            "authorize_url" => {
                let url = self.oauth.generate_authorization_url()?;
                Ok(serde_json::json!({"url": url, "phase": self.oauth.phase()}))
            }
            "begin" => {
                let phase = self.oauth.begin_authentication()?;
                Ok(serde_json::json!({"phase": phase}))
            }
            "exchange" => {
                let credential = match args.get("link").and_then(|v| v.as_str()) {
                    Some(link) => self.oauth.exchange_from_link(link).await?,
                    None => {
                        let code = required_str(&args, "code")?;
                        let state = required_str(&args, "state")?;
                        self.oauth.exchange_code(code, state).await?
                    }
                };
                Ok(serde_json::json!({
                    "signed_in": true,
                    "phase": self.oauth.phase(),
                    "expires_at": credential.expires_at.map(|at| at.to_rfc3339()),
                }))
            }
            "refresh" => {
                let credential = self.oauth.refresh_token().await?;
                Ok(serde_json::json!({
                    "refreshed": true,
                    "expires_at": credential.expires_at.map(|at| at.to_rfc3339()),
                }))
            }
            "sign_out" => {
                self.oauth.sign_out()?;
                Ok(serde_json::json!({"signed_out": true, "phase": self.oauth.phase()}))
            }
            "profile" => {
                let profile = self.oauth.fetch_user_profile().await?;
                Ok(serde_json::to_value(profile)?)
            }
            "status" => {
                let mut status = self.oauth.status()?;
                status["token_watch"] = serde_json::json!({
                    "polling": self.watcher.is_polling(),
                    "polls": self.watcher.poll_count(),
                });
                Ok(status)
            }
            "dismiss_error" => Ok(serde_json::json!({"dismissed": self.oauth.dismiss_error()})),
            "repository_settings" => {
                let uri = required_str(&args, "uri")?;
                let settings = self.oauth.repository_settings(uri).await?;
                Ok(serde_json::to_value(settings)?)
            }
            "wait_for_token" => {
                let timeout = read_positive_int(args.get("timeout_ms")).map(Duration::from_millis);
                let credential = self.watcher.wait_for_token(timeout).await?;
                Ok(serde_json::json!({
                    "signed_in": true,
                    "expires_at": credential.expires_at.map(|at| at.to_rfc3339()),
                }))
            }
            _ => Err(unknown_action_error("gitlab_auth", action, AUTH_ACTIONS)),
        }
    }
}

#[async_trait::async_trait]
impl crate::services::tool_executor::ToolHandler for AuthManager {
    async fn handle(&self, args: Value) -> Result<Value, ToolError> {
        self.logger.debug("handle_action", args.get("action"));
        self.handle_action(args).await
    }
}
