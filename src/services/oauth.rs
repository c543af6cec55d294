use crate::constants::gitlab::{
    AUTHORIZE_PATH, DEFAULT_API_URL, DEFAULT_REDIRECT_URI, INVALID_STATE, OAUTH2_FORMAT,
    PROFILE_FETCH_FALLBACK, SCOPES, TOKEN_PATH, USER_PATH,
};
use crate::constants::network::{TIMEOUT_OAUTH_MS, USER_AGENT};
use crate::errors::{ToolError, ToolErrorKind};
use crate::models::{
    Credential, PendingAuthorization, RepositoryAuthor, RepositoryCredentials,
    RepositorySettings, UserProfile,
};
use crate::services::credential_store::CredentialStore;
use crate::services::logger::Logger;
use crate::utils::redact::redact_text;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const TOKEN_ERROR_BODY_MAX: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub api_url: String,
    pub client_id: Option<String>,
    pub redirect_uri: String,
    pub timeout: Duration,
}

impl OAuthConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            client_id: None,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            timeout: Duration::from_millis(TIMEOUT_OAUTH_MS),
        }
    }

    pub fn from_env() -> Self {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::new(
            read("REQFLOW_GITLAB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        );
        config.client_id = read("REQFLOW_GITLAB_CLIENT_ID");
        if let Some(redirect) = read("REQFLOW_GITLAB_REDIRECT_URI") {
            config.redirect_uri = redirect;
        }
        config
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    SignedOut,
    AwaitingAuthorization,
    Authenticating,
    SignedIn,
}

impl AuthPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthPhase::SignedOut => "signed_out",
            AuthPhase::AwaitingAuthorization => "awaiting_authorization",
            AuthPhase::Authenticating => "authenticating",
            AuthPhase::SignedIn => "signed_in",
        }
    }
}

#[derive(Debug)]
struct FlowState {
    phase: AuthPhase,
    last_error: Option<ToolError>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_credential(self) -> Credential {
        Credential {
            token: self.access_token,
            refresh_token: self.refresh_token.filter(|v| !v.is_empty()),
            expires_at: self
                .expires_in
                .filter(|secs| *secs > 0)
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        }
    }
}

enum ProfileResponse {
    Profile(UserProfile),
    Unauthorized,
}

/// Random 32-byte PKCE verifier, base64url without padding.
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// GitLab OAuth2 (authorization code + PKCE) sign-in state machine.
pub struct GitLabOAuth {
    logger: Logger,
    config: OAuthConfig,
    store: Arc<CredentialStore>,
    client: reqwest::Client,
    state: Mutex<FlowState>,
}

impl GitLabOAuth {
    pub fn new(
        logger: Logger,
        config: OAuthConfig,
        store: Arc<CredentialStore>,
    ) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|err| ToolError::internal(format!("Failed to build HTTP client: {}", err)))?;
        let phase = match store.get()? {
            Some(_) => AuthPhase::SignedIn,
            None => AuthPhase::SignedOut,
        };
        Ok(Self {
            logger: logger.child("oauth"),
            config,
            store,
            client,
            state: Mutex::new(FlowState {
                phase,
                last_error: None,
            }),
        })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn set_phase(&self, phase: AuthPhase) {
        self.lock().phase = phase;
    }

    fn record_error(&self, err: &ToolError) {
        if err.is_dismissible() {
            self.lock().last_error = Some(err.clone());
        }
    }

    fn client_id(&self) -> Result<&str, ToolError> {
        self.config.client_id.as_deref().ok_or_else(|| {
            ToolError::invalid_params("GitLab client id is not configured")
                .with_hint("Set REQFLOW_GITLAB_CLIENT_ID to the OAuth application id.")
        })
    }

    /// The stored credential is authoritative: another process may have
    /// completed or cleared the sign-in.
    pub fn phase(&self) -> AuthPhase {
        let signed_in = matches!(self.store.get(), Ok(Some(_)));
        let mut state = self.lock();
        if signed_in {
            state.phase = AuthPhase::SignedIn;
        } else if state.phase == AuthPhase::SignedIn {
            state.phase = AuthPhase::SignedOut;
        }
        state.phase
    }

    pub fn last_error(&self) -> Option<ToolError> {
        self.lock().last_error.clone()
    }

    pub fn generate_authorization_url(&self) -> Result<String, ToolError> {
        let client_id = self.client_id()?;
        if self.phase() == AuthPhase::SignedIn {
            return Err(ToolError::conflict("Already signed in to GitLab")
                .with_hint("Sign out before starting a new authorization."));
        }

        let code_verifier = generate_code_verifier();
        let state = uuid::Uuid::new_v4().to_string();
        let mut url = url::Url::parse(&self.config.endpoint(AUTHORIZE_PATH))
            .map_err(|err| ToolError::invalid_params(format!("Invalid GitLab API URL: {}", err)))?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("state", &state)
            .append_pair("scope", SCOPES)
            .append_pair("code_challenge", &code_challenge(&code_verifier))
            .append_pair("code_challenge_method", "S256");

        self.store.set_pending_authorization(&PendingAuthorization {
            state,
            code_verifier,
            created_at: Utc::now(),
        })?;
        self.set_phase(AuthPhase::AwaitingAuthorization);
        self.logger.debug("authorization url generated", None);
        Ok(url.to_string())
    }

    pub fn begin_authentication(&self) -> Result<AuthPhase, ToolError> {
        let mut state = self.lock();
        match state.phase {
            AuthPhase::AwaitingAuthorization | AuthPhase::Authenticating => {
                state.phase = AuthPhase::Authenticating;
                Ok(state.phase)
            }
            other => Err(ToolError::conflict(format!(
                "Cannot begin authentication while {}",
                other.as_str()
            ))
            .with_hint("Generate an authorization URL first.")),
        }
    }

    pub async fn exchange_code(&self, code: &str, state: &str) -> Result<Credential, ToolError> {
        let result = self.exchange_code_inner(code, state).await;
        if let Err(err) = &result {
            self.logger.warn(
                "code exchange failed",
                Some(&serde_json::json!({"code": err.code, "message": err.message})),
            );
            self.record_error(err);
        }
        result
    }

    async fn exchange_code_inner(&self, code: &str, state: &str) -> Result<Credential, ToolError> {
        let pending = self
            .store
            .pending_authorization()?
            .filter(|pending| pending.state == state)
            .ok_or_else(|| ToolError::auth_exchange_failed(INVALID_STATE))?;
        if code.trim().is_empty() {
            return Err(ToolError::auth_exchange_failed("Authorization code is empty"));
        }
        let client_id = self.client_id()?;

        let form = [
            ("client_id", client_id),
            ("code", code.trim()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", pending.code_verifier.as_str()),
        ];
        let credential = self.request_token(&form).await?;

        self.store.take_pending_authorization()?;
        self.store.set(&credential)?;
        self.store.clear_profile()?;
        {
            let mut flow = self.lock();
            flow.phase = AuthPhase::SignedIn;
            flow.last_error = None;
        }
        self.logger.info("signed in to GitLab", None);
        Ok(credential)
    }

    /// Accepts the redirect URL pasted by the user when the callback did
    /// not reach the app.
    pub async fn exchange_from_link(&self, link: &str) -> Result<Credential, ToolError> {
        let parsed = url::Url::parse(link.trim())
            .map_err(|err| ToolError::invalid_params(format!("Invalid link: {}", err)))?;
        let mut code = None;
        let mut state = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                _ => {}
            }
        }
        match (code, state) {
            (Some(code), Some(state)) => self.exchange_code(&code, &state).await,
            _ => Err(ToolError::invalid_params(
                "Link must contain both code and state query parameters",
            )),
        }
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<Credential, ToolError> {
        let response = self
            .client
            .post(self.config.endpoint(TOKEN_PATH))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ToolError::timeout("GitLab token request timed out")
                } else {
                    ToolError::auth_exchange_failed(format!("GitLab token request failed: {}", err))
                }
            })?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ToolError::auth_exchange_failed(format!(
                "GitLab token request failed ({})",
                status.as_u16()
            ))
            .with_details(serde_json::json!({
                "status": status.as_u16(),
                "body": redact_text(&text, TOKEN_ERROR_BODY_MAX),
            })));
        }
        let payload: TokenResponse = serde_json::from_str(&text)
            .map_err(|_| ToolError::auth_exchange_failed("GitLab token response invalid"))?;
        if payload.access_token.trim().is_empty() {
            return Err(ToolError::auth_exchange_failed(
                "GitLab token response has no access_token",
            ));
        }
        Ok(payload.into_credential())
    }

    /// Any failure here ends the session.
    pub async fn refresh_token(&self) -> Result<Credential, ToolError> {
        let current = self.store.get()?;
        let Some(refresh) = current.and_then(|c| c.refresh_token) else {
            self.sign_out()?;
            return Err(ToolError::auth_expired("GitLab session expired")
                .with_hint("Sign in to GitLab again."));
        };

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        if let Some(client_id) = self.config.client_id.as_deref() {
            form.push(("client_id", client_id));
        }

        match self.request_token(&form).await {
            Ok(mut credential) => {
                if credential.refresh_token.is_none() {
                    credential.refresh_token = Some(refresh.clone());
                }
                self.store.set(&credential)?;
                self.logger.info("GitLab token refreshed", None);
                Ok(credential)
            }
            Err(err) => {
                self.logger.warn(
                    "token refresh failed, signing out",
                    Some(&serde_json::json!({"message": err.message})),
                );
                self.sign_out()?;
                Err(ToolError::auth_expired("GitLab session expired")
                    .with_hint("Sign in to GitLab again.")
                    .with_details(serde_json::json!({"cause": err.message})))
            }
        }
    }

    pub fn sign_out(&self) -> Result<(), ToolError> {
        self.store.clear()?;
        let mut flow = self.lock();
        flow.phase = AuthPhase::SignedOut;
        flow.last_error = None;
        Ok(())
    }

    pub async fn fetch_user_profile(&self) -> Result<UserProfile, ToolError> {
        let result = self.fetch_user_profile_inner().await;
        match &result {
            Ok(_) => {
                let mut flow = self.lock();
                if matches!(
                    flow.last_error.as_ref().map(|e| e.kind),
                    Some(ToolErrorKind::ProfileFetchFailed)
                ) {
                    flow.last_error = None;
                }
            }
            Err(err) => {
                self.logger.warn(
                    "profile fetch failed",
                    Some(&serde_json::json!({"code": err.code, "message": err.message})),
                );
                self.record_error(err);
            }
        }
        result
    }

    async fn fetch_user_profile_inner(&self) -> Result<UserProfile, ToolError> {
        let Some(credential) = self.store.get()? else {
            return Err(ToolError::denied("Not signed in to GitLab"));
        };
        if let Some(profile) = self.store.profile()? {
            return Ok(profile);
        }

        let profile = match self.request_profile(&credential.token).await? {
            ProfileResponse::Profile(profile) => profile,
            ProfileResponse::Unauthorized => {
                let refreshed = self.refresh_token().await?;
                match self.request_profile(&refreshed.token).await? {
                    ProfileResponse::Profile(profile) => profile,
                    ProfileResponse::Unauthorized => {
                        self.sign_out()?;
                        return Err(ToolError::auth_expired("GitLab rejected the refreshed token")
                            .with_hint("Sign in to GitLab again."));
                    }
                }
            }
        };
        self.store.set_profile(&profile)?;
        Ok(profile)
    }

    async fn request_profile(&self, token: &str) -> Result<ProfileResponse, ToolError> {
        let response = self
            .client
            .get(self.config.endpoint(USER_PATH))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| ToolError::profile_fetch_failed(err.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(ProfileResponse::Unauthorized);
        }
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let message = if text.trim().is_empty() {
                PROFILE_FETCH_FALLBACK.to_string()
            } else {
                text
            };
            return Err(ToolError::profile_fetch_failed(message)
                .with_details(serde_json::json!({"status": status.as_u16()})));
        }
        serde_json::from_str::<UserProfile>(&text)
            .map(ProfileResponse::Profile)
            .map_err(|_| ToolError::profile_fetch_failed(PROFILE_FETCH_FALLBACK))
    }

    /// Returns whether an error was showing.
    pub fn dismiss_error(&self) -> bool {
        self.lock().last_error.take().is_some()
    }

    pub async fn repository_settings(&self, uri: &str) -> Result<RepositorySettings, ToolError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(ToolError::invalid_params("uri must be a non-empty string"));
        }
        let profile = self.fetch_user_profile().await?;
        let credential = self
            .store
            .get()?
            .ok_or_else(|| ToolError::denied("Not signed in to GitLab"))?;
        Ok(RepositorySettings {
            uri: uri.to_string(),
            author: RepositoryAuthor {
                name: profile.author_name().to_string(),
                email: profile.display_email().unwrap_or_default().to_string(),
            },
            credentials: RepositoryCredentials {
                username: credential.token.clone(),
                token: credential.token,
                oauth2format: OAUTH2_FORMAT.to_string(),
            },
        })
    }

    pub fn status(&self) -> Result<Value, ToolError> {
        let phase = self.phase();
        let credential = self.store.get()?;
        let profile = self.store.profile()?;
        let pending = self.store.pending_authorization()?.is_some();
        Ok(serde_json::json!({
            "phase": phase,
            "signed_in": credential.is_some(),
            "has_refresh_token": credential.as_ref().map(|c| c.refresh_token.is_some()).unwrap_or(false),
            "expires_at": credential.as_ref().and_then(|c| c.expires_at).map(|at| at.to_rfc3339()),
            "expired": credential.as_ref().map(|c| c.is_expired(Utc::now())).unwrap_or(false),
            "pending_authorization": pending,
            "profile": profile,
            "error": self.last_error(),
            "api_url": self.config.api_url,
            "client_configured": self.config.client_id.is_some(),
        }))
    }
}
