use crate::errors::ToolError;
use crate::managers;
use crate::rpc::catalog::tool_catalog;
use crate::services::credential_store::CredentialStore;
use crate::services::lifecycle::RequestController;
use crate::services::logger::Logger;
use crate::services::oauth::{GitLabOAuth, OAuthConfig};
use crate::services::patch::{HttpPatchSink, PatchSink, PatchSubmitter};
use crate::services::token_watch::TokenWatcher;
use crate::services::tool_executor::{ToolExecutor, ToolHandler};
use crate::services::transport::{HttpTransport, Transport};
use crate::stores::document_store::DocumentStore;
use crate::utils::paths::{resolve_credentials_path, resolve_documents_dir};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Everything `App` needs that normally comes from the environment.
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub credentials_path: PathBuf,
    pub documents_dir: PathBuf,
    /// When set, patches are POSTed to this base URL instead of the local
    /// document store.
    pub patch_remote_url: Option<String>,
    pub oauth: OAuthConfig,
    pub token_poll_interval: Duration,
    pub request_timeout: Option<Duration>,
}

fn env_ms(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

impl AppOptions {
    pub fn from_env() -> Self {
        Self {
            credentials_path: resolve_credentials_path(),
            documents_dir: resolve_documents_dir(),
            patch_remote_url: std::env::var("REQFLOW_PATCH_REMOTE_URL")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            oauth: OAuthConfig::from_env(),
            token_poll_interval: env_ms("REQFLOW_TOKEN_POLL_MS").unwrap_or(Duration::from_millis(
                crate::constants::credentials::TOKEN_POLL_INTERVAL_MS,
            )),
            request_timeout: env_ms("REQFLOW_REQUEST_TIMEOUT_MS"),
        }
    }
}

pub struct App {
    pub logger: Logger,
    pub credential_store: Arc<CredentialStore>,
    pub token_watcher: Arc<TokenWatcher>,
    pub oauth: Arc<GitLabOAuth>,
    pub controller: Arc<RequestController>,
    pub patch_submitter: Arc<PatchSubmitter>,
    pub documents: Option<DocumentStore>,
    pub tool_executor: Arc<ToolExecutor>,
    watcher_task: JoinHandle<()>,
}

impl App {
    fn validate_tool_wiring(handlers: &HashMap<String, Arc<dyn ToolHandler>>) -> Result<(), ToolError> {
        let mut missing: Vec<String> = tool_catalog()
            .iter()
            .filter(|tool| !handlers.contains_key(&tool.name))
            .map(|tool| tool.name.clone())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        Err(ToolError::internal("Tool wiring is incomplete")
            .with_hint("Every tool in tool_catalog.json must have a handler.")
            .with_details(serde_json::json!({ "missing_tools": missing })))
    }

    pub fn initialize() -> Result<Self, ToolError> {
        Self::with_options(AppOptions::from_env())
    }

    /// Must be called inside a Tokio runtime; the token watcher is spawned here.
    pub fn with_options(options: AppOptions) -> Result<Self, ToolError> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);
        Self::with_transport(options, transport)
    }

    pub fn with_transport(options: AppOptions, transport: Arc<dyn Transport>) -> Result<Self, ToolError> {
        let logger = Logger::new("reqflow");

        let credential_store = Arc::new(CredentialStore::with_path(
            logger.clone(),
            options.credentials_path.clone(),
        ));
        let token_watcher = Arc::new(TokenWatcher::new(
            logger.clone(),
            credential_store.clone(),
            options.token_poll_interval,
        ));
        let oauth = Arc::new(GitLabOAuth::new(
            logger.clone(),
            options.oauth.clone(),
            credential_store.clone(),
        )?);
        let controller = Arc::new(RequestController::new(
            logger.clone(),
            transport,
            options.request_timeout,
        ));

        let (sink, documents): (Arc<dyn PatchSink>, Option<DocumentStore>) =
            match &options.patch_remote_url {
                Some(url) => (Arc::new(HttpPatchSink::new(url.clone())?), None),
                None => {
                    let store = DocumentStore::with_dir(options.documents_dir.clone());
                    (Arc::new(store.clone()), Some(store))
                }
            };
        let patch_submitter = Arc::new(PatchSubmitter::new(logger.clone(), sink));

        let request_manager = Arc::new(managers::request::RequestManager::new(
            logger.clone(),
            controller.clone(),
        ));
        let auth_manager = Arc::new(managers::auth::AuthManager::new(
            logger.clone(),
            oauth.clone(),
            token_watcher.clone(),
        ));
        let patch_manager = Arc::new(managers::patch::PatchManager::new(
            logger.clone(),
            patch_submitter.clone(),
            documents.clone(),
        ));

        let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
        handlers.insert("request".to_string(), request_manager);
        handlers.insert("gitlab_auth".to_string(), auth_manager);
        handlers.insert("patch".to_string(), patch_manager);
        Self::validate_tool_wiring(&handlers)?;

        let tool_executor = Arc::new(ToolExecutor::new(logger.clone(), handlers));
        let watcher_task = token_watcher.spawn();

        logger.info(
            "initialized",
            Some(&serde_json::json!({
                "credentials": credential_store.path(),
                "documents": documents.as_ref().map(|d| d.dir().to_path_buf()),
                "patch_remote": options.patch_remote_url,
                "gitlab": options.oauth.api_url,
            })),
        );

        Ok(Self {
            logger,
            credential_store,
            token_watcher,
            oauth,
            controller,
            patch_submitter,
            documents,
            tool_executor,
            watcher_task,
        })
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.watcher_task.abort();
    }
}
