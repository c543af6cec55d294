pub mod network {
    pub const USER_AGENT: &str = "reqflow/0.3";
    pub const TIMEOUT_OAUTH_MS: u64 = 15_000;
    pub const MAX_REDIRECTS: usize = 10;
}

pub mod credentials {
    pub const TOKEN_POLL_INTERVAL_MS: u64 = 500;
    pub const TOKEN_KEY: &str = "gitlab-oauth-token";
    pub const REFRESH_TOKEN_KEY: &str = "gitlab-oauth-refresh-token";
    pub const EXPIRES_AT_KEY: &str = "gitlab-oauth-expires-at";
    pub const USER_KEY: &str = "gitlab-user-info";
    pub const STATE_KEY: &str = "gitlab-oauth-state";
}

pub mod gitlab {
    pub const DEFAULT_API_URL: &str = "https://gitlab.com";
    pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:4333/oauth/gitlab";
    pub const SCOPES: &str = "api read_user write_repository read_repository email";
    pub const AUTHORIZE_PATH: &str = "/oauth/authorize";
    pub const TOKEN_PATH: &str = "/oauth/token";
    pub const USER_PATH: &str = "/api/v4/user";
    pub const OAUTH2_FORMAT: &str = "gitlab";
    pub const PROFILE_FETCH_FALLBACK: &str =
        "Something went wrong when trying to fetch info from GitLab.";
    pub const INVALID_STATE: &str =
        "Invalid state parameter. It looks like the authorization flow was not initiated by the app.";
}

pub mod lifecycle {
    pub const CANCELLED_MESSAGE: &str = "Request was cancelled";
    pub const EVENT_STREAM_MIME: &str = "text/event-stream";
    pub const MAX_STREAM_EVENTS: usize = 1_000;
}

pub mod patch {
    pub const CONTENT_BUCKET: &str = "content";
    pub const META_BUCKET: &str = "meta";
    pub const SETTINGS_BUCKET: &str = "settings";
    pub const SETTINGS_ID: &str = "settings";
}

pub mod protocols {
    pub const ALLOWED_HTTP: &[&str] = &["http:", "https:"];
}
