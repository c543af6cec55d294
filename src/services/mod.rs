pub mod credential_store;
pub mod lifecycle;
pub mod logger;
pub mod oauth;
pub mod patch;
pub mod presenter;
pub mod sse;
pub mod token_watch;
pub mod tool_executor;
pub mod transport;
