pub mod auth;
pub mod patch;
pub mod request;
