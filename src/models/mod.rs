mod credential;
mod execution;
mod request;
mod response;

pub use credential::{
    Credential, PendingAuthorization, RepositoryAuthor, RepositoryCredentials,
    RepositorySettings, UserProfile,
};
pub use execution::{ExecutionState, StreamEvent, TimelineEntry, TimelineKind};
pub use request::{NameValue, RequestAuth, RequestBody, RequestHeader, RequestKind, StoredRequest};
pub use response::{Response, ResponseHeader};
