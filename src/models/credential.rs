use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Cached projection of the GitLab `/api/v4/user` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub public_email: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub commit_email: Option<String>,
    #[serde(default)]
    pub projects_limit: Option<u64>,
}

impl UserProfile {
    pub fn author_name(&self) -> &str {
        if self.username.is_empty() {
            &self.name
        } else {
            &self.username
        }
    }

    pub fn display_email(&self) -> Option<&str> {
        self.commit_email
            .as_deref()
            .or(self.public_email.as_deref())
            .or(self.email.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub state: String,
    pub code_verifier: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryCredentials {
    pub username: String,
    pub token: String,
    pub oauth2format: String,
}

/// What a git sync setup form submits once the user is signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySettings {
    pub uri: String,
    pub author: RepositoryAuthor,
    pub credentials: RepositoryCredentials,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_name_falls_back_to_name() {
        let profile = UserProfile {
            id: 1,
            name: "Ada Lovelace".to_string(),
            ..Default::default()
        };
        assert_eq!(profile.author_name(), "Ada Lovelace");
    }

    #[test]
    fn display_email_prefers_commit_email() {
        let profile: UserProfile = serde_json::from_value(serde_json::json!({
            "id": 7,
            "username": "ada",
            "name": "Ada",
            "public_email": "public@example.com",
            "email": "private@example.com",
            "commit_email": "commits@example.com"
        }))
        .expect("profile");
        assert_eq!(profile.display_email(), Some("commits@example.com"));

        let profile: UserProfile =
            serde_json::from_value(serde_json::json!({"id": 7, "email": "private@example.com"}))
                .expect("profile");
        assert_eq!(profile.display_email(), Some("private@example.com"));
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let mut credential = Credential::bearer("t");
        assert!(!credential.is_expired(now));
        credential.expires_at = Some(now);
        assert!(credential.is_expired(now));
    }
}
