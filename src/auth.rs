//! Allowlist of users permitted to run gated commands.
//!
//! Deny-by-default. The list lives in a JSON file that is re-read on every
//! check, so edits take effect without a restart:
//!
//! ```json
//! {"authorized_users": [{"id": 123456789, "name": "alice", "style": "dry, concise"}]}
//! ```
//!
//! A missing or malformed file yields an empty list.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::AccessError;

/// One allowlist entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthorizedUser {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// Personal rewrite style appended to every rewrite prompt.
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AllowlistFile {
    #[serde(default)]
    authorized_users: Vec<AuthorizedUser>,
}

/// Reload-on-read allowlist backed by a JSON file.
#[derive(Debug, Clone)]
pub struct Allowlist {
    path: PathBuf,
}

impl Allowlist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current list from disk.
    pub async fn load(&self) -> Vec<AuthorizedUser> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Allowlist unreadable, denying all");
                return Vec::new();
            }
        };
        parse_allowlist(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Allowlist malformed, denying all");
            Vec::new()
        })
    }

    /// Look up a user, or `None` when not authorized.
    pub async fn lookup(&self, user_id: i64) -> Option<AuthorizedUser> {
        self.load().await.into_iter().find(|u| u.id == user_id)
    }

    pub async fn is_authorized(&self, user_id: i64) -> bool {
        self.lookup(user_id).await.is_some()
    }

    /// Gate a request: the authorized entry, or `AccessError::Unauthorized`.
    pub async fn authorize(&self, user_id: i64) -> Result<AuthorizedUser, AccessError> {
        self.lookup(user_id)
            .await
            .ok_or(AccessError::Unauthorized { user_id })
    }
}

fn parse_allowlist(raw: &str) -> Result<Vec<AuthorizedUser>, serde_json::Error> {
    let file: AllowlistFile = serde_json::from_str(raw)?;
    Ok(file.authorized_users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_list(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parse_with_style() {
        let users = parse_allowlist(
            r#"{"authorized_users":[{"id":1,"name":"a","style":"terse"},{"id":2}]}"#,
        )
        .unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].style.as_deref(), Some("terse"));
        assert_eq!(users[1].name, None);
    }

    #[test]
    fn parse_missing_key_is_empty() {
        assert!(parse_allowlist("{}").unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_file_denies_all() {
        let list = Allowlist::new("/nonexistent/users.json");
        assert!(!list.is_authorized(1).await);
        assert!(matches!(
            list.authorize(1).await,
            Err(AccessError::Unauthorized { user_id: 1 })
        ));
    }

    #[tokio::test]
    async fn malformed_file_denies_all() {
        let file = write_list("{not json");
        let list = Allowlist::new(file.path());
        assert!(list.load().await.is_empty());
    }

    #[tokio::test]
    async fn edits_apply_without_reload_call() {
        let file = write_list(r#"{"authorized_users":[{"id":42}]}"#);
        let list = Allowlist::new(file.path());
        assert!(list.is_authorized(42).await);
        assert!(!list.is_authorized(7).await);

        std::fs::write(file.path(), r#"{"authorized_users":[{"id":7,"style":"warm"}]}"#)
            .unwrap();
        assert!(!list.is_authorized(42).await);
        let user = list.authorize(7).await.unwrap();
        assert_eq!(user.style.as_deref(), Some("warm"));
    }
}
