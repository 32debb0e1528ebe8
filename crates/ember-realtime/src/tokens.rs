//! Token stores.

use std::path::PathBuf;

use async_trait::async_trait;
use ember_core::{AuthToken, ServiceError};
use tracing::debug;

use crate::collaborators::AuthTokenStore;

/// Environment variable read by [`EnvTokenStore::default`].
pub const AUTH_TOKEN_ENV: &str = "EMBER_AUTH_TOKEN";

/// A fixed token, or none.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenStore {
    token: Option<AuthToken>,
}

impl StaticTokenStore {
    /// Store holding `token`.
    pub fn new(token: impl Into<AuthToken>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Logged-out store.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthTokenStore for StaticTokenStore {
    async fn get_token(&self) -> Result<Option<AuthToken>, ServiceError> {
        Ok(self.token.clone())
    }
}

/// Reads the token from an environment variable on every call.
#[derive(Clone, Debug)]
pub struct EnvTokenStore {
    var: String,
}

impl EnvTokenStore {
    /// Store reading `var`.
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvTokenStore {
    fn default() -> Self {
        Self::new(AUTH_TOKEN_ENV)
    }
}

#[async_trait]
impl AuthTokenStore for EnvTokenStore {
    async fn get_token(&self) -> Result<Option<AuthToken>, ServiceError> {
        Ok(std::env::var(&self.var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(AuthToken::new))
    }
}

/// Reads a trimmed token from a file. A missing file means logged out.
#[derive(Clone, Debug)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Store reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuthTokenStore for FileTokenStore {
    async fn get_token(&self) -> Result<Option<AuthToken>, ServiceError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let token = content.trim();
                Ok((!token.is_empty()).then(|| AuthToken::new(token)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "token file not found");
                Ok(None)
            }
            Err(e) => Err(ServiceError::Storage(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_store() {
        let store = StaticTokenStore::new("abc");
        assert_eq!(store.get_token().await.unwrap().unwrap().expose(), "abc");
        assert!(StaticTokenStore::empty().get_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn env_store_unset_var_is_none() {
        let store = EnvTokenStore::new("EMBER_TEST_TOKEN_NEVER_SET_4F1C");
        assert!(store.get_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "  tok-42\n").unwrap();

        let token = FileTokenStore::new(&path).get_token().await.unwrap().unwrap();
        assert_eq!(token.expose(), "tok-42");
    }

    #[tokio::test]
    async fn file_store_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("absent"));
        assert!(store.get_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_blank_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "\n  \n").unwrap();
        assert!(FileTokenStore::new(&path).get_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_directory_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileTokenStore::new(dir.path()).get_token().await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));
    }
}
