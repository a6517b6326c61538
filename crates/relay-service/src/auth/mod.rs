//! Viewer authentication.
//!
//! Credential verification sits behind the `Authenticator` trait. The relay
//! ships `StaticTokenAuthenticator`, which checks bearer tokens against the
//! configured `user:token` list.

use crate::config::ViewerCredential;
use async_trait::async_trait;
use common::secret::constant_time_eq;
use common::types::UserIdentity;
use thiserror::Error;

/// Authentication failures. Messages are safe to return to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingCredentials,

    #[error("Invalid or expired token")]
    InvalidToken,
}

/// Resolves a presented credential to a user identity.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<UserIdentity, AuthError>;
}

/// Authenticator backed by a fixed token list.
pub struct StaticTokenAuthenticator {
    credentials: Vec<ViewerCredential>,
}

impl StaticTokenAuthenticator {
    pub fn new(credentials: Vec<ViewerCredential>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserIdentity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        // Compare against every entry so timing does not reveal the position
        let mut matched = None;
        for credential in &self.credentials {
            if constant_time_eq(token, &credential.token) && matched.is_none() {
                matched = Some(credential.user.clone());
            }
        }

        matched.ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::SecretString;

    fn authenticator() -> StaticTokenAuthenticator {
        StaticTokenAuthenticator::new(vec![
            ViewerCredential {
                user: UserIdentity::new("alice").unwrap(),
                token: SecretString::from("alice-token"),
            },
            ViewerCredential {
                user: UserIdentity::new("bob").unwrap(),
                token: SecretString::from("bob-token"),
            },
        ])
    }

    #[tokio::test]
    async fn test_valid_token_resolves_identity() {
        let auth = authenticator();
        assert_eq!(auth.authenticate("bob-token").await.unwrap().as_str(), "bob");
        assert_eq!(
            auth.authenticate("alice-token").await.unwrap().as_str(),
            "alice"
        );
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let auth = authenticator();
        assert_eq!(
            auth.authenticate("alice-token2").await,
            Err(AuthError::InvalidToken)
        );
        assert_eq!(
            auth.authenticate("ALICE-TOKEN").await,
            Err(AuthError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn test_empty_token_is_missing() {
        let auth = authenticator();
        assert_eq!(
            auth.authenticate("").await,
            Err(AuthError::MissingCredentials)
        );
    }
}
