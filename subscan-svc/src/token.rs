//! Token provider seam
//!
//! The scanner never owns OAuth mechanics: a `TokenProvider` hands it a
//! usable access token per session or it fails the session with
//! `MISSING_TOKEN`. The in-memory implementation holds tokens captured at
//! scan start; encryption at rest and refresh exchanges live behind this
//! trait in deployments that need them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OAuth material captured from the start request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthTokens {
    /// The access token, if it is still worth presenting to the provider
    ///
    /// An expired token with no refresh token is unusable; an expired token
    /// WITH a refresh token is presented anyway and the provider's 401 routes
    /// through the refresh seam.
    pub fn usable_access_token(&self) -> Option<&str> {
        if self.access_token.trim().is_empty() {
            return None;
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= Utc::now() && self.refresh_token.is_none() {
                return None;
            }
        }
        Some(&self.access_token)
    }
}

/// Pluggable per-session token source
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn tokens_for(&self, session_id: Uuid) -> Option<OAuthTokens>;
    async fn store(&self, session_id: Uuid, tokens: OAuthTokens);
    async fn forget(&self, session_id: Uuid);
}

/// In-memory token store keyed by session id
#[derive(Default)]
pub struct MemoryTokenProvider {
    inner: DashMap<Uuid, OAuthTokens>,
}

impl MemoryTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenProvider for MemoryTokenProvider {
    async fn tokens_for(&self, session_id: Uuid) -> Option<OAuthTokens> {
        self.inner.get(&session_id).map(|t| t.clone())
    }

    async fn store(&self, session_id: Uuid, tokens: OAuthTokens) {
        self.inner.insert(session_id, tokens);
    }

    async fn forget(&self, session_id: Uuid) {
        self.inner.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_store_and_fetch() {
        let provider = MemoryTokenProvider::new();
        let id = Uuid::new_v4();
        provider
            .store(
                id,
                OAuthTokens {
                    access_token: "at".to_string(),
                    refresh_token: None,
                    expires_at: None,
                },
            )
            .await;

        let tokens = provider.tokens_for(id).await.unwrap();
        assert_eq!(tokens.usable_access_token(), Some("at"));

        provider.forget(id).await;
        assert!(provider.tokens_for(id).await.is_none());
    }

    #[test]
    fn test_expired_without_refresh_is_unusable() {
        let tokens = OAuthTokens {
            access_token: "at".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() - Duration::hours(1)),
        };
        assert_eq!(tokens.usable_access_token(), None);
    }

    #[test]
    fn test_expired_with_refresh_is_presented() {
        let tokens = OAuthTokens {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: Some(Utc::now() - Duration::hours(1)),
        };
        assert_eq!(tokens.usable_access_token(), Some("at"));
    }

    #[test]
    fn test_blank_token_is_unusable() {
        let tokens = OAuthTokens {
            access_token: "  ".to_string(),
            refresh_token: None,
            expires_at: None,
        };
        assert_eq!(tokens.usable_access_token(), None);
    }
}
