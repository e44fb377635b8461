//! Credential store trait: the abstract interface for token persistence.

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

/// The only keys the client ever persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialKey {
    AccessToken,
    RefreshToken,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 2] = [CredentialKey::AccessToken, CredentialKey::RefreshToken];

    /// Name used as the durable key.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CredentialKey::AccessToken => "access_token",
            CredentialKey::RefreshToken => "refresh_token",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted half of a session.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl StoredTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

impl fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredTokens")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Async key/value persistence for credentials.
///
/// Implementations must make `put` and `remove` atomic over all the keys
/// they are given: a reader never observes a new access token next to a
/// stale refresh token.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read one key.
    async fn get(&self, key: CredentialKey) -> Result<Option<String>>;

    /// Write several keys at once.
    async fn put(&self, entries: &[(CredentialKey, String)]) -> Result<()>;

    /// Delete several keys at once. Missing keys are not an error.
    async fn remove(&self, keys: &[CredentialKey]) -> Result<()>;
}

/// Token-pair helpers over any [`CredentialStore`].
pub trait CredentialStoreExt: CredentialStore {
    /// Persist both tokens. A missing refresh token removes the stored one.
    fn save_tokens(
        &self,
        tokens: &StoredTokens,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Load the persisted pair, if an access token is present.
    fn load_tokens(&self) -> impl std::future::Future<Output = Result<Option<StoredTokens>>> + Send;

    /// Remove both tokens.
    fn clear_tokens(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl<S: CredentialStore + ?Sized> CredentialStoreExt for S {
    async fn save_tokens(&self, tokens: &StoredTokens) -> Result<()> {
        match &tokens.refresh_token {
            Some(refresh) => {
                self.put(&[
                    (CredentialKey::AccessToken, tokens.access_token.clone()),
                    (CredentialKey::RefreshToken, refresh.clone()),
                ])
                .await
            }
            None => {
                self.remove(&[CredentialKey::RefreshToken]).await?;
                self.put(&[(CredentialKey::AccessToken, tokens.access_token.clone())])
                    .await
            }
        }
    }

    async fn load_tokens(&self) -> Result<Option<StoredTokens>> {
        let Some(access_token) = self.get(CredentialKey::AccessToken).await? else {
            return Ok(None);
        };
        let refresh_token = self.get(CredentialKey::RefreshToken).await?;
        Ok(Some(StoredTokens {
            access_token,
            refresh_token,
        }))
    }

    async fn clear_tokens(&self) -> Result<()> {
        self.remove(&CredentialKey::ALL).await
    }
}
