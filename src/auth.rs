//! Token lifecycle management and Gmail API initialization
//!
//! The access token has exactly one owner: the [`TokenProvider`]. The engine
//! never caches or mutates token state itself, it only reads a snapshot or
//! requests a refresh, which keeps two code paths from refreshing the token
//! independently and racing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Gmail API scopes required for bulk cleanup operations
///
/// - gmail.modify: search and batch label/trash mutations
/// - gmail.settings.basic: filter creation
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.settings.basic",
];

/// Type alias for the Gmail hub to simplify signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

type Authenticator = yup_oauth2::authenticator::Authenticator<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
>;

/// Snapshot of the current access credential
///
/// The engine reads `expires_at` to decide whether a refresh is due before
/// the next batch; it never persists the value.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Time left before the token expires; `Duration::MAX` when the provider
    /// did not report an expiry
    pub fn remaining_lifetime(&self) -> Duration {
        match self.expires_at {
            Some(expires_at) => {
                let secs = (expires_at - Utc::now()).num_seconds();
                if secs <= 0 {
                    Duration::ZERO
                } else {
                    Duration::from_secs(secs as u64)
                }
            }
            None => Duration::MAX,
        }
    }
}

/// Credential lifecycle collaborator
///
/// `force_refresh` failing is terminal for the running job: it maps to
/// [`EngineError::ReauthRequired`] and is never retried silently, because a
/// retry against a revoked refresh token only burns quota and misleads the
/// user.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a currently valid token, refreshing lazily if the cached one
    /// already expired
    async fn acquire(&self) -> Result<AccessToken>;

    /// Unconditionally exchange the refresh token for a new access token
    async fn force_refresh(&self) -> Result<AccessToken>;

    /// Remaining lifetime of the current token
    async fn remaining_lifetime(&self) -> Duration;
}

/// Production token provider backed by a yup-oauth2 authenticator
///
/// Shares the authenticator with the Gmail hub (see [`initialize_gmail`]), so
/// hub calls and explicit refreshes go through the same token cache.
pub struct OauthTokenProvider {
    auth: Authenticator,
}

impl OauthTokenProvider {
    pub fn new(auth: Authenticator) -> Self {
        Self { auth }
    }

    fn convert(token: yup_oauth2::AccessToken) -> Result<AccessToken> {
        let value = token
            .token()
            .ok_or_else(|| EngineError::Auth("authenticator returned no token".to_string()))?
            .to_string();
        let expires_at = token
            .expiration_time()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.unix_timestamp(), 0));
        Ok(AccessToken { value, expires_at })
    }
}

#[async_trait]
impl TokenProvider for OauthTokenProvider {
    async fn acquire(&self) -> Result<AccessToken> {
        let token = self
            .auth
            .token(REQUIRED_SCOPES)
            .await
            .map_err(|e| EngineError::Auth(format!("Failed to obtain token: {}", e)))?;
        Self::convert(token)
    }

    async fn force_refresh(&self) -> Result<AccessToken> {
        let token = self
            .auth
            .force_refreshed_token(REQUIRED_SCOPES)
            .await
            .map_err(|e| EngineError::ReauthRequired(format!("Token refresh refused: {}", e)))?;
        Self::convert(token)
    }

    async fn remaining_lifetime(&self) -> Duration {
        match self.acquire().await {
            Ok(token) => token.remaining_lifetime(),
            Err(_) => Duration::ZERO,
        }
    }
}

/// Initialize the Gmail hub and the token provider off one shared
/// authenticator
///
/// Uses the desktop InstalledFlow with token persistence, the same way the
/// credential store hands tokens to the rest of the product.
pub async fn initialize_gmail(
    credentials_path: &Path,
    token_cache_path: &Path,
) -> Result<(GmailHub, OauthTokenProvider)> {
    let secret = yup_oauth2::read_application_secret(credentials_path)
        .await
        .map_err(|e| EngineError::Auth(format!("Failed to read credentials: {}", e)))?;

    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| EngineError::Auth(format!("Failed to build authenticator: {}", e)))?;

    // Pre-authenticate so the token is cached with the right scopes before
    // any batch work starts
    auth.token(REQUIRED_SCOPES)
        .await
        .map_err(|e| EngineError::Auth(format!("Failed to obtain token: {}", e)))?;

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| EngineError::Auth(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    let hub = Gmail::new(client, auth.clone());
    Ok((hub, OauthTokenProvider::new(auth)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_lifetime_future_expiry() {
        let token = AccessToken {
            value: "tok".to_string(),
            expires_at: Some(Utc::now() + chrono::Duration::seconds(600)),
        };
        let remaining = token.remaining_lifetime();
        assert!(remaining <= Duration::from_secs(600));
        assert!(remaining >= Duration::from_secs(595));
    }

    #[test]
    fn test_remaining_lifetime_expired_token_is_zero() {
        let token = AccessToken {
            value: "tok".to_string(),
            expires_at: Some(Utc::now() - chrono::Duration::seconds(30)),
        };
        assert_eq!(token.remaining_lifetime(), Duration::ZERO);
    }

    #[test]
    fn test_remaining_lifetime_without_expiry() {
        let token = AccessToken {
            value: "tok".to_string(),
            expires_at: None,
        };
        assert_eq!(token.remaining_lifetime(), Duration::MAX);
    }
}
