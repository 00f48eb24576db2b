//! Credential sources for claims-based authentication
//!
//! The handshake never issues tokens itself. It either forwards a
//! pre-computed shared access signature or asks a [`TokenProvider`] for a
//! fresh token when the CBS links come up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope requested from token providers for IoT hub service access.
pub const IOTHUB_PUBLIC_SCOPE: &str = "https://iothubs.azure.net/.default";

/// The claims flavor a token is presented as on the CBS node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CbsAuthorizationType {
    SharedAccessSignature,
    JsonWebToken,
}

impl CbsAuthorizationType {
    /// Token type string carried in the `put-token` request.
    pub fn token_type(&self) -> &'static str {
        match self {
            Self::SharedAccessSignature => "servicebus.windows.net:sastoken",
            Self::JsonWebToken => "jwt",
        }
    }
}

/// A token issued by a [`TokenProvider`].
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of bearer tokens for token-credential mode.
///
/// Called from inside the handshake event loop, so implementations should
/// return quickly (typically from a cache they refresh elsewhere).
pub trait TokenProvider: Send + Sync {
    fn get_token(
        &self,
        scopes: &[&str],
    ) -> Result<AccessToken, Box<dyn std::error::Error + Send + Sync>>;
}

/// A provider that always hands out the same token.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: AccessToken {
                token: token.into(),
                expires_at,
            },
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn get_token(
        &self,
        _scopes: &[&str],
    ) -> Result<AccessToken, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.token.clone())
    }
}

/// Read the expiry (`se=` field) out of a shared access signature.
///
/// Returns None when the token carries no parseable expiry.
pub fn sas_expiry(sas_token: &str) -> Option<DateTime<Utc>> {
    let body = sas_token
        .strip_prefix("SharedAccessSignature ")
        .unwrap_or(sas_token);

    body.split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == "se")
        .and_then(|(_, value)| value.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
