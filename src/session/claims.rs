//! Claim sets carried inside signed tokens.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Distinguishes the two claim sets so one can never stand in for the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims of a short-lived access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject the token was issued to
    pub sub: String,
    /// Session the token belongs to
    pub sid: Uuid,
    /// Issued at, Unix seconds
    pub iat: i64,
    /// Expires at, Unix seconds
    pub exp: i64,
    /// Client fingerprint captured at issuance (the `User-Agent`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fpt: Option<String>,
    pub typ: TokenKind,
}

/// Claims of a long-lived refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub sid: Uuid,
    pub exp: i64,
    /// Login fingerprint, copied into every access token minted from this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fpt: Option<String>,
    pub typ: TokenKind,
}
