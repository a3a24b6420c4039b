//! Session-backed bearer tokens.

mod bearer;
mod claims;
mod tokens;

pub use bearer::extract_token;
pub use claims::{AccessClaims, RefreshClaims, TokenKind};
pub use tokens::{RefreshedTokens, SessionTtlPolicy, TokenHandler, TokenPair};
