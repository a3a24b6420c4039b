//! Session-backed access/refresh token handling.
//!
//! A login creates a session record in the shared store and two signed
//! tokens that name it. A token is only honoured while its session record
//! exists, so deleting the record revokes every token derived from the login
//! no matter how long those tokens have left to live.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::claims::{AccessClaims, RefreshClaims, TokenKind};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::AuthError;
use crate::store::SharedStore;

const ALGORITHM: Algorithm = Algorithm::HS512;

/// What a refresh does to the session record's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTtlPolicy {
    /// The session lives as long as the login that created it
    #[default]
    Fixed,
    /// Each refresh re-arms the session for a full refresh lifetime and
    /// rotates the refresh token to match, so an active client stays logged
    /// in indefinitely
    Renew,
}

/// Tokens handed out at login.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
}

/// Result of a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Replacement refresh token, only under [`SessionTtlPolicy::Renew`]
    pub refresh_token: Option<String>,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Issues, verifies, refreshes and revokes session tokens.
pub struct TokenHandler {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    access_keys: SigningKeys,
    refresh_keys: SigningKeys,
    access_ttl: Duration,
    refresh_ttl: Duration,
    key_prefix: String,
    ttl_policy: SessionTtlPolicy,
}

impl TokenHandler {
    /// Create a handler from the session configuration.
    pub fn new(config: &SessionConfig, store: Arc<dyn SharedStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a handler that reads time from the given clock.
    pub fn with_clock(
        config: &SessionConfig,
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            access_keys: SigningKeys::from_secret(&config.access_signing_key),
            refresh_keys: SigningKeys::from_secret(&config.refresh_signing_key),
            access_ttl: config.access_ttl(),
            refresh_ttl: config.refresh_ttl(),
            key_prefix: config.key_prefix.clone(),
            ttl_policy: config.refresh_ttl_policy,
        }
    }

    /// Start a session for `subject_id` and mint its token pair.
    ///
    /// `fingerprint` is recorded in both tokens when present; refreshed
    /// access tokens inherit it from the refresh token.
    pub async fn issue_login_tokens(
        &self,
        subject_id: &str,
        fingerprint: Option<&str>,
    ) -> Result<TokenPair, AuthError> {
        let session_id = Uuid::new_v4();

        self.store
            .set_ex(&self.session_key(&session_id), subject_id, self.refresh_ttl)
            .await?;

        let access_token = self.mint_access(subject_id, session_id, fingerprint)?;
        let refresh_token = self.mint_refresh(subject_id, session_id, fingerprint)?;

        info!(subject_id = %subject_id, session_id = %session_id, "Session started");

        Ok(TokenPair {
            access_token,
            refresh_token,
            session_id,
        })
    }

    /// Check an access token's signature, expiry and session liveness.
    pub async fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let claims: AccessClaims = self.decode(token, &self.access_keys)?;
        if claims.typ != TokenKind::Access {
            return Err(AuthError::TokenInvalid);
        }
        self.check_expiry(claims.exp)?;
        self.check_session(&claims.sid).await?;
        Ok(claims)
    }

    /// Mint a fresh access token for the session named by a refresh token.
    ///
    /// The session id and the login fingerprint are kept. With
    /// [`SessionTtlPolicy::Fixed`] the session record's TTL is left untouched;
    /// with [`SessionTtlPolicy::Renew`] it is re-armed and a new refresh token
    /// expiring together with it is returned as well.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, AuthError> {
        let claims: RefreshClaims = self.decode(refresh_token, &self.refresh_keys)?;
        if claims.typ != TokenKind::Refresh {
            return Err(AuthError::TokenInvalid);
        }
        self.check_expiry(claims.exp)?;

        let rotated = match self.ttl_policy {
            SessionTtlPolicy::Fixed => {
                self.check_session(&claims.sid).await?;
                None
            }
            SessionTtlPolicy::Renew => {
                // Re-arming fails on an absent record, which doubles as the liveness check
                let renewed = self
                    .store
                    .expire(&self.session_key(&claims.sid), self.refresh_ttl)
                    .await?;
                if !renewed {
                    return Err(AuthError::SessionNotFound);
                }
                Some(self.mint_refresh(&claims.sub, claims.sid, claims.fpt.as_deref())?)
            }
        };

        let access_token = self.mint_access(&claims.sub, claims.sid, claims.fpt.as_deref())?;
        debug!(
            session_id = %claims.sid,
            rotated = rotated.is_some(),
            "Access token refreshed"
        );
        Ok(RefreshedTokens {
            access_token,
            refresh_token: rotated,
        })
    }

    /// End a session. Revoking an absent session succeeds.
    pub async fn revoke_session(&self, session_id: &Uuid) -> Result<(), AuthError> {
        let existed = self.store.del(&self.session_key(session_id)).await?;
        info!(session_id = %session_id, existed, "Session revoked");
        Ok(())
    }

    /// Access token lifetime.
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    fn mint_access(
        &self,
        subject_id: &str,
        session_id: Uuid,
        fingerprint: Option<&str>,
    ) -> Result<String, AuthError> {
        let now = self.clock.now_secs();
        let claims = AccessClaims {
            sub: subject_id.to_string(),
            sid: session_id,
            iat: now,
            exp: now + ttl_secs(self.access_ttl),
            fpt: fingerprint.map(str::to_string),
            typ: TokenKind::Access,
        };

        encode(&Header::new(ALGORITHM), &claims, &self.access_keys.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    fn mint_refresh(
        &self,
        subject_id: &str,
        session_id: Uuid,
        fingerprint: Option<&str>,
    ) -> Result<String, AuthError> {
        let claims = RefreshClaims {
            sub: subject_id.to_string(),
            sid: session_id,
            exp: self.clock.now_secs() + ttl_secs(self.refresh_ttl),
            fpt: fingerprint.map(str::to_string),
            typ: TokenKind::Refresh,
        };

        encode(&Header::new(ALGORITHM), &claims, &self.refresh_keys.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, token: &str, keys: &SigningKeys) -> Result<T, AuthError> {
        if token.is_empty() {
            return Err(AuthError::TokenMissing);
        }

        // Expiry is checked against our own clock after the signature
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["exp".to_string(), "sub".to_string()]);

        decode::<T>(token, &keys.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Token rejected");
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::TokenInvalid,
                }
            })
    }

    fn check_expiry(&self, exp: i64) -> Result<(), AuthError> {
        if exp <= self.clock.now_secs() {
            return Err(AuthError::TokenExpired);
        }
        Ok(())
    }

    async fn check_session(&self, session_id: &Uuid) -> Result<(), AuthError> {
        if self.store.exists(&self.session_key(session_id)).await? {
            Ok(())
        } else {
            Err(AuthError::SessionNotFound)
        }
    }

    fn session_key(&self, session_id: &Uuid) -> String {
        format!("{}:{}", self.key_prefix, session_id)
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn session_config() -> SessionConfig {
        SessionConfig {
            access_ttl_secs: 30 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            access_signing_key: "access-signing-key-for-tests".to_string(),
            refresh_signing_key: "refresh-signing-key-for-tests".to_string(),
            ..SessionConfig::default()
        }
    }

    fn handler_with(config: SessionConfig) -> (TokenHandler, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let handler = TokenHandler::with_clock(&config, store.clone(), clock.clone());
        (handler, clock, store)
    }

    fn handler() -> (TokenHandler, Arc<ManualClock>, Arc<MemoryStore>) {
        handler_with(session_config())
    }

    #[tokio::test]
    async fn test_login_tokens_verify() {
        let (handler, _, _) = handler();
        let pair = handler.issue_login_tokens("42", Some("curl/8.0")).await.unwrap();

        let claims = handler.verify_access_token(&pair.access_token).await.unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.sid, pair.session_id);
        assert_eq!(claims.fpt.as_deref(), Some("curl/8.0"));
        assert_eq!(claims.exp - claims.iat, 30 * 60);
    }

    #[tokio::test]
    async fn test_empty_token_is_missing() {
        let (handler, _, _) = handler();
        assert_eq!(
            handler.verify_access_token("").await,
            Err(AuthError::TokenMissing)
        );
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid() {
        let (handler, _, _) = handler();
        assert_eq!(
            handler.verify_access_token("not.a.token").await,
            Err(AuthError::TokenInvalid)
        );
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_an_access_token() {
        let (handler, _, _) = handler();
        let pair = handler.issue_login_tokens("42", None).await.unwrap();

        assert_eq!(
            handler.verify_access_token(&pair.refresh_token).await,
            Err(AuthError::TokenInvalid)
        );
        assert_eq!(
            handler.refresh_access_token(&pair.access_token).await,
            Err(AuthError::TokenInvalid)
        );
    }

    #[tokio::test]
    async fn test_token_from_other_key_is_invalid() {
        let (handler, _, _) = handler();
        let mut other_config = session_config();
        other_config.access_signing_key = "someone-elses-key".to_string();
        let (other, _, _) = handler_with(other_config);

        let pair = other.issue_login_tokens("42", None).await.unwrap();
        assert_eq!(
            handler.verify_access_token(&pair.access_token).await,
            Err(AuthError::TokenInvalid)
        );
    }

    #[tokio::test]
    async fn test_expired_access_token_recovers_through_refresh() {
        let (handler, clock, _) = handler();
        let pair = handler.issue_login_tokens("42", None).await.unwrap();

        clock.advance(Duration::from_secs(31 * 60));
        assert_eq!(
            handler.verify_access_token(&pair.access_token).await,
            Err(AuthError::TokenExpired)
        );

        let fresh = handler
            .refresh_access_token(&pair.refresh_token)
            .await
            .unwrap()
            .access_token;
        let claims = handler.verify_access_token(&fresh).await.unwrap();
        assert_eq!(claims.sid, pair.session_id);
    }

    #[tokio::test]
    async fn test_repeated_refresh_keeps_session_id() {
        let (handler, clock, _) = handler();
        let pair = handler.issue_login_tokens("42", None).await.unwrap();

        let mut issued = Vec::new();
        for _ in 0..5 {
            clock.advance(Duration::from_secs(60));
            issued.push(
                handler
                    .refresh_access_token(&pair.refresh_token)
                    .await
                    .unwrap()
                    .access_token,
            );
        }

        for token in &issued {
            let claims = handler.verify_access_token(token).await.unwrap();
            assert_eq!(claims.sid, pair.session_id);
        }
    }

    #[tokio::test]
    async fn test_revocation_is_final() {
        let (handler, clock, _) = handler();
        let pair = handler.issue_login_tokens("42", None).await.unwrap();
        clock.advance(Duration::from_secs(60));
        let refreshed = handler
            .refresh_access_token(&pair.refresh_token)
            .await
            .unwrap()
            .access_token;

        handler.revoke_session(&pair.session_id).await.unwrap();

        for token in [&pair.access_token, &refreshed] {
            assert_eq!(
                handler.verify_access_token(token).await,
                Err(AuthError::SessionNotFound)
            );
        }
        assert_eq!(
            handler.refresh_access_token(&pair.refresh_token).await,
            Err(AuthError::SessionNotFound)
        );
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (handler, _, _) = handler();
        let pair = handler.issue_login_tokens("42", None).await.unwrap();

        assert!(handler.revoke_session(&pair.session_id).await.is_ok());
        assert!(handler.revoke_session(&pair.session_id).await.is_ok());
        assert!(handler.revoke_session(&Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoking_one_session_leaves_others() {
        let (handler, _, _) = handler();
        let first = handler.issue_login_tokens("42", None).await.unwrap();
        let second = handler.issue_login_tokens("42", None).await.unwrap();

        handler.revoke_session(&first.session_id).await.unwrap();
        assert!(handler.verify_access_token(&second.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_fixed_policy_session_ends_with_login_lifetime() {
        let mut config = session_config();
        config.access_ttl_secs = 60;
        config.refresh_ttl_secs = 600;
        let (handler, clock, _) = handler_with(config);
        let pair = handler.issue_login_tokens("42", None).await.unwrap();

        clock.advance(Duration::from_secs(500));
        handler
            .refresh_access_token(&pair.refresh_token)
            .await
            .unwrap();

        // Refreshing did not extend the session past the original 600s
        clock.advance(Duration::from_secs(99));
        let late = handler
            .refresh_access_token(&pair.refresh_token)
            .await
            .unwrap()
            .access_token;
        clock.advance(Duration::from_secs(1));
        assert_eq!(
            handler.verify_access_token(&late).await,
            Err(AuthError::SessionNotFound)
        );
    }

    #[tokio::test]
    async fn test_renew_policy_extends_session() {
        let mut config = session_config();
        config.access_ttl_secs = 60;
        config.refresh_ttl_secs = 600;
        config.refresh_ttl_policy = SessionTtlPolicy::Renew;
        let (handler, clock, store) = handler_with(config);
        let pair = handler.issue_login_tokens("42", None).await.unwrap();

        clock.advance(Duration::from_secs(500));
        let refreshed = handler
            .refresh_access_token(&pair.refresh_token)
            .await
            .unwrap();
        let rotated = refreshed.refresh_token.expect("renew rotates the refresh token");

        // Past the original 600s the session record is still there
        clock.advance(Duration::from_secs(200));
        let key = format!("users:ssid:{}", pair.session_id);
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some("42".to_string()));

        // The login refresh token has expired, the rotated one keeps working
        assert_eq!(
            handler.refresh_access_token(&pair.refresh_token).await,
            Err(AuthError::TokenExpired)
        );
        let again = handler.refresh_access_token(&rotated).await.unwrap();
        let claims = handler.verify_access_token(&again.access_token).await.unwrap();
        assert_eq!(claims.sid, pair.session_id);
    }

    #[tokio::test]
    async fn test_fixed_policy_keeps_refresh_token() {
        let (handler, _, _) = handler();
        let pair = handler.issue_login_tokens("42", None).await.unwrap();

        let refreshed = handler
            .refresh_access_token(&pair.refresh_token)
            .await
            .unwrap();
        assert_eq!(refreshed.refresh_token, None);
    }

    #[tokio::test]
    async fn test_refresh_keeps_login_fingerprint() {
        let (handler, clock, _) = handler();
        let pair = handler
            .issue_login_tokens("42", Some("agent/1.0"))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(31 * 60));
        let refreshed = handler
            .refresh_access_token(&pair.refresh_token)
            .await
            .unwrap();
        let claims = handler
            .verify_access_token(&refreshed.access_token)
            .await
            .unwrap();
        assert_eq!(claims.fpt.as_deref(), Some("agent/1.0"));
    }

    #[tokio::test]
    async fn test_expired_refresh_token_requires_login() {
        let (handler, clock, _) = handler();
        let pair = handler.issue_login_tokens("42", None).await.unwrap();

        clock.advance(Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(
            handler.refresh_access_token(&pair.refresh_token).await,
            Err(AuthError::TokenExpired)
        );
    }
}
