//! Login credential verification.
//!
//! The gate only needs to know which subject a login belongs to. Where the
//! accounts live is up to the embedding service; [`StaticCredentials`] serves
//! a fixed account table from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::UserEntry;
use crate::error::{GatehouseError, Result};

/// Resolves a login to a subject id.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// The subject id for valid credentials, `None` otherwise.
    async fn verify(&self, email: &str, password: &str) -> Option<String>;
}

struct Account {
    password_hash: String,
    subject_id: String,
}

/// Accounts held in memory with Argon2id password hashes.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    accounts: Arc<HashMap<String, Account>>,
}

impl StaticCredentials {
    /// Build the table from configured entries, skipping unparsable hashes.
    pub fn from_entries(entries: &[UserEntry]) -> Self {
        let accounts = entries
            .iter()
            .filter_map(|entry| {
                if PasswordHash::new(&entry.password_hash).is_err() {
                    warn!(
                        email = %entry.email,
                        "Invalid password hash in auth.users, skipping entry"
                    );
                    return None;
                }
                Some((
                    entry.email.clone(),
                    Account {
                        password_hash: entry.password_hash.clone(),
                        subject_id: entry.subject_id.clone(),
                    },
                ))
            })
            .collect();

        Self {
            accounts: Arc::new(accounts),
        }
    }

    /// Number of usable accounts.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentials {
    async fn verify(&self, email: &str, password: &str) -> Option<String> {
        let accounts = Arc::clone(&self.accounts);
        let email = email.to_string();
        let password = password.to_string();

        // Argon2 is deliberately slow; keep it off the async workers
        let result = tokio::task::spawn_blocking(move || {
            let account = accounts.get(&email)?;
            let hash = PasswordHash::new(&account.password_hash).ok()?;
            Argon2::default()
                .verify_password(password.as_bytes(), &hash)
                .ok()
                .map(|()| account.subject_id.clone())
        })
        .await;

        match result {
            Ok(subject) => {
                debug!(matched = subject.is_some(), "Credentials checked");
                subject
            }
            Err(e) => {
                warn!(error = %e, "Credential check panicked");
                None
            }
        }
    }
}

/// Hash a password into an Argon2id PHC string for the account table.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GatehouseError::Config(format!("failed to hash password: {}", e)))
}
