//! Request authentication: the auth middleware and the typed principal it
//! hands to handlers.

mod credentials;
mod middleware;
mod principal;

pub use credentials::{hash_password, CredentialVerifier, StaticCredentials};
pub use middleware::{AuthLayer, Authenticate};
pub use principal::Principal;
