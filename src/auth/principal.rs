//! The authenticated caller, as seen by downstream handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Serialize;
use uuid::Uuid;

use crate::http::rejection::GateRejection;
use crate::session::AccessClaims;

/// Identity attached to a request once its access token has been verified.
///
/// Handlers take it as an extractor; a handler reached without one answers
/// 401, so a missing auth layer fails closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub subject_id: String,
    pub session_id: Uuid,
}

impl From<AccessClaims> for Principal {
    fn from(claims: AccessClaims) -> Self {
        Self {
            subject_id: claims.sub,
            session_id: claims.sid,
        }
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = GateRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(GateRejection::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_extracts_attached_principal() {
        let principal = Principal {
            subject_id: "42".to_string(),
            session_id: Uuid::new_v4(),
        };
        let mut request = Request::builder().uri("/").body(()).unwrap();
        request.extensions_mut().insert(principal.clone());
        let (mut parts, _) = request.into_parts();

        let extracted = Principal::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(extracted, principal);
    }

    #[tokio::test]
    async fn test_missing_principal_is_unauthorized() {
        let (mut parts, _) = Request::builder().uri("/").body(()).unwrap().into_parts();
        let rejection = Principal::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(rejection, GateRejection::Unauthorized);
    }
}
