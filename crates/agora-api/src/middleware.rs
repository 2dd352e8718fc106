use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

/// Token from `Authorization: Bearer`, if any. Validation happens in the
/// gateway so every route reports failures the same way.
#[derive(Debug, Clone, Default)]
pub struct BearerToken(pub Option<String>);

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .typed_get::<Authorization<Bearer>>()
            .map(|auth| auth.token().to_string());
        Ok(Self(token))
    }
}

impl BearerToken {
    /// Prefer an explicit token (EventSource cannot set headers), falling
    /// back to the header.
    pub fn or_query(self, query: Option<String>) -> Option<String> {
        query.filter(|t| !t.trim().is_empty()).or(self.0)
    }
}
