//! Axum extractors for authentication.

use axum::extract::FromRequestParts;
use axum::http::header;
use http::request::Parts;
use jsonwebtoken::{DecodingKey, Validation};

use crate::state::AppState;
use crate::web::auth::Claims;
use crate::web::error::ApiError;

/// Extractor that resolves `Authorization: Bearer <jwt>` to an external user
/// id. Generalizes the teacher's cookie-based `AuthUser` extractor to the
/// bearer-token model spec.md §2 requires.
pub struct AuthUser {
    pub external_user_id: u64,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

        let data = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| ApiError::unauthorized("invalid or expired token"))?;

        let external_user_id = data
            .claims
            .sub
            .parse::<u64>()
            .map_err(|_| ApiError::unauthorized("malformed token subject"))?;

        Ok(AuthUser { external_user_id })
    }
}
