//! Registration and login: bcrypt password verification, JWT bearer tokens.
//!
//! Structurally grounded in the teacher's Discord OAuth flow (previously in
//! this file) — a `register`/`login` pair of handlers sharing one state —
//! but the credential mechanism itself is phone+password per spec.md §2,
//! not OAuth, so the cookie/CSRF machinery is replaced with bcrypt +
//! `jsonwebtoken`.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use jsonwebtoken::{EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::db::accounts;
use crate::state::AppState;
use crate::web::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub phone_number: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub phone_number: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub external_user_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// External user id, decimal, matching `SessionId::for_user`.
    pub sub: String,
    pub exp: i64,
}

const MIN_PASSWORD_LEN: usize = 8;

fn canonicalize_phone(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('+') || trimmed.len() < 8 {
        return Err(ApiError::bad_request("phone number must be E.164 (e.g. +15551234567)"));
    }
    if !trimmed[1..].chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::bad_request("phone number must contain only digits after '+'"));
    }
    Ok(trimmed.to_owned())
}

fn issue_token(state: &AppState, external_user_id: u64) -> Result<String, ApiError> {
    let exp = chrono::Utc::now()
        + chrono::Duration::from_std(state.jwt_expiry).unwrap_or(chrono::Duration::hours(24));
    let claims = Claims {
        sub: external_user_id.to_string(),
        exp: exp.timestamp(),
    };
    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(state.jwt_secret.as_bytes()))
        .map_err(|e| ApiError::internal_error(format!("failed to sign token: {e}")))
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    if req.password != req.confirm_password {
        return Err(ApiError::bad_request("passwords do not match"));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let phone_number = canonicalize_phone(&req.phone_number)?;

    if accounts::phone_number_taken(&state.db_pool, &phone_number)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
    {
        return Err(ApiError::new(
            crate::web::error::ApiErrorCode::Conflict,
            "phone number already registered",
        ));
    }

    let account = accounts::register(&state.db_pool, &req.name, &phone_number, &req.password)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    let token = issue_token(&state, account.external_user_id)?;
    Ok((
        StatusCode::OK,
        Json(AuthResponse {
            token,
            external_user_id: account.external_user_id,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let phone_number = canonicalize_phone(&req.phone_number)?;
    let account = accounts::authenticate(&state.db_pool, &phone_number, &req.password)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
        .ok_or_else(|| ApiError::unauthorized("invalid phone number or password"))?;

    let token = issue_token(&state, account.external_user_id)?;
    Ok(Json(AuthResponse {
        token,
        external_user_id: account.external_user_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_phone_numbers_without_plus_prefix() {
        assert!(canonicalize_phone("15551234567").is_err());
    }

    #[test]
    fn rejects_non_digit_phone_numbers() {
        assert!(canonicalize_phone("+1555abc4567").is_err());
    }

    #[test]
    fn accepts_well_formed_e164() {
        assert_eq!(canonicalize_phone(" +15551234567 ").unwrap(), "+15551234567");
    }
}
