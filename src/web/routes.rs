//! The REST surface: a thin wrapper over `FleetManager` (spec.md §6).
//!
//! Router construction and middleware layering follow the teacher's
//! `create_router` (previously in this file): CORS for the dev proxy,
//! response compression, request tracing with a latency-based log-level
//! threshold, and a blanket request timeout.

use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, Response, StatusCode};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::{
    classify::ServerErrorsFailureClass, compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{Span, debug, warn};

use crate::core::SessionId;
use crate::state::AppState;
use crate::web::auth;
use crate::web::error::{ApiError, ApiErrorCode};
use crate::web::extractors::AuthUser;
use crate::web::rate_limit;

pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/register",
            post(auth::register).layer(middleware::from_fn_with_state(app_state.clone(), rate_limit::register_limit)),
        )
        .route(
            "/login",
            post(auth::login).layer(middleware::from_fn_with_state(app_state.clone(), rate_limit::login_limit)),
        )
        .route(
            "/connect",
            post(connect).layer(middleware::from_fn_with_state(app_state.clone(), rate_limit::pairing_limit)),
        )
        .route("/disconnect", post(disconnect))
        .route("/status", get(status))
        .route("/connection-status/{session_id}", get(connection_status))
        .with_state(app_state);

    Router::new().nest("/api", api_router).layer((
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CompressionLayer::new()
            .zstd(true)
            .br(true)
            .gzip(true)
            .quality(tower_http::CompressionLevel::Fastest),
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<Body>| {
                tracing::debug_span!("request", path = request.uri().path())
            })
            .on_response(
                |response: &Response<Body>, latency: Duration, _span: &Span| {
                    let threshold = if cfg!(debug_assertions) {
                        Duration::from_millis(100)
                    } else {
                        Duration::from_millis(1000)
                    };
                    let status = response.status().as_u16();
                    if latency > threshold {
                        warn!(latency = format!("{latency:.2?}"), status, "response");
                    } else {
                        debug!(latency = format!("{latency:.2?}"), status, "response");
                    }
                },
            )
            .on_failure(
                |error: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
                    warn!(error = ?error, latency = format!("{latency:.2?}"), "request failed");
                },
            ),
        TimeoutLayer::new(Duration::from_secs(10)),
    ))
}

async fn healthz(State(state): State<AppState>) -> AxumResponse {
    let credential_durable = state.credential_store.is_durable();
    let session_durable = state.session_store.is_durable();
    let services: std::collections::HashMap<String, String> = state
        .service_statuses
        .all()
        .into_iter()
        .map(|(name, status)| (name, format!("{status:?}").to_lowercase()))
        .collect();
    let body = serde_json::json!({
        "status": if credential_durable && session_durable { "ok" } else { "degraded" },
        "credentialStoreDurable": credential_durable,
        "sessionStoreDurable": session_durable,
        "services": services,
        "version": env!("CARGO_PKG_VERSION"),
        "commit": env!("GIT_COMMIT_SHORT"),
    });
    if credential_durable && session_durable {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub session_id: String,
    pub code: Option<String>,
    pub phone_number: String,
}

async fn connect(
    State(state): State<AppState>,
    AuthUser { external_user_id }: AuthUser,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let session_id = SessionId::for_user(external_user_id);

    if state.fleet.is_connected(&session_id) {
        return Err(ApiError::already_connected(&session_id));
    }
    if let Some(existing) = state.session_store.get_by_phone(&req.phone_number).await
        && existing.session_id != session_id
    {
        return Err(ApiError::phone_owned_by_other_session());
    }

    let handle = state.fleet.create(external_user_id).await?;
    handle.request_pairing_code(req.phone_number.clone()).await;

    // The pairing code isn't available synchronously — it's issued on a
    // background task roughly `PRE_REQUEST_DELAY` after `Connecting` fires —
    // so the first response reports what's in hand and the caller polls
    // `/api/status` for the code once it lands.
    let code = state.pairing.current(&session_id);

    Ok(Json(ConnectResponse {
        session_id: session_id.to_string(),
        code,
        phone_number: req.phone_number,
    }))
}

async fn disconnect(State(state): State<AppState>, AuthUser { external_user_id }: AuthUser) -> Result<StatusCode, ApiError> {
    let session_id = SessionId::for_user(external_user_id);
    if !state.fleet.is_connected(&session_id) {
        return Err(ApiError::bad_request("session is not connected"));
    }
    state.fleet.disconnect(&session_id, false).await;
    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub is_connected: bool,
    pub phone_number: Option<String>,
    pub connection_status: String,
    pub session_id: String,
}

async fn status(State(state): State<AppState>, AuthUser { external_user_id }: AuthUser) -> Result<Json<StatusResponse>, ApiError> {
    let session_id = SessionId::for_user(external_user_id);
    session_status(&state, &session_id).await
}

async fn connection_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let session_id: SessionId = session_id
        .parse()
        .map_err(|_| ApiError::new(ApiErrorCode::BadRequest, "session id must start with 'session_'"))?;
    session_status(&state, &session_id).await
}

async fn session_status(state: &AppState, session_id: &SessionId) -> Result<Json<StatusResponse>, ApiError> {
    let session = state
        .session_store
        .get(session_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("no session {session_id}")))?;

    Ok(Json(StatusResponse {
        is_connected: session.is_connected,
        phone_number: session.phone_number,
        connection_status: session.connection_status.as_str().to_owned(),
        session_id: session.session_id.to_string(),
    }))
}
