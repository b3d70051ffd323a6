//! Inbound rate limiting for the auth/pairing surface.
//!
//! Adapted from the teacher's `BannerRateLimiter` (`banner/rate_limiter.rs`):
//! one `governor` limiter per request class, each with its own RPM and a
//! shared burst allowance. The teacher's limiter throttles *outbound* calls
//! to Banner by waiting until a slot frees up; inbound HTTP requests can't
//! be made to wait like that, so here a request over budget is rejected
//! with 429 instead of delayed.

use std::num::NonZeroU32;
use std::time::Duration;

use axum::extract::State;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::{InMemoryState, NotKeyed}};

use crate::config::RateLimitingConfig;
use crate::state::AppState;
use crate::web::error::ApiError;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn build(rpm: u32, burst: u32) -> Limiter {
    let quota = Quota::with_period(Duration::from_secs(60) / rpm.max(1))
        .expect("rpm must be nonzero")
        .allow_burst(NonZeroU32::new(burst.max(1)).expect("burst must be nonzero"));
    RateLimiter::direct(quota)
}

/// One limiter per rate-limited endpoint class (spec.md §6 auth/pairing
/// throttling).
pub struct ApiRateLimiters {
    register: Limiter,
    login: Limiter,
    pairing: Limiter,
}

impl ApiRateLimiters {
    pub fn new(config: &RateLimitingConfig) -> Self {
        Self {
            register: build(config.register_rpm, config.burst_allowance),
            login: build(config.login_rpm, config.burst_allowance),
            pairing: build(config.pairing_rpm, config.burst_allowance),
        }
    }
}

fn too_many_requests() -> Response {
    ApiError::rate_limited().into_response()
}

macro_rules! limiter_middleware {
    ($name:ident, $field:ident) => {
        pub async fn $name(
            State(state): State<AppState>,
            request: axum::extract::Request,
            next: Next,
        ) -> Response {
            if state.rate_limiters.$field.check().is_err() {
                return too_many_requests();
            }
            next.run(request).await
        }
    };
}

limiter_middleware!(register_limit, register);
limiter_middleware!(login_limit, login);
limiter_middleware!(pairing_limit, pairing);
