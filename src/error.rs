//! Crate-wide result alias for internal plumbing.
//!
//! Boundaries (the core state machine, the web layer) use typed errors
//! (`core::errors`, `web::error::ApiError`); everything underneath —
//! database queries, config loading, bootstrap — just propagates with
//! `anyhow::Context`.

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
