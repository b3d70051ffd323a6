//! Postgres-backed `SessionBacking` (spec §6 `sessions` table).
//!
//! Query shape grounded in the teacher's `data/sessions.rs`: plain
//! `sqlx::query_as` calls with `anyhow::Context` on failure, no query
//! builder.

use anyhow::Context;
use sqlx::PgPool;

use crate::core::errors::StoreError;
use crate::core::{Session, SessionBacking, SessionId};
use crate::db::models::SessionRow;

pub struct PostgresSessionBacking {
    pool: PgPool,
}

impl PostgresSessionBacking {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionBacking for PostgresSessionBacking {
    async fn get(&self, session_id: &SessionId) -> Option<Session> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE session_id = $1")
            .bind(session_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "postgres session read failed"))
            .ok()
            .flatten();
        row.and_then(|r| Session::try_from(r).ok())
    }

    async fn get_by_phone(&self, phone_number: &str) -> Option<Session> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE phone_number = $1")
            .bind(phone_number)
            .fetch_optional(&self.pool)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "postgres session phone lookup failed"))
            .ok()
            .flatten();
        row.and_then(|r| Session::try_from(r).ok())
    }

    async fn list_all(&self) -> Vec<Session> {
        let rows: Vec<SessionRow> = sqlx::query_as("SELECT * FROM sessions")
            .fetch_all(&self.pool)
            .await
            .unwrap_or_default();
        rows.into_iter().filter_map(|r| Session::try_from(r).ok()).collect()
    }

    async fn upsert(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (session_id, user_id, phone_number, is_connected, connection_status,
                 reconnect_attempts, source, detected, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (session_id) DO UPDATE SET
                phone_number = EXCLUDED.phone_number,
                is_connected = EXCLUDED.is_connected,
                connection_status = EXCLUDED.connection_status,
                reconnect_attempts = EXCLUDED.reconnect_attempts,
                source = EXCLUDED.source,
                detected = EXCLUDED.detected,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(session.session_id.as_str())
        .bind(session.user_id as i64)
        .bind(&session.phone_number)
        .bind(session.is_connected)
        .bind(session.connection_status.as_str())
        .bind(session.reconnect_attempts as i32)
        .bind(session.source.as_str())
        .bind(session.detected)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .context("failed to upsert session")
        .map_err(StoreError::Other)?;
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .context("failed to delete session")
            .map_err(StoreError::Other)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }
}
