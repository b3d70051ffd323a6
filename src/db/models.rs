//! sqlx row types for the Postgres backings.

use chrono::{DateTime, Utc};

use crate::core::{ConnectionStatus, Session, SessionId, Source};

#[derive(Debug, sqlx::FromRow)]
pub struct SessionRow {
    pub session_id: String,
    pub user_id: i64,
    pub phone_number: Option<String>,
    pub is_connected: bool,
    pub connection_status: String,
    pub reconnect_attempts: i32,
    pub source: String,
    pub detected: bool,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Session {
            session_id: row.session_id.parse::<SessionId>().map_err(|e| anyhow::anyhow!(e))?,
            user_id: row.user_id as u64,
            phone_number: row.phone_number,
            is_connected: row.is_connected,
            connection_status: row.connection_status.parse::<ConnectionStatus>()?,
            reconnect_attempts: row.reconnect_attempts as u32,
            source: row.source.parse::<Source>().map_err(|e| anyhow::anyhow!(e))?,
            detected: row.detected,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct AuthRow {
    pub session_id: String,
    pub file_name: String,
    pub data: String,
    #[allow(dead_code)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct AccountRow {
    pub external_user_id: i64,
    pub name: String,
    pub phone_number: String,
    pub password_hash: String,
    #[allow(dead_code)]
    pub created_at: DateTime<Utc>,
}
