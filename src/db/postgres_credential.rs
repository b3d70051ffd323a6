//! Postgres-backed `CredentialBacking` (spec §6 `auth` table).
//!
//! Values are encrypted with [`CredentialCipher`] before they ever reach
//! SQL; the column holds ciphertext, never a credential blob in the clear.

use anyhow::Context;
use sqlx::PgPool;

use crate::core::errors::StoreError;
use crate::core::{CredentialBacking, CredentialCipher, SessionId};
use crate::db::models::AuthRow;

pub struct PostgresCredentialBacking {
    pool: PgPool,
    cipher: CredentialCipher,
}

impl PostgresCredentialBacking {
    pub fn new(pool: PgPool, cipher: CredentialCipher) -> Self {
        Self { pool, cipher }
    }
}

#[async_trait::async_trait]
impl CredentialBacking for PostgresCredentialBacking {
    async fn get(&self, session_id: &SessionId, file_name: &str) -> Option<Vec<u8>> {
        let row: Option<AuthRow> =
            sqlx::query_as("SELECT * FROM auth WHERE session_id = $1 AND file_name = $2")
                .bind(session_id.as_str())
                .bind(file_name)
                .fetch_optional(&self.pool)
                .await
                .inspect_err(|e| tracing::warn!(error = %e, "postgres credential read failed"))
                .ok()
                .flatten()?;
        self.cipher.decrypt(&row.data).ok()
    }

    async fn set(&self, session_id: &SessionId, file_name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let encrypted = self.cipher.encrypt(bytes);
        sqlx::query(
            r#"
            INSERT INTO auth (session_id, file_name, data, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (session_id, file_name) DO UPDATE SET
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(session_id.as_str())
        .bind(file_name)
        .bind(encrypted)
        .execute(&self.pool)
        .await
        .context("failed to write credential")
        .map_err(StoreError::Other)?;
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId, file_name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth WHERE session_id = $1 AND file_name = $2")
            .bind(session_id.as_str())
            .bind(file_name)
            .execute(&self.pool)
            .await
            .context("failed to delete credential")
            .map_err(StoreError::Other)?;
        Ok(())
    }

    async fn delete_all_except(&self, session_id: &SessionId, keep: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth WHERE session_id = $1 AND file_name != $2")
            .bind(session_id.as_str())
            .bind(keep)
            .execute(&self.pool)
            .await
            .context("failed to remediate credential records")
            .map_err(StoreError::Other)?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth WHERE session_id = $1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .context("failed to delete session credentials")
            .map_err(StoreError::Other)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }
}
