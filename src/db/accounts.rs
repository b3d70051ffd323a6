//! Web-tier account CRUD: phone ↔ bcrypt password ↔ external user id.
//!
//! Grounded in the teacher's `data/users.rs` upsert style. Unlike sessions
//! and credentials this isn't behind a pluggable backing trait — accounts
//! only exist to issue bearer tokens and are read synchronously from the
//! web layer, not touched by the core state machine.

use anyhow::Context;
use sqlx::PgPool;

use crate::db::models::AccountRow;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Account {
    pub external_user_id: u64,
    pub name: String,
    pub phone_number: String,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            external_user_id: row.external_user_id as u64,
            name: row.name,
            phone_number: row.phone_number,
        }
    }
}

/// Register a new web-tier account. The external user id is drawn from
/// `accounts_external_user_id_seq`, which starts at 9e9 so every account
/// created this way lands in the web tier (spec §3).
pub async fn register(pool: &PgPool, name: &str, phone_number: &str, password: &str) -> Result<Account> {
    let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST).context("failed to hash password")?;

    let row: AccountRow = sqlx::query_as(
        r#"
        INSERT INTO accounts (external_user_id, name, phone_number, password_hash)
        VALUES (nextval('accounts_external_user_id_seq'), $1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(phone_number)
    .bind(&password_hash)
    .fetch_one(pool)
    .await
    .context("failed to register account")?;

    Ok(row.into())
}

/// Verify a phone/password pair, returning the account on success.
pub async fn authenticate(pool: &PgPool, phone_number: &str, password: &str) -> Result<Option<Account>> {
    let row: Option<AccountRow> = sqlx::query_as("SELECT * FROM accounts WHERE phone_number = $1")
        .bind(phone_number)
        .fetch_optional(pool)
        .await
        .context("failed to look up account")?;

    let Some(row) = row else { return Ok(None) };
    let verified = bcrypt::verify(password, &row.password_hash).unwrap_or(false);
    Ok(verified.then(|| row.into()))
}

pub async fn phone_number_taken(pool: &PgPool, phone_number: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT external_user_id FROM accounts WHERE phone_number = $1")
        .bind(phone_number)
        .fetch_optional(pool)
        .await
        .context("failed to check phone number uniqueness")?;
    Ok(row.is_some())
}
