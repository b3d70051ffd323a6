//! Concrete store backings: Postgres (primary for sessions and credentials)
//! and MongoDB (optional secondary session backing, spec §6).

pub mod accounts;
pub mod models;
pub mod mongo_session;
pub mod postgres_credential;
pub mod postgres_session;

pub use mongo_session::MongoSessionBacking;
pub use postgres_credential::PostgresCredentialBacking;
pub use postgres_session::PostgresSessionBacking;
