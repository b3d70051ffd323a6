//! Error taxonomy for the core (spec §7).
//!
//! These are kinds, not one flat error type: `Transient` and `Remediable`
//! are handled inside the controller and never surface to a caller except
//! as a `SessionStore` status change. `Terminal`, `Validation`, and
//! `Capacity` cross the controller/fleet boundary.

use crate::core::session_id::SessionId;

/// Failure to create (or re-adopt) a session.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("fleet is at capacity")]
    FleetFull,
    #[error("session {0} is already initializing")]
    AlreadyInitializing(SessionId),
    #[error("session {0} is already active")]
    AlreadyActive(SessionId),
    #[error("failed to open upstream connection: {0}")]
    ConnectionFailed(#[from] anyhow::Error),
}

/// Failure in the pairing-code handshake.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("pairing code request timed out")]
    CodeGenerationTimeout,
    #[error("upstream rejected the pairing code request: {0}")]
    UpstreamRejected(String),
    #[error("no active socket for session {0}")]
    NoSocket(SessionId),
}

/// Failure touching a credential or session backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure encrypting or decrypting a credential blob.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("SESSION_ENCRYPTION_KEY must decode to exactly 32 bytes")]
    InvalidKeyLength,
    #[error("ciphertext is too short to contain a nonce and tag")]
    Truncated,
    #[error("AEAD open failed (wrong key or corrupted blob)")]
    DecryptionFailed,
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// How the disconnect classification table (spec §4.5) says to react to a
/// closed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    /// Schedule a bounded, backed-off reconnect.
    Reconnect { short_delay: bool, max_attempts: u32 },
    /// Clear non-root credential records, then reconnect.
    Remediate,
    /// Full cleanup; no automated recovery.
    Terminal,
}

/// The outcome of classifying an upstream disconnect status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub name: &'static str,
    pub reason: &'static str,
    pub action: DisconnectAction,
}

/// Validation failures surfaced synchronously from the web API.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{0}")]
    Message(String),
}

/// Fleet is full; the caller (not the controller) is expected to retry.
#[derive(Debug, thiserror::Error)]
#[error("fleet is at capacity ({max_sessions} sessions)")]
pub struct CapacityError {
    pub max_sessions: usize,
}
