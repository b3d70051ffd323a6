//! Domain model shared by the stores and the controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session_id::SessionId;

pub use super::session_id::Source;

/// Connection status of a session, as observed by its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "connecting" => ConnectionStatus::Connecting,
            "connected" => ConnectionStatus::Connected,
            "reconnecting" => ConnectionStatus::Reconnecting,
            "disconnected" => ConnectionStatus::Disconnected,
            other => anyhow::bail!("invalid connection status: {other}"),
        })
    }
}

/// A session record, owned by its controller while the controller lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: u64,
    pub phone_number: Option<String>,
    pub is_connected: bool,
    pub connection_status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub source: Source,
    pub detected: bool,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A freshly created session record, per the `Create flow` in the spec:
    /// `status=connecting, isConnected=false, attempts=0`.
    pub fn new(session_id: SessionId, user_id: u64, source: Source) -> Self {
        Self {
            session_id,
            user_id,
            phone_number: None,
            is_connected: false,
            connection_status: ConnectionStatus::Connecting,
            reconnect_attempts: 0,
            source,
            detected: false,
            updated_at: Utc::now(),
        }
    }

    pub fn apply(&mut self, patch: &SessionPatch) {
        if let Some(v) = &patch.phone_number {
            self.phone_number = v.clone();
        }
        if let Some(v) = patch.is_connected {
            self.is_connected = v;
        }
        if let Some(v) = patch.connection_status {
            self.connection_status = v;
        }
        if let Some(v) = patch.reconnect_attempts {
            self.reconnect_attempts = v;
        }
        if let Some(v) = patch.source {
            self.source = v;
        }
        if let Some(v) = patch.detected {
            self.detected = v;
        }
        self.updated_at = Utc::now();
    }
}

/// A partial update to a [`Session`]. Fields left `None` are untouched.
///
/// [`SessionPatch::merge`] implements last-write-wins per key, which is what
/// the debounced update window in `SessionStore` folds repeated patches with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_status: Option<ConnectionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected: Option<bool>,
}

impl SessionPatch {
    /// Merge `other` on top of `self`: any field `other` sets overwrites the
    /// corresponding field in `self`. This is the fold operation the spec's
    /// "last value wins per key" debounce rule requires.
    pub fn merge(mut self, other: SessionPatch) -> Self {
        if other.phone_number.is_some() {
            self.phone_number = other.phone_number;
        }
        if other.is_connected.is_some() {
            self.is_connected = other.is_connected;
        }
        if other.connection_status.is_some() {
            self.connection_status = other.connection_status;
        }
        if other.reconnect_attempts.is_some() {
            self.reconnect_attempts = other.reconnect_attempts;
        }
        if other.source.is_some() {
            self.source = other.source;
        }
        if other.detected.is_some() {
            self.detected = other.detected;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_merge_is_last_write_wins_per_key() {
        let a = SessionPatch {
            reconnect_attempts: Some(1),
            connection_status: Some(ConnectionStatus::Connecting),
            ..Default::default()
        };
        let b = SessionPatch {
            reconnect_attempts: Some(2),
            ..Default::default()
        };
        let folded = a.merge(b);
        assert_eq!(folded.reconnect_attempts, Some(2));
        assert_eq!(folded.connection_status, Some(ConnectionStatus::Connecting));
    }

    #[test]
    fn apply_updates_only_set_fields() {
        let mut session = Session::new(SessionId::for_user(1), 1, Source::Native);
        let before = session.phone_number.clone();
        session.apply(&SessionPatch {
            reconnect_attempts: Some(3),
            ..Default::default()
        });
        assert_eq!(session.reconnect_attempts, 3);
        assert_eq!(session.phone_number, before);
    }
}
