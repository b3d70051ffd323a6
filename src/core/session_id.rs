//! Session identifiers and tier classification.

use std::fmt;

/// External IDs at or above this value belong to self-service ("web-tier") users.
const WEB_TIER_THRESHOLD: u64 = 9_000_000_000;

/// Which deployment tier created a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Web,
    Native,
}

impl Source {
    /// Classify an external user ID by tier.
    pub fn for_user_id(user_id: u64) -> Self {
        if user_id >= WEB_TIER_THRESHOLD {
            Source::Web
        } else {
            Source::Native
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Web => "web",
            Source::Native => "native",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = InvalidSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Source::Web),
            "native" => Ok(Source::Native),
            other => Err(InvalidSource(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid source tag: {0}")]
pub struct InvalidSource(String);

/// Canonical session identifier, `session_<userId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Build the canonical session ID for an external user ID.
    pub fn for_user(user_id: u64) -> Self {
        Self(format!("session_{user_id}"))
    }

    /// Parse the external user ID back out of a canonical session ID.
    pub fn user_id(&self) -> Option<u64> {
        self.0.strip_prefix("session_")?.parse().ok()
    }

    pub fn source(&self) -> Option<Source> {
        self.user_id().map(Source::for_user_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Error returned when a path segment claiming to be a session ID doesn't
/// match the canonical `session_<userId>` form.
#[derive(Debug, thiserror::Error)]
#[error("session id must start with 'session_' and a decimal user id, got {0:?}")]
pub struct InvalidSessionId(String);

impl std::str::FromStr for SessionId {
    type Err = InvalidSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("session_")
            .ok_or_else(|| InvalidSessionId(s.to_owned()))?;
        if rest.parse::<u64>().is_err() {
            return Err(InvalidSessionId(s.to_owned()));
        }
        Ok(Self(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_tier_below_threshold() {
        assert_eq!(Source::for_user_id(123), Source::Native);
        assert_eq!(Source::for_user_id(8_999_999_999), Source::Native);
    }

    #[test]
    fn web_tier_at_and_above_threshold() {
        assert_eq!(Source::for_user_id(9_000_000_000), Source::Web);
        assert_eq!(Source::for_user_id(9_000_000_001), Source::Web);
    }

    #[test]
    fn session_id_round_trips_user_id() {
        let id = SessionId::for_user(123);
        assert_eq!(id.as_str(), "session_123");
        assert_eq!(id.user_id(), Some(123));
        assert_eq!(id.source(), Some(Source::Native));
    }

    #[test]
    fn parses_canonical_form_only() {
        assert!("session_123".parse::<SessionId>().is_ok());
        assert!("session_abc".parse::<SessionId>().is_err());
        assert!("sess_123".parse::<SessionId>().is_err());
    }
}
