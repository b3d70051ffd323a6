//! PairingCoordinator (spec §4.3, component C4).
//!
//! Grounded in the teacher's `OAuthStateStore` (`web/session_cache.rs`):
//! single-use, TTL-bounded tokens tracked in a `DashMap` with a `generate`/
//! `validate`/`cleanup` shape. Here the "token" is a pairing code tied to a
//! session rather than a CSRF nonce, and only one can be outstanding per
//! session at a time.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::session_id::SessionId;

/// Delay before the first pairing-code request is sent upstream, so the
/// socket has a moment to settle post-connect.
pub const PRE_REQUEST_DELAY: Duration = Duration::from_secs(2);
/// A pairing code expires if unconsumed after this long.
pub const PAIRING_CODE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct PairingState {
    pub code: String,
    pub requested_at: Instant,
    /// Set once a 515/516 "restart required" disconnect has been attributed
    /// to this pairing attempt, so a second one isn't double-counted.
    pub restart_handled: bool,
}

/// Format a raw pairing code into the `XXXX-XXXX` display form.
pub fn format_code(raw: &str) -> String {
    if raw.len() == 8 && raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        format!("{}-{}", &raw[..4], &raw[4..])
    } else {
        raw.to_owned()
    }
}

/// Tracks at most one outstanding pairing code per session.
pub struct PairingCoordinator {
    active: DashMap<SessionId, PairingState>,
}

impl PairingCoordinator {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
        }
    }

    /// Record a freshly issued pairing code, replacing any prior one for
    /// this session (a session only ever has one live pairing attempt).
    pub fn record(&self, session_id: &SessionId, raw_code: &str) -> String {
        let formatted = format_code(raw_code);
        self.active.insert(
            session_id.clone(),
            PairingState {
                code: formatted.clone(),
                requested_at: Instant::now(),
                restart_handled: false,
            },
        );
        formatted
    }

    /// Current pairing code for a session, `None` if there isn't one or it
    /// has expired (expiry triggers eviction as a side effect, matching the
    /// teacher's `OAuthStateStore::validate` GC-on-access pattern).
    pub fn current(&self, session_id: &SessionId) -> Option<String> {
        let expired = self
            .active
            .get(session_id)
            .is_some_and(|s| s.requested_at.elapsed() > PAIRING_CODE_TTL);
        if expired {
            self.active.remove(session_id);
            return None;
        }
        self.active.get(session_id).map(|s| s.code.clone())
    }

    /// Mark that a 515/516 disconnect immediately following this pairing
    /// attempt has been handled, so `clear` below doesn't need to be called
    /// a second time for the same code. The voluntary-disconnect flag on the
    /// session must NOT be cleared in this path (spec §4.5 ordering rule) —
    /// that's enforced by the controller, not here.
    pub fn mark_restart_handled(&self, session_id: &SessionId) -> bool {
        self.active
            .get_mut(session_id)
            .map(|mut s| {
                let was_handled = s.restart_handled;
                s.restart_handled = true;
                !was_handled
            })
            .unwrap_or(false)
    }

    /// Clear a session's pairing state, e.g. once pairing succeeds and the
    /// session reaches `connected`.
    pub fn clear(&self, session_id: &SessionId) {
        self.active.remove(session_id);
    }

    pub fn has_active(&self, session_id: &SessionId) -> bool {
        self.current(session_id).is_some()
    }
}

impl Default for PairingCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_eight_char_codes_with_a_dash() {
        assert_eq!(format_code("ABCD1234"), "ABCD-1234");
    }

    #[test]
    fn leaves_non_conforming_codes_untouched() {
        assert_eq!(format_code("already-formatted"), "already-formatted");
    }

    #[test]
    fn record_then_current_round_trips() {
        let coordinator = PairingCoordinator::new();
        let sid = SessionId::for_user(1);
        let formatted = coordinator.record(&sid, "ABCD1234");
        assert_eq!(coordinator.current(&sid), Some(formatted));
    }

    #[test]
    fn a_second_record_replaces_the_first() {
        let coordinator = PairingCoordinator::new();
        let sid = SessionId::for_user(1);
        coordinator.record(&sid, "AAAA1111");
        let second = coordinator.record(&sid, "BBBB2222");
        assert_eq!(coordinator.current(&sid), Some(second));
    }

    #[test]
    fn clear_removes_pairing_state() {
        let coordinator = PairingCoordinator::new();
        let sid = SessionId::for_user(1);
        coordinator.record(&sid, "AAAA1111");
        coordinator.clear(&sid);
        assert!(!coordinator.has_active(&sid));
    }

    #[test]
    fn mark_restart_handled_is_true_only_once() {
        let coordinator = PairingCoordinator::new();
        let sid = SessionId::for_user(1);
        coordinator.record(&sid, "AAAA1111");
        assert!(coordinator.mark_restart_handled(&sid));
        assert!(!coordinator.mark_restart_handled(&sid));
    }
}
