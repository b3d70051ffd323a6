//! Disconnect classification table (spec §4.5).
//!
//! Every upstream disconnect carries an opaque status code. The controller
//! never branches on the raw code outside this module — everything else
//! consumes a [`Classification`].

use super::errors::{Classification, DisconnectAction};

/// Bound on reconnect attempts for the 515/516 "pairing restart" codes.
pub const RESTART_REQUIRED_MAX_ATTEMPTS: u32 = 10;
/// Bound on reconnect attempts for all other transient disconnects.
pub const GENERIC_TRANSIENT_MAX_ATTEMPTS: u32 = 5;

/// Classify an upstream disconnect by its status code.
///
/// `status_code` is `None` when the upstream gave no machine-readable code;
/// this is treated the same as an unrecognized code (transient).
pub fn classify(status_code: Option<u16>) -> Classification {
    match status_code {
        Some(401) => Classification {
            name: "LoggedOut",
            reason: "remote user logged out",
            action: DisconnectAction::Terminal,
        },
        Some(403) => Classification {
            name: "Forbidden",
            reason: "account banned",
            action: DisconnectAction::Terminal,
        },
        Some(408) => Classification {
            name: "TimedOut",
            reason: "connection timed out (usually a failed pairing)",
            action: DisconnectAction::Terminal,
        },
        Some(428) => Classification {
            name: "ConnectionClosed",
            reason: "generic close",
            action: DisconnectAction::Reconnect {
                short_delay: false,
                max_attempts: GENERIC_TRANSIENT_MAX_ATTEMPTS,
            },
        },
        Some(440) => Classification {
            name: "ConnectionReplaced",
            reason: "another device took the slot",
            action: DisconnectAction::Terminal,
        },
        Some(500) => Classification {
            name: "BadSession",
            reason: "MAC mismatch / crypto state corrupted",
            action: DisconnectAction::Remediate,
        },
        Some(515) => Classification {
            name: "RestartRequired",
            reason: "normal after pairing",
            action: DisconnectAction::Reconnect {
                short_delay: true,
                max_attempts: RESTART_REQUIRED_MAX_ATTEMPTS,
            },
        },
        Some(516) => Classification {
            name: "StreamErrorUnknown",
            reason: "equivalent to 515 in practice",
            action: DisconnectAction::Reconnect {
                short_delay: true,
                max_attempts: RESTART_REQUIRED_MAX_ATTEMPTS,
            },
        },
        _ => Classification {
            name: "Unknown",
            reason: "treated as transient",
            action: DisconnectAction::Reconnect {
                short_delay: false,
                max_attempts: GENERIC_TRANSIENT_MAX_ATTEMPTS,
            },
        },
    }
}

/// `true` for the two "restart required" codes that occur normally during
/// pairing and should not clear a voluntary-disconnect marker.
pub fn is_restart_required(status_code: Option<u16>) -> bool {
    matches!(status_code, Some(515) | Some(516))
}

/// Backoff delay for the Nth reconnect attempt (0-indexed), per spec §4.5:
/// `delay = min(30s, 5s * 2^attempts)`, shortened to ~2s for 515/516.
pub fn backoff_delay(attempt: u32, short_delay: bool) -> std::time::Duration {
    if short_delay {
        return std::time::Duration::from_secs(2);
    }
    let secs = 5u64.saturating_mul(1u64 << attempt.min(16));
    std::time::Duration::from_secs(secs.min(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_out_is_terminal() {
        assert_eq!(classify(Some(401)).action, DisconnectAction::Terminal);
    }

    #[test]
    fn bad_session_is_remediable() {
        assert_eq!(classify(Some(500)).action, DisconnectAction::Remediate);
    }

    #[test]
    fn restart_required_short_delay_and_bounded_to_ten() {
        let c = classify(Some(515));
        assert_eq!(
            c.action,
            DisconnectAction::Reconnect {
                short_delay: true,
                max_attempts: RESTART_REQUIRED_MAX_ATTEMPTS
            }
        );
        assert!(is_restart_required(Some(515)));
        assert!(is_restart_required(Some(516)));
        assert!(!is_restart_required(Some(428)));
    }

    #[test]
    fn unknown_code_is_transient_generic_bound() {
        let c = classify(Some(999));
        assert_eq!(
            c.action,
            DisconnectAction::Reconnect {
                short_delay: false,
                max_attempts: GENERIC_TRANSIENT_MAX_ATTEMPTS
            }
        );
    }

    #[test]
    fn backoff_grows_exponentially_then_caps() {
        assert_eq!(backoff_delay(0, false).as_secs(), 5);
        assert_eq!(backoff_delay(1, false).as_secs(), 10);
        assert_eq!(backoff_delay(2, false).as_secs(), 20);
        assert_eq!(backoff_delay(3, false).as_secs(), 30); // would be 40, capped
        assert_eq!(backoff_delay(0, true).as_secs(), 2);
    }
}
