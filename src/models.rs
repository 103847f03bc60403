//! Data models shared by the classifier, the portal navigator and the monitor

use chrono::{DateTime, Utc};
use std::fmt;

/// Tri-state connectivity classification, recomputed every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityStatus {
    Online,
    Offline,
    CaptivePortal,
}

impl ConnectivityStatus {
    pub fn is_online(self) -> bool {
        self == ConnectivityStatus::Online
    }
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectivityStatus::Online => "ONLINE",
            ConnectivityStatus::Offline => "OFFLINE",
            ConnectivityStatus::CaptivePortal => "CAPTIVE_PORTAL",
        };
        f.write_str(label)
    }
}

/// Identity values typed into the portal form.
///
/// Supplied once by configuration and only ever read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalFormData {
    pub id_number: String,
    pub first_name: String,
    pub last_name: String,
    pub birth_year: String,
}

/// Counters owned by the monitor loop.
///
/// Each cycle produces a new value from the previous one; nothing else
/// mutates it. `consecutive_failures` and `consecutive_online_checks` are
/// never both nonzero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorState {
    pub consecutive_failures: u32,
    pub consecutive_online_checks: u32,
    /// Incremented once per ONLINE re-acquisition
    pub total_successes: u64,
    pub last_success: Option<DateTime<Utc>>,
    /// Routine status logging is suppressed while set
    pub quiet_mode: bool,
}

impl MonitorState {
    /// Fold one classification into the counters.
    pub fn observe(&self, status: ConnectivityStatus, now: DateTime<Utc>, quiet_after: u32) -> Self {
        let mut next = *self;
        match status {
            ConnectivityStatus::Online => {
                if next.consecutive_online_checks == 0 {
                    next.total_successes += 1;
                    next.last_success = Some(now);
                }
                next.consecutive_online_checks = next.consecutive_online_checks.saturating_add(1);
                next.consecutive_failures = 0;
                if next.consecutive_online_checks >= quiet_after {
                    next.quiet_mode = true;
                }
            }
            ConnectivityStatus::Offline | ConnectivityStatus::CaptivePortal => {
                next.consecutive_failures = next.consecutive_failures.saturating_add(1);
                next.consecutive_online_checks = 0;
                next.quiet_mode = false;
            }
        }
        next
    }

    /// True when this observation regained connectivity after a non-ONLINE streak
    /// (or is the very first ONLINE result).
    pub fn just_regained(&self) -> bool {
        self.consecutive_online_checks == 1
    }

    /// Any in-loop error ends quiet mode.
    pub fn with_error(&self) -> Self {
        Self {
            quiet_mode: false,
            ..*self
        }
    }

    pub fn needs_cooldown(&self, max_failures: u32) -> bool {
        self.consecutive_failures > max_failures
    }

    /// Reset the failure streak after the long escalation pause.
    pub fn after_cooldown(&self) -> Self {
        Self {
            consecutive_failures: 0,
            ..*self
        }
    }
}
