//! Verification retry schedule and attempt state.

use std::time::Duration;

use freshet_core::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::methods::VerificationMethod;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Delay before each attempt, in order.
///
/// Front-loaded for DNS propagation; the last attempt lands on day 30.
pub const RETRY_SCHEDULE: [Duration; 14] = [
    Duration::from_secs(MINUTE),
    Duration::from_secs(3 * MINUTE),
    Duration::from_secs(10 * MINUTE),
    Duration::from_secs(30 * MINUTE),
    Duration::from_secs(HOUR),
    Duration::from_secs(DAY),
    Duration::from_secs(DAY),
    Duration::from_secs(DAY),
    Duration::from_secs(2 * DAY),
    Duration::from_secs(2 * DAY),
    Duration::from_secs(3 * DAY),
    Duration::from_secs(4 * DAY),
    Duration::from_secs(7 * DAY),
    Duration::from_secs(9 * DAY),
];

/// Number of attempts before a subject is exhausted.
pub const MAX_ATTEMPTS: usize = RETRY_SCHEDULE.len();

/// Delay before attempt `index`, or `None` past the end of the schedule.
pub fn delay_for(index: usize) -> Option<Duration> {
    RETRY_SCHEDULE.get(index).copied()
}

/// Time from entering the schedule until attempt `index` runs.
pub fn offset_of(index: usize) -> Option<Duration> {
    if index >= MAX_ATTEMPTS {
        return None;
    }
    Some(RETRY_SCHEDULE[..=index].iter().sum())
}

/// Why a subject left the schedule without being verified by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    DomainDeleted,
    AlreadyVerified,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::DomainDeleted => write!(f, "domain_deleted"),
            CancelReason::AlreadyVerified => write!(f, "already_verified"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VerificationState {
    Pending,
    Verified { method: VerificationMethod },
    Cancelled { reason: CancelReason },
    Exhausted,
    /// Ownership was proven but recording it failed fatally. Never resumed.
    Failed { method: VerificationMethod },
}

impl VerificationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationState::Pending)
    }
}

/// Durable position of one subject in the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationAttempt {
    pub subject_id: Uuid,
    /// Next attempt to run, 0-based.
    pub attempt_index: usize,
    pub scheduled_delay_ms: u64,
    /// When attempt `attempt_index` may run.
    pub wake_at: Timestamp,
    pub state: VerificationState,
}

impl VerificationAttempt {
    /// Position of attempt `index` scheduled relative to `now`.
    ///
    /// Returns `None` past the end of the schedule.
    pub fn scheduled(subject_id: Uuid, index: usize, now: Timestamp) -> Option<Self> {
        let delay = delay_for(index)?;
        Some(Self {
            subject_id,
            attempt_index: index,
            scheduled_delay_ms: delay.as_millis() as u64,
            wake_at: now + freshet_core::chrono_duration(delay),
            state: VerificationState::Pending,
        })
    }

    /// The same position, moved to a terminal state.
    pub fn finish(mut self, state: VerificationState) -> Self {
        self.state = state;
        self
    }
}
