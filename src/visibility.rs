//! Result visibility
//!
//! Results stay hidden from a viewer until they have a confirmed ballot or the
//! poll closes (locked, or deadline strictly in the past). While hidden, the
//! session must not read other voters' ballots at all, so partial live
//! results cannot steer a vote.
//!
//! The rule is evaluated on every access because "now" advances and the lock
//! can change remotely. Once a session has observed `Visible` it stays
//! visible for the rest of that session.

use crate::types::Poll;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether aggregate results may be computed and shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Hidden,
    Visible,
}

impl Visibility {
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Visible)
    }
}

/// Why results became visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisibilityReason {
    /// The viewer's own ballot is confirmed
    Voted,
    /// The creator locked the poll
    Locked,
    /// The deadline has passed
    DeadlinePassed,
    /// Visible earlier in this session
    Latched,
}

/// Inputs the rule looks at, without the session latch
///
/// Returns the first matching reason, or `None` while results stay hidden.
pub fn open_reason(
    poll: Option<&Poll>,
    has_voted: bool,
    now: DateTime<Utc>,
) -> Option<VisibilityReason> {
    if has_voted {
        return Some(VisibilityReason::Voted);
    }
    let poll = poll?;
    if poll.is_locked {
        return Some(VisibilityReason::Locked);
    }
    match poll.deadline {
        Some(deadline) if deadline < now => Some(VisibilityReason::DeadlinePassed),
        _ => None,
    }
}

/// Per-session visibility state
///
/// Holds only the latch; everything else is passed in at evaluation time.
#[derive(Debug, Default, Clone)]
pub struct VisibilityPolicy {
    latched: bool,
}

impl VisibilityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate the rule at `now`, latching the first `Visible`
    pub fn evaluate(
        &mut self,
        poll: Option<&Poll>,
        has_voted: bool,
        now: DateTime<Utc>,
    ) -> Visibility {
        self.evaluate_with_reason(poll, has_voted, now).0
    }

    /// Like [`Self::evaluate`], also reporting why results are visible
    pub fn evaluate_with_reason(
        &mut self,
        poll: Option<&Poll>,
        has_voted: bool,
        now: DateTime<Utc>,
    ) -> (Visibility, Option<VisibilityReason>) {
        if let Some(reason) = open_reason(poll, has_voted, now) {
            if !self.latched {
                tracing::debug!("Poll results became visible: {:?}", reason);
            }
            self.latched = true;
            return (Visibility::Visible, Some(reason));
        }

        if self.latched {
            (Visibility::Visible, Some(VisibilityReason::Latched))
        } else {
            (Visibility::Hidden, None)
        }
    }

    /// Current state without re-checking the rule
    pub fn peek(&self) -> Visibility {
        if self.latched {
            Visibility::Visible
        } else {
            Visibility::Hidden
        }
    }
}
