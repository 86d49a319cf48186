//! # Core Types for the Poll Engine
//!
//! This module defines the data structures shared by the tally engine, the
//! visibility policy, the projection and the viewer session.
//!
//! ## Type Categories
//!
//! ### Identifiers
//! - [`OptionId`], [`VoterId`], [`PollId`], [`PartyId`]: document ids as issued
//!   by the backing store
//!
//! ### Core Entities
//! - [`Poll`]: poll definition, lock state and deadline
//! - [`PollOption`]: one selectable option with its display rank
//! - [`Ballot`]: one voter's submission, keyed by voter id
//! - [`TallyResult`]: derived counts/scores and percentages, never persisted
//!
//! ## Usage Examples
//!
//! ```rust
//! use poll::types::*;
//! use chrono::{Duration, Utc};
//!
//! let now = Utc::now();
//! let poll = Poll {
//!     id: "poll-1".to_string(),
//!     party_id: "party-1".to_string(),
//!     kind: PollKind::Ranked,
//!     question: "Which pizza?".to_string(),
//!     allow_guest_options: true,
//!     is_locked: false,
//!     deadline: Some(now + Duration::hours(2)),
//!     created_by: "host".to_string(),
//!     created_at: now,
//! };
//!
//! assert!(!poll.is_closed_at(now));
//! assert!(poll.is_closed_at(now + Duration::hours(3)));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier of a poll option document
pub type OptionId = String;

/// Identifier of a voter (the authenticated user id)
pub type VoterId = String;

/// Identifier of a poll document
pub type PollId = String;

/// Identifier of a party document
pub type PartyId = String;

/// The ballot shape a poll accepts
///
/// The kind is fixed when the poll is created and decides both how the
/// editor treats clicks and which scoring rule the tally engine applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollKind {
    /// Exactly one option per ballot
    #[default]
    Single,
    /// Any number of options per ballot
    Multiple,
    /// An ordered (possibly partial) ranking, scored with the Borda count
    Ranked,
}

impl PollKind {
    /// Decode a stored kind, accepting the aliases older clients wrote
    ///
    /// Unknown values fall back to [`PollKind::Single`].
    ///
    /// ```rust
    /// use poll::types::PollKind;
    ///
    /// assert_eq!(PollKind::parse_lenient("Ranked"), PollKind::Ranked);
    /// assert_eq!(PollKind::parse_lenient("multi"), PollKind::Multiple);
    /// assert_eq!(PollKind::parse_lenient("???"), PollKind::Single);
    /// ```
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "ranked" => Self::Ranked,
            "multiple" | "multiplechoice" | "multi" => Self::Multiple,
            _ => Self::Single,
        }
    }

    /// Canonical stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multiple => "multiple",
            Self::Ranked => "ranked",
        }
    }
}

impl std::fmt::Display for PollKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A poll attached to a party
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    /// Poll document id
    pub id: PollId,

    /// Owning party
    pub party_id: PartyId,

    /// Ballot shape, immutable after creation
    pub kind: PollKind,

    /// Question shown to voters
    pub question: String,

    /// Whether guests may add options while the poll is open
    pub allow_guest_options: bool,

    /// Set by the creator to close the poll early
    pub is_locked: bool,

    /// Optional closing time
    ///
    /// The poll is closed once this instant is strictly in the past.
    pub deadline: Option<DateTime<Utc>>,

    /// User id of the creator
    pub created_by: VoterId,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Poll {
    /// Whether the poll is locked or past its deadline at `now`
    pub fn is_closed_at(&self, now: DateTime<Utc>) -> bool {
        if self.is_locked {
            return true;
        }
        match self.deadline {
            Some(deadline) => deadline < now,
            None => false,
        }
    }

    /// Whether a guest may add an option at `now`
    pub fn accepts_guest_options_at(&self, now: DateTime<Utc>) -> bool {
        self.allow_guest_options && !self.is_closed_at(now)
    }

    /// Whether `user` created this poll
    pub fn is_creator(&self, user: &str) -> bool {
        !self.created_by.is_empty() && self.created_by == user
    }
}

/// One selectable option of a poll
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollOption {
    /// Option document id
    pub id: OptionId,

    /// Display text
    pub text: String,

    /// Display and initial ranking order
    ///
    /// Expected to be unique per poll but not enforced; ties keep the order
    /// in which the options arrived.
    pub rank: i64,

    /// User id of whoever added the option
    pub created_by: VoterId,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// What a ballot contains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallotPayload {
    /// Selected option ids (single and multiple choice)
    Selection(BTreeSet<OptionId>),
    /// Ordered option ids, best first, no duplicates (ranked)
    Ranking(Vec<OptionId>),
}

impl BallotPayload {
    /// Empty payload of the shape `kind` expects
    pub fn empty_for(kind: PollKind) -> Self {
        match kind {
            PollKind::Single | PollKind::Multiple => Self::Selection(BTreeSet::new()),
            PollKind::Ranked => Self::Ranking(Vec::new()),
        }
    }

    /// Selected ids, if this is a selection payload
    pub fn selection(&self) -> Option<&BTreeSet<OptionId>> {
        match self {
            Self::Selection(ids) => Some(ids),
            Self::Ranking(_) => None,
        }
    }

    /// Ranked ids, if this is a ranking payload
    pub fn ranking(&self) -> Option<&[OptionId]> {
        match self {
            Self::Ranking(ids) => Some(ids),
            Self::Selection(_) => None,
        }
    }

    /// Number of option references in the payload
    pub fn len(&self) -> usize {
        match self {
            Self::Selection(ids) => ids.len(),
            Self::Ranking(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the payload shape fits `kind`
    pub fn fits(&self, kind: PollKind) -> bool {
        matches!(
            (self, kind),
            (Self::Selection(_), PollKind::Single | PollKind::Multiple)
                | (Self::Ranking(_), PollKind::Ranked)
        )
    }
}

/// One voter's ballot for a poll
///
/// There is at most one ballot per voter; a resubmission replaces the
/// previous one entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    /// Voter id, also the ballot's document id
    pub voter_id: VoterId,

    /// Selection or ranking
    pub payload: BallotPayload,

    /// Time of the last submission
    pub updated_at: DateTime<Utc>,
}

/// Aggregated results for one poll
///
/// A pure function of the option set, the ballot set and the poll kind.
/// Ordered maps keep repeated computations over the same input identical,
/// including their serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyResult {
    /// Kind the result was computed for
    pub kind: PollKind,

    /// Per-option selection counts (single/multiple, empty for ranked)
    pub counts: BTreeMap<OptionId, u64>,

    /// Per-option Borda points (ranked, empty otherwise)
    pub scores: BTreeMap<OptionId, u64>,

    /// Share of the total in `[0, 1]` per option
    pub percentages: BTreeMap<OptionId, f64>,

    /// Number of ballots in the collection, including ones whose
    /// references are all stale
    pub total_ballots: usize,
}

impl TallyResult {
    /// Result with no options and no ballots
    pub fn empty(kind: PollKind) -> Self {
        Self {
            kind,
            counts: BTreeMap::new(),
            scores: BTreeMap::new(),
            percentages: BTreeMap::new(),
            total_ballots: 0,
        }
    }

    /// Selection count for an option, 0 when unknown
    pub fn count(&self, option_id: &str) -> u64 {
        self.counts.get(option_id).copied().unwrap_or(0)
    }

    /// Borda score for an option, 0 when unknown
    pub fn score(&self, option_id: &str) -> u64 {
        self.scores.get(option_id).copied().unwrap_or(0)
    }

    /// Share for an option in `[0, 1]`, 0 when unknown
    pub fn percent(&self, option_id: &str) -> f64 {
        self.percentages
            .get(option_id)
            .copied()
            .filter(|p| p.is_finite())
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_poll(now: DateTime<Utc>) -> Poll {
        Poll {
            id: "poll-1".to_string(),
            party_id: "party-1".to_string(),
            kind: PollKind::Single,
            question: "Friday or Saturday?".to_string(),
            allow_guest_options: true,
            is_locked: false,
            deadline: None,
            created_by: "host".to_string(),
            created_at: now,
        }
    }

    #[test]
    fn test_poll_closing() {
        let now = Utc::now();
        let open = sample_poll(now);
        assert!(!open.is_closed_at(now));
        assert!(open.accepts_guest_options_at(now));

        let locked = Poll {
            is_locked: true,
            ..open.clone()
        };
        assert!(locked.is_closed_at(now));
        assert!(!locked.accepts_guest_options_at(now));

        // Deadline must be strictly in the past
        let at_deadline = Poll {
            deadline: Some(now),
            ..open.clone()
        };
        assert!(!at_deadline.is_closed_at(now));
        assert!(at_deadline.is_closed_at(now + Duration::seconds(1)));
    }

    #[test]
    fn test_creator_check() {
        let poll = sample_poll(Utc::now());
        assert!(poll.is_creator("host"));
        assert!(!poll.is_creator("guest"));

        let anonymous = Poll {
            created_by: String::new(),
            ..poll
        };
        assert!(!anonymous.is_creator(""));
    }

    #[test]
    fn test_payload_shapes() {
        let selection = BallotPayload::empty_for(PollKind::Multiple);
        assert!(selection.fits(PollKind::Single));
        assert!(!selection.fits(PollKind::Ranked));
        assert!(selection.is_empty());

        let ranking = BallotPayload::Ranking(vec!["a".to_string(), "b".to_string()]);
        assert!(ranking.fits(PollKind::Ranked));
        assert_eq!(ranking.len(), 2);
        assert!(ranking.selection().is_none());
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in [PollKind::Single, PollKind::Multiple, PollKind::Ranked] {
            assert_eq!(PollKind::parse_lenient(kind.as_str()), kind);
        }
        assert_eq!(PollKind::parse_lenient("MultipleChoice"), PollKind::Multiple);
    }

    #[test]
    fn test_tally_accessors_default_to_zero() {
        let result = TallyResult::empty(PollKind::Ranked);
        assert_eq!(result.score("missing"), 0);
        assert_eq!(result.count("missing"), 0);
        assert_eq!(result.percent("missing"), 0.0);
    }
}
