//! Poll/vote state projection
//!
//! Folds the independent snapshot channels of one poll (poll document, option
//! list, ballot collection) plus the viewer's own vote flag into a single
//! state, and recomputes the tally from whatever it currently holds whenever
//! any of them changes. Snapshots may arrive in any order and may repeat;
//! every fold is a full replacement followed by an idempotent recompute.

use crate::editor::BallotEditor;
use crate::tally;
use crate::types::{Ballot, OptionId, Poll, PollKind, PollOption, TallyResult};
use crate::visibility::{Visibility, VisibilityPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything a renderer needs, computed at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollView {
    pub poll: Option<Poll>,
    pub options: Vec<PollOption>,
    pub has_voted: bool,
    pub visibility: Visibility,
    pub closed: bool,
    pub can_submit: bool,
    pub selected: Vec<OptionId>,
    pub ranking: Vec<OptionId>,
    pub tally: Option<TallyResult>,
}

impl PollView {
    /// View before any snapshot arrived
    pub fn loading() -> Self {
        Self {
            poll: None,
            options: Vec::new(),
            has_voted: false,
            visibility: Visibility::Hidden,
            closed: false,
            can_submit: false,
            selected: Vec::new(),
            ranking: Vec::new(),
            tally: None,
        }
    }
}

/// Local state of one viewer's poll screen
#[derive(Debug, Clone)]
pub struct PollProjection {
    poll: Option<Poll>,
    options: Vec<PollOption>,
    has_voted: bool,
    // None while the ballot collection is not (or may not be) read
    ballots: Option<Vec<Ballot>>,
    editor: BallotEditor,
    policy: VisibilityPolicy,
    tally: Option<TallyResult>,
    ranked_min_entries: usize,
}

impl PollProjection {
    pub fn new(ranked_min_entries: usize) -> Self {
        Self {
            poll: None,
            options: Vec::new(),
            has_voted: false,
            ballots: None,
            editor: BallotEditor::default(),
            policy: VisibilityPolicy::new(),
            tally: None,
            ranked_min_entries,
        }
    }

    pub fn poll(&self) -> Option<&Poll> {
        self.poll.as_ref()
    }

    pub fn options(&self) -> &[PollOption] {
        &self.options
    }

    pub fn has_voted(&self) -> bool {
        self.has_voted
    }

    pub fn ballots(&self) -> Option<&[Ballot]> {
        self.ballots.as_deref()
    }

    pub fn tally(&self) -> Option<&TallyResult> {
        self.tally.as_ref()
    }

    pub fn editor(&self) -> &BallotEditor {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut BallotEditor {
        &mut self.editor
    }

    /// Kind of the loaded poll, or the editor's (default) kind before that
    pub fn kind(&self) -> PollKind {
        self.poll.as_ref().map(|p| p.kind).unwrap_or(self.editor.kind())
    }

    /// Replace the poll fields
    ///
    /// The kind is fixed by the first snapshot; a later snapshot with a
    /// different kind keeps the first one.
    pub fn apply_poll(&mut self, mut poll: Poll) {
        if let Some(current) = &self.poll {
            if current.kind != poll.kind {
                tracing::warn!(
                    "Poll {} changed kind from {} to {}, keeping {}",
                    poll.id,
                    current.kind,
                    poll.kind,
                    current.kind
                );
                poll.kind = current.kind;
            }
        }
        self.editor.set_kind(poll.kind);
        self.poll = Some(poll);
        self.recompute();
    }

    /// Replace the option list
    ///
    /// Options are kept ordered by rank with a stable sort, and the viewer's
    /// ranking is merged rather than reset.
    pub fn apply_options(&mut self, mut options: Vec<PollOption>) {
        options.sort_by_key(|o| o.rank);
        self.editor.merge_options(&options);
        self.options = options;
        self.recompute();
    }

    /// Replace the ballot collection
    ///
    /// Dropped (with a warning) while results are hidden at `now`.
    pub fn apply_ballots(&mut self, ballots: Vec<Ballot>, now: DateTime<Utc>) {
        if !self.visibility(now).is_visible() {
            tracing::warn!(
                "Dropping {} ballot(s) delivered while results are hidden",
                ballots.len()
            );
            return;
        }
        self.ballots = Some(ballots);
        self.recompute();
    }

    /// Forget the ballot collection and its tally
    pub fn clear_ballots(&mut self) {
        self.ballots = None;
        self.tally = None;
    }

    pub fn set_has_voted(&mut self, has_voted: bool) {
        self.has_voted = has_voted;
    }

    /// Evaluate visibility at `now`, clearing derived results while hidden
    pub fn visibility(&mut self, now: DateTime<Utc>) -> Visibility {
        let visibility = self.policy.evaluate(self.poll.as_ref(), self.has_voted, now);
        if !visibility.is_visible() && (self.ballots.is_some() || self.tally.is_some()) {
            self.clear_ballots();
        }
        visibility
    }

    /// Closed at `now` (locked or past the deadline)
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        self.poll.as_ref().is_some_and(|p| p.is_closed_at(now))
    }

    /// Whether the pending ballot may be submitted at `now`
    pub fn can_submit(&self, now: DateTime<Utc>) -> bool {
        self.poll.is_some()
            && self
                .editor
                .can_submit(self.is_closed(now), self.ranked_min_entries)
    }

    /// Recompute the tally from the current local state
    pub fn recompute(&mut self) {
        let Some(ballots) = &self.ballots else {
            self.tally = None;
            return;
        };

        let option_ids: Vec<OptionId> = self.options.iter().map(|o| o.id.clone()).collect();
        let result = tally::tally(self.kind(), &option_ids, ballots);
        tracing::debug!(
            "Recomputed tally: {} ballot(s) over {} option(s)",
            result.total_ballots,
            option_ids.len()
        );
        self.tally = Some(result);
    }

    /// Snapshot of the derived state at `now`
    pub fn view(&mut self, now: DateTime<Utc>) -> PollView {
        let visibility = self.visibility(now);
        PollView {
            poll: self.poll.clone(),
            options: self.options.clone(),
            has_voted: self.has_voted,
            visibility,
            closed: self.is_closed(now),
            can_submit: self.can_submit(now),
            selected: self.editor.selected().iter().cloned().collect(),
            ranking: self.editor.ranking().to_vec(),
            tally: if visibility.is_visible() {
                self.tally.clone()
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BallotPayload;
    use chrono::Duration;

    fn poll(kind: PollKind, now: DateTime<Utc>) -> Poll {
        Poll {
            id: "q1".to_string(),
            party_id: "p1".to_string(),
            kind,
            question: "Snacks?".to_string(),
            allow_guest_options: true,
            is_locked: false,
            deadline: None,
            created_by: "host".to_string(),
            created_at: now,
        }
    }

    fn option(id: &str, rank: i64) -> PollOption {
        PollOption {
            id: id.to_string(),
            text: id.to_string(),
            rank,
            created_by: "host".to_string(),
            created_at: Utc::now(),
        }
    }

    fn selection(voter: &str, ids: &[&str]) -> Ballot {
        Ballot {
            voter_id: voter.to_string(),
            payload: BallotPayload::Selection(ids.iter().map(|s| s.to_string()).collect()),
            updated_at: Utc::now(),
        }
    }

    fn ranking(voter: &str, ids: &[&str]) -> Ballot {
        Ballot {
            voter_id: voter.to_string(),
            payload: BallotPayload::Ranking(ids.iter().map(|s| s.to_string()).collect()),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_hidden_projection_drops_ballots() {
        let now = Utc::now();
        let mut projection = PollProjection::new(2);
        projection.apply_poll(poll(PollKind::Single, now));
        projection.apply_options(vec![option("a", 0), option("b", 1)]);

        projection.apply_ballots(vec![selection("u1", &["a"])], now);
        assert!(projection.ballots().is_none());
        assert!(projection.view(now).tally.is_none());
    }

    #[test]
    fn test_recompute_after_vote() {
        let now = Utc::now();
        let mut projection = PollProjection::new(2);
        projection.apply_poll(poll(PollKind::Single, now));
        projection.apply_options(vec![option("a", 0), option("b", 1)]);
        projection.set_has_voted(true);

        projection.apply_ballots(
            vec![selection("me", &["a"]), selection("u2", &["a"]), selection("u3", &["b"])],
            now,
        );

        let view = projection.view(now);
        assert_eq!(view.visibility, Visibility::Visible);
        let tally = view.tally.unwrap();
        assert_eq!(tally.count("a"), 2);
        assert_eq!(tally.count("b"), 1);
        assert_eq!(tally.total_ballots, 3);
    }

    #[test]
    fn test_deleted_option_excluded_but_ballot_kept() {
        let now = Utc::now();
        let mut projection = PollProjection::new(2);
        projection.apply_poll(poll(PollKind::Multiple, now));
        projection.apply_options(vec![option("a", 0), option("b", 1)]);
        projection.set_has_voted(true);
        projection.apply_ballots(vec![selection("u1", &["a", "b"])], now);

        projection.apply_options(vec![option("a", 0)]);
        let tally = projection.tally().unwrap();
        assert_eq!(tally.count("a"), 1);
        assert!(!tally.counts.contains_key("b"));
        assert_eq!(tally.total_ballots, 1);
        assert_eq!(projection.ballots().unwrap()[0].payload.len(), 2);
    }

    #[test]
    fn test_options_before_poll_keep_ranking_merge() {
        let now = Utc::now();
        let mut projection = PollProjection::new(2);

        // Options arrive first, kind still unknown
        projection.apply_options(vec![option("b", 1), option("a", 0)]);
        projection.apply_poll(poll(PollKind::Ranked, now));
        assert_eq!(projection.editor().ranking(), ["a".to_string(), "b".to_string()]);

        projection.editor_mut().move_ranked(&[1], 0);
        projection.apply_options(vec![option("a", 0), option("b", 1), option("c", 2)]);
        assert_eq!(
            projection.editor().ranking(),
            ["b".to_string(), "a".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_equal_ranks_keep_arrival_order() {
        let mut projection = PollProjection::new(2);
        projection.apply_options(vec![option("z", 1), option("y", 1), option("x", 0)]);
        let ids: Vec<&str> = projection.options().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "z", "y"]);
    }

    #[test]
    fn test_kind_is_immutable() {
        let now = Utc::now();
        let mut projection = PollProjection::new(2);
        projection.apply_poll(poll(PollKind::Ranked, now));
        projection.apply_poll(poll(PollKind::Single, now));
        assert_eq!(projection.kind(), PollKind::Ranked);
        assert_eq!(projection.poll().unwrap().kind, PollKind::Ranked);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let now = Utc::now();
        let mut projection = PollProjection::new(2);
        projection.apply_poll(poll(PollKind::Ranked, now));
        projection.apply_options(vec![option("a", 0), option("b", 1), option("c", 2)]);
        projection.set_has_voted(true);
        let ballots = vec![ranking("u1", &["c", "a", "b"]), ranking("u2", &["a"])];
        projection.apply_ballots(ballots.clone(), now);

        let first = projection.tally().cloned();
        projection.recompute();
        projection.apply_ballots(ballots, now);
        assert_eq!(projection.tally().cloned(), first);
        assert_eq!(
            serde_json::to_vec(&projection.tally()).unwrap(),
            serde_json::to_vec(&first).unwrap()
        );
    }

    #[test]
    fn test_can_submit_tracks_deadline() {
        let now = Utc::now();
        let mut projection = PollProjection::new(2);
        assert!(!projection.can_submit(now));

        projection.apply_poll(Poll {
            deadline: Some(now + Duration::minutes(10)),
            ..poll(PollKind::Single, now)
        });
        projection.apply_options(vec![option("a", 0)]);
        projection.editor_mut().select("a");

        assert!(projection.can_submit(now));
        let later = now + Duration::minutes(11);
        assert!(!projection.can_submit(later));

        let view = projection.view(later);
        assert!(view.closed);
        assert_eq!(view.visibility, Visibility::Visible);
    }
}
