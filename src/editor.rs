//! The viewer's in-progress ballot
//!
//! Single choice keeps at most one selected id, multiple choice toggles ids
//! in a set, and ranked polls ignore clicks and change only through
//! [`BallotEditor::move_ranked`].

use crate::types::{BallotPayload, OptionId, PollKind, PollOption};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BallotEditor {
    kind: PollKind,
    selected: BTreeSet<OptionId>,
    ranking: Vec<OptionId>,
}

impl BallotEditor {
    pub fn new(kind: PollKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn kind(&self) -> PollKind {
        self.kind
    }

    /// Switch the kind once the poll document is known
    ///
    /// Selections made under another kind are dropped; the ranking is kept
    /// since it mirrors the option list.
    pub fn set_kind(&mut self, kind: PollKind) {
        if self.kind != kind {
            self.kind = kind;
            self.selected.clear();
        }
    }

    pub fn selected(&self) -> &BTreeSet<OptionId> {
        &self.selected
    }

    pub fn ranking(&self) -> &[OptionId] {
        &self.ranking
    }

    /// Click on an option
    pub fn select(&mut self, option_id: &str) {
        match self.kind {
            PollKind::Single => {
                self.selected.clear();
                self.selected.insert(option_id.to_string());
            }
            PollKind::Multiple => {
                if !self.selected.remove(option_id) {
                    self.selected.insert(option_id.to_string());
                }
            }
            PollKind::Ranked => {}
        }
    }

    /// Move the entries at `sources` so they land at `destination`
    ///
    /// `destination` is an index into the ranking as it was before the move;
    /// it is shifted left by the number of moved entries in front of it and
    /// clamped to the end. Moved entries keep their relative order.
    /// Out-of-range sources are ignored.
    pub fn move_ranked(&mut self, sources: &[usize], destination: usize) {
        let len = self.ranking.len();
        let sources: BTreeSet<usize> = sources.iter().copied().filter(|i| *i < len).collect();
        if sources.is_empty() {
            return;
        }

        let moving: Vec<OptionId> = sources.iter().map(|i| self.ranking[*i].clone()).collect();
        let mut rest: Vec<OptionId> = self
            .ranking
            .iter()
            .enumerate()
            .filter(|(i, _)| !sources.contains(i))
            .map(|(_, id)| id.clone())
            .collect();

        let before = sources.iter().filter(|i| **i < destination).count();
        let at = destination.saturating_sub(before).min(rest.len());

        rest.splice(at..at, moving);
        self.ranking = rest;
    }

    /// Fold a new option list into the editor
    ///
    /// Ranked entries whose option still exists keep their relative order,
    /// unseen options are appended in list order. Selected ids of removed
    /// options are dropped.
    pub fn merge_options(&mut self, options: &[PollOption]) {
        let current: HashSet<&str> = options.iter().map(|o| o.id.as_str()).collect();

        let mut merged: Vec<OptionId> = self
            .ranking
            .iter()
            .filter(|id| current.contains(id.as_str()))
            .cloned()
            .collect();
        let already: HashSet<OptionId> = merged.iter().cloned().collect();
        merged.extend(
            options
                .iter()
                .filter(|o| !already.contains(&o.id))
                .map(|o| o.id.clone()),
        );
        self.ranking = merged;

        self.selected.retain(|id| current.contains(id.as_str()));
    }

    /// Whether the pending ballot may be submitted
    pub fn can_submit(&self, closed: bool, ranked_min_entries: usize) -> bool {
        if closed {
            return false;
        }
        match self.kind {
            PollKind::Single => self.selected.len() == 1,
            PollKind::Multiple => !self.selected.is_empty(),
            PollKind::Ranked => self.ranking.len() >= ranked_min_entries,
        }
    }

    /// Ballot content to write for this kind
    pub fn payload(&self) -> BallotPayload {
        match self.kind {
            PollKind::Single | PollKind::Multiple => {
                BallotPayload::Selection(self.selected.clone())
            }
            PollKind::Ranked => BallotPayload::Ranking(self.ranking.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn option(id: &str, rank: i64) -> PollOption {
        PollOption {
            id: id.to_string(),
            text: id.to_uppercase(),
            rank,
            created_by: "host".to_string(),
            created_at: Utc::now(),
        }
    }

    fn ranked_editor(order: &[&str]) -> BallotEditor {
        let mut editor = BallotEditor::new(PollKind::Ranked);
        let options: Vec<PollOption> = order
            .iter()
            .enumerate()
            .map(|(i, id)| option(id, i as i64))
            .collect();
        editor.merge_options(&options);
        editor
    }

    fn order(editor: &BallotEditor) -> Vec<&str> {
        editor.ranking().iter().map(String::as_str).collect()
    }

    #[test]
    fn test_single_replaces_selection() {
        let mut editor = BallotEditor::new(PollKind::Single);
        editor.select("a");
        editor.select("b");
        assert_eq!(editor.selected().len(), 1);
        assert!(editor.selected().contains("b"));
        assert!(editor.can_submit(false, 2));
    }

    #[test]
    fn test_multiple_toggles() {
        let mut editor = BallotEditor::new(PollKind::Multiple);
        assert!(!editor.can_submit(false, 2));

        editor.select("a");
        editor.select("b");
        editor.select("a");
        assert_eq!(editor.selected().iter().collect::<Vec<_>>(), vec!["b"]);
        assert!(editor.can_submit(false, 2));

        editor.select("b");
        assert!(editor.selected().is_empty());
        assert!(!editor.can_submit(false, 2));
    }

    #[test]
    fn test_ranked_ignores_clicks() {
        let mut editor = ranked_editor(&["a", "b"]);
        editor.select("a");
        assert!(editor.selected().is_empty());
        assert_eq!(order(&editor), vec!["a", "b"]);
    }

    #[test]
    fn test_closed_poll_never_submittable() {
        let mut editor = BallotEditor::new(PollKind::Single);
        editor.select("a");
        assert!(!editor.can_submit(true, 2));
    }

    #[test]
    fn test_ranked_minimum_entries() {
        let editor = ranked_editor(&["a", "b"]);
        assert!(editor.can_submit(false, 2));
        assert!(!editor.can_submit(false, 3));

        let lonely = ranked_editor(&["a"]);
        assert!(!lonely.can_submit(false, 2));
    }

    #[test]
    fn test_move_single_entry_down() {
        let mut editor = ranked_editor(&["a", "b", "c", "d"]);
        // Drop "a" between "c" and "d"
        editor.move_ranked(&[0], 3);
        assert_eq!(order(&editor), vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_move_single_entry_up() {
        let mut editor = ranked_editor(&["a", "b", "c", "d"]);
        editor.move_ranked(&[3], 0);
        assert_eq!(order(&editor), vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn test_move_block_to_end() {
        let mut editor = ranked_editor(&["a", "b", "c", "d"]);
        editor.move_ranked(&[2, 0], 4);
        assert_eq!(order(&editor), vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_move_clamps_and_ignores_bad_sources() {
        let mut editor = ranked_editor(&["a", "b", "c"]);
        editor.move_ranked(&[0], 99);
        assert_eq!(order(&editor), vec!["b", "c", "a"]);

        editor.move_ranked(&[7], 0);
        assert_eq!(order(&editor), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_merge_keeps_existing_order_and_appends() {
        let mut editor = ranked_editor(&["a", "b"]);
        editor.move_ranked(&[1], 0);
        assert_eq!(order(&editor), vec!["b", "a"]);

        editor.merge_options(&[option("a", 0), option("b", 1), option("c", 2)]);
        assert_eq!(order(&editor), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_merge_drops_removed_options() {
        let mut editor = ranked_editor(&["a", "b", "c"]);
        editor.merge_options(&[option("c", 0), option("a", 1)]);
        assert_eq!(order(&editor), vec!["a", "c"]);

        let mut multi = BallotEditor::new(PollKind::Multiple);
        multi.merge_options(&[option("a", 0), option("b", 1)]);
        multi.select("a");
        multi.select("b");
        multi.merge_options(&[option("b", 1)]);
        assert_eq!(multi.selected().iter().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_payload_follows_kind() {
        let mut editor = BallotEditor::new(PollKind::Multiple);
        editor.merge_options(&[option("a", 0), option("b", 1)]);
        editor.select("b");
        assert_eq!(
            editor.payload(),
            BallotPayload::Selection(["b".to_string()].into_iter().collect())
        );

        editor.set_kind(PollKind::Ranked);
        assert!(editor.selected().is_empty());
        assert_eq!(
            editor.payload(),
            BallotPayload::Ranking(vec!["a".to_string(), "b".to_string()])
        );
    }
}
