//! Tally engine
//!
//! Pure functions turning ballots into per-option counts or Borda scores and
//! normalized percentages. Ids that are not part of the current option set
//! (references to deleted options) are ignored everywhere.

use crate::types::{Ballot, OptionId, PollKind, TallyResult};
use std::collections::BTreeMap;
use std::collections::HashSet;

/// Count how many ballots selected each option
///
/// Every id in `option_ids` starts at 0. Single and multiple choice polls use
/// the same rule; they only differ in how many ids a ballot carries.
///
/// ```rust
/// use poll::tally::count_selections;
///
/// let options = vec!["a".to_string(), "b".to_string()];
/// let ballots = vec![
///     vec!["a".to_string()],
///     vec!["a".to_string(), "b".to_string()],
///     vec!["gone".to_string()],
/// ];
///
/// let counts = count_selections(&options, &ballots);
/// assert_eq!(counts["a"], 2);
/// assert_eq!(counts["b"], 1);
/// assert!(!counts.contains_key("gone"));
/// ```
pub fn count_selections<'a, I, B>(option_ids: &[OptionId], ballots: I) -> BTreeMap<OptionId, u64>
where
    I: IntoIterator<Item = B>,
    B: IntoIterator<Item = &'a OptionId>,
{
    let mut counts: BTreeMap<OptionId, u64> =
        option_ids.iter().map(|id| (id.clone(), 0)).collect();

    for ballot in ballots {
        for id in ballot {
            if let Some(count) = counts.get_mut(id) {
                *count += 1;
            }
        }
    }

    counts
}

/// Borda count over (possibly partial) rankings
///
/// With `n` options, position `idx` earns `n - idx - 1` points, so the top
/// choice earns `n - 1` and anything at or beyond position `n - 1` earns 0.
/// Options a ranking leaves out earn nothing from it. All scores are 0 when
/// there is at most one option.
///
/// Unknown ids still occupy their position in the ranking.
pub fn borda_scores<'a, I, R>(option_ids: &[OptionId], rankings: I) -> BTreeMap<OptionId, u64>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = &'a OptionId>,
{
    let mut scores: BTreeMap<OptionId, u64> =
        option_ids.iter().map(|id| (id.clone(), 0)).collect();

    let n = option_ids.len();
    if n <= 1 {
        return scores;
    }

    for ranking in rankings {
        for (idx, id) in ranking.into_iter().enumerate() {
            let points = (n - 1).saturating_sub(idx) as u64;
            if let Some(score) = scores.get_mut(id) {
                *score += points;
            }
        }
    }

    scores
}

/// Normalize values to shares of their sum
///
/// Divides by `max(1, sum)`, so an all-zero (or empty) input yields 0 for
/// every option instead of NaN.
pub fn percentages(values: &BTreeMap<OptionId, u64>) -> BTreeMap<OptionId, f64> {
    let total = values.values().sum::<u64>().max(1) as f64;

    values
        .iter()
        .map(|(id, value)| (id.clone(), *value as f64 / total))
        .collect()
}

/// Full tally for a poll of `kind`
///
/// Ballots whose payload does not fit the kind contribute no points but
/// still count toward `total_ballots`.
pub fn tally(kind: PollKind, option_ids: &[OptionId], ballots: &[Ballot]) -> TallyResult {
    let mut result = TallyResult::empty(kind);
    result.total_ballots = ballots.len();

    match kind {
        PollKind::Single | PollKind::Multiple => {
            let counts = count_selections(
                option_ids,
                ballots.iter().filter_map(|b| b.payload.selection()),
            );
            result.percentages = percentages(&counts);
            result.counts = counts;
        }
        PollKind::Ranked => {
            let scores = borda_scores(
                option_ids,
                ballots.iter().filter_map(|b| b.payload.ranking()),
            );
            result.percentages = percentages(&scores);
            result.scores = scores;
        }
    }

    let mismatched = ballots.iter().filter(|b| !b.payload.fits(kind)).count();
    if mismatched > 0 {
        tracing::debug!(
            "Tally for {} poll ignored {} ballot(s) with a mismatched payload",
            kind,
            mismatched
        );
    }

    result
}

/// Ids that a ballot references but the option set no longer knows
pub fn stale_references<'a>(option_ids: &[OptionId], ballot: &'a Ballot) -> Vec<&'a OptionId> {
    let known: HashSet<&OptionId> = option_ids.iter().collect();
    let referenced: Vec<&OptionId> = match &ballot.payload {
        crate::types::BallotPayload::Selection(ids) => ids.iter().collect(),
        crate::types::BallotPayload::Ranking(ids) => ids.iter().collect(),
    };
    referenced.into_iter().filter(|id| !known.contains(id)).collect()
}
