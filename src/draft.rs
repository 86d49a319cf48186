//! Poll creation
//!
//! A [`PollDraft`] is what the creator typed. [`PollDraft::validate`] trims
//! it and checks it against [`PollConfig`]; [`create_poll`] writes the poll
//! document and one document per option, ranked by position.

use crate::clock::Clock;
use crate::config::PollConfig;
use crate::document;
use crate::store::{DocumentPath, DocumentStore, WriteMode};
use crate::types::{Poll, PollKind, PollOption};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unvalidated poll input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollDraft {
    pub question: String,
    pub kind: PollKind,
    pub allow_guest_options: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub options: Vec<String>,
}

/// Draft after trimming and validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidDraft {
    pub question: String,
    pub kind: PollKind,
    pub allow_guest_options: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub options: Vec<String>,
}

impl PollDraft {
    pub fn new(question: impl Into<String>, kind: PollKind) -> Self {
        Self {
            question: question.into(),
            kind,
            ..Self::default()
        }
    }

    /// Append an option text
    pub fn option(mut self, text: impl Into<String>) -> Self {
        self.options.push(text.into());
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_guest_options(mut self, allow: bool) -> Self {
        self.allow_guest_options = allow;
        self
    }

    /// Trim the draft and check it
    ///
    /// Blank option texts are dropped before counting.
    pub fn validate(&self, config: &PollConfig, now: DateTime<Utc>) -> Result<ValidDraft> {
        let question = self.question.trim();
        if question.is_empty() {
            return Err(Error::validation("question"));
        }

        let options: Vec<String> = self
            .options
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();

        if options.len() < config.min_options || options.len() > config.max_options {
            return Err(Error::validation(format!(
                "options: expected {}..={}, got {}",
                config.min_options,
                config.max_options,
                options.len()
            )));
        }
        if options
            .iter()
            .any(|o| o.chars().count() > config.max_option_length)
        {
            return Err(Error::validation("option text length"));
        }

        if let Some(deadline) = self.deadline {
            if deadline <= now {
                return Err(Error::validation("deadline"));
            }
        }

        Ok(ValidDraft {
            question: question.to_string(),
            kind: self.kind,
            allow_guest_options: self.allow_guest_options,
            deadline: self.deadline,
            options,
        })
    }
}

/// Validate `draft` and write the new poll with its options
///
/// Options are written one by one after the poll document; a failure part
/// way leaves the options written so far in place.
pub async fn create_poll(
    store: &dyn DocumentStore,
    clock: &dyn Clock,
    config: &PollConfig,
    party_id: &str,
    creator: &str,
    draft: &PollDraft,
) -> Result<Poll> {
    let now = clock.now();
    let draft = draft.validate(config, now)?;

    let poll = Poll {
        id: Uuid::new_v4().to_string(),
        party_id: party_id.to_string(),
        kind: draft.kind,
        question: draft.question,
        allow_guest_options: draft.allow_guest_options,
        is_locked: false,
        deadline: draft.deadline,
        created_by: creator.to_string(),
        created_at: now,
    };

    let poll_path = DocumentPath::poll(party_id, &poll.id);
    store
        .write(&poll_path, document::encode_poll(&poll), WriteMode::Replace)
        .await?;

    let options_path = DocumentPath::options(party_id, &poll.id);
    for (idx, text) in draft.options.into_iter().enumerate() {
        let option = PollOption {
            id: Uuid::new_v4().to_string(),
            text,
            rank: idx as i64,
            created_by: creator.to_string(),
            created_at: now,
        };
        store
            .write(
                &options_path.child(&option.id),
                document::encode_option(&option),
                WriteMode::Replace,
            )
            .await?;
    }

    tracing::info!(
        "Poll created: party={}, poll={}, kind={}",
        party_id,
        poll.id,
        poll.kind.as_str()
    );
    Ok(poll)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_valid_draft_is_trimmed() {
        let draft = PollDraft::new("  Where to eat?  ", PollKind::Single)
            .option(" Tacos ")
            .option("   ")
            .option("Pizza");

        let valid = draft.validate(&PollConfig::for_testing(), now()).unwrap();
        assert_eq!(valid.question, "Where to eat?");
        assert_eq!(valid.options, vec!["Tacos".to_string(), "Pizza".to_string()]);
    }

    #[test]
    fn test_rejected_drafts() {
        let config = PollConfig::for_testing();

        let blank = PollDraft::new("   ", PollKind::Single).option("a").option("b");
        assert!(matches!(
            blank.validate(&config, now()),
            Err(Error::Validation { .. })
        ));

        let one = PollDraft::new("Q", PollKind::Single).option("a").option(" ");
        assert!(one.validate(&config, now()).is_err());

        let mut many = PollDraft::new("Q", PollKind::Multiple);
        for i in 0..13 {
            many = many.option(format!("option {}", i));
        }
        assert!(many.validate(&config, now()).is_err());

        let long = PollDraft::new("Q", PollKind::Single)
            .option("a".repeat(config.max_option_length + 1))
            .option("b");
        assert!(long.validate(&config, now()).is_err());

        let past = PollDraft::new("Q", PollKind::Single)
            .option("a")
            .option("b")
            .with_deadline(now() - Duration::minutes(1));
        assert!(past.validate(&config, now()).is_err());
    }

    #[test]
    fn test_twelve_options_allowed() {
        let mut draft = PollDraft::new("Q", PollKind::Ranked);
        for i in 0..12 {
            draft = draft.option(format!("option {}", i));
        }
        assert!(draft.validate(&PollConfig::for_testing(), now()).is_ok());
    }

    #[test]
    fn test_create_poll_ranks_by_position() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let clock = ManualClock::new(now());
            let draft = PollDraft::new("Which day?", PollKind::Ranked)
                .option("Fri")
                .option("Sat")
                .option("Sun");

            let config = PollConfig::for_testing();
            let poll = create_poll(&store, &clock, &config, "p1", "host", &draft)
                .await
                .unwrap();
            assert_eq!(poll.created_by, "host");
            assert!(!poll.is_locked);

            let stored = store.get(&DocumentPath::poll("p1", &poll.id)).unwrap();
            assert_eq!(stored["type"], serde_json::json!("ranked"));

            let snapshot = store.read_collection(&DocumentPath::options("p1", &poll.id));
            let options = document::decode_options(&snapshot, now());
            let texts: Vec<&str> = options.iter().map(|o| o.text.as_str()).collect();
            assert_eq!(texts, vec!["Fri", "Sat", "Sun"]);
            let ranks: Vec<i64> = options.iter().map(|o| o.rank).collect();
            assert_eq!(ranks, vec![0, 1, 2]);
            assert_eq!(store.write_count(), 4);
        });
    }

    #[test]
    fn test_invalid_draft_writes_nothing() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let clock = ManualClock::new(now());
            let draft = PollDraft::new("", PollKind::Single).option("a").option("b");

            let config = PollConfig::for_testing();
            let result = create_poll(&store, &clock, &config, "p1", "host", &draft).await;
            assert!(result.is_err());
            assert_eq!(store.write_count(), 0);
        });
    }
}
