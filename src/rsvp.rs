//! RSVP replies and headcount
//!
//! Replies live at `parties/{party}/rsvps/{user}` with fields `status`,
//! `partySize`, optional `notes`, and `updatedAt`.

use crate::Result;
use crate::clock::Clock;
use crate::document::{decode_timestamp, encode_timestamp};
use crate::store::{Document, DocumentPath, DocumentStore, StoredDocument, WriteMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

pub const FIELD_STATUS: &str = "status";
pub const FIELD_PARTY_SIZE: &str = "partySize";
pub const FIELD_NOTES: &str = "notes";
pub const FIELD_UPDATED_AT: &str = "updatedAt";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsvpStatus {
    Yes,
    #[default]
    Maybe,
    No,
}

impl RsvpStatus {
    /// Parse a stored status; anything unknown is `Maybe`
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "yes" => Self::Yes,
            "no" => Self::No,
            _ => Self::Maybe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::Maybe => "maybe",
            Self::No => "no",
        }
    }
}

impl fmt::Display for RsvpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One guest's reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rsvp {
    pub user_id: String,
    pub status: RsvpStatus,
    pub party_size: i64,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsvpSummary {
    pub yes_count: usize,
    pub maybe_count: usize,
    pub no_count: usize,
    /// Sum of party sizes over "yes" replies
    pub headcount_yes: u64,
}

/// Reduce `(status, party_size)` pairs into a summary
///
/// Negative sizes count as zero.
pub fn tally_rsvps<I>(entries: I) -> RsvpSummary
where
    I: IntoIterator<Item = (RsvpStatus, i64)>,
{
    let mut summary = RsvpSummary::default();
    for (status, size) in entries {
        match status {
            RsvpStatus::Yes => {
                summary.yes_count += 1;
                summary.headcount_yes += size.max(0) as u64;
            }
            RsvpStatus::Maybe => summary.maybe_count += 1,
            RsvpStatus::No => summary.no_count += 1,
        }
    }
    summary
}

/// Size stored with a reply: 0 for "no", otherwise at least 1
pub fn normalize_party_size(status: RsvpStatus, size: i64) -> i64 {
    match status {
        RsvpStatus::No => 0,
        _ => size.max(1),
    }
}

/// Decode a reply; a missing status is `Maybe` and a missing size 0
pub fn decode_rsvp(stored: &StoredDocument, now: DateTime<Utc>) -> Rsvp {
    let doc = &stored.fields;
    Rsvp {
        user_id: stored.id.clone(),
        status: doc
            .get(FIELD_STATUS)
            .and_then(Value::as_str)
            .map(RsvpStatus::parse)
            .unwrap_or_default(),
        party_size: doc
            .get(FIELD_PARTY_SIZE)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .unwrap_or(0),
        notes: doc
            .get(FIELD_NOTES)
            .and_then(Value::as_str)
            .map(str::to_string),
        updated_at: doc
            .get(FIELD_UPDATED_AT)
            .and_then(decode_timestamp)
            .unwrap_or(now),
    }
}

/// Summary of a full `rsvps` collection snapshot
pub fn summarize(docs: &[StoredDocument], now: DateTime<Utc>) -> RsvpSummary {
    tally_rsvps(docs.iter().map(|d| {
        let rsvp = decode_rsvp(d, now);
        (rsvp.status, rsvp.party_size)
    }))
}

/// Upsert the reply of `user_id`, normalizing the party size
pub async fn save_rsvp(
    store: &dyn DocumentStore,
    clock: &dyn Clock,
    party_id: &str,
    user_id: &str,
    status: RsvpStatus,
    party_size: i64,
    notes: Option<&str>,
) -> Result<Rsvp> {
    let rsvp = Rsvp {
        user_id: user_id.to_string(),
        status,
        party_size: normalize_party_size(status, party_size),
        notes: notes.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
        updated_at: clock.now(),
    };

    let mut doc = Document::new();
    doc.insert(FIELD_STATUS.into(), json!(rsvp.status.as_str()));
    doc.insert(FIELD_PARTY_SIZE.into(), json!(rsvp.party_size));
    if let Some(notes) = &rsvp.notes {
        doc.insert(FIELD_NOTES.into(), json!(notes));
    }
    doc.insert(FIELD_UPDATED_AT.into(), encode_timestamp(rsvp.updated_at));

    store
        .write(&DocumentPath::rsvps(party_id).child(user_id), doc, WriteMode::Replace)
        .await?;

    tracing::info!(
        "RSVP saved: party={}, user={}, status={}, size={}",
        party_id,
        user_id,
        rsvp.status,
        rsvp.party_size
    );
    Ok(rsvp)
}
