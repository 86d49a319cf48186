//! Mapping between raw store documents and typed records
//!
//! Decoding never fails. A missing or mistyped field takes a default: empty
//! string, `false`, `0` (the position in the snapshot for an option's rank),
//! the supplied `now` for timestamps, and [`PollKind::Single`] for an unknown
//! kind. Optional timestamps that cannot be read become `None`.

use crate::store::{Document, StoredDocument};
use crate::types::{Ballot, BallotPayload, Poll, PollKind, PollOption};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashSet};

pub const FIELD_PARTY_ID: &str = "partyId";
pub const FIELD_TYPE: &str = "type";
pub const FIELD_QUESTION: &str = "question";
pub const FIELD_ALLOW_GUEST_OPTIONS: &str = "allowGuestOptions";
pub const FIELD_IS_LOCKED: &str = "isLocked";
pub const FIELD_DEADLINE_AT: &str = "deadlineAt";
pub const FIELD_CREATED_BY: &str = "createdBy";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_TEXT: &str = "text";
pub const FIELD_RANK: &str = "rank";
pub const FIELD_SELECTED_OPTION_IDS: &str = "selectedOptionIds";
pub const FIELD_RANKINGS: &str = "rankings";
pub const FIELD_UPDATED_AT: &str = "updatedAt";

fn string_field(doc: &Document, key: &str) -> String {
    doc.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn bool_field(doc: &Document, key: &str) -> bool {
    doc.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn int_field(doc: &Document, key: &str) -> Option<i64> {
    let value = doc.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

/// Read a timestamp stored as RFC 3339 text, unix seconds, or a
/// `{ "seconds", "nanoseconds" }` object
pub fn decode_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(number) => match number.as_i64() {
            Some(seconds) => Utc.timestamp_opt(seconds, 0).single(),
            None => number
                .as_f64()
                .filter(|f| f.is_finite())
                .and_then(|f| Utc.timestamp_millis_opt((f * 1000.0) as i64).single()),
        },
        Value::Object(map) => {
            let seconds = map.get("seconds").and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .and_then(Value::as_u64)
                .unwrap_or(0)
                .min(999_999_999) as u32;
            Utc.timestamp_opt(seconds, nanos).single()
        }
        _ => None,
    }
}

pub fn encode_timestamp(time: DateTime<Utc>) -> Value {
    Value::String(time.to_rfc3339())
}

fn time_field(doc: &Document, key: &str) -> Option<DateTime<Utc>> {
    doc.get(key).and_then(decode_timestamp)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Decode a poll document
pub fn decode_poll(id: &str, doc: &Document, now: DateTime<Utc>) -> Poll {
    Poll {
        id: id.to_string(),
        party_id: string_field(doc, FIELD_PARTY_ID),
        kind: doc
            .get(FIELD_TYPE)
            .and_then(Value::as_str)
            .map(PollKind::parse_lenient)
            .unwrap_or_default(),
        question: string_field(doc, FIELD_QUESTION),
        allow_guest_options: bool_field(doc, FIELD_ALLOW_GUEST_OPTIONS),
        is_locked: bool_field(doc, FIELD_IS_LOCKED),
        deadline: time_field(doc, FIELD_DEADLINE_AT),
        created_by: string_field(doc, FIELD_CREATED_BY),
        created_at: time_field(doc, FIELD_CREATED_AT).unwrap_or(now),
    }
}

pub fn encode_poll(poll: &Poll) -> Document {
    let mut doc = Document::new();
    doc.insert(FIELD_PARTY_ID.into(), json!(poll.party_id));
    doc.insert(FIELD_TYPE.into(), json!(poll.kind.as_str()));
    doc.insert(FIELD_QUESTION.into(), json!(poll.question));
    doc.insert(FIELD_ALLOW_GUEST_OPTIONS.into(), json!(poll.allow_guest_options));
    doc.insert(FIELD_IS_LOCKED.into(), json!(poll.is_locked));
    doc.insert(
        FIELD_DEADLINE_AT.into(),
        poll.deadline.map(encode_timestamp).unwrap_or(Value::Null),
    );
    doc.insert(FIELD_CREATED_BY.into(), json!(poll.created_by));
    doc.insert(FIELD_CREATED_AT.into(), encode_timestamp(poll.created_at));
    doc
}

/// Decode one option; `position` is its index in the snapshot
pub fn decode_option(position: usize, stored: &StoredDocument, now: DateTime<Utc>) -> PollOption {
    let doc = &stored.fields;
    PollOption {
        id: stored.id.clone(),
        text: string_field(doc, FIELD_TEXT),
        rank: int_field(doc, FIELD_RANK).unwrap_or(position as i64),
        created_by: string_field(doc, FIELD_CREATED_BY),
        created_at: time_field(doc, FIELD_CREATED_AT).unwrap_or(now),
    }
}

/// Decode an option collection, ordered by rank
///
/// The sort is stable: options with equal ranks keep snapshot order.
pub fn decode_options(docs: &[StoredDocument], now: DateTime<Utc>) -> Vec<PollOption> {
    let mut options: Vec<PollOption> = docs
        .iter()
        .enumerate()
        .map(|(i, d)| decode_option(i, d, now))
        .collect();
    options.sort_by_key(|o| o.rank);
    options
}

pub fn encode_option(option: &PollOption) -> Document {
    let mut doc = Document::new();
    doc.insert(FIELD_TEXT.into(), json!(option.text));
    doc.insert(FIELD_RANK.into(), json!(option.rank));
    doc.insert(FIELD_CREATED_BY.into(), json!(option.created_by));
    doc.insert(FIELD_CREATED_AT.into(), encode_timestamp(option.created_at));
    doc
}

/// Decode a vote document; its id is the voter id
///
/// The payload shape comes from the stored `type` when present, otherwise
/// from which list field the document carries. Non-string entries are
/// dropped and repeated ranking entries keep their first position.
pub fn decode_ballot(stored: &StoredDocument, now: DateTime<Utc>) -> Ballot {
    let doc = &stored.fields;
    let ranked = match doc.get(FIELD_TYPE).and_then(Value::as_str) {
        Some(raw) => PollKind::parse_lenient(raw) == PollKind::Ranked,
        None => doc.contains_key(FIELD_RANKINGS) && !doc.contains_key(FIELD_SELECTED_OPTION_IDS),
    };

    let payload = if ranked {
        let mut seen = HashSet::new();
        let ranking = string_list(doc.get(FIELD_RANKINGS))
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        BallotPayload::Ranking(ranking)
    } else {
        let selection: BTreeSet<String> = string_list(doc.get(FIELD_SELECTED_OPTION_IDS))
            .into_iter()
            .collect();
        BallotPayload::Selection(selection)
    };

    Ballot {
        voter_id: stored.id.clone(),
        payload,
        updated_at: time_field(doc, FIELD_UPDATED_AT).unwrap_or(now),
    }
}

pub fn decode_ballots(docs: &[StoredDocument], now: DateTime<Utc>) -> Vec<Ballot> {
    docs.iter().map(|d| decode_ballot(d, now)).collect()
}

/// Fields of a full ballot replacement
pub fn encode_ballot(kind: PollKind, payload: &BallotPayload, now: DateTime<Utc>) -> Document {
    let mut doc = Document::new();
    doc.insert(FIELD_TYPE.into(), json!(kind.as_str()));
    match payload {
        BallotPayload::Selection(ids) => {
            doc.insert(FIELD_SELECTED_OPTION_IDS.into(), json!(ids));
        }
        BallotPayload::Ranking(ids) => {
            doc.insert(FIELD_RANKINGS.into(), json!(ids));
        }
    }
    doc.insert(FIELD_UPDATED_AT.into(), encode_timestamp(now));
    doc
}
