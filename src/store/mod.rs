//! Document store capability
//!
//! The engine never talks to a concrete backend. Sessions receive an
//! `Arc<dyn DocumentStore>` exposing three primitives: snapshot
//! subscriptions, writes, and one-shot reads. [`InMemoryStore`] implements it
//! for tests and local use.

pub mod memory;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use memory::InMemoryStore;

/// Raw document fields
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Callback receiving every snapshot of a subscribed path
pub type SnapshotCallback = Arc<dyn Fn(Snapshot) + Send + Sync>;

/// Slash-separated location of a document or collection
///
/// An even number of segments names a document, an odd number a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    /// Build a path from raw segments
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse `a/b/c`, ignoring empty segments
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split('/').filter(|s| !s.is_empty()))
    }

    /// `parties/{party}/polls`
    pub fn polls(party_id: &str) -> Self {
        Self::new(["parties", party_id, "polls"])
    }

    /// `parties/{party}/polls/{poll}`
    pub fn poll(party_id: &str, poll_id: &str) -> Self {
        Self::polls(party_id).child(poll_id)
    }

    /// `parties/{party}/polls/{poll}/options`
    pub fn options(party_id: &str, poll_id: &str) -> Self {
        Self::poll(party_id, poll_id).child("options")
    }

    /// `parties/{party}/polls/{poll}/votes`
    pub fn votes(party_id: &str, poll_id: &str) -> Self {
        Self::poll(party_id, poll_id).child("votes")
    }

    /// `parties/{party}/polls/{poll}/votes/{voter}`
    pub fn vote(party_id: &str, poll_id: &str, voter_id: &str) -> Self {
        Self::votes(party_id, poll_id).child(voter_id)
    }

    /// `parties/{party}/rsvps`
    pub fn rsvps(party_id: &str) -> Self {
        Self::new(["parties", party_id, "rsvps"])
    }

    /// Append one segment
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// Path with the last segment removed
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Last segment (the document id for document paths)
    pub fn id(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn is_document(&self) -> bool {
        !self.segments.is_empty() && self.segments.len() % 2 == 0
    }

    pub fn is_collection(&self) -> bool {
        self.segments.len() % 2 == 1
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// A document as delivered inside a collection snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Document,
}

/// Full state of a subscribed path
///
/// Every delivery replaces the previous one; there are no deltas.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// A document path; `None` when the document does not exist
    Document(Option<Document>),
    /// A collection path, in creation order
    Collection(Vec<StoredDocument>),
}

impl Snapshot {
    /// Documents of a collection snapshot (empty for document snapshots)
    pub fn into_documents(self) -> Vec<StoredDocument> {
        match self {
            Self::Collection(docs) => docs,
            Self::Document(_) => Vec::new(),
        }
    }

    /// Fields of a document snapshot (`None` for collections)
    pub fn into_document(self) -> Option<Document> {
        match self {
            Self::Document(doc) => doc,
            Self::Collection(_) => None,
        }
    }
}

/// How a write combines with an existing document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    /// Overwrite only the given top-level fields
    Merge,
    /// Replace the whole document
    Replace,
}

/// Handle for an active subscription
///
/// Dropping the handle (or calling [`Subscription::cancel`]) stops delivery.
pub struct Subscription {
    path: DocumentPath,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(path: DocumentPath, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            path,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    /// Stop delivery now
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            tracing::debug!("Subscription to {} cancelled", self.path);
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

/// Persistence collaborator
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Deliver the current snapshot of `path` now and after every change
    fn subscribe(
        &self,
        path: &DocumentPath,
        on_snapshot: SnapshotCallback,
    ) -> Result<Subscription>;

    /// Write a document
    async fn write(&self, path: &DocumentPath, fields: Document, mode: WriteMode) -> Result<()>;

    /// Read a document once
    async fn read_once(&self, path: &DocumentPath) -> Result<Option<Document>>;
}
