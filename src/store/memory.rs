//! In-memory document store
//!
//! Keeps documents in a map keyed by path and delivers snapshots
//! synchronously to subscribers of the written document and of its parent
//! collection. Callbacks run after the document and subscriber locks are
//! released, so a callback may subscribe, cancel or read without
//! deadlocking. Every snapshot carries the store version it was taken at and
//! a subscriber never receives a version older than one it already saw, so
//! concurrent writers cannot leave it holding a stale snapshot. A callback
//! must not write to the store synchronously.

use super::{
    Document, DocumentPath, DocumentStore, Snapshot, SnapshotCallback, StoredDocument,
    Subscription, WriteMode,
};
use crate::{Result, store_error};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone)]
struct Entry {
    // Creation order, kept across replacements
    seq: u64,
    fields: Document,
}

struct Subscriber {
    path: DocumentPath,
    callback: SnapshotCallback,
    // Last store version delivered; held while the callback runs
    delivered: Arc<Mutex<u64>>,
}

type Delivery = (u64, Snapshot, SnapshotCallback, Arc<Mutex<u64>>);

/// Run `callback` unless the subscriber already saw `version` or newer
fn deliver(
    delivered: &Mutex<u64>,
    version: u64,
    snapshot: Snapshot,
    callback: &SnapshotCallback,
) -> bool {
    let Ok(mut last) = delivered.lock() else {
        return false;
    };
    if version <= *last {
        tracing::debug!("Skipping snapshot v{} (already delivered v{})", version, *last);
        return false;
    }
    *last = version;
    callback(snapshot);
    true
}

type Subscribers = Arc<RwLock<HashMap<u64, Subscriber>>>;

/// Store backed by process memory
pub struct InMemoryStore {
    documents: RwLock<BTreeMap<DocumentPath, Entry>>,
    subscribers: Subscribers,
    next_subscriber: AtomicU64,
    next_seq: AtomicU64,
    // Bumped under the document write lock on every change
    version: AtomicU64,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
    reads: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_subscriber: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
            version: AtomicU64::new(1),
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    /// Make every following write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of one-shot reads so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Active subscriptions on exactly `path`
    pub fn subscriber_count(&self, path: &DocumentPath) -> usize {
        self.subscribers
            .read()
            .map(|subs| subs.values().filter(|s| &s.path == path).count())
            .unwrap_or(0)
    }

    /// Current fields of a document
    pub fn get(&self, path: &DocumentPath) -> Option<Document> {
        self.documents
            .read()
            .ok()
            .and_then(|docs| docs.get(path).map(|e| e.fields.clone()))
    }

    /// Current documents of a collection, in creation order
    pub fn read_collection(&self, path: &DocumentPath) -> Vec<StoredDocument> {
        self.documents
            .read()
            .map(|docs| Self::snapshot_of(&docs, path).into_documents())
            .unwrap_or_default()
    }

    /// Delete a document and notify subscribers
    pub fn delete(&self, path: &DocumentPath) -> Result<bool> {
        let removed = {
            let mut docs = self
                .documents
                .write()
                .map_err(|_| store_error!("Document map write error"))?;
            let removed = docs.remove(path).is_some();
            if removed {
                self.version.fetch_add(1, Ordering::SeqCst);
            }
            removed
        };
        if removed {
            tracing::debug!("Deleted {}", path);
            self.notify(path)?;
        }
        Ok(removed)
    }

    /// Apply a write without the failure switch
    fn apply(&self, path: &DocumentPath, fields: Document, mode: WriteMode) -> Result<()> {
        if !path.is_document() {
            return Err(store_error!("{} is not a document path", path));
        }

        {
            let mut docs = self
                .documents
                .write()
                .map_err(|_| store_error!("Document map write error"))?;

            match docs.get_mut(path) {
                Some(entry) => match mode {
                    WriteMode::Replace => entry.fields = fields,
                    WriteMode::Merge => entry.fields.extend(fields),
                },
                None => {
                    let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                    docs.insert(path.clone(), Entry { seq, fields });
                }
            }
            self.version.fetch_add(1, Ordering::SeqCst);
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        self.notify(path)
    }

    fn snapshot_of(docs: &BTreeMap<DocumentPath, Entry>, path: &DocumentPath) -> Snapshot {
        if path.is_document() {
            return Snapshot::Document(docs.get(path).map(|e| e.fields.clone()));
        }

        let depth = path.segments().len() + 1;
        let mut children: Vec<(u64, StoredDocument)> = docs
            .iter()
            .filter(|(p, _)| p.segments().len() == depth && p.parent().as_ref() == Some(path))
            .map(|(p, e)| {
                (
                    e.seq,
                    StoredDocument {
                        id: p.id().unwrap_or_default().to_string(),
                        fields: e.fields.clone(),
                    },
                )
            })
            .collect();
        children.sort_by_key(|(seq, _)| *seq);
        Snapshot::Collection(children.into_iter().map(|(_, d)| d).collect())
    }

    /// Deliver fresh snapshots to subscribers of `path` and its collection
    fn notify(&self, path: &DocumentPath) -> Result<()> {
        let parent = path.parent();
        let targets: Vec<(DocumentPath, SnapshotCallback, Arc<Mutex<u64>>)> = {
            let subs = self
                .subscribers
                .read()
                .map_err(|_| store_error!("Subscriber map read error"))?;
            subs.values()
                .filter(|s| &s.path == path || Some(&s.path) == parent.as_ref())
                .map(|s| (s.path.clone(), s.callback.clone(), s.delivered.clone()))
                .collect()
        };

        let deliveries: Vec<Delivery> = {
            let docs = self
                .documents
                .read()
                .map_err(|_| store_error!("Document map read error"))?;
            let version = self.version.load(Ordering::SeqCst);
            targets
                .into_iter()
                .map(|(p, cb, delivered)| (version, Self::snapshot_of(&docs, &p), cb, delivered))
                .collect()
        };

        for (version, snapshot, callback, delivered) in deliveries {
            deliver(&delivered, version, snapshot, &callback);
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn subscribe(
        &self,
        path: &DocumentPath,
        on_snapshot: SnapshotCallback,
    ) -> Result<Subscription> {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let delivered = Arc::new(Mutex::new(0));
        {
            let mut subs = self
                .subscribers
                .write()
                .map_err(|_| store_error!("Subscriber map write error"))?;
            subs.insert(
                id,
                Subscriber {
                    path: path.clone(),
                    callback: on_snapshot.clone(),
                    delivered: delivered.clone(),
                },
            );
        }

        let (version, initial) = {
            let docs = self
                .documents
                .read()
                .map_err(|_| store_error!("Document map read error"))?;
            (self.version.load(Ordering::SeqCst), Self::snapshot_of(&docs, path))
        };
        deliver(&delivered, version, initial, &on_snapshot);

        let registry = Arc::downgrade(&self.subscribers);
        Ok(Subscription::new(path.clone(), move || {
            if let Some(registry) = registry.upgrade() {
                if let Ok(mut subs) = registry.write() {
                    subs.remove(&id);
                }
            }
        }))
    }

    async fn write(&self, path: &DocumentPath, fields: Document, mode: WriteMode) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(store_error!("Write to {} rejected", path));
        }
        self.apply(path, fields, mode)
    }

    async fn read_once(&self, path: &DocumentPath) -> Result<Option<Document>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let docs = self
            .documents
            .read()
            .map_err(|_| store_error!("Document map read error"))?;
        Ok(docs.get(path).map(|e| e.fields.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<Snapshot>>>, SnapshotCallback) {
        let seen: Arc<Mutex<Vec<Snapshot>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: SnapshotCallback = Arc::new(move |snapshot| {
            sink.lock().unwrap().push(snapshot);
        });
        (seen, callback)
    }

    #[test]
    fn test_merge_and_replace() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let path = DocumentPath::parse("parties/p1/polls/q1");

            store
                .write(
                    &path,
                    fields(json!({"question": "Q", "isLocked": false})),
                    WriteMode::Replace,
                )
                .await
                .unwrap();
            store
                .write(&path, fields(json!({"isLocked": true})), WriteMode::Merge)
                .await
                .unwrap();
            assert_eq!(store.get(&path).unwrap()["question"], json!("Q"));
            assert_eq!(store.get(&path).unwrap()["isLocked"], json!(true));

            store
                .write(&path, fields(json!({"isLocked": false})), WriteMode::Replace)
                .await
                .unwrap();
            assert!(!store.get(&path).unwrap().contains_key("question"));
            assert_eq!(store.write_count(), 3);
        });
    }

    #[test]
    fn test_collection_snapshots_in_creation_order() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let options = DocumentPath::options("p1", "q1");
            let (seen, callback) = recorder();

            let _subscription = store.subscribe(&options, callback).unwrap();
            store
                .write(&options.child("zz"), fields(json!({"text": "first"})), WriteMode::Replace)
                .await
                .unwrap();
            store
                .write(&options.child("aa"), fields(json!({"text": "second"})), WriteMode::Replace)
                .await
                .unwrap();

            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 3); // initial + two writes
            let ids: Vec<String> = seen[2]
                .clone()
                .into_documents()
                .into_iter()
                .map(|d| d.id)
                .collect();
            assert_eq!(ids, vec!["zz".to_string(), "aa".to_string()]);
        });
    }

    #[test]
    fn test_cancelled_subscription_stops_delivery() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let votes = DocumentPath::votes("p1", "q1");
            let (seen, callback) = recorder();

            let subscription = store.subscribe(&votes, callback).unwrap();
            assert_eq!(store.subscriber_count(&votes), 1);
            subscription.cancel();
            assert_eq!(store.subscriber_count(&votes), 0);

            store
                .write(&votes.child("u1"), fields(json!({"rankings": []})), WriteMode::Replace)
                .await
                .unwrap();
            assert_eq!(seen.lock().unwrap().len(), 1);
        });
    }

    #[test]
    fn test_failed_writes_leave_state_untouched() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let path = DocumentPath::vote("p1", "q1", "u1");
            store.set_fail_writes(true);

            let result = store.write(&path, Document::new(), WriteMode::Replace).await;
            assert!(matches!(result, Err(crate::Error::Store { .. })));
            assert!(store.get(&path).is_none());
            assert_eq!(store.write_count(), 0);
        });
    }

    #[test]
    fn test_delete_notifies_collection() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let options = DocumentPath::options("p1", "q1");
            store
                .write(&options.child("a"), fields(json!({"text": "A"})), WriteMode::Replace)
                .await
                .unwrap();
            let (seen, callback) = recorder();
            let _subscription = store.subscribe(&options, callback).unwrap();

            assert!(store.delete(&options.child("a")).unwrap());
            assert!(!store.delete(&options.child("a")).unwrap());

            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert!(seen[1].clone().into_documents().is_empty());
        });
    }

    #[test]
    fn test_older_snapshot_never_replaces_newer() {
        let (seen, callback) = recorder();
        let delivered = Mutex::new(0);
        let newer = Snapshot::Collection(vec![StoredDocument {
            id: "u1".into(),
            fields: Document::new(),
        }]);

        assert!(deliver(&delivered, 3, newer.clone(), &callback));
        assert!(!deliver(&delivered, 2, Snapshot::Collection(Vec::new()), &callback));
        assert!(!deliver(&delivered, 3, newer.clone(), &callback));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], newer);
    }

    #[test]
    fn test_concurrent_writers_leave_latest_snapshot() {
        let store = Arc::new(InMemoryStore::new());
        let votes = DocumentPath::votes("p1", "q1");
        let (seen, callback) = recorder();
        let _subscription = store.subscribe(&votes, callback).unwrap();

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let path = votes.child(&format!("u{}", i));
                std::thread::spawn(move || {
                    tokio_test::block_on(store.write(
                        &path,
                        fields(json!({"selectedOptionIds": ["a"]})),
                        WriteMode::Replace,
                    ))
                    .unwrap();
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        let last = seen.last().cloned().unwrap().into_documents();
        assert_eq!(last.len(), 8);
        assert_eq!(last, store.read_collection(&votes));
    }

    #[test]
    fn test_rejects_collection_writes() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let result = store
                .write(&DocumentPath::options("p1", "q1"), Document::new(), WriteMode::Merge)
                .await;
            assert!(result.is_err());
        });
    }
}
