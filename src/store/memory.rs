//! In-process implementation of the store protocol.
//!
//! Writes are applied immediately; the resulting notifications are queued and
//! only delivered by [`MemoryStore::flush`] or [`MemoryStore::deliver_next`],
//! one at a time and with the store lock released, so a callback may freely
//! subscribe, unsubscribe or write.

use super::types::{
    DocumentCallback, DocumentChange, QueryCallback, RawDocumentSnapshot, RawQuerySnapshot,
    StoreErrorCallback, Unsubscribe,
};
use super::DocumentStore;
use crate::error::StoreError;
use crate::types::{
    Direction, DocumentRef, Fields, Filter, FilterOp, QueryRef, SnapshotMetadata, Value,
};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Weak};

/// Identifier of one registered watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct WatchId(u64);

type SharedDocumentCallback = Arc<dyn Fn(RawDocumentSnapshot) + Send + Sync>;
type SharedQueryCallback = Arc<dyn Fn(RawQuerySnapshot) + Send + Sync>;
type SharedErrorCallback = Arc<dyn Fn(StoreError) + Send + Sync>;

struct DocumentWatch {
    reference: DocumentRef,
    callback: SharedDocumentCallback,
    on_error: SharedErrorCallback,
}

struct QueryWatch {
    query: QueryRef,
    callback: SharedQueryCallback,
    on_error: SharedErrorCallback,
    /// Result as last reported to this watch.
    current: Vec<(DocumentRef, Fields)>,
}

/// A queued notification.
enum Pending {
    Document(WatchId, RawDocumentSnapshot),
    Query(WatchId, RawQuerySnapshot),
    Error(WatchId, StoreError),
}

impl Pending {
    fn watch_id(&self) -> WatchId {
        match self {
            Pending::Document(id, _) | Pending::Query(id, _) | Pending::Error(id, _) => *id,
        }
    }
}

/// A notification resolved to its callback, ready to run without the lock.
enum Delivery {
    Document(SharedDocumentCallback, RawDocumentSnapshot),
    Query(SharedQueryCallback, RawQuerySnapshot),
    Error(SharedErrorCallback, StoreError),
}

#[derive(Default)]
struct MemoryState {
    /// Document data by path.
    documents: BTreeMap<String, Fields>,
    document_watches: HashMap<WatchId, DocumentWatch>,
    query_watches: HashMap<WatchId, QueryWatch>,
    pending: VecDeque<Pending>,
    next_id: u64,
}

impl MemoryState {
    fn next_watch_id(&mut self) -> WatchId {
        self.next_id += 1;
        WatchId(self.next_id)
    }

    fn document_snapshot(&self, reference: &DocumentRef) -> RawDocumentSnapshot {
        RawDocumentSnapshot {
            reference: reference.clone(),
            data: self.documents.get(reference.path()).cloned(),
            metadata: SnapshotMetadata::default(),
        }
    }

    /// Queue notifications for every watch affected by a write to `reference`.
    fn notify(&mut self, reference: &DocumentRef) {
        let snapshot = self.document_snapshot(reference);
        let mut queued = Vec::new();
        for (id, watch) in &self.document_watches {
            if &watch.reference == reference {
                queued.push(Pending::Document(*id, snapshot.clone()));
            }
        }

        let collection = reference.parent_path();
        for (id, watch) in self.query_watches.iter_mut() {
            if watch.query.collection_path() != collection {
                continue;
            }
            let next = run_query(&self.documents, &watch.query);
            let changes = diff_results(&watch.current, &next);
            if changes.is_empty() {
                continue;
            }
            watch.current = next;
            queued.push(Pending::Query(
                *id,
                RawQuerySnapshot {
                    query: watch.query.clone(),
                    changes,
                    size: watch.current.len(),
                    metadata: SnapshotMetadata::default(),
                },
            ));
        }

        // HashMap iteration order is arbitrary; keep delivery deterministic.
        queued.sort_by_key(|p| p.watch_id().0);
        self.pending.extend(queued);
    }

    fn remove_watch(&mut self, id: WatchId) {
        self.document_watches.remove(&id);
        self.query_watches.remove(&id);
        self.pending.retain(|p| p.watch_id() != id);
    }

    fn resolve(&self, pending: Pending) -> Option<Delivery> {
        match pending {
            Pending::Document(id, snapshot) => self
                .document_watches
                .get(&id)
                .map(|w| Delivery::Document(Arc::clone(&w.callback), snapshot)),
            Pending::Query(id, snapshot) => self
                .query_watches
                .get(&id)
                .map(|w| Delivery::Query(Arc::clone(&w.callback), snapshot)),
            Pending::Error(id, error) => {
                let on_error = self
                    .document_watches
                    .get(&id)
                    .map(|w| Arc::clone(&w.on_error))
                    .or_else(|| self.query_watches.get(&id).map(|w| Arc::clone(&w.on_error)));
                on_error.map(|cb| Delivery::Error(cb, error))
            }
        }
    }
}

/// In-memory document store with queued, one-at-a-time delivery.
///
/// Cloning yields another handle to the same store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a document.
    pub fn set(&self, reference: &DocumentRef, data: Fields) {
        let mut state = self.inner.lock();
        state.documents.insert(reference.path().to_string(), data);
        state.notify(reference);
    }

    /// Create or replace a document from a JSON object.
    pub fn set_json(&self, reference: &DocumentRef, data: serde_json::Value) {
        self.set(reference, Value::fields_from_json(data));
    }

    /// Merge fields into a document, creating it if needed.
    pub fn merge(&self, reference: &DocumentRef, fields: Fields) {
        let mut state = self.inner.lock();
        state
            .documents
            .entry(reference.path().to_string())
            .or_default()
            .extend(fields);
        state.notify(reference);
    }

    /// Remove a single field of an existing document.
    pub fn remove_field(&self, reference: &DocumentRef, field: &str) {
        let mut state = self.inner.lock();
        let removed = state
            .documents
            .get_mut(reference.path())
            .and_then(|data| data.remove(field))
            .is_some();
        if removed {
            state.notify(reference);
        }
    }

    /// Delete a document. Deleting a missing document is a no-op.
    pub fn delete(&self, reference: &DocumentRef) {
        let mut state = self.inner.lock();
        if state.documents.remove(reference.path()).is_some() {
            state.notify(reference);
        }
    }

    /// Current data of a document.
    pub fn get(&self, reference: &DocumentRef) -> Option<Fields> {
        self.inner.lock().documents.get(reference.path()).cloned()
    }

    /// Queue `error` on every watch of `reference`.
    pub fn fail_document(&self, reference: &DocumentRef, error: StoreError) {
        let mut state = self.inner.lock();
        let mut ids: Vec<WatchId> = state
            .document_watches
            .iter()
            .filter(|(_, w)| &w.reference == reference)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by_key(|id| id.0);
        for id in ids {
            state.pending.push_back(Pending::Error(id, error.clone()));
        }
    }

    /// Queue `error` on every watch of `query`.
    pub fn fail_query(&self, query: &QueryRef, error: StoreError) {
        let mut state = self.inner.lock();
        let mut ids: Vec<WatchId> = state
            .query_watches
            .iter()
            .filter(|(_, w)| &w.query == query)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by_key(|id| id.0);
        for id in ids {
            state.pending.push_back(Pending::Error(id, error.clone()));
        }
    }

    /// Deliver one queued notification. Returns false if none was pending.
    pub fn deliver_next(&self) -> bool {
        let delivery = {
            let mut state = self.inner.lock();
            loop {
                let Some(pending) = state.pending.pop_front() else {
                    return false;
                };
                if let Some(delivery) = state.resolve(pending) {
                    break delivery;
                }
            }
        };

        // Lock released: callbacks may re-enter the store.
        match delivery {
            Delivery::Document(callback, snapshot) => callback(snapshot),
            Delivery::Query(callback, snapshot) => callback(snapshot),
            Delivery::Error(callback, error) => callback(error),
        }
        true
    }

    /// Deliver notifications until the queue is empty, including those queued
    /// by the callbacks themselves. Returns the number delivered.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;
        while self.deliver_next() {
            delivered += 1;
        }
        delivered
    }

    /// Number of queued notifications.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Number of open subscriptions (documents and queries).
    pub fn live_subscriptions(&self) -> usize {
        let state = self.inner.lock();
        state.document_watches.len() + state.query_watches.len()
    }

    pub fn document_subscriptions(&self) -> usize {
        self.inner.lock().document_watches.len()
    }

    pub fn query_subscriptions(&self) -> usize {
        self.inner.lock().query_watches.len()
    }

    /// Current result of `query`, in result order.
    pub fn query_result(&self, query: &QueryRef) -> Vec<DocumentRef> {
        let state = self.inner.lock();
        run_query(&state.documents, query)
            .into_iter()
            .map(|(reference, _)| reference)
            .collect()
    }

    fn unsubscriber(&self, id: WatchId) -> Unsubscribe {
        let weak: Weak<Mutex<MemoryState>> = Arc::downgrade(&self.inner);
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().remove_watch(id);
            }
        })
    }
}

impl DocumentStore for MemoryStore {
    fn listen_document(
        &self,
        reference: &DocumentRef,
        on_snapshot: DocumentCallback,
        on_error: StoreErrorCallback,
    ) -> Unsubscribe {
        let id = {
            let mut state = self.inner.lock();
            let id = state.next_watch_id();
            let snapshot = state.document_snapshot(reference);
            state.document_watches.insert(
                id,
                DocumentWatch {
                    reference: reference.clone(),
                    callback: Arc::from(on_snapshot),
                    on_error: Arc::from(on_error),
                },
            );
            state.pending.push_back(Pending::Document(id, snapshot));
            id
        };
        self.unsubscriber(id)
    }

    fn listen_query(
        &self,
        query: &QueryRef,
        on_snapshot: QueryCallback,
        on_error: StoreErrorCallback,
    ) -> Unsubscribe {
        let id = {
            let mut state = self.inner.lock();
            let id = state.next_watch_id();
            let current = run_query(&state.documents, query);
            let changes = diff_results(&[], &current);
            let snapshot = RawQuerySnapshot {
                query: query.clone(),
                changes,
                size: current.len(),
                metadata: SnapshotMetadata::default(),
            };
            state.query_watches.insert(
                id,
                QueryWatch {
                    query: query.clone(),
                    callback: Arc::from(on_snapshot),
                    on_error: Arc::from(on_error),
                    current,
                },
            );
            state.pending.push_back(Pending::Query(id, snapshot));
            id
        };
        self.unsubscriber(id)
    }
}

/// Evaluate `query` against the stored documents.
fn run_query(documents: &BTreeMap<String, Fields>, query: &QueryRef) -> Vec<(DocumentRef, Fields)> {
    let mut matches: Vec<(DocumentRef, Fields)> = documents
        .iter()
        .map(|(path, data)| (DocumentRef::new(path.as_str()), data))
        .filter(|(reference, _)| reference.parent_path() == query.collection_path())
        .filter(|(_, data)| query.filters().iter().all(|f| matches_filter(data, f)))
        .map(|(reference, data)| (reference, data.clone()))
        .collect();

    matches.sort_by(|(a_ref, a), (b_ref, b)| {
        for order in query.orderings() {
            let ordering = compare_values(
                a.get(&order.field).unwrap_or(&Value::Null),
                b.get(&order.field).unwrap_or(&Value::Null),
            );
            let ordering = match order.direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a_ref.path().cmp(b_ref.path())
    });

    if let Some(limit) = query.max_results() {
        matches.truncate(limit);
    }
    matches
}

fn matches_filter(data: &Fields, filter: &Filter) -> bool {
    let Some(value) = data.get(&filter.field) else {
        return false;
    };
    match filter.op {
        FilterOp::Equal => values_equal(value, &filter.value),
        FilterOp::NotEqual => !values_equal(value, &filter.value),
        FilterOp::ArrayContains => match value {
            Value::Array(items) => items.iter().any(|item| values_equal(item, &filter.value)),
            _ => false,
        },
        op => {
            if type_rank(value) != type_rank(&filter.value) {
                return false;
            }
            let ordering = compare_values(value, &filter.value);
            match op {
                FilterOp::LessThan => ordering == Ordering::Less,
                FilterOp::LessThanOrEqual => ordering != Ordering::Greater,
                FilterOp::GreaterThan => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b) && compare_values(a, b) == Ordering::Equal
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Boolean(_) => 1,
        Value::Integer(_) | Value::Double(_) => 2,
        Value::String(_) => 3,
        Value::Reference(_) => 4,
        Value::Array(_) => 5,
        Value::Map(_) => 6,
    }
}

fn as_number(value: &Value) -> f64 {
    match value {
        Value::Integer(i) => *i as f64,
        Value::Double(d) => *d,
        _ => 0.0,
    }
}

/// Total order over values: by type first, then by value.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Integer(_) | Value::Double(_), _) => as_number(a)
            .partial_cmp(&as_number(b))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Reference(x), Value::Reference(y)) => x
            .path()
            .cmp(y.path())
            .then_with(|| (x.kind() as u8).cmp(&(y.kind() as u8))),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_values(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Map(x), Value::Map(y)) => x.len().cmp(&y.len()),
        _ => Ordering::Equal,
    }
}

/// Positional changes turning `old` into `new`.
///
/// Removals come first, then additions and moves in result order. Each index
/// is valid against the result with all earlier changes applied.
fn diff_results(
    old: &[(DocumentRef, Fields)],
    new: &[(DocumentRef, Fields)],
) -> Vec<DocumentChange> {
    let mut changes = Vec::new();
    let mut current: Vec<(DocumentRef, Fields)> = old.to_vec();

    let mut index = 0;
    while index < current.len() {
        if new.iter().any(|(reference, _)| reference == &current[index].0) {
            index += 1;
            continue;
        }
        let (reference, data) = current.remove(index);
        changes.push(DocumentChange::Removed {
            document: RawDocumentSnapshot::existing(reference, data),
            old_index: index,
        });
    }

    for (new_index, (reference, data)) in new.iter().enumerate() {
        match current.iter().position(|(r, _)| r == reference) {
            None => {
                current.insert(new_index, (reference.clone(), data.clone()));
                changes.push(DocumentChange::Added {
                    document: RawDocumentSnapshot::existing(reference.clone(), data.clone()),
                    new_index,
                });
            }
            Some(old_index) => {
                if old_index == new_index && &current[old_index].1 == data {
                    continue;
                }
                current.remove(old_index);
                current.insert(new_index, (reference.clone(), data.clone()));
                changes.push(DocumentChange::Modified {
                    document: RawDocumentSnapshot::existing(reference.clone(), data.clone()),
                    old_index,
                    new_index,
                });
            }
        }
    }

    changes
}
