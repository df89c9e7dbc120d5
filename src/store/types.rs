//! Raw observations delivered by a backing store.

use crate::error::StoreError;
use crate::types::{DocumentRef, Fields, QueryRef, SnapshotMetadata};

/// State of one document as observed by the store.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDocumentSnapshot {
    pub reference: DocumentRef,
    /// Present iff the document exists.
    pub data: Option<Fields>,
    pub metadata: SnapshotMetadata,
}

impl RawDocumentSnapshot {
    pub fn existing(reference: DocumentRef, data: Fields) -> Self {
        Self {
            reference,
            data: Some(data),
            metadata: SnapshotMetadata::default(),
        }
    }

    pub fn missing(reference: DocumentRef) -> Self {
        Self {
            reference,
            data: None,
            metadata: SnapshotMetadata::default(),
        }
    }
}

/// A positional change within a query result.
///
/// Indices are relative to the result as it stands after every earlier
/// change of the same batch has been applied.
#[derive(Clone, Debug, PartialEq)]
pub enum DocumentChange {
    Added {
        document: RawDocumentSnapshot,
        new_index: usize,
    },
    Removed {
        document: RawDocumentSnapshot,
        old_index: usize,
    },
    Modified {
        document: RawDocumentSnapshot,
        old_index: usize,
        new_index: usize,
    },
}

impl DocumentChange {
    pub fn document(&self) -> &RawDocumentSnapshot {
        match self {
            DocumentChange::Added { document, .. }
            | DocumentChange::Removed { document, .. }
            | DocumentChange::Modified { document, .. } => document,
        }
    }
}

/// One batch of changes to a live query.
#[derive(Clone, Debug, PartialEq)]
pub struct RawQuerySnapshot {
    pub query: QueryRef,
    pub changes: Vec<DocumentChange>,
    /// Number of matching documents after this batch.
    pub size: usize,
    pub metadata: SnapshotMetadata,
}

/// Receives every state of a watched document.
pub type DocumentCallback = Box<dyn Fn(RawDocumentSnapshot) + Send + Sync>;

/// Receives every change batch of a watched query.
pub type QueryCallback = Box<dyn Fn(RawQuerySnapshot) + Send + Sync>;

/// Receives errors of one subscription.
pub type StoreErrorCallback = Box<dyn Fn(StoreError) + Send + Sync>;

/// An owned one-shot closure that cancels a subscription when called.
pub type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;
