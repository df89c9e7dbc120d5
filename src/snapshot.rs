//! Normalized snapshots built from raw store observations.

use crate::store::RawDocumentSnapshot;
use crate::types::{DocumentRef, Fields, SnapshotMetadata, Value};

/// Observed state of a document, existing or not.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub reference: DocumentRef,
    /// Present iff the document exists.
    pub data: Option<Fields>,
    pub metadata: SnapshotMetadata,
}

impl DocumentSnapshot {
    pub fn from_raw(raw: RawDocumentSnapshot) -> Self {
        Self {
            id: raw.reference.id().to_string(),
            reference: raw.reference,
            data: raw.data,
            metadata: raw.metadata,
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// The existing-document view, if the document exists.
    pub fn into_existing(self) -> Option<QueryDocumentSnapshot> {
        let data = self.data?;
        Some(QueryDocumentSnapshot {
            id: self.id,
            reference: self.reference,
            data,
            metadata: self.metadata,
        })
    }
}

/// Snapshot of a document known to exist, such as a query member.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryDocumentSnapshot {
    pub id: String,
    pub reference: DocumentRef,
    pub data: Fields,
    pub metadata: SnapshotMetadata,
}

impl QueryDocumentSnapshot {
    /// Convert a query member. Members always exist; absent data reads as
    /// an empty document.
    pub fn from_member(raw: RawDocumentSnapshot) -> Self {
        Self {
            id: raw.reference.id().to_string(),
            reference: raw.reference,
            data: raw.data.unwrap_or_default(),
            metadata: raw.metadata,
        }
    }

    /// Synthetic empty document anchoring a root query.
    pub fn root() -> Self {
        Self {
            id: String::new(),
            reference: DocumentRef::new(""),
            data: Fields::new(),
            metadata: SnapshotMetadata::default(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}
