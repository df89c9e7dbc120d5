//! Joined result trees.
//!
//! A node's result is its document's own fields overlaid with the joined
//! value of every followed key. Nested results are shared through `Arc`, so
//! each emission is a cheap shallow copy that never aliases a value a caller
//! already holds.

use crate::snapshot::{DocumentSnapshot, QueryDocumentSnapshot};
use crate::types::{DocumentRef, Fields, QueryRef, SnapshotMetadata, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One value in a result: a stored field or a joined sub-result.
#[derive(Clone, Debug, PartialEq)]
pub enum GraphValue {
    Field(Value),
    Document(GraphSnapshot),
    Collection(GraphCollection),
}

impl GraphValue {
    pub fn as_field(&self) -> Option<&Value> {
        match self {
            GraphValue::Field(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&GraphSnapshot> {
        match self {
            GraphValue::Document(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&GraphCollection> {
        match self {
            GraphValue::Collection(collection) => Some(collection),
            _ => None,
        }
    }
}

/// Result of an existing document with its joined fields.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphDocument {
    pub id: String,
    pub reference: DocumentRef,
    pub metadata: SnapshotMetadata,
    pub data: BTreeMap<String, GraphValue>,
}

impl GraphDocument {
    /// Result holding only the document's own fields.
    pub fn from_snapshot(snapshot: &QueryDocumentSnapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            reference: snapshot.reference.clone(),
            metadata: snapshot.metadata,
            data: snapshot
                .data
                .iter()
                .map(|(k, v)| (k.clone(), GraphValue::Field(v.clone())))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&GraphValue> {
        self.data.get(key)
    }

    /// Stored field `key`.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.get(key).and_then(GraphValue::as_field)
    }

    /// Joined single-document value `key`.
    pub fn document(&self, key: &str) -> Option<&GraphSnapshot> {
        self.get(key).and_then(GraphValue::as_document)
    }

    /// Joined collection value `key`.
    pub fn collection(&self, key: &str) -> Option<&GraphCollection> {
        self.get(key).and_then(GraphValue::as_collection)
    }

    /// Stored fields only, without joined values.
    pub fn fields(&self) -> Fields {
        self.data
            .iter()
            .filter_map(|(k, v)| v.as_field().map(|value| (k.clone(), value.clone())))
            .collect()
    }
}

/// A document that was looked up but does not exist.
#[derive(Clone, Debug, PartialEq)]
pub struct MissingDocument {
    pub id: String,
    pub reference: DocumentRef,
    pub metadata: SnapshotMetadata,
}

/// Result of following a single-document reference.
#[derive(Clone, Debug, PartialEq)]
pub enum GraphSnapshot {
    Exists(Arc<GraphDocument>),
    Missing(MissingDocument),
}

impl GraphSnapshot {
    pub fn missing(snapshot: &DocumentSnapshot) -> Self {
        GraphSnapshot::Missing(MissingDocument {
            id: snapshot.id.clone(),
            reference: snapshot.reference.clone(),
            metadata: snapshot.metadata,
        })
    }

    pub fn exists(&self) -> bool {
        matches!(self, GraphSnapshot::Exists(_))
    }

    pub fn document(&self) -> Option<&Arc<GraphDocument>> {
        match self {
            GraphSnapshot::Exists(document) => Some(document),
            GraphSnapshot::Missing(_) => None,
        }
    }

    pub fn reference(&self) -> &DocumentRef {
        match self {
            GraphSnapshot::Exists(document) => &document.reference,
            GraphSnapshot::Missing(missing) => &missing.reference,
        }
    }
}

/// Collection-level metadata from the latest store batch.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionMetadata {
    pub query: QueryRef,
    /// Matching documents as reported by the store.
    pub size: usize,
    pub metadata: SnapshotMetadata,
}

/// Result of following a query reference, in store order.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphCollection {
    pub documents: Vec<Arc<GraphDocument>>,
    pub snapshot: Arc<CollectionMetadata>,
}

impl GraphCollection {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.documents.iter().map(|doc| doc.id.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<GraphDocument>> {
        self.documents.iter()
    }
}
