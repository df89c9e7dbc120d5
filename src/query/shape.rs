//! Declarative query shapes.

use crate::snapshot::QueryDocumentSnapshot;
use crate::types::Reference;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Produces a query from the current snapshot of the node it applies to.
pub type QueryGenerator = Arc<dyn Fn(&QueryDocumentSnapshot) -> QueryFields + Send + Sync>;

/// Query for one node: either fixed, or derived from the node's live data.
#[derive(Clone)]
pub enum GraphQuery {
    Fields(QueryFields),
    Generator(QueryGenerator),
}

impl GraphQuery {
    /// Query following nothing: the node's own fields only.
    pub fn empty() -> Self {
        GraphQuery::Fields(QueryFields::new())
    }

    /// Query re-evaluated against every new snapshot of the node.
    pub fn generator<F>(generate: F) -> Self
    where
        F: Fn(&QueryDocumentSnapshot) -> QueryFields + Send + Sync + 'static,
    {
        GraphQuery::Generator(Arc::new(generate))
    }

    pub fn is_generator(&self) -> bool {
        matches!(self, GraphQuery::Generator(_))
    }
}

impl Default for GraphQuery {
    fn default() -> Self {
        GraphQuery::empty()
    }
}

impl From<QueryFields> for GraphQuery {
    fn from(fields: QueryFields) -> Self {
        GraphQuery::Fields(fields)
    }
}

impl fmt::Debug for GraphQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphQuery::Fields(fields) => fields.fmt(f),
            GraphQuery::Generator(_) => write!(f, "GraphQuery::Generator(..)"),
        }
    }
}

/// A resolved query object: sub-queries keyed by field name.
#[derive(Clone, Debug, Default)]
pub struct QueryFields {
    entries: BTreeMap<String, QueryField>,
}

impl QueryFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow the stored reference in `key` (which must carry the link suffix).
    pub fn link(mut self, key: impl Into<String>, query: impl Into<GraphQuery>) -> Self {
        self.entries.insert(key.into(), QueryField::Link(query.into()));
        self
    }

    /// Attach a caller-supplied reference under `key`.
    pub fn extension(mut self, key: impl Into<String>, field: ExtensionField) -> Self {
        self.entries.insert(key.into(), QueryField::Extension(field));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, field: QueryField) {
        self.entries.insert(key.into(), field);
    }

    pub fn get(&self, key: &str) -> Option<&QueryField> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryField)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One entry of a query object.
#[derive(Clone, Debug)]
pub enum QueryField {
    /// Follow a reference stored in the document under the same key.
    Link(GraphQuery),
    /// Follow a reference supplied by the caller.
    Extension(ExtensionField),
}

/// A caller-supplied reference with its sub-query.
#[derive(Clone, Debug)]
pub struct ExtensionField {
    /// `None` leaves the result slot absent.
    pub reference: Option<Reference>,
    pub query: GraphQuery,
    /// Caller asserts the referenced document exists.
    pub guaranteed_to_exist: bool,
}

/// Extension field for a present reference.
pub fn field(reference: impl Into<Reference>, query: impl Into<GraphQuery>) -> ExtensionField {
    ExtensionField {
        reference: Some(reference.into()),
        query: query.into(),
        guaranteed_to_exist: false,
    }
}

/// Extension field for a reference that may not be known yet.
pub fn field_opt(reference: Option<Reference>, query: impl Into<GraphQuery>) -> ExtensionField {
    ExtensionField {
        reference,
        query: query.into(),
        guaranteed_to_exist: false,
    }
}

/// Extension field whose document the caller guarantees to exist.
pub fn field_guaranteed(
    reference: impl Into<Reference>,
    query: impl Into<GraphQuery>,
) -> ExtensionField {
    ExtensionField {
        reference: Some(reference.into()),
        query: query.into(),
        guaranteed_to_exist: true,
    }
}
