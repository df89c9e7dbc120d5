//! Core types: references, field values and snapshot metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fields of a stored document, keyed by field name.
pub type Fields = BTreeMap<String, Value>;

/// Reference to a single document, addressed by its slash-separated path
/// (`projects/p1`, `projects/p1/kanbans/k1`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    path: String,
}

impl DocumentRef {
    pub fn new(path: impl Into<String>) -> Self {
        let path: String = path.into();
        Self {
            path: path.trim_matches('/').to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// Path of the collection containing this document.
    pub fn parent_path(&self) -> &str {
        match self.path.rfind('/') {
            Some(pos) => &self.path[..pos],
            None => "",
        }
    }

    /// Query over a sub-collection of this document.
    pub fn collection(&self, name: &str) -> QueryRef {
        QueryRef::new(format!("{}/{}", self.path, name))
    }
}

impl fmt::Debug for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentRef({})", self.path)
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Comparison operator of a query filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
}

/// A single `field <op> value` filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Sort key of a query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Reference to a filtered, ordered set of documents in one collection.
///
/// Two queries are equal when they target the same collection with the same
/// filters, ordering and limit.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRef {
    collection: String,
    filters: Vec<Filter>,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
}

impl QueryRef {
    /// Query matching every document of a collection.
    pub fn new(collection: impl Into<String>) -> Self {
        let collection: String = collection.into();
        Self {
            collection: collection.trim_matches('/').to_string(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn where_field(
        mut self,
        field: impl Into<String>,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn collection_path(&self) -> &str {
        &self.collection
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn orderings(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    /// Reference to a document of the queried collection.
    pub fn doc(&self, id: &str) -> DocumentRef {
        DocumentRef::new(format!("{}/{}", self.collection, id))
    }
}

impl fmt::Debug for QueryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryRef({}", self.collection)?;
        for filter in &self.filters {
            write!(f, " where {} {:?} {:?}", filter.field, filter.op, filter.value)?;
        }
        for order in &self.order_by {
            write!(f, " order by {} {:?}", order.field, order.direction)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " limit {}", limit)?;
        }
        write!(f, ")")
    }
}

/// Which side of the document/query split a reference is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    Document,
    Query,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Document => write!(f, "document"),
            ReferenceKind::Query => write!(f, "query"),
        }
    }
}

/// A reference to either a single document or a query of documents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Reference {
    Document(DocumentRef),
    Query(QueryRef),
}

impl Reference {
    pub fn kind(&self) -> ReferenceKind {
        match self {
            Reference::Document(_) => ReferenceKind::Document,
            Reference::Query(_) => ReferenceKind::Query,
        }
    }

    pub fn same_kind(&self, other: &Reference) -> bool {
        self.kind() == other.kind()
    }

    /// Path of the referenced document or collection.
    pub fn path(&self) -> &str {
        match self {
            Reference::Document(doc) => doc.path(),
            Reference::Query(query) => query.collection_path(),
        }
    }
}

impl From<DocumentRef> for Reference {
    fn from(doc: DocumentRef) -> Self {
        Reference::Document(doc)
    }
}

impl From<QueryRef> for Reference {
    fn from(query: QueryRef) -> Self {
        Reference::Query(query)
    }
}

/// A stored field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Reference(Reference),
    Array(Vec<Value>),
    Map(Fields),
}

impl Value {
    /// Convert a JSON value. Integral numbers become `Integer`.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert a JSON object into document fields. Non-objects yield no fields.
    pub fn fields_from_json(json: serde_json::Value) -> Fields {
        match Value::from_json(json) {
            Value::Map(fields) => fields,
            _ => Fields::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Reference(_) => "reference",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DocumentRef> for Value {
    fn from(doc: DocumentRef) -> Self {
        Value::Reference(Reference::Document(doc))
    }
}

impl From<QueryRef> for Value {
    fn from(query: QueryRef) -> Self {
        Value::Reference(Reference::Query(query))
    }
}

impl From<Reference> for Value {
    fn from(reference: Reference) -> Self {
        Value::Reference(reference)
    }
}

/// Per-snapshot metadata reported by the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Snapshot was served from a local cache.
    pub from_cache: bool,
    /// Snapshot includes local writes not yet acknowledged.
    pub has_pending_writes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_ref_segments() {
        let doc = DocumentRef::new("/projects/p1/kanbans/k1/");
        assert_eq!(doc.path(), "projects/p1/kanbans/k1");
        assert_eq!(doc.id(), "k1");
        assert_eq!(doc.parent_path(), "projects/p1/kanbans");
        assert_eq!(
            doc.collection("todoLists").collection_path(),
            "projects/p1/kanbans/k1/todoLists"
        );
    }

    #[test]
    fn test_query_equality_is_structural() {
        let a = QueryRef::new("projects").order_by("createdAt", Direction::Ascending);
        let b = QueryRef::new("projects").order_by("createdAt", Direction::Ascending);
        let c = QueryRef::new("projects").order_by("createdAt", Direction::Descending);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, QueryRef::new("projects"));
    }

    #[test]
    fn test_reference_kind() {
        let doc: Reference = DocumentRef::new("users/alice").into();
        let query: Reference = QueryRef::new("users").into();
        assert_eq!(doc.kind(), ReferenceKind::Document);
        assert_eq!(query.kind(), ReferenceKind::Query);
        assert!(!doc.same_kind(&query));
    }

    #[test]
    fn test_fields_from_json() {
        let fields = Value::fields_from_json(json!({
            "name": "alice",
            "age": 31,
            "score": 1.5,
            "tags": ["a"],
            "missing": null,
        }));
        assert_eq!(fields["name"], Value::String("alice".into()));
        assert_eq!(fields["age"], Value::Integer(31));
        assert_eq!(fields["score"], Value::Double(1.5));
        assert_eq!(fields["tags"], Value::Array(vec![Value::from("a")]));
        assert!(fields["missing"].is_null());

        assert!(Value::fields_from_json(json!([1, 2])).is_empty());
    }
}
