//! Live listener tree.
//!
//! A [`NodeListener`] owns one store subscription (a document or a query).
//! Each existing document it observes gets a [`QueryNodeListener`], which in
//! turn owns one `NodeListener` per followed key of its query. Ownership is
//! strictly top-down; children report back through callbacks that hold only
//! weak handles to their parent.
//!
//! # Locking
//!
//! Every listener keeps its state behind a `parking_lot::Mutex`. A listener
//! never holds its own lock while invoking its parent's callback, and calls
//! travelling down the tree (`update_query`, `update_snapshot`,
//! `unsubscribe`, loading checks) never invoke callbacks travelling up. After
//! a downward change the owner pulls the child's current result instead.

mod collection;
mod document;
mod query_node;

pub use collection::CollectionListener;
pub use document::DocumentListener;
pub use query_node::QueryNodeListener;

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::query::GraphQuery;
use crate::result::{GraphDocument, GraphValue};
use crate::store::DocumentStore;
use crate::types::{Reference, ReferenceKind};
use std::fmt;
use std::sync::Arc;

/// Receives a listener's value each time it is complete.
pub(crate) type UpdateCallback = Arc<dyn Fn(GraphValue) + Send + Sync>;

/// Receives a query node's merged document each time it is complete.
pub(crate) type DocumentUpdateCallback = Arc<dyn Fn(Arc<GraphDocument>) + Send + Sync>;

/// Receives errors from anywhere below the subscription root.
pub(crate) type ErrorCallback = Arc<dyn Fn(GraphError) + Send + Sync>;

/// Collaborators shared by every listener of one client.
pub(crate) struct ListenerContext {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) config: GraphConfig,
}

/// Stable location of a listener in the tree, used to scope its logs.
///
/// The root is `$`; a followed key appends `.key`, a collection member
/// appends `[id]`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NodePath(String);

impl NodePath {
    pub fn root() -> Self {
        NodePath("$".to_string())
    }

    pub fn field(&self, key: &str) -> Self {
        NodePath(format!("{}.{}", self.0, key))
    }

    pub fn member(&self, id: &str) -> Self {
        NodePath(format!("{}[{}]", self.0, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePath({})", self.0)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A callback invocation prepared under a lock and run after releasing it.
pub(crate) enum Emission {
    Update(UpdateCallback, GraphValue),
    Error(ErrorCallback, GraphError),
}

impl Emission {
    pub(crate) fn dispatch(self) {
        match self {
            Emission::Update(callback, value) => callback(value),
            Emission::Error(callback, error) => callback(error),
        }
    }
}

/// Live subscription to one reference.
pub enum NodeListener {
    Document(DocumentListener),
    Collection(CollectionListener),
}

impl NodeListener {
    /// Subscribe to `reference` with the listener variant matching its kind.
    pub(crate) fn spawn(
        ctx: &Arc<ListenerContext>,
        reference: Reference,
        query: GraphQuery,
        path: NodePath,
        guaranteed_to_exist: bool,
        on_update: UpdateCallback,
        on_error: ErrorCallback,
    ) -> Self {
        match reference {
            Reference::Document(document) => NodeListener::Document(DocumentListener::new(
                ctx,
                document,
                query,
                path,
                guaranteed_to_exist,
                on_update,
                on_error,
            )),
            Reference::Query(query_ref) => NodeListener::Collection(CollectionListener::new(
                ctx, query_ref, query, path, on_update, on_error,
            )),
        }
    }

    pub fn reference(&self) -> Reference {
        match self {
            NodeListener::Document(listener) => Reference::Document(listener.reference().clone()),
            NodeListener::Collection(listener) => Reference::Query(listener.reference().clone()),
        }
    }

    pub fn kind(&self) -> ReferenceKind {
        match self {
            NodeListener::Document(_) => ReferenceKind::Document,
            NodeListener::Collection(_) => ReferenceKind::Query,
        }
    }

    /// Whether this listener or anything below it still waits for data.
    pub fn is_loading(&self) -> bool {
        match self {
            NodeListener::Document(listener) => listener.is_loading(),
            NodeListener::Collection(listener) => listener.is_loading(),
        }
    }

    /// Current value, if complete.
    pub fn result(&self) -> Option<GraphValue> {
        match self {
            NodeListener::Document(listener) => listener.result(),
            NodeListener::Collection(listener) => listener.result(),
        }
    }

    /// Replace the query applied to the observed document(s).
    ///
    /// With `dry_run` nothing is mutated; the return value tells whether the
    /// real call would change anything at or below this listener.
    pub fn update_query(&self, query: &GraphQuery, dry_run: bool) -> Result<bool> {
        match self {
            NodeListener::Document(listener) => listener.update_query(query, dry_run),
            NodeListener::Collection(listener) => listener.update_query(query, dry_run),
        }
    }

    /// Check that `query` resolves against everything currently observed
    /// below this listener, without changing anything.
    pub(crate) fn validate(&self, query: &GraphQuery) -> Result<()> {
        match self {
            NodeListener::Document(listener) => listener.validate(query),
            NodeListener::Collection(listener) => listener.validate(query),
        }
    }

    /// Cancel this subscription and everything below it. Idempotent.
    pub fn unsubscribe(&self) {
        match self {
            NodeListener::Document(listener) => listener.unsubscribe(),
            NodeListener::Collection(listener) => listener.unsubscribe(),
        }
    }
}

impl fmt::Debug for NodeListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeListener::Document(listener) => {
                write!(f, "NodeListener::Document({})", listener.reference())
            }
            NodeListener::Collection(listener) => {
                write!(f, "NodeListener::Collection({:?})", listener.reference())
            }
        }
    }
}
