//! # Livegraph
//!
//! Live, joined views over a document store.
//!
//! A query describes which references to follow from a document. The
//! listener tree subscribes to every followed document and query, joins
//! their results into one nested value, and keeps that value current by
//! diffing each new snapshot or query against the previous one, opening
//! and closing only the subscriptions that actually changed.
//!
//! ## Core Concepts
//!
//! - **Link fields**: `ownerRef` follows the reference stored in the
//!   document; the joined value appears under `owner`
//! - **Extension fields**: attach a caller-supplied reference under any key
//! - **Generators**: queries computed from the document's live data
//! - **Completeness**: a value is only emitted once everything below it
//!   has loaded
//!
//! ## Example
//!
//! ```ignore
//! use livegraph::{field, GraphClient, GraphQuery, MemoryStore, QueryFields, DocumentRef};
//! use std::sync::Arc;
//!
//! let store = MemoryStore::new();
//! let client = GraphClient::new(Arc::new(store.clone()));
//!
//! let project = DocumentRef::new("projects/p1");
//! let live = client.live_query(QueryFields::new().extension(
//!     "project",
//!     field(project, QueryFields::new().link("ownerRef", GraphQuery::empty())),
//! ))?;
//!
//! store.flush();
//! let owner = live.value().and_then(|root| root.document("project").cloned());
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod listener;
pub mod live;
pub mod query;
pub mod result;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod utils;

// Re-exports
pub use client::GraphClient;
pub use config::{GraphConfig, DEFAULT_LINK_SUFFIX};
pub use error::{GraphError, Result, StoreError};
pub use listener::{CollectionListener, DocumentListener, NodeListener, NodePath, QueryNodeListener};
pub use live::{LiveQuery, LiveState, QueryEvent, TARGET_KEY};
pub use query::{
    field, field_guaranteed, field_opt, ExtensionField, FieldKind, GraphQuery, QueryField,
    QueryFields, SubQuery,
};
pub use result::{
    CollectionMetadata, GraphCollection, GraphDocument, GraphSnapshot, GraphValue, MissingDocument,
};
pub use snapshot::{DocumentSnapshot, QueryDocumentSnapshot};
#[cfg(feature = "memory-store")]
pub use store::MemoryStore;
pub use store::{DocumentChange, DocumentStore, RawDocumentSnapshot, RawQuerySnapshot, Unsubscribe};
pub use types::{
    Direction, DocumentRef, Fields, Filter, FilterOp, OrderBy, QueryRef, Reference, ReferenceKind,
    SnapshotMetadata, Value,
};
