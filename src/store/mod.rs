//! Backing document store protocol.
//!
//! Listeners never read or write storage themselves. They consume a
//! [`DocumentStore`], which must:
//! - deliver the full current state of a document on every change,
//! - deliver positional change batches (`added`/`removed`/`modified`) for a
//!   query, starting with one batch describing the initial result (possibly
//!   empty),
//! - report errors on a channel separate from data,
//! - deliver notifications for one subscription in order, one at a time,
//! - never invoke a callback synchronously from inside `listen_*` or from
//!   inside an [`Unsubscribe`] call, and never after that call returned.
//!
//! Reference equality and document/query discrimination are provided by
//! [`Reference`](crate::types::Reference) itself.

#[cfg(feature = "memory-store")]
mod memory;
mod types;

#[cfg(feature = "memory-store")]
pub use memory::MemoryStore;
pub use types::{
    DocumentCallback, DocumentChange, QueryCallback, RawDocumentSnapshot, RawQuerySnapshot,
    StoreErrorCallback, Unsubscribe,
};

use crate::types::{DocumentRef, QueryRef};

/// Live-subscription interface of a document store.
pub trait DocumentStore: Send + Sync {
    /// Watch a single document.
    fn listen_document(
        &self,
        reference: &DocumentRef,
        on_snapshot: DocumentCallback,
        on_error: StoreErrorCallback,
    ) -> Unsubscribe;

    /// Watch the result of a query.
    fn listen_query(
        &self,
        query: &QueryRef,
        on_snapshot: QueryCallback,
        on_error: StoreErrorCallback,
    ) -> Unsubscribe;
}
