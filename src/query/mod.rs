//! Query shapes and their evaluation against snapshots.
//!
//! A query object maps keys to sub-queries. Each key is one of:
//! - a **link field** (`ownerRef`): follows the reference stored under that
//!   key in the document; the joined value appears under the key with the
//!   link suffix stripped (`owner`),
//! - an **extension field** (any key): follows a reference supplied by the
//!   caller through [`field`], [`field_opt`] or [`field_guaranteed`]; the
//!   joined value appears under the key unchanged.
//!
//! A query can also be a generator, re-evaluated against every snapshot of
//! the node so its shape can depend on live data.

mod evaluate;
mod shape;

pub use evaluate::{classify, evaluate, resolve_all, resolve_sub_query, FieldKind, SubQuery};
pub use shape::{
    field, field_guaranteed, field_opt, ExtensionField, GraphQuery, QueryField, QueryFields,
    QueryGenerator,
};
