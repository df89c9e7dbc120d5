//! Entry point binding a store to listener construction.

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::listener::{ListenerContext, NodeListener, NodePath};
use crate::live::LiveQuery;
use crate::query::GraphQuery;
use crate::result::GraphValue;
use crate::store::DocumentStore;
use crate::types::Reference;
use std::sync::Arc;

/// Creates listeners over one store.
#[derive(Clone)]
pub struct GraphClient {
    ctx: Arc<ListenerContext>,
}

impl GraphClient {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, GraphConfig::default())
    }

    pub fn with_config(store: Arc<dyn DocumentStore>, config: GraphConfig) -> Self {
        Self {
            ctx: Arc::new(ListenerContext { store, config }),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.ctx.config
    }

    pub(crate) fn context(&self) -> &Arc<ListenerContext> {
        &self.ctx
    }

    /// Subscribe to `reference` with `query`, choosing the listener kind
    /// from the reference.
    ///
    /// `on_update` receives the joined value each time the tree below is
    /// complete; `on_error` receives store and query errors from anywhere
    /// below. Nothing is delivered from inside this call.
    pub fn make_listener<U, E>(
        &self,
        reference: impl Into<Reference>,
        query: impl Into<GraphQuery>,
        on_update: U,
        on_error: E,
    ) -> NodeListener
    where
        U: Fn(GraphValue) + Send + Sync + 'static,
        E: Fn(GraphError) + Send + Sync + 'static,
    {
        NodeListener::spawn(
            &self.ctx,
            reference.into(),
            query.into(),
            NodePath::root(),
            false,
            Arc::new(on_update),
            Arc::new(on_error),
        )
    }

    /// Start a root query of extension fields.
    pub fn live_query(&self, query: impl Into<GraphQuery>) -> Result<LiveQuery> {
        LiveQuery::new(self, query)
    }

    /// Follow one optional reference.
    pub fn live_reference(
        &self,
        reference: Option<Reference>,
        query: impl Into<GraphQuery>,
    ) -> Result<LiveQuery> {
        LiveQuery::for_reference(self, reference, query)
    }
}
