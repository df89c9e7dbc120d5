//! Observable root queries.
//!
//! A [`LiveQuery`] roots a query node on an empty synthetic document whose
//! query holds extension fields only. Its state is a `(value, loading,
//! error)` triple that can be polled, and every change is also published on
//! a bounded channel.

use crate::client::GraphClient;
use crate::error::{GraphError, Result};
use crate::listener::{DocumentUpdateCallback, ErrorCallback, NodePath, QueryNodeListener};
use crate::query::{field_opt, GraphQuery, QueryFields};
use crate::result::{GraphDocument, GraphValue};
use crate::snapshot::QueryDocumentSnapshot;
use crate::types::Reference;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Root key under which [`LiveQuery::for_reference`] places its target.
pub const TARGET_KEY: &str = "target";

/// Polled state of a live query.
#[derive(Clone, Debug)]
pub struct LiveState {
    /// Latest complete result.
    pub value: Option<Arc<GraphDocument>>,
    pub loading: bool,
    /// Latest error reported anywhere in the tree.
    pub error: Option<GraphError>,
}

/// Event published on every change of a live query.
#[derive(Clone, Debug)]
pub enum QueryEvent {
    Updated(Arc<GraphDocument>),
    Failed(GraphError),
}

struct Publisher {
    state: Mutex<LiveState>,
    sender: Sender<QueryEvent>,
}

impl Publisher {
    fn updated(&self, document: Arc<GraphDocument>) {
        {
            let mut state = self.state.lock();
            state.value = Some(Arc::clone(&document));
            state.loading = false;
        }
        self.send(QueryEvent::Updated(document));
    }

    fn failed(&self, error: GraphError) {
        self.state.lock().error = Some(error.clone());
        self.send(QueryEvent::Failed(error));
    }

    fn send(&self, event: QueryEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("live query event buffer full, dropping event"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// A live, observable root query.
pub struct LiveQuery {
    root: QueryNodeListener,
    publisher: Arc<Publisher>,
    receiver: Receiver<QueryEvent>,
    /// Sub-query of the target, when created by `for_reference`.
    target_query: Mutex<Option<GraphQuery>>,
}

impl LiveQuery {
    /// Start a root query. Fails if the query is malformed.
    pub fn new(client: &GraphClient, query: impl Into<GraphQuery>) -> Result<Self> {
        let ctx = client.context();
        let (sender, receiver) = bounded(ctx.config.event_buffer_size);
        let publisher = Arc::new(Publisher {
            state: Mutex::new(LiveState {
                value: None,
                loading: true,
                error: None,
            }),
            sender,
        });

        let on_update: DocumentUpdateCallback = {
            let publisher = Arc::clone(&publisher);
            Arc::new(move |document: Arc<GraphDocument>| publisher.updated(document))
        };
        let on_error: ErrorCallback = {
            let publisher = Arc::clone(&publisher);
            Arc::new(move |error: GraphError| publisher.failed(error))
        };
        let root = QueryNodeListener::new(
            ctx,
            QueryDocumentSnapshot::root(),
            query.into(),
            NodePath::root(),
            on_update,
            on_error,
        )?;
        if let Some(document) = root.current() {
            debug!("root query complete at start");
            publisher.updated(document);
        }

        Ok(Self {
            root,
            publisher,
            receiver,
            target_query: Mutex::new(None),
        })
    }

    /// Follow a single optional reference, exposed through [`target`](Self::target).
    pub fn for_reference(
        client: &GraphClient,
        reference: Option<Reference>,
        query: impl Into<GraphQuery>,
    ) -> Result<Self> {
        let query = query.into();
        let live = Self::new(client, target_fields(reference, query.clone()))?;
        *live.target_query.lock() = Some(query);
        Ok(live)
    }

    pub fn state(&self) -> LiveState {
        self.publisher.state.lock().clone()
    }

    pub fn value(&self) -> Option<Arc<GraphDocument>> {
        self.publisher.state.lock().value.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.publisher.state.lock().loading
    }

    pub fn error(&self) -> Option<GraphError> {
        self.publisher.state.lock().error.clone()
    }

    /// Joined value of the followed reference, for `for_reference` queries.
    pub fn target(&self) -> Option<GraphValue> {
        self.value()?.get(TARGET_KEY).cloned()
    }

    /// Whether applying `query` would put the tree back into loading.
    ///
    /// Nothing is mutated.
    pub fn would_change(&self, query: &GraphQuery) -> Result<bool> {
        if self.is_loading() {
            return Ok(true);
        }
        self.root.update_query(query, true)
    }

    /// Replace the root query.
    ///
    /// If the tree is still complete afterwards the new value is published
    /// at once; otherwise the query reports loading until it completes.
    pub fn update_query(&self, query: impl Into<GraphQuery>) -> Result<bool> {
        let query = query.into();
        let changed = self.root.update_query(&query, false)?;
        if changed {
            self.publisher.state.lock().loading = true;
            if let Some(document) = self.root.current() {
                self.publisher.updated(document);
            }
        }
        Ok(changed)
    }

    /// Point a `for_reference` query at another reference, keeping its
    /// sub-query.
    pub fn set_reference(&self, reference: Option<Reference>) -> Result<bool> {
        let query = self.target_query.lock().clone().unwrap_or_default();
        self.update_query(target_fields(reference, query))
    }

    /// Point a `for_reference` query at another reference and sub-query.
    pub fn set_target(
        &self,
        reference: Option<Reference>,
        query: impl Into<GraphQuery>,
    ) -> Result<bool> {
        let query = query.into();
        let changed = self.update_query(target_fields(reference, query.clone()))?;
        *self.target_query.lock() = Some(query);
        Ok(changed)
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<QueryEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<QueryEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<QueryEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Number of listeners directly below the root.
    pub fn child_count(&self) -> usize {
        self.root.child_count()
    }

    /// Tear down the whole tree. Idempotent; also runs on drop.
    pub fn unsubscribe(&self) {
        self.root.unsubscribe();
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.root.unsubscribe();
    }
}

fn target_fields(reference: Option<Reference>, query: GraphQuery) -> QueryFields {
    QueryFields::new().extension(TARGET_KEY, field_opt(reference, query))
}
