//! Listener for a single-document reference.

use super::{
    DocumentUpdateCallback, Emission, ErrorCallback, ListenerContext, NodePath, QueryNodeListener,
    UpdateCallback,
};
use crate::error::{GraphError, Result, StoreError};
use crate::query::{evaluate, resolve_all, GraphQuery};
use crate::result::{GraphDocument, GraphSnapshot, GraphValue};
use crate::snapshot::{DocumentSnapshot, QueryDocumentSnapshot};
use crate::store::{RawDocumentSnapshot, Unsubscribe};
use crate::types::DocumentRef;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, debug_span, trace, warn, Span};

/// Follows one document and joins its query while it exists.
pub struct DocumentListener {
    reference: DocumentRef,
    shared: Arc<Mutex<DocumentState>>,
}

enum Phase {
    /// No snapshot delivered yet.
    Pending,
    Missing(DocumentSnapshot),
    /// Exists, but its query could not be resolved.
    Unresolved(QueryDocumentSnapshot),
    Joined { generation: u64, node: QueryNodeListener },
}

struct DocumentState {
    ctx: Arc<ListenerContext>,
    this: Weak<Mutex<DocumentState>>,
    reference: DocumentRef,
    path: NodePath,
    span: Span,
    query: GraphQuery,
    guaranteed_to_exist: bool,
    phase: Phase,
    next_generation: u64,
    on_update: UpdateCallback,
    on_error: ErrorCallback,
    unsubscribe: Option<Unsubscribe>,
    closed: bool,
}

impl DocumentListener {
    pub(crate) fn new(
        ctx: &Arc<ListenerContext>,
        reference: DocumentRef,
        query: GraphQuery,
        path: NodePath,
        guaranteed_to_exist: bool,
        on_update: UpdateCallback,
        on_error: ErrorCallback,
    ) -> Self {
        let span = debug_span!("graph_listener", node = %path);
        let shared = Arc::new_cyclic(|this| {
            Mutex::new(DocumentState {
                ctx: Arc::clone(ctx),
                this: this.clone(),
                reference: reference.clone(),
                path,
                span: span.clone(),
                query,
                guaranteed_to_exist,
                phase: Phase::Pending,
                next_generation: 0,
                on_update,
                on_error,
                unsubscribe: None,
                closed: false,
            })
        });

        let unsubscribe = {
            let _guard = span.enter();
            debug!(reference = %reference, "subscribing document");
            let on_snapshot = {
                let weak = Arc::downgrade(&shared);
                move |raw: RawDocumentSnapshot| {
                    if let Some(shared) = weak.upgrade() {
                        Self::handle_snapshot(&shared, raw);
                    }
                }
            };
            let on_store_error = {
                let weak = Arc::downgrade(&shared);
                move |error: StoreError| {
                    if let Some(shared) = weak.upgrade() {
                        Self::handle_store_error(&shared, error);
                    }
                }
            };
            ctx.store
                .listen_document(&reference, Box::new(on_snapshot), Box::new(on_store_error))
        };
        shared.lock().unsubscribe = Some(unsubscribe);

        Self { reference, shared }
    }

    pub fn reference(&self) -> &DocumentRef {
        &self.reference
    }

    pub fn is_loading(&self) -> bool {
        match &self.shared.lock().phase {
            Phase::Pending | Phase::Unresolved(_) => true,
            Phase::Missing(_) => false,
            Phase::Joined { node, .. } => !node.is_complete(),
        }
    }

    pub fn result(&self) -> Option<GraphValue> {
        let state = self.shared.lock();
        if state.closed {
            return None;
        }
        match &state.phase {
            Phase::Missing(snapshot) => {
                Some(GraphValue::Document(GraphSnapshot::missing(snapshot)))
            }
            Phase::Joined { node, .. } => node.current().map(joined_value),
            Phase::Pending | Phase::Unresolved(_) => None,
        }
    }

    pub fn update_query(&self, query: &GraphQuery, dry_run: bool) -> Result<bool> {
        let mut state = self.shared.lock();
        if state.closed {
            return Ok(false);
        }
        let span = state.span.clone();
        let _guard = span.enter();

        if let Phase::Joined { node, .. } = &state.phase {
            let node = node.clone();
            let changed = node.update_query(query, dry_run)?;
            if !dry_run {
                state.query = query.clone();
            }
            return Ok(changed);
        }

        let unresolved = match &state.phase {
            Phase::Unresolved(snapshot) => Some(snapshot.clone()),
            _ => None,
        };
        match unresolved {
            // A new query might resolve where the old one failed.
            Some(_) if dry_run => Ok(true),
            Some(snapshot) => {
                debug!("retrying unresolved document with new query");
                let previous = std::mem::replace(&mut state.query, query.clone());
                if let Err(error) = state.join(snapshot) {
                    state.query = previous;
                    return Err(error);
                }
                Ok(true)
            }
            None => {
                if !dry_run {
                    state.query = query.clone();
                }
                Ok(false)
            }
        }
    }

    pub(crate) fn validate(&self, query: &GraphQuery) -> Result<()> {
        let state = self.shared.lock();
        if state.closed {
            return Ok(());
        }
        match &state.phase {
            Phase::Joined { node, .. } => node.validate(query),
            Phase::Unresolved(snapshot) => {
                resolve_all(snapshot, &evaluate(snapshot, query), &state.ctx.config).map(|_| ())
            }
            Phase::Pending | Phase::Missing(_) => Ok(()),
        }
    }

    pub fn unsubscribe(&self) {
        let (node, unsubscribe) = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let span = state.span.clone();
            let _guard = span.enter();
            debug!(reference = %state.reference, "unsubscribing document");
            let node = match std::mem::replace(&mut state.phase, Phase::Pending) {
                Phase::Joined { node, .. } => Some(node),
                _ => None,
            };
            (node, state.unsubscribe.take())
        };
        if let Some(node) = node {
            node.unsubscribe();
        }
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }

    fn handle_snapshot(shared: &Arc<Mutex<DocumentState>>, raw: RawDocumentSnapshot) {
        let emission = {
            let mut state = shared.lock();
            if state.closed {
                return;
            }
            let span = state.span.clone();
            let _guard = span.enter();
            state.apply_snapshot(DocumentSnapshot::from_raw(raw))
        };
        if let Some(emission) = emission {
            emission.dispatch();
        }
    }

    fn handle_store_error(shared: &Arc<Mutex<DocumentState>>, error: StoreError) {
        let on_error = {
            let state = shared.lock();
            if state.closed {
                return;
            }
            let _guard = state.span.enter();
            warn!(reference = %state.reference, error = %error, "document subscription failed");
            Arc::clone(&state.on_error)
        };
        on_error(GraphError::Store(error));
    }

    fn handle_node_update(
        shared: &Arc<Mutex<DocumentState>>,
        generation: u64,
        document: Arc<GraphDocument>,
    ) {
        let on_update = {
            let state = shared.lock();
            if state.closed {
                return;
            }
            match &state.phase {
                Phase::Joined { generation: current, .. } if *current == generation => {}
                _ => {
                    let _guard = state.span.enter();
                    trace!("ignoring update from replaced query node");
                    return;
                }
            }
            Arc::clone(&state.on_update)
        };
        on_update(joined_value(document));
    }
}

impl DocumentState {
    fn apply_snapshot(&mut self, snapshot: DocumentSnapshot) -> Option<Emission> {
        if !snapshot.exists() {
            if self.guaranteed_to_exist {
                warn!(reference = %self.reference, "document expected to exist is missing");
            }
            if let Phase::Joined { node, .. } = &self.phase {
                debug!("document gone, dropping query node");
                node.unsubscribe();
            }
            let value = GraphValue::Document(GraphSnapshot::missing(&snapshot));
            self.phase = Phase::Missing(snapshot);
            return Some(Emission::Update(Arc::clone(&self.on_update), value));
        }
        let existing = snapshot.into_existing()?;

        let node = match &self.phase {
            Phase::Joined { node, .. } => node.clone(),
            _ => {
                return match self.join(existing) {
                    Ok(Some(document)) => Some(self.update(document)),
                    Ok(None) => None,
                    Err(error) => Some(Emission::Error(Arc::clone(&self.on_error), error)),
                };
            }
        };
        trace!("forwarding snapshot to query node");
        if let Err(error) = node.update_snapshot(existing, false) {
            return Some(Emission::Error(Arc::clone(&self.on_error), error));
        }
        node.current().map(|document| self.update(document))
    }

    /// Build the query node for an existing document and return its result
    /// if already complete. On failure the document is left unresolved.
    fn join(&mut self, snapshot: QueryDocumentSnapshot) -> Result<Option<Arc<GraphDocument>>> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let weak = self.this.clone();
        let on_update: DocumentUpdateCallback = Arc::new(move |document: Arc<GraphDocument>| {
            if let Some(shared) = weak.upgrade() {
                DocumentListener::handle_node_update(&shared, generation, document);
            }
        });
        match QueryNodeListener::new(
            &self.ctx,
            snapshot.clone(),
            self.query.clone(),
            self.path.clone(),
            on_update,
            Arc::clone(&self.on_error),
        ) {
            Ok(node) => {
                let current = node.current();
                self.phase = Phase::Joined { generation, node };
                Ok(current)
            }
            Err(error) => {
                warn!(reference = %self.reference, error = %error, "query could not be resolved");
                self.phase = Phase::Unresolved(snapshot);
                Err(error)
            }
        }
    }

    fn update(&self, document: Arc<GraphDocument>) -> Emission {
        Emission::Update(Arc::clone(&self.on_update), joined_value(document))
    }
}

fn joined_value(document: Arc<GraphDocument>) -> GraphValue {
    GraphValue::Document(GraphSnapshot::Exists(document))
}
