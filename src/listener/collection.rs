//! Listener for a query reference.
//!
//! Store batches are applied in two passes. The first replays the positional
//! changes on the ordered entry list so indices always refer to the state
//! the store assumed. The second creates, updates or drops the per-member
//! query nodes, addressing entries by document path.

use super::{
    DocumentUpdateCallback, Emission, ErrorCallback, ListenerContext, NodePath, QueryNodeListener,
    UpdateCallback,
};
use crate::error::{GraphError, Result, StoreError};
use crate::query::GraphQuery;
use crate::result::{CollectionMetadata, GraphCollection, GraphDocument, GraphValue};
use crate::snapshot::QueryDocumentSnapshot;
use crate::store::{DocumentChange, RawQuerySnapshot, Unsubscribe};
use crate::types::QueryRef;
use crate::utils::{insert_at, move_item, remove_at};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, debug_span, trace, warn, Span};

/// Follows a query and joins each member document.
pub struct CollectionListener {
    reference: QueryRef,
    shared: Arc<Mutex<CollectionState>>,
}

struct Entry {
    path: String,
    document: Arc<GraphDocument>,
}

struct Member {
    generation: u64,
    node: QueryNodeListener,
}

struct CollectionState {
    ctx: Arc<ListenerContext>,
    this: Weak<Mutex<CollectionState>>,
    reference: QueryRef,
    path: NodePath,
    span: Span,
    query: GraphQuery,
    /// Members in store order.
    entries: Vec<Entry>,
    members: HashMap<String, Member>,
    /// `None` until the first batch.
    metadata: Option<Arc<CollectionMetadata>>,
    next_generation: u64,
    on_update: UpdateCallback,
    on_error: ErrorCallback,
    unsubscribe: Option<Unsubscribe>,
    closed: bool,
}

impl CollectionListener {
    pub(crate) fn new(
        ctx: &Arc<ListenerContext>,
        reference: QueryRef,
        query: GraphQuery,
        path: NodePath,
        on_update: UpdateCallback,
        on_error: ErrorCallback,
    ) -> Self {
        let span = debug_span!("graph_listener", node = %path);
        let shared = Arc::new_cyclic(|this| {
            Mutex::new(CollectionState {
                ctx: Arc::clone(ctx),
                this: this.clone(),
                reference: reference.clone(),
                path,
                span: span.clone(),
                query,
                entries: Vec::new(),
                members: HashMap::new(),
                metadata: None,
                next_generation: 0,
                on_update,
                on_error,
                unsubscribe: None,
                closed: false,
            })
        });

        let unsubscribe = {
            let _guard = span.enter();
            debug!(query = ?reference, "subscribing query");
            let on_batch = {
                let weak = Arc::downgrade(&shared);
                move |raw: RawQuerySnapshot| {
                    if let Some(shared) = weak.upgrade() {
                        Self::handle_batch(&shared, raw);
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
                .listen_query(&reference, Box::new(on_batch), Box::new(on_store_error))
        };
        shared.lock().unsubscribe = Some(unsubscribe);

        Self { reference, shared }
    }

    pub fn reference(&self) -> &QueryRef {
        &self.reference
    }

    pub fn is_loading(&self) -> bool {
        !self.shared.lock().is_complete()
    }

    pub fn result(&self) -> Option<GraphValue> {
        let state = self.shared.lock();
        if state.closed {
            return None;
        }
        state.completed_result().map(GraphValue::Collection)
    }

    /// Number of member documents currently tracked.
    pub fn member_count(&self) -> usize {
        self.shared.lock().members.len()
    }

    /// Apply `query` to every member.
    pub fn update_query(&self, query: &GraphQuery, dry_run: bool) -> Result<bool> {
        let mut state = self.shared.lock();
        if state.closed {
            return Ok(false);
        }
        let span = state.span.clone();
        let _guard = span.enter();
        let members: Vec<(String, QueryNodeListener)> = state
            .members
            .iter()
            .map(|(path, member)| (path.clone(), member.node.clone()))
            .collect();

        if dry_run {
            for (_, node) in &members {
                if node.update_query(query, true)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        for (_, node) in &members {
            node.validate(query)?;
        }

        debug!(members = members.len(), "updating member queries");
        state.query = query.clone();
        let mut has_update = false;
        for (path, node) in members {
            match node.update_query(query, false) {
                Ok(true) => {
                    has_update = true;
                    if let Some(document) = node.current() {
                        state.set_entry(&path, document);
                    }
                }
                Ok(false) => {}
                // The member changed between validation and commit; it is
                // rebuilt on its next modification.
                Err(error) => {
                    warn!(path = %path, error = %error, "member rejected query, dropping it");
                    has_update = true;
                    if let Some(member) = state.members.remove(&path) {
                        member.node.unsubscribe();
                    }
                }
            }
        }
        Ok(has_update)
    }

    pub(crate) fn validate(&self, query: &GraphQuery) -> Result<()> {
        let state = self.shared.lock();
        if state.closed {
            return Ok(());
        }
        state.members.values().try_for_each(|member| member.node.validate(query))
    }

    pub fn unsubscribe(&self) {
        let (members, unsubscribe) = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let span = state.span.clone();
            let _guard = span.enter();
            debug!(members = state.members.len(), "unsubscribing query");
            (std::mem::take(&mut state.members), state.unsubscribe.take())
        };
        for member in members.into_values() {
            member.node.unsubscribe();
        }
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }

    fn handle_batch(shared: &Arc<Mutex<CollectionState>>, raw: RawQuerySnapshot) {
        let emissions = {
            let mut state = shared.lock();
            if state.closed {
                return;
            }
            let span = state.span.clone();
            let _guard = span.enter();
            state.apply_batch(raw)
        };
        for emission in emissions {
            emission.dispatch();
        }
    }

    fn handle_store_error(shared: &Arc<Mutex<CollectionState>>, error: StoreError) {
        let on_error = {
            let state = shared.lock();
            if state.closed {
                return;
            }
            let _guard = state.span.enter();
            warn!(query = ?state.reference, error = %error, "query subscription failed");
            Arc::clone(&state.on_error)
        };
        on_error(GraphError::Store(error));
    }

    fn handle_member_update(
        shared: &Arc<Mutex<CollectionState>>,
        path: &str,
        generation: u64,
        document: Arc<GraphDocument>,
    ) {
        let emission = {
            let mut state = shared.lock();
            if state.closed {
                return;
            }
            let span = state.span.clone();
            let _guard = span.enter();
            match state.members.get(path) {
                Some(member) if member.generation == generation => {}
                _ => {
                    trace!(path, "ignoring update from dropped member");
                    return;
                }
            }
            if !state.set_entry(path, document) {
                debug!(path, "member not in result, skipping update");
                return;
            }
            state.completed_result().map(|collection| {
                Emission::Update(Arc::clone(&state.on_update), GraphValue::Collection(collection))
            })
        };
        if let Some(emission) = emission {
            emission.dispatch();
        }
    }
}

impl CollectionState {
    fn is_complete(&self) -> bool {
        self.metadata.is_some()
            && self.members.len() == self.entries.len()
            && self.members.values().all(|member| member.node.is_complete())
    }

    fn completed_result(&self) -> Option<GraphCollection> {
        let metadata = self.metadata.clone()?;
        if self.members.len() != self.entries.len() {
            trace!(
                members = self.members.len(),
                entries = self.entries.len(),
                "waiting for members"
            );
            return None;
        }
        let loaded = self
            .members
            .values()
            .filter(|member| member.node.is_complete())
            .count();
        if loaded < self.members.len() {
            trace!("{}/{} members loaded", loaded, self.members.len());
            return None;
        }
        Some(GraphCollection {
            documents: self.entries.iter().map(|entry| Arc::clone(&entry.document)).collect(),
            snapshot: metadata,
        })
    }

    fn apply_batch(&mut self, raw: RawQuerySnapshot) -> Vec<Emission> {
        debug!(changes = raw.changes.len(), size = raw.size, "query batch");

        for change in &raw.changes {
            match change {
                DocumentChange::Added { document, new_index } => {
                    let snapshot = QueryDocumentSnapshot::from_member(document.clone());
                    let entry = Entry {
                        path: snapshot.reference.path().to_string(),
                        document: Arc::new(GraphDocument::from_snapshot(&snapshot)),
                    };
                    insert_at(&mut self.entries, entry, *new_index);
                }
                DocumentChange::Removed { document, old_index } => {
                    match remove_at(&mut self.entries, *old_index) {
                        Some(entry) if entry.path == document.reference.path() => {}
                        Some(entry) => warn!(
                            expected = %document.reference,
                            found = %entry.path,
                            "removed entry does not match its index"
                        ),
                        None => warn!(old_index, "removed index out of range"),
                    }
                }
                DocumentChange::Modified {
                    old_index,
                    new_index,
                    ..
                } => {
                    if old_index != new_index
                        && !move_item(&mut self.entries, *old_index, *new_index)
                    {
                        warn!(old_index, new_index, "moved index out of range");
                    }
                }
            }
        }

        let mut emissions = Vec::new();
        for change in raw.changes {
            match change {
                DocumentChange::Added { document, .. } => {
                    let snapshot = QueryDocumentSnapshot::from_member(document);
                    emissions.extend(self.spawn_member(snapshot));
                }
                DocumentChange::Removed { document, .. } => {
                    if let Some(member) = self.members.remove(document.reference.path()) {
                        trace!(path = %document.reference, "dropping member");
                        member.node.unsubscribe();
                    }
                }
                DocumentChange::Modified { document, .. } => {
                    let snapshot = QueryDocumentSnapshot::from_member(document);
                    let path = snapshot.reference.path().to_string();
                    let node = self.members.get(&path).map(|member| member.node.clone());
                    match node {
                        Some(node) => match node.update_snapshot(snapshot, false) {
                            Ok(_) => {
                                if let Some(document) = node.current() {
                                    self.set_entry(&path, document);
                                }
                            }
                            Err(error) => {
                                emissions.push(Emission::Error(Arc::clone(&self.on_error), error));
                            }
                        },
                        // Earlier construction failed; try again with the new data.
                        None => emissions.extend(self.spawn_member(snapshot)),
                    }
                }
            }
        }

        self.metadata = Some(Arc::new(CollectionMetadata {
            query: raw.query,
            size: raw.size,
            metadata: raw.metadata,
        }));
        if let Some(collection) = self.completed_result() {
            emissions.push(Emission::Update(
                Arc::clone(&self.on_update),
                GraphValue::Collection(collection),
            ));
        }
        emissions
    }

    fn spawn_member(&mut self, snapshot: QueryDocumentSnapshot) -> Option<Emission> {
        let path = snapshot.reference.path().to_string();
        if let Some(stale) = self.members.remove(&path) {
            stale.node.unsubscribe();
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        let weak = self.this.clone();
        let member_path = path.clone();
        let on_update: DocumentUpdateCallback = Arc::new(move |document: Arc<GraphDocument>| {
            if let Some(shared) = weak.upgrade() {
                CollectionListener::handle_member_update(
                    &shared,
                    &member_path,
                    generation,
                    document,
                );
            }
        });
        let node_path = self.path.member(&snapshot.id);
        match QueryNodeListener::new(
            &self.ctx,
            snapshot,
            self.query.clone(),
            node_path,
            on_update,
            Arc::clone(&self.on_error),
        ) {
            Ok(node) => {
                if let Some(document) = node.current() {
                    self.set_entry(&path, document);
                }
                self.members.insert(path, Member { generation, node });
                None
            }
            Err(error) => {
                warn!(path = %path, error = %error, "member query could not be resolved");
                Some(Emission::Error(Arc::clone(&self.on_error), error))
            }
        }
    }

    /// Replace the result of the entry at `path`. Returns false if absent.
    fn set_entry(&mut self, path: &str, document: Arc<GraphDocument>) -> bool {
        match self.entries.iter_mut().find(|entry| entry.path == path) {
            Some(entry) => {
                entry.document = document;
                true
            }
            None => false,
        }
    }
}
