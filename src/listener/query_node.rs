//! Per-document join node.
//!
//! A `QueryNodeListener` holds the latest snapshot of one existing document
//! and the query applied to it, and owns a child listener for every key of
//! the evaluated query that currently resolves to a reference. It has no
//! store subscription of its own: its owner feeds it snapshots.

use super::{
    DocumentUpdateCallback, ErrorCallback, ListenerContext, NodeListener, NodePath, UpdateCallback,
};
use crate::error::{GraphError, Result};
use crate::query::{
    evaluate, resolve_all, resolve_sub_query, FieldKind, GraphQuery, QueryFields, SubQuery,
};
use crate::result::{GraphDocument, GraphValue};
use crate::snapshot::QueryDocumentSnapshot;
use crate::types::Reference;
use crate::utils::ordered_union;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, debug_span, trace, warn, Span};

/// Join node for one existing document.
#[derive(Clone)]
pub struct QueryNodeListener {
    shared: Arc<Mutex<QueryNodeState>>,
}

struct ChildListener {
    /// Distinguishes this child from earlier children under the same key.
    generation: u64,
    result_key: String,
    kind: FieldKind,
    listener: NodeListener,
}

struct QueryNodeState {
    ctx: Arc<ListenerContext>,
    this: Weak<Mutex<QueryNodeState>>,
    path: NodePath,
    span: Span,
    snapshot: QueryDocumentSnapshot,
    query: GraphQuery,
    result: GraphDocument,
    children: BTreeMap<String, ChildListener>,
    next_generation: u64,
    closed: bool,
    on_update: DocumentUpdateCallback,
    on_error: ErrorCallback,
}

enum Plan {
    Teardown,
    Spawn(SubQuery),
    Replace(SubQuery),
    Forward(SubQuery),
}

impl QueryNodeListener {
    /// Build a node and subscribe its children.
    ///
    /// Every key of the evaluated query is validated before any child is
    /// subscribed; a malformed key fails construction with nothing leaked.
    pub(crate) fn new(
        ctx: &Arc<ListenerContext>,
        snapshot: QueryDocumentSnapshot,
        query: GraphQuery,
        path: NodePath,
        on_update: DocumentUpdateCallback,
        on_error: ErrorCallback,
    ) -> Result<Self> {
        let span = debug_span!("graph_query", node = %path);
        let sub_queries = {
            let _guard = span.enter();
            let fields = evaluate(&snapshot, &query);
            debug!(document = %snapshot.reference, keys = fields.len(), "building query node");
            resolve_all(&snapshot, &fields, &ctx.config)?
        };

        let result = GraphDocument::from_snapshot(&snapshot);
        let shared = Arc::new_cyclic(|this| {
            Mutex::new(QueryNodeState {
                ctx: Arc::clone(ctx),
                this: this.clone(),
                path,
                span,
                snapshot,
                query,
                result,
                children: BTreeMap::new(),
                next_generation: 0,
                closed: false,
                on_update,
                on_error,
            })
        });

        {
            let mut state = shared.lock();
            let span = state.span.clone();
            let _guard = span.enter();
            for sub in sub_queries {
                state.spawn_child(sub);
            }
            state.sync_result();
        }
        Ok(Self { shared })
    }

    /// Merged result, if every child has loaded.
    pub fn current(&self) -> Option<Arc<GraphDocument>> {
        let state = self.shared.lock();
        if state.closed {
            return None;
        }
        state.completed_result()
    }

    /// Check that `query` resolves against this node and every forwarded
    /// child below it. Nothing is mutated.
    pub(crate) fn validate(&self, query: &GraphQuery) -> Result<()> {
        let state = self.shared.lock();
        if state.closed {
            return Ok(());
        }
        let fields = evaluate(&state.snapshot, query);
        for (key, field) in fields.iter() {
            let sub = resolve_sub_query(&state.snapshot, key, field, &state.ctx.config)?;
            if let Some(Plan::Forward(sub)) = state.plan_key(key, Some(sub)) {
                state.validate_forward(key, &sub)?;
            }
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.shared.lock().is_complete()
    }

    /// Number of live child listeners.
    pub fn child_count(&self) -> usize {
        self.shared.lock().children.len()
    }

    /// Apply a new snapshot of the document under the current query.
    pub fn update_snapshot(&self, snapshot: QueryDocumentSnapshot, dry_run: bool) -> Result<bool> {
        let mut state = self.shared.lock();
        if state.closed {
            return Ok(false);
        }
        let span = state.span.clone();
        let _guard = span.enter();
        trace!(dry_run, "snapshot update");
        let query = state.query.clone();
        state.reconcile(snapshot, query, true, dry_run)
    }

    /// Apply a new query to the current snapshot.
    pub fn update_query(&self, query: &GraphQuery, dry_run: bool) -> Result<bool> {
        let mut state = self.shared.lock();
        if state.closed {
            return Ok(false);
        }
        let span = state.span.clone();
        let _guard = span.enter();
        trace!(dry_run, "query update");
        let snapshot = state.snapshot.clone();
        state.reconcile(snapshot, query.clone(), false, dry_run)
    }

    /// Unsubscribe every child. Idempotent.
    pub fn unsubscribe(&self) {
        let children = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let span = state.span.clone();
            let _guard = span.enter();
            debug!(children = state.children.len(), "unsubscribing query node");
            std::mem::take(&mut state.children)
        };
        for child in children.into_values() {
            child.listener.unsubscribe();
        }
    }

    fn handle_child_update(
        shared: &Arc<Mutex<QueryNodeState>>,
        key: &str,
        generation: u64,
        value: GraphValue,
    ) {
        let emission = {
            let mut state = shared.lock();
            if state.closed {
                return;
            }
            let span = state.span.clone();
            let _guard = span.enter();
            let result_key = match state.children.get(key) {
                Some(child) if child.generation == generation => child.result_key.clone(),
                _ => {
                    trace!(key, "ignoring update from replaced child");
                    return;
                }
            };
            trace!(key, "child updated");
            state.result.data.insert(result_key, value);
            state
                .completed_result()
                .map(|document| (Arc::clone(&state.on_update), document))
        };
        if let Some((on_update, document)) = emission {
            on_update(document);
        }
    }
}

impl QueryNodeState {
    fn is_complete(&self) -> bool {
        self.children.values().all(|child| !child.listener.is_loading())
    }

    fn completed_result(&self) -> Option<Arc<GraphDocument>> {
        let loaded = self
            .children
            .values()
            .filter(|child| !child.listener.is_loading())
            .count();
        if loaded < self.children.len() {
            trace!("{}/{} children loaded", loaded, self.children.len());
            return None;
        }
        Some(Arc::new(self.result.clone()))
    }

    fn spawn_child(&mut self, sub: SubQuery) {
        let Some(reference) = sub.reference else {
            trace!(key = %sub.key, "no reference, slot left absent");
            return;
        };
        self.next_generation += 1;
        let generation = self.next_generation;
        let weak = self.this.clone();
        let key = sub.key.clone();
        let on_update: UpdateCallback = Arc::new(move |value: GraphValue| {
            if let Some(shared) = weak.upgrade() {
                QueryNodeListener::handle_child_update(&shared, &key, generation, value);
            }
        });
        debug!(
            key = %sub.key,
            reference = %reference.path(),
            kind = %reference.kind(),
            "subscribing child"
        );
        let listener = NodeListener::spawn(
            &self.ctx,
            reference,
            sub.query,
            self.path.field(&sub.result_key),
            sub.guaranteed_to_exist,
            on_update,
            Arc::clone(&self.on_error),
        );
        self.children.insert(
            sub.key,
            ChildListener {
                generation,
                result_key: sub.result_key,
                kind: sub.kind,
                listener,
            },
        );
    }

    fn teardown_child(&mut self, key: &str) {
        if let Some(child) = self.children.remove(key) {
            debug!(key, "unsubscribing child");
            child.listener.unsubscribe();
            self.result.data.remove(&child.result_key);
        }
    }

    /// Rebuild the plain part of the result from the snapshot, keeping
    /// the slots owned by children.
    fn sync_result(&mut self) {
        let joined: HashSet<String> = self
            .children
            .values()
            .map(|child| child.result_key.clone())
            .collect();
        let data = &self.snapshot.data;
        self.result
            .data
            .retain(|key, _| joined.contains(key) || data.contains_key(key));
        for (key, value) in data {
            if !joined.contains(key) {
                self.result.data.insert(key.clone(), GraphValue::Field(value.clone()));
            }
        }
        self.result.id = self.snapshot.id.clone();
        self.result.reference = self.snapshot.reference.clone();
        self.result.metadata = self.snapshot.metadata;
    }

    /// Diff the current snapshot and query against the next ones.
    ///
    /// Every key touched by either snapshot's links or either query is
    /// planned first, and on a commit every forwarded child validates its
    /// own subtree; nothing is mutated until all of that has succeeded.
    fn reconcile(
        &mut self,
        next_snapshot: QueryDocumentSnapshot,
        next_query: GraphQuery,
        snapshot_changed: bool,
        dry_run: bool,
    ) -> Result<bool> {
        if dry_run && snapshot_changed {
            return Ok(true);
        }
        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config;
        let old_fields: QueryFields = evaluate(&self.snapshot, &self.query).into_owned();
        let new_fields: QueryFields = evaluate(&next_snapshot, &next_query).into_owned();

        let mut has_update = snapshot_changed;
        let mut plans: Vec<(String, Plan)> = Vec::new();

        // Link-typed keys present in either snapshot's data.
        let link_keys = ordered_union(
            self.snapshot.data.keys().map(String::as_str).filter(|k| config.is_link_key(k)),
            next_snapshot.data.keys().map(String::as_str).filter(|k| config.is_link_key(k)),
        );
        // Remaining query keys.
        let query_keys: Vec<String> = ordered_union(old_fields.keys(), new_fields.keys())
            .into_iter()
            .filter(|key| !link_keys.contains(key))
            .collect();

        for (key, in_data) in link_keys
            .iter()
            .map(|key| (key, true))
            .chain(query_keys.iter().map(|key| (key, false)))
        {
            let data_changed = in_data
                && self.snapshot.data.contains_key(key) != next_snapshot.data.contains_key(key);
            let presence_changed =
                data_changed || old_fields.contains_key(key) != new_fields.contains_key(key);

            let sub = match new_fields.get(key) {
                Some(field) => Some(resolve_sub_query(&next_snapshot, key, field, config)?),
                None => None,
            };
            let plan = self.plan_key(key, sub);
            let structural = matches!(
                plan,
                Some(Plan::Teardown | Plan::Spawn(_) | Plan::Replace(_))
            );
            if presence_changed || structural {
                has_update = true;
                if dry_run {
                    trace!(key = %key, "dry run: key would change");
                    return Ok(true);
                }
            }
            match plan {
                Some(Plan::Forward(sub)) if dry_run => {
                    if let Some(child) = self.children.get(key) {
                        if let Some(reference) = &sub.reference {
                            ensure_same_kind(key, &child.listener, reference)?;
                        }
                        if child.listener.update_query(&sub.query, true)? {
                            trace!(key = %key, "dry run: child would change");
                            return Ok(true);
                        }
                    }
                }
                Some(Plan::Forward(sub)) => {
                    self.validate_forward(key, &sub)?;
                    plans.push((key.clone(), Plan::Forward(sub)));
                }
                Some(plan) => plans.push((key.clone(), plan)),
                None => {}
            }
        }

        if dry_run {
            return Ok(has_update);
        }

        self.snapshot = next_snapshot;
        self.query = next_query;
        for (key, plan) in plans {
            match plan {
                Plan::Teardown => self.teardown_child(&key),
                Plan::Spawn(sub) => self.spawn_child(sub),
                Plan::Replace(sub) => {
                    debug!(key = %key, "replacing child");
                    self.teardown_child(&key);
                    self.spawn_child(sub);
                }
                Plan::Forward(sub) => {
                    let Some(child) = self.children.get(&key) else {
                        continue;
                    };
                    match child.listener.update_query(&sub.query, false) {
                        Ok(true) => {
                            has_update = true;
                            if let Some(value) = child.listener.result() {
                                self.result.data.insert(child.result_key.clone(), value);
                            }
                        }
                        Ok(false) => {}
                        // The child's data moved between validation and commit.
                        Err(error) => {
                            warn!(
                                key = %key,
                                error = %error,
                                "child rejected query, resubscribing"
                            );
                            has_update = true;
                            self.teardown_child(&key);
                            self.spawn_child(sub);
                        }
                    }
                }
            }
        }
        self.sync_result();
        Ok(has_update)
    }

    fn validate_forward(&self, key: &str, sub: &SubQuery) -> Result<()> {
        let Some(child) = self.children.get(key) else {
            return Ok(());
        };
        if let Some(reference) = &sub.reference {
            ensure_same_kind(key, &child.listener, reference)?;
        }
        child.listener.validate(&sub.query)
    }

    /// Decide what happens to the child under `key` given its next
    /// resolution. `None` leaves it alone.
    fn plan_key(&self, key: &str, sub: Option<SubQuery>) -> Option<Plan> {
        let existing = self.children.get(key);
        let wanted = sub.filter(|sub| sub.reference.is_some());
        match (existing, wanted) {
            (None, None) => None,
            (Some(_), None) => Some(Plan::Teardown),
            (None, Some(sub)) => Some(Plan::Spawn(sub)),
            (Some(child), Some(sub)) => {
                let reference = child.listener.reference();
                let same_target = sub.reference.as_ref() == Some(&reference);
                if same_target && child.kind == sub.kind && child.result_key == sub.result_key {
                    Some(Plan::Forward(sub))
                } else {
                    Some(Plan::Replace(sub))
                }
            }
        }
    }
}

fn ensure_same_kind(key: &str, listener: &NodeListener, reference: &Reference) -> Result<()> {
    if listener.kind() == reference.kind() {
        Ok(())
    } else {
        Err(GraphError::QueryTypeMismatch {
            key: key.to_string(),
            from: listener.kind(),
            to: reference.kind(),
        })
    }
}
