//! Live query observation: state, events and teardown.
#![cfg(feature = "memory-store")]

use livegraph::{
    field, DocumentRef, Fields, GraphClient, GraphConfig, GraphQuery, LiveQuery, MemoryStore,
    QueryEvent, QueryFields, Value,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

fn profile_query(user: &DocumentRef) -> QueryFields {
    QueryFields::new().extension("me", field(user.clone(), GraphQuery::empty()))
}

fn name_of(live: &LiveQuery) -> Option<Value> {
    let root = live.value()?;
    let me = root.document("me")?.document()?;
    me.field("name").cloned()
}

#[test]
fn test_state_transitions() {
    init_tracing();
    let store = MemoryStore::new();
    let client = GraphClient::new(Arc::new(store.clone()));
    let alice = DocumentRef::new("users/alice");
    store.set_json(&alice, json!({ "name": "Alice" }));

    let live = client.live_query(profile_query(&alice)).unwrap();
    let state = live.state();
    assert!(state.loading);
    assert!(state.value.is_none());
    assert!(state.error.is_none());
    assert_eq!(live.child_count(), 1);

    store.flush();
    assert!(!live.is_loading());
    assert_eq!(name_of(&live), Some(Value::from("Alice")));
    assert!(matches!(live.try_recv(), Ok(QueryEvent::Updated(_))));
    assert!(live.try_recv().is_err());

    store.set_json(&alice, json!({ "name": "Alicia" }));
    store.flush();
    assert_eq!(name_of(&live), Some(Value::from("Alicia")));
    match live.try_recv() {
        Ok(QueryEvent::Updated(root)) => assert!(root.document("me").is_some()),
        other => panic!("expected an update, got {other:?}"),
    }
}

#[test]
fn test_empty_root_completes_immediately() {
    let store = MemoryStore::new();
    let client = GraphClient::new(Arc::new(store.clone()));
    let live = client.live_query(QueryFields::new()).unwrap();
    assert!(!live.is_loading());
    assert!(live.value().unwrap().data.is_empty());
    assert_eq!(store.live_subscriptions(), 0);
}

#[test]
fn test_would_change_reports_loading_without_mutation() {
    let store = MemoryStore::new();
    let client = GraphClient::new(Arc::new(store.clone()));
    let alice = DocumentRef::new("users/alice");
    let bob = DocumentRef::new("users/bob");
    let live = client.live_query(profile_query(&alice)).unwrap();

    // Still loading: any query would keep it loading.
    assert!(live.would_change(&profile_query(&alice).into()).unwrap());
    store.flush();

    assert!(!live.would_change(&profile_query(&alice).into()).unwrap());
    assert!(live.would_change(&profile_query(&bob).into()).unwrap());
    assert_eq!(store.live_subscriptions(), 1);
    assert_eq!(store.pending_count(), 0);
}

#[test]
fn test_drop_tears_down_tree() {
    let store = MemoryStore::new();
    let client = GraphClient::new(Arc::new(store.clone()));
    {
        let _live = client
            .live_query(
                QueryFields::new()
                    .extension("a", field(DocumentRef::new("users/a"), GraphQuery::empty()))
                    .extension("b", field(DocumentRef::new("users/b"), GraphQuery::empty())),
            )
            .unwrap();
        store.flush();
        assert_eq!(store.live_subscriptions(), 2);
    }
    assert_eq!(store.live_subscriptions(), 0);
}

#[test]
fn test_full_event_buffer_drops_events_but_keeps_state() {
    let store = MemoryStore::new();
    let config = GraphConfig {
        event_buffer_size: 1,
        ..Default::default()
    };
    let client = GraphClient::with_config(Arc::new(store.clone()), config);
    let alice = DocumentRef::new("users/alice");
    let live = client.live_query(profile_query(&alice)).unwrap();

    for name in ["One", "Two", "Three"] {
        store.set_json(&alice, json!({ "name": name }));
        store.flush();
    }
    assert_eq!(name_of(&live), Some(Value::from("Three")));
    assert!(live.try_recv().is_ok());
    assert!(live.try_recv().is_err());
}

#[test]
fn test_custom_link_suffix() {
    let store = MemoryStore::new();
    let config = GraphConfig {
        link_suffix: "Link".to_string(),
        ..Default::default()
    };
    let client = GraphClient::with_config(Arc::new(store.clone()), config);
    let project = DocumentRef::new("projects/p1");
    let alice = DocumentRef::new("users/alice");
    store.set_json(&alice, json!({ "name": "Alice" }));
    let mut data = Fields::new();
    data.insert("ownerLink".to_string(), alice.into());
    store.set(&project, data);

    let live = client
        .live_reference(
            Some(project.into()),
            QueryFields::new().link("ownerLink", GraphQuery::empty()),
        )
        .unwrap();
    store.flush();
    let target = live.target().unwrap();
    let project = target.as_document().and_then(|s| s.document()).cloned().unwrap();
    let owner = project.document("owner").and_then(|s| s.document()).unwrap();
    assert_eq!(owner.field("name"), Some(&Value::from("Alice")));

    assert!(live.set_target(None, GraphQuery::empty()).unwrap());
    assert!(live.target().is_none());
    assert_eq!(store.live_subscriptions(), 0);
}

#[test]
fn test_delivery_from_another_thread() {
    init_tracing();
    let store = MemoryStore::new();
    let client = GraphClient::new(Arc::new(store.clone()));
    let alice = DocumentRef::new("users/alice");
    store.set_json(&alice, json!({ "name": "Alice" }));
    let live = client.live_query(profile_query(&alice)).unwrap();

    let deliverer = {
        let store = store.clone();
        thread::spawn(move || store.flush())
    };
    let event = live.recv_timeout(Duration::from_secs(5)).unwrap();
    deliverer.join().unwrap();

    match event {
        QueryEvent::Updated(root) => {
            let me = root.document("me").and_then(|s| s.document()).unwrap();
            assert_eq!(me.field("name"), Some(&Value::from("Alice")));
        }
        QueryEvent::Failed(error) => panic!("unexpected error: {error}"),
    }
    assert!(!live.is_loading());
}
