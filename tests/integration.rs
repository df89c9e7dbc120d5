//! Integration tests for live graph listeners.
#![cfg(feature = "memory-store")]

use livegraph::{
    field, field_guaranteed, Direction, DocumentRef, Fields, GraphClient, GraphCollection,
    GraphDocument, GraphError, GraphQuery, GraphValue, MemoryStore, NodeListener, QueryFields,
    QueryRef, Reference, Value,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

fn setup() -> (MemoryStore, GraphClient) {
    let store = MemoryStore::new();
    let client = GraphClient::new(Arc::new(store.clone()));
    (store, client)
}

fn with_ref(mut data: Fields, key: &str, value: impl Into<Value>) -> Fields {
    data.insert(key.to_string(), value.into());
    data
}

/// Collects everything a listener reports.
#[derive(Clone, Default)]
struct Recorder {
    values: Arc<Mutex<Vec<GraphValue>>>,
    errors: Arc<Mutex<Vec<GraphError>>>,
}

impl Recorder {
    fn listen(
        &self,
        client: &GraphClient,
        reference: impl Into<Reference>,
        query: impl Into<GraphQuery>,
    ) -> NodeListener {
        let values = Arc::clone(&self.values);
        let errors = Arc::clone(&self.errors);
        client.make_listener(
            reference,
            query,
            move |value| values.lock().push(value),
            move |error| errors.lock().push(error),
        )
    }

    fn count(&self) -> usize {
        self.values.lock().len()
    }

    fn last(&self) -> GraphValue {
        self.values.lock().last().cloned().expect("no value emitted")
    }

    fn last_document(&self) -> Arc<GraphDocument> {
        existing(&self.last())
    }

    fn last_collection(&self) -> GraphCollection {
        self.last().as_collection().cloned().expect("not a collection")
    }
}

fn existing(value: &GraphValue) -> Arc<GraphDocument> {
    value
        .as_document()
        .and_then(|snapshot| snapshot.document())
        .cloned()
        .expect("not an existing document")
}

fn joined(document: &GraphDocument, key: &str) -> Arc<GraphDocument> {
    document
        .document(key)
        .and_then(|snapshot| snapshot.document())
        .cloned()
        .unwrap_or_else(|| panic!("{key} is not a joined document"))
}

// --- Single documents ---

#[test]
fn test_empty_query_emits_own_fields() {
    let (store, client) = setup();
    let project = DocumentRef::new("projects/p1");
    store.set_json(&project, json!({ "title": "Demo", "stars": 3 }));

    let recorder = Recorder::default();
    let listener = recorder.listen(&client, project.clone(), GraphQuery::empty());
    assert_eq!(recorder.count(), 0);
    assert!(listener.is_loading());

    store.flush();
    assert_eq!(recorder.count(), 1);
    assert!(!listener.is_loading());
    let document = recorder.last_document();
    assert_eq!(document.id, "p1");
    assert_eq!(document.field("title"), Some(&Value::from("Demo")));
    assert_eq!(document.field("stars"), Some(&Value::from(3i64)));
    assert_eq!(store.live_subscriptions(), 1);
}

#[test]
fn test_null_link_leaves_slot_absent() {
    let (store, client) = setup();
    let project = DocumentRef::new("projects/p1");
    store.set_json(&project, json!({ "title": "Demo", "ownerRef": null }));

    let recorder = Recorder::default();
    let listener = recorder.listen(
        &client,
        project,
        QueryFields::new().link("ownerRef", GraphQuery::empty()),
    );
    store.flush();

    assert_eq!(recorder.count(), 1);
    assert!(!listener.is_loading());
    let document = recorder.last_document();
    assert!(document.get("owner").is_none());
    assert_eq!(document.field("ownerRef"), Some(&Value::Null));
    assert_eq!(store.live_subscriptions(), 1);
}

#[test]
fn test_nested_links_emit_once_complete() {
    let (store, client) = setup();
    let project = DocumentRef::new("projects/p1");
    let alice = DocumentRef::new("users/alice");
    let song_one = DocumentRef::new("songs/s1");
    let song_two = DocumentRef::new("songs/s2");
    store.set_json(&song_one, json!({ "title": "Song 1" }));
    store.set_json(&song_two, json!({ "title": "Song 2" }));
    store.set(
        &alice,
        with_ref(Value::fields_from_json(json!({ "name": "Alice" })), "nowPlayingRef", song_one),
    );
    store.set(
        &project,
        with_ref(Value::fields_from_json(json!({ "title": "Demo" })), "ownerRef", alice.clone()),
    );

    let query = QueryFields::new().link(
        "ownerRef",
        QueryFields::new().link("nowPlayingRef", GraphQuery::empty()),
    );
    let recorder = Recorder::default();
    let listener = recorder.listen(&client, project, query);
    store.flush();

    assert_eq!(recorder.count(), 1, "intermediate states must not be emitted");
    let owner = joined(&recorder.last_document(), "owner");
    assert_eq!(owner.field("name"), Some(&Value::from("Alice")));
    assert_eq!(joined(&owner, "nowPlaying").field("title"), Some(&Value::from("Song 1")));
    assert!(owner.field("nowPlayingRef").is_some());
    assert_eq!(store.live_subscriptions(), 3);

    // Re-point the nested link: the old song listener is replaced.
    store.merge(&alice, with_ref(Fields::new(), "nowPlayingRef", song_two));
    store.flush();
    assert_eq!(recorder.count(), 2);
    let owner = joined(&recorder.last_document(), "owner");
    assert_eq!(joined(&owner, "nowPlaying").field("title"), Some(&Value::from("Song 2")));
    assert_eq!(store.live_subscriptions(), 3);

    // Clear it: the slot disappears, the raw null stays.
    store.merge(&alice, with_ref(Fields::new(), "nowPlayingRef", Value::Null));
    store.flush();
    assert_eq!(recorder.count(), 3);
    let owner = joined(&recorder.last_document(), "owner");
    assert!(owner.get("nowPlaying").is_none());
    assert_eq!(owner.field("nowPlayingRef"), Some(&Value::Null));
    assert_eq!(store.live_subscriptions(), 2);

    listener.unsubscribe();
    assert_eq!(store.live_subscriptions(), 0);
}

#[test]
fn test_missing_document_lifecycle() {
    let (store, client) = setup();
    let bob = DocumentRef::new("users/bob");
    let recorder = Recorder::default();
    let listener = recorder.listen(&client, bob.clone(), GraphQuery::empty());

    store.flush();
    assert_eq!(recorder.count(), 1);
    assert!(!listener.is_loading());
    let snapshot = recorder.last().as_document().cloned().unwrap();
    assert!(!snapshot.exists());
    assert_eq!(snapshot.reference(), &bob);

    store.set_json(&bob, json!({ "name": "Bob" }));
    store.flush();
    assert_eq!(recorder.last_document().field("name"), Some(&Value::from("Bob")));

    store.delete(&bob);
    store.flush();
    assert_eq!(recorder.count(), 3);
    assert!(!recorder.last().as_document().unwrap().exists());
}

#[test]
fn test_removed_document_drops_its_children() {
    let (store, client) = setup();
    let project = DocumentRef::new("projects/p1");
    let alice = DocumentRef::new("users/alice");
    store.set_json(&alice, json!({ "name": "Alice" }));
    store.set(&project, with_ref(Fields::new(), "ownerRef", alice));

    let recorder = Recorder::default();
    let _listener = recorder.listen(
        &client,
        project.clone(),
        QueryFields::new().link("ownerRef", GraphQuery::empty()),
    );
    store.flush();
    assert_eq!(store.live_subscriptions(), 2);

    store.delete(&project);
    store.flush();
    assert!(!recorder.last().as_document().unwrap().exists());
    assert_eq!(store.live_subscriptions(), 1);
}

#[test]
fn test_plain_field_removal_is_reflected() {
    let (store, client) = setup();
    let project = DocumentRef::new("projects/p1");
    store.set_json(&project, json!({ "title": "Demo", "draft": true }));

    let recorder = Recorder::default();
    let _listener = recorder.listen(&client, project.clone(), GraphQuery::empty());
    store.flush();
    assert!(recorder.last_document().field("draft").is_some());

    store.remove_field(&project, "draft");
    store.flush();
    let document = recorder.last_document();
    assert!(document.field("draft").is_none());
    assert_eq!(document.field("title"), Some(&Value::from("Demo")));
}

#[test]
fn test_emitted_values_are_not_mutated_later() {
    let (store, client) = setup();
    let project = DocumentRef::new("projects/p1");
    store.set_json(&project, json!({ "title": "Before" }));

    let recorder = Recorder::default();
    let _listener = recorder.listen(&client, project.clone(), GraphQuery::empty());
    store.flush();
    let first = recorder.last_document();

    store.set_json(&project, json!({ "title": "After" }));
    store.flush();
    assert_eq!(first.field("title"), Some(&Value::from("Before")));
    assert_eq!(recorder.last_document().field("title"), Some(&Value::from("After")));
}

// --- Collections ---

#[test]
fn test_collection_initial_batch_and_removal() {
    let (store, client) = setup();
    let kanbans = QueryRef::new("projects/p1/kanbans").order_by("order", Direction::Ascending);
    for (id, order) in [("k1", 1), ("k2", 2), ("k3", 3)] {
        store.set_json(&kanbans.doc(id), json!({ "order": order }));
    }

    let recorder = Recorder::default();
    let listener = recorder.listen(&client, kanbans.clone(), GraphQuery::empty());
    store.flush();

    assert_eq!(recorder.count(), 1);
    assert!(!listener.is_loading());
    let collection = recorder.last_collection();
    assert_eq!(collection.ids(), vec!["k1", "k2", "k3"]);
    assert_eq!(collection.snapshot.size, 3);

    store.delete(&kanbans.doc("k2"));
    store.flush();
    let collection = recorder.last_collection();
    assert_eq!(collection.ids(), vec!["k1", "k3"]);
    assert_eq!(collection.snapshot.size, 2);
    assert_eq!(store.live_subscriptions(), 1);
}

#[test]
fn test_empty_collection_emits() {
    let (store, client) = setup();
    let recorder = Recorder::default();
    let listener =
        recorder.listen(&client, QueryRef::new("projects/p1/kanbans"), GraphQuery::empty());
    assert!(listener.is_loading());

    store.flush();
    assert_eq!(recorder.count(), 1);
    assert!(recorder.last_collection().is_empty());
    assert!(!listener.is_loading());
}

#[test]
fn test_collection_members_follow_links() {
    let (store, client) = setup();
    let alice = DocumentRef::new("users/alice");
    let bob = DocumentRef::new("users/bob");
    store.set_json(&alice, json!({ "name": "Alice" }));
    store.set_json(&bob, json!({ "name": "Bob" }));
    let tasks = QueryRef::new("projects/p1/tasks");
    store.set(&tasks.doc("t1"), with_ref(Fields::new(), "assigneeRef", alice));
    store.set(&tasks.doc("t2"), with_ref(Fields::new(), "assigneeRef", bob.clone()));

    let recorder = Recorder::default();
    let listener = recorder.listen(
        &client,
        tasks.clone(),
        QueryFields::new().link("assigneeRef", GraphQuery::empty()),
    );
    store.flush();

    assert_eq!(recorder.count(), 1);
    let names: Vec<Value> = recorder
        .last_collection()
        .iter()
        .map(|task| joined(task, "assignee").field("name").cloned().unwrap())
        .collect();
    assert_eq!(names, vec![Value::from("Alice"), Value::from("Bob")]);
    assert_eq!(store.live_subscriptions(), 3);

    // A change deep in a member surfaces through the collection.
    store.set_json(&bob, json!({ "name": "Robert" }));
    store.flush();
    let second = Arc::clone(&recorder.last_collection().documents[1]);
    assert_eq!(joined(&second, "assignee").field("name"), Some(&Value::from("Robert")));

    store.delete(&tasks.doc("t1"));
    store.flush();
    assert_eq!(recorder.last_collection().ids(), vec!["t2"]);
    assert_eq!(store.live_subscriptions(), 2);

    listener.unsubscribe();
    assert_eq!(store.live_subscriptions(), 0);
}

// --- Query changes ---

#[test]
fn test_dry_run_then_commit_adds_extension() {
    let (store, client) = setup();
    let project = DocumentRef::new("projects/p1");
    let alice = DocumentRef::new("users/alice");
    store.set_json(&project, json!({ "title": "Demo" }));
    store.set_json(&alice, json!({ "name": "Alice" }));

    let recorder = Recorder::default();
    let listener = recorder.listen(&client, project, GraphQuery::empty());
    store.flush();
    assert!(!listener.is_loading());

    let query: GraphQuery = QueryFields::new()
        .extension("owner", field(alice, GraphQuery::empty()))
        .into();

    assert!(listener.update_query(&query, true).unwrap());
    assert!(!listener.is_loading());
    assert_eq!(store.live_subscriptions(), 1);
    assert!(existing(&listener.result().unwrap()).get("owner").is_none());

    assert!(listener.update_query(&query, false).unwrap());
    assert_eq!(store.live_subscriptions(), 2);
    assert!(listener.is_loading());
    assert!(listener.result().is_none());
    assert_eq!(recorder.count(), 1);

    store.flush();
    assert!(!listener.is_loading());
    assert_eq!(recorder.count(), 2);
    let owner = joined(&recorder.last_document(), "owner");
    assert_eq!(owner.field("name"), Some(&Value::from("Alice")));

    // Same query again changes nothing.
    assert!(!listener.update_query(&query, true).unwrap());
    assert!(!listener.update_query(&query, false).unwrap());
    assert_eq!(store.live_subscriptions(), 2);
}

#[test]
fn test_generator_query_follows_subcollection() {
    let (store, client) = setup();
    let project = DocumentRef::new("projects/p1");
    store.set_json(&project, json!({ "title": "Demo" }));
    store.set_json(&project.collection("kanbans").doc("k1"), json!({ "name": "Todo" }));
    store.set_json(&project.collection("kanbans").doc("k2"), json!({ "name": "Done" }));

    let query = GraphQuery::generator(|doc| {
        QueryFields::new().extension(
            "kanbans",
            field(doc.reference.collection("kanbans"), GraphQuery::empty()),
        )
    });
    let recorder = Recorder::default();
    let _listener = recorder.listen(&client, project.clone(), query);
    store.flush();

    let document = recorder.last_document();
    let kanbans = document.collection("kanbans").unwrap();
    assert_eq!(kanbans.ids(), vec!["k1", "k2"]);
    assert_eq!(store.live_subscriptions(), 2);

    // Unrelated field changes keep the same child subscription.
    store.set_json(&project, json!({ "title": "Renamed" }));
    store.flush();
    assert_eq!(recorder.last_document().field("title"), Some(&Value::from("Renamed")));
    assert_eq!(recorder.last_document().collection("kanbans").unwrap().len(), 2);
    assert_eq!(store.live_subscriptions(), 2);
}

#[test]
fn test_guaranteed_reference_to_missing_document() {
    let (store, client) = setup();
    let live = client
        .live_query(QueryFields::new().extension(
            "me",
            field_guaranteed(DocumentRef::new("users/ghost"), GraphQuery::empty()),
        ))
        .unwrap();
    assert!(live.is_loading());

    store.flush();
    assert!(!live.is_loading());
    let root = live.value().unwrap();
    assert!(!root.document("me").unwrap().exists());
}
