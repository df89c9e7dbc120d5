//! Performance benchmarks for live graph listeners.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use livegraph::{
    field, Direction, DocumentRef, Fields, GraphClient, GraphQuery, MemoryStore, QueryFields,
    QueryRef, Value,
};
use serde_json::json;
use std::sync::Arc;

fn populate(store: &MemoryStore, tasks: usize, users: usize) -> QueryRef {
    for u in 0..users {
        store.set_json(
            &DocumentRef::new(format!("users/u{u}")),
            json!({ "name": format!("User {u}") }),
        );
    }
    let query = QueryRef::new("tasks").order_by("rank", Direction::Ascending);
    for t in 0..tasks {
        let mut data =
            Value::fields_from_json(json!({ "rank": t as i64, "title": format!("Task {t}") }));
        data.insert(
            "assigneeRef".to_string(),
            DocumentRef::new(format!("users/u{}", t % users)).into(),
        );
        store.set(&query.doc(&format!("t{t}")), data);
    }
    query
}

fn task_query(tasks: &QueryRef) -> QueryFields {
    QueryFields::new().extension(
        "tasks",
        field(tasks.clone(), QueryFields::new().link("assigneeRef", GraphQuery::empty())),
    )
}

/// Benchmark building and loading a collection join from scratch
fn bench_initial_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("initial_load");

    for size in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::new("tasks", size), &size, |b, &size| {
            let store = MemoryStore::new();
            let tasks = populate(&store, size, 10);
            let client = GraphClient::new(Arc::new(store.clone()));

            b.iter(|| {
                let live = client.live_query(task_query(&tasks)).unwrap();
                store.flush();
                black_box(live.value())
            });
        });
    }

    group.finish();
}

/// Benchmark propagating a single member change through a loaded join
fn bench_member_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("member_update");

    for size in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::new("tasks", size), &size, |b, &size| {
            let store = MemoryStore::new();
            let tasks = populate(&store, size, 10);
            let client = GraphClient::new(Arc::new(store.clone()));
            let live = client.live_query(task_query(&tasks)).unwrap();
            store.flush();

            let target = tasks.doc("t0");
            let mut rank = 0i64;
            b.iter(|| {
                rank += 1;
                let mut data: Fields = store.get(&target).unwrap_or_default();
                data.insert("title".to_string(), Value::from(format!("Task 0 #{rank}")));
                store.set(&target, data);
                store.flush();
                black_box(live.value())
            });
        });
    }

    group.finish();
}

/// Benchmark dry-run probing of a query change
fn bench_dry_run(c: &mut Criterion) {
    let store = MemoryStore::new();
    let tasks = populate(&store, 200, 10);
    let client = GraphClient::new(Arc::new(store.clone()));
    let live = client.live_query(task_query(&tasks)).unwrap();
    store.flush();

    let unchanged: GraphQuery = task_query(&tasks).into();
    let deeper: GraphQuery = QueryFields::new()
        .extension(
            "tasks",
            field(
                tasks.clone(),
                QueryFields::new()
                    .link("assigneeRef", GraphQuery::empty())
                    .extension(
                        "project",
                        field(DocumentRef::new("projects/p1"), GraphQuery::empty()),
                    ),
            ),
        )
        .into();

    c.bench_function("dry_run_unchanged", |b| {
        b.iter(|| black_box(live.would_change(&unchanged).unwrap()))
    });
    c.bench_function("dry_run_changed", |b| {
        b.iter(|| black_box(live.would_change(&deeper).unwrap()))
    });
}

criterion_group!(benches, bench_initial_load, bench_member_update, bench_dry_run);
criterion_main!(benches);
