//! World query benchmarks.
//!
//! Compares a full `get_entities_with` scan against a cached [`Query`] that
//! is refreshed every frame while the tracked component types stay
//! unchanged, the common case for page render systems.
//!
//! Run with: `cargo bench --bench world_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use folio_ecs::prelude::*;
use serde_json::json;

fn setup_world(entity_count: usize) -> World {
    let mut world = World::new();
    world.register_schema(
        ComponentSchema::builder("position")
            .with_default("x", FieldType::Number, json!(0))
            .with_default("y", FieldType::Number, json!(0))
            .build(),
    );
    for i in 0..entity_count {
        let e = world.create_entity();
        world
            .add_component(e, "position", json!({"x": i, "y": i}))
            .unwrap();
        if i % 4 == 0 {
            world
                .add_component(e, "appearance", json!({"color": "teal"}))
                .unwrap();
        }
    }
    world
}

fn bench_full_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_entities_with");
    for count in [100usize, 1_000, 10_000] {
        let world = setup_world(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &world, |b, world| {
            b.iter(|| black_box(world.get_entities_with(&["position", "appearance"])));
        });
    }
    group.finish();
}

fn bench_cached_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_query_refresh");
    for count in [100usize, 1_000, 10_000] {
        let world = setup_world(count);
        let mut query = Query::new(&["position", "appearance"]);
        query.refresh(&world);
        group.bench_with_input(BenchmarkId::from_parameter(count), &world, |b, world| {
            b.iter(|| black_box(query.refresh(world).len()));
        });
    }
    group.finish();
}

fn bench_schema_validation(c: &mut Criterion) {
    let schema = ComponentSchema::builder("project")
        .required("title", FieldType::String)
        .with_default("stars", FieldType::Number, json!(0))
        .field("repo", [FieldType::String, FieldType::Null])
        .build();
    let data = json!({"title": "folio", "repo": null})
        .as_object()
        .cloned()
        .unwrap();
    c.bench_function("schema_create_component", |b| {
        b.iter(|| black_box(schema.create_component(data.clone()).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_full_scan,
    bench_cached_query,
    bench_schema_validation
);
criterion_main!(benches);
