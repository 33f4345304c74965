//! Headless portfolio site -- loads projects, lays out cards, renders pages.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example portfolio -p folio-engine
//!
//! The demo wires up the systems a browser host would: a resource loader that
//! fills the world during async init, a navigation system, a layout pass on
//! the fixed step, and a render pass once per frame. Frames are fed with
//! synthetic 60 Hz timestamps, with one long hitch in the middle.

use std::sync::Arc;

use async_trait::async_trait;
use folio_engine::prelude::*;
use futures::executor::block_on;
use serde::{Deserialize, Serialize};
use serde_json::json;

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Layout {
    column: u32,
    row: u32,
    opacity: f64,
}

fn register_schemas(world: &mut World) -> anyhow::Result<()> {
    world.register_schema(ComponentSchema::from_json(
        "project",
        &json!({
            "title": {"type": "string", "required": true},
            "summary": {"type": "string", "default": ""},
            "tags": {"type": "array", "default": []},
            "page": {"type": "string", "default": "projects"},
        }),
    )?);
    world.register_schema(
        ComponentSchema::builder("skill")
            .required("name", FieldType::String)
            .with_default("level", FieldType::Number, json!(1))
            .build(),
    );
    world.register_schema(
        ComponentSchema::builder("navigation")
            .required("current", FieldType::String)
            .with_default("history", FieldType::Array, json!([]))
            .field("on_change", [FieldType::Function, FieldType::Null])
            .build(),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// Fetches site content during init.
struct ResourceSystem;

#[async_trait(?Send)]
impl System for ResourceSystem {
    async fn init(&mut self, ctx: &InitContext<'_>) -> anyhow::Result<()> {
        let projects = fetch_projects().await;
        let mut world = ctx.world_mut();
        for project in projects {
            let e = world.create_entity();
            world.add_component(e, "project", project)?;
        }
        for (name, level) in [("rust", 4), ("typescript", 3), ("wgsl", 2)] {
            let e = world.create_entity();
            world.add_component(e, "skill", json!({"name": name, "level": level}))?;
        }
        tracing::info!(entities = world.entity_count(), "site content loaded");
        Ok(())
    }
}

async fn fetch_projects() -> Vec<serde_json::Value> {
    futures::future::ready(vec![
        json!({"title": "folio", "summary": "This site.", "tags": ["rust", "ecs"]}),
        json!({"title": "tilemap", "tags": ["wasm"]}),
        json!({"title": "sketchbook", "summary": "Generative doodles."}),
    ])
    .await
}

/// Tracks the current page.
struct NavigationSystem {
    entity: Option<EntityId>,
    visits: u32,
}

#[async_trait(?Send)]
impl System for NavigationSystem {
    async fn init(&mut self, ctx: &InitContext<'_>) -> anyhow::Result<()> {
        let mut world = ctx.world_mut();
        let e = world.create_entity();
        world.add_component(
            e,
            "navigation",
            json!({"current": "about", "on_change": "nav.scrollTop"}),
        )?;
        self.entity = Some(e);
        Ok(())
    }

    fn update(&mut self, world: &mut World, _dt: f64) -> anyhow::Result<()> {
        let Some(e) = self.entity else {
            return Ok(());
        };
        self.visits += 1;
        if self.visits == 30 {
            let nav = world
                .get_component_mut(e, "navigation")
                .ok_or_else(|| anyhow::anyhow!("navigation entity lost"))?;
            nav.insert("current".to_owned(), json!("projects"));
            tracing::info!(page = "projects", "navigated");
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.visits = 0;
    }
}

/// Places project cards on a three-column grid and fades them in.
struct LayoutSystem {
    query: Query,
}

impl System for LayoutSystem {
    fn update(&mut self, world: &mut World, dt: f64) -> anyhow::Result<()> {
        let cards = self.query.refresh(world).to_vec();
        for (i, e) in cards.into_iter().enumerate() {
            let opacity = world
                .get_typed::<Layout>(e, "layout")?
                .map_or(0.0, |l| (l.opacity + dt * 2.0).min(1.0));
            let layout = Layout {
                column: i as u32 % 3,
                row: i as u32 / 3,
                opacity,
            };
            world.add_typed(e, "layout", &layout)?;
        }
        Ok(())
    }
}

/// Produces the page markup once per frame.
struct RenderSystem {
    frames: u64,
}

impl System for RenderSystem {
    fn update(&mut self, world: &mut World, _dt: f64) -> anyhow::Result<()> {
        self.frames += 1;
        let page = world
            .get_entities_with(&["navigation"])
            .first()
            .and_then(|e| world.get_component(*e, "navigation"))
            .and_then(|nav| nav["current"].as_str().map(str::to_owned))
            .unwrap_or_else(|| "about".to_owned());

        let mut markup = format!("<main data-page=\"{page}\">");
        for e in world.get_entities_with(&["project", "layout"]) {
            let (Some(project), Some(layout)) = (
                world.get_component(e, "project"),
                world.get_typed::<Layout>(e, "layout")?,
            ) else {
                continue;
            };
            markup.push_str(&format!(
                "<article style=\"grid-area:{}/{};opacity:{:.2}\">{}</article>",
                layout.row + 1,
                layout.column + 1,
                layout.opacity,
                project["title"].as_str().unwrap_or_default()
            ));
        }
        markup.push_str("</main>");
        if self.frames % 30 == 0 {
            tracing::debug!(frame = self.frames, markup = %markup, "rendered page");
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.frames = 0;
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut world = World::new();
    register_schemas(&mut world)?;

    let sink = Arc::new(RecordingSink::new());
    let mut runtime = Runtime::with_events(world, EventBus::with_sink(sink.clone()));
    {
        let scheduler = runtime.scheduler_mut();
        scheduler.create_group("logic", 0);
        scheduler.create_group_in_phase("render", 100, Phase::Variable);
    }

    runtime.register_system(
        RenderSystem { frames: 0 },
        SystemConfig::new("Render")
            .kind("render")
            .group("render")
            .depends_on("Layout"),
    )?;
    runtime.register_system(
        LayoutSystem { query: Query::new(&["project"]) },
        SystemConfig::new("Layout")
            .kind("layout")
            .group("logic")
            .priority(10)
            .depends_on("Resource"),
    )?;
    runtime.register_system(
        NavigationSystem { entity: None, visits: 0 },
        SystemConfig::new("Navigation").kind("input").group("logic"),
    )?;
    runtime.register_system(
        ResourceSystem,
        SystemConfig::new("Resource").kind("resource").group("logic"),
    )?;

    let report = block_on(runtime.initialize());
    tracing::info!(
        initialized = ?report.initialized,
        passes = report.passes,
        stalled = report.stalled.len(),
        "systems initialized"
    );
    for failure in &report.failures {
        tracing::error!(error = %failure, "initialization failure");
    }

    let mut engine = EngineLoop::new(runtime, LoopConfig::from_json_str(r#"{"debug": true}"#)?)?;
    engine.start(0.0);
    let mut timestamp = 0.0;
    for frame in 0..90 {
        // A 250 ms stall at frame 45, as when a tab regains focus.
        timestamp += if frame == 45 { 250.0 } else { 1000.0 / 60.0 };
        if let Some(report) = engine.tick(timestamp) {
            for failure in &report.failures {
                tracing::warn!(error = %failure, "frame had a task failure");
            }
        }
    }
    engine.stop();
    engine.runtime_mut().systems_mut().reset_all();

    let d = engine.diagnostics();
    tracing::info!(
        frames = d.frame_count,
        fixed_updates = d.total_fixed_updates,
        fps = d.fps,
        events = sink.events().len(),
        "run finished"
    );

    let runtime = engine.runtime();
    let order = runtime.scheduler().groups().iter().map(|g| g.name()).collect::<Vec<_>>();
    tracing::info!(groups = ?order, "scheduler groups");
    if let Some(nav) = runtime
        .world()
        .get_entities_with(&["navigation"])
        .first()
        .and_then(|e| runtime.world().get_component(*e, "navigation"))
    {
        println!("current page: {}", nav["current"]);
    }
    println!(
        "{} projects laid out, {} skills",
        runtime.world().get_entities_with(&["project", "layout"]).len(),
        runtime.world().get_entities_with(&["skill"]).len()
    );
    Ok(())
}
