//! Fixed-timestep engine loop with a variable-timestep render pass.
//!
//! The [`EngineLoop`] drives a [`Runtime`] forward. Each [`tick`](EngineLoop::tick):
//!
//! 1. Measures the time since the previous tick (a clock running backwards
//!    counts as zero) and caps it at `max_frame_delta_ms`.
//! 2. Adds the capped delta to an accumulator and runs fixed-phase updates,
//!    each `fixed_time_step_ms` long, while the accumulator holds a full step
//!    and fewer than `max_updates_per_frame` have run this frame. Leftover
//!    time stays in the accumulator for the next frame.
//! 3. Runs exactly one variable-phase update with the real, uncapped delta.
//!
//! Fixed updates always receive the same `dt`, so logic advanced through
//! them is independent of the display's frame rate.
//!
//! # Example
//!
//! ```
//! use folio_engine::prelude::*;
//!
//! let config = LoopConfig { fixed_time_step_ms: 10.0, ..Default::default() };
//! let mut engine = EngineLoop::new(Runtime::default(), config).unwrap();
//!
//! engine.start(0.0);
//! let frame = engine.tick(25.0).unwrap();
//! assert_eq!(frame.fixed_updates, 2);
//! assert_eq!(engine.accumulator_ms(), 5.0);
//! ```

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::events::{self, EventBus};
use crate::runtime::Runtime;
use crate::EngineError;

// ---------------------------------------------------------------------------
// LoopConfig
// ---------------------------------------------------------------------------

/// Timing configuration for the engine loop. All durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Length of one fixed update. Must be positive and finite.
    pub fixed_time_step_ms: f64,
    /// Frame deltas longer than this are clamped before accumulation.
    pub max_frame_delta_ms: f64,
    /// Ceiling on fixed updates in a single frame.
    pub max_updates_per_frame: u32,
    /// Log per-frame diagnostics at debug level.
    pub debug: bool,
}

impl Default for LoopConfig {
    /// 60 Hz fixed step, 100 ms delta cap, at most 5 catch-up updates.
    fn default() -> Self {
        Self {
            fixed_time_step_ms: 1000.0 / 60.0,
            max_frame_delta_ms: 100.0,
            max_updates_per_frame: 5,
            debug: false,
        }
    }
}

impl LoopConfig {
    /// Parse from JSON; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidConfig(format!("loop config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.fixed_time_step_ms > 0.0 && self.fixed_time_step_ms.is_finite()) {
            return Err(EngineError::InvalidConfig(format!(
                "fixed_time_step_ms must be positive and finite, got {}",
                self.fixed_time_step_ms
            )));
        }
        if !(self.max_frame_delta_ms > 0.0 && self.max_frame_delta_ms.is_finite()) {
            return Err(EngineError::InvalidConfig(format!(
                "max_frame_delta_ms must be positive and finite, got {}",
                self.max_frame_delta_ms
            )));
        }
        if self.max_updates_per_frame == 0 {
            return Err(EngineError::InvalidConfig(
                "max_updates_per_frame must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// The fixed step in seconds, as passed to fixed updates.
    pub fn fixed_dt(&self) -> f64 {
        self.fixed_time_step_ms / 1000.0
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct FrameReport {
    /// Real time since the previous tick, before capping.
    pub delta_ms: f64,
    pub fixed_updates: u32,
    /// Accumulator left after the fixed updates.
    pub accumulator_ms: f64,
    /// Interpolation factor between the last two fixed states.
    pub alpha: f64,
    /// Task failures from every update in this frame.
    pub failures: Vec<EngineError>,
}

/// Running loop statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopDiagnostics {
    pub fixed_updates_this_frame: u32,
    pub accumulator_ms: f64,
    pub alpha: f64,
    pub frame_count: u64,
    pub total_fixed_updates: u64,
    /// Exponentially smoothed frames per second.
    pub fps: f64,
}

const FPS_SMOOTHING: f64 = 0.1;

/// Tolerance for float drift when comparing the accumulator to the step.
const STEP_EPSILON_MS: f64 = 1e-6;

// ---------------------------------------------------------------------------
// EngineLoop
// ---------------------------------------------------------------------------

/// Accumulator-based loop driving a [`Runtime`].
///
/// The loop is single-threaded. The host calls [`tick`](Self::tick) from its
/// frame callback, or uses [`run_frames`](Self::run_frames) as a
/// fixed-interval fallback.
#[derive(Debug)]
pub struct EngineLoop {
    runtime: Runtime,
    config: LoopConfig,
    events: EventBus,
    running: bool,
    last_timestamp_ms: Option<f64>,
    accumulator_ms: f64,
    diagnostics: LoopDiagnostics,
    /// Origin for `run_frames` timestamps.
    clock: Instant,
}

impl EngineLoop {
    /// Create a stopped loop. Fails if `config` does not validate.
    pub fn new(runtime: Runtime, config: LoopConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let events = runtime.events().clone();
        Ok(Self {
            runtime,
            config,
            events,
            running: false,
            last_timestamp_ms: None,
            accumulator_ms: 0.0,
            diagnostics: LoopDiagnostics::default(),
            clock: Instant::now(),
        })
    }

    /// Start ticking from `now_ms`. Returns `false` if already running.
    pub fn start(&mut self, now_ms: f64) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        self.last_timestamp_ms = Some(now_ms);
        self.accumulator_ms = 0.0;
        tracing::debug!(now_ms, "engine loop started");
        self.events.emit(events::LOOP_STARTED, json!({ "timestamp": now_ms }));
        true
    }

    /// Stop ticking. Returns `false` if already stopped.
    pub fn stop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        tracing::debug!(frames = self.diagnostics.frame_count, "engine loop stopped");
        self.events.emit(
            events::LOOP_STOPPED,
            json!({ "frames": self.diagnostics.frame_count }),
        );
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Advance the loop to `timestamp_ms`.
    ///
    /// Returns `None` when the loop is stopped or the timestamp is not finite.
    pub fn tick(&mut self, timestamp_ms: f64) -> Option<FrameReport> {
        if !self.running {
            return None;
        }
        if !timestamp_ms.is_finite() {
            tracing::warn!(timestamp_ms, "ignoring non-finite frame timestamp");
            return None;
        }

        let last = self.last_timestamp_ms.replace(timestamp_ms).unwrap_or(timestamp_ms);
        let delta_ms = (timestamp_ms - last).max(0.0);
        self.accumulator_ms += delta_ms.min(self.config.max_frame_delta_ms);

        let step_ms = self.config.fixed_time_step_ms;
        let fixed_dt = self.config.fixed_dt();
        let mut report = FrameReport {
            delta_ms,
            ..FrameReport::default()
        };

        while self.accumulator_ms + STEP_EPSILON_MS >= step_ms
            && report.fixed_updates < self.config.max_updates_per_frame
        {
            let exec = self.runtime.fixed_update(fixed_dt);
            report.failures.extend(exec.failures);
            self.accumulator_ms -= step_ms;
            if self.accumulator_ms < STEP_EPSILON_MS {
                self.accumulator_ms = 0.0;
            }
            report.fixed_updates += 1;
            self.events.emit(
                events::LOOP_FIXED_UPDATE,
                json!({ "dt": fixed_dt, "update": report.fixed_updates }),
            );
        }

        let alpha = self.accumulator_ms / step_ms;
        let variable_dt = delta_ms / 1000.0;
        let exec = self.runtime.variable_update(variable_dt);
        report.failures.extend(exec.failures);
        self.events.emit(
            events::LOOP_VARIABLE_UPDATE,
            json!({ "dt": variable_dt, "alpha": alpha }),
        );

        report.accumulator_ms = self.accumulator_ms;
        report.alpha = alpha;
        self.record(&report);
        Some(report)
    }

    /// Timer fallback: tick `count` times, sleeping `interval` before each.
    ///
    /// Starts the loop if needed. Returns the number of frames ticked.
    pub fn run_frames(&mut self, count: u64, interval: Duration) -> u64 {
        if !self.running {
            self.start(self.now_ms());
        }
        let mut ticked = 0;
        for _ in 0..count {
            thread::sleep(interval);
            if self.tick(self.now_ms()).is_none() {
                break;
            }
            ticked += 1;
        }
        ticked
    }

    fn now_ms(&self) -> f64 {
        self.clock.elapsed().as_secs_f64() * 1000.0
    }

    fn record(&mut self, frame: &FrameReport) {
        let d = &mut self.diagnostics;
        d.frame_count += 1;
        d.fixed_updates_this_frame = frame.fixed_updates;
        d.total_fixed_updates += u64::from(frame.fixed_updates);
        d.accumulator_ms = frame.accumulator_ms;
        d.alpha = frame.alpha;
        if frame.delta_ms > 0.0 {
            let instant_fps = 1000.0 / frame.delta_ms;
            d.fps = if d.fps == 0.0 {
                instant_fps
            } else {
                d.fps + (instant_fps - d.fps) * FPS_SMOOTHING
            };
        }

        if self.config.debug {
            tracing::debug!(
                frame = d.frame_count,
                delta_ms = frame.delta_ms,
                fixed_updates = frame.fixed_updates,
                accumulator_ms = d.accumulator_ms,
                alpha = d.alpha,
                fps = d.fps,
                failures = frame.failures.len(),
                "frame"
            );
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn set_debug_mode(&mut self, debug: bool) {
        self.config.debug = debug;
    }

    pub fn debug_mode(&self) -> bool {
        self.config.debug
    }

    pub fn accumulator_ms(&self) -> f64 {
        self.accumulator_ms
    }

    /// Interpolation factor for rendering between fixed states.
    pub fn alpha(&self) -> f64 {
        self.accumulator_ms / self.config.fixed_time_step_ms
    }

    pub fn diagnostics(&self) -> &LoopDiagnostics {
        &self.diagnostics
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    pub fn into_runtime(self) -> Runtime {
        self.runtime
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    use folio_ecs::world::World;

    use crate::events::RecordingSink;
    use crate::scheduler::Phase;
    use crate::task::TaskSpec;

    /// A runtime with one fixed and one variable task, each recording its dt.
    fn recording_runtime(fixed: &Rc<RefCell<Vec<f64>>>, variable: &Rc<RefCell<Vec<f64>>>) -> Runtime {
        let mut runtime = Runtime::default();
        let scheduler = runtime.scheduler_mut();
        scheduler.create_group_in_phase("render", 10, Phase::Variable);
        let f = Rc::clone(fixed);
        scheduler
            .add_task(TaskSpec::new("logic", move |_, dt| {
                f.borrow_mut().push(dt);
                Ok(())
            }))
            .unwrap();
        let v = Rc::clone(variable);
        scheduler
            .add_task(
                TaskSpec::new("draw", move |_, dt| {
                    v.borrow_mut().push(dt);
                    Ok(())
                })
                .group("render"),
            )
            .unwrap();
        runtime
    }

    fn config(step: f64) -> LoopConfig {
        LoopConfig {
            fixed_time_step_ms: step,
            ..LoopConfig::default()
        }
    }

    #[test]
    fn default_config_values() {
        let config = LoopConfig::default();
        assert!((config.fixed_time_step_ms - 1000.0 / 60.0).abs() < 1e-12);
        assert_eq!(config.max_frame_delta_ms, 100.0);
        assert_eq!(config.max_updates_per_frame, 5);
        assert!(!config.debug);
    }

    #[test]
    fn one_fixed_update_per_step() {
        let fixed = Rc::default();
        let variable = Rc::default();
        let mut engine = EngineLoop::new(recording_runtime(&fixed, &variable), config(10.0)).unwrap();
        engine.start(0.0);
        for frame in 1..=20 {
            let report = engine.tick(frame as f64 * 10.0).unwrap();
            assert_eq!(report.fixed_updates, 1);
        }
        assert_eq!(fixed.borrow().len(), 20);
        assert!(fixed.borrow().iter().all(|dt| (*dt - 0.01).abs() < 1e-12));
        assert_eq!(variable.borrow().len(), 20);
        assert_eq!(engine.diagnostics().total_fixed_updates, 20);
        assert_eq!(engine.accumulator_ms(), 0.0);
    }

    #[test]
    fn default_step_gives_one_update_per_step_sized_frame() {
        let fixed = Rc::default();
        let variable = Rc::default();
        let mut engine =
            EngineLoop::new(recording_runtime(&fixed, &variable), LoopConfig::default()).unwrap();
        let step = engine.config().fixed_time_step_ms;

        // Timestamps computed from the frame index.
        engine.start(0.0);
        for frame in 1..=600 {
            let report = engine.tick(frame as f64 * step).unwrap();
            assert_eq!(report.fixed_updates, 1, "frame {frame}");
        }

        // Timestamps accumulated frame by frame, as a browser clock drifts.
        engine.stop();
        engine.start(0.0);
        let mut now = 0.0;
        for frame in 1..=600 {
            now += step;
            let report = engine.tick(now).unwrap();
            assert_eq!(report.fixed_updates, 1, "frame {frame}");
            assert!(report.accumulator_ms < 1e-6);
        }
        assert_eq!(fixed.borrow().len(), 1200);
    }

    #[test]
    fn huge_jump_is_capped_and_leftover_kept() {
        let fixed = Rc::default();
        let variable = Rc::default();
        let config = LoopConfig {
            fixed_time_step_ms: 10.0,
            max_frame_delta_ms: 1000.0,
            max_updates_per_frame: 4,
            debug: false,
        };
        let mut engine = EngineLoop::new(recording_runtime(&fixed, &variable), config).unwrap();
        engine.start(0.0);
        let report = engine.tick(100.0).unwrap();
        assert_eq!(report.fixed_updates, 4);
        assert_eq!(engine.accumulator_ms(), 60.0);
        assert_eq!(report.alpha, 6.0);

        // The backlog drains on following frames.
        let report = engine.tick(100.0).unwrap();
        assert_eq!(report.fixed_updates, 4);
        assert_eq!(engine.accumulator_ms(), 20.0);
    }

    #[test]
    fn delta_cap_applies_to_accumulator_not_variable_dt() {
        let fixed = Rc::default();
        let variable: Rc<RefCell<Vec<f64>>> = Rc::default();
        let mut engine = EngineLoop::new(recording_runtime(&fixed, &variable), config(10.0)).unwrap();
        engine.start(0.0);
        let report = engine.tick(5_000.0).unwrap();
        assert_eq!(report.delta_ms, 5_000.0);
        // 100 ms cap, 5 updates max.
        assert_eq!(report.fixed_updates, 5);
        assert_eq!(engine.accumulator_ms(), 50.0);
        assert_eq!(*variable.borrow(), vec![5.0]);
    }

    #[test]
    fn clock_going_backwards_counts_as_zero() {
        let fixed: Rc<RefCell<Vec<f64>>> = Rc::default();
        let variable: Rc<RefCell<Vec<f64>>> = Rc::default();
        let mut engine = EngineLoop::new(recording_runtime(&fixed, &variable), config(10.0)).unwrap();
        engine.start(1_000.0);
        let report = engine.tick(900.0).unwrap();
        assert_eq!(report.delta_ms, 0.0);
        assert_eq!(report.fixed_updates, 0);
        assert_eq!(*variable.borrow(), vec![0.0]);

        // Time resumes from the new, earlier timestamp.
        let report = engine.tick(910.0).unwrap();
        assert_eq!(report.fixed_updates, 1);
    }

    #[test]
    fn leftover_time_carries_between_frames() {
        let fixed: Rc<RefCell<Vec<f64>>> = Rc::default();
        let variable = Rc::default();
        let mut engine = EngineLoop::new(recording_runtime(&fixed, &variable), config(10.0)).unwrap();
        engine.start(0.0);
        assert_eq!(engine.tick(6.0).unwrap().fixed_updates, 0);
        assert_eq!(engine.alpha(), 0.6);
        assert_eq!(engine.tick(12.0).unwrap().fixed_updates, 1);
        assert_eq!(engine.accumulator_ms(), 2.0);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut engine = EngineLoop::new(Runtime::default(), LoopConfig::default()).unwrap();
        assert!(engine.tick(16.0).is_none());
        assert!(engine.start(0.0));
        assert!(!engine.start(5.0));
        assert!(engine.is_running());
        assert!(engine.tick(16.0).is_some());
        assert!(engine.stop());
        assert!(!engine.stop());
        assert!(engine.tick(32.0).is_none());
        assert_eq!(engine.diagnostics().frame_count, 1);
    }

    #[test]
    fn restart_resets_accumulator() {
        let mut engine = EngineLoop::new(Runtime::default(), config(10.0)).unwrap();
        engine.start(0.0);
        engine.tick(7.0);
        assert_eq!(engine.accumulator_ms(), 7.0);
        engine.stop();
        engine.start(500.0);
        assert_eq!(engine.accumulator_ms(), 0.0);
        assert_eq!(engine.tick(510.0).unwrap().fixed_updates, 1);
    }

    #[test]
    fn non_finite_timestamp_is_ignored() {
        let mut engine = EngineLoop::new(Runtime::default(), config(10.0)).unwrap();
        engine.start(0.0);
        assert!(engine.tick(f64::NAN).is_none());
        assert_eq!(engine.tick(10.0).unwrap().fixed_updates, 1);
    }

    #[test]
    fn fps_estimate_tracks_frame_rate() {
        let mut engine = EngineLoop::new(Runtime::default(), config(10.0)).unwrap();
        engine.start(0.0);
        for frame in 1..=50 {
            engine.tick(frame as f64 * 20.0);
        }
        assert!((engine.diagnostics().fps - 50.0).abs() < 1e-6);
    }

    #[test]
    fn task_failures_surface_in_frame_report() {
        let mut runtime = Runtime::default();
        runtime
            .scheduler_mut()
            .add_task(TaskSpec::new("flaky", |_, _| anyhow::bail!("lost context")))
            .unwrap();
        let mut engine = EngineLoop::new(runtime, config(10.0)).unwrap();
        engine.start(0.0);
        let report = engine.tick(20.0).unwrap();
        assert_eq!(report.fixed_updates, 2);
        assert_eq!(report.failures.len(), 2);
        assert!(engine.tick(30.0).is_some());
    }

    #[test]
    fn loop_events_are_emitted() {
        let sink = Arc::new(RecordingSink::new());
        let runtime = Runtime::with_events(World::new(), EventBus::with_sink(sink.clone()));
        let mut engine = EngineLoop::new(runtime, config(10.0)).unwrap();
        engine.start(0.0);
        engine.tick(20.0);
        engine.stop();

        assert_eq!(
            sink.names(),
            vec![
                events::LOOP_STARTED,
                events::LOOP_FIXED_UPDATE,
                events::LOOP_FIXED_UPDATE,
                events::LOOP_VARIABLE_UPDATE,
                events::LOOP_STOPPED,
            ]
        );
        let recorded = sink.events();
        assert_eq!(recorded[2].payload["update"], json!(2));
        assert_eq!(recorded[3].payload["alpha"], json!(0.0));
    }

    #[test]
    fn run_frames_ticks_with_monotonic_clock() {
        let mut engine = EngineLoop::new(Runtime::default(), LoopConfig::default()).unwrap();
        let frames = engine.run_frames(3, Duration::from_millis(1));
        assert_eq!(frames, 3);
        assert_eq!(engine.diagnostics().frame_count, 3);
        assert!(engine.is_running());
    }

    #[test]
    fn debug_mode_toggles() {
        let mut engine = EngineLoop::new(Runtime::default(), LoopConfig::default()).unwrap();
        assert!(!engine.debug_mode());
        engine.set_debug_mode(true);
        assert!(engine.debug_mode());
        engine.start(0.0);
        assert!(engine.tick(16.0).is_some());
    }

    #[test]
    fn config_validation() {
        assert!(EngineLoop::new(Runtime::default(), config(0.0)).is_err());
        assert!(EngineLoop::new(Runtime::default(), config(f64::INFINITY)).is_err());
        let bad = LoopConfig {
            max_updates_per_frame: 0,
            ..LoopConfig::default()
        };
        assert!(bad.validate().is_err());

        let parsed = LoopConfig::from_json_str(r#"{"fixed_time_step_ms": 20, "debug": true}"#).unwrap();
        assert_eq!(parsed.fixed_time_step_ms, 20.0);
        assert!(parsed.debug);
        assert_eq!(parsed.max_updates_per_frame, 5);
        assert!(LoopConfig::from_json_str(r#"{"max_frame_delta_ms": -1}"#).is_err());
    }
}
