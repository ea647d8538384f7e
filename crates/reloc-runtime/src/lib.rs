//! `reloc-runtime` – the relocalization trigger.
//!
//! Whenever a calibrated fiducial marker is sighted, derive where the robot
//! body must be in the world and send that pose to the localization estimator
//! as a full-state reset.
//!
//! # Modules
//!
//! - [`calibration`] – [`CalibrationTable`]: immutable marker id → surveyed
//!   world pose mapping.
//! - [`engine`] – [`RelocEngine`]: filters observations, queries the frame
//!   graph at the observation time, composes the world pose, clamps it to the
//!   ground plane, attaches the fixed covariance and emits it.
//! - [`worker`] – [`spawn_worker`]: a bounded single-consumer queue in front
//!   of the engine, so observations are handled strictly in arrival order.
//! - [`bridge`] – tasks that feed the worker and the transform buffer from the
//!   [`EventBus`][reloc_middleware::EventBus].
//! - [`telemetry`] – [`init_tracing`]: `tracing` subscriber with optional OTLP
//!   span export.

pub mod bridge;
pub mod calibration;
pub mod engine;
pub mod telemetry;
pub mod worker;

pub use bridge::{spawn_observation_pump, spawn_transform_listener};
pub use calibration::{CalibrationTable, MarkerCalibration};
pub use engine::{CovarianceModel, EngineConfig, Outcome, RelocEngine, compose_world_pose};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use worker::{ObservationQueue, WorkerStats, spawn_worker};
