//! The pose-correction emission boundary.
//!
//! The relocalization engine hands every [`CorrectedPose`] to a [`PoseSink`]
//! and moves on; it never waits for the estimator to acknowledge the reset.
//!
//! - [`BusPoseSink`] publishes corrections on [`Topic::PoseCorrections`] and,
//!   optionally, mirrors each one as a frame-graph update on
//!   [`Topic::Transforms`].
//! - [`MemorySink`] keeps every correction in memory; handy for embedding the
//!   engine in a host that polls, and for tests.

use std::sync::{Arc, Mutex, PoisonError};

use reloc_types::{CorrectedPose, Event, EventPayload, RelocError, StampedTransform};
use tracing::debug;

use crate::bus::{EventBus, Topic};

/// Receives corrections from a single sequential caller.
pub trait PoseSink: Send + Sync {
    fn emit(&self, pose: &CorrectedPose) -> Result<(), RelocError>;
}

impl<S: PoseSink + ?Sized> PoseSink for Arc<S> {
    fn emit(&self, pose: &CorrectedPose) -> Result<(), RelocError> {
        (**self).emit(pose)
    }
}

/// Publishes corrections onto the [`EventBus`].
#[derive(Clone, Debug)]
pub struct BusPoseSink {
    bus: EventBus,
    source: String,
    correction_frame: Option<String>,
}

impl BusPoseSink {
    pub fn new(bus: EventBus, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
            correction_frame: None,
        }
    }

    /// Also publish each correction as the transform `pose.frame` →
    /// `frame` on [`Topic::Transforms`].
    pub fn with_correction_frame(mut self, frame: impl Into<String>) -> Self {
        self.correction_frame = Some(frame.into());
        self
    }
}

impl PoseSink for BusPoseSink {
    fn emit(&self, pose: &CorrectedPose) -> Result<(), RelocError> {
        if let Some(child) = &self.correction_frame {
            let transform = StampedTransform {
                target_frame: pose.frame.clone(),
                source_frame: child.clone(),
                stamp: pose.timestamp,
                translation: pose.position,
                rotation: pose.orientation,
            };
            let update = Event::new(
                self.source.clone(),
                EventPayload::TransformUpdate {
                    transform,
                    is_static: false,
                },
            );
            if let Err(e) = self.bus.publish_to(Topic::Transforms, update) {
                debug!(error = %e, frame = %child, "correction transform not delivered");
            }
        }

        let event = Event::new(self.source.clone(), EventPayload::PoseCorrection(pose.clone()));
        self.bus.publish_to(Topic::PoseCorrections, event).map(|_| ())
    }
}

/// Collects corrections in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    poses: Mutex<Vec<CorrectedPose>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every correction received so far.
    pub fn poses(&self) -> Vec<CorrectedPose> {
        self.poses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.poses.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PoseSink for MemorySink {
    fn emit(&self, pose: &CorrectedPose) -> Result<(), RelocError> {
        self.poses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pose.clone());
        Ok(())
    }
}
