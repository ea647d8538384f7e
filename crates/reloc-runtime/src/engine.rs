//! [`RelocEngine`] – turns a marker sighting into a pose correction.
//!
//! For each observation:
//!
//! 1. **Filter** – markers without a calibration entry are not landmarks and
//!    are discarded without an error.
//! 2. **Resolve** – the marker-local frame is derived from the id
//!    (`marker_frame_prefix` + id).
//! 3. **Query** – ask the [`TransformProvider`] for marker → body at the
//!    observation time, waiting at most `transform_timeout`.
//! 4. **Compose** – `T_world_body = T_world_marker · (T_body_marker)⁻¹`.
//! 5. **Clamp** – the robot lives on the ground plane, so `z` is forced to 0.
//! 6. **Covariance** – fixed diagonal from the [`CovarianceModel`].
//! 7. **Emit** – hand the [`CorrectedPose`] to the [`PoseSink`] and move on.
//!
//! Every failure is contained to the observation that caused it; see
//! [`Outcome`].

use std::sync::Arc;
use std::time::Duration;

use reloc_middleware::PoseSink;
use reloc_perception::{Transform3D, TransformProvider};
use reloc_types::{CorrectedPose, Covariance6, MarkerId, MarkerObservation, RelocError, Vec3};
use tracing::{debug, info, instrument, warn};

use crate::calibration::{CalibrationTable, MarkerCalibration};

pub const DEFAULT_VARIANCE: f64 = 1e-6;
pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_WORLD_FRAME: &str = "world";
pub const DEFAULT_BODY_FRAME: &str = "base_link";
pub const DEFAULT_MARKER_FRAME_PREFIX: &str = "marker_";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Uniform, uncorrelated uncertainty attached to every correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CovarianceModel {
    linear_variance: f64,
    angular_variance: f64,
}

impl CovarianceModel {
    /// # Errors
    ///
    /// [`RelocError::MalformedCalibration`] unless both variances are finite
    /// and strictly positive.
    pub fn new(linear_variance: f64, angular_variance: f64) -> Result<Self, RelocError> {
        for (name, value) in [("linear", linear_variance), ("angular", angular_variance)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(RelocError::MalformedCalibration(format!(
                    "{name} variance must be positive, got {value}"
                )));
            }
        }
        Ok(Self {
            linear_variance,
            angular_variance,
        })
    }

    pub fn linear_variance(&self) -> f64 {
        self.linear_variance
    }

    pub fn angular_variance(&self) -> f64 {
        self.angular_variance
    }

    pub fn matrix(&self) -> Covariance6 {
        Covariance6::diagonal(self.linear_variance, self.angular_variance)
    }
}

impl Default for CovarianceModel {
    fn default() -> Self {
        Self {
            linear_variance: DEFAULT_VARIANCE,
            angular_variance: DEFAULT_VARIANCE,
        }
    }
}

/// Everything the engine needs, built once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub calibration: Arc<CalibrationTable>,
    pub covariance: CovarianceModel,
    /// Longest wait for the transform provider per observation.
    pub transform_timeout: Duration,
    /// Frame corrections are expressed in.
    pub world_frame: String,
    /// Robot body frame whose pose is corrected.
    pub body_frame: String,
    pub marker_frame_prefix: String,
}

impl EngineConfig {
    /// Configuration with default frames, variances and timeout.
    pub fn new(calibration: CalibrationTable) -> Self {
        Self {
            calibration: Arc::new(calibration),
            covariance: CovarianceModel::default(),
            transform_timeout: DEFAULT_TRANSFORM_TIMEOUT,
            world_frame: DEFAULT_WORLD_FRAME.to_string(),
            body_frame: DEFAULT_BODY_FRAME.to_string(),
            marker_frame_prefix: DEFAULT_MARKER_FRAME_PREFIX.to_string(),
        }
    }

    /// Canonical local frame of `marker_id`.
    pub fn marker_frame(&self, marker_id: MarkerId) -> String {
        format!("{}{}", self.marker_frame_prefix, marker_id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// What happened to one observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A correction was handed to the sink.
    Emitted(CorrectedPose),
    /// The marker is not a calibrated landmark.
    Discarded { marker_id: MarkerId },
    /// Processing failed; nothing was emitted.
    Dropped(RelocError),
}

/// Stateless relocalization logic over an immutable [`EngineConfig`].
pub struct RelocEngine<P, S> {
    config: EngineConfig,
    provider: P,
    sink: S,
}

impl<P: TransformProvider, S: PoseSink> RelocEngine<P, S> {
    pub fn new(config: EngineConfig, provider: P, sink: S) -> Self {
        Self {
            config,
            provider,
            sink,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process one observation to completion.  Never fails: errors are logged
    /// and reported through the returned [`Outcome`].
    #[instrument(
        name = "relocalize",
        skip(self, observation),
        fields(marker_id = observation.marker_id, stamp = %observation.timestamp)
    )]
    pub async fn on_marker_observed(&self, observation: MarkerObservation) -> Outcome {
        match self.correct(&observation).await {
            Ok(pose) => {
                match self.sink.emit(&pose) {
                    Ok(()) => info!(
                        x = pose.position.x,
                        y = pose.position.y,
                        frame = %pose.frame,
                        "relocalization correction emitted"
                    ),
                    Err(e) => warn!(error = %e, "correction not delivered to sink"),
                }
                Outcome::Emitted(pose)
            }
            Err(RelocError::UnknownMarker(marker_id)) => {
                debug!("marker is not a relocalization landmark; discarding");
                Outcome::Discarded { marker_id }
            }
            Err(e) => {
                warn!(error = %e, "observation dropped");
                Outcome::Dropped(e)
            }
        }
    }

    /// Compute the correction for `observation` without emitting it.
    pub async fn correct(&self, observation: &MarkerObservation) -> Result<CorrectedPose, RelocError> {
        let calibration = self
            .config
            .calibration
            .lookup(observation.marker_id)
            .ok_or(RelocError::UnknownMarker(observation.marker_id))?;

        let marker_frame = self.config.marker_frame(observation.marker_id);
        if observation.frame_id != marker_frame {
            debug!(
                reported = %observation.frame_id,
                derived = %marker_frame,
                "detector frame differs from derived marker frame; using derived"
            );
        }

        let stamped = self
            .provider
            .lookup(
                &self.config.body_frame,
                &marker_frame,
                observation.timestamp,
                self.config.transform_timeout,
            )
            .await
            .map_err(|e| RelocError::TransformUnavailable {
                source_frame: marker_frame.clone(),
                target_frame: self.config.body_frame.clone(),
                reason: e.to_string(),
            })?;
        let marker_to_body = Transform3D::from_stamped(&stamped).map_err(|e| {
            RelocError::CompositionDegenerate(format!("{marker_frame} -> {}: {e}", self.config.body_frame))
        })?;

        let world_body = compose_world_pose(calibration, &marker_to_body)?;

        Ok(CorrectedPose {
            timestamp: observation.timestamp,
            frame: self.config.world_frame.clone(),
            position: Vec3::new(world_body.translation.x, world_body.translation.y, 0.0),
            orientation: world_body.rotation_wire(),
            covariance: self.config.covariance.matrix(),
        })
    }
}

/// `T_world_body = T_world_marker · (T_body_marker)⁻¹`.
///
/// `marker_to_body` maps marker-frame coordinates into the body frame.
pub fn compose_world_pose(
    calibration: &MarkerCalibration,
    marker_to_body: &Transform3D,
) -> Result<Transform3D, RelocError> {
    let world_body = calibration.world_pose().compose(marker_to_body.inverse());
    if !world_body.is_finite() {
        return Err(RelocError::CompositionDegenerate(format!(
            "non-finite world pose from marker {}",
            calibration.marker_id
        )));
    }
    Ok(world_body)
}
