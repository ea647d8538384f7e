use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Identifier printed on a fiducial marker (e.g. an ArUco dictionary index).
pub type MarkerId = u32;

/// A 3-D vector on the wire (metres for translations).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A rotation quaternion on the wire, `(w, x, y, z)` convention.
///
/// Nothing guarantees unit norm here; consumers validate before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quat {
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::identity()
    }
}

/// A single detection delivered by the marker detection subsystem.
///
/// The detector's own estimate of the marker orientation is deliberately not
/// part of this record; the frame graph is the only geometric input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerObservation {
    pub marker_id: MarkerId,
    /// Frame the detector reported the marker in.
    pub frame_id: String,
    /// Sensor time of the detection.
    pub timestamp: DateTime<Utc>,
}

/// A rigid transform valid at `stamp`.
///
/// Maps coordinates expressed in `source_frame` into `target_frame`;
/// equivalently, the pose of `source_frame` as seen from `target_frame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedTransform {
    pub target_frame: String,
    pub source_frame: String,
    pub stamp: DateTime<Utc>,
    pub translation: Vec3,
    pub rotation: Quat,
}

/// Row-major 6×6 pose covariance over `(x, y, z, roll, pitch, yaw)`.
///
/// Serialized as a flat array of 36 floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Covariance6(pub [f64; 36]);

impl Covariance6 {
    /// Diagonal covariance with `linear` on the three position entries and
    /// `angular` on the three rotation entries.
    pub fn diagonal(linear: f64, angular: f64) -> Self {
        let mut m = [0.0; 36];
        for i in 0..3 {
            m[i * 7] = linear;
            m[(i + 3) * 7] = angular;
        }
        Self(m)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.0[row * 6 + col]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn is_diagonal(&self) -> bool {
        (0..6).all(|r| (0..6).all(|c| r == c || self.get(r, c) == 0.0))
    }
}

impl Serialize for Covariance6 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for Covariance6 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<f64>::deserialize(deserializer)?;
        let len = entries.len();
        <[f64; 36]>::try_from(entries)
            .map(Self)
            .map_err(|_| D::Error::invalid_length(len, &"36 covariance entries"))
    }
}

/// A relocalization command for the external pose estimator.
///
/// The estimator treats every record as an authoritative full-state reset,
/// so re-applying the same record is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedPose {
    /// Timestamp of the observation that produced this correction.
    pub timestamp: DateTime<Utc>,
    /// Frame the pose is expressed in (the world frame).
    pub frame: String,
    /// Body position; `z` is always exactly `0.0`.
    pub position: Vec3,
    pub orientation: Quat,
    pub covariance: Covariance6,
}

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "reloc-runtime::engine"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh event stamped with the current wall-clock time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    MarkerObserved(MarkerObservation),
    TransformUpdate {
        transform: StampedTransform,
        /// Static transforms are valid at every time.
        is_static: bool,
    },
    PoseCorrection(CorrectedPose),
}

/// Error taxonomy shared across the relocalization crates.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelocError {
    #[error("Unknown marker id {0}")]
    UnknownMarker(MarkerId),

    #[error("Transform {source_frame} -> {target_frame} unavailable: {reason}")]
    TransformUnavailable {
        source_frame: String,
        target_frame: String,
        reason: String,
    },

    #[error("Malformed calibration: {0}")]
    MalformedCalibration(String),

    #[error("Degenerate composition: {0}")]
    CompositionDegenerate(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Observation queue is full")]
    QueueFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    #[test]
    fn diagonal_covariance_layout() {
        let cov = Covariance6::diagonal(1e-6, 2e-6);
        assert!(cov.is_diagonal());
        for i in 0..3 {
            assert_eq!(cov.get(i, i), 1e-6);
            assert_eq!(cov.get(i + 3, i + 3), 2e-6);
        }
        assert_eq!(cov.as_slice().iter().filter(|v| **v != 0.0).count(), 6);
    }

    #[test]
    fn covariance_serializes_as_flat_array() {
        let cov = Covariance6::diagonal(1.0, 2.0);
        let json = serde_json::to_value(cov).unwrap();
        let arr = json.as_array().expect("array");
        assert_eq!(arr.len(), 36);
        assert_eq!(arr[0].as_f64(), Some(1.0));
        assert_eq!(arr[35].as_f64(), Some(2.0));
    }

    #[test]
    fn covariance_rejects_wrong_length() {
        let short = serde_json::to_string(&vec![0.0_f64; 35]).unwrap();
        let err = serde_json::from_str::<Covariance6>(&short).unwrap_err();
        assert!(err.to_string().contains("36"));
    }

    #[test]
    fn corrected_pose_roundtrip() {
        let pose = CorrectedPose {
            timestamp: stamp(100),
            frame: "world".to_string(),
            position: Vec3::new(-2.615, 0.0, 0.0),
            orientation: Quat::identity(),
            covariance: Covariance6::diagonal(1e-6, 1e-6),
        };
        let json = serde_json::to_string(&pose).unwrap();
        let back: CorrectedPose = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pose);
    }

    #[test]
    fn event_wraps_marker_observation() {
        let event = Event::new(
            "reloc-cli::replay",
            EventPayload::MarkerObserved(MarkerObservation {
                marker_id: 11,
                frame_id: "marker_11".to_string(),
                timestamp: stamp(100),
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        match back.payload {
            EventPayload::MarkerObserved(obs) => assert_eq!(obs.marker_id, 11),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn reloc_error_display() {
        let err = RelocError::TransformUnavailable {
            source_frame: "marker_11".to_string(),
            target_frame: "base_link".to_string(),
            reason: "timed out".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("marker_11"));
        assert!(msg.contains("timed out"));
        assert!(RelocError::UnknownMarker(7).to_string().contains('7'));
    }
}
