//! Rigid-body transform math.
//!
//! [`Transform3D`] is a translation plus unit-quaternion rotation in `f64`,
//! backed by `nalgebra`.  It represents the pose of frame B relative to frame
//! A: to convert a point expressed in frame B into frame A, rotate it by
//! `rotation` then add `translation`.
//!
//! # Example
//!
//! ```rust
//! use nalgebra::{UnitQuaternion, Vector3};
//! use reloc_perception::transform::Transform3D;
//!
//! // marker sits 2 m along world +X, yawed by 90°.
//! let world_marker = Transform3D::from_euler(
//!     Vector3::new(2.0, 0.0, 0.0),
//!     0.0,
//!     0.0,
//!     std::f64::consts::FRAC_PI_2,
//! );
//! // body sits 1 m along the marker's +X axis.
//! let marker_body = Transform3D::new(Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity());
//!
//! let world_body = world_marker.compose(marker_body);
//! assert!((world_body.translation.x - 2.0).abs() < 1e-9);
//! assert!((world_body.translation.y - 1.0).abs() < 1e-9);
//! ```

use chrono::{DateTime, Utc};
use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};
use reloc_types::{Quat, StampedTransform, Vec3};
use thiserror::Error;

/// Largest deviation from unit norm accepted for an incoming quaternion
/// before it is renormalised.
pub const UNIT_NORM_TOLERANCE: f64 = 1e-3;

/// Reasons a wire transform cannot be turned into a rigid transform.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("non-finite {0}")]
    NonFinite(&'static str),

    #[error("quaternion norm {0} is not unit")]
    NonUnitQuaternion(f64),
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

impl Transform3D {
    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }

    /// Build a transform from a translation and a fixed-axis roll/pitch/yaw
    /// triple, i.e. `R = Rz(yaw) · Ry(pitch) · Rx(roll)`.
    pub fn from_euler(translation: Vector3<f64>, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self::new(translation, UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    /// Validate and convert a wire translation/rotation pair.
    ///
    /// The quaternion is renormalised when its norm is within
    /// [`UNIT_NORM_TOLERANCE`] of 1 and rejected otherwise.
    pub fn from_wire(translation: &Vec3, rotation: &Quat) -> Result<Self, GeometryError> {
        if !translation.is_finite() {
            return Err(GeometryError::NonFinite("translation"));
        }
        let q = Quaternion::new(rotation.w, rotation.x, rotation.y, rotation.z);
        if !q.coords.iter().all(|c| c.is_finite()) {
            return Err(GeometryError::NonFinite("rotation"));
        }
        let norm = q.norm();
        if (norm - 1.0).abs() > UNIT_NORM_TOLERANCE {
            return Err(GeometryError::NonUnitQuaternion(norm));
        }
        Ok(Self::new(
            Vector3::new(translation.x, translation.y, translation.z),
            UnitQuaternion::from_quaternion(q),
        ))
    }

    pub fn from_stamped(transform: &StampedTransform) -> Result<Self, GeometryError> {
        Self::from_wire(&transform.translation, &transform.rotation)
    }

    /// Compose two transforms: `self` applied first, then `other`.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        Self::new(
            self.translation + self.rotation * other.translation,
            self.rotation * other.rotation,
        )
    }

    /// If `self` = T_A_B, returns T_B_A.
    pub fn inverse(self) -> Self {
        let rotation = self.rotation.inverse();
        Self::new(-(rotation * self.translation), rotation)
    }

    /// Interpolate towards `other`: linear on translation, slerp on rotation.
    ///
    /// `ratio` is 0 at `self` and 1 at `other`.
    pub fn interpolate(self, other: Self, ratio: f64) -> Self {
        let translation = self.translation.lerp(&other.translation, ratio);
        let rotation = self
            .rotation
            .try_slerp(&other.rotation, ratio, f64::EPSILON)
            .unwrap_or(if ratio < 0.5 { self.rotation } else { other.rotation });
        Self::new(translation, rotation)
    }

    pub fn is_finite(&self) -> bool {
        self.translation.iter().all(|c| c.is_finite())
            && self.rotation.coords.iter().all(|c| c.is_finite())
    }

    pub fn to_isometry(self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation), self.rotation)
    }

    pub fn translation_wire(&self) -> Vec3 {
        Vec3::new(self.translation.x, self.translation.y, self.translation.z)
    }

    pub fn rotation_wire(&self) -> Quat {
        let q = self.rotation.quaternion();
        Quat::new(q.w, q.i, q.j, q.k)
    }

    /// Stamp this transform as `source_frame` → `target_frame` at `stamp`.
    pub fn to_stamped(
        self,
        target_frame: &str,
        source_frame: &str,
        stamp: DateTime<Utc>,
    ) -> StampedTransform {
        StampedTransform {
            target_frame: target_frame.to_string(),
            source_frame: source_frame.to_string(),
            stamp,
            translation: self.translation_wire(),
            rotation: self.rotation_wire(),
        }
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<Isometry3<f64>> for Transform3D {
    fn from(iso: Isometry3<f64>) -> Self {
        Self::new(iso.translation.vector, iso.rotation)
    }
}
