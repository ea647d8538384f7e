//! Time-indexed Transform Frame (TF) buffer.
//!
//! Maintains a tree of named reference frames.  Every child frame has exactly
//! one parent edge, and each edge keeps a bounded, time-ordered history of
//! [`Transform3D`] samples (or a single static sample).  Given two frame names
//! and a timestamp, [`TfBuffer::lookup`] walks both frames up to their common
//! ancestor, samples every edge on the way at the requested time, and composes
//! the result.
//!
//! # Example
//!
//! ```rust
//! use chrono::DateTime;
//! use reloc_perception::buffer::TfBuffer;
//! use reloc_types::{Quat, StampedTransform, Vec3};
//! use std::time::Duration;
//!
//! let mut tf = TfBuffer::new(Duration::from_secs(10));
//! let t0 = DateTime::from_timestamp(100, 0).unwrap();
//!
//! tf.insert(
//!     &StampedTransform {
//!         target_frame: "base_link".into(),
//!         source_frame: "camera".into(),
//!         stamp: t0,
//!         translation: Vec3::new(0.5, 0.0, 0.0),
//!         rotation: Quat::identity(),
//!     },
//!     true,
//! )
//! .unwrap();
//!
//! let t = tf.lookup("camera", "base_link", t0).unwrap();
//! assert!((t.translation.x + 0.5).abs() < 1e-9);
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reloc_types::StampedTransform;
use thiserror::Error;
use tracing::{debug, warn};

use crate::transform::{GeometryError, Transform3D};

/// History retained per edge when no explicit duration is given.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(10);

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Failures of a frame-graph lookup or update.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TfError {
    #[error("frame `{0}` does not exist")]
    UnknownFrame(String),

    #[error("frames `{source_frame}` and `{target_frame}` are not connected")]
    Disconnected {
        source_frame: String,
        target_frame: String,
    },

    #[error("lookup at {requested} predates the oldest sample ({oldest}) of frame `{frame}`")]
    ExtrapolationPast {
        frame: String,
        requested: DateTime<Utc>,
        oldest: DateTime<Utc>,
    },

    #[error("lookup at {requested} is newer than the latest sample ({latest}) of frame `{frame}`")]
    ExtrapolationFuture {
        frame: String,
        requested: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    #[error("parenting `{child}` under `{parent}` would create a loop")]
    Loop { child: String, parent: String },

    #[error("invalid transform for `{frame}`: {reason}")]
    Invalid { frame: String, reason: GeometryError },

    #[error("no transform after waiting {waited:?}: {last}")]
    Timeout { waited: Duration, last: Box<TfError> },
}

impl TfError {
    /// Whether more incoming data could still turn this failure into a
    /// successful lookup.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TfError::UnknownFrame(_) | TfError::Disconnected { .. } | TfError::ExtrapolationFuture { .. }
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Edges
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct FrameEdge {
    parent: String,
    is_static: bool,
    /// Sorted by stamp, oldest first.  Never empty.
    samples: VecDeque<(DateTime<Utc>, Transform3D)>,
}

impl FrameEdge {
    fn sample(&self, child: &str, at: DateTime<Utc>) -> Result<Transform3D, TfError> {
        let (oldest, first) = self.samples[0];
        let (latest, last) = self.samples[self.samples.len() - 1];

        if self.is_static {
            return Ok(last);
        }
        if at < oldest {
            return Err(TfError::ExtrapolationPast {
                frame: child.to_string(),
                requested: at,
                oldest,
            });
        }
        if at > latest {
            return Err(TfError::ExtrapolationFuture {
                frame: child.to_string(),
                requested: at,
                latest,
            });
        }
        if at == oldest {
            return Ok(first);
        }

        // First sample at or after `at`; `idx >= 1` because `at > oldest`.
        let idx = self.samples.partition_point(|(stamp, _)| *stamp < at);
        let (t1, after) = self.samples[idx];
        if t1 == at {
            return Ok(after);
        }
        let (t0, before) = self.samples[idx - 1];
        let ratio = seconds_between(t0, at) / seconds_between(t0, t1);
        Ok(before.interpolate(after, ratio))
    }

    fn push(&mut self, stamp: DateTime<Utc>, transform: Transform3D, cache: Duration) {
        let idx = self.samples.partition_point(|(t, _)| *t < stamp);
        match self.samples.get_mut(idx) {
            Some(slot) if slot.0 == stamp => slot.1 = transform,
            _ => self.samples.insert(idx, (stamp, transform)),
        }

        let latest = self.samples[self.samples.len() - 1].0;
        while self.samples.len() > 1 {
            let too_old = (latest - self.samples[0].0)
                .to_std()
                .map(|age| age > cache)
                .unwrap_or(false);
            if !too_old {
                break;
            }
            self.samples.pop_front();
        }
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_nanoseconds() {
        Some(ns) => ns as f64 * 1e-9,
        None => delta.num_milliseconds() as f64 * 1e-3,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfBuffer
// ────────────────────────────────────────────────────────────────────────────

/// A tree of named reference frames with per-edge transform history.
///
/// Frames are identified by arbitrary string names (e.g. `"world"`,
/// `"base_link"`, `"marker_11"`).  Edges are stored child → parent, and a
/// lookup may traverse edges in either direction.
#[derive(Debug)]
pub struct TfBuffer {
    /// `edges[child] = edge to its parent`
    edges: HashMap<String, FrameEdge>,
    cache_duration: Duration,
}

impl Default for TfBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DURATION)
    }
}

impl TfBuffer {
    /// Create an empty buffer retaining `cache_duration` of history per edge.
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            edges: HashMap::new(),
            cache_duration,
        }
    }

    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    /// Record `transform` as the pose of `source_frame` (child) relative to
    /// `target_frame` (parent) at its stamp.
    ///
    /// Re-parenting a child discards the history of its previous edge.
    pub fn insert(&mut self, transform: &StampedTransform, is_static: bool) -> Result<(), TfError> {
        let child = transform.source_frame.as_str();
        let parent = transform.target_frame.as_str();

        let sample = Transform3D::from_stamped(transform).map_err(|reason| TfError::Invalid {
            frame: child.to_string(),
            reason,
        })?;
        if child == parent || self.ancestors(parent).iter().any(|f| f == child) {
            return Err(TfError::Loop {
                child: child.to_string(),
                parent: parent.to_string(),
            });
        }

        if !is_static
            && let Some(edge) = self.edges.get_mut(child)
            && edge.parent == parent
            && !edge.is_static
        {
            edge.push(transform.stamp, sample, self.cache_duration);
            return Ok(());
        }

        if let Some(edge) = self.edges.get(child)
            && edge.parent != parent
        {
            warn!(
                child,
                old_parent = %edge.parent,
                new_parent = parent,
                "frame re-parented; dropping previous history"
            );
        }
        debug!(child, parent, is_static, "new frame edge");
        self.edges.insert(
            child.to_string(),
            FrameEdge {
                parent: parent.to_string(),
                is_static,
                samples: VecDeque::from([(transform.stamp, sample)]),
            },
        );
        Ok(())
    }

    /// Whether `frame` appears anywhere in the tree, as a child or a parent.
    pub fn has_frame(&self, frame: &str) -> bool {
        self.edges.contains_key(frame) || self.edges.values().any(|e| e.parent == frame)
    }

    /// Parent of `frame`, if it has one.
    pub fn parent_of(&self, frame: &str) -> Option<&str> {
        self.edges.get(frame).map(|e| e.parent.as_str())
    }

    /// Number of child → parent edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Compute the [`Transform3D`] that maps points in `source_frame` into
    /// `target_frame`, valid at `at`.
    pub fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        at: DateTime<Utc>,
    ) -> Result<Transform3D, TfError> {
        for frame in [target_frame, source_frame] {
            if !self.has_frame(frame) {
                return Err(TfError::UnknownFrame(frame.to_string()));
            }
        }
        if target_frame == source_frame {
            return Ok(Transform3D::identity());
        }

        let target_chain = self.ancestors(target_frame);
        let common = self
            .ancestors(source_frame)
            .into_iter()
            .find(|f| target_chain.contains(f))
            .ok_or_else(|| TfError::Disconnected {
                source_frame: source_frame.to_string(),
                target_frame: target_frame.to_string(),
            })?;

        let common_source = self.accumulate(source_frame, &common, at)?;
        let common_target = self.accumulate(target_frame, &common, at)?;
        Ok(common_target.inverse().compose(common_source))
    }

    /// `frame` followed by its parent, grandparent, … up to the root.
    fn ancestors(&self, frame: &str) -> Vec<String> {
        let mut chain = vec![frame.to_string()];
        let mut current = frame;
        while let Some(edge) = self.edges.get(current) {
            // Insertion refuses loops, so the walk is bounded by the edge count.
            if chain.len() > self.edges.len() {
                break;
            }
            chain.push(edge.parent.clone());
            current = &edge.parent;
        }
        chain
    }

    /// T_ancestor_frame at `at`, composed edge by edge.
    fn accumulate(&self, frame: &str, ancestor: &str, at: DateTime<Utc>) -> Result<Transform3D, TfError> {
        let mut acc = Transform3D::identity();
        let mut current = frame;
        while current != ancestor {
            let edge = self
                .edges
                .get(current)
                .ok_or_else(|| TfError::UnknownFrame(current.to_string()))?;
            acc = edge.sample(current, at)?.compose(acc);
            current = &edge.parent;
        }
        Ok(acc)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeDelta;
    use nalgebra::Vector3;
    use reloc_types::{Quat, Vec3};
    use std::f64::consts::FRAC_1_SQRT_2;

    fn at(secs: f64) -> DateTime<Utc> {
        DateTime::from_timestamp(0, 0).unwrap() + TimeDelta::nanoseconds((secs * 1e9) as i64)
    }

    fn tf(parent: &str, child: &str, secs: f64, x: f64, rotation: Quat) -> StampedTransform {
        StampedTransform {
            target_frame: parent.to_string(),
            source_frame: child.to_string(),
            stamp: at(secs),
            translation: Vec3::new(x, 0.0, 0.0),
            rotation,
        }
    }

    fn q90z() -> Quat {
        Quat::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2)
    }

    #[test]
    fn lookup_same_frame_returns_identity() {
        let mut buffer = TfBuffer::default();
        buffer.insert(&tf("world", "base_link", 1.0, 1.0, Quat::identity()), false).unwrap();
        let t = buffer.lookup("world", "world", at(1.0)).unwrap();
        assert_eq!(t, Transform3D::identity());
    }

    #[test]
    fn lookup_unknown_frame_fails() {
        let buffer = TfBuffer::default();
        assert_eq!(
            buffer.lookup("base_link", "ghost", at(0.0)),
            Err(TfError::UnknownFrame("base_link".to_string()))
        );
    }

    #[test]
    fn lookup_composed_chain_both_directions() {
        let mut buffer = TfBuffer::default();
        buffer.insert(&tf("odom", "base_link", 1.0, 1.0, Quat::identity()), true).unwrap();
        buffer.insert(&tf("base_link", "camera", 1.0, 0.5, Quat::identity()), true).unwrap();

        let odom_camera = buffer.lookup("odom", "camera", at(1.0)).unwrap();
        assert_relative_eq!(odom_camera.translation.x, 1.5, epsilon = 1e-12);

        let camera_odom = buffer.lookup("camera", "odom", at(1.0)).unwrap();
        assert_relative_eq!(camera_odom.translation.x, -1.5, epsilon = 1e-12);
    }

    #[test]
    fn lookup_through_common_ancestor() {
        // camera and marker both hang off base_link.
        let mut buffer = TfBuffer::default();
        buffer.insert(&tf("base_link", "camera", 1.0, 0.5, Quat::identity()), true).unwrap();
        buffer.insert(&tf("camera", "marker_11", 1.0, 2.0, q90z()), false).unwrap();
        buffer.insert(&tf("base_link", "lidar", 1.0, -0.2, Quat::identity()), true).unwrap();

        let t = buffer.lookup("lidar", "marker_11", at(1.0)).unwrap();
        assert_relative_eq!(t.translation, Vector3::new(2.7, 0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(t.rotation.angle(), std::f64::consts::FRAC_PI_2, epsilon = 1e-9);
    }

    #[test]
    fn lookup_disconnected_trees_fails() {
        let mut buffer = TfBuffer::default();
        buffer.insert(&tf("world", "odom", 1.0, 1.0, Quat::identity()), true).unwrap();
        buffer.insert(&tf("base_link", "camera", 1.0, 1.0, Quat::identity()), true).unwrap();

        let err = buffer.lookup("world", "camera", at(1.0)).unwrap_err();
        assert!(matches!(err, TfError::Disconnected { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn dynamic_edge_interpolates_between_samples() {
        let mut buffer = TfBuffer::default();
        buffer.insert(&tf("base_link", "marker_11", 1.0, 1.0, Quat::identity()), false).unwrap();
        buffer.insert(&tf("base_link", "marker_11", 2.0, 3.0, q90z()), false).unwrap();

        let t = buffer.lookup("base_link", "marker_11", at(1.5)).unwrap();
        assert_relative_eq!(t.translation.x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(t.rotation.angle(), std::f64::consts::FRAC_PI_4, epsilon = 1e-9);

        let exact = buffer.lookup("base_link", "marker_11", at(2.0)).unwrap();
        assert_relative_eq!(exact.translation.x, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn dynamic_edge_refuses_extrapolation() {
        let mut buffer = TfBuffer::default();
        buffer.insert(&tf("base_link", "marker_11", 5.0, 1.0, Quat::identity()), false).unwrap();
        buffer.insert(&tf("base_link", "marker_11", 6.0, 1.0, Quat::identity()), false).unwrap();

        let past = buffer.lookup("base_link", "marker_11", at(4.0)).unwrap_err();
        assert!(matches!(past, TfError::ExtrapolationPast { .. }));
        assert!(!past.is_recoverable());

        let future = buffer.lookup("base_link", "marker_11", at(6.5)).unwrap_err();
        assert!(matches!(future, TfError::ExtrapolationFuture { .. }));
        assert!(future.is_recoverable());
    }

    #[test]
    fn static_edge_valid_at_any_time() {
        let mut buffer = TfBuffer::default();
        buffer.insert(&tf("base_link", "camera", 1.0, 0.3, Quat::identity()), true).unwrap();
        for secs in [0.0, 1.0, 1000.0] {
            let t = buffer.lookup("base_link", "camera", at(secs)).unwrap();
            assert_relative_eq!(t.translation.x, 0.3, epsilon = 1e-12);
        }
    }

    #[test]
    fn history_is_pruned_to_cache_duration() {
        let mut buffer = TfBuffer::new(Duration::from_secs(2));
        for secs in 0..6 {
            buffer
                .insert(&tf("base_link", "marker_11", secs as f64, 1.0, Quat::identity()), false)
                .unwrap();
        }
        // Samples at 3, 4, 5 survive.
        assert!(buffer.lookup("base_link", "marker_11", at(3.0)).is_ok());
        assert!(matches!(
            buffer.lookup("base_link", "marker_11", at(2.5)),
            Err(TfError::ExtrapolationPast { .. })
        ));
    }

    #[test]
    fn out_of_order_samples_are_sorted() {
        let mut buffer = TfBuffer::default();
        buffer.insert(&tf("base_link", "marker_11", 2.0, 2.0, Quat::identity()), false).unwrap();
        buffer.insert(&tf("base_link", "marker_11", 1.0, 1.0, Quat::identity()), false).unwrap();
        let t = buffer.lookup("base_link", "marker_11", at(1.25)).unwrap();
        assert_relative_eq!(t.translation.x, 1.25, epsilon = 1e-9);
    }

    #[test]
    fn insert_rejects_loops_and_bad_rotations() {
        let mut buffer = TfBuffer::default();
        buffer.insert(&tf("world", "odom", 1.0, 0.0, Quat::identity()), true).unwrap();
        buffer.insert(&tf("odom", "base_link", 1.0, 0.0, Quat::identity()), true).unwrap();

        let looped = buffer.insert(&tf("base_link", "world", 1.0, 0.0, Quat::identity()), true);
        assert!(matches!(looped, Err(TfError::Loop { .. })));

        let selfie = buffer.insert(&tf("odom", "odom", 1.0, 0.0, Quat::identity()), true);
        assert!(matches!(selfie, Err(TfError::Loop { .. })));

        let bad = buffer.insert(&tf("odom", "camera", 1.0, 0.0, Quat::new(0.0, 0.0, 0.0, 0.0)), true);
        assert!(matches!(bad, Err(TfError::Invalid { .. })));
        assert!(!buffer.has_frame("camera"));
    }

    #[test]
    fn reparenting_replaces_edge() {
        let mut buffer = TfBuffer::default();
        buffer.insert(&tf("odom", "base_link", 1.0, 1.0, Quat::identity()), true).unwrap();
        buffer.insert(&tf("map", "base_link", 1.0, 2.0, Quat::identity()), true).unwrap();
        assert_eq!(buffer.parent_of("base_link"), Some("map"));
        assert_eq!(buffer.len(), 1);
    }
}
