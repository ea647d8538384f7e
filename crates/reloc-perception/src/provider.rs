//! Asynchronous transform lookups with a bounded wait.
//!
//! [`TransformProvider`] is the seam the relocalization engine queries.
//! [`SharedTfBuffer`] implements it on top of a [`TfBuffer`] shared between a
//! writer (the transform listener) and any number of readers.  A lookup that
//! fails only because data has not arrived yet is retried every time the
//! buffer is updated, until it succeeds or the caller's timeout elapses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reloc_types::StampedTransform;
use tokio::sync::{Notify, RwLock};
use tracing::trace;

use crate::buffer::{TfBuffer, TfError};

/// A time-indexed source of rigid transforms between named frames.
#[async_trait]
pub trait TransformProvider: Send + Sync {
    /// Return the transform mapping `source_frame` coordinates into
    /// `target_frame` at `at`, waiting at most `timeout` for the data to
    /// become available.
    async fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        at: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<StampedTransform, TfError>;
}

/// A [`TfBuffer`] behind an async lock, cheap to clone.
#[derive(Clone, Debug)]
pub struct SharedTfBuffer {
    inner: Arc<RwLock<TfBuffer>>,
    updated: Arc<Notify>,
}

impl Default for SharedTfBuffer {
    fn default() -> Self {
        Self::from_buffer(TfBuffer::default())
    }
}

impl SharedTfBuffer {
    pub fn new(cache_duration: Duration) -> Self {
        Self::from_buffer(TfBuffer::new(cache_duration))
    }

    pub fn from_buffer(buffer: TfBuffer) -> Self {
        Self {
            inner: Arc::new(RwLock::new(buffer)),
            updated: Arc::new(Notify::new()),
        }
    }

    /// Insert a transform and wake every pending lookup.
    pub async fn insert(&self, transform: &StampedTransform, is_static: bool) -> Result<(), TfError> {
        self.inner.write().await.insert(transform, is_static)?;
        self.updated.notify_waiters();
        Ok(())
    }

    /// Single non-waiting lookup against the current buffer contents.
    pub async fn try_lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        at: DateTime<Utc>,
    ) -> Result<StampedTransform, TfError> {
        self.inner
            .read()
            .await
            .lookup(target_frame, source_frame, at)
            .map(|t| t.to_stamped(target_frame, source_frame, at))
    }
}

#[async_trait]
impl TransformProvider for SharedTfBuffer {
    async fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        at: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<StampedTransform, TfError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before looking so an insert racing with the
            // lookup still wakes us.
            let notified = self.updated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let err = match self.try_lookup(target_frame, source_frame, at).await {
                Ok(t) => return Ok(t),
                Err(e) => e,
            };
            if !err.is_recoverable() {
                return Err(err);
            }
            trace!(target_frame, source_frame, error = %err, "transform not ready; waiting");
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(TfError::Timeout {
                    waited: timeout,
                    last: Box::new(err),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use reloc_types::{Quat, Vec3};

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(100, 0).unwrap()
    }

    fn marker_in_body(stamp: DateTime<Utc>) -> StampedTransform {
        StampedTransform {
            target_frame: "base_link".to_string(),
            source_frame: "marker_11".to_string(),
            stamp,
            translation: Vec3::new(1.0, 0.0, 0.0),
            rotation: Quat::identity(),
        }
    }

    #[tokio::test]
    async fn lookup_returns_immediately_when_available() {
        let tf = SharedTfBuffer::default();
        tf.insert(&marker_in_body(t0()), false).await.unwrap();

        let t = tf
            .lookup("base_link", "marker_11", t0(), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(t.target_frame, "base_link");
        assert_eq!(t.source_frame, "marker_11");
        assert_eq!(t.stamp, t0());
        assert!((t.translation.x - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn lookup_waits_for_late_data() {
        let tf = SharedTfBuffer::default();
        tf.insert(&marker_in_body(t0() - TimeDelta::seconds(1)), false)
            .await
            .unwrap();

        let writer = tf.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.insert(&marker_in_body(t0()), false).await.unwrap();
        });

        let t = tf
            .lookup("base_link", "marker_11", t0(), Duration::from_millis(500))
            .await;
        assert!(t.is_ok(), "expected late transform to resolve, got {t:?}");
    }

    #[tokio::test]
    async fn lookup_times_out_when_data_never_arrives() {
        let tf = SharedTfBuffer::default();
        let err = tf
            .lookup("base_link", "marker_11", t0(), Duration::from_millis(20))
            .await
            .unwrap_err();
        match err {
            TfError::Timeout { last, .. } => {
                assert!(matches!(*last, TfError::UnknownFrame(_)));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lookup_fails_fast_on_expired_history() {
        let tf = SharedTfBuffer::default();
        tf.insert(&marker_in_body(t0()), false).await.unwrap();
        tf.insert(&marker_in_body(t0() + TimeDelta::seconds(1)), false)
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let err = tf
            .lookup(
                "base_link",
                "marker_11",
                t0() - TimeDelta::seconds(5),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TfError::ExtrapolationPast { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
