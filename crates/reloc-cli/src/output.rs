//! JSON-lines output for `relocd`.
//!
//! Every correction becomes one `{"kind":"correction",...}` line.  With a
//! correction frame configured it is followed by a `{"kind":"transform",...}`
//! line in the same shape `relocd` accepts as input, so the output can be
//! replayed into another instance.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use reloc_middleware::PoseSink;
use reloc_types::{CorrectedPose, RelocError, StampedTransform};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutputRecord {
    Correction(CorrectedPose),
    Transform {
        #[serde(flatten)]
        transform: StampedTransform,
        is_static: bool,
    },
}

/// Writes each correction straight to `out`; a slow reader blocks the worker
/// instead of losing lines.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
    correction_frame: Option<String>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            correction_frame: None,
        }
    }

    /// Also write a `pose.frame → frame` transform after every correction.
    pub fn with_correction_frame(mut self, frame: impl Into<String>) -> Self {
        self.correction_frame = Some(frame.into());
        self
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn records(&self, pose: &CorrectedPose) -> Vec<OutputRecord> {
        let mut records = vec![OutputRecord::Correction(pose.clone())];
        if let Some(child) = &self.correction_frame {
            records.push(OutputRecord::Transform {
                transform: StampedTransform {
                    target_frame: pose.frame.clone(),
                    source_frame: child.clone(),
                    stamp: pose.timestamp,
                    translation: pose.position,
                    rotation: pose.orientation,
                },
                is_static: false,
            });
        }
        records
    }
}

impl<W: Write + Send> PoseSink for JsonLinesSink<W> {
    fn emit(&self, pose: &CorrectedPose) -> Result<(), RelocError> {
        let mut text = String::new();
        for record in self.records(pose) {
            let line = serde_json::to_string(&record)
                .map_err(|e| RelocError::Channel(format!("failed to encode correction: {e}")))?;
            text.push_str(&line);
            text.push('\n');
        }

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(text.as_bytes())
            .and_then(|()| out.flush())
            .map_err(|e| RelocError::Channel(format!("failed to write correction: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::InputRecord;
    use chrono::DateTime;
    use reloc_perception::SharedTfBuffer;
    use reloc_runtime::{CalibrationTable, EngineConfig, RelocEngine, spawn_worker};
    use reloc_types::{Covariance6, MarkerObservation, Quat, Vec3};
    use std::sync::Arc;

    fn pose() -> CorrectedPose {
        CorrectedPose {
            timestamp: DateTime::from_timestamp(100, 0).unwrap(),
            frame: "world".to_string(),
            position: Vec3::new(-2.615, 0.0, 0.0),
            orientation: Quat::identity(),
            covariance: Covariance6::diagonal(1e-6, 1e-6),
        }
    }

    fn lines(sink: JsonLinesSink<Vec<u8>>) -> Vec<String> {
        String::from_utf8(sink.into_inner())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn correction_is_one_line() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.emit(&pose()).unwrap();

        let lines = lines(sink);
        assert_eq!(lines.len(), 1);
        let record: OutputRecord = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(record, OutputRecord::Correction(pose()));
    }

    #[test]
    fn correction_frame_adds_replayable_transform() {
        let sink = JsonLinesSink::new(Vec::new()).with_correction_frame("relocalized");
        sink.emit(&pose()).unwrap();

        let lines = lines(sink);
        assert_eq!(lines.len(), 2);
        match serde_json::from_str::<InputRecord>(&lines[1]).unwrap() {
            InputRecord::Transform { transform, is_static } => {
                assert!(!is_static);
                assert_eq!(transform.target_frame, "world");
                assert_eq!(transform.source_frame, "relocalized");
                assert_eq!(transform.stamp, pose().timestamp);
                assert_eq!(transform.translation, pose().position);
            }
            other => panic!("expected a transform, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn burst_through_worker_prints_every_correction() {
        const BURST: usize = 300;

        let buffer = SharedTfBuffer::default();
        buffer
            .insert(
                &StampedTransform {
                    target_frame: "base_link".to_string(),
                    source_frame: "marker_11".to_string(),
                    stamp: DateTime::from_timestamp(0, 0).unwrap(),
                    translation: Vec3::new(1.0, 0.0, 0.0),
                    rotation: Quat::identity(),
                },
                true,
            )
            .await
            .unwrap();
        let table = CalibrationTable::from_lists(&[11], &[[0.0; 3]], &[[0.0; 3]]).unwrap();
        let sink = Arc::new(JsonLinesSink::new(Vec::new()).with_correction_frame("relocalized"));
        let (queue, worker) = spawn_worker(
            RelocEngine::new(EngineConfig::new(table), buffer, Arc::clone(&sink)),
            4,
        );

        for i in 0..BURST {
            queue
                .submit(MarkerObservation {
                    marker_id: 11,
                    frame_id: "marker_11".to_string(),
                    timestamp: DateTime::from_timestamp(100 + i as i64, 0).unwrap(),
                })
                .await
                .unwrap();
        }
        drop(queue);
        let stats = worker.await.unwrap();
        assert_eq!(stats.emitted, BURST as u64);

        let sink = Arc::try_unwrap(sink).ok().unwrap();
        let lines = lines(sink);
        assert_eq!(lines.len(), 2 * BURST);
        let corrections = lines
            .iter()
            .filter(|l| matches!(serde_json::from_str::<OutputRecord>(l).unwrap(), OutputRecord::Correction(_)))
            .count();
        assert_eq!(corrections, BURST);
    }
}
