//! JSON-lines replay: one [`InputRecord`] per line.
//!
//! ```text
//! {"kind":"transform","target_frame":"base_link","source_frame":"marker_11","stamp":"2024-05-01T12:00:00Z","translation":{"x":0.0,"y":0.0,"z":0.0},"rotation":{"w":1.0,"x":0.0,"y":0.0,"z":0.0},"is_static":false}
//! {"kind":"marker","marker_id":11,"frame_id":"marker_11","timestamp":"2024-05-01T12:00:00Z"}
//! ```

use reloc_perception::SharedTfBuffer;
use reloc_runtime::ObservationQueue;
use reloc_types::{MarkerObservation, StampedTransform};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InputRecord {
    Transform {
        #[serde(flatten)]
        transform: StampedTransform,
        #[serde(default)]
        is_static: bool,
    },
    Marker(MarkerObservation),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub transforms: u64,
    pub markers: u64,
    pub skipped: u64,
}

/// Feed `reader` into the transform buffer and the observation queue until
/// EOF or until `shutdown` flips to `true`.
///
/// Lines that do not parse, transforms the buffer rejects, and blank lines are
/// skipped.  Stops early if the worker behind `queue` has gone away.
pub async fn replay<R>(
    reader: R,
    buffer: &SharedTfBuffer,
    queue: &ObservationQueue,
    mut shutdown: watch::Receiver<bool>,
) -> ReplayStats
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = ReplayStats::default();
    let mut watching = true;
    let mut line_no = 0u64;

    loop {
        let line = tokio::select! {
            biased;
            changed = shutdown.changed(), if watching => {
                match changed {
                    Ok(()) if *shutdown.borrow() => {
                        info!(line_no, "shutdown requested; replay stopped");
                        break;
                    }
                    Ok(()) => {}
                    // Sender gone: nobody can ask us to stop any more.
                    Err(_) => watching = false,
                }
                continue;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(line_no, "end of input");
                break;
            }
            Err(e) => {
                warn!(error = %e, line_no, "input read failed; replay stopped");
                break;
            }
        };
        line_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<InputRecord>(trimmed) {
            Ok(InputRecord::Transform { transform, is_static }) => {
                match buffer.insert(&transform, is_static).await {
                    Ok(()) => stats.transforms += 1,
                    Err(e) => {
                        warn!(error = %e, line_no, "transform rejected");
                        stats.skipped += 1;
                    }
                }
            }
            Ok(InputRecord::Marker(observation)) => {
                if let Err(e) = queue.submit(observation).await {
                    warn!(error = %e, line_no, "observation not queued; replay stopped");
                    break;
                }
                stats.markers += 1;
            }
            Err(e) => {
                warn!(error = %e, line_no, "malformed input line skipped");
                stats.skipped += 1;
            }
        }
    }
    stats
}
