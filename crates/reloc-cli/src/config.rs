//! `relocd` configuration – reads `~/.reloc/config.toml`.

use reloc_runtime::engine::{
    CovarianceModel, DEFAULT_BODY_FRAME, DEFAULT_MARKER_FRAME_PREFIX, DEFAULT_VARIANCE, DEFAULT_WORLD_FRAME,
};
use reloc_runtime::worker::DEFAULT_QUEUE_CAPACITY;
use reloc_runtime::{CalibrationTable, EngineConfig};
use reloc_types::{MarkerId, RelocError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything `relocd` needs at startup.
///
/// The three calibration lists are parallel: entry *i* of each belongs to
/// `marker_ids[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_world_frame")]
    pub world_frame: String,

    #[serde(default = "default_body_frame")]
    pub body_frame: String,

    #[serde(default = "default_marker_frame_prefix")]
    pub marker_frame_prefix: String,

    pub marker_ids: Vec<MarkerId>,
    /// `[x, y, z]` in metres.
    pub marker_world_pose: Vec<[f64; 3]>,
    /// `[roll, pitch, yaw]` in radians.
    pub marker_world_orientation: Vec<[f64; 3]>,

    #[serde(default = "default_variance")]
    pub linear_variance: f64,

    #[serde(default = "default_variance")]
    pub angular_variance: f64,

    /// Seconds.
    #[serde(default = "default_transform_timeout")]
    pub transform_timeout: f64,

    /// Seconds of transform history kept per frame edge.
    #[serde(default = "default_tf_cache_duration")]
    pub tf_cache_duration: f64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// When set, every correction is also broadcast as a
    /// `world_frame → correction_frame` transform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction_frame: Option<String>,
}

fn default_world_frame() -> String {
    DEFAULT_WORLD_FRAME.to_string()
}
fn default_body_frame() -> String {
    DEFAULT_BODY_FRAME.to_string()
}
fn default_marker_frame_prefix() -> String {
    DEFAULT_MARKER_FRAME_PREFIX.to_string()
}
fn default_variance() -> f64 {
    DEFAULT_VARIANCE
}
fn default_transform_timeout() -> f64 {
    0.5
}
fn default_tf_cache_duration() -> f64 {
    10.0
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Config {
    /// Validate and turn the file representation into an [`EngineConfig`].
    ///
    /// Any inconsistency is a [`RelocError::MalformedCalibration`]; the daemon
    /// must not start on one.
    pub fn engine_config(&self) -> Result<EngineConfig, RelocError> {
        let table = CalibrationTable::from_lists(
            &self.marker_ids,
            &self.marker_world_pose,
            &self.marker_world_orientation,
        )?;
        let covariance = CovarianceModel::new(self.linear_variance, self.angular_variance)?;
        let transform_timeout = positive_seconds("transform_timeout", self.transform_timeout)?;

        let mut engine = EngineConfig::new(table);
        engine.covariance = covariance;
        engine.transform_timeout = transform_timeout;
        engine.world_frame = self.world_frame.clone();
        engine.body_frame = self.body_frame.clone();
        engine.marker_frame_prefix = self.marker_frame_prefix.clone();
        Ok(engine)
    }

    pub fn tf_cache_duration(&self) -> Result<Duration, RelocError> {
        positive_seconds("tf_cache_duration", self.tf_cache_duration)
    }
}

fn positive_seconds(key: &str, secs: f64) -> Result<Duration, RelocError> {
    let invalid = || {
        RelocError::MalformedCalibration(format!("{key} must be a positive number of seconds, got {secs}"))
    };
    if !(secs.is_finite() && secs > 0.0) {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}

/// Return the path to `~/.reloc/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".reloc").join("config.toml")
}

/// Read and parse `path`, then apply `RELOC_*` overrides.
///
/// Unlike an interactive tool there is no sensible default calibration, so a
/// missing file is an error.
pub fn load_from(path: &Path) -> Result<Config, RelocError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| RelocError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg = parse(&raw)
        .map_err(|e| RelocError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

pub(crate) fn parse(raw: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(raw)
}

/// Apply `RELOC_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RELOC_WORLD_FRAME` | `world_frame` |
/// | `RELOC_BODY_FRAME` | `body_frame` |
/// | `RELOC_TRANSFORM_TIMEOUT` | `transform_timeout` |
/// | `RELOC_LINEAR_VARIANCE` | `linear_variance` |
/// | `RELOC_ANGULAR_VARIANCE` | `angular_variance` |
///
/// Numeric values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("RELOC_WORLD_FRAME") {
        cfg.world_frame = v;
    }
    if let Ok(v) = std::env::var("RELOC_BODY_FRAME") {
        cfg.body_frame = v;
    }
    if let Ok(v) = std::env::var("RELOC_TRANSFORM_TIMEOUT")
        && let Ok(secs) = v.parse::<f64>()
    {
        cfg.transform_timeout = secs;
    }
    if let Ok(v) = std::env::var("RELOC_LINEAR_VARIANCE")
        && let Ok(var) = v.parse::<f64>()
    {
        cfg.linear_variance = var;
    }
    if let Ok(v) = std::env::var("RELOC_ANGULAR_VARIANCE")
        && let Ok(var) = v.parse::<f64>()
    {
        cfg.angular_variance = var;
    }
}
