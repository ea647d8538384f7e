//! `reloc-perception` – spatial reasoning for relocalization.
//!
//! # Modules
//!
//! - [`transform`] – [`Transform3D`][transform::Transform3D]: `f64` rigid-body
//!   transforms (composition, inversion, interpolation, Euler conversion) on
//!   top of `nalgebra`.
//! - [`buffer`] – [`TfBuffer`][buffer::TfBuffer]: a tree of named frames with
//!   bounded per-edge history, answering "where was frame A relative to frame
//!   B at time t".
//! - [`provider`] – [`TransformProvider`][provider::TransformProvider]: the
//!   async lookup seam, and [`SharedTfBuffer`][provider::SharedTfBuffer], a
//!   shared buffer whose lookups wait for late data up to a timeout.

pub mod buffer;
pub mod provider;
pub mod transform;

pub use buffer::{TfBuffer, TfError};
pub use provider::{SharedTfBuffer, TransformProvider};
pub use transform::{GeometryError, Transform3D};
