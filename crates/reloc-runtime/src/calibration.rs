//! [`CalibrationTable`] – where every landmark marker sits in the world.
//!
//! Built once at startup from three parallel lists (ids, translations,
//! orientations) and read-only afterwards, so it can be shared behind an
//! `Arc` by any number of readers.

use std::collections::HashMap;

use nalgebra::Vector3;
use reloc_perception::Transform3D;
use reloc_types::{MarkerId, RelocError};

/// The surveyed world pose of one marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerCalibration {
    pub marker_id: MarkerId,
    /// `(x, y, z)` in metres, world frame.
    pub world_translation: [f64; 3],
    /// Fixed-axis `(roll, pitch, yaw)` in radians.
    pub world_orientation: [f64; 3],
}

impl MarkerCalibration {
    /// T_world_marker.
    pub fn world_pose(&self) -> Transform3D {
        let [x, y, z] = self.world_translation;
        let [roll, pitch, yaw] = self.world_orientation;
        Transform3D::from_euler(Vector3::new(x, y, z), roll, pitch, yaw)
    }
}

/// Immutable marker id → [`MarkerCalibration`] mapping.
#[derive(Debug, Clone, Default)]
pub struct CalibrationTable {
    /// Entries in configuration order.
    entries: Vec<MarkerCalibration>,
    index: HashMap<MarkerId, usize>,
}

impl CalibrationTable {
    /// Pair `ids[i]` with `translations[i]` and `orientations[i]`.
    ///
    /// # Errors
    ///
    /// [`RelocError::MalformedCalibration`] when the lists differ in length,
    /// an id repeats, or any component is NaN/infinite.
    pub fn from_lists(
        ids: &[MarkerId],
        translations: &[[f64; 3]],
        orientations: &[[f64; 3]],
    ) -> Result<Self, RelocError> {
        if ids.len() != translations.len() || ids.len() != orientations.len() {
            return Err(RelocError::MalformedCalibration(format!(
                "{} marker ids but {} world poses and {} world orientations",
                ids.len(),
                translations.len(),
                orientations.len()
            )));
        }

        let mut table = Self::default();
        for ((&marker_id, &translation), &orientation) in
            ids.iter().zip(translations).zip(orientations)
        {
            table.insert(MarkerCalibration {
                marker_id,
                world_translation: translation,
                world_orientation: orientation,
            })?;
        }
        Ok(table)
    }

    fn insert(&mut self, calibration: MarkerCalibration) -> Result<(), RelocError> {
        let id = calibration.marker_id;
        if self.index.contains_key(&id) {
            return Err(RelocError::MalformedCalibration(format!(
                "marker id {id} is listed more than once"
            )));
        }
        let finite = calibration
            .world_translation
            .iter()
            .chain(&calibration.world_orientation)
            .all(|v| v.is_finite());
        if !finite {
            return Err(RelocError::MalformedCalibration(format!(
                "marker {id} has a non-finite pose component"
            )));
        }
        self.index.insert(id, self.entries.len());
        self.entries.push(calibration);
        Ok(())
    }

    pub fn lookup(&self, marker_id: MarkerId) -> Option<&MarkerCalibration> {
        self.index.get(&marker_id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, marker_id: MarkerId) -> bool {
        self.index.contains_key(&marker_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in the order they were configured.
    pub fn iter(&self) -> impl Iterator<Item = &MarkerCalibration> {
        self.entries.iter()
    }
}
