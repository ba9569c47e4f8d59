use std::collections::HashMap;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Unique composite identifier for a physical device slot.
pub fn compose_location(petal_loc: i32, device_loc: i32) -> i64 {
    petal_loc as i64 * 1000 + device_loc as i64
}

/// One metrology row as loaded by the (external) catalog reader.
///
/// `location` may be absent in older catalogs; it is derived on
/// construction.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MetrologyRow {
    pub petal_loc: i32,
    pub device_loc: i32,
    #[serde(default)]
    pub location: Option<i64>,
    /// 0 = positioner center dot, ≥ 1 = fiducial pinhole.
    pub pinhole_id: u8,
    pub x_fp: f64,
    pub y_fp: f64,
}

/// One nominal device position on the focal plane.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MetrologyEntry {
    pub petal_loc: i32,
    pub device_loc: i32,
    pub location: i64,
    pub pinhole_id: u8,
    pub x_fp: f64,
    pub y_fp: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum MetrologyError {
    #[error("duplicate metrology entry for location {location} pinhole {pinhole_id}")]
    DuplicateLocation { location: i64, pinhole_id: u8 },
    #[error("location {actual} of petal {petal_loc} device {device_loc} does not match petal*1000+device")]
    InconsistentLocation {
        petal_loc: i32,
        device_loc: i32,
        actual: i64,
    },
}

/// The authoritative nominal-position catalog, loaded once and immutable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metrology {
    entries: Vec<MetrologyEntry>,
    by_key: HashMap<(i64, u8), usize>,
}

impl Metrology {
    /// Build the catalog, deriving `location` where absent and checking
    /// uniqueness per (location, pinhole).
    pub fn from_rows(rows: &[MetrologyRow]) -> Result<Self, MetrologyError> {
        let mut entries = Vec::with_capacity(rows.len());
        let mut by_key = HashMap::with_capacity(rows.len());

        for row in rows {
            let derived = compose_location(row.petal_loc, row.device_loc);
            let location = match row.location {
                Some(loc) if loc != derived => {
                    return Err(MetrologyError::InconsistentLocation {
                        petal_loc: row.petal_loc,
                        device_loc: row.device_loc,
                        actual: loc,
                    });
                }
                Some(loc) => loc,
                None => derived,
            };

            let index = entries.len();
            if by_key.insert((location, row.pinhole_id), index).is_some() {
                return Err(MetrologyError::DuplicateLocation {
                    location,
                    pinhole_id: row.pinhole_id,
                });
            }
            entries.push(MetrologyEntry {
                petal_loc: row.petal_loc,
                device_loc: row.device_loc,
                location,
                pinhole_id: row.pinhole_id,
                x_fp: row.x_fp,
                y_fp: row.y_fp,
            });
        }

        Ok(Self { entries, by_key })
    }

    pub fn entries(&self) -> &[MetrologyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, location: i64, pinhole_id: u8) -> Option<&MetrologyEntry> {
        self.by_key
            .get(&(location, pinhole_id))
            .map(|&i| &self.entries[i])
    }

    /// Nominal positions in entry order, for matching.
    pub fn positions(&self) -> Vec<Point2<f64>> {
        self.entries
            .iter()
            .map(|e| Point2::new(e.x_fp, e.y_fp))
            .collect()
    }
}
