use serde::{Deserialize, Serialize};

/// One raw detection from the spot extractor.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RawSpot {
    pub x_pix: f64,
    pub y_pix: f64,
    pub flux: f64,
}

/// Detection table for one exposure, struct-of-vectors.
///
/// All columns exist for every row from construction on: derived columns
/// are materialized zero-filled (`location` defaults to −1) and populated
/// by registration in place, never added on demand. Row count is fixed at
/// construction; all columns always share it.
///
/// `location` is −1 for an unmatched row or `petal*1000 + device` for a
/// matched one. `pinhole_id` is 0 for a positioner center dot, ≥ 1 for a
/// fiducial pinhole. `*_metro` fields are only nonzero when a dedicated
/// metrology match supplied them; they take precedence over the
/// catalog-match-derived `*_exp` fields.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpotTable {
    pub x_pix: Vec<f64>,
    pub y_pix: Vec<f64>,
    pub flux: Vec<f64>,
    pub x_fp: Vec<f64>,
    pub y_fp: Vec<f64>,
    pub x_fp_exp: Vec<f64>,
    pub y_fp_exp: Vec<f64>,
    pub x_fp_metro: Vec<f64>,
    pub y_fp_metro: Vec<f64>,
    pub location: Vec<i64>,
    pub petal_loc: Vec<i32>,
    pub device_loc: Vec<i32>,
    pub pinhole_id: Vec<u8>,
}

impl SpotTable {
    /// Build a table from raw detections, zero-filling derived columns.
    pub fn from_detections(spots: &[RawSpot]) -> Self {
        let n = spots.len();
        Self {
            x_pix: spots.iter().map(|s| s.x_pix).collect(),
            y_pix: spots.iter().map(|s| s.y_pix).collect(),
            flux: spots.iter().map(|s| s.flux).collect(),
            x_fp: vec![0.0; n],
            y_fp: vec![0.0; n],
            x_fp_exp: vec![0.0; n],
            y_fp_exp: vec![0.0; n],
            x_fp_metro: vec![0.0; n],
            y_fp_metro: vec![0.0; n],
            location: vec![-1; n],
            petal_loc: vec![0; n],
            device_loc: vec![0; n],
            pinhole_id: vec![0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.x_pix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x_pix.is_empty()
    }

    /// Row indices still unmatched after fiducial identification.
    pub fn unmatched_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.location[i] == -1).collect()
    }
}
