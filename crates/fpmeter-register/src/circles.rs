//! Per-device circle aggregation over many registered exposures.
//!
//! Each positioner sweeps an arc across exposures; its accumulated
//! detections are fit with a circle in the curved-focal-surface
//! parametrization to estimate the true device center. Fiducial pinholes
//! do not move; their center is the median observation.

use std::collections::BTreeMap;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use fpmeter_core::focal_surface::{curved_to_xy, xy_to_curved};
use fpmeter_core::fit_circle;

use crate::spots::SpotTable;

/// Aggregation policy knobs, defaults from the reference calibration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CircleParams {
    /// Devices with fewer accumulated observations are skipped.
    pub min_observations: usize,
    /// Positioner x-spread below this is treated as non-moving, mm.
    pub min_moving_std_mm: f64,
    /// Fitted radii below this are spurious, mm.
    pub min_radius_mm: f64,
    /// Fitted-vs-expected offsets above this are outliers, mm.
    pub max_center_offset_mm: f64,
}

impl Default for CircleParams {
    fn default() -> Self {
        Self {
            min_observations: 6,
            min_moving_std_mm: 1.0,
            min_radius_mm: 0.1,
            max_center_offset_mm: 3.0,
        }
    }
}

/// One accepted device: identity, metrology expectation, fitted center.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DeviceCircle {
    pub location: i64,
    pub pinhole_id: u8,
    pub x_fp_metro: f64,
    pub y_fp_metro: f64,
    pub x_fp: f64,
    pub y_fp: f64,
}

/// Batch diagnostics, informational only.
#[derive(Clone, Copy, Debug, Default)]
pub struct CircleReport {
    /// Accumulated positioner keys (pinhole 0), before filtering.
    pub n_positioners: usize,
    /// Accumulated fiducial keys (pinhole 1), before filtering.
    pub n_fiducials: usize,
    /// Accumulated pinhole keys (pinhole ≥ 1), before filtering.
    pub n_pinholes: usize,
    /// Median radial offset of fitted vs expected centers, µm.
    pub median_offset_um: Option<f64>,
}

#[derive(Default)]
struct Trace {
    x: Vec<f64>,
    y: Vec<f64>,
    x_exp: f64,
    y_exp: f64,
}

/// Composite aggregation key; separates a positioner's center dot from
/// each pinhole of a fiducial. The composition is load-bearing: it must
/// reproduce `location*10 + pinhole` exactly.
fn device_key(location: i64, pinhole_id: u8) -> i64 {
    location * 10 + pinhole_id as i64
}

fn accumulate(exposures: &[SpotTable]) -> BTreeMap<i64, Trace> {
    let mut traces: BTreeMap<i64, Trace> = BTreeMap::new();

    for spots in exposures {
        // A key matched twice within one exposure is ambiguous; skip its
        // contribution from this exposure.
        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        for i in 0..spots.len() {
            if spots.location[i] > 0 {
                *counts
                    .entry(device_key(spots.location[i], spots.pinhole_id[i]))
                    .or_insert(0) += 1;
            }
        }

        for i in 0..spots.len() {
            if spots.location[i] <= 0 {
                continue;
            }
            let key = device_key(spots.location[i], spots.pinhole_id[i]);
            if counts[&key] > 1 {
                log::debug!("several spots matched for device key {key}, skipping exposure entry");
                continue;
            }
            let trace = traces.entry(key).or_default();
            if trace.x.is_empty() {
                trace.x_exp = spots.x_fp_exp[i];
                trace.y_exp = spots.y_fp_exp[i];
            }
            trace.x.push(spots.x_fp[i]);
            trace.y.push(spots.y_fp[i]);
        }
    }

    traces
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Estimate per-device centers from accumulated exposures.
///
/// Policy, applied per device key in order: too few observations → skip;
/// zero-valued placeholder observations dropped; non-moving positioners
/// skipped; positioners circle-fit in the curved parametrization (with
/// degenerate fits logged and skipped, tiny radii discarded); fiducial
/// pinholes take the median position. Devices fitted far from their
/// expected position are excluded as outliers. None of these are errors;
/// the batch always completes.
pub fn measure_circles(
    exposures: &[SpotTable],
    params: &CircleParams,
) -> (Vec<DeviceCircle>, CircleReport) {
    let traces = accumulate(exposures);

    let mut report = CircleReport {
        n_positioners: traces.keys().filter(|k| *k % 10 == 0).count(),
        n_fiducials: traces.keys().filter(|k| *k % 10 == 1).count(),
        n_pinholes: traces.keys().filter(|k| *k % 10 >= 1).count(),
        median_offset_um: None,
    };
    log::info!(
        "circle aggregation: {} positioners, {} fiducials, {} pinholes",
        report.n_positioners,
        report.n_fiducials,
        report.n_pinholes
    );

    let mut candidates = Vec::new();
    for (&key, trace) in &traces {
        let location = key / 10;
        let pinhole_id = (key % 10) as u8;

        if trace.x.len() < params.min_observations {
            continue;
        }

        // Zero entries are unfilled placeholders, not measurements.
        let mut xs = Vec::with_capacity(trace.x.len());
        let mut ys = Vec::with_capacity(trace.y.len());
        for (&x, &y) in trace.x.iter().zip(&trace.y) {
            if x != 0.0 {
                xs.push(x);
                ys.push(y);
            }
        }

        if pinhole_id == 0 && std_dev(&xs) < params.min_moving_std_mm {
            // Non-moving positioner; a circle fit on a stationary cloud
            // is meaningless.
            continue;
        }

        let center = if pinhole_id == 0 {
            let warped: Vec<Point2<f64>> = xs
                .iter()
                .zip(&ys)
                .map(|(&x, &y)| xy_to_curved(Point2::new(x, y)))
                .collect();
            match fit_circle(&warped) {
                Ok(fit) => {
                    if fit.radius < params.min_radius_mm {
                        continue;
                    }
                    curved_to_xy(fit.center)
                }
                Err(err) => {
                    log::warn!("circle fit failed for location {location}: {err}");
                    continue;
                }
            }
        } else {
            Point2::new(median(&mut xs), median(&mut ys))
        };

        candidates.push(DeviceCircle {
            location,
            pinhole_id,
            x_fp_metro: trace.x_exp,
            y_fp_metro: trace.y_exp,
            x_fp: center.x,
            y_fp: center.y,
        });
    }

    let mut offsets: Vec<f64> = candidates
        .iter()
        .map(|c| (c.x_fp - c.x_fp_metro).hypot(c.y_fp - c.y_fp_metro))
        .filter(|&d| d != 0.0)
        .collect();
    if !offsets.is_empty() {
        let um = median(&mut offsets) * 1000.0;
        report.median_offset_um = Some(um);
        log::info!("median offset = {um:4.1} um");
    }

    let accepted: Vec<DeviceCircle> = candidates
        .into_iter()
        .filter(|c| {
            (c.x_fp_metro != 0.0 || c.y_fp_metro != 0.0)
                && (c.x_fp - c.x_fp_metro).hypot(c.y_fp - c.y_fp_metro)
                    < params.max_center_offset_mm
        })
        .collect();

    (accepted, report)
}

/// Mean after dropping the single smallest and largest value.
///
/// Cheap outlier trim for per-fiducial offset series; optional
/// post-processing, not part of the aggregation contract.
pub fn trimmed_mean(values: &[f64]) -> Option<f64> {
    if values.len() < 3 {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let kept = &sorted[1..sorted.len() - 1];
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}
