use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use fpmeter_core::{match_nearest, FitFlags, FvcFpTransform};

use crate::metrology::Metrology;
use crate::spots::SpotTable;

/// Collaborator seam: pinhole identification against the fiducial pattern.
///
/// Implementations pre-populate `location` and `pinhole_id` for spots they
/// recognize as fiducial pinholes, and may fill `*_metro` positions. The
/// heuristics live outside this crate; the registrar only requires the
/// contract.
pub trait FiducialIdentifier {
    fn identify(
        &self,
        spots: &mut SpotTable,
        transform: &FvcFpTransform,
        metrology: &Metrology,
        max_pinhole_separation_mm: f64,
    );
}

/// Registration settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RegisterParams {
    /// Reject catalog matches farther than this, mm.
    pub max_match_distance_mm: f64,
    /// Passed through to the fiducial identifier, mm.
    pub max_pinhole_separation_mm: f64,
    /// Fit the polynomial distortion correction during the refit.
    pub fit_poly: bool,
    pub fixed_scale: bool,
    pub fixed_rotation: bool,
}

impl Default for RegisterParams {
    fn default() -> Self {
        Self {
            max_match_distance_mm: 7.0,
            max_pinhole_separation_mm: 1.5,
            fit_poly: true,
            fixed_scale: false,
            fixed_rotation: false,
        }
    }
}

/// Per-exposure registration diagnostics.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegisterReport {
    /// Fiducial-matched pairs used for the transform refit.
    pub n_fiducial: usize,
    /// Spots newly matched to the catalog this pass.
    pub n_matched: usize,
    /// Spots whose nearest catalog entry failed the distance gate.
    pub n_rejected: usize,
    /// Refit residual, mm; `None` when the refit was skipped.
    pub fit_rms: Option<f64>,
}

/// Registers one exposure's detections against the metrology catalog.
///
/// Owns the transform for its calibration session; concurrent exposures
/// must each own an independent registrar (or a clone of a fitted one).
pub struct SpotRegistrar<'a> {
    metrology: &'a Metrology,
    transform: FvcFpTransform,
    params: RegisterParams,
}

impl<'a> SpotRegistrar<'a> {
    pub fn new(metrology: &'a Metrology, transform: FvcFpTransform, params: RegisterParams) -> Self {
        Self {
            metrology,
            transform,
            params,
        }
    }

    /// Current transform (refit by each [`SpotRegistrar::register`] pass).
    pub fn transform(&self) -> &FvcFpTransform {
        &self.transform
    }

    pub fn params(&self) -> &RegisterParams {
        &self.params
    }

    /// Register one exposure in place.
    ///
    /// Order: identify fiducial pinholes, refit the transform on them,
    /// project every spot to focal-plane mm, match the still-unmatched
    /// spots to the catalog under the distance gate, copy expected
    /// positions and identities onto the new matches, then let measured
    /// metrology positions override catalog-derived expectations.
    ///
    /// Spots failing the gate stay unmatched; that is not an error.
    pub fn register(
        &mut self,
        spots: &mut SpotTable,
        identifier: Option<&dyn FiducialIdentifier>,
    ) -> RegisterReport {
        let mut report = RegisterReport::default();

        if let Some(identifier) = identifier {
            identifier.identify(
                spots,
                &self.transform,
                self.metrology,
                self.params.max_pinhole_separation_mm,
            );
        }

        self.refit(spots, &mut report);
        self.project(spots);
        self.match_to_catalog(spots, &mut report);
        Self::prefer_metro_positions(spots);

        log::info!(
            "registered exposure: {} fiducial pairs, {} new matches, {} gate-rejected, rms {:?} mm",
            report.n_fiducial,
            report.n_matched,
            report.n_rejected,
            report.fit_rms,
        );
        report
    }

    /// Refit the transform on identified pinholes. Too few pairs is a
    /// local skip, not a batch error: the previous fit keeps serving.
    fn refit(&mut self, spots: &SpotTable, report: &mut RegisterReport) {
        let mut pix = Vec::new();
        let mut mm = Vec::new();
        for i in 0..spots.len() {
            if spots.location[i] < 0 {
                continue;
            }
            let target = if spots.x_fp_metro[i] != 0.0 || spots.y_fp_metro[i] != 0.0 {
                Point2::new(spots.x_fp_metro[i], spots.y_fp_metro[i])
            } else if let Some(entry) = self
                .metrology
                .get(spots.location[i], spots.pinhole_id[i])
            {
                Point2::new(entry.x_fp, entry.y_fp)
            } else {
                continue;
            };
            pix.push(Point2::new(spots.x_pix[i], spots.y_pix[i]));
            mm.push(target);
        }
        report.n_fiducial = pix.len();

        let flags = FitFlags {
            fixed_scale: self.params.fixed_scale,
            fixed_rotation: self.params.fixed_rotation,
            fit_poly: self.params.fit_poly,
        };
        match self.transform.fit(&pix, &mm, flags) {
            Ok(fit) => report.fit_rms = Some(fit.rms),
            Err(err) => {
                log::warn!("transform refit skipped: {err}");
                // A first exposure with sparse pinholes can still carry the
                // poly fit requirement; retry the linear part alone.
                if flags.fit_poly {
                    if let Ok(fit) = self.transform.fit(
                        &pix,
                        &mm,
                        FitFlags {
                            fit_poly: false,
                            ..flags
                        },
                    ) {
                        report.fit_rms = Some(fit.rms);
                    }
                }
            }
        }
    }

    fn project(&self, spots: &mut SpotTable) {
        for i in 0..spots.len() {
            let p = self
                .transform
                .apply(Point2::new(spots.x_pix[i], spots.y_pix[i]));
            spots.x_fp[i] = p.x;
            spots.y_fp[i] = p.y;
        }
    }

    fn match_to_catalog(&self, spots: &mut SpotTable, report: &mut RegisterReport) {
        let unmatched = spots.unmatched_indices();
        if unmatched.is_empty() {
            return;
        }

        let sources: Vec<Point2<f64>> = unmatched
            .iter()
            .map(|&i| Point2::new(spots.x_fp[i], spots.y_fp[i]))
            .collect();
        let targets = self.metrology.positions();
        let matches = match_nearest(&sources, &targets);

        for (&i, m) in unmatched.iter().zip(&matches) {
            let Some(m) = m else {
                report.n_rejected += 1;
                continue;
            };
            if m.distance >= self.params.max_match_distance_mm {
                report.n_rejected += 1;
                continue;
            }
            let entry = &self.metrology.entries()[m.target];
            spots.x_fp_exp[i] = entry.x_fp;
            spots.y_fp_exp[i] = entry.y_fp;
            spots.petal_loc[i] = entry.petal_loc;
            spots.device_loc[i] = entry.device_loc;
            spots.location[i] = entry.location;
            report.n_matched += 1;
        }
    }

    /// Measured metrology positions beat catalog-match-derived ones,
    /// per axis, wherever they are set.
    fn prefer_metro_positions(spots: &mut SpotTable) {
        for i in 0..spots.len() {
            if spots.x_fp_metro[i] != 0.0 {
                spots.x_fp_exp[i] = spots.x_fp_metro[i];
            }
            if spots.y_fp_metro[i] != 0.0 {
                spots.y_fp_exp[i] = spots.y_fp_metro[i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrology::MetrologyRow;
    use crate::spots::RawSpot;
    use approx::assert_relative_eq;

    /// Square grid of positioners plus one fiducial with three pinholes.
    fn test_metrology() -> Metrology {
        let mut rows = Vec::new();
        for petal in 0..2 {
            for device in 0..12 {
                rows.push(MetrologyRow {
                    petal_loc: petal,
                    device_loc: device,
                    location: None,
                    pinhole_id: 0,
                    x_fp: -60.0 + device as f64 * 10.0,
                    y_fp: -30.0 + petal as f64 * 60.0,
                });
            }
        }
        for pinhole in 1..=3u8 {
            rows.push(MetrologyRow {
                petal_loc: 0,
                device_loc: 541,
                location: None,
                pinhole_id: pinhole,
                x_fp: 100.0 + pinhole as f64 * 0.6,
                y_fp: 100.0,
            });
        }
        Metrology::from_rows(&rows).unwrap()
    }

    /// Ground-truth camera model used to synthesize pixels.
    fn truth() -> FvcFpTransform {
        let mut t = FvcFpTransform::default();
        // Fit the truth to a slight rotation + offset so tests exercise a
        // non-trivial model without reaching into private fields.
        let pix: Vec<Point2<f64>> = (0..16)
            .map(|k| Point2::new(500.0 + (k % 4) as f64 * 1500.0, 500.0 + (k / 4) as f64 * 1500.0))
            .collect();
        let mm: Vec<Point2<f64>> = pix
            .iter()
            .map(|p| {
                let u = (p.x - 3000.0) / 3000.0;
                let v = (p.y - 3000.0) / 3000.0;
                let (s, c) = 0.05f64.sin_cos();
                Point2::new(410.0 * (c * u - s * v) + 2.0, 410.0 * (s * u + c * v) - 1.0)
            })
            .collect();
        t.fit(&pix, &mm, FitFlags::default()).unwrap();
        t
    }

    /// Marks the three pinhole spots (known to sit at the end of the
    /// table in these tests) the way the external identifier would.
    struct TestIdentifier;

    impl FiducialIdentifier for TestIdentifier {
        fn identify(
            &self,
            spots: &mut SpotTable,
            _transform: &FvcFpTransform,
            metrology: &Metrology,
            _max_pinhole_separation_mm: f64,
        ) {
            let n = spots.len();
            for (slot, pinhole) in (n - 3..n).zip(1..=3u8) {
                let entry = metrology.get(541, pinhole).unwrap();
                spots.location[slot] = entry.location;
                spots.pinhole_id[slot] = pinhole;
                spots.x_fp_metro[slot] = entry.x_fp;
                spots.y_fp_metro[slot] = entry.y_fp;
            }
        }
    }

    fn spots_for(metro: &Metrology, truth: &FvcFpTransform, extra: &[(f64, f64)]) -> SpotTable {
        let mut raw = Vec::new();
        for entry in metro.entries() {
            if entry.pinhole_id > 0 {
                continue;
            }
            let pix = truth.invert(Point2::new(entry.x_fp + 0.05, entry.y_fp - 0.02));
            raw.push(RawSpot {
                x_pix: pix.x,
                y_pix: pix.y,
                flux: 5000.0,
            });
        }
        for &(x, y) in extra {
            let pix = truth.invert(Point2::new(x, y));
            raw.push(RawSpot {
                x_pix: pix.x,
                y_pix: pix.y,
                flux: 3000.0,
            });
        }
        // Pinhole spots last, where TestIdentifier expects them.
        for pinhole in 1..=3u8 {
            let entry = metro.get(541, pinhole).unwrap();
            let pix = truth.invert(Point2::new(entry.x_fp, entry.y_fp));
            raw.push(RawSpot {
                x_pix: pix.x,
                y_pix: pix.y,
                flux: 8000.0,
            });
        }
        SpotTable::from_detections(&raw)
    }

    #[test]
    fn registers_positioners_within_gate() {
        let metro = test_metrology();
        let truth = truth();
        let mut spots = spots_for(&metro, &truth, &[]);

        let mut registrar =
            SpotRegistrar::new(&metro, FvcFpTransform::default(), RegisterParams::default());
        let report = registrar.register(&mut spots, Some(&TestIdentifier));

        assert_eq!(report.n_fiducial, 3);
        assert_eq!(report.n_matched, 24);
        assert_eq!(report.n_rejected, 0);

        // Every positioner spot carries its catalog identity and position.
        for i in 0..24 {
            assert!(spots.location[i] >= 0);
            let entry = metro.get(spots.location[i], 0).unwrap();
            assert_relative_eq!(spots.x_fp_exp[i], entry.x_fp, epsilon = 1e-9);
            assert_relative_eq!(spots.y_fp_exp[i], entry.y_fp, epsilon = 1e-9);
            assert_relative_eq!(spots.x_fp[i], entry.x_fp + 0.05, epsilon = 0.05);
        }
    }

    #[test]
    fn far_spots_stay_unmatched() {
        let metro = test_metrology();
        let truth = truth();
        // A cosmic-ray-like detection 40 mm from anything.
        let mut spots = spots_for(&metro, &truth, &[(-60.0, -70.0)]);

        let mut registrar =
            SpotRegistrar::new(&metro, FvcFpTransform::default(), RegisterParams::default());
        let report = registrar.register(&mut spots, Some(&TestIdentifier));

        assert_eq!(report.n_rejected, 1);
        let stray = 24; // first extra row
        assert_eq!(spots.location[stray], -1);
        assert_eq!(spots.x_fp_exp[stray], 0.0);
    }

    #[test]
    fn metro_positions_override_expected() {
        let metro = test_metrology();
        let truth = truth();
        let mut spots = spots_for(&metro, &truth, &[]);

        let mut registrar =
            SpotRegistrar::new(&metro, FvcFpTransform::default(), RegisterParams::default());
        registrar.register(&mut spots, Some(&TestIdentifier));

        // Pinhole rows had *_metro set by the identifier; expected fields
        // must equal those, not a catalog match.
        let n = spots.len();
        for (slot, pinhole) in (n - 3..n).zip(1..=3u8) {
            let entry = metro.get(541, pinhole).unwrap();
            assert_eq!(spots.x_fp_exp[slot], entry.x_fp);
            assert_eq!(spots.y_fp_exp[slot], entry.y_fp);
        }
    }

    #[test]
    fn no_identifier_still_projects_and_matches() {
        let metro = test_metrology();
        let truth = truth();
        let mut spots = spots_for(&metro, &truth, &[]);

        // Seed the registrar with the already-good transform; without an
        // identifier there are no pairs, so the refit is skipped.
        let mut registrar = SpotRegistrar::new(&metro, truth.clone(), RegisterParams::default());
        let report = registrar.register(&mut spots, None);

        assert_eq!(report.n_fiducial, 0);
        assert!(report.fit_rms.is_none());
        assert!(report.n_matched > 0);
    }
}
