//! Batch helper: register a run of exposures and fit device circles.

use fpmeter_core::FvcFpTransform;
use fpmeter_register::{
    measure_circles, CircleParams, CircleReport, DeviceCircle, FiducialIdentifier, Metrology,
    RegisterParams, SpotRegistrar, SpotTable,
};

/// Register every exposure in place, then aggregate per-device circles.
///
/// Each exposure refits the session transform from its own fiducials, so
/// frame-to-frame camera drift does not leak into the accumulated
/// traces. Registration failures are per-exposure skips, never batch
/// aborts; the aggregation runs on whatever registered successfully.
pub fn register_and_measure(
    exposures: &mut [SpotTable],
    metrology: &Metrology,
    initial_transform: FvcFpTransform,
    identifier: Option<&dyn FiducialIdentifier>,
    register_params: RegisterParams,
    circle_params: &CircleParams,
) -> (Vec<DeviceCircle>, CircleReport) {
    let mut registrar = SpotRegistrar::new(metrology, initial_transform, register_params);
    for (i, spots) in exposures.iter_mut().enumerate() {
        let report = registrar.register(spots, identifier);
        log::debug!(
            "exposure {i}: {} matched, {} rejected",
            report.n_matched,
            report.n_rejected
        );
    }
    measure_circles(exposures, circle_params)
}
