use approx::assert_relative_eq;

use rusty_tau::error::TauError;
use rusty_tau::fit::{fit_event, ExpModel, GoodnessOfFit};
use rusty_tau::signal::time_axis;

fn transient(x: &[f64], tau_rise: f64, tau_decay: f64) -> Vec<f64> {
    x.iter()
        .map(|&t| match t {
            t if t < 2.0 => 3.0,
            t if t < 4.0 => 3.0 + 8.0 * (1.0 - (-(t - 2.0) / tau_rise).exp()),
            t => 3.0 + 8.0 * (1.0 - (-2.0 / tau_rise).exp()) * (-(t - 4.0) / tau_decay).exp(),
        })
        .collect()
}

#[test]
fn test_fit_event_recovers_time_constants() {
    let x = time_axis(200, 20.0);
    let y = transient(&x, 0.4, 1.5);

    let fit = fit_event(&x, &y, [40, 80, 200 - 1]).unwrap();
    assert_eq!(fit.rise.model, ExpModel::Rise);
    assert_eq!(fit.decay.model, ExpModel::Decay);
    // both windows are normalized to [0, 1], which distorts tau when the phase is not complete
    assert!(fit.rise.tau > 0.3 && fit.rise.tau < 0.5);
    assert!(fit.decay.tau > 1.0 && fit.decay.tau < 2.0);
    assert_eq!(fit.rise.time.len(), 40);
    assert_eq!(fit.decay.time.len(), 119);

    let window_t = &x[40..80];
    let window_y = &y[40..80];
    let gof = GoodnessOfFit::evaluate(&fit.rise, window_t, window_y).unwrap();
    assert!(gof.r_squared > 0.99);
    assert_eq!(gof.curve.len(), window_y.len());
    assert_relative_eq!(gof.curve[0], window_y[0], epsilon = 0.5);
}

#[test]
fn test_fit_event_rejects_bad_indices() {
    let x = time_axis(50, 10.0);
    let y = transient(&x, 0.2, 0.5);

    assert!(matches!(
        fit_event(&x, &y, [20, 10, 30]),
        Err(TauError::InvalidIndices(_))
    ));
    assert!(matches!(
        fit_event(&x, &y, [10, 20, 50]),
        Err(TauError::InvalidIndices(_))
    ));
    assert!(fit_event(&x[..40], &y, [10, 20, 30]).is_err());
}

#[test]
fn test_fit_event_fails_on_flat_phase() {
    let x = time_axis(50, 10.0);
    let y = x
        .iter()
        .map(|&t| if t < 3.0 { 1.0 } else { 1.0 + (-(t - 3.0)).exp() })
        .collect::<Vec<f64>>();

    let err = fit_event(&x, &y, [10, 20, 40]).unwrap_err();
    assert!(err.is_degenerate());
}
