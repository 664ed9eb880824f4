//! Exponential rise/decay fitting of event windows.
//!
//! An event is delimited by three sample indices `[i1, i2, i3]` (start, center, end). The rise window
//! `[i1, i2)` is fitted with `1 - exp(-t/tau)` and the decay window `[i2, i3)` with `exp(-t/tau)`, both
//! after shifting time to start at zero and rescaling the window onto [0, 1].
pub mod lsq;

use log::{debug, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TauError};
use crate::utils::{ensure_finite, mean, min_max, normalize_unit};

/// The lower bound of the time-constant search, in units of the time axis.
pub const TAU_LOWER_BOUND: f64 = 0.01;
/// The upper bound of the time-constant search, in units of the time axis.
pub const TAU_UPPER_BOUND: f64 = 60.0;
/// The number of log-spaced candidates used to seed the fit.
const NUM_SEEDS: usize = 64;

/// The single-parameter exponential shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpModel {
    /// 1 - exp(-t/tau)
    Rise,
    /// exp(-t/tau)
    Decay,
}

/// A fitted time constant with its uncertainty.
#[derive(Debug, Clone, PartialEq)]
pub struct TauFit {
    pub tau: f64,
    /// One standard deviation of tau, if it could be estimated.
    pub error: Option<f64>,
    pub cost: f64,
    pub converged: bool,
}

impl ExpModel {
    /// Evaluate the model at time t.
    pub fn eval(&self, t: f64, tau: f64) -> f64 {
        match self {
            ExpModel::Rise => 1.0 - (-t / tau).exp(),
            ExpModel::Decay => (-t / tau).exp(),
        }
    }

    /// Derivative of the model with respect to tau.
    pub fn derivative(&self, t: f64, tau: f64) -> f64 {
        let d = (-t / tau).exp() * t / tau.powi(2);
        match self {
            ExpModel::Rise => -d,
            ExpModel::Decay => d,
        }
    }

    /// Fit tau to the samples as given, i.e., without shifting or rescaling them.
    /// The search is seeded with the best of a log-spaced grid over the bounds.
    pub fn fit(&self, t: &[f64], y: &[f64]) -> Result<TauFit> {
        ensure_finite(t, "The time window")?;
        ensure_finite(y, "The sample window")?;

        let sse = |tau: f64| {
            t.iter()
                .zip(y.iter())
                .map(|(&tn, &yn)| (yn - self.eval(tn, tau)).powi(2))
                .sum::<f64>()
        };
        let ratio = (TAU_UPPER_BOUND / TAU_LOWER_BOUND).ln();
        let seed = (0..NUM_SEEDS)
            .map(|k| TAU_LOWER_BOUND * (ratio * k as f64 / (NUM_SEEDS - 1) as f64).exp())
            .map(|tau| (tau, sse(tau)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(tau, _)| tau)
            .unwrap_or(1.0);

        let result = lsq::curve_fit(
            |tn, p| self.eval(tn, p[0]),
            |tn, p| DVector::from_element(1, self.derivative(tn, p[0])),
            t,
            y,
            DVector::from_element(1, seed),
            &DVector::from_element(1, TAU_LOWER_BOUND),
            &DVector::from_element(1, TAU_UPPER_BOUND),
        )?;

        if !result.converged {
            warn!(
                "{:?} fit did not converge after {} iterations",
                self, result.iterations
            );
        }

        Ok(TauFit {
            tau: result.params[0],
            error: result.std_errors().map(|e| e[0]),
            cost: result.cost,
            converged: result.converged,
        })
    }
}

/// The fit of one phase (rise or decay) of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseFit {
    pub model: ExpModel,
    pub tau: f64,
    /// One standard deviation of tau, None if it could not be estimated.
    pub error: Option<f64>,
    /// The zero-shifted time of the window.
    pub time: Vec<f64>,
    /// The fitted curve on the normalized scale.
    pub values: Vec<f64>,
}

impl PhaseFit {
    /// Returns true if tau sits at one of the search bounds, i.e., a low-confidence fit.
    pub fn is_pinned(&self) -> bool {
        let tol = 1e-9;
        (self.tau - TAU_LOWER_BOUND).abs() <= tol * TAU_LOWER_BOUND
            || (self.tau - TAU_UPPER_BOUND).abs() <= tol * TAU_UPPER_BOUND
    }

    /// Map the fitted curve back onto the window it was fitted on, returning (time, values) in the units
    /// of the axis and trace.
    pub fn denormalize(&self, window_t: &[f64], window_y: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
        if window_t.len() != self.time.len() || window_y.len() != self.values.len() {
            return Err(TauError::InvalidParameter(format!(
                "Window of {} samples does not match a fit of {} samples",
                window_y.len(),
                self.values.len()
            )));
        }
        let (lo, hi) = min_max(window_y).ok_or_else(|| {
            TauError::InsufficientSamples("Cannot denormalize onto an empty window".to_string())
        })?;
        let t0 = window_t[0];
        Ok((
            self.time.iter().map(|t| t + t0).collect(),
            self.values.iter().map(|v| v * (hi - lo) + lo).collect(),
        ))
    }
}

/// Fit one phase on the window `[lo, hi)` of the trace.
pub fn fit_phase_window(model: ExpModel, x: &[f64], y: &[f64], lo: usize, hi: usize) -> Result<PhaseFit> {
    if lo > hi || hi > x.len() || hi > y.len() {
        return Err(TauError::InvalidIndices(format!(
            "Window [{}, {}) is out of range",
            lo, hi
        )));
    }
    if hi - lo < 2 {
        return Err(TauError::InsufficientSamples(format!(
            "{:?} window [{}, {}) holds fewer than 2 samples",
            model, lo, hi
        )));
    }

    let (x, y) = (&x[lo..hi], &y[lo..hi]);
    ensure_finite(x, "The time window")?;
    ensure_finite(y, "The sample window")?;

    let time = x.iter().map(|t| t - x[0]).collect::<Vec<f64>>();
    let y = normalize_unit(y)?;
    let fit = model.fit(&time, &y)?;
    let values = time.iter().map(|&t| model.eval(t, fit.tau)).collect();

    let phase = PhaseFit {
        model,
        tau: fit.tau,
        error: fit.error,
        time,
        values,
    };
    if phase.is_pinned() {
        warn!("{:?} fit pinned at tau={} (search bound)", model, phase.tau);
    }
    debug!("{:?} fit: tau={} +/- {:?}", model, phase.tau, phase.error);
    Ok(phase)
}

/// Validate that the boundary indices are strictly increasing and within a trace of length n.
pub fn check_event_indices(indices: [usize; 3], n: usize) -> Result<()> {
    let [i1, i2, i3] = indices;
    if !(i1 < i2 && i2 < i3) {
        return Err(TauError::InvalidIndices(format!(
            "Boundary indices must be strictly increasing, got {:?}",
            indices
        )));
    }
    if i3 >= n {
        return Err(TauError::InvalidIndices(format!(
            "Boundary index {} is out of range for {} samples",
            i3, n
        )));
    }
    Ok(())
}

/// Both phase fits of an event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFit {
    pub rise: PhaseFit,
    pub decay: PhaseFit,
}

/// Fit the rise and decay phases of an event delimited by `[i1, i2, i3]`.
/// The function returns an error if either phase cannot be fitted.
pub fn fit_event(x: &[f64], y: &[f64], indices: [usize; 3]) -> Result<EventFit> {
    if x.len() != y.len() {
        return Err(TauError::InvalidParameter(format!(
            "Time axis and trace differ in length ({} vs {})",
            x.len(),
            y.len()
        )));
    }
    check_event_indices(indices, x.len())?;
    let [i1, i2, i3] = indices;
    Ok(EventFit {
        rise: fit_phase_window(ExpModel::Rise, x, y, i1, i2)?,
        decay: fit_phase_window(ExpModel::Decay, x, y, i2, i3)?,
    })
}

/// Quality of a phase fit against the data it was fitted on, in display units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoodnessOfFit {
    pub model: ExpModel,
    pub tau: f64,
    pub error: Option<f64>,
    pub rmse: f64,
    pub r_squared: f64,
    pub residual_sd: f64,
    pub time: Vec<f64>,
    pub curve: Vec<f64>,
    pub residuals: Vec<f64>,
}

impl GoodnessOfFit {
    /// Compare a phase fit with its window of the trace.
    pub fn evaluate(fit: &PhaseFit, window_t: &[f64], window_y: &[f64]) -> Result<Self> {
        let (time, curve) = fit.denormalize(window_t, window_y)?;
        let residuals = window_y
            .iter()
            .zip(curve.iter())
            .map(|(y, f)| y - f)
            .collect::<Vec<f64>>();

        let ss_res = residuals.iter().map(|r| r.powi(2)).sum::<f64>();
        let y_mean = mean(window_y);
        let ss_tot = window_y.iter().map(|y| (y - y_mean).powi(2)).sum::<f64>();
        if ss_tot == 0.0 {
            return Err(TauError::DegenerateData(
                "R² is undefined for a flat window".to_string(),
            ));
        }

        Ok(GoodnessOfFit {
            model: fit.model,
            tau: fit.tau,
            error: fit.error,
            rmse: (ss_res / residuals.len() as f64).sqrt(),
            r_squared: 1.0 - ss_res / ss_tot,
            residual_sd: crate::utils::std_dev(&residuals),
            time,
            curve,
            residuals,
        })
    }
}
