//! Box-constrained nonlinear least squares (Levenberg-Marquardt).
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};

use crate::error::{Result, TauError};

/// The maximum number of accepted or rejected steps.
pub const MAX_ITERATIONS: usize = 500;
/// Relative tolerance on the parameter step.
pub const XTOL: f64 = 1e-12;
/// Relative tolerance on the cost decrease.
pub const FTOL: f64 = 1e-14;
/// Absolute tolerance on the gradient.
pub const GTOL: f64 = 1e-14;

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e16;

/// The outcome of a least-squares fit.
#[derive(Debug, Clone, PartialEq)]
pub struct LsqResult {
    /// The best parameters found, within the bounds.
    pub params: DVector<f64>,
    /// Covariance of the parameters, inv(JᵀJ) scaled by the residual variance.
    /// None if there are no more samples than parameters or JᵀJ is singular.
    pub covariance: Option<DMatrix<f64>>,
    /// Half the sum of squared residuals at the optimum.
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl LsqResult {
    /// Returns the standard error (square root of the covariance diagonal) of every parameter.
    pub fn std_errors(&self) -> Option<DVector<f64>> {
        self.covariance
            .as_ref()
            .map(|cov| cov.diagonal().map(|v| v.max(0.0).sqrt()))
    }
}

/// Evaluate the residuals y - f(x; p), or an error if any of them is not finite.
fn residuals<F>(model: &F, x: &[f64], y: &[f64], p: &DVector<f64>) -> Result<DVector<f64>>
where
    F: Fn(f64, &DVector<f64>) -> f64,
{
    let r = DVector::from_iterator(
        x.len(),
        x.iter().zip(y.iter()).map(|(&xn, &yn)| yn - model(xn, p)),
    );
    if r.iter().any(|v| !v.is_finite()) {
        return Err(TauError::NonFiniteInput(format!(
            "Model residuals are not finite for parameters {:?}",
            p.as_slice()
        )));
    }
    Ok(r)
}

/// Assemble the m x n Jacobian of the model with respect to the parameters.
fn jacobian<G>(grad: &G, x: &[f64], p: &DVector<f64>) -> DMatrix<f64>
where
    G: Fn(f64, &DVector<f64>) -> DVector<f64>,
{
    let mut j = DMatrix::zeros(x.len(), p.len());
    for (n, &xn) in x.iter().enumerate() {
        j.set_row(n, &grad(xn, p).transpose());
    }
    j
}

fn clamp(p: &DVector<f64>, lower: &DVector<f64>, upper: &DVector<f64>) -> DVector<f64> {
    p.zip_zip_map(lower, upper, |v, lo, hi| v.clamp(lo, hi))
}

/// Fit the parameters p of the model y ≈ f(x; p), subject to lower <= p <= upper.
///
/// The model is given by its value `model(x, p)` and its gradient with respect to the parameters
/// `grad(x, p)`. Steps leaving the box are projected back onto it, so parameters may end up pinned at a
/// bound. Failing to converge is not an error: the best parameters found are returned with
/// `converged == false`.
pub fn curve_fit<F, G>(
    model: F,
    grad: G,
    x: &[f64],
    y: &[f64],
    p0: DVector<f64>,
    lower: &DVector<f64>,
    upper: &DVector<f64>,
) -> Result<LsqResult>
where
    F: Fn(f64, &DVector<f64>) -> f64,
    G: Fn(f64, &DVector<f64>) -> DVector<f64>,
{
    if x.len() != y.len() {
        return Err(TauError::InvalidParameter(format!(
            "x and y must have the same length, got {} and {}",
            x.len(),
            y.len()
        )));
    }
    if x.is_empty() {
        return Err(TauError::InsufficientSamples(
            "Cannot fit a model without samples".to_string(),
        ));
    }
    if p0.len() != lower.len() || p0.len() != upper.len() {
        return Err(TauError::InvalidParameter(
            "Initial parameters and bounds must have the same length".to_string(),
        ));
    }
    if lower.iter().zip(upper.iter()).any(|(lo, hi)| !(lo <= hi)) {
        return Err(TauError::InvalidParameter(
            "Lower bounds must not exceed upper bounds".to_string(),
        ));
    }

    let (m, n) = (x.len(), p0.len());
    let mut p = clamp(&p0, lower, upper);
    let mut r = residuals(&model, x, y, &p)?;
    let mut cost = 0.5 * r.norm_squared();
    let mut lambda = LAMBDA_INIT;
    let mut converged = false;
    let mut iterations = 0;

    'outer: while iterations < MAX_ITERATIONS {
        let j = jacobian(&grad, x, &p);
        let jtj = j.tr_mul(&j);
        let g = j.tr_mul(&r);
        if g.amax() <= GTOL {
            converged = true;
            break;
        }

        loop {
            iterations += 1;
            let mut a = jtj.clone();
            for k in 0..n {
                a[(k, k)] += lambda * jtj[(k, k)].max(f64::EPSILON);
            }

            let step = match a.cholesky() {
                Some(chol) => chol.solve(&g),
                None => {
                    lambda *= 10.0;
                    if lambda > LAMBDA_MAX {
                        break 'outer;
                    }
                    continue;
                }
            };

            let p_new = clamp(&(&p + &step), lower, upper);
            let r_new = residuals(&model, x, y, &p_new)?;
            let cost_new = 0.5 * r_new.norm_squared();
            trace!(
                "LM iteration {}: lambda={:e}, cost={:e} -> {:e}",
                iterations,
                lambda,
                cost,
                cost_new
            );

            if cost_new < cost {
                let dp = (&p_new - &p).norm();
                let dcost = cost - cost_new;
                p = p_new;
                r = r_new;
                cost = cost_new;
                lambda = (lambda / 10.0).max(1e-12);
                if dp <= XTOL * (p.norm() + XTOL) || dcost <= FTOL * cost {
                    converged = true;
                    break 'outer;
                }
                break;
            }

            // no descent within the box, either a (possibly constrained) minimum or a too long step
            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                converged = true;
                break 'outer;
            }
            if iterations >= MAX_ITERATIONS {
                break 'outer;
            }
        }
    }

    let covariance = match m > n {
        true => {
            let j = jacobian(&grad, x, &p);
            j.tr_mul(&j)
                .try_inverse()
                .map(|inv| inv * (2.0 * cost / (m - n) as f64))
                .filter(|cov| cov.iter().all(|v| v.is_finite()))
        }
        false => None,
    };

    debug!(
        "Least squares finished after {} iterations (converged={}, cost={:e})",
        iterations, converged, cost
    );

    Ok(LsqResult {
        params: p,
        covariance,
        cost,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_fit() {
        let x = (0..20).map(|i| i as f64).collect::<Vec<f64>>();
        let y = x.iter().map(|xn| 2.0 * xn - 1.0).collect::<Vec<f64>>();

        let result = curve_fit(
            |xn, p| p[0] * xn + p[1],
            |xn, _| DVector::from_vec(vec![xn, 1.0]),
            &x,
            &y,
            DVector::from_vec(vec![0.0, 0.0]),
            &DVector::from_vec(vec![-10.0, -10.0]),
            &DVector::from_vec(vec![10.0, 10.0]),
        )
        .unwrap();

        assert!(result.converged);
        assert_relative_eq!(result.params[0], 2.0, epsilon = 1e-8);
        assert_relative_eq!(result.params[1], -1.0, epsilon = 1e-8);
        assert!(result.std_errors().unwrap().iter().all(|e| *e < 1e-6));
    }

    #[test]
    fn test_bounded_fit() {
        let x = (0..10).map(|i| i as f64).collect::<Vec<f64>>();
        let y = x.iter().map(|xn| 3.0 * xn).collect::<Vec<f64>>();

        let result = curve_fit(
            |xn, p| p[0] * xn,
            |xn, _| DVector::from_vec(vec![xn]),
            &x,
            &y,
            DVector::from_vec(vec![0.5]),
            &DVector::from_vec(vec![0.0]),
            &DVector::from_vec(vec![1.0]),
        )
        .unwrap();

        assert_eq!(result.params[0], 1.0);
    }

    #[test]
    fn test_no_covariance_without_dof() {
        let result = curve_fit(
            |_, p| p[0],
            |_, _| DVector::from_vec(vec![1.0]),
            &[0.0],
            &[4.0],
            DVector::from_vec(vec![0.0]),
            &DVector::from_vec(vec![-10.0]),
            &DVector::from_vec(vec![10.0]),
        )
        .unwrap();

        assert_relative_eq!(result.params[0], 4.0, epsilon = 1e-8);
        assert_eq!(result.covariance, None);
    }

    #[test]
    fn test_invalid_inputs() {
        let lower = DVector::from_vec(vec![0.0]);
        let upper = DVector::from_vec(vec![1.0]);
        let model = |_: f64, p: &DVector<f64>| p[0];
        let grad = |_: f64, _: &DVector<f64>| DVector::from_vec(vec![1.0]);

        assert!(matches!(
            curve_fit(model, grad, &[], &[], DVector::from_vec(vec![0.5]), &lower, &upper),
            Err(TauError::InsufficientSamples(_))
        ));
        assert!(matches!(
            curve_fit(model, grad, &[0.0], &[f64::NAN], DVector::from_vec(vec![0.5]), &lower, &upper),
            Err(TauError::NonFiniteInput(_))
        ));
        assert!(matches!(
            curve_fit(model, grad, &[0.0], &[1.0], DVector::from_vec(vec![0.5]), &upper, &lower),
            Err(TauError::InvalidParameter(_))
        ));
    }
}
