//! Small numerical helpers shared by the signal and fitting modules.
use itertools::{Itertools, MinMaxResult};

use crate::error::{Result, TauError};

/// Returns the arithmetic mean of the samples, NaN for an empty slice.
pub fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

/// Returns the population standard deviation (no degrees-of-freedom correction) of the samples.
pub fn std_dev(data: &[f64]) -> f64 {
    let mu = mean(data);
    (data.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / data.len() as f64).sqrt()
}

/// Returns the minimum and maximum of the samples, if any.
pub fn min_max(data: &[f64]) -> Option<(f64, f64)> {
    match data.iter().copied().minmax_by(|a, b| a.total_cmp(b)) {
        MinMaxResult::NoElements => None,
        MinMaxResult::OneElement(x) => Some((x, x)),
        MinMaxResult::MinMax(lo, hi) => Some((lo, hi)),
    }
}

/// Returns the p-th percentile of the samples, linearly interpolated between the two closest ranks.
/// The function returns an error for an empty slice or a percentile outside [0, 100].
pub fn percentile(data: &[f64], p: f64) -> Result<f64> {
    if data.is_empty() {
        return Err(TauError::InsufficientSamples(
            "Percentile of an empty sequence".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&p) {
        return Err(TauError::InvalidParameter(format!(
            "Percentile must be in [0, 100], got {}",
            p
        )));
    }

    let sorted = data
        .iter()
        .copied()
        .sorted_by(|a, b| a.total_cmp(b))
        .collect::<Vec<f64>>();
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

/// Rescales the samples linearly onto [0, 1].
/// The function returns an error if the samples are empty or flat.
pub fn normalize_unit(data: &[f64]) -> Result<Vec<f64>> {
    let (lo, hi) = min_max(data).ok_or_else(|| {
        TauError::InsufficientSamples("Cannot normalize an empty sequence".to_string())
    })?;
    if hi - lo == 0.0 {
        return Err(TauError::DegenerateData(format!(
            "Cannot normalize a flat sequence (constant value {})",
            lo
        )));
    }
    Ok(data.iter().map(|x| (x - lo) / (hi - lo)).collect())
}

/// Returns an error naming `what` if any sample is NaN or infinite.
pub fn ensure_finite(data: &[f64], what: &str) -> Result<()> {
    match data.iter().position(|x| !x.is_finite()) {
        Some(pos) => Err(TauError::NonFiniteInput(format!(
            "{} contains a non-finite value at sample {}",
            what, pos
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_percentile() {
        let data = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&data, 0.0), Ok(1.0));
        assert_eq!(percentile(&data, 50.0), Ok(3.0));
        assert_eq!(percentile(&data, 100.0), Ok(5.0));
        assert_relative_eq!(percentile(&data, 5.0).unwrap(), 1.2);
        assert_relative_eq!(percentile(&data, 60.0).unwrap(), 3.4);

        assert!(percentile(&[], 5.0).is_err());
        assert!(percentile(&data, 101.0).is_err());
    }

    #[test]
    fn test_mean_std() {
        let data = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&data), 5.0);
        assert_eq!(std_dev(&data), 2.0);
    }

    #[test]
    fn test_min_max() {
        assert_eq!(min_max(&[]), None);
        assert_eq!(min_max(&[3.0]), Some((3.0, 3.0)));
        assert_eq!(min_max(&[3.0, -1.0, 7.5, 0.0]), Some((-1.0, 7.5)));
    }

    #[test]
    fn test_normalize_unit() {
        assert_eq!(normalize_unit(&[1.0, 3.0, 2.0]), Ok(vec![0.0, 1.0, 0.5]));
        assert!(matches!(
            normalize_unit(&[2.0, 2.0, 2.0]),
            Err(TauError::DegenerateData(_))
        ));
        assert!(matches!(
            normalize_unit(&[]),
            Err(TauError::InsufficientSamples(_))
        ));
    }

    #[test]
    fn test_ensure_finite() {
        assert_eq!(ensure_finite(&[0.0, 1.0], "trace"), Ok(()));
        assert!(matches!(
            ensure_finite(&[0.0, f64::NAN], "trace"),
            Err(TauError::NonFiniteInput(_))
        ));
    }
}
