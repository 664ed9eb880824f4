//! Annotated events and their derived quantities.
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::collection::TauValues;
use crate::error::{Result, TauError};
use crate::fit::PhaseFit;
use crate::signal::{DataTraces, Representation};

/// An RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Scale every channel by the given factor.
    pub fn scaled(&self, factor: f64) -> Rgb {
        let scale = |c: u8| (c as f64 * factor).round().clamp(0.0, 255.0) as u8;
        Rgb {
            r: scale(self.r),
            g: scale(self.g),
            b: scale(self.b),
        }
    }
}

/// The display colors of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenColors {
    pub pen: Rgb,
    pub darker: Rgb,
}

impl PenColors {
    /// Draw a random mid-range color and its darker companion (every channel halved).
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let dist = Uniform::from(50u8..200);
        let pen = Rgb {
            r: dist.sample(rng),
            g: dist.sample(rng),
            b: dist.sample(rng),
        };
        PenColors {
            pen,
            darker: pen.scaled(0.5),
        }
    }
}

/// One annotated transient on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub start_idx: usize,
    pub center_idx: usize,
    pub end_idx: usize,
    /// The empirical time constants and the points they were read from.
    pub tau: TauValues,
    /// The rise fit, None if the rise window was degenerate.
    pub rise_fit: Option<PhaseFit>,
    /// The decay fit, None if the decay window was degenerate.
    pub decay_fit: Option<PhaseFit>,
    /// Peak amplitudes keyed `peak_<repr>_<phase>`.
    pub peaks: BTreeMap<String, f64>,
    pub colors: PenColors,
    pub filter_window: Option<f64>,
    pub recording_name: String,
    pub sampling_rate: f64,
    /// The representation the event was fitted on.
    pub norm_mode: Representation,
}

impl Event {
    /// Returns the boundary indices [start, center, end].
    pub fn indices(&self) -> [usize; 3] {
        [self.start_idx, self.center_idx, self.end_idx]
    }

    /// Returns true if a phase could not be fitted or its tau sits at a search bound.
    pub fn is_low_confidence(&self) -> bool {
        [&self.rise_fit, &self.decay_fit]
            .into_iter()
            .any(|fit| match fit {
                Some(fit) => fit.is_pinned(),
                None => true,
            })
    }

    /// Flatten the event into an export row, without fit curves and colors.
    pub fn to_row(&self) -> BTreeMap<String, Value> {
        let mut row = BTreeMap::new();
        row.insert("start_idx".to_string(), Value::from(self.start_idx));
        row.insert("center_idx".to_string(), Value::from(self.center_idx));
        row.insert("end_idx".to_string(), Value::from(self.end_idx));
        row.insert("tau_rise".to_string(), Value::from(self.tau.tau_rise));
        row.insert("tau_decay".to_string(), Value::from(self.tau.tau_decay));
        for (k, p) in self.tau.boundary.iter().enumerate() {
            row.insert(format!("p{}_t", k + 1), Value::from(p.time));
            row.insert(format!("p{}_y", k + 1), Value::from(p.value));
        }

        for (phase, fit) in [("rise", &self.rise_fit), ("decay", &self.decay_fit)] {
            let (tau, error, pinned) = match fit {
                Some(fit) => (
                    Value::from(fit.tau),
                    fit.error.map_or(Value::Null, Value::from),
                    Value::from(fit.is_pinned()),
                ),
                None => (Value::Null, Value::Null, Value::Null),
            };
            row.insert(format!("fit_{}_tau", phase), tau);
            row.insert(format!("fit_{}_error", phase), error);
            row.insert(format!("fit_{}_pinned", phase), pinned);
        }

        for (key, value) in self.peaks.iter() {
            row.insert(key.clone(), Value::from(*value));
        }

        row.insert(
            "filter_window".to_string(),
            self.filter_window.map_or(Value::Null, Value::from),
        );
        row.insert(
            "recording_name".to_string(),
            Value::from(self.recording_name.clone()),
        );
        row.insert("sampling_rate".to_string(), Value::from(self.sampling_rate));
        row.insert("norm_mode".to_string(), Value::from(self.norm_mode.name()));
        row
    }
}

/// Returns the center-minus-boundary amplitudes `peak_<name>_rise` (center - start) and
/// `peak_<name>_decay` (center - end) of every given trace.
pub fn peak_amplitudes<'a, I>(traces: I, indices: [usize; 3]) -> Result<BTreeMap<String, f64>>
where
    I: IntoIterator<Item = (String, &'a [f64])>,
{
    let [start, center, end] = indices;
    let mut peaks = BTreeMap::new();
    for (name, trace) in traces {
        if end >= trace.len() {
            return Err(TauError::InvalidIndices(format!(
                "Index {} out of range for the {} trace of {} samples",
                end,
                name,
                trace.len()
            )));
        }
        peaks.insert(format!("peak_{}_rise", name), trace[center] - trace[start]);
        peaks.insert(format!("peak_{}_decay", name), trace[center] - trace[end]);
    }
    Ok(peaks)
}

/// Returns the peak amplitudes of every stored representation of a channel.
pub fn channel_peak_amplitudes(
    traces: &DataTraces,
    indices: [usize; 3],
) -> Result<BTreeMap<String, f64>> {
    peak_amplitudes(
        traces.iter().map(|(repr, trace)| (repr.name().to_string(), trace)),
        indices,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::ExpModel;
    use crate::points::{Point, SamplePoint};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn dummy_event() -> Event {
        let sample = |index: usize| SamplePoint {
            index,
            time: index as f64 / 10.0,
            value: 1.0,
        };
        Event {
            start_idx: 10,
            center_idx: 15,
            end_idx: 20,
            tau: TauValues {
                tau_rise: 0.2,
                tau_decay: 0.3,
                boundary: [sample(10), sample(15), sample(20)],
                rise_point: Point::new(1.2, 0.5),
                decay_point: Point::new(1.8, 0.5),
            },
            rise_fit: Some(PhaseFit {
                model: ExpModel::Rise,
                tau: 0.25,
                error: Some(0.01),
                time: vec![0.0, 0.1],
                values: vec![0.0, 0.3],
            }),
            decay_fit: None,
            peaks: BTreeMap::from([("peak_raw_rise".to_string(), 4.0)]),
            colors: PenColors {
                pen: Rgb { r: 100, g: 60, b: 199 },
                darker: Rgb { r: 50, g: 30, b: 100 },
            },
            filter_window: None,
            recording_name: "rec".to_string(),
            sampling_rate: 10.0,
            norm_mode: Representation::Df,
        }
    }

    #[test]
    fn test_random_colors() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..100 {
            let colors = PenColors::random(&mut rng);
            for c in [colors.pen.r, colors.pen.g, colors.pen.b] {
                assert!((50..200).contains(&c));
            }
            assert_eq!(colors.darker, colors.pen.scaled(0.5));
        }

        let mut rng_a = ChaCha8Rng::seed_from_u64(7);
        let mut rng_b = ChaCha8Rng::seed_from_u64(7);
        assert_eq!(PenColors::random(&mut rng_a), PenColors::random(&mut rng_b));
    }

    #[test]
    fn test_peak_amplitudes() {
        let trace = vec![1.0, 2.0, 5.0, 3.0, 0.5];
        let peaks = peak_amplitudes(vec![("raw".to_string(), &trace[..])], [0, 2, 4]).unwrap();
        assert_eq!(peaks["peak_raw_rise"], 4.0);
        assert_eq!(peaks["peak_raw_decay"], 4.5);

        assert!(peak_amplitudes(vec![("raw".to_string(), &trace[..])], [0, 2, 5]).is_err());
    }

    #[test]
    fn test_row_strips_display_fields() {
        let event = dummy_event();
        let row = event.to_row();

        assert_eq!(row["start_idx"], Value::from(10));
        assert_eq!(row["p2_t"], Value::from(1.5));
        assert_eq!(row["fit_rise_tau"], Value::from(0.25));
        assert_eq!(row["fit_decay_tau"], Value::Null);
        assert_eq!(row["norm_mode"], Value::from("df"));
        assert_eq!(row["peak_raw_rise"], Value::from(4.0));
        assert!(!row.contains_key("colors"));
        assert!(!row.keys().any(|k| k.contains("time") || k.contains("values")));
        assert!(event.is_low_confidence());
    }
}
