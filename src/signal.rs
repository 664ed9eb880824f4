//! Per-channel sample storage and the derived representations of a trace.
//!
//! A [`Channel`] owns its raw samples together with the baseline-normalized (`df`),
//! z-scored (`z`) and min-max-normalized (`min_max`) versions computed at ingestion, an optional
//! moving-average `filtered` version of the currently displayed representation, and the events
//! annotated on it.
//!
//! # Examples
//!
//! ```
//! use rusty_tau::signal::{time_axis, Channel, Representation};
//!
//! let raw = vec![100.0, 101.0, 104.0, 110.0, 104.0, 101.0, 100.0, 100.0];
//! let mut channel = Channel::new("roi_0", raw, 5.0).unwrap();
//! channel.apply_moving_average(Representation::Df, Some(0.3), 10.0).unwrap();
//!
//! assert_eq!(channel.num_samples(), 8);
//! assert_eq!(channel.trace(Representation::Filtered).unwrap().len(), 8);
//! assert_eq!(time_axis(8, 10.0)[7], 0.7);
//! ```
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TauError};
use crate::event::Event;
use crate::fit::check_event_indices;
use crate::utils::{ensure_finite, mean, min_max, percentile, std_dev};

/// The named transforms of a channel's raw samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    /// The samples as imported.
    Raw,
    /// Baseline-normalized samples, (raw - fbs) / fbs.
    Df,
    /// Z-scored df samples.
    Z,
    /// Raw samples rescaled onto [0, 1].
    MinMax,
    /// Moving average of the currently displayed representation.
    Filtered,
}

impl Representation {
    /// The representations computed at ingestion, i.e., the ones an operator can display.
    pub const NORMALIZATIONS: [Representation; 4] = [
        Representation::Raw,
        Representation::Df,
        Representation::Z,
        Representation::MinMax,
    ];

    /// Returns the storage name of the representation.
    pub fn name(&self) -> &'static str {
        match self {
            Representation::Raw => "raw",
            Representation::Df => "df",
            Representation::Z => "z",
            Representation::MinMax => "min_max",
            Representation::Filtered => "filtered",
        }
    }
}

impl FromStr for Representation {
    type Err = TauError;

    /// Parse a representation from its storage name.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(Representation::Raw),
            "df" => Ok(Representation::Df),
            "z" => Ok(Representation::Z),
            "min_max" => Ok(Representation::MinMax),
            "filtered" => Ok(Representation::Filtered),
            _ => Err(TauError::InvalidParameter(format!(
                "Unknown representation {}",
                s
            ))),
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Returns the time axis of a channel with the given number of samples.
/// Sample `i` lies at `i / sampling_rate`, so the axis starts at 0 and ends at `(N - 1) / sampling_rate`.
pub fn time_axis(num_samples: usize, sampling_rate: f64) -> Vec<f64> {
    (0..num_samples)
        .map(|i| i as f64 / sampling_rate)
        .collect()
}

/// Returns the moving-average width in samples for a window given in seconds.
/// Non-positive or non-finite windows resolve to 0, i.e., no filtering.
pub fn filter_width(window_seconds: f64, sampling_rate: f64) -> usize {
    let width = window_seconds * sampling_rate;
    if width.is_finite() && width > 0.0 {
        width.round() as usize
    } else {
        0
    }
}

/// Returns the centered moving average of the samples over `width` samples.
/// The window is zero-padded at both edges and always divided by its full width; for even widths the
/// extra sample lies before the center. A width of 0 or 1 returns a copy of the samples.
pub fn moving_average(data: &[f64], width: usize) -> Vec<f64> {
    if width <= 1 {
        return data.to_vec();
    }

    let mut cumsum = Vec::with_capacity(data.len() + 1);
    cumsum.push(0.0);
    for x in data {
        cumsum.push(cumsum[cumsum.len() - 1] + x);
    }

    let before = width / 2;
    let after = (width - 1) / 2;
    (0..data.len())
        .map(|i| {
            let lo = i.saturating_sub(before);
            let hi = (i + after + 1).min(data.len());
            (cumsum[hi] - cumsum[lo]) / width as f64
        })
        .collect()
}

/// Returns the baseline (the given percentile of the samples) and the baseline-normalized samples.
pub fn to_df_over_f(raw: &[f64], fbs_percentile: f64) -> Result<(f64, Vec<f64>)> {
    let fbs = percentile(raw, fbs_percentile)?;
    Ok((fbs, raw.iter().map(|x| (x - fbs) / fbs).collect()))
}

/// Returns the z-scored samples.
pub fn to_z_score(data: &[f64]) -> Vec<f64> {
    let (mu, sigma) = (mean(data), std_dev(data));
    data.iter().map(|x| (x - mu) / sigma).collect()
}

/// Returns the samples rescaled onto [0, 1].
pub fn to_min_max(data: &[f64]) -> Vec<f64> {
    match min_max(data) {
        Some((lo, hi)) => data.iter().map(|x| (x - lo) / (hi - lo)).collect(),
        None => vec![],
    }
}

/// The stored representations of one channel. All sequences share the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTraces {
    raw: Vec<f64>,
    df: Vec<f64>,
    z: Vec<f64>,
    min_max: Vec<f64>,
    filtered: Option<Vec<f64>>,
    /// The baseline used for the df representation.
    fbs: f64,
}

impl DataTraces {
    /// Compute all representations from the raw samples.
    /// The function returns an error for empty, non-finite or constant samples, and for samples whose
    /// baseline is zero, since the normalizations would divide by zero.
    pub fn build(raw: Vec<f64>, fbs_percentile: f64) -> Result<Self> {
        if raw.is_empty() {
            return Err(TauError::InvalidTrace("The trace is empty".to_string()));
        }
        ensure_finite(&raw, "The raw trace")?;

        let (lo, hi) = min_max(&raw)
            .ok_or_else(|| TauError::InvalidTrace("The trace is empty".to_string()))?;
        if hi == lo {
            return Err(TauError::InvalidTrace(format!(
                "The trace is constant ({}), its normalizations are undefined",
                lo
            )));
        }

        let (fbs, df) = to_df_over_f(&raw, fbs_percentile)?;
        if fbs == 0.0 {
            return Err(TauError::InvalidTrace(format!(
                "The {}-th percentile baseline is zero, df is undefined",
                fbs_percentile
            )));
        }
        let z = to_z_score(&df);
        let min_max = to_min_max(&raw);

        Ok(DataTraces {
            raw,
            df,
            z,
            min_max,
            filtered: None,
            fbs,
        })
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns true if the traces hold no samples.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Returns the baseline value.
    pub fn fbs(&self) -> f64 {
        self.fbs
    }

    /// Returns the samples of a representation, if stored.
    pub fn get(&self, representation: Representation) -> Option<&[f64]> {
        match representation {
            Representation::Raw => Some(&self.raw),
            Representation::Df => Some(&self.df),
            Representation::Z => Some(&self.z),
            Representation::MinMax => Some(&self.min_max),
            Representation::Filtered => self.filtered.as_deref(),
        }
    }

    /// Check that every stored representation is finite and as long as the raw samples,
    /// e.g., after loading the traces from a file.
    pub fn check(&self) -> Result<()> {
        if self.raw.is_empty() {
            return Err(TauError::InvalidTrace("The trace is empty".to_string()));
        }
        for (repr, trace) in self.iter() {
            if trace.len() != self.raw.len() {
                return Err(TauError::InvalidTrace(format!(
                    "The {} trace has {} samples, the raw trace {}",
                    repr,
                    trace.len(),
                    self.raw.len()
                )));
            }
            ensure_finite(trace, repr.name())
                .map_err(|e| TauError::InvalidTrace(e.to_string()))?;
        }
        Ok(())
    }

    /// An iterator over all stored sequence representations, in a fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (Representation, &[f64])> + '_ {
        Representation::NORMALIZATIONS
            .iter()
            .chain(std::iter::once(&Representation::Filtered))
            .filter_map(move |&repr| self.get(repr).map(|trace| (repr, trace)))
    }
}

/// An auxiliary signal sampled on its own clock, e.g., a stimulus or a behavioural readout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxTrace {
    pub time: Vec<f64>,
    pub values: Vec<f64>,
}

impl AuxTrace {
    /// Create an auxiliary trace; time and values must have the same length.
    pub fn build(time: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if time.len() != values.len() {
            return Err(TauError::InvalidTrace(format!(
                "Auxiliary trace has {} time points but {} values",
                time.len(),
                values.len()
            )));
        }
        Ok(AuxTrace { time, values })
    }
}

/// One stimulus presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusOnset {
    pub start: f64,
    pub end: f64,
    pub info: String,
}

/// A binary stimulus trace built from an onset table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    dt: f64,
    trace: AuxTrace,
    onsets: Vec<StimulusOnset>,
}

impl Stimulus {
    /// Build the stimulus trace on the clock `0, dt, 2dt, ... < t_max`.
    /// A sample is 1 if it lies within any onset interval (bounds included), and 0 otherwise.
    pub fn from_onsets(onsets: Vec<StimulusOnset>, t_max: f64, dt: f64) -> Result<Self> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(TauError::InvalidParameter(format!(
                "Stimulus sampling interval must be positive, got {}",
                dt
            )));
        }
        if !t_max.is_finite() {
            return Err(TauError::InvalidParameter(
                "Stimulus duration must be finite".to_string(),
            ));
        }

        let num_samples = (t_max / dt).ceil().max(0.0) as usize;
        let time = (0..num_samples).map(|i| i as f64 * dt).collect::<Vec<f64>>();
        let values = time
            .iter()
            .map(|&t| {
                match onsets.iter().any(|onset| t >= onset.start && t <= onset.end) {
                    true => 1.0,
                    false => 0.0,
                }
            })
            .collect();

        Ok(Stimulus {
            dt,
            trace: AuxTrace { time, values },
            onsets,
        })
    }

    /// Returns the stimulus trace.
    pub fn trace(&self) -> &AuxTrace {
        &self.trace
    }

    /// Returns the onset table.
    pub fn onsets(&self) -> &[StimulusOnset] {
        &self.onsets
    }

    /// Returns the part of the stimulus trace between the two times, as (time, values).
    pub fn cut(&self, start_time: f64, end_time: f64) -> (&[f64], &[f64]) {
        let n = self.trace.time.len();
        let lo = ((start_time / self.dt).max(0.0) as usize).min(n);
        let hi = ((end_time / self.dt).max(0.0) as usize).clamp(lo, n);
        (&self.trace.time[lo..hi], &self.trace.values[lo..hi])
    }
}

/// One independently normalized trace with its annotated events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    key: String,
    data_traces: DataTraces,
    /// Events indexed by their (dense) id.
    events: Vec<Event>,
    stimulus_trace: Option<AuxTrace>,
    flagged: bool,
}

impl Channel {
    /// Create a new channel from raw samples, computing all normalizations (see [`DataTraces::build`]).
    pub fn new(key: &str, raw: Vec<f64>, fbs_percentile: f64) -> Result<Self> {
        let data_traces = DataTraces::build(raw, fbs_percentile)?;
        debug!(
            "Channel {} created with {} samples (fbs={})",
            key,
            data_traces.len(),
            data_traces.fbs()
        );
        Ok(Channel {
            key: key.to_string(),
            data_traces,
            events: vec![],
            stimulus_trace: None,
            flagged: false,
        })
    }

    /// Returns the channel key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the stored representations.
    pub fn traces(&self) -> &DataTraces {
        &self.data_traces
    }

    /// Returns the samples of a representation, or an error if it is not stored.
    pub fn trace(&self, representation: Representation) -> Result<&[f64]> {
        self.data_traces.get(representation).ok_or_else(|| {
            TauError::InvalidOperation(format!(
                "Channel {} has no {} trace",
                self.key, representation
            ))
        })
    }

    /// Returns the number of samples.
    pub fn num_samples(&self) -> usize {
        self.data_traces.len()
    }

    /// Returns the time axis of the channel for the given sampling rate.
    pub fn time_axis(&self, sampling_rate: f64) -> Vec<f64> {
        time_axis(self.num_samples(), sampling_rate)
    }

    /// Recompute the `filtered` representation as the moving average of `source`.
    /// A missing or resolved-to-zero window stores a plain copy of `source`.
    pub fn apply_moving_average(
        &mut self,
        source: Representation,
        window_seconds: Option<f64>,
        sampling_rate: f64,
    ) -> Result<()> {
        if source == Representation::Filtered {
            return Err(TauError::InvalidParameter(
                "The filtered trace cannot be filtered again".to_string(),
            ));
        }
        let width = window_seconds
            .map(|w| filter_width(w, sampling_rate))
            .unwrap_or(0);
        if width > self.num_samples() {
            warn!(
                "Filter width of {} samples exceeds the {} samples of channel {}",
                width,
                self.num_samples(),
                self.key
            );
        }
        let filtered = moving_average(self.trace(source)?, width);
        debug!(
            "Channel {}: {} filtered with a {}-sample window",
            self.key, source, width
        );
        self.data_traces.filtered = Some(filtered);
        Ok(())
    }

    /// Returns the events of the channel; an event's id is its position.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Returns the event with the given id, if any.
    pub fn event(&self, event_id: usize) -> Option<&Event> {
        self.events.get(event_id)
    }

    /// Returns the number of events.
    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    /// Append an event and returns its id.
    pub fn add_event(&mut self, event: Event) -> usize {
        self.events.push(event);
        self.events.len() - 1
    }

    /// Remove the event with the given id, if any. The following events move down by one id.
    pub fn remove_event(&mut self, event_id: usize) -> Option<Event> {
        if event_id < self.events.len() {
            Some(self.events.remove(event_id))
        } else {
            None
        }
    }

    /// Check the stored traces and the boundary indices of every event against the number of samples.
    pub fn check(&self) -> Result<()> {
        self.data_traces.check().map_err(|e| {
            TauError::InvalidTrace(format!("Channel {}: {}", self.key, e))
        })?;
        for (id, event) in self.events.iter().enumerate() {
            check_event_indices(event.indices(), self.num_samples()).map_err(|e| {
                TauError::InvalidIndices(format!("Channel {}, event {}: {}", self.key, id, e))
            })?;
        }
        Ok(())
    }

    /// Returns the auxiliary trace attached to the channel, if any.
    pub fn stimulus_trace(&self) -> Option<&AuxTrace> {
        self.stimulus_trace.as_ref()
    }

    /// Attach an auxiliary trace to the channel.
    pub fn set_stimulus_trace(&mut self, trace: AuxTrace) {
        self.stimulus_trace = Some(trace);
    }

    /// Returns whether the channel is flagged.
    pub fn is_flagged(&self) -> bool {
        self.flagged
    }

    /// Flip the channel flag and returns the new value.
    pub fn toggle_flag(&mut self) -> bool {
        self.flagged = !self.flagged;
        self.flagged
    }

    /// Returns the mean and standard deviation of the samples at or below the p-th percentile, for every
    /// representation except `filtered`, keyed `<repr>_mean` and `<repr>_sd`.
    pub fn noise_statistics(&self, p: f64) -> Result<BTreeMap<String, f64>> {
        let mut stats = BTreeMap::new();
        for repr in Representation::NORMALIZATIONS {
            let trace = self.trace(repr)?;
            let level = percentile(trace, p)?;
            let noise = trace
                .iter()
                .copied()
                .filter(|x| *x <= level)
                .collect::<Vec<f64>>();
            stats.insert(format!("{}_mean", repr), mean(&noise));
            stats.insert(format!("{}_sd", repr), std_dev(&noise));
        }
        Ok(stats)
    }
}
