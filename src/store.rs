//! The per-session event store: all channels of a recording, their events, and the session metadata.
//!
//! # Examples
//!
//! ```
//! use rusty_tau::store::DataSet;
//!
//! let mut data = DataSet::new("recording", 10.0, 5.0).unwrap();
//! data.add_channel_trace("roi_0", vec![1.0, 2.0, 4.0, 2.0, 1.0]).unwrap();
//! data.add_channel_trace("roi_1", vec![3.0, 1.0, 2.0, 5.0, 3.0]).unwrap();
//!
//! assert_eq!(data.channel_keys(), vec!["roi_0", "roi_1"]);
//! assert_eq!(data.time_axis("roi_1").unwrap()[4], 0.4);
//! assert!(data.channel("roi_2").is_err());
//! ```
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Result, TauError};
use crate::event::Event;
use crate::fit::{GoodnessOfFit, PhaseFit};
use crate::signal::{AuxTrace, Channel, Representation, Stimulus};

/// Session-level information shared by all channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub recording_name: String,
    /// Sampling rate of every channel, in Hz.
    pub sampling_rate: f64,
    /// The percentile used for the df baseline.
    pub fbs_percentile: f64,
    pub stimulus: Option<Stimulus>,
    /// Free-form metadata merged into every exported event row.
    pub metadata: BTreeMap<String, Value>,
}

/// Goodness of fit of the two phases of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub channel: String,
    pub event: usize,
    pub norm_mode: Representation,
    pub rise: Option<GoodnessOfFit>,
    pub decay: Option<GoodnessOfFit>,
}

/// All channels of a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    meta: SessionMeta,
    channels: Vec<Channel>,
    /// The moving-average window, in seconds.
    filter_window: Option<f64>,
}

impl DataSet {
    /// Create an empty data set.
    pub fn new(recording_name: &str, sampling_rate: f64, fbs_percentile: f64) -> Result<Self> {
        if !(sampling_rate > 0.0 && sampling_rate.is_finite()) {
            return Err(TauError::InvalidParameter(format!(
                "Sampling rate must be positive, got {}",
                sampling_rate
            )));
        }
        if !(0.0..=100.0).contains(&fbs_percentile) {
            return Err(TauError::InvalidParameter(format!(
                "Baseline percentile must be in [0, 100], got {}",
                fbs_percentile
            )));
        }
        Ok(DataSet {
            meta: SessionMeta {
                recording_name: recording_name.to_string(),
                sampling_rate,
                fbs_percentile,
                stimulus: None,
                metadata: BTreeMap::new(),
            },
            channels: vec![],
            filter_window: None,
        })
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub fn sampling_rate(&self) -> f64 {
        self.meta.sampling_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Returns the channel keys in order.
    pub fn channel_keys(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.key()).collect()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Add a channel from its raw samples; the key must be new.
    pub fn add_channel_trace(&mut self, key: &str, raw: Vec<f64>) -> Result<()> {
        if self.channels.iter().any(|c| c.key() == key) {
            return Err(TauError::InvalidParameter(format!(
                "Channel {} already exists",
                key
            )));
        }
        let channel = Channel::new(key, raw, self.meta.fbs_percentile)?;
        self.channels.push(channel);
        Ok(())
    }

    fn position(&self, key: &str) -> Result<usize> {
        self.channels
            .iter()
            .position(|c| c.key() == key)
            .ok_or_else(|| TauError::ChannelNotFound(key.to_string()))
    }

    pub fn channel(&self, key: &str) -> Result<&Channel> {
        Ok(&self.channels[self.position(key)?])
    }

    pub fn channel_mut(&mut self, key: &str) -> Result<&mut Channel> {
        let pos = self.position(key)?;
        Ok(&mut self.channels[pos])
    }

    /// Returns the time axis of a channel.
    pub fn time_axis(&self, key: &str) -> Result<Vec<f64>> {
        Ok(self.channel(key)?.time_axis(self.meta.sampling_rate))
    }

    pub fn filter_window(&self) -> Option<f64> {
        self.filter_window
    }

    /// Set the moving-average window in seconds; None disables filtering.
    pub fn set_filter_window(&mut self, window: Option<f64>) -> Result<()> {
        if let Some(w) = window {
            if !(w >= 0.0 && w.is_finite()) {
                return Err(TauError::InvalidParameter(format!(
                    "Filter window must be a non-negative number of seconds, got {}",
                    w
                )));
            }
        }
        self.filter_window = window;
        Ok(())
    }

    /// Recompute the filtered trace of a channel from the given representation with the current window.
    pub fn apply_moving_average(&mut self, key: &str, source: Representation) -> Result<()> {
        let (window, sampling_rate) = (self.filter_window, self.meta.sampling_rate);
        self.channel_mut(key)?
            .apply_moving_average(source, window, sampling_rate)
    }

    /// Append an event to a channel and returns its id.
    pub fn add_event(&mut self, key: &str, event: Event) -> Result<usize> {
        let id = self.channel_mut(key)?.add_event(event);
        info!("Event {} added to channel {}", id, key);
        Ok(id)
    }

    /// Remove an event; the ids of the following events of the channel shift down by one.
    pub fn remove_event(&mut self, key: &str, event_id: usize) -> Result<Event> {
        let event = self
            .channel_mut(key)?
            .remove_event(event_id)
            .ok_or_else(|| {
                TauError::InvalidParameter(format!("Channel {} has no event {}", key, event_id))
            })?;
        info!("Event {} removed from channel {}", event_id, key);
        Ok(event)
    }

    pub fn num_events(&self, key: &str) -> Result<usize> {
        Ok(self.channel(key)?.num_events())
    }

    /// Flatten every event of every channel into export rows, in channel then id order.
    /// Each row carries the channel key (`roi`), the event id (`event`), the channel baseline
    /// (`f_base_line`), the baseline percentile and the session metadata.
    pub fn event_rows(&self) -> Vec<BTreeMap<String, Value>> {
        self.channels
            .par_iter()
            .map(|channel| {
                channel
                    .events()
                    .iter()
                    .enumerate()
                    .map(|(id, event)| {
                        let mut row = event.to_row();
                        row.insert("roi".to_string(), Value::from(channel.key()));
                        row.insert("event".to_string(), Value::from(id));
                        row.insert(
                            "f_base_line".to_string(),
                            Value::from(channel.traces().fbs()),
                        );
                        row.insert(
                            "fbs_percentile".to_string(),
                            Value::from(self.meta.fbs_percentile),
                        );
                        for (k, v) in self.meta.metadata.iter() {
                            row.insert(k.clone(), v.clone());
                        }
                        row
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }

    /// Noise statistics (see [`Channel::noise_statistics`]) of every channel, in channel order.
    pub fn noise_statistics(&self, p: f64) -> Result<Vec<(String, BTreeMap<String, f64>)>> {
        self.channels
            .par_iter()
            .map(|channel| -> Result<(String, BTreeMap<String, f64>)> {
                Ok((channel.key().to_string(), channel.noise_statistics(p)?))
            })
            .collect()
    }

    /// Flip the flag of a channel and returns the new value.
    pub fn toggle_flag(&mut self, key: &str) -> Result<bool> {
        let flagged = self.channel_mut(key)?.toggle_flag();
        debug!("Channel {} flagged: {}", key, flagged);
        Ok(flagged)
    }

    /// Returns the keys of the flagged channels, in channel order.
    pub fn flagged_channels(&self) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|c| c.is_flagged())
            .map(|c| c.key())
            .collect()
    }

    /// Set the session stimulus.
    pub fn set_stimulus(&mut self, stimulus: Stimulus) {
        self.meta.stimulus = Some(stimulus);
    }

    /// Attach an auxiliary trace to a channel.
    pub fn set_stimulus_trace(&mut self, key: &str, trace: AuxTrace) -> Result<()> {
        self.channel_mut(key)?.set_stimulus_trace(trace);
        Ok(())
    }

    /// Merge metadata into the session; existing keys are overwritten.
    pub fn add_metadata(&mut self, metadata: BTreeMap<String, Value>) {
        self.meta.metadata.extend(metadata);
    }

    /// Goodness of fit of every fitted phase of every event, on the representation the event was
    /// fitted on, in channel then id order.
    pub fn fit_reports(&self) -> Result<Vec<FitReport>> {
        let sampling_rate = self.meta.sampling_rate;
        let reports = self
            .channels
            .par_iter()
            .map(|channel| {
                let time = channel.time_axis(sampling_rate);
                channel
                    .events()
                    .iter()
                    .enumerate()
                    .map(|(id, event)| -> Result<FitReport> {
                        let trace = channel.trace(event.norm_mode)?;
                        let [i1, i2, i3] = event.indices();
                        let evaluate = |fit: &Option<PhaseFit>,
                                        lo: usize,
                                        hi: usize|
                         -> Result<Option<GoodnessOfFit>> {
                            let Some(fit) = fit else {
                                return Ok(None);
                            };
                            let (window_t, window_y) = time
                                .get(lo..hi)
                                .zip(trace.get(lo..hi))
                                .ok_or_else(|| {
                                    TauError::InvalidIndices(format!(
                                        "Window [{}, {}) of event {} is out of range for channel {}",
                                        lo,
                                        hi,
                                        id,
                                        channel.key()
                                    ))
                                })?;
                            GoodnessOfFit::evaluate(fit, window_t, window_y).map(Some)
                        };
                        Ok(FitReport {
                            channel: channel.key().to_string(),
                            event: id,
                            norm_mode: event.norm_mode,
                            rise: evaluate(&event.rise_fit, i1, i2)?,
                            decay: evaluate(&event.decay_fit, i2, i3)?,
                        })
                    })
                    .collect::<Result<Vec<FitReport>>>()
            })
            .collect::<Result<Vec<Vec<FitReport>>>>()?;
        Ok(reports.into_iter().flatten().collect())
    }

    /// Save the data set to a file.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Check the consistency of the data set: a positive sampling rate, unique channel keys, and for every
    /// channel traces of equal length and event indices within them.
    pub fn check(&self) -> Result<()> {
        if !(self.meta.sampling_rate > 0.0 && self.meta.sampling_rate.is_finite()) {
            return Err(TauError::InvalidParameter(format!(
                "Sampling rate must be positive, got {}",
                self.meta.sampling_rate
            )));
        }
        for (pos, channel) in self.channels.iter().enumerate() {
            if self.channels[..pos].iter().any(|c| c.key() == channel.key()) {
                return Err(TauError::InvalidParameter(format!(
                    "Channel {} appears twice",
                    channel.key()
                )));
            }
            channel.check()?;
        }
        Ok(())
    }

    /// Load a data set from a file. The function returns an error if the loaded data set is inconsistent
    /// (see [`DataSet::check`]).
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let data: DataSet = serde_json::from_reader(reader)?;
        data.check()?;
        debug!("Loaded {} channels", data.num_channels());
        Ok(data)
    }
}
