//! User settings, stored as a JSON file.
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Result, TauError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Sampling rate of the traces, in Hz.
    pub sampling_rate: f64,
    /// Sampling rate of the stimulus trace, in Hz.
    pub stimulus_sampling_rate: f64,
    /// Percentile of the raw samples used as the df baseline.
    pub fbs_percentile: f64,
    /// Smallest moving-average window, in seconds.
    pub filter_min: f64,
    /// Largest moving-average window, in seconds.
    pub filter_max: f64,
    /// Initial moving-average window, in seconds.
    pub filter_default: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            sampling_rate: 10.0,
            stimulus_sampling_rate: 100.0,
            fbs_percentile: crate::DEFAULT_FBS_PERCENTILE,
            filter_min: 0.0,
            filter_max: 10.0,
            filter_default: 5.0,
        }
    }
}

impl Settings {
    /// Check that rates are positive, the percentile lies in [0, 100] and the filter range is ordered.
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("sampling_rate", self.sampling_rate),
            ("stimulus_sampling_rate", self.stimulus_sampling_rate),
        ] {
            if !(rate > 0.0 && rate.is_finite()) {
                return Err(TauError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, rate
                )));
            }
        }
        if !(0.0..=100.0).contains(&self.fbs_percentile) {
            return Err(TauError::InvalidParameter(format!(
                "fbs_percentile must be in [0, 100], got {}",
                self.fbs_percentile
            )));
        }
        if !(0.0 <= self.filter_min
            && self.filter_min <= self.filter_default
            && self.filter_default <= self.filter_max)
        {
            return Err(TauError::InvalidParameter(format!(
                "Filter range must satisfy 0 <= min <= default <= max, got {} / {} / {}",
                self.filter_min, self.filter_default, self.filter_max
            )));
        }
        Ok(())
    }

    /// Confine a window to the filter range.
    pub fn clamp_filter_window(&self, window: f64) -> f64 {
        window.clamp(self.filter_min, self.filter_max)
    }

    /// Returns the moving-average window to use: the requested one, or the default window if none is
    /// given, confined to the filter range.
    pub fn filter_window(&self, requested: Option<f64>) -> f64 {
        self.clamp_filter_window(requested.unwrap_or(self.filter_default))
    }

    /// Save the settings to a file.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Load and validate settings from a file; missing fields take their default value.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let settings: Settings = serde_json::from_reader(BufReader::new(file))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a file, falling back to the defaults if the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match path.as_ref().exists() {
            true => {
                info!("Loading settings from {}", path.as_ref().display());
                Self::load_from(path)
            }
            false => {
                warn!(
                    "No settings file at {}, using defaults",
                    path.as_ref().display()
                );
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(Settings::default().validate(), Ok(()));
    }

    #[test]
    fn test_validate() {
        let settings = Settings {
            sampling_rate: 0.0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            filter_default: 12.0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_clamp_filter_window() {
        let settings = Settings::default();
        assert_eq!(settings.clamp_filter_window(-1.0), 0.0);
        assert_eq!(settings.clamp_filter_window(2.5), 2.5);
        assert_eq!(settings.clamp_filter_window(25.0), 10.0);
    }

    #[test]
    fn test_filter_window() {
        let settings = Settings {
            filter_max: 4.0,
            filter_default: 1.5,
            ..Settings::default()
        };
        assert_eq!(settings.filter_window(None), 1.5);
        assert_eq!(settings.filter_window(Some(0.5)), 0.5);
        assert_eq!(settings.filter_window(Some(500.0)), 4.0);
    }

    #[test]
    fn test_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = Settings {
            sampling_rate: 30.0,
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);

        std::fs::write(&path, r#"{"fbs_percentile": 10.0}"#).unwrap();
        let partial = Settings::load_from(&path).unwrap();
        assert_eq!(partial.fbs_percentile, 10.0);
        assert_eq!(partial.sampling_rate, 10.0);

        let missing = dir.path().join("missing.json");
        assert_eq!(Settings::load_or_default(&missing).unwrap(), Settings::default());
    }
}
