//! The annotation session: the state machine driving the two collection phases, the fit and the commit
//! of events, together with the view state (active channel, representation and filter) it depends on.
//!
//! ```text
//! Idle --begin_annotation--> CollectingBoundaryPoints --advance (3 points)--> CollectingTauPoints
//!  ^                                                                                  |
//!  +---------------------- advance (2 points): commit, or cancel ---------------------+
//! ```
//!
//! Changing the channel, the representation or the filter while a session is live cancels it, since
//! the collected points were snapped onto the trace that was displayed.
use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::collection::{
    ClickOutcome, GuideLines, PointCollectionMode, PointerClick, SnapToSamples, TauCollectionMode,
    TauValues,
};
use crate::error::{Result, TauError};
use crate::event::{channel_peak_amplitudes, peak_amplitudes, Event, PenColors};
use crate::fit::{check_event_indices, fit_phase_window, ExpModel, PhaseFit};
use crate::points::SamplePoint;
use crate::signal::{filter_width, moving_average, Representation};
use crate::store::DataSet;
use crate::utils::ensure_finite;

/// The phase of the annotation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationPhase {
    Idle,
    CollectingBoundaryPoints,
    CollectingTauPoints,
}

/// What is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    /// Position of the active channel.
    pub channel: usize,
    pub representation: Representation,
    pub filter_active: bool,
}

/// The result of [`Session::advance`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdvanceOutcome {
    /// No annotation in progress.
    NoSession,
    /// The current phase still needs points.
    Waiting,
    /// The boundary points are frozen and the tau phase started with these guides.
    TauPhase(GuideLines),
    /// The event was committed with this id.
    Committed(usize),
}

/// An interactive annotation session over a data set.
#[derive(Debug, Clone)]
pub struct Session {
    data: DataSet,
    view: ViewState,
    boundary: PointCollectionMode,
    tau: TauCollectionMode,
    rng: ChaCha8Rng,
}

/// Returns the index of the boundary point on the time axis, by exact equality of the times.
fn resolve_index(time_axis: &[f64], point: &SamplePoint) -> Result<usize> {
    if time_axis.get(point.index) == Some(&point.time) {
        return Ok(point.index);
    }
    time_axis
        .iter()
        .position(|&t| t == point.time)
        .ok_or(TauError::TimeNotOnAxis(point.time))
}

impl Session {
    /// Create a session on the first channel of a non-empty data set, showing the raw trace.
    /// The seed drives the event colors.
    pub fn new(data: DataSet, seed: u64) -> Result<Self> {
        if data.num_channels() == 0 {
            return Err(TauError::InvalidOperation(
                "Cannot annotate a data set without channels".to_string(),
            ));
        }
        let mut session = Session {
            data,
            view: ViewState {
                channel: 0,
                representation: Representation::Raw,
                filter_active: false,
            },
            boundary: PointCollectionMode::boundary(),
            tau: TauCollectionMode::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        session.refresh_filter()?;
        Ok(session)
    }

    pub fn data(&self) -> &DataSet {
        &self.data
    }

    /// Consume the session and returns its data set.
    pub fn into_data(self) -> DataSet {
        self.data
    }

    pub fn view(&self) -> ViewState {
        self.view
    }

    /// Returns the key of the active channel.
    pub fn active_key(&self) -> &str {
        self.data.channels()[self.view.channel].key()
    }

    pub fn phase(&self) -> AnnotationPhase {
        if self.tau.is_active() {
            AnnotationPhase::CollectingTauPoints
        } else if self.boundary.is_active() {
            AnnotationPhase::CollectingBoundaryPoints
        } else {
            AnnotationPhase::Idle
        }
    }

    /// Returns the trace shown for the active channel: the filtered one if the filter is on.
    pub fn displayed_trace(&self) -> Result<&[f64]> {
        let channel = &self.data.channels()[self.view.channel];
        match self.view.filter_active {
            true => channel.trace(Representation::Filtered),
            false => channel.trace(self.view.representation),
        }
    }

    /// Returns the boundary points collected so far, in time order.
    pub fn boundary_points(&self) -> Vec<SamplePoint> {
        self.boundary.points()
    }

    /// Returns the tau guides while the tau phase is active.
    pub fn tau_guides(&self) -> Option<GuideLines> {
        self.tau.guides()
    }

    /// Start collecting boundary points on the displayed trace.
    /// Returns false, leaving the live session untouched, if an annotation is already in progress.
    pub fn begin_annotation(&mut self) -> Result<bool> {
        if self.phase() != AnnotationPhase::Idle {
            warn!(
                "Annotation already in progress ({:?}), ignoring the new start",
                self.phase()
            );
            return Ok(false);
        }
        let snap = SnapToSamples::build(
            self.displayed_trace()?.to_vec(),
            self.data.time_axis(self.active_key())?,
        )?;
        self.boundary.start(snap);
        info!("Collecting boundary points on channel {}", self.active_key());
        Ok(true)
    }

    /// Forward a click to the active collection phase.
    pub fn handle_click(&mut self, click: &PointerClick) -> ClickOutcome {
        match self.phase() {
            AnnotationPhase::CollectingBoundaryPoints => self.boundary.handle_click(click),
            AnnotationPhase::CollectingTauPoints => self.tau.handle_click(click),
            AnnotationPhase::Idle => ClickOutcome::Ignored,
        }
    }

    /// Forward a pointer move to the active collection phase.
    pub fn pointer_moved(&mut self, x: f64, y: f64) {
        match self.phase() {
            AnnotationPhase::CollectingBoundaryPoints => self.boundary.pointer_moved(x, y),
            AnnotationPhase::CollectingTauPoints => self.tau.pointer_moved(x, y),
            AnnotationPhase::Idle => {}
        }
    }

    /// Move the annotation forward once the current phase is full.
    ///
    /// From the boundary phase, the three points are frozen and the tau phase starts. From the tau phase,
    /// the event is fitted and committed. A failing commit discards the session and returns the error;
    /// the session is Idle afterwards either way.
    pub fn advance(&mut self) -> Result<AdvanceOutcome> {
        match self.phase() {
            AnnotationPhase::Idle => Ok(AdvanceOutcome::NoSession),
            AnnotationPhase::CollectingBoundaryPoints => {
                let points = self.boundary.points();
                let Ok(boundary) = <[SamplePoint; 3]>::try_from(points) else {
                    return Ok(AdvanceOutcome::Waiting);
                };
                self.boundary.stop();
                let guides = self.tau.start(boundary);
                info!("Collecting tau points on channel {}", self.active_key());
                Ok(AdvanceOutcome::TauPhase(guides))
            }
            AnnotationPhase::CollectingTauPoints => {
                if !self.tau.is_full() {
                    return Ok(AdvanceOutcome::Waiting);
                }
                let values = self.tau.get_tau_values();
                self.tau.stop();
                match values.and_then(|values| self.commit(values)) {
                    Ok(id) => Ok(AdvanceOutcome::Committed(id)),
                    Err(e) => {
                        warn!("Event discarded: {}", e);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Fit one phase, a degenerate window yields no fit.
    fn fit_phase(model: ExpModel, x: &[f64], y: &[f64], lo: usize, hi: usize) -> Result<Option<PhaseFit>> {
        match fit_phase_window(model, x, y, lo, hi) {
            Ok(fit) => Ok(Some(fit)),
            Err(e) if e.is_degenerate() => {
                warn!("{:?} phase not fitted: {}", model, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn commit(&mut self, values: TauValues) -> Result<usize> {
        let key = self.active_key().to_string();
        let sampling_rate = self.data.sampling_rate();
        let time_axis = self.data.time_axis(&key)?;

        let [p1, p2, p3] = &values.boundary;
        let indices = [
            resolve_index(&time_axis, p1)?,
            resolve_index(&time_axis, p2)?,
            resolve_index(&time_axis, p3)?,
        ];
        check_event_indices(indices, time_axis.len())?;
        let [i1, i2, i3] = indices;

        let channel = self.data.channel(&key)?;
        let trace = channel.trace(self.view.representation)?;
        ensure_finite(trace, "The fitted trace")?;
        let rise_fit = Self::fit_phase(ExpModel::Rise, &time_axis, trace, i1, i2)?;
        let decay_fit = Self::fit_phase(ExpModel::Decay, &time_axis, trace, i2, i3)?;

        let mut peaks = channel_peak_amplitudes(channel.traces(), indices)?;
        if self.view.filter_active {
            let width = self
                .data
                .filter_window()
                .map(|w| filter_width(w, sampling_rate))
                .unwrap_or(0);
            for norm in Representation::NORMALIZATIONS {
                let filtered = moving_average(channel.trace(norm)?, width);
                peaks.extend(peak_amplitudes(
                    [(format!("filtered_{}", norm), &filtered[..])],
                    indices,
                )?);
            }
        }

        let event = Event {
            start_idx: i1,
            center_idx: i2,
            end_idx: i3,
            tau: values,
            rise_fit,
            decay_fit,
            peaks,
            colors: PenColors::random(&mut self.rng),
            filter_window: self.data.filter_window(),
            recording_name: self.data.meta().recording_name.clone(),
            sampling_rate,
            norm_mode: self.view.representation,
        };
        if event.is_low_confidence() {
            warn!("Event on channel {} has a low-confidence fit", key);
        }
        debug!(
            "Event [{}, {}, {}] on {}: tau_rise={}, tau_decay={}",
            i1,
            i2,
            i3,
            key,
            event.tau.tau_rise,
            event.tau.tau_decay
        );
        self.data.add_event(&key, event)
    }

    /// Stop any live collection phase without committing. Does nothing when Idle.
    pub fn cancel(&mut self) {
        let phase = self.phase();
        if self.boundary.is_active() {
            self.boundary.stop();
        }
        if self.tau.is_active() {
            self.tau.stop();
        }
        if phase != AnnotationPhase::Idle {
            info!("Annotation cancelled ({:?})", phase);
        }
    }

    fn refresh_filter(&mut self) -> Result<()> {
        let key = self.active_key().to_string();
        self.data
            .apply_moving_average(&key, self.view.representation)
    }

    /// Switch to the channel with the given key, cancelling a live annotation.
    pub fn select_channel(&mut self, key: &str) -> Result<()> {
        let pos = self
            .data
            .channel_keys()
            .iter()
            .position(|k| *k == key)
            .ok_or_else(|| TauError::ChannelNotFound(key.to_string()))?;
        self.select_channel_at(pos)
    }

    fn select_channel_at(&mut self, pos: usize) -> Result<()> {
        self.cancel();
        self.view.channel = pos;
        debug!("Active channel: {}", self.active_key());
        self.refresh_filter()
    }

    /// Switch to the next channel, wrapping around.
    pub fn next_channel(&mut self) -> Result<()> {
        let n = self.data.num_channels();
        self.select_channel_at((self.view.channel + 1) % n)
    }

    /// Switch to the previous channel, wrapping around.
    pub fn prev_channel(&mut self) -> Result<()> {
        let n = self.data.num_channels();
        self.select_channel_at((self.view.channel + n - 1) % n)
    }

    /// Switch the displayed representation, cancelling a live annotation.
    pub fn set_representation(&mut self, representation: Representation) -> Result<()> {
        if representation == Representation::Filtered {
            return Err(TauError::InvalidParameter(
                "Use the filter switch to display the filtered trace".to_string(),
            ));
        }
        self.cancel();
        self.view.representation = representation;
        self.refresh_filter()
    }

    /// Change the filter window (in seconds), cancelling a live annotation.
    pub fn set_filter_window(&mut self, window: Option<f64>) -> Result<()> {
        self.cancel();
        self.data.set_filter_window(window)?;
        self.refresh_filter()
    }

    /// Show or hide the filtered trace, cancelling a live annotation.
    pub fn set_filter_active(&mut self, active: bool) -> Result<()> {
        self.cancel();
        self.view.filter_active = active;
        self.refresh_filter()
    }

    /// Remove an event of the active channel.
    pub fn remove_event(&mut self, event_id: usize) -> Result<Event> {
        let key = self.active_key().to_string();
        self.data.remove_event(&key, event_id)
    }

    /// Toggle the flag of the active channel.
    pub fn toggle_flag(&mut self) -> Result<bool> {
        let key = self.active_key().to_string();
        self.data.toggle_flag(&key)
    }
}
