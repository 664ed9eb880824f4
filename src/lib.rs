//! This crate provides tools for annotating transient events (e.g., calcium-imaging transients) in
//! per-channel traces and characterizing them by their rise and decay time constants.
//!
//! # Importing Traces
//!
//! Each channel is normalized at ingestion: the baseline-normalized `df`, the z-scored `z` and the
//! min-max-normalized `min_max` representations are stored next to the raw samples.
//!
//! ```rust
//! use rusty_tau::store::DataSet;
//! use rusty_tau::signal::Representation;
//!
//! let mut data = DataSet::new("recording", 10.0, 5.0).unwrap();
//! let raw = (0..100).map(|i| 100.0 + (i as f64 / 5.0).sin()).collect();
//! data.add_channel_trace("roi_0", raw).unwrap();
//!
//! let channel = data.channel("roi_0").unwrap();
//! assert_eq!(channel.trace(Representation::MinMax).unwrap().len(), 100);
//! ```
//!
//! # Annotating Events
//!
//! An annotation has two phases. First, three boundary points (start, center and end of the event) are
//! clicked and snapped onto samples of the displayed trace. Second, two points are placed on the guide
//! lines derived from the boundary to read the empirical time constants. Committing the event fits the
//! rise and decay phases with exponentials.
//!
//! ```rust
//! use rusty_tau::collection::PointerClick;
//! use rusty_tau::session::{AdvanceOutcome, Session};
//! use rusty_tau::store::DataSet;
//!
//! let mut data = DataSet::new("recording", 10.0, 5.0).unwrap();
//! let raw = (0..100)
//!     .map(|i| {
//!         let t = i as f64 / 10.0;
//!         match t {
//!             t if t < 1.0 => 100.0,
//!             t if t < 1.5 => 100.0 + 50.0 * (1.0 - (-(t - 1.0) / 0.2).exp()),
//!             t => 100.0 + 50.0 * (1.0 - (-0.5_f64 / 0.2).exp()) * (-(t - 1.5) / 0.3).exp(),
//!         }
//!     })
//!     .collect();
//! data.add_channel_trace("roi_0", raw).unwrap();
//!
//! let mut session = Session::new(data, 42).unwrap();
//! session.begin_annotation().unwrap();
//! for t in [1.0, 1.5, 2.0] {
//!     session.handle_click(&PointerClick::at(t, 0.0));
//! }
//! let AdvanceOutcome::TauPhase(guides) = session.advance().unwrap() else { panic!() };
//!
//! session.handle_click(&PointerClick::at(1.2, guides.rise.y));
//! session.handle_click(&PointerClick::at(1.8, guides.decay.y));
//! assert_eq!(session.advance(), Ok(AdvanceOutcome::Committed(0)));
//! ```

pub mod collection;
pub mod error;
pub mod event;
pub mod fit;
pub mod io;
pub mod points;
pub mod session;
pub mod settings;
pub mod signal;
pub mod store;
pub mod utils;

/// The default percentile of the raw samples used as the df baseline.
pub const DEFAULT_FBS_PERCENTILE: f64 = 5.0;
/// The number of boundary points of an event (start, center and end).
pub const BOUNDARY_POINTS_LIMIT: usize = 3;
/// The number of points placed on the tau guides (rise and decay).
pub const TAU_POINTS_LIMIT: usize = 2;
