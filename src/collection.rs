//! Pointer-driven point collection, the two phases of an annotation.
//!
//! In the first phase ([`PointCollectionMode`]) the operator places three boundary points (start, center
//! and end of an event), each snapped onto a sample of the displayed trace. In the second phase
//! ([`TauCollectionMode`]) two guide lines are derived from the boundary points and the operator places
//! two free points on them, from which the empirical rise and decay time constants are read.
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TauError};
use crate::points::{CollectorEvent, Point, PointCollector, SamplePoint, TimePoint};
use crate::{BOUNDARY_POINTS_LIMIT, TAU_POINTS_LIMIT};

/// Modifier keys held during a click.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub remove: bool,
}

/// A click, already mapped into the data coordinates of the plot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerClick {
    pub x: f64,
    pub y: f64,
    pub inside_plot: bool,
    pub modifiers: Modifiers,
    /// Position (in time order) of the plotted point under the pointer, if any.
    pub hit: Option<usize>,
}

impl PointerClick {
    /// A plain click inside the plot.
    pub fn at(x: f64, y: f64) -> Self {
        PointerClick {
            x,
            y,
            inside_plot: true,
            modifiers: Modifiers::default(),
            hit: None,
        }
    }

    pub fn with_remove(mut self) -> Self {
        self.modifiers.remove = true;
        self
    }

    pub fn on_point(mut self, position: usize) -> Self {
        self.hit = Some(position);
        self
    }

    pub fn outside(mut self) -> Self {
        self.inside_plot = false;
        self
    }
}

/// What a click did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    Added,
    Removed,
    Ignored,
}

/// The pointer-tracking crosshair shown while a mode is active.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Crosshair {
    pub active: bool,
    pub position: Option<(f64, f64)>,
}

/// Converts a click position into a point.
pub trait Placement {
    type Point: TimePoint;

    /// Returns the point for a click at (x, y), or None if the click cannot be placed.
    fn place(&self, x: f64, y: f64) -> Option<Self::Point>;
}

/// Places points on the nearest sample of a trace.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapToSamples {
    trace: Vec<f64>,
    time_axis: Vec<f64>,
}

impl SnapToSamples {
    /// Snap onto the given trace and its time axis, which must have the same non-zero length.
    pub fn build(trace: Vec<f64>, time_axis: Vec<f64>) -> Result<Self> {
        if trace.len() != time_axis.len() {
            return Err(TauError::InvalidParameter(format!(
                "Trace of {} samples on a time axis of {} samples",
                trace.len(),
                time_axis.len()
            )));
        }
        if trace.is_empty() {
            return Err(TauError::InsufficientSamples(
                "Cannot snap onto an empty trace".to_string(),
            ));
        }
        Ok(SnapToSamples { trace, time_axis })
    }

    /// Returns the sample nearest to time x. Ties go to the later sample; times outside the axis
    /// snap to its first or last sample; NaN does not snap.
    pub fn snap(&self, x: f64) -> Option<SamplePoint> {
        if x.is_nan() {
            return None;
        }
        let after = self.time_axis.partition_point(|&t| t < x);
        let index = match after {
            0 => 0,
            n if n == self.time_axis.len() => n - 1,
            n => match x - self.time_axis[n - 1] < self.time_axis[n] - x {
                true => n - 1,
                false => n,
            },
        };
        Some(SamplePoint {
            index,
            time: self.time_axis[index],
            value: self.trace[index],
        })
    }
}

impl Placement for SnapToSamples {
    type Point = SamplePoint;

    fn place(&self, x: f64, _y: f64) -> Option<SamplePoint> {
        self.snap(x)
    }
}

/// Accepts the click coordinates as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FreePlacement;

impl Placement for FreePlacement {
    type Point = Point;

    fn place(&self, x: f64, y: f64) -> Option<Point> {
        match x.is_finite() && y.is_finite() {
            true => Some(Point::new(x, y)),
            false => None,
        }
    }
}

/// A point collector listening to clicks while active.
#[derive(Debug, Clone)]
pub struct CollectionMode<S: Placement> {
    collector: PointCollector<S::Point>,
    placement: Option<S>,
    crosshair: Crosshair,
}

/// The boundary phase: up to three points snapped onto the displayed trace.
pub type PointCollectionMode = CollectionMode<SnapToSamples>;

impl<S: Placement> CollectionMode<S> {
    /// Create an inactive mode collecting up to `limit` points.
    pub fn new(limit: usize) -> Self {
        CollectionMode {
            collector: PointCollector::new(limit),
            placement: None,
            crosshair: Crosshair::default(),
        }
    }

    /// Start listening to clicks, placing points with the given rule.
    pub fn start(&mut self, placement: S) {
        self.placement = Some(placement);
        self.crosshair = Crosshair {
            active: true,
            position: None,
        };
    }

    /// Stop listening to clicks and discard the collected points.
    pub fn stop(&mut self) {
        self.placement = None;
        self.crosshair = Crosshair::default();
        self.collector.clear();
    }

    pub fn is_active(&self) -> bool {
        self.placement.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.collector.is_full()
    }

    /// Returns the collected points sorted by time.
    pub fn points(&self) -> Vec<S::Point> {
        self.collector.snapshot()
    }

    pub fn crosshair(&self) -> Crosshair {
        self.crosshair
    }

    /// Drain the collector notifications.
    pub fn take_events(&mut self) -> Vec<CollectorEvent> {
        self.collector.take_events()
    }

    /// Track the pointer with the crosshair.
    pub fn pointer_moved(&mut self, x: f64, y: f64) {
        if self.crosshair.active {
            self.crosshair.position = Some((x, y));
        }
    }

    /// Handle a click: add a point, or remove the point under the pointer if the remove modifier is held.
    pub fn handle_click(&mut self, click: &PointerClick) -> ClickOutcome {
        let placement = match (&self.placement, click.inside_plot) {
            (Some(placement), true) => placement,
            _ => return ClickOutcome::Ignored,
        };

        if click.modifiers.remove {
            let target = click
                .hit
                .and_then(|pos| self.collector.snapshot().get(pos).cloned())
                .and_then(|point| self.collector.position_of(&point));
            return match target.and_then(|index| self.collector.remove_by_index(index)) {
                Some(point) => {
                    debug!("Point at t={} removed", point.time());
                    ClickOutcome::Removed
                }
                None => ClickOutcome::Ignored,
            };
        }

        match placement.place(click.x, click.y) {
            Some(point) => match self.collector.add(point) {
                true => ClickOutcome::Added,
                false => ClickOutcome::Ignored,
            },
            None => ClickOutcome::Ignored,
        }
    }
}

impl PointCollectionMode {
    /// An inactive boundary phase.
    pub fn boundary() -> Self {
        CollectionMode::new(BOUNDARY_POINTS_LIMIT)
    }
}

/// A horizontal guide segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuideLine {
    pub t_start: f64,
    pub t_end: f64,
    pub y: f64,
}

/// The rise and decay guides derived from the boundary points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuideLines {
    pub rise: GuideLine,
    pub decay: GuideLine,
}

impl GuideLines {
    /// The rise guide lies at 1 - 1/e of the way from p1 up to p2, over [p1.t, p2.t]; the decay guide at
    /// 1/e of the way from p3 up to p2, over [p2.t, p3.t].
    pub fn from_boundary<P: TimePoint>(p1: &P, p2: &P, p3: &P) -> Self {
        let e_inv = (-1.0_f64).exp();
        GuideLines {
            rise: GuideLine {
                t_start: p1.time(),
                t_end: p2.time(),
                y: p1.value() + (1.0 - e_inv) * (p2.value() - p1.value()).abs(),
            },
            decay: GuideLine {
                t_start: p2.time(),
                t_end: p3.time(),
                y: p3.value() + e_inv * (p3.value() - p2.value()).abs(),
            },
        }
    }
}

/// The empirical time constants read from the tau points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TauValues {
    pub tau_rise: f64,
    pub tau_decay: f64,
    /// The boundary points p1, p2, p3 in time order.
    pub boundary: [SamplePoint; 3],
    pub rise_point: Point,
    pub decay_point: Point,
}

/// The tau phase: two free points placed on the guide lines.
#[derive(Debug, Clone)]
pub struct TauCollectionMode {
    mode: CollectionMode<FreePlacement>,
    boundary: Option<[SamplePoint; 3]>,
    guides: Option<GuideLines>,
}

impl Default for TauCollectionMode {
    fn default() -> Self {
        TauCollectionMode {
            mode: CollectionMode::new(TAU_POINTS_LIMIT),
            boundary: None,
            guides: None,
        }
    }
}

impl TauCollectionMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the phase from the boundary points, in any order.
    pub fn start(&mut self, mut boundary: [SamplePoint; 3]) -> GuideLines {
        boundary.sort_by(|a, b| a.time.total_cmp(&b.time));
        let [p1, p2, p3] = &boundary;
        let guides = GuideLines::from_boundary(p1, p2, p3);
        info!(
            "Tau guides: rise y={} over [{}, {}], decay y={} over [{}, {}]",
            guides.rise.y,
            guides.rise.t_start,
            guides.rise.t_end,
            guides.decay.y,
            guides.decay.t_start,
            guides.decay.t_end
        );
        self.boundary = Some(boundary);
        self.guides = Some(guides);
        self.mode.start(FreePlacement);
        guides
    }

    /// Stop listening and discard the points, the boundary and the guides.
    pub fn stop(&mut self) {
        self.mode.stop();
        self.boundary = None;
        self.guides = None;
    }

    pub fn is_active(&self) -> bool {
        self.mode.is_active()
    }

    pub fn is_full(&self) -> bool {
        self.mode.is_full()
    }

    pub fn guides(&self) -> Option<GuideLines> {
        self.guides
    }

    pub fn points(&self) -> Vec<Point> {
        self.mode.points()
    }

    pub fn crosshair(&self) -> Crosshair {
        self.mode.crosshair()
    }

    pub fn take_events(&mut self) -> Vec<CollectorEvent> {
        self.mode.take_events()
    }

    pub fn pointer_moved(&mut self, x: f64, y: f64) {
        self.mode.pointer_moved(x, y)
    }

    pub fn handle_click(&mut self, click: &PointerClick) -> ClickOutcome {
        self.mode.handle_click(click)
    }

    /// Returns the empirical time constants.
    ///
    /// The earlier of the two points is taken as the rise point and the later one as the decay point,
    /// whichever guide they were placed on. The function returns an error unless exactly two points are held.
    pub fn get_tau_values(&self) -> Result<TauValues> {
        let boundary = self.boundary.ok_or_else(|| {
            TauError::InvalidOperation("Tau collection has not been started".to_string())
        })?;
        let points = self.mode.points();
        let &[rise_point, decay_point] = points.as_slice() else {
            return Err(TauError::InvalidOperation(format!(
                "Tau values need exactly {} points, got {}",
                TAU_POINTS_LIMIT,
                points.len()
            )));
        };

        Ok(TauValues {
            tau_rise: rise_point.time - boundary[0].time,
            tau_decay: decay_point.time - boundary[1].time,
            boundary,
            rise_point,
            decay_point,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::signal::time_axis;

    fn snapper() -> SnapToSamples {
        let axis = time_axis(100, 10.0);
        let trace = axis.iter().map(|t| (t * 0.7).sin()).collect();
        SnapToSamples::build(trace, axis).unwrap()
    }

    fn sample(index: usize, time: f64, value: f64) -> SamplePoint {
        SamplePoint { index, time, value }
    }

    #[test]
    fn test_snap_nearest() {
        let snap = snapper();
        assert_eq!(snap.snap(1.0).unwrap().index, 10);
        assert_eq!(snap.snap(1.04).unwrap().index, 10);
        assert_eq!(snap.snap(1.06).unwrap().index, 11);
        assert_eq!(snap.snap(-3.0).unwrap().index, 0);
        assert_eq!(snap.snap(42.0).unwrap().index, 99);
        assert_eq!(snap.snap(f64::NAN), None);
    }

    #[test]
    fn test_snap_tie_goes_to_later_sample() {
        let snap = SnapToSamples::build(vec![0.0, 1.0], vec![0.0, 0.5]).unwrap();
        assert_eq!(snap.snap(0.25).unwrap().index, 1);
    }

    #[test]
    fn test_snap_round_trip() {
        let snap = snapper();
        let axis = time_axis(100, 10.0);
        for k in 0..=400 {
            let t = k as f64 * 0.02477;
            let point = snap.snap(t).unwrap();
            let found = axis.iter().position(|&s| s == point.time);
            assert_eq!(found, Some(point.index));
            assert_eq!(point.value, snap.trace[point.index]);
        }
    }

    #[test]
    fn test_point_collection_mode() {
        let mut mode = PointCollectionMode::boundary();
        assert_eq!(mode.handle_click(&PointerClick::at(1.0, 0.0)), ClickOutcome::Ignored);

        mode.start(snapper());
        assert!(mode.crosshair().active);
        mode.pointer_moved(0.3, 0.1);
        assert_eq!(mode.crosshair().position, Some((0.3, 0.1)));

        assert_eq!(mode.handle_click(&PointerClick::at(2.0, 0.0)), ClickOutcome::Added);
        assert_eq!(mode.handle_click(&PointerClick::at(1.0, 0.0)), ClickOutcome::Added);
        assert_eq!(
            mode.handle_click(&PointerClick::at(1.5, 0.0).outside()),
            ClickOutcome::Ignored
        );
        assert_eq!(mode.handle_click(&PointerClick::at(1.5, 0.0)), ClickOutcome::Added);
        assert!(mode.is_full());
        assert_eq!(mode.handle_click(&PointerClick::at(3.0, 0.0)), ClickOutcome::Ignored);

        let indices = mode.points().iter().map(|p| p.index).collect::<Vec<usize>>();
        assert_eq!(indices, vec![10, 15, 20]);

        // the hit position refers to the time-sorted points
        assert_eq!(
            mode.handle_click(&PointerClick::at(0.0, 0.0).with_remove().on_point(0)),
            ClickOutcome::Removed
        );
        let indices = mode.points().iter().map(|p| p.index).collect::<Vec<usize>>();
        assert_eq!(indices, vec![15, 20]);
        assert_eq!(
            mode.handle_click(&PointerClick::at(0.0, 0.0).with_remove()),
            ClickOutcome::Ignored
        );

        mode.stop();
        assert!(!mode.is_active());
        assert!(!mode.crosshair().active);
        assert!(mode.points().is_empty());
    }

    #[test]
    fn test_guide_lines() {
        let guides = GuideLines::from_boundary(
            &Point::new(0.0, 0.0),
            &Point::new(1.0, 10.0),
            &Point::new(2.0, 0.0),
        );
        assert_relative_eq!(guides.rise.y, 6.321205588285577, epsilon = 1e-12);
        assert_relative_eq!(guides.decay.y, 3.678794411714423, epsilon = 1e-12);
        assert_eq!((guides.rise.t_start, guides.rise.t_end), (0.0, 1.0));
        assert_eq!((guides.decay.t_start, guides.decay.t_end), (1.0, 2.0));
    }

    #[test]
    fn test_tau_values() {
        let mut mode = TauCollectionMode::new();
        assert!(mode.get_tau_values().is_err());

        mode.start([
            sample(20, 2.0, 0.0),
            sample(10, 1.0, 0.0),
            sample(15, 1.5, 10.0),
        ]);
        mode.handle_click(&PointerClick::at(1.8, 3.7));
        assert!(matches!(
            mode.get_tau_values(),
            Err(TauError::InvalidOperation(_))
        ));
        mode.handle_click(&PointerClick::at(1.2, 6.3));
        assert!(mode.is_full());

        let tau = mode.get_tau_values().unwrap();
        assert_relative_eq!(tau.tau_rise, 0.2, epsilon = 1e-12);
        assert_relative_eq!(tau.tau_decay, 0.3, epsilon = 1e-12);
        assert_eq!(tau.boundary[0].index, 10);
        assert_eq!(tau.rise_point, Point::new(1.2, 6.3));

        mode.stop();
        assert_eq!(mode.guides(), None);
        assert!(mode.get_tau_values().is_err());
    }

    #[test]
    fn test_tau_labels_are_positional() {
        // documented quirk: both points on the decay guide still yield a "rise" point
        let mut mode = TauCollectionMode::new();
        let guides = mode.start([
            sample(10, 1.0, 0.0),
            sample(15, 1.5, 10.0),
            sample(20, 2.0, 0.0),
        ]);
        mode.handle_click(&PointerClick::at(1.9, guides.decay.y));
        mode.handle_click(&PointerClick::at(1.7, guides.decay.y));

        let tau = mode.get_tau_values().unwrap();
        assert_relative_eq!(tau.tau_rise, 0.7, epsilon = 1e-12);
        assert_relative_eq!(tau.tau_decay, 0.4, epsilon = 1e-12);
    }
}
