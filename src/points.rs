//! Bounded collections of (time, value) points.
//!
//! A [`PointCollector`] holds at most `limit` points. Adding beyond the limit is silently ignored; every
//! change is reported as a [`CollectorEvent`] that the owner drains with [`PointCollector::take_events`].
//!
//! # Examples
//!
//! ```
//! use rusty_tau::points::{CollectorEvent, Point, PointCollector};
//!
//! let mut collector = PointCollector::new(2);
//! collector.add(Point::new(1.0, 0.5));
//! collector.add(Point::new(0.2, 0.1));
//! assert!(!collector.add(Point::new(3.0, 0.0)));
//!
//! assert_eq!(collector.count(), 2);
//! assert_eq!(collector.snapshot()[0].time, 0.2);
//! assert!(collector.take_events().contains(&CollectorEvent::Full));
//! ```
use derivative::Derivative;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A point on a trace, located by its time coordinate.
pub trait TimePoint: Clone + PartialEq + Debug {
    fn time(&self) -> f64;
    fn value(&self) -> f64;
}

/// A free (time, value) point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub time: f64,
    pub value: f64,
}

impl Point {
    pub fn new(time: f64, value: f64) -> Self {
        Point { time, value }
    }
}

impl TimePoint for Point {
    fn time(&self) -> f64 {
        self.time
    }

    fn value(&self) -> f64 {
        self.value
    }
}

/// A point lying exactly on a sample of a trace.
/// The sample index is kept alongside the time so that it never has to be recovered by search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub index: usize,
    pub time: f64,
    pub value: f64,
}

impl TimePoint for SamplePoint {
    fn time(&self) -> f64 {
        self.time
    }

    fn value(&self) -> f64 {
        self.value
    }
}

/// Changes reported by a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorEvent {
    PointAdded,
    PointRemoved,
    Full,
    NotFull,
    Empty,
}

/// A bounded set of points, kept in insertion order and read back sorted by time.
#[derive(Derivative, Clone)]
#[derivative(Debug, PartialEq)]
pub struct PointCollector<P: TimePoint> {
    points: Vec<P>,
    limit: usize,
    #[derivative(PartialEq = "ignore")]
    events: Vec<CollectorEvent>,
}

impl<P: TimePoint> PointCollector<P> {
    /// Create an empty collector holding at most `limit` points.
    pub fn new(limit: usize) -> Self {
        PointCollector {
            points: Vec::with_capacity(limit),
            limit,
            events: vec![],
        }
    }

    /// Returns the capacity of the collector.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the number of points held.
    pub fn count(&self) -> usize {
        self.points.len()
    }

    pub fn is_full(&self) -> bool {
        self.points.len() >= self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn emit_state(&mut self) {
        match self.is_full() {
            true => self.events.push(CollectorEvent::Full),
            false => self.events.push(CollectorEvent::NotFull),
        }
        if self.is_empty() {
            self.events.push(CollectorEvent::Empty);
        }
    }

    /// Add a point, returns false (without any notification) if the collector is already full.
    pub fn add(&mut self, point: P) -> bool {
        if self.is_full() {
            debug!(
                "Point at t={} ignored, collector is full ({} points)",
                point.time(),
                self.limit
            );
            return false;
        }
        self.points.push(point);
        self.events.push(CollectorEvent::PointAdded);
        self.emit_state();
        true
    }

    /// Remove the point at the given insertion position, if any.
    pub fn remove_by_index(&mut self, index: usize) -> Option<P> {
        if index >= self.points.len() {
            debug!("No point at position {} to remove", index);
            return None;
        }
        let point = self.points.remove(index);
        self.events.push(CollectorEvent::PointRemoved);
        self.emit_state();
        Some(point)
    }

    /// Remove every point equal to the given one, returns the number of points removed.
    pub fn remove_matching(&mut self, point: &P) -> usize {
        let before = self.points.len();
        self.points.retain(|p| p != point);
        let removed = before - self.points.len();
        if removed > 0 {
            self.events.push(CollectorEvent::PointRemoved);
            self.emit_state();
        }
        removed
    }

    /// Remove all points.
    pub fn clear(&mut self) {
        self.points.clear();
        self.events.push(CollectorEvent::NotFull);
        self.events.push(CollectorEvent::Empty);
    }

    /// Returns the insertion position of the given point, if held.
    pub fn position_of(&self, point: &P) -> Option<usize> {
        self.points.iter().position(|p| p == point)
    }

    /// Returns the points sorted by ascending time; points with equal times keep their insertion order.
    pub fn snapshot(&self) -> Vec<P> {
        let mut points = self.points.clone();
        points.sort_by(|a, b| a.time().total_cmp(&b.time()));
        points
    }

    /// Drain the notifications emitted since the last call.
    pub fn take_events(&mut self) -> Vec<CollectorEvent> {
        std::mem::take(&mut self.events)
    }
}
