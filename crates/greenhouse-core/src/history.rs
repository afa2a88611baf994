//! Bounded per-metric history.
//!
//! Each metric keeps at most [`HistoryRecorder::capacity`] points (24 by
//! default, one day at the hourly cadence). Appending to a full sequence
//! evicts the oldest point. Timestamps within a metric never go backwards:
//! a point stamped earlier than its predecessor takes the predecessor's time.

use std::collections::{BTreeMap, VecDeque};

use greenhouse_types::{HistoryPoint, Metric, Reading, round1};
use rand::Rng;
use time::{Duration, OffsetDateTime, Time};

use crate::synthesizer::jitter;

/// Default number of points kept per metric.
pub const DEFAULT_CAPACITY: usize = 24;

#[derive(Debug, Clone)]
pub struct HistoryRecorder {
    series: BTreeMap<Metric, VecDeque<HistoryPoint>>,
    capacity: usize,
}

impl Default for HistoryRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl HistoryRecorder {
    /// Create a recorder keeping `capacity` points per metric (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            series: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one point per metric present in `reading`.
    pub fn record(&mut self, reading: &Reading, at: OffsetDateTime) {
        for (metric, value) in reading.iter() {
            self.push(metric, at, value);
        }
    }

    fn push(&mut self, metric: Metric, at: OffsetDateTime, value: f64) {
        let capacity = self.capacity;
        let series = self
            .series
            .entry(metric)
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        let timestamp = series.back().map_or(at, |last| at.max(last.timestamp));
        series.push_back(HistoryPoint { timestamp, value });
        while series.len() > capacity {
            series.pop_front();
        }
    }

    /// Points of a metric, oldest first. Empty for an unknown metric name.
    pub fn query(&self, metric: &str) -> Vec<HistoryPoint> {
        metric
            .parse::<Metric>()
            .map(|m| self.points(m))
            .unwrap_or_default()
    }

    /// Points of a metric, oldest first.
    pub fn points(&self, metric: Metric) -> Vec<HistoryPoint> {
        self.series
            .get(&metric)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, metric: Metric) -> usize {
        self.series.get(&metric).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(VecDeque::is_empty)
    }

    /// Seed the core metrics with one point per hour for the last
    /// `capacity` hours, scattered around `base`.
    ///
    /// Timestamps are truncated to the hour.
    pub fn backfill<R: Rng + ?Sized>(&mut self, base: &Reading, now: OffsetDateTime, rng: &mut R) {
        let hour = now.replace_time(Time::MIDNIGHT) + Duration::hours(i64::from(now.hour()));
        for i in (1..=self.capacity).rev() {
            let at = hour - Duration::hours(i as i64);
            for metric in Metric::CORE {
                let Some(center) = base.get(metric) else {
                    continue;
                };
                let value = metric.clamp_value(round1(center + jitter(rng, backfill_spread(metric))));
                self.push(metric, at, value);
            }
        }
    }
}

fn backfill_spread(metric: Metric) -> f64 {
    match metric {
        Metric::Temperature => 2.0,
        Metric::Humidity => 5.0,
        Metric::Power => 10.0,
        Metric::Soil => 3.0,
        Metric::Co2 | Metric::Light => 0.0,
    }
}
