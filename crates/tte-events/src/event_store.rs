//! Columnar storage for time-tagged photon events.
//!
//! Arrival times and channel indices are kept as parallel columns sorted by time,
//! so every time-window query is a pair of binary searches. The table is
//! immutable once loaded; only the active/background interval sets and the
//! channel selection change afterwards.

use crate::channels::{ChannelSelection, EnergyBounds};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tte_core::{Error, Result, TimeInterval, TimeIntervalSet};

/// A single detected photon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    /// Arrival time (s, relative to the trigger).
    pub time: f64,
    /// Detector channel index.
    pub channel: usize,
}

/// Per-event dead time of the detector electronics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeadTime {
    /// Dead time (s) after an event in a regular channel.
    pub per_event: f64,
    /// Dead time (s) after an event in the last (overflow) channel.
    pub overflow: f64,
}

impl Default for DeadTime {
    fn default() -> Self {
        Self { per_event: 2.6e-6, overflow: 1.0e-5 }
    }
}

impl DeadTime {
    /// No dead time at all.
    pub fn none() -> Self {
        Self { per_event: 0.0, overflow: 0.0 }
    }
}

/// Sorted, immutable table of photon events plus the live selections.
#[derive(Debug, Clone)]
pub struct EventStore {
    times: Vec<f64>,
    channels: Vec<usize>,
    n_channels: usize,
    span: TimeInterval,
    dead_time: DeadTime,
    ebounds: Option<EnergyBounds>,
    active: TimeIntervalSet,
    background: TimeIntervalSet,
    selection: ChannelSelection,
}

impl EventStore {
    /// Load events from parallel columns.
    ///
    /// Times need not be sorted; they are sorted here (channels travel with them).
    /// Non-finite times, channels `>= n_channels` and events outside an explicit
    /// observation `span` are rejected with [`Error::Data`]. Without `span` the
    /// observation covers `[first, last]` arrival time.
    pub fn from_columns(
        times: Vec<f64>,
        channels: Vec<usize>,
        n_channels: usize,
        span: Option<TimeInterval>,
    ) -> Result<Self> {
        if times.len() != channels.len() {
            return Err(Error::Data(format!(
                "time and channel columns differ in length ({} vs {})",
                times.len(),
                channels.len()
            )));
        }
        if n_channels == 0 {
            return Err(Error::Data("detector must have at least one channel".into()));
        }
        if let Some(i) = times.iter().position(|t| !t.is_finite()) {
            return Err(Error::Data(format!(
                "event {i} has non-finite arrival time {}; times cannot be ordered",
                times[i]
            )));
        }
        if let Some(i) = channels.iter().position(|&c| c >= n_channels) {
            return Err(Error::Data(format!(
                "event {i} has channel {} but the detector has {n_channels} channels",
                channels[i]
            )));
        }

        let (times, channels) = if times.windows(2).all(|w| w[0] <= w[1]) {
            (times, channels)
        } else {
            log::debug!("sorting {} events by arrival time", times.len());
            let mut order: Vec<usize> = (0..times.len()).collect();
            order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));
            (order.iter().map(|&i| times[i]).collect(), order.iter().map(|&i| channels[i]).collect())
        };

        let span = match span {
            Some(span) => {
                if let (Some(&first), Some(&last)) = (times.first(), times.last())
                    && (first < span.start() || last > span.stop())
                {
                    return Err(Error::Data(format!(
                        "events span [{first}, {last}] outside observation {span}"
                    )));
                }
                span
            }
            None => match (times.first(), times.last()) {
                (Some(&first), Some(&last)) if first < last => TimeInterval::new(first, last)?,
                _ => {
                    return Err(Error::Data(
                        "cannot infer observation span from fewer than two distinct times".into(),
                    ));
                }
            },
        };

        Ok(Self {
            times,
            channels,
            n_channels,
            span,
            dead_time: DeadTime::default(),
            ebounds: None,
            active: TimeIntervalSet::default(),
            background: TimeIntervalSet::default(),
            selection: ChannelSelection::all(n_channels),
        })
    }

    /// Load from an iterator of events.
    pub fn load(
        events: impl IntoIterator<Item = Event>,
        n_channels: usize,
        span: Option<TimeInterval>,
    ) -> Result<Self> {
        let (times, channels) = events.into_iter().map(|e| (e.time, e.channel)).unzip();
        Self::from_columns(times, channels, n_channels, span)
    }

    /// Replace the dead-time model.
    pub fn with_dead_time(mut self, dead_time: DeadTime) -> Self {
        self.dead_time = dead_time;
        self
    }

    /// Attach channel energy bounds (needed for energy-range selections).
    pub fn with_energy_bounds(mut self, ebounds: EnergyBounds) -> Result<Self> {
        if ebounds.n_channels() != self.n_channels {
            return Err(Error::Data(format!(
                "energy bounds describe {} channels, events use {}",
                ebounds.n_channels(),
                self.n_channels
            )));
        }
        self.ebounds = Some(ebounds);
        Ok(self)
    }

    /// Number of stored events.
    pub fn n_events(&self) -> usize {
        self.times.len()
    }

    /// Number of detector channels.
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Sorted arrival times.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Channel of each event, aligned with [`Self::times`].
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    /// Observation span.
    pub fn span(&self) -> TimeInterval {
        self.span
    }

    /// Dead-time model.
    pub fn dead_time(&self) -> DeadTime {
        self.dead_time
    }

    /// Channel energy bounds, if attached.
    pub fn energy_bounds(&self) -> Option<&EnergyBounds> {
        self.ebounds.as_ref()
    }

    /// Active (source) intervals.
    pub fn active_intervals(&self) -> &TimeIntervalSet {
        &self.active
    }

    /// Background intervals.
    pub fn background_intervals(&self) -> &TimeIntervalSet {
        &self.background
    }

    /// Current channel selection.
    pub fn channel_selection(&self) -> &ChannelSelection {
        &self.selection
    }

    /// Replace the active intervals. Every interval must lie inside the observation.
    pub fn set_active_intervals(&mut self, intervals: TimeIntervalSet) -> Result<()> {
        self.check_within_span(&intervals, "active")?;
        if intervals.overlaps(&self.background) {
            log::warn!(
                "active intervals {} overlap background intervals {}",
                intervals,
                self.background
            );
        }
        self.active = intervals;
        Ok(())
    }

    /// Replace the background intervals. Every interval must lie inside the observation.
    pub fn set_background_intervals(&mut self, intervals: TimeIntervalSet) -> Result<()> {
        self.check_within_span(&intervals, "background")?;
        if intervals.overlaps(&self.active) {
            log::warn!(
                "background intervals {} overlap active intervals {}",
                intervals,
                self.active
            );
        }
        self.background = intervals;
        Ok(())
    }

    /// Replace the channel selection.
    pub fn set_channel_selection(&mut self, selection: ChannelSelection) -> Result<()> {
        if selection.n_channels() != self.n_channels {
            return Err(Error::Validation(format!(
                "selection covers {} channels, detector has {}",
                selection.n_channels(),
                self.n_channels
            )));
        }
        if selection.count() == 0 {
            return Err(Error::Configuration("channel selection is empty".into()));
        }
        self.selection = selection;
        Ok(())
    }

    /// Parse and apply a channel selection string (see [`ChannelSelection::parse`]).
    pub fn select_channels(&mut self, spec: &str) -> Result<()> {
        let selection = ChannelSelection::parse(spec, self.n_channels, self.ebounds.as_ref())?;
        self.set_channel_selection(selection)
    }

    /// Row range of events with `start <= t < stop`.
    pub fn index_range(&self, interval: &TimeInterval) -> Range<usize> {
        let lo = self.times.partition_point(|&t| t < interval.start());
        let hi = self.times.partition_point(|&t| t < interval.stop());
        lo..hi
    }

    /// Events inside `interval` whose channel is in `channels`.
    ///
    /// The iterator is lazy and can be cloned to restart the scan.
    pub fn events_in<'a>(
        &'a self,
        interval: &TimeInterval,
        channels: &'a ChannelSelection,
    ) -> impl Iterator<Item = Event> + Clone + 'a {
        let range = self.index_range(interval);
        self.times[range.clone()]
            .iter()
            .zip(&self.channels[range])
            .filter(move |(_, c)| channels.contains(**c))
            .map(|(&time, &channel)| Event { time, channel })
    }

    /// Arrival times in `interval` restricted to `channels`.
    pub fn times_in(&self, interval: &TimeInterval, channels: &ChannelSelection) -> Vec<f64> {
        self.events_in(interval, channels).map(|e| e.time).collect()
    }

    /// Number of events in `interval` restricted to `channels`.
    pub fn count_in(&self, interval: &TimeInterval, channels: &ChannelSelection) -> u64 {
        self.events_in(interval, channels).count() as u64
    }

    /// Per-channel counts in `interval` (all channels).
    pub fn channel_counts(&self, interval: &TimeInterval) -> Vec<u64> {
        let mut counts = vec![0u64; self.n_channels];
        for &c in &self.channels[self.index_range(interval)] {
            counts[c] += 1;
        }
        counts
    }

    /// Total dead time accumulated by all events in `interval`.
    pub fn dead_time_in(&self, interval: &TimeInterval) -> f64 {
        let overflow = self.n_channels - 1;
        self.channels[self.index_range(interval)]
            .iter()
            .map(|&c| if c == overflow { self.dead_time.overflow } else { self.dead_time.per_event })
            .sum()
    }

    /// Live time in `interval`: duration minus dead time, never below zero.
    pub fn exposure(&self, interval: &TimeInterval) -> f64 {
        (interval.duration() - self.dead_time_in(interval)).max(0.0)
    }

    /// Summed live time over a set of intervals.
    pub fn exposure_of(&self, intervals: &TimeIntervalSet) -> f64 {
        intervals.iter().map(|iv| self.exposure(iv)).sum()
    }

    fn check_within_span(&self, intervals: &TimeIntervalSet, what: &str) -> Result<()> {
        for iv in intervals {
            if !self.span.covers(iv) {
                return Err(Error::Validation(format!(
                    "{what} interval {iv} lies outside the observation {}",
                    self.span
                )));
            }
        }
        Ok(())
    }
}
