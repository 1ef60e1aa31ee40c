//! Time intervals and interval sets, including the `"start-stop, start-stop"` text form.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open time interval `[start, stop)` with `start < stop`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
    start: f64,
    stop: f64,
}

impl TimeInterval {
    /// Create an interval; both bounds must be finite and `start < stop`.
    pub fn new(start: f64, stop: f64) -> Result<Self> {
        if !(start.is_finite() && stop.is_finite()) {
            return Err(Error::Validation(format!(
                "interval bounds must be finite, got ({start}, {stop})"
            )));
        }
        if start >= stop {
            return Err(Error::Validation(format!(
                "interval requires start < stop, got ({start}, {stop})"
            )));
        }
        Ok(Self { start, stop })
    }

    /// Parse a single `"start-stop"` pair. Either bound may be negative.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let split = find_separator(text).ok_or_else(|| {
            Error::Configuration(format!("cannot parse time interval '{text}': expected 'start-stop'"))
        })?;
        let (lhs, rhs) = (text[..split].trim(), text[split + 1..].trim());
        let start = parse_bound(lhs, text)?;
        let stop = parse_bound(rhs, text)?;
        Self::new(start, stop).map_err(|e| match e {
            Error::Validation(msg) => Error::Configuration(msg),
            other => other,
        })
    }

    /// Interval start.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// Interval stop.
    pub fn stop(&self) -> f64 {
        self.stop
    }

    /// `stop - start`.
    pub fn duration(&self) -> f64 {
        self.stop - self.start
    }

    /// Midpoint of the interval.
    pub fn mid(&self) -> f64 {
        0.5 * (self.start + self.stop)
    }

    /// Half-open membership test.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.stop
    }

    /// `other` lies entirely inside `self` (closed comparison on both ends).
    pub fn covers(&self, other: &TimeInterval) -> bool {
        other.start >= self.start && other.stop <= self.stop
    }

    /// The intervals share a region of non-zero length.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    /// Intersection of two intervals, if non-empty.
    pub fn intersection(&self, other: &TimeInterval) -> Option<TimeInterval> {
        let start = self.start.max(other.start);
        let stop = self.stop.min(other.stop);
        (start < stop).then_some(TimeInterval { start, stop })
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.stop)
    }
}

/// The `-` that separates the two bounds: not a leading sign, not an exponent sign,
/// not the sign of a negative stop (`"-15--5"`).
fn find_separator(text: &str) -> Option<usize> {
    text.char_indices().filter(|&(_, c)| c == '-').map(|(i, _)| i).find(|&i| {
        match text[..i].trim_end().chars().last() {
            None => false,
            Some(prev) => !matches!(prev, 'e' | 'E' | '-'),
        }
    })
}

fn parse_bound(text: &str, whole: &str) -> Result<f64> {
    text.parse::<f64>().map_err(|_| {
        Error::Configuration(format!("cannot parse '{text}' as a time in interval '{whole}'"))
    })
}

/// An ordered set of pairwise non-overlapping [`TimeInterval`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeIntervalSet {
    intervals: Vec<TimeInterval>,
}

impl TimeIntervalSet {
    /// Build a set from intervals; they are sorted by start and must not overlap.
    pub fn from_intervals(mut intervals: Vec<TimeInterval>) -> Result<Self> {
        intervals.sort_by(|a, b| a.start.total_cmp(&b.start));
        for pair in intervals.windows(2) {
            if pair[0].overlaps(&pair[1]) {
                return Err(Error::Validation(format!(
                    "intervals {} and {} overlap",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(Self { intervals })
    }

    /// Parse a comma-separated specification such as `"-10-0, 100-150"`.
    pub fn from_spec(spec: &str) -> Result<Self> {
        Self::from_specs(&[spec])
    }

    /// Parse several specifications (each possibly comma-separated) into one set.
    pub fn from_specs(specs: &[&str]) -> Result<Self> {
        let mut intervals = Vec::new();
        for spec in specs {
            for piece in spec.split(',') {
                if piece.trim().is_empty() {
                    continue;
                }
                intervals.push(TimeInterval::parse(piece)?);
            }
        }
        if intervals.is_empty() {
            return Err(Error::Configuration(format!(
                "no time intervals found in specification {specs:?}"
            )));
        }
        Self::from_intervals(intervals)
    }

    /// Intervals in ascending order.
    pub fn intervals(&self) -> &[TimeInterval] {
        &self.intervals
    }

    /// Iterate intervals in ascending order.
    pub fn iter(&self) -> std::slice::Iter<'_, TimeInterval> {
        self.intervals.iter()
    }

    /// Number of intervals.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Whether the set holds no interval.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Smallest interval covering every member.
    pub fn span(&self) -> Option<TimeInterval> {
        let first = self.intervals.first()?;
        let last = self.intervals.iter().map(|i| i.stop).fold(first.stop, f64::max);
        Some(TimeInterval { start: first.start, stop: last })
    }

    /// Summed duration of all members.
    pub fn total_duration(&self) -> f64 {
        self.intervals.iter().map(TimeInterval::duration).sum()
    }

    /// Whether `t` falls in any member.
    pub fn contains(&self, t: f64) -> bool {
        self.intervals.iter().any(|i| i.contains(t))
    }

    /// Whether any member of `self` overlaps any member of `other`.
    pub fn overlaps(&self, other: &TimeIntervalSet) -> bool {
        self.intervals.iter().any(|a| other.intervals.iter().any(|b| a.overlaps(b)))
    }

    /// Text form, e.g. `"-10-0, 100-150"`.
    pub fn to_spec(&self) -> String {
        self.intervals.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
    }
}

impl<'a> IntoIterator for &'a TimeIntervalSet {
    type Item = &'a TimeInterval;
    type IntoIter = std::slice::Iter<'a, TimeInterval>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.iter()
    }
}

impl fmt::Display for TimeIntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_spec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_negative_and_trailing_dot() {
        let set = TimeIntervalSet::from_spec("-10-0, 100-150").unwrap();
        assert_eq!(set.len(), 2);
        assert_relative_eq!(set.intervals()[0].start(), -10.0);
        assert_relative_eq!(set.intervals()[0].stop(), 0.0);
        assert_relative_eq!(set.intervals()[1].start(), 100.0);

        let set = TimeIntervalSet::from_spec("0.-10.").unwrap();
        assert_relative_eq!(set.intervals()[0].stop(), 10.0);
    }

    #[test]
    fn test_parse_double_negative_and_exponent() {
        let i = TimeInterval::parse("-15--5").unwrap();
        assert_relative_eq!(i.start(), -15.0);
        assert_relative_eq!(i.stop(), -5.0);

        let i = TimeInterval::parse("1e-3-2.5e1").unwrap();
        assert_relative_eq!(i.start(), 1e-3);
        assert_relative_eq!(i.stop(), 25.0);

        let i = TimeInterval::parse(" -1 - 4 ").unwrap();
        assert_relative_eq!(i.start(), -1.0);
        assert_relative_eq!(i.stop(), 4.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(TimeInterval::parse("abc"), Err(Error::Configuration(_))));
        assert!(matches!(TimeInterval::parse("5-1"), Err(Error::Configuration(_))));
        assert!(matches!(TimeIntervalSet::from_spec(" , "), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_overlap_within_set_rejected() {
        let err = TimeIntervalSet::from_spec("0-10, 5-20").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        // Touching intervals are fine.
        assert!(TimeIntervalSet::from_spec("0-10, 10-20").is_ok());
    }

    #[test]
    fn test_set_is_sorted_and_spans() {
        let set = TimeIntervalSet::from_specs(&["100-150", "-15-0"]).unwrap();
        assert_relative_eq!(set.intervals()[0].start(), -15.0);
        let span = set.span().unwrap();
        assert_relative_eq!(span.start(), -15.0);
        assert_relative_eq!(span.stop(), 150.0);
        assert_relative_eq!(set.total_duration(), 65.0);
        assert!(set.contains(-1.0));
        assert!(!set.contains(50.0));
    }
}
