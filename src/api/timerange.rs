//! Query timerange with grid snapping
//!
//! A `Timerange` is the half-open window `[start, end)` divided into slots of
//! `resolution` milliseconds. Every backend and every sub-expression produces
//! one sample per slot, which keeps arithmetic between series index-aligned.

use crate::error::{QueryError, QueryResult};
use serde::Serialize;

/// Largest number of slots a single timerange may hold
///
/// Every series carries one sample per slot, so this bounds the memory a
/// single fetch can allocate.
pub const MAX_SLOTS: usize = 1_000_000;

/// Backend-aligned query window (all values in epoch milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timerange {
    start: i64,
    end: i64,
    resolution: i64,
}

impl Timerange {
    /// Build a timerange covering `[start, end]`, snapped to `resolution`
    ///
    /// `start` is rounded down and `end` rounded up to the nearest multiple of
    /// `resolution`, so the result always contains the requested window.
    pub fn snapped(start: i64, end: i64, resolution: i64) -> QueryResult<Self> {
        if resolution <= 0 {
            return Err(QueryError::Validation(format!(
                "resolution must be positive, got {}ms",
                resolution
            )));
        }
        if start > end {
            return Err(QueryError::Validation(format!(
                "start ({}) is after end ({})",
                start, end
            )));
        }

        let out_of_range = || {
            QueryError::Validation(format!(
                "timerange {}..{} at {}ms resolution is out of range",
                start, end, resolution
            ))
        };

        let snapped_start = start
            .div_euclid(resolution)
            .checked_mul(resolution)
            .ok_or_else(out_of_range)?;
        let snapped_end = match end.rem_euclid(resolution) {
            0 => end,
            rem => end.checked_add(resolution - rem).ok_or_else(out_of_range)?,
        };

        let width = snapped_end
            .checked_sub(snapped_start)
            .ok_or_else(out_of_range)?;
        let slots = width / resolution;
        if slots > MAX_SLOTS as i64 {
            return Err(QueryError::Validation(format!(
                "timerange spans {} slots, limit is {}",
                slots, MAX_SLOTS
            )));
        }

        Ok(Self {
            start: snapped_start,
            end: snapped_end,
            resolution,
        })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn resolution(&self) -> i64 {
        self.resolution
    }

    /// Number of grid slots, never more than [`MAX_SLOTS`]
    pub fn slots(&self) -> usize {
        ((self.end - self.start) / self.resolution) as usize
    }

    /// Start timestamp of every slot, in order
    pub fn timestamps(&self) -> impl Iterator<Item = i64> {
        let (start, resolution) = (self.start, self.resolution);
        (0..self.slots()).map(move |i| start + i as i64 * resolution)
    }

    /// Slot holding `timestamp`, if it falls inside the window
    pub fn slot_of(&self, timestamp: i64) -> Option<usize> {
        if timestamp < self.start || timestamp >= self.end {
            return None;
        }
        Some(((timestamp - self.start) / self.resolution) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_snapping(start: i64, end: i64, resolution: i64) {
        let range = Timerange::snapped(start, end, resolution).unwrap();
        assert_eq!((range.end() - range.start()) % resolution, 0);
        assert_eq!(range.start() % resolution, 0);
        assert!(range.start() <= start);
        assert!(range.end() >= end);
        assert!(range.end() - range.start() >= end - start);
        assert!(range.start() > start - resolution);
        assert!(range.end() < end + resolution);
    }

    #[test]
    fn test_snapping_properties() {
        let cases = [
            (0, 0, 1),
            (0, 1, 1000),
            (999, 1001, 1000),
            (1000, 2000, 1000),
            (1705329342123, 1705332942123, 60_000),
            (-1500, 1500, 1000),
            (-3000, -1000, 1000),
            (7, 7, 5),
            (1, 86_400_001, 3_600_000),
        ];

        for (start, end, resolution) in cases {
            check_snapping(start, end, resolution);
        }

        for resolution in [1, 7, 60, 1000, 30_000] {
            for start in (-5000..5000).step_by(611) {
                for width in [0, 1, 59, 1000, 4321] {
                    check_snapping(start, start + width, resolution);
                }
            }
        }
    }

    #[test]
    fn test_snapping_aligned_is_unchanged() {
        let range = Timerange::snapped(60_000, 180_000, 60_000).unwrap();
        assert_eq!(range.start(), 60_000);
        assert_eq!(range.end(), 180_000);
        assert_eq!(range.slots(), 2);
    }

    #[test]
    fn test_snapping_rounds_outward() {
        let range = Timerange::snapped(61_000, 179_000, 60_000).unwrap();
        assert_eq!(range.start(), 60_000);
        assert_eq!(range.end(), 180_000);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(matches!(
            Timerange::snapped(0, 1000, 0),
            Err(QueryError::Validation(_))
        ));
        assert!(matches!(
            Timerange::snapped(0, 1000, -5),
            Err(QueryError::Validation(_))
        ));
        assert!(matches!(
            Timerange::snapped(2000, 1000, 100),
            Err(QueryError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range() {
        for (start, end, resolution) in [
            (i64::MIN, 0, 7),
            (i64::MIN + 1, i64::MIN + 2, 1000),
            (0, i64::MAX, 7),
            (-9_000_000_000_000_000_000, 9_000_000_000_000_000_000, 1000),
            (-9_000_000_000_000_000_000, 9_000_000_000_000_000_000, 604_800_000),
        ] {
            assert!(matches!(
                Timerange::snapped(start, end, resolution),
                Err(QueryError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_slot_limit() {
        let range = Timerange::snapped(0, MAX_SLOTS as i64, 1).unwrap();
        assert_eq!(range.slots(), MAX_SLOTS);

        assert!(matches!(
            Timerange::snapped(0, MAX_SLOTS as i64 + 1, 1),
            Err(QueryError::Validation(_))
        ));
        // A year at millisecond resolution
        assert!(matches!(
            Timerange::snapped(0, 365 * 86_400_000, 1),
            Err(QueryError::Validation(_))
        ));
    }

    #[test]
    fn test_extreme_bounds_within_limit() {
        let range = Timerange::snapped(i64::MIN, i64::MIN + 10_240, 1024).unwrap();
        assert_eq!(range.start(), i64::MIN);
        assert_eq!(range.slots(), 10);

        let end = i64::MAX - 807;
        let range = Timerange::snapped(end - 5000, end, 1000).unwrap();
        assert_eq!(range.end() % 1000, 0);
        assert_eq!(range.slots(), 5);
    }

    #[test]
    fn test_timestamps_and_slots() {
        let range = Timerange::snapped(0, 3000, 1000).unwrap();
        assert_eq!(range.timestamps().collect::<Vec<_>>(), vec![0, 1000, 2000]);
        assert_eq!(range.slot_of(0), Some(0));
        assert_eq!(range.slot_of(1999), Some(1));
        assert_eq!(range.slot_of(3000), None);
        assert_eq!(range.slot_of(-1), None);
    }
}
