//! Fetch windows and the bounded sub-ranges they are split into.

use std::fmt;

use chrono::{DateTime, Months, Utc};

use crate::models::series::SeriesKey;

/// The interval one ingestion run asks upstream for.
///
/// `from` is exclusive when it comes from a watermark (that instant is already
/// persisted) and inclusive for a series' very first run. `to` is always
/// exclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchWindow {
    pub series: SeriesKey,
    pub from: DateTime<Utc>,
    pub from_inclusive: bool,
    pub to: DateTime<Utc>,
}

impl FetchWindow {
    /// Window resuming after a watermark.
    pub fn after(series: SeriesKey, watermark: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            series,
            from: watermark,
            from_inclusive: false,
            to,
        }
    }

    /// Window starting at (and including) `from`.
    pub fn starting_at(series: SeriesKey, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            series,
            from,
            from_inclusive: true,
            to,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        let lower_ok = if self.from_inclusive {
            ts >= self.from
        } else {
            ts > self.from
        };
        lower_ok && ts < self.to
    }

    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }

    /// Splits the window into consecutive sub-ranges of at most `months`
    /// calendar months. The last one is clipped to `to`.
    pub fn sub_ranges(&self, months: u32) -> Vec<SubRange> {
        let months = months.max(1);
        let mut out = Vec::new();
        let mut cursor = self.from;
        while cursor < self.to {
            let next = cursor
                .checked_add_months(Months::new(months))
                .map_or(self.to, |n| n.min(self.to));
            out.push(SubRange {
                start: cursor,
                end: next,
            });
            cursor = next;
        }
        out
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.from_inclusive { '[' } else { '(' };
        write!(
            f,
            "{} {open}{}, {})",
            self.series,
            self.from.to_rfc3339(),
            self.to.to_rfc3339()
        )
    }
}

/// One bounded request range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl fmt::Display for SubRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::domain::Domain;
    use chrono::TimeZone;

    fn key() -> SeriesKey {
        SeriesKey::new(Domain::DayAheadPrice, "NL").unwrap()
    }

    #[test]
    fn exclusive_lower_bound_drops_the_watermark_instant() {
        let wm = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let w = FetchWindow::after(key(), wm, to);
        assert!(!w.contains(wm));
        assert!(w.contains(wm + chrono::Duration::hours(1)));
        assert!(!w.contains(to));
    }

    #[test]
    fn multi_year_gap_splits_into_quarters() {
        let from = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2023, 2, 15, 0, 0, 0).unwrap();
        let ranges = FetchWindow::starting_at(key(), from, to).sub_ranges(3);
        assert_eq!(ranges.len(), 5);
        assert_eq!(ranges[0].start, from);
        assert_eq!(ranges[1].start, Utc.with_ymd_and_hms(2022, 4, 1, 0, 0, 0).unwrap());
        assert_eq!(ranges[4].end, to);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn empty_window_has_no_sub_ranges() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let w = FetchWindow::starting_at(key(), t, t);
        assert!(w.is_empty());
        assert!(w.sub_ranges(3).is_empty());
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sub_ranges_tile_the_window(
                start_h in 0i64..200_000,
                len_h in 0i64..60_000,
                months in 1u32..13,
            ) {
                let origin = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
                let from = origin + chrono::Duration::hours(start_h);
                let to = from + chrono::Duration::hours(len_h);
                let ranges = FetchWindow::starting_at(key(), from, to).sub_ranges(months);

                if len_h == 0 {
                    prop_assert!(ranges.is_empty());
                } else {
                    prop_assert_eq!(ranges.first().unwrap().start, from);
                    prop_assert_eq!(ranges.last().unwrap().end, to);
                }
                for r in &ranges {
                    prop_assert!(r.start < r.end);
                }
                for pair in ranges.windows(2) {
                    prop_assert_eq!(pair[0].end, pair[1].start);
                }
            }
        }
    }
}
