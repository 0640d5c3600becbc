//! Slot coverage math over roaring bitmaps.
//!
//! A window's expected slots are the aligned slot starts of its domain
//! [`Resolution`] that fall inside it. Slots are addressed by their offset from
//! the first expected slot so they fit a `u32` bitmap; present and expected
//! sets are then combined with bitmap set operations.

use chrono::{DateTime, Utc};
use grid_ingestor::models::{resolution::Resolution, window::FetchWindow};
use roaring::RoaringBitmap;

/// The expected slots of one window: `count` slots starting at slot `first`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedSlots {
    pub resolution: Resolution,
    /// Slot id of the first expected slot.
    pub first: i64,
    pub count: u32,
}

impl ExpectedSlots {
    /// Aligned slot starts inside `window` (exclusive or inclusive lower bound as
    /// the window says, exclusive upper bound).
    pub fn for_window(window: &FetchWindow, resolution: Resolution) -> Self {
        let mut start = resolution.align_up(window.from);
        if !window.from_inclusive && start == window.from {
            start += resolution.width();
        }
        let first = resolution.slot_id(start);
        let end = resolution.slot_id(resolution.align_up(window.to));
        let count = u32::try_from((end - first).max(0)).unwrap_or(u32::MAX);
        Self {
            resolution,
            first,
            count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn first_start(&self) -> DateTime<Utc> {
        self.resolution.slot_start(self.first)
    }

    /// Bitmap with every expected offset set.
    pub fn bitmap(&self) -> RoaringBitmap {
        let mut rb = RoaringBitmap::new();
        rb.insert_range(0..self.count);
        rb
    }

    /// Offsets of the aligned `present` timestamps that fall on expected slots.
    pub fn present_bitmap<I>(&self, present: I) -> RoaringBitmap
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        present
            .into_iter()
            .filter(|ts| self.resolution.is_aligned(*ts))
            .filter_map(|ts| {
                let offset = self.resolution.slot_id(ts) - self.first;
                u32::try_from(offset).ok().filter(|o| *o < self.count)
            })
            .collect()
    }

    fn offset_start(&self, offset: u32) -> DateTime<Utc> {
        self.resolution.slot_start(self.first + i64::from(offset))
    }
}

/// Gap-safe watermark candidate: the start of the last expected slot such that
/// every expected slot before it is present. `None` when the first expected
/// slot is already missing (or nothing is expected).
pub fn contiguous_until<I>(expected: &ExpectedSlots, present: I) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let missing = &expected.bitmap() - &expected.present_bitmap(present);
    let run = missing.min().unwrap_or(expected.count);
    if run == 0 {
        None
    } else {
        Some(expected.offset_start(run - 1))
    }
}

/// Missing expected slots coalesced into `[start, end)` ranges.
pub fn missing_ranges<I>(expected: &ExpectedSlots, present: I) -> Vec<(DateTime<Utc>, DateTime<Utc>)>
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let missing = &expected.bitmap() - &expected.present_bitmap(present);
    coalesce_runs(expected, &missing)
}

fn coalesce_runs(
    expected: &ExpectedSlots,
    rb: &RoaringBitmap,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut out = Vec::new();
    let mut it = rb.iter();
    if let Some(mut run_start) = it.next() {
        let mut prev = run_start;
        for x in it {
            if x == prev + 1 {
                prev = x;
                continue;
            }
            out.push((expected.offset_start(run_start), expected.offset_start(prev + 1)));
            run_start = x;
            prev = x;
        }
        out.push((expected.offset_start(run_start), expected.offset_start(prev + 1)));
    }
    out
}
