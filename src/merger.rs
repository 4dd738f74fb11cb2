//! Merging of per-chunk downtime results.
//!
//! Intervals that touch at a chunk boundary (one closed synthetically at
//! midnight, the next opening at the same instant) are kept as two entries.

use std::collections::HashSet;

use crate::extractor::{DowntimeInterval, IntervalKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first, used by the single-target view.
    Ascending,
    /// Most recent first, used by the group view.
    Descending,
}

/// Reorders chunk results by chunk index, concatenates them per target,
/// drops repeated `(target, start, end)` entries and sorts by start.
pub fn merge_chunk_results(
    mut per_chunk: Vec<(usize, Vec<DowntimeInterval>)>,
    order: SortOrder,
) -> Vec<DowntimeInterval> {
    per_chunk.sort_by_key(|(chunk_index, _)| *chunk_index);

    let mut targets: Vec<String> = Vec::new();
    let mut by_target: Vec<Vec<DowntimeInterval>> = Vec::new();
    for interval in per_chunk.into_iter().flat_map(|(_, intervals)| intervals) {
        match targets.iter().position(|t| *t == interval.target) {
            Some(idx) => by_target[idx].push(interval),
            None => {
                targets.push(interval.target.clone());
                by_target.push(vec![interval]);
            }
        }
    }

    let mut merged = dedup_intervals(by_target.into_iter().flatten());
    sort_intervals(&mut merged, order);
    merged
}

/// Keeps the first occurrence of every `(target, start, end)`.
pub fn dedup_intervals<I>(intervals: I) -> Vec<DowntimeInterval>
where
    I: IntoIterator<Item = DowntimeInterval>,
{
    let mut seen: HashSet<IntervalKey> = HashSet::new();
    intervals
        .into_iter()
        .filter(|interval| seen.insert(interval.key()))
        .collect()
}

pub fn sort_intervals(intervals: &mut [DowntimeInterval], order: SortOrder) {
    match order {
        SortOrder::Ascending => intervals.sort_by(|a, b| a.start.cmp(&b.start)),
        SortOrder::Descending => intervals.sort_by(|a, b| b.start.cmp(&a.start)),
    }
}
