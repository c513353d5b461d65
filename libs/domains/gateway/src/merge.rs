use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::models::RankedItem;

/// Merge per-agent result lists into one global top-`k`.
///
/// An id reported by several agents keeps its smallest distance. The output
/// is sorted by distance then id, so the result does not depend on the order
/// in which agents answered.
pub fn merge_ranked<I>(partials: I, k: usize) -> Vec<RankedItem>
where
    I: IntoIterator<Item = Vec<RankedItem>>,
{
    let mut best: HashMap<String, f32> = HashMap::new();
    for item in partials.into_iter().flatten() {
        match best.entry(item.id) {
            Entry::Occupied(mut slot) => {
                if item.distance.total_cmp(slot.get()).is_lt() {
                    slot.insert(item.distance);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(item.distance);
            }
        }
    }

    let mut merged: Vec<RankedItem> = best
        .into_iter()
        .map(|(id, distance)| RankedItem { id, distance })
        .collect();
    merged.sort_unstable();
    merged.truncate(k);
    merged
}
