//! Hit/miss accounting shared by the caches

use std::sync::atomic::{AtomicU64, Ordering};

/// (hits, misses, hit rate in percent)
pub(crate) fn hit_stats(hits: &AtomicU64, misses: &AtomicU64) -> (u64, u64, f64) {
    let hits = hits.load(Ordering::Relaxed);
    let misses = misses.load(Ordering::Relaxed);
    let total = hits + misses;
    let hit_rate = if total > 0 {
        (hits as f64 / total as f64) * 100.0
    } else {
        0.0
    };
    (hits, misses, hit_rate)
}
