//! Key-space partitioning for warm workers.

use crate::models::KeyRange;

/// Splits `range` into at most `count` contiguous shards.
///
/// Shard sizes differ by at most one, larger shards first. A range with fewer
/// keys than `count` yields one shard per key; an empty range yields none.
pub fn partition(range: KeyRange, count: usize) -> Vec<KeyRange> {
    let len = range.len();
    if len == 0 {
        return Vec::new();
    }
    let count = (count.max(1) as u64).min(len);
    let base = len / count;
    let extra = len % count;

    let mut shards = Vec::with_capacity(count as usize);
    let mut start = range.start.get();
    for i in 0..count {
        let size = base + u64::from(i < extra);
        let end = if i + 1 == count {
            range.end.get()
        } else {
            start.saturating_add((size - 1).min(i64::MAX as u64) as i64)
        };
        shards.push(KeyRange::new(start, end));
        start = end.saturating_add(1);
    }
    shards
}
