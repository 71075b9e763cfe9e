//! Placement of new blobs: weighted random cluster choice and size-based
//! pool choice.

use rand::Rng;

/// Bodies below this size go to the small-object pool.
pub const BIG_FILE_THRESHOLD: i64 = 512 << 10;

/// Pool for small objects.
pub const SMALL_FILE_POOL: &str = "tiger";

/// Pool for large objects and objects of unknown size.
pub const BIG_FILE_POOL: &str = "rabbit";

/// Pool for a body of `size` bytes. A negative size means the length is
/// unknown (chunked uploads), which goes to the big pool.
#[must_use]
pub fn pool_for_size(size: i64) -> &'static str {
    if size < 0 {
        return BIG_FILE_POOL;
    }
    if size < BIG_FILE_THRESHOLD {
        SMALL_FILE_POOL
    } else {
        BIG_FILE_POOL
    }
}

/// Draw one cluster id proportionally to its weight.
///
/// Draws `r` uniformly from `[0, total_weight)` and returns the cluster
/// whose prefix sum first exceeds `r`. Weight 0 makes a cluster
/// undrawable, which is how a cluster is drained. Returns `None` when no
/// cluster carries weight.
#[must_use]
pub fn pick_weighted<'a>(weights: &'a [(&'a str, u32)]) -> Option<&'a str> {
    let total: u64 = weights.iter().map(|(_, w)| u64::from(*w)).sum();
    if total == 0 {
        return None;
    }
    let drawn = rand::thread_rng().gen_range(0..total);
    let mut prefix = 0u64;
    for (fsid, weight) in weights {
        prefix += u64::from(*weight);
        if prefix > drawn {
            return Some(fsid);
        }
    }
    None
}
