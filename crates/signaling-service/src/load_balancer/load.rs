//! Load stage: prefer lightly loaded nodes.

use crate::media::MediaNode;

/// Default load threshold; nodes at or above it are avoided.
pub const DEFAULT_LOAD_THRESHOLD: f64 = 0.85;

/// Candidates below `threshold`, least loaded first. When every candidate
/// is at or above the threshold, the whole `pool` is returned instead,
/// sorted, so earlier stages do not narrow an overloaded fallback.
#[must_use]
pub fn filter_by_load(
    candidates: Vec<MediaNode>,
    pool: &[MediaNode],
    threshold: f64,
) -> Vec<MediaNode> {
    let mut below: Vec<MediaNode> = candidates
        .into_iter()
        .filter(|node| node.load() < threshold)
        .collect();

    if below.is_empty() {
        below = pool.to_vec();
    }
    below.sort_by(|a, b| a.load().total_cmp(&b.load()));
    below
}
