use crate::types::ChunkPlan;

/// Overall upload progress in `[0.0, 1.0]` while chunk `chunk_index` is in
/// flight and `bytes_sent` of its `bytes_expected` bytes have been sent.
///
/// Acknowledged chunks contribute `start / file_size`; the in-flight chunk
/// contributes its share of what remains, split evenly over the remaining
/// chunks.
pub fn overall_progress(
    plan: &ChunkPlan,
    chunk_index: u64,
    bytes_sent: u64,
    bytes_expected: u64,
) -> f64 {
    let file_size = plan.file_size();
    if file_size == 0 {
        return 0.0;
    }
    let remaining = plan.remaining_chunks(chunk_index);
    let start = plan.range(chunk_index).start;
    let completed = start as f64 / file_size as f64;
    if remaining == 0 {
        return completed.clamp(0.0, 1.0);
    }

    let per_chunk = (file_size - start) as f64 / file_size as f64 / remaining as f64;
    let chunk_fraction = if bytes_expected == 0 {
        0.0
    } else {
        bytes_sent as f64 / bytes_expected as f64
    };

    (completed + chunk_fraction * per_chunk).clamp(0.0, 1.0)
}
