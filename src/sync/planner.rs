use std::time::Duration;

use crate::sync::ChunkJob;

/// Partition item ids into fixed-size chunks and compute each chunk's delay.
///
/// Order is preserved and the last chunk may be smaller than `chunk_size`.
/// Chunk `i` is delayed by `i * interval_minutes` minutes, so the schedule is
/// evenly spaced from planning time (fixed-rate: a chunk that runs longer
/// than the interval can overlap the next one). `chunk_size` and
/// `interval_minutes` are at least 1, enforced by the config layer.
pub fn plan(
    run_id: i64,
    item_ids: &[String],
    chunk_size: u32,
    interval_minutes: u32,
) -> Vec<ChunkJob> {
    let interval = Duration::from_secs(u64::from(interval_minutes) * 60);
    item_ids
        .chunks(chunk_size as usize)
        .enumerate()
        .map(|(i, ids)| ChunkJob {
            run_id,
            chunk_index: i as u32,
            item_ids: ids.to_vec(),
            delay: interval * i as u32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("SKU-{i}")).collect()
    }

    #[test]
    fn test_partition_completeness() {
        let input = ids(23);
        let jobs = plan(1, &input, 10, 5);

        let concatenated: Vec<String> = jobs
            .iter()
            .flat_map(|j| j.item_ids.iter().cloned())
            .collect();
        assert_eq!(concatenated, input);
    }

    #[test]
    fn test_example_schedule() {
        // 23 items, chunk size 10, interval 5 min: [10, 10, 3] at [0, 5, 10] min
        let jobs = plan(1, &ids(23), 10, 5);
        assert_eq!(jobs.len(), 3);

        let sizes: Vec<usize> = jobs.iter().map(|j| j.item_ids.len()).collect();
        assert_eq!(sizes, vec![10, 10, 3]);

        let delays: Vec<u64> = jobs.iter().map(|j| j.delay.as_secs()).collect();
        assert_eq!(delays, vec![0, 300, 600]);

        assert!(jobs.iter().all(|j| j.run_id == 1));
        assert_eq!(jobs[2].chunk_index, 2);
    }

    #[test]
    fn test_schedule_monotonicity() {
        let jobs = plan(7, &ids(50), 7, 3);
        for (i, job) in jobs.iter().enumerate() {
            assert_eq!(job.delay.as_secs(), i as u64 * 180);
        }
        assert_eq!(jobs[0].delay, Duration::ZERO);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(plan(1, &[], 10, 5).is_empty());
    }

    #[test]
    fn test_exact_multiple_has_no_short_tail() {
        let jobs = plan(1, &ids(20), 10, 5);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].item_ids.len(), 10);
    }

    #[test]
    fn test_chunk_size_one() {
        let jobs = plan(1, &ids(3), 1, 1);
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.item_ids.len() == 1));
        assert_eq!(jobs[2].delay.as_secs(), 120);
    }

    #[test]
    fn test_single_chunk_runs_immediately() {
        let jobs = plan(1, &ids(4), 10, 30);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].delay, Duration::ZERO);
    }
}
