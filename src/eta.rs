//! Runtime estimation for bulk operations
//!
//! Throughput constants are empirical: batch deletion and label modification
//! move roughly a provider batch per second once the inter-batch delay is
//! included, while analysis only pages through ID lists. The initial estimate
//! is shown before any progress exists; once enough batches have completed
//! the live throughput replaces it so the displayed ETA stays honest.

use std::time::Duration;

use crate::models::JobType;

/// Items per second for batch deletion
const DELETE_ITEMS_PER_SEC: f64 = 120.0;
/// Items per second for label add/remove
const MODIFY_ITEMS_PER_SEC: f64 = 100.0;
/// IDs per second for count-only analysis sweeps
const ANALYSIS_ITEMS_PER_SEC: f64 = 300.0;
/// Flat cost of the single create-filter call
const CREATE_FILTER_SECS: u64 = 3;
/// Fixed per-job overhead (auth check, first page fetch)
const JOB_OVERHEAD_SECS: u64 = 2;

/// Minimum processed items before live throughput is trusted
const LIVE_SAMPLE_FLOOR: usize = 200;
/// Minimum elapsed time before live throughput is trusted
const LIVE_ELAPSED_FLOOR: Duration = Duration::from_secs(5);

fn throughput(job_type: JobType) -> Option<f64> {
    match job_type {
        JobType::Delete | JobType::DeleteWithExceptions => Some(DELETE_ITEMS_PER_SEC),
        JobType::ModifyLabel => Some(MODIFY_ITEMS_PER_SEC),
        JobType::Analysis => Some(ANALYSIS_ITEMS_PER_SEC),
        JobType::CreateFilter => None,
    }
}

/// Estimate for a job that has not started yet
pub fn initial_estimate(job_type: JobType, item_count: usize) -> Duration {
    match throughput(job_type) {
        Some(rate) => {
            let secs = (item_count as f64 / rate).ceil() as u64 + JOB_OVERHEAD_SECS;
            Duration::from_secs(secs)
        }
        None => Duration::from_secs(CREATE_FILTER_SECS),
    }
}

/// Estimate of the remaining runtime given live progress
///
/// Falls back to scaling the fixed constants until enough items have been
/// processed for the observed throughput to be meaningful.
pub fn remaining_estimate(
    job_type: JobType,
    total: usize,
    processed: usize,
    elapsed: Duration,
) -> Duration {
    let remaining_items = total.saturating_sub(processed);
    if remaining_items == 0 {
        return Duration::ZERO;
    }

    if processed >= LIVE_SAMPLE_FLOOR && elapsed >= LIVE_ELAPSED_FLOOR {
        let rate = processed as f64 / elapsed.as_secs_f64();
        if rate > 0.0 {
            return Duration::from_secs_f64(remaining_items as f64 / rate);
        }
    }

    match throughput(job_type) {
        Some(rate) => Duration::from_secs((remaining_items as f64 / rate).ceil() as u64),
        None => Duration::from_secs(CREATE_FILTER_SECS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_estimate_scales_with_count() {
        let small = initial_estimate(JobType::Delete, 120);
        let large = initial_estimate(JobType::Delete, 12_000);
        assert!(large > small);
        // 12000 items at 120/s plus overhead
        assert_eq!(large, Duration::from_secs(102));
    }

    #[test]
    fn test_operation_types_have_different_costs() {
        let count = 6_000;
        let delete = initial_estimate(JobType::Delete, count);
        let modify = initial_estimate(JobType::ModifyLabel, count);
        let analysis = initial_estimate(JobType::Analysis, count);
        assert!(modify > delete);
        assert!(delete > analysis);
    }

    #[test]
    fn test_create_filter_is_flat() {
        assert_eq!(
            initial_estimate(JobType::CreateFilter, 1),
            initial_estimate(JobType::CreateFilter, 100_000)
        );
    }

    #[test]
    fn test_remaining_estimate_zero_when_done() {
        assert_eq!(
            remaining_estimate(JobType::Delete, 500, 500, Duration::from_secs(10)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_remaining_estimate_uses_live_throughput() {
        // 1000 items in 10s observed => 100/s; 1000 left => ~10s
        let eta = remaining_estimate(JobType::Delete, 2000, 1000, Duration::from_secs(10));
        assert!(eta >= Duration::from_secs(9) && eta <= Duration::from_secs(11));
    }

    #[test]
    fn test_remaining_estimate_falls_back_below_sample_floor() {
        // Only 10 items processed: too few to trust, fall back to constants
        let eta = remaining_estimate(JobType::Delete, 1210, 10, Duration::from_secs(60));
        assert_eq!(eta, Duration::from_secs(10)); // 1200 / 120
    }
}
