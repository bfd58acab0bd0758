//! Memory-aware batch sizing.
//!
//! The only backpressure signal in the pipeline: between batches the worker
//! samples its own RSS and shrinks the batch size when the process stays
//! above the configured cap.

use std::time::Duration;

use sysinfo::{get_current_pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Batch size never shrinks below this floor.
pub const MIN_BATCH_FLOOR: u32 = 100;

/// Fraction of the cap that triggers back-off.
const HIGH_WATER: f64 = 0.8;

/// Consecutive high samples before the batch size is halved.
const HIGH_SAMPLES_BEFORE_SHRINK: u32 = 3;

const RESAMPLE_PAUSE: Duration = Duration::from_millis(200);

/// Initial batch size from the table's estimated row count. Large tables
/// start smaller so one page of wide rows cannot blow the cap.
pub fn initial_batch_size(estimated_rows: i64, configured: u32) -> u32 {
    match estimated_rows {
        ..=99_999 => configured.min(2_000),
        100_000..=1_000_000 => configured,
        1_000_001..=10_000_000 => (configured / 2).max(500),
        _ => (configured / 4).max(200),
    }
}

/// Samples process RSS and decides when to halve the batch size.
pub struct MemoryGovernor {
    cap_bytes: u64,
    system: Mutex<System>,
}

impl MemoryGovernor {
    pub fn new(cap_mb: u64) -> Self {
        Self {
            cap_bytes: cap_mb * 1024 * 1024,
            system: Mutex::new(System::new()),
        }
    }

    /// Current RSS of this process in bytes. Zero when the probe fails.
    pub async fn sample(&self) -> u64 {
        let Ok(pid) = get_current_pid() else {
            return 0;
        };
        let mut system = self.system.lock().await;
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }

    /// Called between batches. Pauses while the process sits above the high
    /// water mark; after three consecutive high samples the returned batch
    /// size is halved (never below the floor).
    pub async fn govern(&self, current_batch_size: u32) -> u32 {
        let threshold = (self.cap_bytes as f64 * HIGH_WATER) as u64;

        let mut high_samples = 0u32;
        loop {
            let rss = self.sample().await;
            if rss == 0 || rss <= threshold {
                return current_batch_size;
            }

            high_samples += 1;
            debug!(
                rss_mb = rss / (1024 * 1024),
                cap_mb = self.cap_bytes / (1024 * 1024),
                high_samples,
                "memory above high water mark"
            );

            if high_samples >= HIGH_SAMPLES_BEFORE_SHRINK {
                let shrunk = (current_batch_size / 2).max(MIN_BATCH_FLOOR);
                if shrunk < current_batch_size {
                    warn!(
                        from = current_batch_size,
                        to = shrunk,
                        "memory pressure: halving batch size"
                    );
                }
                return shrunk;
            }

            tokio::time::sleep(RESAMPLE_PAUSE).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_tables_may_grow_to_two_thousand() {
        assert_eq!(initial_batch_size(50_000, 1_000), 1_000);
        assert_eq!(initial_batch_size(50_000, 5_000), 2_000);
    }

    #[test]
    fn mid_sized_tables_keep_configured_size() {
        assert_eq!(initial_batch_size(500_000, 1_000), 1_000);
        assert_eq!(initial_batch_size(1_000_000, 4_000), 4_000);
    }

    #[test]
    fn large_tables_halve_with_a_floor() {
        assert_eq!(initial_batch_size(5_000_000, 1_000), 500);
        assert_eq!(initial_batch_size(5_000_000, 600), 500);
        assert_eq!(initial_batch_size(5_000_000, 8_000), 4_000);
    }

    #[test]
    fn huge_tables_quarter_with_a_floor() {
        assert_eq!(initial_batch_size(50_000_000, 1_000), 250);
        assert_eq!(initial_batch_size(50_000_000, 400), 200);
        assert_eq!(initial_batch_size(50_000_000, 10_000), 2_500);
    }

    #[tokio::test]
    async fn relaxed_governor_keeps_batch_size() {
        // Cap far above anything this test process uses.
        let governor = MemoryGovernor::new(1 << 20);
        assert_eq!(governor.govern(1_000).await, 1_000);
    }

    #[tokio::test]
    async fn pressured_governor_halves_down_to_floor() {
        // Zero cap: every sample is above the high water mark.
        let governor = MemoryGovernor::new(0);
        assert_eq!(governor.govern(1_000).await, 500);
        assert_eq!(governor.govern(150).await, MIN_BATCH_FLOOR);
        assert_eq!(governor.govern(MIN_BATCH_FLOOR).await, MIN_BATCH_FLOOR);
    }
}
