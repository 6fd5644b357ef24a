//! Runtime configuration, constructible programmatically or from the
//! process environment — the same shape as the original's `env.rs`
//! accessors (`mesh_env_get`), generalized into a single struct read
//! once at `runtime::init`.

use std::time::Duration;

use crate::io_net::poller::NetBackend;
use crate::task::STACK_SIZE;

/// `PICASSO_WORKERS` — scheduler worker thread count.
const ENV_WORKERS: &str = "PICASSO_WORKERS";
/// `PICASSO_STACK_SIZE` — task stack size in bytes, excluding the guard page.
const ENV_STACK_SIZE: &str = "PICASSO_STACK_SIZE";
/// `PICASSO_GC_PERIOD_MS` — milliseconds between collector sweeps.
const ENV_GC_PERIOD_MS: &str = "PICASSO_GC_PERIOD_MS";
/// `PICASSO_DISK_QUEUE_DEPTH` — per-worker disk submission ring depth.
const ENV_DISK_QUEUE_DEPTH: &str = "PICASSO_DISK_QUEUE_DEPTH";

/// Default number of scheduler worker threads, matching the original's
/// `SCHEDULER_THREAD_POOL_SIZE`.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default period between GC cycles: `GC_TIMEPERIOD` in the original is
/// a 10 second `usleep`.
pub const DEFAULT_GC_PERIOD: Duration = Duration::from_secs(10);

/// Default per-worker disk submission ring depth. No original_source
/// value was found for this constant; see DESIGN.md for the Open
/// Question decision.
pub const DEFAULT_DISK_QUEUE_DEPTH: usize = 128;

/// Runtime-wide tunables, read once at process start and handed to every
/// subsystem that needs one of them.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub worker_count: usize,
    pub task_stack_size: usize,
    pub gc_period: Duration,
    pub disk_queue_depth: usize,
    pub net_backend: NetBackend,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_count: DEFAULT_WORKER_COUNT,
            task_stack_size: STACK_SIZE,
            gc_period: DEFAULT_GC_PERIOD,
            disk_queue_depth: DEFAULT_DISK_QUEUE_DEPTH,
            net_backend: NetBackend::default_for_platform(),
        }
    }
}

impl RuntimeConfig {
    /// Start from the defaults, then apply any of `PICASSO_WORKERS`,
    /// `PICASSO_STACK_SIZE`, `PICASSO_GC_PERIOD_MS`,
    /// `PICASSO_DISK_QUEUE_DEPTH` found in the environment. Malformed
    /// values are logged and ignored rather than treated as fatal —
    /// these are developer conveniences, not a config format with its
    /// own validation contract.
    pub fn from_env() -> Self {
        let mut cfg = RuntimeConfig::default();

        if let Some(v) = read_env_usize(ENV_WORKERS) {
            cfg.worker_count = v.max(1);
        }
        if let Some(v) = read_env_usize(ENV_STACK_SIZE) {
            cfg.task_stack_size = v;
        }
        if let Some(v) = read_env_usize(ENV_GC_PERIOD_MS) {
            cfg.gc_period = Duration::from_millis(v as u64);
        }
        if let Some(v) = read_env_usize(ENV_DISK_QUEUE_DEPTH) {
            cfg.disk_queue_depth = v;
        }

        cfg
    }
}

fn read_env_usize(key: &str) -> Option<usize> {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<usize>() {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("picasso-rt: ignoring malformed {key}={raw:?}");
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_original_constants() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.task_stack_size, 1024 * 1024);
        assert_eq!(cfg.gc_period, Duration::from_secs(10));
    }

    #[test]
    fn test_from_env_overrides_worker_count() {
        std::env::set_var(ENV_WORKERS, "7");
        let cfg = RuntimeConfig::from_env();
        assert_eq!(cfg.worker_count, 7);
        std::env::remove_var(ENV_WORKERS);
    }

    #[test]
    fn test_from_env_ignores_malformed_value() {
        std::env::set_var(ENV_GC_PERIOD_MS, "not-a-number");
        let cfg = RuntimeConfig::from_env();
        assert_eq!(cfg.gc_period, DEFAULT_GC_PERIOD);
        std::env::remove_var(ENV_GC_PERIOD_MS);
    }
}
