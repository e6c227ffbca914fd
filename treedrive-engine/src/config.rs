use std::time::Duration;

const DEFAULT_PAGE_SIZE: u32 = 50;
const DEFAULT_STATS_CONCURRENCY: u64 = 6;
const DEFAULT_STATS_TIMEOUT_LOCAL_MS: u64 = 4_000;
const DEFAULT_STATS_TIMEOUT_REMOTE_MS: u64 = 12_000;
const DEFAULT_BFS_VISIT_BUDGET: u64 = 3_000;
const DEFAULT_JOB_TICK_MAX_FILES: u64 = 25;
const DEFAULT_JOB_RETRY_BASE_MS: u64 = 2_000;
const DEFAULT_JOB_RETRY_MAX_MS: u64 = 30_000;
const DEFAULT_EVENT_CAPACITY: u64 = 64;

/// A storage backend under which the same path string may resolve
/// differently. Local mounts get the shorter stats timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSource {
    pub id: String,
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Local,
    Remote,
}

impl StorageSource {
    pub fn local(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::Local,
        }
    }

    pub fn remote(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::Remote,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub page_size: u32,
    pub stats_concurrency: usize,
    pub stats_timeout_local: Duration,
    pub stats_timeout_remote: Duration,
    pub bfs_visit_budget: usize,
    pub job_tick_max_files: u32,
    pub job_retry_base: Duration,
    pub job_retry_max: Duration,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            stats_concurrency: DEFAULT_STATS_CONCURRENCY as usize,
            stats_timeout_local: Duration::from_millis(DEFAULT_STATS_TIMEOUT_LOCAL_MS),
            stats_timeout_remote: Duration::from_millis(DEFAULT_STATS_TIMEOUT_REMOTE_MS),
            bfs_visit_budget: DEFAULT_BFS_VISIT_BUDGET as usize,
            job_tick_max_files: DEFAULT_JOB_TICK_MAX_FILES as u32,
            job_retry_base: Duration::from_millis(DEFAULT_JOB_RETRY_BASE_MS),
            job_retry_max: Duration::from_millis(DEFAULT_JOB_RETRY_MAX_MS),
            event_capacity: DEFAULT_EVENT_CAPACITY as usize,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            page_size: read_u64_env("TREEDRIVE_PAGE_SIZE", u64::from(DEFAULT_PAGE_SIZE)) as u32,
            stats_concurrency: read_u64_env(
                "TREEDRIVE_STATS_CONCURRENCY",
                DEFAULT_STATS_CONCURRENCY,
            ) as usize,
            stats_timeout_local: Duration::from_millis(read_u64_env(
                "TREEDRIVE_STATS_TIMEOUT_LOCAL_MS",
                DEFAULT_STATS_TIMEOUT_LOCAL_MS,
            )),
            stats_timeout_remote: Duration::from_millis(read_u64_env(
                "TREEDRIVE_STATS_TIMEOUT_REMOTE_MS",
                DEFAULT_STATS_TIMEOUT_REMOTE_MS,
            )),
            bfs_visit_budget: read_u64_env("TREEDRIVE_BFS_VISIT_BUDGET", DEFAULT_BFS_VISIT_BUDGET)
                as usize,
            job_tick_max_files: read_u64_env(
                "TREEDRIVE_JOB_TICK_MAX_FILES",
                DEFAULT_JOB_TICK_MAX_FILES,
            ) as u32,
            job_retry_base: Duration::from_millis(read_u64_env(
                "TREEDRIVE_JOB_RETRY_BASE_MS",
                DEFAULT_JOB_RETRY_BASE_MS,
            )),
            job_retry_max: Duration::from_millis(read_u64_env(
                "TREEDRIVE_JOB_RETRY_MAX_MS",
                DEFAULT_JOB_RETRY_MAX_MS,
            )),
            event_capacity: read_u64_env("TREEDRIVE_EVENT_CAPACITY", DEFAULT_EVENT_CAPACITY)
                as usize,
        }
    }

    pub fn stats_timeout_for(&self, kind: SourceKind) -> Duration {
        match kind {
            SourceKind::Local => self.stats_timeout_local,
            SourceKind::Remote => self.stats_timeout_remote,
        }
    }
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
