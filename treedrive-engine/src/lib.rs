pub(crate) mod backoff;
pub mod capabilities;
pub mod children;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub(crate) mod flight;
pub mod nav;
pub mod paths;
pub mod poller;
pub mod state;
pub mod stats;

pub use config::{EngineConfig, SourceKind, StorageSource};
pub use engine::TreeCacheEngine;
pub use error::{CacheError, EngineError, JobError};
pub use events::EngineEvent;
pub use poller::{JobHandle, JobPoller};
pub use state::{ExpandState, JobResume, StateStore};
pub use stats::StatsOutcome;
