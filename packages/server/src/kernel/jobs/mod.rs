pub mod engine;
pub mod job;
pub mod log;
mod worker;

pub use engine::{EngineConfig, EngineService, JobEngine};
pub use job::{JobStatus, SyncJob};
pub use log::{LogLevel, SyncLog};
