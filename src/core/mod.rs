pub mod config;
pub mod errors;

pub use config::{CacheConfig, ExecutorDefinition, ParallelConfig};
pub use errors::{MemoError, Result};
