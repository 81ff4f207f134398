//! The pool pair shared by a context tree.
//!
//! A [`Cache`] holds the always-present process pool, the optional durable
//! named pool, and the lock that serializes indexing, cache probes and
//! reference registration.

pub mod index;
pub mod named;
pub mod process;

pub use index::{CacheIndex, CachedOutput, CachedOutputs};
pub use named::NamedPool;
pub use process::ProcessPool;

use parking_lot::{Mutex, MutexGuard};

use crate::core::config::CacheConfig;
use crate::core::errors::Result;

#[derive(Debug)]
pub struct Cache {
    process_pool: ProcessPool,
    named_pool: Option<NamedPool>,
    lock: Mutex<()>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    /// A cache with only the process pool
    pub fn new() -> Self {
        Self {
            process_pool: ProcessPool::new(),
            named_pool: None,
            lock: Mutex::new(()),
        }
    }

    pub fn with_named_pool(named_pool: NamedPool) -> Self {
        Self {
            named_pool: Some(named_pool),
            ..Self::new()
        }
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(match &config.named_pool {
            Some(path) => Self::with_named_pool(NamedPool::open(path, config.compression_level)?),
            None => Self::new(),
        })
    }

    pub fn process_pool(&self) -> &ProcessPool {
        &self.process_pool
    }

    pub fn named_pool(&self) -> Option<&NamedPool> {
        self.named_pool.as_ref()
    }

    /// Enter the pool pair's critical section. Never hold this across an await.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Index the named pool if there is one. Safe to call repeatedly.
    pub fn create_index(&self) -> Result<bool> {
        let _guard = self.lock();
        match &self.named_pool {
            Some(named) => named.create_index(),
            None => Ok(false),
        }
    }

    pub fn flush(&self) -> Result<()> {
        if let Some(named) = &self.named_pool {
            named.flush()?;
        }
        Ok(())
    }
}
