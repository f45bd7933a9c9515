//! Worker sessions
//!
//! A `Worker` is one thread's handle on the engine. It writes through the
//! shard it was bound to at registration and owns a private read cache.
//! Workers are `Send` but not meant to be shared; give each thread its own.

use bytes::Bytes;

use crate::cache::ReadCache;
use crate::error::Result;

use super::{to_key, Engine};

pub struct Worker {
    engine: Engine,
    shard: usize,
    cache: ReadCache,
}

impl Worker {
    pub(super) fn new(engine: Engine, shard: usize, cache: ReadCache) -> Self {
        Self {
            engine,
            shard,
            cache,
        }
    }

    /// Value of `key`, or `None` if it was never set
    ///
    /// Keys must be exactly 16 bytes.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        let key = to_key(key)?;
        self.engine.inner.get(&key, Some(&mut self.cache))
    }

    /// Insert or replace the value of `key`
    ///
    /// The new value is durable when this returns `Ok`. A failed `set`
    /// leaves the previous value (or absence) in place.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let key = to_key(key)?;
        self.engine.inner.set(self.shard, &key, value)
    }

    /// Shard this worker allocates from
    pub fn shard(&self) -> usize {
        self.shard
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}
