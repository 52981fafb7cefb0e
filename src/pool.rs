//! Reusable scratch buffers for raw socket reads.
//!
//! A connection needs one transport-sized buffer for the life of each read
//! call. Instead of allocating per connection, buffers rotate through a
//! bounded free list and fall back to a fresh allocation when it runs dry.

use core::ops::{Deref, DerefMut};
use std::{mem, sync::Mutex};

use crate::specification::{BUF_SIZE, POOL_MAX_BUFS};

#[derive(Debug)]
pub(crate) struct BufferPool(Mutex<Vec<Vec<u8>>>);

impl BufferPool {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        BufferPool(Mutex::new(Vec::with_capacity(capacity)))
    }

    /// Takes a `BUF_SIZE` scratch buffer, reusing a pooled one if available.
    /// Contents are unspecified. The buffer returns to the pool when the
    /// guard drops.
    pub(crate) fn get(&'static self) -> PooledBuf {
        let recycled = self.0.lock().unwrap().pop();
        let mut buf = recycled.unwrap_or_else(|| vec![0u8; BUF_SIZE]);
        buf.resize(BUF_SIZE, 0);
        PooledBuf { buf, pool: self }
    }

    fn put(&self, buf: Vec<u8>) {
        let mut free = self.0.lock().unwrap();
        if free.len() < POOL_MAX_BUFS {
            free.push(buf);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// A scratch buffer on loan from the pool.
#[derive(Debug)]
pub(crate) struct PooledBuf {
    buf: Vec<u8>,
    pool: &'static BufferPool,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.pool.put(mem::take(&mut self.buf));
    }
}
