//! Bounded, most-recent-wins telemetry buffer.
//!
//! The buffer is replaced wholesale on every successful refresh rather than
//! appended to. Readers get an `Arc` snapshot and can never observe a
//! half-written buffer; writers are serialized.

use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::types::FeatureVector;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BufferError {
    #[error("Readings out of order at index {index}: timestamps must strictly increase")]
    OutOfOrder { index: usize },
}

pub struct RollingBuffer {
    capacity: usize,
    contents: ArcSwap<Vec<FeatureVector>>,
    write_lock: Mutex<()>,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            contents: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Atomically swap in a fresh, time-ordered sequence.
    ///
    /// Only the newest `capacity` readings are kept. An out-of-order
    /// sequence is rejected and the current contents stay untouched.
    /// Returns the new size.
    pub fn replace(&self, mut vectors: Vec<FeatureVector>) -> Result<usize, BufferError> {
        if let Some(index) = vectors
            .windows(2)
            .position(|w| w[1].timestamp <= w[0].timestamp)
        {
            return Err(BufferError::OutOfOrder { index: index + 1 });
        }
        if vectors.len() > self.capacity {
            vectors.drain(..vectors.len() - self.capacity);
        }

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let len = vectors.len();
        self.contents.store(Arc::new(vectors));
        Ok(len)
    }

    /// Immutable view of the current contents.
    pub fn snapshot(&self) -> Arc<Vec<FeatureVector>> {
        self.contents.load_full()
    }

    pub fn size(&self) -> usize {
        self.contents.load().len()
    }

    /// The newest `n` readings, or `None` if fewer are buffered.
    pub fn latest(&self, n: usize) -> Option<Vec<FeatureVector>> {
        let snap = self.contents.load();
        (snap.len() >= n).then(|| snap[snap.len() - n..].to_vec())
    }

    /// The single newest reading.
    pub fn newest(&self) -> Option<FeatureVector> {
        self.contents.load().last().cloned()
    }
}
