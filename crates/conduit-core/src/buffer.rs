//! Audio buffers exchanged between endpoints.
//!
//! A [`Buffer`] is one channel of samples, reference counted and immutable once
//! published: every Link fed by a Source receives a clone of the same
//! allocation. [`BufferPool`] recycles allocations for a fixed frame count so
//! a warmed-up real-time path stops allocating.

use parking_lot::Mutex;
use std::sync::Arc;

/// Sample rate and period size shared by a graph and its nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per period.
    pub buffer_size: usize,
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 512,
        }
    }
}

/// Immutable, shared block of samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Buffer {
    samples: Arc<Vec<f32>>,
}

impl Buffer {
    /// Wraps owned samples.
    pub fn from_vec(samples: Vec<f32>) -> Self {
        Self {
            samples: Arc::new(samples),
        }
    }

    /// A zeroed buffer of `frames` samples.
    pub fn silence(frames: usize) -> Self {
        Self::from_vec(vec![0.0; frames])
    }

    /// The samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if the buffer holds no frames.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True if no other clone shares this allocation.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.samples) == 1
    }

    fn into_vec(self) -> Option<Vec<f32>> {
        Arc::try_unwrap(self.samples).ok()
    }
}

impl From<Vec<f32>> for Buffer {
    fn from(samples: Vec<f32>) -> Self {
        Self::from_vec(samples)
    }
}

impl AsRef<[f32]> for Buffer {
    fn as_ref(&self) -> &[f32] {
        self.samples()
    }
}

/// Pool of reusable sample allocations of one frame count.
pub struct BufferPool {
    frames: usize,
    free: Mutex<Vec<Vec<f32>>>,
    capacity: usize,
}

impl BufferPool {
    /// Creates a pool handing out `frames`-long buffers, retaining at most
    /// `capacity` spare allocations.
    pub fn new(frames: usize, capacity: usize) -> Self {
        Self {
            frames,
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Frames per buffer.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Returns a zeroed sample vector, reusing a spare allocation if present.
    pub fn obtain(&self) -> Vec<f32> {
        match self.free.lock().pop() {
            Some(mut samples) => {
                samples.clear();
                samples.resize(self.frames, 0.0);
                samples
            }
            None => vec![0.0; self.frames],
        }
    }

    /// Takes back a buffer's allocation if nothing else shares it.
    ///
    /// Returns true if the allocation was retained.
    pub fn recycle(&self, buffer: Buffer) -> bool {
        let Some(samples) = buffer.into_vec() else {
            return false;
        };
        let mut free = self.free.lock();
        if free.len() >= self.capacity || samples.capacity() < self.frames {
            return false;
        }
        free.push(samples);
        true
    }

    /// Spare allocations currently held.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_samples() {
        let a = Buffer::from_vec(vec![1.0, 2.0, 3.0]);
        let b = a.clone();
        assert!(!a.is_unique());
        assert_eq!(b.samples(), &[1.0, 2.0, 3.0]);
        drop(b);
        assert!(a.is_unique());
    }

    #[test]
    fn pool_reuses_unique_buffers_only() {
        let pool = BufferPool::new(4, 2);
        let mut samples = pool.obtain();
        samples[0] = 0.5;
        let buffer = Buffer::from_vec(samples);
        let shared = buffer.clone();

        assert!(!pool.recycle(buffer));
        assert_eq!(pool.available(), 0);

        assert!(pool.recycle(shared));
        assert_eq!(pool.available(), 1);

        let reused = pool.obtain();
        assert_eq!(reused, vec![0.0; 4]);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn pool_respects_capacity() {
        let pool = BufferPool::new(2, 1);
        assert!(pool.recycle(Buffer::silence(2)));
        assert!(!pool.recycle(Buffer::silence(2)));
        assert_eq!(pool.available(), 1);
    }
}
