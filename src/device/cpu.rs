use std::sync::Arc;

use super::pool::ResourcePool;
use crate::error::Result;

/// Capability limits and pooled sub-resources, shared by every descriptor
/// created against one CPU handle.
#[derive(Debug)]
pub struct Internal {
    parallelism: usize,
    row_scratch: ResourcePool<Vec<f32>>,
}

impl Internal {
    fn new() -> Self {
        #[cfg(feature = "rayon")]
        let parallelism = rayon::current_num_threads();
        #[cfg(not(feature = "rayon"))]
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let row_scratch = ResourcePool::new();
        Self {
            parallelism,
            row_scratch,
        }
    }

    /// Worker parallelism width of this device.
    #[inline]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Run `f` against a pooled f32 scratch row of `len` elements, zeroed.
    pub fn with_scratch<R>(&self, len: usize, f: impl FnOnce(&mut [f32]) -> Result<R>) -> Result<R> {
        self.row_scratch.with(
            || Ok(Vec::with_capacity(len)),
            |buf| {
                buf.clear();
                buf.resize(len, 0.0);
                f(&mut buf[..len])
            },
        )
    }
}

/// The CPU device context. Cloning shares the same internals.
#[derive(Debug, Clone)]
pub struct Handle {
    device_id: usize,
    internal: Arc<Internal>,
}

impl Handle {
    pub fn create(device_id: usize) -> Result<Self> {
        let internal = Arc::new(Internal::new());
        log::debug!(
            "created cpu handle {device_id} with parallelism {}",
            internal.parallelism()
        );
        Ok(Self {
            device_id,
            internal,
        })
    }

    #[inline]
    pub fn device_id(&self) -> usize {
        self.device_id
    }

    /// Shared internals; descriptors hold a clone of this, never the handle.
    #[inline]
    pub fn internal(&self) -> &Arc<Internal> {
        &self.internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create() -> Result<()> {
        let handle = Handle::create(0)?;
        assert_eq!(handle.device_id(), 0);
        assert!(handle.internal().parallelism() >= 1);
        Ok(())
    }

    #[test]
    fn test_scratch_reuse() -> Result<()> {
        let handle = Handle::create(0)?;
        let internal = handle.internal();

        internal.with_scratch(8, |buf| {
            assert_eq!(buf.len(), 8);
            assert!(buf.iter().all(|&x| x == 0.0));
            buf[0] = 1.0;
            Ok(())
        })?;
        // reused scratch comes back zeroed at the new length
        internal.with_scratch(4, |buf| {
            assert_eq!(buf.len(), 4);
            assert!(buf.iter().all(|&x| x == 0.0));
            Ok(())
        })?;
        Ok(())
    }
}
