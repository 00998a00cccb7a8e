use std::sync::Mutex;

use crate::error::Result;

/// An explicit free-list of reusable sub-resources owned by a device handle.
///
/// `with` pops a free sub-resource if one exists, constructs a new one
/// otherwise (the pool grows unbounded, never blocks), hands it to the
/// callback, and returns it to the free-list only when the callback succeeds.
/// A sub-resource whose callback failed is dropped on the spot, so a
/// half-bound resource can never be observed by a later caller.
///
/// Pools are per-handle; each `with` invocation privately owns its popped
/// sub-resource for the duration of the callback.
#[derive(Debug, Default)]
pub struct ResourcePool<T> {
    free: Mutex<Vec<T>>,
}

impl<T> ResourcePool<T> {
    pub fn new() -> Self {
        let free = Mutex::new(Vec::new());
        Self { free }
    }

    /// Run `f` with a pooled sub-resource, constructing one via `create` when
    /// the free-list is empty.
    pub fn with<R>(
        &self,
        create: impl FnOnce() -> Result<T>,
        f: impl FnOnce(&mut T) -> Result<R>,
    ) -> Result<R> {
        let popped = self.free.lock().expect("failed to lock").pop();
        let mut resource = match popped {
            Some(resource) => resource,
            None => create()?,
        };
        let result = f(&mut resource);
        if result.is_ok() {
            self.free.lock().expect("failed to lock").push(resource);
        }
        result
    }

    /// Number of sub-resources currently sitting in the free-list.
    pub fn idle(&self) -> usize {
        self.free.lock().expect("failed to lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_pop_or_create() -> Result<()> {
        let pool = ResourcePool::<Vec<u8>>::new();
        assert_eq!(pool.idle(), 0);

        pool.with(|| Ok(vec![0u8; 16]), |buf| Ok(buf.len()))?;
        assert_eq!(pool.idle(), 1);

        // the pooled buffer is reused, not reconstructed
        let len = pool.with(|| Ok(vec![0u8; 32]), |buf| Ok(buf.len()))?;
        assert_eq!(len, 16);
        assert_eq!(pool.idle(), 1);
        Ok(())
    }

    #[test]
    fn test_discard_on_failure() {
        let pool = ResourcePool::<Vec<u8>>::new();
        let result: Result<()> = pool.with(
            || Ok(vec![0u8; 16]),
            |_| Err(Error::OperatorExecutionFailed("phony".into())),
        );
        assert!(result.is_err());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_concurrent_growth() {
        use std::sync::{Arc, Barrier};

        let pool = Arc::new(ResourcePool::<Vec<u8>>::new());
        let barrier = Arc::new(Barrier::new(4));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..64 {
                        pool.with(|| Ok(vec![0u8; 64]), |buf| Ok(buf[0]))
                            .expect("pool callback");
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("thread panicked");
        }
        // never more buffers than peak concurrency
        assert!(pool.idle() >= 1 && pool.idle() <= 4);
    }
}
