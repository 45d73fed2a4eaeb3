use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reference-counted value behind a reader-writer lock.
///
/// Writers get exclusive access for structural edits, readers share access
/// for traversals that must not observe a half-applied edit.
#[derive(Debug)]
pub struct Shared<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.inner.try_read()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        Arc::get_mut(&mut self.inner).map(|lock| lock.get_mut())
    }

    pub fn arc(&self) -> Arc<RwLock<T>> {
        Arc::clone(&self.inner)
    }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T> Default for Shared<T>
where
    T: Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Shared;

    #[test]
    fn readers_block_writer() {
        let shared = Shared::new(vec![1, 2, 3]);
        let other = shared.clone();

        {
            let _guard = shared.read();
            assert!(other.try_read().is_some());
            assert!(other.arc().try_write().is_none());
        }

        other.write().push(4);
        assert_eq!(shared.read().len(), 4);
    }

    #[test]
    fn get_mut_requires_unique_owner() {
        let mut shared = Shared::new(5);
        let clone = shared.clone();
        assert!(shared.get_mut().is_none());

        drop(clone);
        *shared.get_mut().unwrap() += 1;
        assert_eq!(*shared.read(), 6);
    }
}
