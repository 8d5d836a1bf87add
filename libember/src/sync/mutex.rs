use core::cell::UnsafeCell;
use core::ops::{
    Deref,
    DerefMut,
};
use core::sync::atomic::{
    compiler_fence,
    AtomicBool,
    Ordering,
};

const UNLOCKED: bool = false;
const LOCKED: bool = true;

/// A simple spinning mutex. The core library doesn't have one, and the few
/// global singletons (logger, counters) need no more than this.
#[derive(Debug)]
pub struct SimpleMutex<T> {
    data: UnsafeCell<T>,
    lock: AtomicBool,
}

unsafe impl<T: Send> Send for SimpleMutex<T> {}
unsafe impl<T: Send> Sync for SimpleMutex<T> {}

impl<T> SimpleMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            data: UnsafeCell::new(data),
            lock: AtomicBool::new(UNLOCKED),
        }
    }

    pub fn lock(&self) -> SimpleMutexGuard<'_, T> {
        loop {
            let lock_obtained =
                self.lock
                    .compare_exchange(UNLOCKED, LOCKED, Ordering::SeqCst, Ordering::SeqCst);
            if lock_obtained.is_ok() {
                break;
            }
        }
        SimpleMutexGuard { lock: self }
    }
}

impl<T: Default> Default for SimpleMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[derive(Debug)]
pub struct SimpleMutexGuard<'a, T> {
    lock: &'a SimpleMutex<T>,
}

impl<T> SimpleMutexGuard<'_, T> {
    /// Runs `actions` while the lock is held. Useful for advisory locks
    /// like `SimpleMutex<()>` that don't carry the guarded data.
    pub fn execute_while_locked<U, R>(&self, actions: U) -> R
    where
        U: FnOnce() -> R,
    {
        compiler_fence(Ordering::SeqCst);
        let res = actions();
        compiler_fence(Ordering::SeqCst);
        res
    }
}

impl<T> Deref for SimpleMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SimpleMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SimpleMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.lock.store(UNLOCKED, Ordering::SeqCst);
    }
}
