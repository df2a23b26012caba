//! Single-slot exchange for exclusively owned handles.
//!
//! # Responsibility
//! - Hold at most one handle (typically a storage connection) and lend it to
//!   exactly one borrower at a time.
//! - Move the handle by value between threads instead of sharing it.
//!
//! # Invariants
//! - While a `HandleLease` is alive the slot is empty and every other
//!   `acquire()` blocks.
//! - Dropping a lease (including during unwinding) puts the handle back.
//! - A lease that is leaked with `std::mem::forget` empties the slot forever;
//!   later acquisitions hang instead of observing a missing handle.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Blocking single-slot exchange for one owned handle.
pub struct HandleQueue<T> {
    slot: Mutex<Option<T>>,
    available: Condvar,
}

impl<T> HandleQueue<T> {
    /// Creates a queue that already holds `handle`.
    pub fn new(handle: T) -> Self {
        Self {
            slot: Mutex::new(Some(handle)),
            available: Condvar::new(),
        }
    }

    /// Blocks until the handle is present and takes it.
    pub fn acquire(&self) -> HandleLease<'_, T> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(handle) = slot.take() {
                return HandleLease {
                    queue: self,
                    handle: Some(handle),
                };
            }
            self.available.wait(&mut slot);
        }
    }

    /// Takes the handle only if it is present right now.
    pub fn try_acquire(&self) -> Option<HandleLease<'_, T>> {
        let handle = self.slot.lock().take()?;
        Some(HandleLease {
            queue: self,
            handle: Some(handle),
        })
    }

    /// Returns a leased handle to the queue.
    ///
    /// Equivalent to dropping the lease; exists so call sites can make the
    /// acquire/release pairing explicit.
    pub fn release(lease: HandleLease<'_, T>) {
        drop(lease);
    }

    /// Returns whether the handle is currently parked in the slot.
    pub fn is_available(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Consumes the queue and hands back the parked handle.
    ///
    /// Returns `None` only if a lease was leaked.
    pub fn into_inner(self) -> Option<T> {
        self.slot.into_inner()
    }

    fn restore(&self, handle: T) {
        let mut slot = self.slot.lock();
        *slot = Some(handle);
        drop(slot);
        self.available.notify_one();
    }
}

impl<T> fmt::Debug for HandleQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleQueue")
            .field("available", &self.is_available())
            .finish()
    }
}

/// Scoped borrow of the handle parked in a `HandleQueue`.
pub struct HandleLease<'q, T> {
    queue: &'q HandleQueue<T>,
    handle: Option<T>,
}

impl<T> Deref for HandleLease<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.handle
            .as_ref()
            .expect("handle lease holds its handle until dropped")
    }
}

impl<T> DerefMut for HandleLease<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle
            .as_mut()
            .expect("handle lease holds its handle until dropped")
    }
}

impl<T> Drop for HandleLease<'_, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.queue.restore(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HandleQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lease_empties_slot_until_dropped() {
        let queue = HandleQueue::new(7_u32);
        let lease = queue.acquire();
        assert_eq!(*lease, 7);
        assert!(!queue.is_available());
        assert!(queue.try_acquire().is_none());

        HandleQueue::release(lease);
        assert!(queue.is_available());
        assert_eq!(queue.into_inner(), Some(7));
    }

    #[test]
    fn mutations_through_lease_persist() {
        let queue = HandleQueue::new(Vec::<u8>::new());
        {
            let mut lease = queue.acquire();
            lease.push(1);
        }
        queue.acquire().push(2);
        assert_eq!(queue.into_inner(), Some(vec![1, 2]));
    }

    #[test]
    fn acquire_blocks_until_release() {
        let queue = Arc::new(HandleQueue::new(()));
        let lease = queue.acquire();
        let acquired = Arc::new(AtomicUsize::new(0));

        let worker = {
            let queue = Arc::clone(&queue);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _lease = queue.acquire();
                acquired.fetch_add(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);

        drop(lease);
        worker.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn never_yields_two_live_handles() {
        let queue = Arc::new(HandleQueue::new(()));
        let live = Arc::new(AtomicUsize::new(0));
        let max_live = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let live = Arc::clone(&live);
                let max_live = Arc::clone(&max_live);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let _lease = queue.acquire();
                        let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                        max_live.fetch_max(now, Ordering::SeqCst);
                        live.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(max_live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_is_restored_when_borrower_panics() {
        let queue = Arc::new(HandleQueue::new(3_i32));
        let result = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let _lease = queue.acquire();
                panic!("borrower failure");
            })
            .join()
        };
        assert!(result.is_err());
        assert!(queue.is_available());
    }
}
