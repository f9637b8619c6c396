//! Double-buffered event queue between producer callbacks and the coordinator
//!
//! Device and context notifications may arrive on any internal thread while
//! that subsystem holds its own locks, so posting does nothing except append
//! to the back buffer. All handling happens later on the single consumer.

use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct Shared<E> {
    back: Mutex<Vec<E>>,
    notify: Condvar,
}

impl<E> Shared<E> {
    fn lock(&self) -> MutexGuard<'_, Vec<E>> {
        self.back.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a connected producer/consumer pair
pub fn channel<E>() -> (Postbox<E>, Mailbox<E>) {
    let shared = Arc::new(Shared {
        back: Mutex::new(Vec::new()),
        notify: Condvar::new(),
    });
    (
        Postbox {
            shared: Arc::clone(&shared),
        },
        Mailbox {
            shared,
            front: Vec::new(),
        },
    )
}

/// Producer handle, cheap to clone into any callback
pub struct Postbox<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for Postbox<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E> Postbox<E> {
    /// Append an event and wake the consumer
    pub fn post(&self, event: E) {
        let mut back = self.shared.lock();
        back.push(event);
        self.shared.notify.notify_one();
    }
}

/// Single consumer end; not `Clone`, and draining needs `&mut self`
pub struct Mailbox<E> {
    shared: Arc<Shared<E>>,
    front: Vec<E>,
}

impl<E> Mailbox<E> {
    /// Block until at least one event is pending
    pub fn wait(&self) {
        let mut back = self.shared.lock();
        while back.is_empty() {
            back = self
                .shared
                .notify
                .wait(back)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`Mailbox::wait`] but gives up after `timeout`; returns whether
    /// events are pending
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let back = self.shared.lock();
        let (back, _) = self
            .shared
            .notify
            .wait_timeout_while(back, timeout, |back| back.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        !back.is_empty()
    }

    /// Swap buffers and hand out everything posted since the last drain,
    /// in arrival order
    pub fn drain(&mut self) -> std::vec::Drain<'_, E> {
        {
            let mut back = self.shared.lock();
            mem::swap(&mut *back, &mut self.front);
        }
        self.front.drain(..)
    }

    /// Number of events posted but not yet drained
    pub fn pending(&self) -> usize {
        self.shared.lock().len()
    }

    /// Drop every undelivered event, returning how many there were
    pub fn discard(&mut self) -> usize {
        self.drain().count()
    }
}
