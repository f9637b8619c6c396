//! Bounded, blocking pool for recycling fixed-shape buffers

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use crossbeam::utils::CachePadded;
use tracing::debug;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

type AllocFn<T> = Box<dyn Fn() -> T + Send + Sync>;
type FreeFn<T> = Box<dyn Fn(T) + Send + Sync>;

/// A buffer slot checked out of a [`BufferPool`]
///
/// Must be handed back with [`BufferPool::release`]; dropping it instead
/// leaks the slot as permanently busy.
#[derive(Debug)]
pub struct PoolResource<T> {
    pool_id: u64,
    slot: u64,
    value: T,
}

impl<T> PoolResource<T> {
    pub fn slot(&self) -> u64 {
        self.slot
    }
}

impl<T> Deref for PoolResource<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for PoolResource<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

struct Slots<T> {
    available: Vec<PoolResource<T>>,
    busy: Vec<u64>,
    next_slot: u64,
}

#[derive(Default)]
struct Counters {
    allocated: AtomicUsize,
    acquired: AtomicUsize,
    throttled: AtomicUsize,
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub busy: usize,
    pub available: usize,
    pub max_size: usize,
    pub allocated: usize,
    pub acquired: usize,
    pub throttled: usize,
}

/// Recycling pool bounded at `max_size` live allocations
///
/// Every resource is either *available* (free list) or *busy* (checked out).
/// `acquire` prefers recycling, allocates while there is slack, and blocks
/// once `busy + available` reaches `max_size` until a release frees a slot.
pub struct BufferPool<T> {
    id: u64,
    name: String,
    max_size: usize,
    slots: Mutex<Slots<T>>,
    available_cond: Condvar,
    alloc: AllocFn<T>,
    free: FreeFn<T>,
    counters: CachePadded<Counters>,
}

impl<T> BufferPool<T> {
    pub fn new(
        name: impl Into<String>,
        max_size: usize,
        alloc: impl Fn() -> T + Send + Sync + 'static,
        free: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            max_size: max_size.max(1),
            slots: Mutex::new(Slots {
                available: Vec::new(),
                busy: Vec::new(),
                next_slot: 0,
            }),
            available_cond: Condvar::new(),
            alloc: Box::new(alloc),
            free: Box::new(free),
            counters: CachePadded::new(Counters::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out a resource, blocking while the pool is saturated
    pub fn acquire(&self) -> PoolResource<T> {
        let mut slots = self.lock();

        let resource = if let Some(resource) = slots.available.pop() {
            resource
        } else if slots.busy.len() + slots.available.len() < self.max_size {
            let slot = slots.next_slot;
            slots.next_slot += 1;
            self.counters.allocated.fetch_add(1, Ordering::Relaxed);
            PoolResource {
                pool_id: self.id,
                slot,
                value: (self.alloc)(),
            }
        } else {
            debug!(
                pool = %self.name,
                "Throttling pool acquisition, waiting for an old buffer to be released"
            );
            self.counters.throttled.fetch_add(1, Ordering::Relaxed);
            loop {
                slots = self
                    .available_cond
                    .wait(slots)
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(resource) = slots.available.pop() {
                    break resource;
                }
            }
        };

        slots.busy.push(resource.slot);
        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        resource
    }

    /// Check out a resource wrapped in a guard that releases it on drop
    pub fn acquire_pooled(self: &Arc<Self>) -> Pooled<T> {
        Pooled {
            resource: Some(self.acquire()),
            pool: Arc::clone(self),
        }
    }

    /// Return a resource to the free list and wake every waiter
    ///
    /// # Panics
    ///
    /// If the resource belongs to another pool or is not checked out.
    pub fn release(&self, resource: PoolResource<T>) {
        assert_eq!(
            resource.pool_id, self.id,
            "resource {} released into foreign '{}' pool",
            resource.slot, self.name
        );

        let mut slots = self.lock();
        match slots.busy.iter().position(|&slot| slot == resource.slot) {
            Some(pos) => {
                slots.busy.swap_remove(pos);
            }
            None => {
                drop(slots);
                panic!(
                    "didn't find released resource {} in '{}' pool's busy list",
                    resource.slot, self.name
                );
            }
        }
        slots.available.push(resource);
        self.available_cond.notify_all();
    }

    /// Visit the slot id of every checked-out resource
    pub fn for_each_busy(&self, mut f: impl FnMut(u64)) {
        let slots = self.lock();
        slots.busy.iter().copied().for_each(&mut f);
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.lock();
        PoolStats {
            busy: slots.busy.len(),
            available: slots.available.len(),
            max_size: self.max_size,
            allocated: self.counters.allocated.load(Ordering::Relaxed),
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            throttled: self.counters.throttled.load(Ordering::Relaxed),
        }
    }
}

impl<T> Drop for BufferPool<T> {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap_or_else(PoisonError::into_inner);

        if !slots.busy.is_empty() && !thread::panicking() {
            panic!(
                "'{}' pool destroyed with {} resources still in use",
                self.name,
                slots.busy.len()
            );
        }

        for resource in slots.available.drain(..) {
            (self.free)(resource.value);
        }
    }
}

/// A pool resource that goes back to its pool when dropped
pub struct Pooled<T> {
    resource: Option<PoolResource<T>>,
    pool: Arc<BufferPool<T>>,
}

impl<T> Pooled<T> {
    pub fn slot(&self) -> u64 {
        self.resource.as_ref().map_or(0, PoolResource::slot)
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("pooled resource taken before drop"),
        }
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.resource {
            Some(resource) => resource,
            None => unreachable!("pooled resource taken before drop"),
        }
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Pooled<T> {
    fn as_ref(&self) -> &[u8] {
        (**self).as_ref()
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release(resource);
        }
    }
}
