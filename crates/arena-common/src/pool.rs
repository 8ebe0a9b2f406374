// pool.rs — typed object pool
//
// Pre-sized storage reused by slot rather than heap-allocated per spawn,
// generalized to pool several distinct types (entities, messages) behind
// one reusable type rather than a separate fixed array per concern.

use std::any::{Any, TypeId};
use std::fmt;

/// Index into a `Pool`'s backing storage. Opaque to callers outside this
/// module; combine with a `NetworkId` (see `identity.rs`) for anything that
/// crosses the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(usize);

#[derive(Debug)]
pub enum PoolError {
    /// `free` called on a handle that is not currently allocated.
    DoubleFree,
    /// `allocate` called after `free_all`/`dispose` on this pool.
    Disposed,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::DoubleFree => write!(f, "pool: free on an already-returned handle"),
            PoolError::Disposed => write!(f, "pool: allocate on a disposed pool"),
        }
    }
}

impl std::error::Error for PoolError {}

struct Slot<T> {
    value: T,
    in_use: bool,
    ref_count: u32,
}

/// A typed pool of `T`, constructed via a zero-arg `Default` and an
/// optional post-construct initializer applied on every `allocate`.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<usize>,
    disposed: bool,
    name: &'static str,
}

impl<T: Default> Pool<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            disposed: false,
            name,
        }
    }

    /// Allocates a slot, running `init` on the (possibly reused) value.
    pub fn allocate(&mut self, init: impl FnOnce(&mut T)) -> Result<Handle, PoolError> {
        if self.disposed {
            return Err(PoolError::Disposed);
        }
        let idx = if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            self.slots.push(Slot {
                value: T::default(),
                in_use: false,
                ref_count: 0,
            });
            self.slots.len() - 1
        };
        let slot = &mut self.slots[idx];
        slot.in_use = true;
        slot.ref_count = 1;
        init(&mut slot.value);
        Ok(Handle(idx))
    }

    /// Returns the slot to the pool. Errors if the handle is not currently
    /// in use (double free).
    pub fn free(&mut self, handle: Handle) -> Result<(), PoolError> {
        let slot = self
            .slots
            .get_mut(handle.0)
            .filter(|s| s.in_use)
            .ok_or(PoolError::DoubleFree)?;
        slot.ref_count = slot.ref_count.saturating_sub(1);
        if slot.ref_count == 0 {
            slot.in_use = false;
            self.free_list.push(handle.0);
        }
        Ok(())
    }

    /// Increments the slot's reference count; the pool only reclaims the
    /// slot once every owner has called `free`.
    pub fn acquire_shared_ownership(&mut self, handle: Handle) {
        if let Some(slot) = self.slots.get_mut(handle.0).filter(|s| s.in_use) {
            slot.ref_count += 1;
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots.get(handle.0).filter(|s| s.in_use).map(|s| &s.value)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots.get_mut(handle.0).filter(|s| s.in_use).map(|s| &mut s.value)
    }

    pub fn in_use(&self, handle: Handle) -> bool {
        self.slots.get(handle.0).is_some_and(|s| s.in_use)
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Frees every outstanding slot and marks the pool disposed; further
    /// `allocate` calls fail.
    pub fn free_all(&mut self) {
        self.free_list.clear();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            slot.in_use = false;
            slot.ref_count = 0;
            self.free_list.push(idx);
        }
        self.disposed = true;
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        if cfg!(debug_assertions) {
            let leaked = self.slots.iter().filter(|s| s.in_use).count();
            if leaked > 0 {
                tracing::debug!(pool = self.name, leaked, "pool dropped with outstanding object(s)");
            }
        }
    }
}

/// Multiplexes multiple typed `Pool<T>`s keyed by `T`'s `TypeId`. Lookup is
/// linear over the (small, fixed at startup) set of registered types; the
/// session registers one pool per pooled type up front and looks it up by
/// type from then on.
#[derive(Default)]
pub struct PoolAllocator {
    pools: Vec<(TypeId, Box<dyn Any>)>,
}

impl PoolAllocator {
    pub fn new() -> Self {
        Self { pools: Vec::new() }
    }

    pub fn register<T: Default + 'static>(&mut self, name: &'static str) {
        let id = TypeId::of::<T>();
        if self.pools.iter().any(|(t, _)| *t == id) {
            return;
        }
        self.pools.push((id, Box::new(Pool::<T>::new(name))));
    }

    pub fn pool<T: Default + 'static>(&self) -> Option<&Pool<T>> {
        let id = TypeId::of::<T>();
        self.pools
            .iter()
            .find(|(t, _)| *t == id)
            .and_then(|(_, b)| b.downcast_ref::<Pool<T>>())
    }

    pub fn pool_mut<T: Default + 'static>(&mut self) -> Option<&mut Pool<T>> {
        let id = TypeId::of::<T>();
        self.pools
            .iter_mut()
            .find(|(t, _)| *t == id)
            .and_then(|(_, b)| b.downcast_mut::<Pool<T>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Dummy {
        value: i32,
    }

    #[test]
    fn allocate_then_free_reuses_backing_instance() {
        let mut pool: Pool<Dummy> = Pool::new("dummy");
        let h1 = pool.allocate(|d| d.value = 1).unwrap();
        pool.free(h1).unwrap();
        let h2 = pool.allocate(|d| d.value = 2).unwrap();
        // Reused the same backing slot.
        assert_eq!(h1, h2);
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn pool_reuse_distinct_instances_equals_max_concurrent_live() {
        let mut pool: Pool<Dummy> = Pool::new("dummy");
        let a = pool.allocate(|_| {}).unwrap();
        let b = pool.allocate(|_| {}).unwrap();
        let c = pool.allocate(|_| {}).unwrap();
        assert_eq!(pool.live_count(), 3);
        pool.free(a).unwrap();
        pool.free(b).unwrap();
        // Max concurrent live was 3, so capacity should never exceed that
        // no matter how many further allocate/free cycles occur.
        for _ in 0..10 {
            let h = pool.allocate(|_| {}).unwrap();
            pool.free(h).unwrap();
        }
        pool.free(c).unwrap();
        assert_eq!(pool.capacity(), 3);
    }

    #[test]
    fn double_free_is_an_error() {
        let mut pool: Pool<Dummy> = Pool::new("dummy");
        let h = pool.allocate(|_| {}).unwrap();
        pool.free(h).unwrap();
        assert!(matches!(pool.free(h), Err(PoolError::DoubleFree)));
    }

    #[test]
    fn allocate_after_dispose_is_an_error() {
        let mut pool: Pool<Dummy> = Pool::new("dummy");
        pool.free_all();
        assert!(matches!(pool.allocate(|_| {}), Err(PoolError::Disposed)));
    }

    #[test]
    fn shared_ownership_defers_reclaim_until_every_owner_frees() {
        let mut pool: Pool<Dummy> = Pool::new("dummy");
        let h = pool.allocate(|_| {}).unwrap();
        pool.acquire_shared_ownership(h);
        pool.free(h).unwrap();
        assert!(pool.in_use(h));
        pool.free(h).unwrap();
        assert!(!pool.in_use(h));
    }

    #[derive(Default)]
    struct Other {
        tag: u8,
    }

    #[test]
    fn pool_allocator_multiplexes_by_type() {
        let mut alloc = PoolAllocator::new();
        alloc.register::<Dummy>("dummy");
        alloc.register::<Other>("other");

        let h = alloc.pool_mut::<Dummy>().unwrap().allocate(|d| d.value = 7).unwrap();
        assert_eq!(alloc.pool::<Dummy>().unwrap().get(h).unwrap().value, 7);
        assert!(alloc.pool::<Other>().unwrap().get(Handle(0)).is_none());
    }
}
