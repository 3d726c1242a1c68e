//! The GPU resource cache
//!
//! One pool of materialized resources per rendering context, indexed two
//! ways: a scratch index where any number of idle, interchangeable
//! resources share a key, and a unique index where a key names at most
//! one resource. Structural mutation is serialized by a cache-wide lock;
//! external references are RAII guards that return a resource to the idle
//! pool on drop.
//!
//! Eviction never talks to the GPU: handles of destroyed resources are
//! queued and drained by the drawing manager on the flush thread.

use std::sync::{Arc, Mutex, Weak};

use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

use vexel_core::key::KeyWords;
use vexel_core::{ScratchKey, UniqueKey, WeakUniqueKey};

use crate::backend::TextureHandle;
use crate::resource::Resource;

new_key_type! {
    /// Arena id of a cached resource
    pub struct ResourceId;
}

struct Entry {
    resource: Arc<dyn Resource>,
    memory: usize,
    scratch_key: Option<ScratchKey>,
    unique_key: Option<WeakUniqueKey>,
    external_refs: usize,
    last_used: u64,
    sequence: u64,
}

impl Entry {
    /// Purgeable: no external references and no strongly held unique
    /// binding.
    fn purgeable(&self) -> bool {
        self.external_refs == 0
            && self
                .unique_key
                .as_ref()
                .map_or(true, |key| key.strong_count() == 0)
    }
}

#[derive(Default)]
struct CacheState {
    entries: SlotMap<ResourceId, Entry>,
    scratch_index: FxHashMap<ScratchKey, SmallVec<[ResourceId; 2]>>,
    unique_index: FxHashMap<KeyWords, ResourceId>,
    total_bytes: usize,
    tick: u64,
    sequence: u64,
    pending_releases: Vec<TextureHandle>,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Drop an entry's unique binding. Irreversible: the domain never
    /// regains exclusivity through this cache.
    fn dissolve_unique(&mut self, id: ResourceId) {
        if let Some(entry) = self.entries.get_mut(id) {
            if let Some(key) = entry.unique_key.take() {
                self.unique_index.remove(key.words());
            }
        }
    }

    fn evict(&mut self, id: ResourceId) {
        let Some(entry) = self.entries.remove(id) else {
            return;
        };
        if let Some(key) = &entry.scratch_key {
            if let Some(bucket) = self.scratch_index.get_mut(key) {
                bucket.retain(|candidate| *candidate != id);
                if bucket.is_empty() {
                    self.scratch_index.remove(key);
                }
            }
        }
        if let Some(key) = &entry.unique_key {
            self.unique_index.remove(key.words());
        }
        self.total_bytes -= entry.memory;
        if entry.resource.owns_gpu_handle() {
            if let Some(handle) = entry.resource.gpu_handle() {
                self.pending_releases.push(handle);
            }
        }
        tracing::debug!(memory = entry.memory, "evicted cached resource");
    }
}

struct CacheShared {
    state: Mutex<CacheState>,
}

impl CacheShared {
    fn add_ref(&self, id: ResourceId) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(id) {
            entry.external_refs += 1;
        }
    }

    fn release_ref(&self, id: ResourceId) {
        let mut state = self.state.lock().unwrap();
        let tick = state.next_tick();
        if let Some(entry) = state.entries.get_mut(id) {
            debug_assert!(entry.external_refs > 0, "resource reference underflow");
            entry.external_refs -= 1;
            if entry.external_refs == 0 {
                entry.last_used = tick;
            }
        }
    }
}

/// Cache statistics for performance monitoring
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    /// Lookups that returned a cached resource
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Resources currently tracked
    pub resource_count: usize,
    /// Total tracked memory in bytes
    pub total_bytes: usize,
}

/// Pool of materialized GPU resources, indexed by scratch and unique keys
///
/// Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<CacheShared>,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CacheShared {
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Register a resource under its scratch key and, when given, a unique
    /// key. An existing resource bound to the same unique key loses the
    /// binding; it is replaced, never duplicated. The returned reference
    /// marks the resource in use.
    pub fn insert(
        &self,
        resource: Arc<dyn Resource>,
        unique_key: Option<&UniqueKey>,
    ) -> ResourceRef {
        let scratch_key = resource
            .scratch_key()
            .map(ScratchKey::from)
            .filter(|key| !key.is_empty());
        let memory = resource.memory_usage();
        let mut state = self.inner.state.lock().unwrap();
        if let Some(key) = unique_key {
            if let Some(old_id) = state.unique_index.remove(key.words()) {
                if let Some(old) = state.entries.get_mut(old_id) {
                    old.unique_key = None;
                }
            }
        }
        let last_used = state.next_tick();
        state.sequence += 1;
        let sequence = state.sequence;
        let entry = Entry {
            resource: Arc::clone(&resource),
            memory,
            scratch_key: scratch_key.clone(),
            unique_key: unique_key.map(UniqueKey::downgrade),
            external_refs: 1,
            last_used,
            sequence,
        };
        let id = state.entries.insert(entry);
        if let Some(key) = scratch_key {
            state.scratch_index.entry(key).or_default().push(id);
        }
        if let Some(key) = unique_key {
            state.unique_index.insert(key.words().clone(), id);
        }
        state.total_bytes += memory;
        ResourceRef {
            cache: Arc::downgrade(&self.inner),
            id,
            resource,
        }
    }

    /// Return the single resource bound to `key`, if any.
    pub fn find_unique(&self, key: &UniqueKey) -> Option<ResourceRef> {
        let mut state = self.inner.state.lock().unwrap();
        let Some(&id) = state.unique_index.get(key.words()) else {
            state.misses += 1;
            return None;
        };
        state.hits += 1;
        let tick = state.next_tick();
        let entry = &mut state.entries[id];
        entry.external_refs += 1;
        entry.last_used = tick;
        Some(ResourceRef {
            cache: Arc::downgrade(&self.inner),
            id,
            resource: Arc::clone(&entry.resource),
        })
    }

    /// Return an idle resource whose scratch key equals `key`, marking it
    /// in use. Resources still strongly bound to a unique key are not
    /// scratch candidates; a binding whose strong count reached zero is
    /// dissolved here and the resource handed out.
    pub fn find_scratch(&self, key: &ScratchKey) -> Option<ResourceRef> {
        let mut state = self.inner.state.lock().unwrap();
        let candidate = state.scratch_index.get(key).and_then(|bucket| {
            bucket
                .iter()
                .copied()
                .find(|id| state.entries[*id].purgeable())
        });
        let Some(id) = candidate else {
            state.misses += 1;
            return None;
        };
        state.hits += 1;
        state.dissolve_unique(id);
        let tick = state.next_tick();
        let entry = &mut state.entries[id];
        entry.external_refs += 1;
        entry.last_used = tick;
        Some(ResourceRef {
            cache: Arc::downgrade(&self.inner),
            id,
            resource: Arc::clone(&entry.resource),
        })
    }

    /// Evict least-recently-used purgeable resources until total tracked
    /// memory is at most `budget` bytes, or nothing purgeable remains.
    /// Staying over budget because everything is referenced or pinned is
    /// not an error.
    pub fn purge_until_memory_to(&self, budget: usize) {
        let mut state = self.inner.state.lock().unwrap();
        while state.total_bytes > budget {
            let victim = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.purgeable())
                .min_by_key(|(_, entry)| (entry.last_used, entry.sequence))
                .map(|(id, _)| id);
            match victim {
                Some(id) => state.evict(id),
                None => break,
            }
        }
    }

    /// Handles of destroyed GPU objects, drained on the flush thread.
    pub fn take_pending_releases(&self) -> Vec<TextureHandle> {
        std::mem::take(&mut self.inner.state.lock().unwrap().pending_releases)
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.state.lock().unwrap().total_bytes
    }

    pub fn resource_count(&self) -> usize {
        self.inner.state.lock().unwrap().entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock().unwrap();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            resource_count: state.entries.len(),
            total_bytes: state.total_bytes,
        }
    }
}

/// RAII external reference to a cached resource
///
/// While any reference is live the resource is in use: scratch lookup will
/// not return it and the cache will not evict it. Dropping the last
/// reference returns the resource to the idle pool and refreshes its
/// recency.
pub struct ResourceRef {
    cache: Weak<CacheShared>,
    id: ResourceId,
    resource: Arc<dyn Resource>,
}

impl ResourceRef {
    pub fn resource(&self) -> &Arc<dyn Resource> {
        &self.resource
    }

    pub fn gpu_handle(&self) -> Option<TextureHandle> {
        self.resource.gpu_handle()
    }

    /// Arena id, stable for the lifetime of the cached resource.
    pub fn id(&self) -> ResourceId {
        self.id
    }
}

impl Clone for ResourceRef {
    fn clone(&self) -> Self {
        if let Some(cache) = self.cache.upgrade() {
            cache.add_ref(self.id);
        }
        Self {
            cache: Weak::clone(&self.cache),
            id: self.id,
            resource: Arc::clone(&self.resource),
        }
    }
}

impl Drop for ResourceRef {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.release_ref(self.id);
        }
    }
}

impl std::fmt::Debug for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRef").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use vexel_core::BytesKey;

    struct TestResource {
        id: u32,
        size: usize,
    }

    impl TestResource {
        fn new(id: u32, size: usize) -> Arc<dyn Resource> {
            Arc::new(Self { id, size })
        }
    }

    impl Resource for TestResource {
        fn memory_usage(&self) -> usize {
            self.size
        }

        fn scratch_key(&self) -> Option<BytesKey> {
            let mut key = BytesKey::new();
            key.write_u32(self.id);
            Some(key)
        }
    }

    fn scratch_key(id: u32) -> ScratchKey {
        let mut key = BytesKey::new();
        key.write_u32(id);
        ScratchKey::from(key)
    }

    #[test]
    fn test_purge_evicts_idle_scratch_resource() {
        let cache = ResourceCache::new();
        let resource_ref = cache.insert(TestResource::new(1, 64), None);
        drop(resource_ref);
        assert_eq!(cache.total_bytes(), 64);
        cache.purge_until_memory_to(0);
        assert_eq!(cache.total_bytes(), 0);
        assert_eq!(cache.resource_count(), 0);
    }

    #[test]
    fn test_in_use_resource_hidden_from_scratch_lookup() {
        let cache = ResourceCache::new();
        let held = cache.insert(TestResource::new(7, 16), None);
        assert!(cache.find_scratch(&scratch_key(7)).is_none());
        drop(held);
        let found = cache.find_scratch(&scratch_key(7));
        assert!(found.is_some());
        // Now in use again.
        assert!(cache.find_scratch(&scratch_key(7)).is_none());
        drop(found);
    }

    #[test]
    fn test_in_use_resource_survives_purge() {
        let cache = ResourceCache::new();
        let held = cache.insert(TestResource::new(3, 128), None);
        cache.purge_until_memory_to(0);
        assert_eq!(cache.resource_count(), 1);
        drop(held);
        cache.purge_until_memory_to(0);
        assert_eq!(cache.resource_count(), 0);
    }

    #[test]
    fn test_unique_rebinding_replaces() {
        let cache = ResourceCache::new();
        let key = UniqueKey::make();
        let first = cache.insert(TestResource::new(1, 8), Some(&key));
        let first_id = first.id();
        drop(first);
        let second = cache.insert(TestResource::new(2, 8), Some(&key));
        let second_id = second.id();
        drop(second);
        let found = cache.find_unique(&key).expect("key must stay bound");
        assert_eq!(found.id(), second_id);
        assert_ne!(found.id(), first_id);
    }

    #[test]
    fn test_strong_unique_key_pins_resource() {
        let cache = ResourceCache::new();
        let key = UniqueKey::make();
        let resource_ref = cache.insert(TestResource::new(9, 32), Some(&key));
        drop(resource_ref);
        cache.purge_until_memory_to(0);
        // Still pinned by the live client key.
        assert_eq!(cache.resource_count(), 1);
        drop(key);
        cache.purge_until_memory_to(0);
        assert_eq!(cache.resource_count(), 0);
    }

    #[test]
    fn test_degraded_unique_becomes_scratch() {
        let cache = ResourceCache::new();
        let key = UniqueKey::make();
        let resource_ref = cache.insert(TestResource::new(5, 32), Some(&key));
        drop(resource_ref);
        // Strongly bound: not a scratch candidate.
        assert!(cache.find_scratch(&scratch_key(5)).is_none());
        drop(key);
        // Exclusivity ended; the resource is plain scratch now.
        assert!(cache.find_scratch(&scratch_key(5)).is_some());
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = ResourceCache::new();
        drop(cache.insert(TestResource::new(1, 10), None));
        drop(cache.insert(TestResource::new(2, 10), None));
        drop(cache.insert(TestResource::new(3, 10), None));
        // Touch 1 so 2 becomes least recently used.
        drop(cache.find_scratch(&scratch_key(1)).unwrap());
        cache.purge_until_memory_to(20);
        assert!(cache.find_scratch(&scratch_key(2)).is_none());
        assert!(cache.find_scratch(&scratch_key(1)).is_some());
        assert!(cache.find_scratch(&scratch_key(3)).is_some());
    }

    #[test]
    fn test_multithreaded_recycling() {
        let cache = ResourceCache::new();
        let mut workers = Vec::new();
        for worker in 0..4u32 {
            let cache = cache.clone();
            workers.push(thread::spawn(move || {
                for i in 0..100u32 {
                    let resource_ref =
                        cache.insert(TestResource::new(worker * 1000 + i, 1), None);
                    drop(resource_ref);
                }
            }));
        }
        let purger = {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    cache.purge_until_memory_to(0);
                }
            })
        };
        for worker in workers {
            worker.join().unwrap();
        }
        purger.join().unwrap();
        cache.purge_until_memory_to(0);
        assert_eq!(cache.total_bytes(), 0);
    }
}
