//! GPU resource cache keys
//!
//! Two kinds of keys index the resource cache:
//!
//! - [`ScratchKey`] is a *value* key: any number of interchangeable
//!   resources may share one, and a scratch lookup only ever returns a
//!   resource that is currently unreferenced.
//! - [`UniqueKey`] is an *identity* key bound to exactly one
//!   [`UniqueDomain`]: at most one live resource carries a given unique
//!   key, and repeated lookups return that same resource even while it is
//!   referenced.
//!
//! A domain tracks a use count (all references, including passive ones)
//! and a strong count (references asserting exclusive ownership intent).
//! Client-held [`UniqueKey`]s are strong; the cache and proxy provider
//! hold [`WeakUniqueKey`]s so that caching itself never pins exclusivity.
//! Once a domain's strong count reaches zero the resource bound to it
//! becomes eligible for scratch reuse; the domain never regains
//! exclusivity.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHasher;
use smallvec::SmallVec;

fn hash_words(words: &[u32]) -> u64 {
    let mut hasher = FxHasher::default();
    for w in words {
        hasher.write_u32(*w);
    }
    hasher.finish()
}

/// Ordered word builder for key contents
///
/// Keys are sequences of `u32` words; floats are written by bit pattern so
/// that equal parameter sets always produce equal keys.
#[derive(Clone, Debug, Default)]
pub struct BytesKey {
    words: SmallVec<[u32; 8]>,
}

impl BytesKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: SmallVec::with_capacity(capacity),
        }
    }

    pub fn write_u32(&mut self, value: u32) {
        self.words.push(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.words.push(value.to_bits());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.words.push(u32::from(value));
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

/// Immutable key contents: a shared word sequence plus its precomputed hash
///
/// This is the piece of a key that hash maps index by. Equality compares
/// the full word sequence; the hash is precomputed once at construction.
#[derive(Clone, Debug)]
pub struct KeyWords {
    hash: u64,
    words: Arc<[u32]>,
}

impl KeyWords {
    fn from_words(words: &[u32]) -> Self {
        Self {
            hash: hash_words(words),
            words: words.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn hash_value(&self) -> u64 {
        self.hash
    }
}

impl Default for KeyWords {
    fn default() -> Self {
        Self {
            hash: 0,
            words: Arc::new([]),
        }
    }
}

impl PartialEq for KeyWords {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.words == other.words
    }
}

impl Eq for KeyWords {}

impl Hash for KeyWords {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Value key for interchangeable scratch resources
///
/// Resources assigned the same scratch key must be interchangeable with
/// respect to the code that uses them. An empty key opts a resource out of
/// scratch lookup entirely.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ScratchKey {
    words: KeyWords,
}

impl ScratchKey {
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &KeyWords {
        &self.words
    }
}

impl From<&BytesKey> for ScratchKey {
    fn from(key: &BytesKey) -> Self {
        Self {
            words: KeyWords::from_words(key.words()),
        }
    }
}

impl From<BytesKey> for ScratchKey {
    fn from(key: BytesKey) -> Self {
        Self::from(&key)
    }
}

static NEXT_DOMAIN_ID: AtomicU32 = AtomicU32::new(1);

/// Reference-counted identity token backing a [`UniqueKey`]
///
/// The domain exposes only increment/decrement/query operations; no other
/// type touches the counters directly. Counter updates are lock-free and
/// impose no cross-thread ordering beyond the counters themselves.
#[derive(Debug)]
pub struct UniqueDomain {
    id: u32,
    use_count: AtomicUsize,
    strong_count: AtomicUsize,
}

impl UniqueDomain {
    fn new() -> Self {
        Self {
            id: NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed),
            use_count: AtomicUsize::new(0),
            strong_count: AtomicUsize::new(0),
        }
    }

    /// Globally unique id for this domain. Ids are never reused within a
    /// process, so a key derived from a dead domain can never collide with
    /// a fresh one.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::Acquire)
    }

    pub fn strong_count(&self) -> usize {
        self.strong_count.load(Ordering::Acquire)
    }

    pub fn add_reference(&self, strong: bool) {
        self.use_count.fetch_add(1, Ordering::AcqRel);
        if strong {
            self.strong_count.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn release_reference(&self, strong: bool) {
        let previous = self.use_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "unique domain use count underflow");
        if strong {
            let previous = self.strong_count.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(previous > 0, "unique domain strong count underflow");
        }
    }
}

/// Identity key granting exclusive use of a cached resource
///
/// Every live `UniqueKey` holds one use and one strong reference on its
/// domain; cloning adds references, dropping releases them. The first word
/// of the key is the domain id, so keys from different domains can never
/// compare equal.
#[derive(Debug)]
pub struct UniqueKey {
    words: KeyWords,
    domain: Arc<UniqueDomain>,
}

impl UniqueKey {
    /// Allocates a fresh domain and returns its base key.
    pub fn make() -> Self {
        let domain = Arc::new(UniqueDomain::new());
        domain.add_reference(true);
        let words = KeyWords::from_words(&[domain.id()]);
        Self { words, domain }
    }

    /// Derives a new key sharing `base`'s domain, distinguished by the
    /// appended words. Equal `(domain, bytes)` pairs compare equal; any
    /// word difference produces a distinct key.
    pub fn combine(base: &UniqueKey, bytes: &BytesKey) -> Self {
        let mut words = SmallVec::<[u32; 8]>::with_capacity(1 + bytes.words().len());
        words.push(base.domain.id());
        words.extend_from_slice(bytes.words());
        base.domain.add_reference(true);
        Self {
            words: KeyWords::from_words(&words),
            domain: Arc::clone(&base.domain),
        }
    }

    pub fn domain_id(&self) -> u32 {
        self.domain.id()
    }

    pub fn use_count(&self) -> usize {
        self.domain.use_count()
    }

    pub fn strong_count(&self) -> usize {
        self.domain.strong_count()
    }

    pub fn words(&self) -> &KeyWords {
        &self.words
    }

    /// A passive reference on the same key: keeps the domain's use count
    /// alive without asserting ownership intent.
    pub fn downgrade(&self) -> WeakUniqueKey {
        self.domain.add_reference(false);
        WeakUniqueKey {
            words: self.words.clone(),
            domain: Arc::clone(&self.domain),
        }
    }
}

impl Clone for UniqueKey {
    fn clone(&self) -> Self {
        self.domain.add_reference(true);
        Self {
            words: self.words.clone(),
            domain: Arc::clone(&self.domain),
        }
    }
}

impl Drop for UniqueKey {
    fn drop(&mut self) {
        self.domain.release_reference(true);
    }
}

impl PartialEq for UniqueKey {
    fn eq(&self, other: &Self) -> bool {
        self.words == other.words
    }
}

impl Eq for UniqueKey {}

impl Hash for UniqueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.words.hash(state);
    }
}

/// Passive flavor of [`UniqueKey`]: holds a use reference only
///
/// The resource cache and proxy provider store these so their bookkeeping
/// never keeps a resource exclusively cached on its own.
#[derive(Debug)]
pub struct WeakUniqueKey {
    words: KeyWords,
    domain: Arc<UniqueDomain>,
}

impl WeakUniqueKey {
    pub fn domain_id(&self) -> u32 {
        self.domain.id()
    }

    pub fn strong_count(&self) -> usize {
        self.domain.strong_count()
    }

    pub fn use_count(&self) -> usize {
        self.domain.use_count()
    }

    pub fn words(&self) -> &KeyWords {
        &self.words
    }
}

impl Clone for WeakUniqueKey {
    fn clone(&self) -> Self {
        self.domain.add_reference(false);
        Self {
            words: self.words.clone(),
            domain: Arc::clone(&self.domain),
        }
    }
}

impl Drop for WeakUniqueKey {
    fn drop(&mut self) {
        self.domain.release_reference(false);
    }
}

impl PartialEq for WeakUniqueKey {
    fn eq(&self, other: &Self) -> bool {
        self.words == other.words
    }
}

impl Eq for WeakUniqueKey {}

impl Hash for WeakUniqueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.words.hash(state);
    }
}

/// Defers unique key allocation until first access
///
/// `get` is safe to call from multiple threads and never allocates more
/// than one key; `reset` requires exclusive access and therefore cannot
/// race with `get`.
#[derive(Debug, Default)]
pub struct LazyUniqueKey {
    key: OnceLock<UniqueKey>,
}

impl LazyUniqueKey {
    pub const fn new() -> Self {
        Self {
            key: OnceLock::new(),
        }
    }

    /// Returns the associated key, allocating a fresh domain on first use.
    pub fn get(&self) -> UniqueKey {
        self.key.get_or_init(UniqueKey::make).clone()
    }

    pub fn is_set(&self) -> bool {
        self.key.get().is_some()
    }

    /// Drops the held key, returning to the empty state.
    pub fn reset(&mut self) {
        self.key.take();
    }
}
