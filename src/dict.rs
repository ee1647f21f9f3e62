use crate::{
    builder::Builder,
    common::error::Result,
    dispatch::KeyDispatch,
    key::Key,
    table::{
        raw::{RawTable, Settings},
        Entries, Iter,
    },
};

use std::fmt;

/// The storage of a dynamic language mapping.
///
/// `DictStorage` maps [`Key`]s to values of type `V`. Mutations are serialized
/// by a per table lock, while lookups, [`len`](#method.len) and iteration never
/// lock, and can run concurrently with a mutation from another thread.
///
/// `V` must be `Clone` because lookups return copies of the stored values:
/// a value may be replaced or removed right after it has been read. Use an
/// `Arc` for values that are expensive to clone, or [`get_and`](#method.get_and)
/// to inspect a value in place.
///
/// # Examples
///
/// ```rust
/// use dynamap::{DictStorage, Key};
///
/// let dict = DictStorage::new();
/// assert!(dict.add("one", 1).unwrap());
/// assert!(dict.add(2, 2).unwrap());
/// assert!(dict.add(Key::None, 0).unwrap());
///
/// // 2 and 2.0 are the same key.
/// assert_eq!(dict.get(&Key::Float(2.0)).unwrap(), Some(2));
/// assert!(!dict.add(2.0, 20).unwrap());
/// assert_eq!(dict.get(&Key::Int(2)).unwrap(), Some(20));
///
/// assert_eq!(dict.len(), 3);
/// assert_eq!(dict.remove(&Key::from("one")).unwrap(), Some(1));
/// assert_eq!(dict.len(), 2);
/// ```
pub struct DictStorage<V> {
    raw: RawTable<V>,
}

impl<V> DictStorage<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty `DictStorage`. Nothing is allocated until the first
    /// insertion.
    pub fn new() -> Self {
        Self::from_raw(RawTable::new(Settings::default()))
    }

    /// Creates an empty `DictStorage` that can hold at least `capacity`
    /// entries without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_raw(RawTable::with_capacity(capacity, Settings::default()))
    }

    /// Returns a [`Builder`](./struct.Builder.html) to configure a new
    /// `DictStorage`.
    pub fn builder() -> Builder<Self> {
        Builder::default()
    }

    pub(crate) fn from_raw(raw: RawTable<V>) -> Self {
        Self { raw }
    }

    pub fn name(&self) -> Option<&str> {
        self.raw.name()
    }

    /// Returns the number of entries, including the null key.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the structural version of the dict. It changes whenever a key
    /// is added or removed, but not when the value of a key is replaced.
    pub fn version(&self) -> usize {
        self.raw.version()
    }

    /// Returns the length of the bucket array, or zero if none has been
    /// allocated yet.
    pub fn bucket_count(&self) -> usize {
        self.raw.bucket_count()
    }

    /// Returns how the dict currently hashes and compares its keys.
    pub fn key_dispatch(&self) -> KeyDispatch {
        self.raw.key_dispatch()
    }

    /// Stores `value` under `key`.
    ///
    /// If an equal key is already present its value is replaced, and the key
    /// object that was stored first is kept. Returns `true` if the key is new.
    ///
    /// # Errors
    ///
    /// Fails if the key cannot be hashed, or if the dict would have to grow
    /// past its maximum bucket count.
    pub fn add(&self, key: impl Into<Key>, value: V) -> Result<bool> {
        self.raw.insert(key.into(), value)
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &Key) -> Result<Option<V>> {
        self.raw.get_and(key, V::clone)
    }

    /// Applies `with_value` to the value stored under `key`, without cloning it.
    pub fn get_and<T>(&self, key: &Key, with_value: impl FnOnce(&V) -> T) -> Result<Option<T>> {
        self.raw.get_and(key, with_value)
    }

    pub fn contains_key(&self, key: &Key) -> Result<bool> {
        self.raw.contains(key)
    }

    /// Removes `key` and returns its value.
    pub fn remove(&self, key: &Key) -> Result<Option<V>> {
        self.raw.remove(key)
    }

    /// Removes and returns an arbitrary entry. The null key goes first.
    pub fn pop(&self) -> Option<(Key, V)> {
        self.raw.pop()
    }

    /// Removes every entry. The dict goes back to its initial bucket count and
    /// forgets the type of its keys.
    pub fn clear(&self) {
        self.raw.clear()
    }

    /// Grows the dict so it can hold `count` entries without a further resize.
    pub fn ensure_capacity(&self, count: usize) -> Result<()> {
        self.raw.ensure_capacity(count)
    }

    /// Adds every entry of this dict to `other`, replacing the values of keys
    /// present in both.
    pub fn copy_into(&self, other: &Self) -> Result<()> {
        self.raw.copy_into(&other.raw)
    }

    /// Returns an iterator that yields clones of the entries.
    ///
    /// See [`Iter`](./struct.Iter.html) for how it reacts to concurrent
    /// modifications.
    pub fn iter(&self) -> Iter<'_, V> {
        self.raw.iter()
    }

    /// Returns the keys, taken while holding the write lock.
    pub fn keys(&self) -> Vec<Key> {
        self.raw.snapshot(|k, _| k.clone())
    }

    /// Returns the values, taken while holding the write lock.
    pub fn values(&self) -> Vec<V> {
        self.raw.snapshot(|_, v| v.clone())
    }

    /// Returns the entries, taken while holding the write lock.
    pub fn items(&self) -> Vec<(Key, V)> {
        self.raw.snapshot(|k, v| (k.clone(), v.clone()))
    }

    /// Returns `true` if any key other than the null key is not a string.
    ///
    /// A dict whose keys are all strings can be used as the attribute
    /// dictionary of an object.
    pub fn has_non_str_keys(&self) -> bool {
        self.raw.has_non_str_keys()
    }

    /// Returns the flat persisted form of the dict.
    pub fn to_entries(&self) -> Entries<V> {
        self.raw.to_entries()
    }

    /// Rebuilds a dict by adding every persisted entry again.
    pub fn from_entries(entries: Entries<V>) -> Result<Self> {
        RawTable::from_entries(entries, Settings::default()).map(Self::from_raw)
    }
}

impl<V> Default for DictStorage<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for DictStorage<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self::from_raw(self.raw.clone())
    }
}

impl<V> fmt::Debug for DictStorage<V>
where
    V: fmt::Debug + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d_map = f.debug_map();

        for (k, v) in self.items() {
            d_map.entry(&k, &v);
        }

        d_map.finish()
    }
}
