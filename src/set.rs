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

use std::{fmt, iter::FusedIterator};

/// The storage of a dynamic language set.
///
/// `SetStorage` shares its table with [`DictStorage`](./struct.DictStorage.html):
/// it is a table whose entries carry no value. Membership tests and iteration
/// never lock.
///
/// # Examples
///
/// ```rust
/// use dynamap::{Key, SetStorage};
///
/// let set = SetStorage::new();
/// assert!(set.add("a").unwrap());
/// assert!(!set.add("a").unwrap());
/// assert!(set.add(1).unwrap());
///
/// assert!(set.contains(&Key::Float(1.0)).unwrap());
/// assert!(set.remove(&Key::from("a")).unwrap());
/// assert_eq!(set.len(), 1);
/// ```
pub struct SetStorage {
    raw: RawTable<()>,
}

impl SetStorage {
    /// Creates an empty `SetStorage`. Nothing is allocated until the first
    /// insertion.
    pub fn new() -> Self {
        Self::from_raw(RawTable::new(Settings::default()))
    }

    /// Creates an empty `SetStorage` that can hold at least `capacity` keys
    /// without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_raw(RawTable::with_capacity(capacity, Settings::default()))
    }

    /// Returns a [`Builder`](./struct.Builder.html) to configure a new
    /// `SetStorage`.
    pub fn builder() -> Builder<Self> {
        Builder::default()
    }

    pub(crate) fn from_raw(raw: RawTable<()>) -> Self {
        Self { raw }
    }

    pub fn name(&self) -> Option<&str> {
        self.raw.name()
    }

    /// Returns the number of keys, including the null key.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn version(&self) -> usize {
        self.raw.version()
    }

    pub fn bucket_count(&self) -> usize {
        self.raw.bucket_count()
    }

    pub fn key_dispatch(&self) -> KeyDispatch {
        self.raw.key_dispatch()
    }

    /// Adds `key`. Returns `false`, and keeps the stored key object, if an
    /// equal key is already present.
    pub fn add(&self, key: impl Into<Key>) -> Result<bool> {
        self.raw.insert_if_absent(key.into(), ())
    }

    pub fn contains(&self, key: &Key) -> Result<bool> {
        self.raw.contains(key)
    }

    /// Removes `key`. Returns `true` if it was present.
    pub fn remove(&self, key: &Key) -> Result<bool> {
        self.raw.remove_and(key, |_| ()).map(|removed| removed.is_some())
    }

    /// Removes `key` if it is present, and adds it otherwise. Returns `true`
    /// if the key has been added.
    pub fn toggle(&self, key: impl Into<Key>) -> Result<bool> {
        self.raw.toggle(key.into(), ())
    }

    /// Removes and returns an arbitrary key. The null key goes first.
    pub fn pop(&self) -> Option<Key> {
        self.raw.pop().map(|(key, ())| key)
    }

    pub fn clear(&self) {
        self.raw.clear()
    }

    pub fn ensure_capacity(&self, count: usize) -> Result<()> {
        self.raw.ensure_capacity(count)
    }

    /// Adds every key of this set to `other`.
    pub fn copy_into(&self, other: &Self) -> Result<()> {
        self.raw.copy_into(&other.raw)
    }

    pub fn iter(&self) -> SetIter<'_> {
        SetIter {
            inner: self.raw.iter(),
        }
    }

    /// Returns the keys, taken while holding the write lock.
    pub fn keys(&self) -> Vec<Key> {
        self.raw.snapshot(|k, _| k.clone())
    }

    /// Returns the flat persisted form of the set.
    pub fn to_entries(&self) -> Entries<()> {
        self.raw.to_entries()
    }

    /// Rebuilds a set by adding every persisted key again.
    pub fn from_entries(entries: Entries<()>) -> Result<Self> {
        RawTable::from_entries(entries, Settings::default()).map(Self::from_raw)
    }
}

impl Default for SetStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SetStorage {
    fn clone(&self) -> Self {
        Self::from_raw(self.raw.clone())
    }
}

impl fmt::Debug for SetStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

/// An iterator over the keys of a [`SetStorage`](./struct.SetStorage.html).
///
/// It behaves like [`Iter`](./struct.Iter.html).
pub struct SetIter<'t> {
    inner: Iter<'t, ()>,
}

impl<'t> Iterator for SetIter<'t> {
    type Item = Result<Key>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|item| item.map(|(key, ())| key))
    }
}

impl<'t> FusedIterator for SetIter<'t> {}
