use super::{
    bucket::{Bucket, BucketArray, Slot},
    iter::Iter,
};
use crate::{
    common::{
        buckets_for,
        error::{Error, Result},
        INITIAL_BUCKETS, MAX_BUCKETS, MIN_LOAD_FACTOR,
    },
    dispatch::{Dispatch, KeyDispatch, EMPTY},
    key::{hashing, Key, KeyType},
};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};
use std::{
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

#[derive(Clone, Debug)]
pub(crate) struct Settings {
    pub(crate) name: Option<String>,
    pub(crate) max_buckets: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: None,
            max_buckets: MAX_BUCKETS,
        }
    }
}

/// The table behind both container flavours.
///
/// Mutations are serialized by `write_lock`. Readers never take the lock: they
/// pin an epoch guard and load `bucket_array` once, and every bucket array
/// carries the dispatch it must be read with. Buckets, values and bucket
/// arrays that are replaced while readers may still see them are destroyed
/// through the epoch collector.
pub(crate) struct RawTable<V> {
    bucket_array: Atomic<BucketArray<V>>,
    null_entry: Atomic<V>,
    count: CachePadded<AtomicUsize>,
    version: AtomicUsize,
    write_lock: Mutex<()>,
    settings: Settings,
}

impl<V> RawTable<V> {
    pub(crate) fn new(settings: Settings) -> Self {
        Self {
            bucket_array: Atomic::null(),
            null_entry: Atomic::null(),
            count: CachePadded::new(AtomicUsize::new(0)),
            version: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
            settings,
        }
    }

    /// Creates a table with room for `capacity` entries. A zero capacity
    /// allocates nothing until the first insertion.
    pub(crate) fn with_capacity(capacity: usize, settings: Settings) -> Self {
        let table = Self::new(settings);
        if capacity > 0 {
            let max = table.settings.max_buckets;
            let length = buckets_for(capacity).map_or(max, |length| length.min(max));
            let array = Owned::new(BucketArray::with_length(length, Dispatch::Empty));
            table.bucket_array.store(array, Ordering::Relaxed);
        }
        table
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.settings.name.as_deref()
    }

    /// The number of entries, including the null key.
    pub(crate) fn len(&self) -> usize {
        let guard = &crossbeam_epoch::pin();
        let null = !self.null_entry.load(Ordering::Acquire, guard).is_null();
        self.count.load(Ordering::Acquire) + usize::from(null)
    }

    pub(crate) fn version(&self) -> usize {
        self.version.load(Ordering::Acquire)
    }

    /// The length of the current bucket array, or zero before the first
    /// insertion.
    pub(crate) fn bucket_count(&self) -> usize {
        let guard = &crossbeam_epoch::pin();
        let array = unsafe { self.load_array(guard).as_ref() };
        array.map_or(0, BucketArray::len)
    }

    pub(crate) fn key_dispatch(&self) -> KeyDispatch {
        let guard = &crossbeam_epoch::pin();
        let array = unsafe { self.load_array(guard).as_ref() };
        array.map_or(KeyDispatch::Empty, |array| array.dispatch.kind())
    }

    pub(crate) fn load_array<'g>(&self, guard: &'g Guard) -> Shared<'g, BucketArray<V>> {
        self.bucket_array.load(Ordering::Acquire, guard)
    }

    pub(crate) fn load_null<'g>(&self, guard: &'g Guard) -> Shared<'g, V> {
        self.null_entry.load(Ordering::Acquire, guard)
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }
}

impl<V> RawTable<V>
where
    V: Send + Sync + 'static,
{
    /// Looks up `key` without locking and applies `with_value` to its value.
    pub(crate) fn get_and<T>(&self, key: &Key, with_value: impl FnOnce(&V) -> T) -> Result<Option<T>> {
        let guard = &crossbeam_epoch::pin();

        let Some(key_type) = key.key_type() else {
            return Ok(unsafe { self.load_null(guard).as_ref() }.map(with_value));
        };

        let Some(array) = (unsafe { self.load_array(guard).as_ref() }) else {
            // The key is hashed even when there is nothing to find, so an
            // unhashable key is reported consistently.
            hashing::generic_hash(key)?;
            return Ok(None);
        };

        let comparer = array.dispatch.comparer_for(key_type);
        let hash = comparer.hash(key)?;
        let bucket_ptr = array.get(guard, hash, key, comparer);

        Ok(unsafe { bucket_ptr.as_ref() }.map(|bucket| with_value(&bucket.value)))
    }

    pub(crate) fn contains(&self, key: &Key) -> Result<bool> {
        self.get_and(key, |_| ()).map(|found| found.is_some())
    }

    pub(crate) fn iter(&self) -> Iter<'_, V>
    where
        V: Clone,
    {
        Iter::new(self)
    }

    fn write(&self) -> Writer<'_, V> {
        let lock = self.write_lock.lock();
        Writer {
            table: self,
            guard: crossbeam_epoch::pin(),
            _lock: lock,
        }
    }

    /// Stores `value` under `key`, replacing the value of an existing equal
    /// key. The stored key object is kept. Returns `true` if the key is new.
    pub(crate) fn insert(&self, key: Key, value: V) -> Result<bool> {
        self.write().insert(key, value, true)
    }

    /// Stores `value` under `key` unless an equal key is already present.
    /// Returns `true` if the key is new.
    pub(crate) fn insert_if_absent(&self, key: Key, value: V) -> Result<bool> {
        self.write().insert(key, value, false)
    }

    /// Removes `key` if present, otherwise stores it with `value`. Returns
    /// `true` if the key has been stored.
    pub(crate) fn toggle(&self, key: Key, value: V) -> Result<bool> {
        let writer = self.write();
        if writer.remove(&key, |_| ())?.is_some() {
            Ok(false)
        } else {
            writer.insert(key, value, false)
        }
    }

    pub(crate) fn remove_and<T>(&self, key: &Key, with_value: impl FnOnce(&V) -> T) -> Result<Option<T>> {
        self.write().remove(key, with_value)
    }

    pub(crate) fn remove(&self, key: &Key) -> Result<Option<V>>
    where
        V: Clone,
    {
        self.remove_and(key, V::clone)
    }

    /// Removes the null key if present, otherwise the first entry in slot
    /// order.
    pub(crate) fn pop(&self) -> Option<(Key, V)>
    where
        V: Clone,
    {
        self.write().pop()
    }

    pub(crate) fn clear(&self) {
        self.write().clear();
    }

    /// Grows the table so that `count` entries fit without a further resize.
    pub(crate) fn ensure_capacity(&self, count: usize) -> Result<()> {
        self.write().ensure_capacity(count)
    }

    /// Adds every entry of this table to `into`, replacing the values of keys
    /// that are already present there.
    pub(crate) fn copy_into(&self, into: &RawTable<V>) -> Result<()>
    where
        V: Clone,
    {
        if ptr::eq(self, into) {
            return Ok(());
        }

        // Both locks are always taken in address order, so two threads copying
        // in opposite directions cannot deadlock.
        let (source_lock, target_lock) = if (self as *const Self) < (into as *const Self) {
            let source_lock = self.write_lock.lock();
            (source_lock, into.write_lock.lock())
        } else {
            let target_lock = into.write_lock.lock();
            (self.write_lock.lock(), target_lock)
        };
        let _source_lock = source_lock;

        let writer = Writer {
            table: into,
            guard: crossbeam_epoch::pin(),
            _lock: target_lock,
        };
        let guard = &writer.guard;

        if let Some(source) = unsafe { self.load_array(guard).as_ref() } {
            let count = self.count.load(Ordering::Relaxed);
            if count > 0 {
                writer.merge(source, count)?;
            }
        }
        if let Some(value) = unsafe { self.load_null(guard).as_ref() } {
            writer.insert_null(value.clone(), true);
        }
        Ok(())
    }

    /// Takes a consistent snapshot of the entries, with the null key last.
    pub(crate) fn snapshot<T>(&self, mut f: impl FnMut(&Key, &V) -> T) -> Vec<T> {
        let writer = self.write();
        let guard = &writer.guard;

        let mut entries = Vec::with_capacity(self.len());
        if let Some(array) = unsafe { self.load_array(guard).as_ref() } {
            for (_, bucket_ptr) in array.occupied(guard) {
                let bucket = unsafe { bucket_ptr.deref() };
                entries.push(f(&bucket.key, &bucket.value));
            }
        }
        if let Some(value) = unsafe { self.load_null(guard).as_ref() } {
            entries.push(f(&Key::None, value));
        }
        entries
    }

    /// Returns `true` if a bucket holds a key that is not a string. The null
    /// key is not considered.
    pub(crate) fn has_non_str_keys(&self) -> bool {
        let writer = self.write();
        let guard = &writer.guard;

        let Some(array) = (unsafe { self.load_array(guard).as_ref() }) else {
            return false;
        };
        if self.count.load(Ordering::Relaxed) == 0 {
            return false;
        }
        match array.dispatch.kind() {
            KeyDispatch::Empty | KeyDispatch::Homogeneous(KeyType::Str) => false,
            _ => {
                let found = array.occupied(guard).any(|(_, bucket_ptr)| {
                    let bucket = unsafe { bucket_ptr.deref() };
                    !matches!(bucket.key, Key::Str(_))
                });
                found
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn check_stored_hashes(&self) -> bool {
        let guard = &crossbeam_epoch::pin();
        let Some(array) = (unsafe { self.load_array(guard).as_ref() }) else {
            return true;
        };
        let consistent = array.occupied(guard).all(|(_, bucket_ptr)| {
            let bucket = unsafe { bucket_ptr.deref() };
            bucket.key.hash_code().ok() == Some(bucket.hash)
        });
        consistent
    }
}

impl<V> Clone for RawTable<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Copies the live entries. A sparsely populated table is compacted.
    fn clone(&self) -> Self {
        let writer = self.write();
        let guard = &writer.guard;

        let copy = Self::new(self.settings.clone());
        if let Some(array) = unsafe { self.load_array(guard).as_ref() } {
            let count = self.count.load(Ordering::Relaxed);
            let length = match buckets_for(count) {
                Some(length) if (count as f64) < array.len() as f64 * MIN_LOAD_FACTOR => length,
                _ => array.len(),
            };
            copy.bucket_array
                .store(Owned::new(array.deep_copy(guard, length)), Ordering::Relaxed);
            copy.count.store(count, Ordering::Relaxed);
        }
        if let Some(value) = unsafe { self.load_null(guard).as_ref() } {
            copy.null_entry
                .store(Owned::new(value.clone()), Ordering::Relaxed);
        }
        copy
    }
}

impl<V> Drop for RawTable<V> {
    fn drop(&mut self) {
        // Safety: nothing else can access the table anymore. Buckets and arrays
        // that were replaced earlier are owned by the epoch collector.
        let guard = unsafe { crossbeam_epoch::unprotected() };

        let array_ptr = self.bucket_array.swap(Shared::null(), Ordering::Relaxed, guard);
        if !array_ptr.is_null() {
            let array = unsafe { array_ptr.into_owned() };
            for (_, bucket_ptr) in array.occupied(guard) {
                drop(unsafe { bucket_ptr.into_owned() });
            }
        }

        let null_ptr = self.null_entry.swap(Shared::null(), Ordering::Relaxed, guard);
        if !null_ptr.is_null() {
            drop(unsafe { null_ptr.into_owned() });
        }
    }
}

/// Exclusive access to a table. Holds the write lock and a pinned guard.
struct Writer<'t, V> {
    table: &'t RawTable<V>,
    guard: Guard,
    _lock: MutexGuard<'t, ()>,
}

impl<'t, V> Writer<'t, V>
where
    V: Send + Sync + 'static,
{
    fn current(&self) -> Shared<'_, BucketArray<V>> {
        self.table.load_array(&self.guard)
    }

    fn insert(&self, key: Key, value: V, replace: bool) -> Result<bool> {
        let Some(key_type) = key.key_type() else {
            return Ok(self.insert_null(value, replace));
        };

        let current_ptr = self.current();
        let current = unsafe { current_ptr.as_ref() };
        let dispatch = current.map_or(&EMPTY, |array| &array.dispatch);

        // The new dispatch is built before anything is published, so a key
        // that fails to hash leaves the table untouched.
        let next_dispatch = dispatch.before_insert_of(&key, key_type)?;
        let hash = next_dispatch
            .as_ref()
            .unwrap_or(dispatch)
            .comparer_for(key_type)
            .hash(&key)?;

        let array = match (current, next_dispatch) {
            (None, next) => {
                let dispatch = next.unwrap_or(Dispatch::Empty);
                self.publish(current_ptr, BucketArray::with_length(INITIAL_BUCKETS, dispatch))
            }
            (Some(array), Some(next)) => {
                #[cfg(feature = "logging")]
                if matches!(next, Dispatch::Heterogeneous) {
                    log::debug!(
                        "{}switching to heterogeneous key dispatch on a '{}' key",
                        self.log_prefix(),
                        key.type_name()
                    );
                }
                self.publish(current_ptr, array.with_dispatch(&self.guard, next))
            }
            (Some(array), None) => array,
        };

        self.insert_hashed(array, hash, key, key_type, value, replace)
            .map(|(_, is_new)| is_new)
    }

    /// Stores an entry whose hash is already known. Returns the bucket array
    /// the entry ended up in, which differs from `array` after a resize.
    fn insert_hashed<'g>(
        &'g self,
        array: &'g BucketArray<V>,
        hash: u64,
        key: Key,
        key_type: KeyType,
        value: V,
        replace: bool,
    ) -> Result<(&'g BucketArray<V>, bool)> {
        let guard = &self.guard;
        let mut array = array;

        loop {
            let comparer = array.dispatch.comparer_for(key_type);
            match array.find(guard, hash, &key, comparer) {
                Slot::Occupied(index, old_ptr) => {
                    if replace {
                        let old = unsafe { old_ptr.deref() };
                        let bucket = Owned::new(Bucket::new(old.hash, old.key.clone(), value));
                        array.buckets[index].store(bucket, Ordering::Release);
                        unsafe { guard.defer_destroy(old_ptr) };
                    }
                    return Ok((array, false));
                }
                Slot::Vacant(index) if self.has_room(array, index) => {
                    let bucket = Owned::new(Bucket::new(hash, key, value));
                    array.store_new(guard, index, bucket);
                    self.table.count.fetch_add(1, Ordering::Release);
                    self.table.bump_version();
                    return Ok((array, true));
                }
                Slot::Vacant(_) | Slot::Full => {
                    let count = self.table.count.load(Ordering::Relaxed);
                    // Either the live entries need more room, or only the
                    // tombstones do and rehashing at the same length drops them.
                    let length = if count < array.max_count {
                        array.len()
                    } else {
                        array.len().saturating_mul(2)
                    };
                    array = self.resize(array, length)?;
                }
            }
        }
    }

    /// Returns `true` if a new entry can be stored at `index` without exceeding
    /// the load factor. Live entries and tombstones both count against it,
    /// so every probe sequence keeps reaching an empty slot.
    fn has_room(&self, array: &BucketArray<V>, index: usize) -> bool {
        let count = self.table.count.load(Ordering::Relaxed);
        if count >= array.max_count {
            return false;
        }
        array.is_tombstone_at(&self.guard, index) || count + array.tombstone_count() < array.max_count
    }

    fn insert_null(&self, value: V, replace: bool) -> bool {
        let guard = &self.guard;
        if self.table.load_null(guard).is_null() {
            self.table.null_entry.store(Owned::new(value), Ordering::Release);
            self.table.bump_version();
            true
        } else {
            if replace {
                let old = self
                    .table
                    .null_entry
                    .swap(Owned::new(value), Ordering::AcqRel, guard);
                unsafe { guard.defer_destroy(old) };
            }
            false
        }
    }

    fn remove<T>(&self, key: &Key, with_value: impl FnOnce(&V) -> T) -> Result<Option<T>> {
        let Some(key_type) = key.key_type() else {
            return Ok(self.take_null(true).map(with_value));
        };

        let guard = &self.guard;
        let Some(array) = (unsafe { self.current().as_ref() }) else {
            hashing::generic_hash(key)?;
            return Ok(None);
        };

        let comparer = array.dispatch.comparer_for(key_type);
        let hash = comparer.hash(key)?;
        match array.find(guard, hash, key, comparer) {
            Slot::Occupied(index, bucket_ptr) => {
                let bucket = self.remove_at(array, index, bucket_ptr);
                Ok(Some(with_value(&bucket.value)))
            }
            Slot::Vacant(_) | Slot::Full => Ok(None),
        }
    }

    /// Turns the slot into a tombstone. The bucket stays readable until the
    /// guard of this writer is dropped.
    fn remove_at<'g>(
        &'g self,
        array: &'g BucketArray<V>,
        index: usize,
        bucket_ptr: Shared<'g, Bucket<V>>,
    ) -> &'g Bucket<V> {
        array.store_tombstone(index);
        self.table.count.fetch_sub(1, Ordering::Release);
        self.table.bump_version();

        let bucket = unsafe { bucket_ptr.deref() };
        unsafe { self.guard.defer_destroy(bucket_ptr) };
        bucket
    }

    /// Unlinks the value of the null key, which stays readable until the
    /// guard of this writer is dropped.
    fn take_null(&self, bump_version: bool) -> Option<&V> {
        let guard = &self.guard;
        let old = self
            .table
            .null_entry
            .swap(Shared::null(), Ordering::AcqRel, guard);
        let value = unsafe { old.as_ref() }?;
        unsafe { guard.defer_destroy(old) };
        if bump_version {
            self.table.bump_version();
        }
        Some(value)
    }

    fn pop(&self) -> Option<(Key, V)>
    where
        V: Clone,
    {
        if let Some(value) = self.take_null(true) {
            return Some((Key::None, value.clone()));
        }

        let array = unsafe { self.current().as_ref() }?;
        let (index, bucket_ptr) = array.occupied(&self.guard).next()?;
        let bucket = self.remove_at(array, index, bucket_ptr);
        Some((bucket.key.clone(), bucket.value.clone()))
    }

    fn clear(&self) {
        let guard = &self.guard;
        let current_ptr = self.current();
        let mut changed = self.take_null(false).is_some();

        if let Some(array) = unsafe { current_ptr.as_ref() } {
            self.publish(
                current_ptr,
                BucketArray::with_length(INITIAL_BUCKETS, Dispatch::Empty),
            );
            for (_, bucket_ptr) in array.occupied(guard) {
                unsafe { guard.defer_destroy(bucket_ptr) };
            }
            self.table.count.store(0, Ordering::Release);
            changed = true;
        }

        if changed {
            self.table.bump_version();
        }
    }

    fn ensure_capacity(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let wanted = self.buckets_for(count)?;
        let current_ptr = self.current();
        match unsafe { current_ptr.as_ref() } {
            None => {
                self.check_length(wanted)?;
                self.publish(current_ptr, BucketArray::with_length(wanted, Dispatch::Empty));
            }
            Some(array) if array.len() < wanted => {
                self.resize(array, wanted)?;
            }
            Some(_) => (),
        }
        Ok(())
    }

    /// Copies the entries of `source`, which holds `count` of them.
    fn merge(&self, source: &BucketArray<V>, count: usize) -> Result<()>
    where
        V: Clone,
    {
        let guard = &self.guard;
        let total = self.table.count.load(Ordering::Relaxed).saturating_add(count);
        let wanted = self.buckets_for(total)?;

        let current_ptr = self.current();
        let mut array = match unsafe { current_ptr.as_ref() } {
            None => {
                self.check_length(wanted)?;
                self.publish(current_ptr, BucketArray::with_length(wanted, Dispatch::Empty))
            }
            Some(array) if array.len() < wanted => self.resize(array, wanted)?,
            Some(array) => array,
        };

        if let Some(next) = array.dispatch.merged_with(&source.dispatch) {
            array = self.publish(self.current(), array.with_dispatch(guard, next));
        }

        for (_, bucket_ptr) in source.occupied(guard) {
            let bucket = unsafe { bucket_ptr.deref() };
            let Some(key_type) = bucket.key.key_type() else {
                continue;
            };
            let (next, _) = self.insert_hashed(
                array,
                bucket.hash,
                bucket.key.clone(),
                key_type,
                bucket.value.clone(),
                true,
            )?;
            array = next;
        }
        Ok(())
    }

    /// Moves every bucket into a new array of `length`. Tombstones are dropped.
    fn resize<'g>(&'g self, array: &'g BucketArray<V>, length: usize) -> Result<&'g BucketArray<V>> {
        self.check_length(length)?;

        let next = array.rehash(&self.guard, length, array.dispatch.clone());

        #[cfg(feature = "logging")]
        log::debug!(
            "{}resized from {} to {length} buckets ({} entries)",
            self.log_prefix(),
            array.len(),
            self.table.count.load(Ordering::Relaxed)
        );

        Ok(self.publish(self.current(), next))
    }

    /// Returns the length of an array that holds `count` entries, if it is
    /// within the bucket limit.
    fn buckets_for(&self, count: usize) -> Result<usize> {
        let length = buckets_for(count).unwrap_or(usize::MAX);
        self.check_length(length)?;
        Ok(length)
    }

    fn check_length(&self, length: usize) -> Result<()> {
        let max = self.table.settings.max_buckets;
        if length > max {
            #[cfg(feature = "logging")]
            log::warn!(
                "{}refused to grow to {length} buckets, the limit is {max}",
                self.log_prefix()
            );
            return Err(Error::CapacityOverflow {
                requested: length,
                max,
            });
        }
        Ok(())
    }

    /// Replaces the current bucket array. The previous one is destroyed once
    /// no reader can see it; its buckets are not.
    fn publish<'g>(
        &'g self,
        current_ptr: Shared<'g, BucketArray<V>>,
        next: BucketArray<V>,
    ) -> &'g BucketArray<V> {
        let next_ptr = Owned::new(next).into_shared(&self.guard);
        self.table.bucket_array.store(next_ptr, Ordering::Release);

        if !current_ptr.is_null() {
            unsafe { self.guard.defer_destroy(current_ptr) };
        }

        // Safety: the array has just been allocated, and only this writer can
        // replace it.
        unsafe { next_ptr.deref() }
    }

    #[cfg(feature = "logging")]
    fn log_prefix(&self) -> String {
        self.table
            .name()
            .map(|name| format!("[{name}] "))
            .unwrap_or_default()
    }
}
