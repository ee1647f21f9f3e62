use crate::{
    common::max_count_for,
    dispatch::{Comparer, Dispatch},
    key::Key,
};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) const TOMBSTONE_TAG: usize = 0b1;

// Fibonacci hashing spreads the stored hash over the index bits.
const FIBONACCI: u64 = 0x9E37_79B9_7F4A_7C15;

/// A published entry. A bucket is never modified after it has been stored in
/// a slot; an overwrite publishes a new bucket.
#[repr(align(8))]
#[derive(Debug)]
pub(crate) struct Bucket<V> {
    pub(crate) hash: u64,
    pub(crate) key: Key,
    pub(crate) value: V,
}

impl<V> Bucket<V> {
    pub(crate) fn new(hash: u64, key: Key, value: V) -> Self {
        Self { hash, key, value }
    }
}

/// The slots of a table together with the dispatch of its keys.
///
/// Dropping a `BucketArray` does not drop the buckets it points to. Bucket
/// pointers are moved between arrays on resize and promotion, and the table
/// owns them.
pub(crate) struct BucketArray<V> {
    pub(crate) buckets: Box<[Atomic<Bucket<V>>]>,
    pub(crate) dispatch: Dispatch,
    pub(crate) max_count: usize,
    tombstone_count: AtomicUsize,
    shift: u32,
}

pub(crate) enum Slot<'g, V> {
    /// The key is stored at the index.
    Occupied(usize, Shared<'g, Bucket<V>>),
    /// The key is absent and can be inserted at the index.
    Vacant(usize),
    /// The key is absent and there is no free slot.
    Full,
}

impl<V> BucketArray<V> {
    pub(crate) fn with_length(length: usize, dispatch: Dispatch) -> Self {
        assert!(length.is_power_of_two() && length >= 2);

        let buckets = (0..length).map(|_| Atomic::null()).collect();

        Self {
            buckets,
            dispatch,
            max_count: max_count_for(length),
            tombstone_count: AtomicUsize::new(0),
            shift: 64 - length.trailing_zeros(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn tombstone_count(&self) -> usize {
        self.tombstone_count.load(Ordering::Relaxed)
    }

    /// Turns an occupied slot into a tombstone.
    pub(crate) fn store_tombstone(&self, index: usize) {
        self.buckets[index].store(tombstone(), Ordering::Release);
        self.tombstone_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Publishes a new bucket in a vacant slot.
    pub(crate) fn store_new(&self, guard: &Guard, index: usize, bucket: Owned<Bucket<V>>) {
        let previous = self.buckets[index].swap(bucket, Ordering::Release, guard);
        if is_tombstone(previous) {
            self.tombstone_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn is_tombstone_at(&self, guard: &Guard, index: usize) -> bool {
        is_tombstone(self.buckets[index].load(Ordering::Relaxed, guard))
    }

    fn start_index(&self, hash: u64) -> usize {
        (hash.wrapping_mul(FIBONACCI) >> self.shift) as usize
    }

    fn probe<'g>(&self, guard: &'g Guard, hash: u64) -> Probe<'_, 'g, V> {
        Probe {
            buckets: &self.buckets,
            guard,
            mask: self.len() - 1,
            start: self.start_index(hash),
            offset: 0,
        }
    }

    /// Returns the bucket holding `key`, or a null pointer.
    pub(crate) fn get<'g>(
        &self,
        guard: &'g Guard,
        hash: u64,
        key: &Key,
        comparer: &Comparer,
    ) -> Shared<'g, Bucket<V>> {
        match self.find(guard, hash, key, comparer) {
            Slot::Occupied(_, bucket_ptr) => bucket_ptr,
            Slot::Vacant(_) | Slot::Full => Shared::null(),
        }
    }

    /// Looks up `key`. When absent, returns the first tombstone or empty slot
    /// on its probe sequence, whichever comes first.
    pub(crate) fn find<'g>(
        &self,
        guard: &'g Guard,
        hash: u64,
        key: &Key,
        comparer: &Comparer,
    ) -> Slot<'g, V> {
        let mut first_usable = None;

        for (index, this_bucket_ptr) in self.probe(guard, hash) {
            let Some(this_bucket_ref) = (unsafe { this_bucket_ptr.as_ref() }) else {
                if is_tombstone(this_bucket_ptr) {
                    first_usable.get_or_insert(index);
                    continue;
                }
                // Empty. The key is not stored past this slot.
                return Slot::Vacant(first_usable.unwrap_or(index));
            };

            if key.is_same(&this_bucket_ref.key)
                || (this_bucket_ref.hash == hash && comparer.equals(key, &this_bucket_ref.key))
            {
                return Slot::Occupied(index, this_bucket_ptr);
            }
        }

        first_usable.map_or(Slot::Full, Slot::Vacant)
    }

    /// Stores a bucket in the first free slot of its probe sequence. Only used
    /// on arrays that have not been published yet, which hold no tombstones and
    /// never hold the same key twice.
    fn insert_unpublished(&self, guard: &Guard, bucket_ptr: Shared<'_, Bucket<V>>) {
        // Safety: the caller passes a valid bucket pointer.
        let hash = unsafe { bucket_ptr.deref() }.hash;

        for (index, this_bucket_ptr) in self.probe(guard, hash) {
            if this_bucket_ptr.is_null() {
                self.buckets[index].store(bucket_ptr, Ordering::Relaxed);
                return;
            }
        }
        unreachable!("a new bucket array must have room for every moved bucket");
    }

    /// Returns a new array of `length` holding the same buckets as this one,
    /// with `dispatch`. Tombstones are dropped.
    pub(crate) fn rehash(&self, guard: &Guard, length: usize, dispatch: Dispatch) -> Self {
        let next = Self::with_length(length, dispatch);
        for (_, bucket_ptr) in self.occupied(guard) {
            next.insert_unpublished(guard, bucket_ptr);
        }
        next
    }

    /// Returns a new array of the same length holding the same buckets and
    /// tombstones in the same slots, with `dispatch`.
    pub(crate) fn with_dispatch(&self, guard: &Guard, dispatch: Dispatch) -> Self {
        let next = Self::with_length(self.len(), dispatch);
        for (this, that) in self.buckets.iter().zip(next.buckets.iter()) {
            that.store(this.load(Ordering::Acquire, guard), Ordering::Relaxed);
        }
        next.tombstone_count
            .store(self.tombstone_count(), Ordering::Relaxed);
        next
    }

    /// Returns a new array of `length` holding copies of the live buckets
    /// of this one.
    pub(crate) fn deep_copy(&self, guard: &Guard, length: usize) -> Self
    where
        V: Clone,
    {
        let next = Self::with_length(length, self.dispatch.clone());
        for (_, bucket_ptr) in self.occupied(guard) {
            let bucket = unsafe { bucket_ptr.deref() };
            let copy = Owned::new(Bucket::new(bucket.hash, bucket.key.clone(), bucket.value.clone()));
            next.insert_unpublished(guard, copy.into_shared(guard));
        }
        next
    }

    /// Iterates over the occupied slots in array order.
    pub(crate) fn occupied<'a, 'g>(
        &'a self,
        guard: &'g Guard,
    ) -> impl Iterator<Item = (usize, Shared<'g, Bucket<V>>)> + 'a
    where
        'g: 'a,
        V: 'g,
    {
        self.buckets
            .iter()
            .enumerate()
            .map(move |(index, slot)| (index, slot.load(Ordering::Acquire, guard)))
            .filter(|(_, bucket_ptr)| !bucket_ptr.is_null())
    }
}

struct Probe<'b, 'g, V> {
    buckets: &'b [Atomic<Bucket<V>>],
    guard: &'g Guard,
    mask: usize,
    start: usize,
    offset: usize,
}

impl<'b, 'g, V: 'g> Iterator for Probe<'b, 'g, V> {
    type Item = (usize, Shared<'g, Bucket<V>>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset == self.buckets.len() {
            return None;
        }

        let index = (self.start + self.offset) & self.mask;
        self.offset += 1;

        Some((index, self.buckets[index].load(Ordering::Acquire, self.guard)))
    }
}

pub(crate) fn is_tombstone<V>(bucket_ptr: Shared<'_, Bucket<V>>) -> bool {
    bucket_ptr.tag() & TOMBSTONE_TAG != 0
}

fn tombstone<'g, V>() -> Shared<'g, Bucket<V>> {
    Shared::null().with_tag(TOMBSTONE_TAG)
}

#[cfg(test)]
mod tests {
    use super::{is_tombstone, Bucket, BucketArray, Slot};
    use crate::{
        dispatch::{Comparer, Dispatch},
        key::Key,
    };

    use crossbeam_epoch::Owned;
    use std::sync::atomic::Ordering;

    fn store<V>(array: &BucketArray<V>, guard: &crossbeam_epoch::Guard, key: Key, value: V) -> usize {
        let hash = key.hash_code().unwrap();
        store_hashed(array, guard, hash, key, value)
    }

    fn store_hashed<V>(
        array: &BucketArray<V>,
        guard: &crossbeam_epoch::Guard,
        hash: u64,
        key: Key,
        value: V,
    ) -> usize {
        let Slot::Vacant(index) = array.find(guard, hash, &key, &Comparer::Generic) else {
            panic!("{key:?} is already stored");
        };
        array.store_new(guard, index, Owned::new(Bucket::new(hash, key, value)));
        index
    }

    fn free_all<V>(array: BucketArray<V>, guard: &crossbeam_epoch::Guard) {
        for (_, bucket_ptr) in array.occupied(guard) {
            drop(unsafe { bucket_ptr.into_owned() });
        }
    }

    #[test]
    fn get_store_tombstone() {
        let guard = unsafe { &crossbeam_epoch::unprotected() };
        let array = BucketArray::with_length(8, Dispatch::Empty);
        let generic = Comparer::Generic;

        let a = Key::from("a");
        let hash_a = a.hash_code().unwrap();
        assert!(array.get(guard, hash_a, &a, &generic).is_null());

        let index = store(&array, guard, a.clone(), 5);
        let found = array.get(guard, hash_a, &Key::from("a"), &generic);
        assert_eq!(unsafe { found.as_ref() }.map(|b| b.value), Some(5));

        let removed = array.buckets[index].load(Ordering::Relaxed, guard);
        array.store_tombstone(index);
        assert!(is_tombstone(array.buckets[index].load(Ordering::Relaxed, guard)));
        assert_eq!(array.tombstone_count(), 1);
        drop(unsafe { removed.into_owned() });

        assert!(array.get(guard, hash_a, &a, &generic).is_null());
        match array.find(guard, hash_a, &a, &generic) {
            Slot::Vacant(i) => assert_eq!(i, index),
            _ => panic!("expected the tombstone to be reused"),
        }
        store(&array, guard, a, 6);
        assert_eq!(array.tombstone_count(), 0);

        free_all(array, guard);
    }

    #[test]
    fn probing_continues_past_tombstones() {
        let guard = unsafe { &crossbeam_epoch::unprotected() };
        let array = BucketArray::with_length(8, Dispatch::Empty);

        // The same hash for every key, so they share one probe sequence.
        let keys: Vec<_> = (0..3).map(Key::Int).collect();
        let indexes: Vec<_> = keys
            .iter()
            .map(|k| store_hashed(&array, guard, 42, k.clone(), ()))
            .collect();
        assert_eq!(indexes[1], (indexes[0] + 1) & 7);

        let removed = array.buckets[indexes[0]].load(Ordering::Relaxed, guard);
        array.store_tombstone(indexes[0]);
        drop(unsafe { removed.into_owned() });

        let found = array.get(guard, 42, &keys[2], &Comparer::Generic);
        assert!(!found.is_null());
        assert!(array.get(guard, 42, &keys[0], &Comparer::Generic).is_null());

        // A new key takes the tombstone.
        assert!(matches!(
            array.find(guard, 42, &Key::Int(7), &Comparer::Generic),
            Slot::Vacant(i) if i == indexes[0]
        ));

        free_all(array, guard);
    }

    #[test]
    fn full_array_without_match() {
        let guard = unsafe { &crossbeam_epoch::unprotected() };
        let array = BucketArray::with_length(2, Dispatch::Empty);
        store(&array, guard, Key::Int(1), ());
        store(&array, guard, Key::Int(2), ());

        let key = Key::Int(3);
        assert!(matches!(
            array.find(guard, key.hash_code().unwrap(), &key, &Comparer::Generic),
            Slot::Full
        ));

        free_all(array, guard);
    }

    #[test]
    fn rehash_moves_buckets_and_drops_tombstones() {
        let guard = unsafe { &crossbeam_epoch::unprotected() };
        let array = BucketArray::with_length(8, Dispatch::Empty);

        for i in 0..5 {
            store(&array, guard, Key::Int(i), i);
        }
        let index = {
            let k = Key::Int(2);
            match array.find(guard, k.hash_code().unwrap(), &k, &Comparer::Generic) {
                Slot::Occupied(i, _) => i,
                _ => panic!("2 must be stored"),
            }
        };
        let removed = array.buckets[index].load(Ordering::Relaxed, guard);
        array.store_tombstone(index);
        drop(unsafe { removed.into_owned() });

        let next = array.rehash(guard, 16, Dispatch::Heterogeneous);
        assert_eq!(next.tombstone_count(), 0);
        assert_eq!(next.len(), 16);
        assert_eq!(next.max_count, 11);
        assert_eq!(next.occupied(guard).count(), 4);
        assert!(next
            .buckets
            .iter()
            .all(|slot| !is_tombstone(slot.load(Ordering::Relaxed, guard))));

        for i in [0, 1, 3, 4] {
            let k = Key::Int(i);
            let found = next.get(guard, k.hash_code().unwrap(), &k, &Comparer::Generic);
            let old = array.get(guard, k.hash_code().unwrap(), &k, &Comparer::Generic);
            assert_eq!(found, old);
            assert_eq!(unsafe { found.as_ref() }.map(|b| b.value), Some(i));
        }

        // The buckets are shared, so only one of the arrays frees them.
        drop(array);
        free_all(next, guard);
    }

    #[test]
    fn deep_copy_shrinks() {
        let guard = unsafe { &crossbeam_epoch::unprotected() };
        let array = BucketArray::with_length(64, Dispatch::Empty);
        for i in 0..3 {
            store(&array, guard, Key::Int(i), i);
        }

        let copy = array.deep_copy(guard, 8);
        assert_eq!(copy.len(), 8);
        for i in 0..3 {
            let k = Key::Int(i);
            let a = array.get(guard, k.hash_code().unwrap(), &k, &Comparer::Generic);
            let b = copy.get(guard, k.hash_code().unwrap(), &k, &Comparer::Generic);
            assert_ne!(a, b);
            assert!(!b.is_null());
        }
        assert!(copy.get(guard, 0, &Key::Int(99), &Comparer::Generic).is_null());

        free_all(array, guard);
        free_all(copy, guard);
    }
}
