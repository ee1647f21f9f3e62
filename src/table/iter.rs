use super::{bucket::BucketArray, raw::RawTable};
use crate::{
    common::error::{Error, Result},
    key::Key,
};

use crossbeam_epoch::Guard;
use std::{ptr, sync::atomic::Ordering};

/// An iterator over the entries of a table.
///
/// The iterator does not lock the table. It walks the bucket array that was
/// current when it was created, and fails with
/// [`Error::ChangedDuringIteration`][changed] as soon as it notices that the
/// table has been structurally modified since then. After the error, it yields
/// nothing more. The null key, when present, is yielded last.
///
/// [changed]: ../enum.Error.html#variant.ChangedDuringIteration
pub struct Iter<'t, V> {
    table: &'t RawTable<V>,
    // Keeps `array` alive.
    guard: Guard,
    array: *const BucketArray<V>,
    version: usize,
    index: usize,
    null_done: bool,
    is_done: bool,
}

impl<'t, V> Iter<'t, V> {
    pub(crate) fn new(table: &'t RawTable<V>) -> Self {
        let guard = crossbeam_epoch::pin();
        let version = table.version();
        let array = table.load_array(&guard).as_raw();

        Self {
            table,
            guard,
            array,
            version,
            index: 0,
            null_done: false,
            is_done: false,
        }
    }

    /// The version of the table this iterator started from.
    pub fn version(&self) -> usize {
        self.version
    }
}

impl<'t, V: Clone> Iterator for Iter<'t, V> {
    type Item = Result<(Key, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_done {
            return None;
        }

        if self.table.version() != self.version {
            self.is_done = true;
            return Some(Err(Error::ChangedDuringIteration));
        }

        // Safety: the array was loaded under `self.guard`, which is still
        // pinned, so it has not been destroyed.
        if let Some(array) = unsafe { self.array.as_ref() } {
            while self.index < array.len() {
                let bucket_ptr = array.buckets[self.index].load(Ordering::Acquire, &self.guard);
                self.index += 1;

                if let Some(bucket) = unsafe { bucket_ptr.as_ref() } {
                    return Some(Ok((bucket.key.clone(), bucket.value.clone())));
                }
            }
        }

        if !self.null_done {
            self.null_done = true;
            if let Some(value) = unsafe { self.table.load_null(&self.guard).as_ref() } {
                return Some(Ok((Key::None, value.clone())));
            }
        }

        self.is_done = true;
        self.array = ptr::null();
        None
    }
}

impl<'t, V> std::iter::FusedIterator for Iter<'t, V> where V: Clone {}
