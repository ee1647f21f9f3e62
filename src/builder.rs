use crate::{
    common::{INITIAL_BUCKETS, MAX_BUCKETS},
    table::raw::{RawTable, Settings},
    DictStorage, SetStorage,
};

use std::marker::PhantomData;

/// Builds a [`DictStorage`][dict] or a [`SetStorage`][set] with various
/// configuration knobs.
///
/// [dict]: ./struct.DictStorage.html
/// [set]: ./struct.SetStorage.html
///
/// # Examples
///
/// ```rust
/// use dynamap::{DictStorage, Key};
///
/// let dict = DictStorage::builder()
///     // Allocate room for 1,000 entries up front.
///     .initial_capacity(1_000)
///     // Refuse to grow past 2^20 buckets.
///     .max_bucket_count(1 << 20)
///     // Prefix the log records of this table.
///     .name("globals")
///     .build();
///
/// dict.add("answer", 42).unwrap();
/// assert_eq!(dict.get(&Key::from("answer")).unwrap(), Some(42));
/// assert_eq!(dict.name(), Some("globals"));
/// ```
///
#[must_use]
pub struct Builder<C> {
    name: Option<String>,
    initial_capacity: Option<usize>,
    max_bucket_count: usize,
    container_type: PhantomData<C>,
}

impl<C> Default for Builder<C> {
    fn default() -> Self {
        Self {
            name: None,
            initial_capacity: None,
            max_bucket_count: MAX_BUCKETS,
            container_type: PhantomData,
        }
    }
}

impl<C> Builder<C> {
    /// Sets the name of the table. The name prefixes the log records of the
    /// table when the `logging` feature is enabled.
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the number of entries the table can hold before its first resize.
    pub fn initial_capacity(self, capacity: usize) -> Self {
        Self {
            initial_capacity: Some(capacity),
            ..self
        }
    }

    /// Sets the maximum length of the bucket array. The value is rounded up to
    /// a power of two, and is at least 8. Insertions that would make the table
    /// grow past it fail with [`Error::CapacityOverflow`][overflow].
    ///
    /// [overflow]: ./enum.Error.html#variant.CapacityOverflow
    pub fn max_bucket_count(self, count: usize) -> Self {
        let count = count
            .max(INITIAL_BUCKETS)
            .checked_next_power_of_two()
            .unwrap_or(MAX_BUCKETS);
        Self {
            max_bucket_count: count,
            ..self
        }
    }

    fn build_raw<V>(self) -> RawTable<V> {
        let settings = Settings {
            name: self.name,
            max_buckets: self.max_bucket_count,
        };
        RawTable::with_capacity(self.initial_capacity.unwrap_or_default(), settings)
    }
}

impl<V> Builder<DictStorage<V>>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a `DictStorage<V>`.
    pub fn build(self) -> DictStorage<V> {
        DictStorage::from_raw(self.build_raw())
    }
}

impl Builder<SetStorage> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a `SetStorage`.
    pub fn build(self) -> SetStorage {
        SetStorage::from_raw(self.build_raw())
    }
}
