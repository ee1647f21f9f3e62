//! The open addressing hash table shared by [`DictStorage`][dict] and
//! [`SetStorage`][set].
//!
//! [dict]: ../struct.DictStorage.html
//! [set]: ../struct.SetStorage.html

pub(crate) mod bucket;
pub(crate) mod iter;
pub(crate) mod raw;
pub(crate) mod snapshot;

pub use iter::Iter;
pub use snapshot::Entries;
