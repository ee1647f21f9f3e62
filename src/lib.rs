#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Dynamap is the storage engine of the built-in mapping and set containers of
//! a dynamic language runtime.
//!
//! Both [`DictStorage`] and [`SetStorage`] are open addressing hash tables
//! with the following traits:
//!
//! - Mutations are serialized by a lock owned by each table. Lookups, `len`
//!   and iteration never take it, and may run on other threads while a
//!   mutation is in progress. Memory that readers may still be looking at is
//!   reclaimed through an epoch based collector (`crossbeam-epoch`).
//! - Keys are dynamically typed [`Key`]s. A table specializes its hashing and
//!   equality for the type of its first key, and switches for good to the
//!   generic functions of the runtime when a key of another type is stored.
//!   User defined types customize hashing and equality through
//!   [`KeyProtocol`].
//! - The null key (`Key::None`) is stored out of band, beside the bucket
//!   array.
//! - Iterators fail with [`Error::ChangedDuringIteration`] when the table has
//!   been structurally modified since they were created.
//!
//! # Example
//!
//! ```rust
//! use dynamap::{DictStorage, Key, KeyDispatch, KeyType};
//!
//! let dict = DictStorage::new();
//! for i in 0..10 {
//!     dict.add(i, i * i).unwrap();
//! }
//! assert_eq!(dict.key_dispatch(), KeyDispatch::Homogeneous(KeyType::Int));
//!
//! // A string key makes the table heterogeneous.
//! dict.add("ten", 100).unwrap();
//! assert_eq!(dict.key_dispatch(), KeyDispatch::Heterogeneous);
//! assert_eq!(dict.get(&Key::Int(3)).unwrap(), Some(9));
//!
//! let mut sum = 0;
//! for entry in dict.iter() {
//!     let (_key, value) = entry.unwrap();
//!     sum += value;
//! }
//! assert_eq!(sum, 385);
//! ```
//!
//! # Crate Features
//!
//! - `logging`: emit `log` records when a table resizes, when it becomes
//!   heterogeneous, and when a resize is refused because of its maximum bucket
//!   count.
//! - `serde`: (de)serialize keys and tables through their flat persisted form,
//!   [`Entries`].

pub(crate) mod builder;
pub(crate) mod common;
pub(crate) mod dict;
pub(crate) mod dispatch;
pub(crate) mod key;
pub(crate) mod set;
pub(crate) mod table;

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
mod serde_impls;

#[cfg(test)]
pub(crate) mod test_util;

pub use builder::Builder;
pub use common::error::{Error, Result};
pub use dict::DictStorage;
pub use dispatch::KeyDispatch;
pub use key::{Class, ClassId, Key, KeyProtocol, KeyType, Object};
pub use set::{SetIter, SetStorage};
pub use table::{Entries, Iter};
