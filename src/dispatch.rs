//! Per table specialization of hashing and equality.
//!
//! A table starts with an `Empty` dispatch. The first key that is stored
//! selects a comparer specialized for its runtime type (`Homogeneous`). When a
//! key of a different type is stored, the table is promoted to the generic
//! comparer (`Heterogeneous`) for the rest of its life, or until it is cleared.

use crate::{
    common::error::Result,
    key::{hashing, Key, KeyProtocol, KeyType},
};

use std::{fmt, sync::Arc};

/// A pair of hash and equality functions for one key type.
#[derive(Clone, Copy)]
pub(crate) struct KeyOps {
    pub(crate) hash: fn(&Key) -> Result<u64>,
    pub(crate) eq: fn(&Key, &Key) -> bool,
}

/// The fast path functions of the built-in key types. Indexed by
/// [`Primitive`].
pub(crate) static PRIMITIVE_OPS: [KeyOps; 5] = [
    KeyOps {
        hash: int_hash,
        eq: int_eq,
    },
    KeyOps {
        hash: float_hash,
        eq: float_eq,
    },
    KeyOps {
        hash: str_hash,
        eq: str_eq,
    },
    KeyOps {
        hash: tuple_hash,
        eq: hashing::generic_equals,
    },
    KeyOps {
        hash: type_hash,
        eq: type_eq,
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Primitive {
    Int = 0,
    Float = 1,
    Str = 2,
    Tuple = 3,
    Type = 4,
}

impl Primitive {
    fn of(key_type: KeyType) -> Option<Self> {
        match key_type {
            KeyType::Int => Some(Self::Int),
            KeyType::Float => Some(Self::Float),
            KeyType::Str => Some(Self::Str),
            KeyType::Tuple => Some(Self::Tuple),
            KeyType::Type => Some(Self::Type),
            KeyType::Object(_) => None,
        }
    }

    fn ops(self) -> &'static KeyOps {
        &PRIMITIVE_OPS[self as usize]
    }
}

// The specialized functions are only called with keys of their own type. A
// key of another type is never equal, and falls back to the generic hash.

fn int_hash(key: &Key) -> Result<u64> {
    match key {
        Key::Int(i) => Ok(hashing::hash_int(*i)),
        other => hashing::generic_hash(other),
    }
}

fn int_eq(a: &Key, b: &Key) -> bool {
    matches!((a, b), (Key::Int(x), Key::Int(y)) if x == y)
}

fn float_hash(key: &Key) -> Result<u64> {
    match key {
        Key::Float(x) => Ok(hashing::hash_float(*x)),
        other => hashing::generic_hash(other),
    }
}

fn float_eq(a: &Key, b: &Key) -> bool {
    matches!((a, b), (Key::Float(x), Key::Float(y)) if x == y)
}

fn str_hash(key: &Key) -> Result<u64> {
    match key {
        Key::Str(s) => Ok(hashing::hash_str(s)),
        other => hashing::generic_hash(other),
    }
}

fn str_eq(a: &Key, b: &Key) -> bool {
    matches!((a, b), (Key::Str(x), Key::Str(y)) if x == y)
}

fn tuple_hash(key: &Key) -> Result<u64> {
    match key {
        Key::Tuple(items) => hashing::hash_tuple(items, hashing::generic_hash),
        other => hashing::generic_hash(other),
    }
}

fn type_hash(key: &Key) -> Result<u64> {
    hashing::generic_hash(key)
}

fn type_eq(a: &Key, b: &Key) -> bool {
    matches!((a, b), (Key::Type(x), Key::Type(y)) if Arc::ptr_eq(x, y))
}

/// A resolved hashing and equality strategy.
#[derive(Clone)]
pub(crate) enum Comparer {
    Primitive(&'static KeyOps),
    Class(Arc<dyn KeyProtocol>),
    Generic,
}

static GENERIC: Comparer = Comparer::Generic;

impl Comparer {
    /// Resolves the specialized comparer of the type of `key`.
    ///
    /// Fails when `key` is an object of a class that cannot be hashed.
    pub(crate) fn resolve(key: &Key, key_type: KeyType) -> Result<Self> {
        if let Some(primitive) = Primitive::of(key_type) {
            return Ok(Self::Primitive(primitive.ops()));
        }
        match key {
            Key::Object(obj) => Ok(Self::Class(Arc::clone(obj.class().protocol()?))),
            _ => Ok(Self::Generic),
        }
    }

    pub(crate) fn hash(&self, key: &Key) -> Result<u64> {
        match self {
            Self::Primitive(ops) => (ops.hash)(key),
            Self::Class(protocol) => protocol.hash(key).map(|h| h as u64),
            Self::Generic => hashing::generic_hash(key),
        }
    }

    /// Compares a probing key with a stored key. Identity is checked first.
    pub(crate) fn equals(&self, key: &Key, stored: &Key) -> bool {
        if key.is_same(stored) {
            return true;
        }
        match self {
            Self::Primitive(ops) => (ops.eq)(key, stored),
            Self::Class(protocol) => protocol.equals(key, stored),
            Self::Generic => hashing::generic_equals(key, stored),
        }
    }
}

impl fmt::Debug for Comparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(_) => f.write_str("Primitive"),
            Self::Class(_) => f.write_str("Class"),
            Self::Generic => f.write_str("Generic"),
        }
    }
}

/// The dispatch state of a bucket array.
#[derive(Clone, Debug)]
pub(crate) enum Dispatch {
    Empty,
    Homogeneous {
        key_type: KeyType,
        comparer: Comparer,
    },
    Heterogeneous,
}

pub(crate) static EMPTY: Dispatch = Dispatch::Empty;

impl Dispatch {
    /// Returns the comparer to use for a key of `key_type`. A key whose type
    /// differs from the type of a homogeneous table uses the generic comparer,
    /// without promoting the table.
    pub(crate) fn comparer_for(&self, key_type: KeyType) -> &Comparer {
        match self {
            Self::Homogeneous {
                key_type: kt,
                comparer,
            } if *kt == key_type => comparer,
            _ => &GENERIC,
        }
    }

    /// Returns the dispatch the table must switch to before `key` is stored,
    /// or `None` to keep the current one.
    pub(crate) fn before_insert_of(&self, key: &Key, key_type: KeyType) -> Result<Option<Self>> {
        match self {
            Self::Empty => Ok(Some(Self::Homogeneous {
                key_type,
                comparer: Comparer::resolve(key, key_type)?,
            })),
            Self::Homogeneous { key_type: kt, .. } if *kt == key_type => Ok(None),
            Self::Homogeneous { .. } => Ok(Some(Self::Heterogeneous)),
            Self::Heterogeneous => Ok(None),
        }
    }

    /// Returns the dispatch a table with this dispatch must switch to before
    /// the entries of a table with `other` are copied into it, or `None` to
    /// keep the current one.
    pub(crate) fn merged_with(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (_, Self::Empty) | (Self::Heterogeneous, _) => None,
            (Self::Empty, other) => Some(other.clone()),
            (Self::Homogeneous { key_type: a, .. }, Self::Homogeneous { key_type: b, .. })
                if a == b =>
            {
                None
            }
            _ => Some(Self::Heterogeneous),
        }
    }

    pub(crate) fn kind(&self) -> KeyDispatch {
        match self {
            Self::Empty => KeyDispatch::Empty,
            Self::Homogeneous { key_type, .. } => KeyDispatch::Homogeneous(*key_type),
            Self::Heterogeneous => KeyDispatch::Heterogeneous,
        }
    }
}

/// The observable dispatch state of a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyDispatch {
    /// No key has been stored since the table was created or cleared.
    Empty,
    /// Every stored key has this runtime type, and the table uses the hashing
    /// and equality functions specialized for it.
    Homogeneous(KeyType),
    /// Keys of more than one type have been stored. The table uses the
    /// generic hashing and equality functions.
    Heterogeneous,
}
