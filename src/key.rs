//! Dynamic key values.
//!
//! A [`Key`] is a value of the host language that can be stored in a table.
//! The built-in scalar types (integers, floats, strings, tuples and type
//! objects) are represented directly, so the tables can hash and compare them
//! without going through the object model. Every other value is an
//! [`Object`], whose [`Class`] decides how it is hashed and compared through a
//! [`KeyProtocol`].

pub(crate) mod hashing;

use crate::common::error::{Error, Result};

use once_cell::sync::OnceCell;
use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// The hashing and equality customization of a user defined type.
///
/// This is the capability interface through which the tables call into the
/// language's own `__hash__` and `__eq__` for objects. A table resolves the
/// protocol of a class once and keeps it while all of its keys share that
/// class.
pub trait KeyProtocol: Send + Sync {
    /// Returns the hash code of `key`. Errors are returned to the caller of the
    /// table operation unchanged.
    fn hash(&self, key: &Key) -> Result<i64>;

    /// Returns `true` if `a` and `b` are equal. `a` is always a key of the
    /// class that owns this protocol; `b` may be of any type.
    fn equals(&self, a: &Key, b: &Key) -> bool;
}

/// A value of a user defined type.
pub trait Object: Any + Send + Sync + fmt::Debug {
    /// Returns the runtime type of this object.
    fn class(&self) -> &Arc<Class>;

    /// Returns `self` as `Any`, so protocols can downcast to their own type.
    fn as_any(&self) -> &dyn Any;
}

/// A unique identifier of a [`Class`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u64);

impl ClassId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

enum ProtocolSlot {
    Identity,
    Custom(Arc<dyn KeyProtocol>),
    Unhashable,
}

/// The runtime type of user defined [`Object`]s.
///
/// A class carries the hashing and equality behavior of its instances. The
/// resolved [`KeyProtocol`] is memoized, so looking it up again is O(1).
pub struct Class {
    id: ClassId,
    name: String,
    slot: ProtocolSlot,
    resolved: OnceCell<Arc<dyn KeyProtocol>>,
}

impl Class {
    /// Creates a class whose instances hash and compare by identity, like a
    /// type that does not override `__hash__` and `__eq__`.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_slot(name.into(), ProtocolSlot::Identity)
    }

    /// Creates a class whose instances hash and compare through `protocol`.
    pub fn with_protocol(name: impl Into<String>, protocol: Arc<dyn KeyProtocol>) -> Arc<Self> {
        Self::with_slot(name.into(), ProtocolSlot::Custom(protocol))
    }

    /// Creates a class whose instances cannot be hashed. Storing one of them
    /// in a table fails with [`Error::Unhashable`].
    pub fn unhashable(name: impl Into<String>) -> Arc<Self> {
        Self::with_slot(name.into(), ProtocolSlot::Unhashable)
    }

    fn with_slot(name: String, slot: ProtocolSlot) -> Arc<Self> {
        Arc::new(Self {
            id: ClassId::next(),
            name,
            slot,
            resolved: OnceCell::new(),
        })
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves the hashing and equality protocol of this class.
    pub fn protocol(&self) -> Result<&Arc<dyn KeyProtocol>> {
        self.resolved.get_or_try_init(|| match &self.slot {
            ProtocolSlot::Identity => Ok(Arc::new(IdentityProtocol) as Arc<dyn KeyProtocol>),
            ProtocolSlot::Custom(protocol) => Ok(Arc::clone(protocol)),
            ProtocolSlot::Unhashable => Err(Error::unhashable(&self.name)),
        })
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

struct IdentityProtocol;

impl KeyProtocol for IdentityProtocol {
    fn hash(&self, key: &Key) -> Result<i64> {
        match key {
            Key::Object(obj) => Ok(hashing::hash_identity(Arc::as_ptr(obj) as *const ()) as i64),
            other => Err(Error::unhashable(other.type_name())),
        }
    }

    fn equals(&self, a: &Key, b: &Key) -> bool {
        a.is_same(b)
    }
}

/// The runtime type of a non-null [`Key`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyType {
    Int,
    Float,
    Str,
    Tuple,
    Type,
    Object(ClassId),
}

/// A key of a dynamic language table.
#[derive(Clone)]
pub enum Key {
    /// The null key. It is never stored in a bucket array.
    None,
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Tuple(Arc<[Key]>),
    /// A type object. Type objects hash and compare by identity.
    Type(Arc<Class>),
    Object(Arc<dyn Object>),
}

impl Key {
    pub fn str(s: &str) -> Self {
        Self::Str(Arc::from(s))
    }

    pub fn tuple<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Key>,
    {
        Self::Tuple(items.into_iter().collect())
    }

    pub fn object<T: Object>(obj: T) -> Self {
        Self::Object(Arc::new(obj))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns the runtime type of this key, or `None` for the null key.
    pub fn key_type(&self) -> Option<KeyType> {
        let ty = match self {
            Self::None => return None,
            Self::Int(_) => KeyType::Int,
            Self::Float(_) => KeyType::Float,
            Self::Str(_) => KeyType::Str,
            Self::Tuple(_) => KeyType::Tuple,
            Self::Type(_) => KeyType::Type,
            Self::Object(obj) => KeyType::Object(obj.class().id()),
        };
        Some(ty)
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::None => "NoneType",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Tuple(_) => "tuple",
            Self::Type(_) => "type",
            Self::Object(obj) => obj.class().name(),
        }
    }

    /// Downcasts an object key to its concrete type.
    pub fn as_object<T: Object>(&self) -> Option<&T> {
        match self {
            Self::Object(obj) => obj.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Returns `true` if both keys are the same value by identity. Tables check
    /// identity before calling any equality function.
    pub fn is_same(&self, other: &Key) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => Arc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) => Arc::ptr_eq(a, b),
            (Self::Type(a), Self::Type(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }

    /// Computes the hash of this key with the hash function of its own type.
    ///
    /// Keys that compare equal across types (such as `1` and `1.0`) have the
    /// same hash.
    pub fn hash_code(&self) -> Result<u64> {
        hashing::generic_hash(self)
    }

    /// Compares two keys with the language's equality, including cross type
    /// comparisons between numbers and the protocols of user defined classes.
    pub fn equals(&self, other: &Key) -> bool {
        hashing::generic_equals(self, other)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Tuple(items) => {
                let mut t = f.debug_tuple("");
                for item in items.iter() {
                    t.field(item);
                }
                t.finish()
            }
            Self::Type(class) => write!(f, "<class '{}'>", class.name()),
            Self::Object(obj) => fmt::Debug::fmt(obj, f),
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Self::Int(i.into())
    }
}

impl From<f64> for Key {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl From<Arc<Class>> for Key {
    fn from(class: Arc<Class>) -> Self {
        Self::Type(class)
    }
}

impl<T: Into<Key>> From<Option<T>> for Key {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}
