use serde::de::{self, SeqAccess, Visitor};
use serde::ser::{self, Serialize, Serializer};
use serde::{Deserialize, Deserializer};

use std::fmt::{self, Formatter};

use crate::{DictStorage, Entries, Key, SetStorage};

// Type and object keys only exist inside a running program, so they have no
// serialized form.
#[derive(serde::Serialize)]
#[serde(rename = "Key")]
enum KeyRef<'a> {
    None,
    Int(i64),
    Float(f64),
    Str(&'a str),
    Tuple(&'a [Key]),
}

#[derive(serde::Deserialize)]
#[serde(rename = "Key")]
enum KeyRepr {
    None,
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Key>),
}

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let repr = match self {
            Key::None => KeyRef::None,
            Key::Int(i) => KeyRef::Int(*i),
            Key::Float(x) => KeyRef::Float(*x),
            Key::Str(s) => KeyRef::Str(s),
            Key::Tuple(items) => KeyRef::Tuple(items),
            Key::Type(_) | Key::Object(_) => {
                return Err(ser::Error::custom(format!(
                    "cannot serialize a key of type '{}'",
                    self.type_name()
                )))
            }
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let key = match KeyRepr::deserialize(deserializer)? {
            KeyRepr::None => Key::None,
            KeyRepr::Int(i) => Key::Int(i),
            KeyRepr::Float(x) => Key::Float(x),
            KeyRepr::Str(s) => Key::from(s),
            KeyRepr::Tuple(items) => Key::Tuple(items.into()),
        };
        Ok(key)
    }
}

impl<V> Serialize for DictStorage<V>
where
    V: Serialize + Clone + Send + Sync + 'static,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_entries().serialize(serializer)
    }
}

impl<'de, V> Deserialize<'de> for DictStorage<V>
where
    V: Deserialize<'de> + Clone + Send + Sync + 'static,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = Entries::<V>::deserialize(deserializer)?;
        DictStorage::from_entries(entries).map_err(de::Error::custom)
    }
}

impl Serialize for SetStorage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.keys())
    }
}

impl<'de> Deserialize<'de> for SetStorage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(SetVisitor)
    }
}

struct SetVisitor;

impl<'de> Visitor<'de> for SetVisitor {
    type Value = SetStorage;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a sequence of keys")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let set = match access.size_hint() {
            Some(size) => SetStorage::with_capacity(size),
            None => SetStorage::new(),
        };

        while let Some(key) = access.next_element::<Key>()? {
            set.add(key).map_err(de::Error::custom)?;
        }

        Ok(set)
    }
}
