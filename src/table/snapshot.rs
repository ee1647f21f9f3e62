use super::raw::{RawTable, Settings};
use crate::{common::error::Result, key::Key};

/// The flat persisted form of a table.
///
/// Hash codes are never part of it: they may be computed differently by the
/// process that restores the table, so a table is rebuilt by adding every
/// entry again.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Entries<V> {
    /// The entries with a non-null key, in slot order.
    pub entries: Vec<(Key, V)>,
    /// The value of the null key.
    pub null: Option<V>,
}

impl<V> Default for Entries<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            null: None,
        }
    }
}

impl<V> Entries<V> {
    pub fn len(&self) -> usize {
        self.entries.len() + usize::from(self.null.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> RawTable<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn to_entries(&self) -> Entries<V> {
        let mut snapshot = Entries::default();
        for (key, value) in self.snapshot(|k, v| (k.clone(), v.clone())) {
            if key.is_none() {
                snapshot.null = Some(value);
            } else {
                snapshot.entries.push((key, value));
            }
        }
        snapshot
    }

    /// Rebuilds a table from its persisted form. The first error, such as an
    /// unhashable key, aborts the rebuild.
    pub(crate) fn from_entries(entries: Entries<V>, settings: Settings) -> Result<Self> {
        let table = Self::with_capacity(entries.entries.len(), settings);
        for (key, value) in entries.entries {
            table.insert(key, value)?;
        }
        if let Some(value) = entries.null {
            table.insert(Key::None, value)?;
        }
        Ok(table)
    }
}
