use std::{error::Error as StdError, fmt, sync::Arc};

/// The error type for the operations of [`DictStorage`][dict] and
/// [`SetStorage`][set].
///
/// The tables never recover from or retry after any of these errors. They are
/// returned to the immediate caller, which is expected to translate them into
/// its own user facing errors.
///
/// [dict]: ./struct.DictStorage.html
/// [set]: ./struct.SetStorage.html
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The key cannot be hashed.
    ///
    /// Returned by the built-in hash functions and by the resolution of a
    /// [`Class`][class] that was declared unhashable. This is returned even
    /// when the table is empty, because computing the hash of the key is
    /// unavoidable.
    ///
    /// [class]: ./struct.Class.html
    #[error("unhashable type: '{type_name}'")]
    Unhashable { type_name: String },

    /// An error raised by a user supplied [`KeyProtocol`][protocol]. It is
    /// propagated unchanged.
    ///
    /// [protocol]: ./trait.KeyProtocol.html
    #[error(transparent)]
    Raised(Arc<dyn StdError + Send + Sync + 'static>),

    /// The table was structurally modified while an iterator was walking it.
    #[error("container changed size during iteration")]
    ChangedDuringIteration,

    /// Growing the table would exceed the maximum number of buckets.
    #[error(
        "table has reached its maximum size \
    (requested {requested} buckets, the limit is {max})"
    )]
    CapacityOverflow { requested: usize, max: usize },
}

impl Error {
    /// Wraps an error raised by user code so it can travel through the table.
    pub fn raised<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Raised(Arc::new(error))
    }

    pub(crate) fn unhashable(type_name: impl fmt::Display) -> Self {
        Self::Unhashable {
            type_name: type_name.to_string(),
        }
    }
}

/// A specialized `Result` type for table operations.
pub type Result<T> = std::result::Result<T, Error>;
