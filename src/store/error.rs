//! Error type shared by the store and the file drivers.

/// Errors reported by tables, indexes, and the file drivers.
///
/// Fallible operations are all-or-nothing at the granularity of a single
/// call: when an error is returned, the target structure is observably
/// unchanged.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A structural bound (reference capacity, tree capacity, character
    /// capacity, sample set capacity) would be exceeded.
    #[error("capacity exceeded: {what}")]
    Capacity {
        /// The bound that would be exceeded.
        what: &'static str,
    },

    /// An input record or value did not match the expected schema.
    #[error("parse error: {msg}")]
    Parse {
        /// Description of the offending token or value.
        msg: String,
    },

    /// Reading from or writing to a stream failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn capacity(what: &'static str) -> Self {
        Error::Capacity { what }
    }

    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Error::Parse { msg: msg.into() }
    }
}
