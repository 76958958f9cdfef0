//! The in-memory variant frequency store.
//!
//! Leaves first: sample sets filter queries and removals, interval trees
//! hold the observations, the trie interns byte strings, and the
//! reference-keyed tables compose the two per table flavour.

pub mod error;
pub mod itree;
pub mod iupac;
pub mod sample_set;
pub mod seq;
pub mod table;
pub mod trie;

pub use error::Error;
pub use itree::ItvTree;
pub use iupac::Base;
pub use sample_set::SampleSet;
pub use seq::SequenceTable;
pub use table::{CoverageTable, MnvTable, SnvTable, Table};
pub use trie::{SeqHandle, Trie};

/// Phase tag marking an unphased ("both copies") call; the on-wire value
/// `-1` is mapped to this on ingestion.
pub const HOMOZYGOUS: u32 = u32::MAX;

/// Maximum length of a reference sequence name in bytes.
pub const MAX_REFERENCE_LEN: usize = 127;

/// Maximum length of an inserted sequence in bytes.
pub const MAX_INSERTED_LEN: usize = 1023;
