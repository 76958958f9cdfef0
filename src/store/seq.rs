//! Dictionary of inserted sequences shared by the MNV table.

use super::{
    error::Error,
    trie::{SeqHandle, Trie},
};

/// Interning table for inserted-allele byte strings.
///
/// MNV entries store the handle instead of the sequence itself, so two
/// samples carrying the same insertion share one copy.  The on-wire `"."`
/// sentinel for "no inserted sequence" is normalised to the empty string
/// before it reaches this table.
#[derive(Debug, Clone)]
pub struct SequenceTable {
    trie: Trie,
}

impl SequenceTable {
    /// Create a table; `char_capacity` bounds the total bytes across all
    /// interned sequences.
    pub fn new(char_capacity: usize) -> Result<Self, Error> {
        Ok(SequenceTable {
            trie: Trie::new(char_capacity)?,
        })
    }

    /// Intern a sequence, returning its handle; idempotent.
    pub fn insert(&mut self, sequence: &[u8]) -> Result<SeqHandle, Error> {
        self.trie.insert(sequence)
    }

    /// Look up a sequence without interning it.
    pub fn find(&self, sequence: &[u8]) -> Option<SeqHandle> {
        self.trie.find(sequence)
    }

    /// The sequence behind `handle`; maintenance tooling only.
    pub fn key_of(&self, handle: SeqHandle) -> Option<&[u8]> {
        self.trie.key_of(handle)
    }

    /// Number of distinct interned sequences.
    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }
}
