//! Reference-keyed tables: one interval tree per reference sequence.
//!
//! A table composes a trie over reference names with one interval tree per
//! name seen so far.  The four table flavours (coverage, SNV, MNV, and the
//! sequence dictionary in [`super::seq`]) share this skeleton and differ
//! only in the interval payload.

use std::fmt::Debug;
use std::io::Write;

use super::{
    error::Error,
    itree::ItvTree,
    iupac::Base,
    sample_set::SampleSet,
    trie::{SeqHandle, Trie},
    HOMOZYGOUS, MAX_REFERENCE_LEN,
};

/// Generic reference-keyed interval table.
///
/// Trees are allocated lazily on first sight of a reference name; a table
/// created with `ref_capacity` references never holds more.  After a failed
/// insert a freshly interned name (and its empty tree) may stay registered,
/// which no query can observe.
#[derive(Debug, Clone)]
pub struct Table<P> {
    refs: Trie,
    trees: Vec<ItvTree<P>>,
    ref_capacity: usize,
    tree_capacity: usize,
}

impl<P> Table<P>
where
    P: Copy + Ord + Debug,
{
    /// Create a table with the given bounds, each limited to 32 bits.
    pub fn new(
        ref_capacity: usize,
        ref_char_capacity: usize,
        tree_capacity: usize,
    ) -> Result<Self, Error> {
        if ref_capacity > u32::MAX as usize {
            return Err(Error::capacity("reference capacity"));
        }
        if tree_capacity > u32::MAX as usize {
            return Err(Error::capacity("tree capacity"));
        }
        Ok(Table {
            refs: Trie::new(ref_char_capacity)?,
            trees: Vec::new(),
            ref_capacity,
            tree_capacity,
        })
    }

    /// Insert one observation for `reference`.
    pub fn insert(
        &mut self,
        reference: &[u8],
        start: u32,
        end: u32,
        sample_id: u32,
        phase: u32,
        payload: P,
    ) -> Result<(), Error> {
        validate_reference(reference)?;

        let slot = match self.refs.find(reference) {
            Some(handle) => handle.index(),
            None => {
                if self.trees.len() >= self.ref_capacity {
                    return Err(Error::capacity("reference capacity"));
                }
                let handle = self.refs.insert(reference)?;
                debug_assert_eq!(handle.index(), self.trees.len());
                self.trees.push(ItvTree::new(self.tree_capacity)?);
                handle.index()
            }
        };

        self.trees[slot].insert(start, end, sample_id, phase, payload)
    }

    /// Sum the multiplicities of entries on `reference` overlapping
    /// `[qs, qe)`; an unknown reference contributes 0.
    pub fn query_stab(
        &self,
        reference: &[u8],
        qs: u32,
        qe: u32,
        subset: Option<&SampleSet>,
    ) -> u64 {
        match self.refs.find(reference) {
            Some(handle) => self.trees[handle.index()].query_stab(qs, qe, subset),
            None => 0,
        }
    }

    /// Sum the multiplicities of entries on `reference` matching interval
    /// and payload exactly; an unknown reference contributes 0.
    pub fn query_exact(
        &self,
        reference: &[u8],
        start: u32,
        end: u32,
        payload: P,
        subset: Option<&SampleSet>,
    ) -> u64 {
        match self.refs.find(reference) {
            Some(handle) => self.trees[handle.index()].query_exact(start, end, payload, subset),
            None => 0,
        }
    }

    /// Retract every entry of every reference whose sample is in `subset`;
    /// returns the total retracted multiplicity.
    pub fn remove(&mut self, subset: &SampleSet) -> u64 {
        self.trees
            .iter_mut()
            .fold(0u64, |sum, tree| sum.saturating_add(tree.remove(subset)))
    }

    /// Number of distinct references seen so far.
    pub fn reference_count(&self) -> usize {
        self.trees.len()
    }

    /// Number of distinct entries across all references.
    pub fn entry_count(&self) -> usize {
        self.trees.iter().map(ItvTree::len).sum()
    }

    /// Write `"<len>\t<reference>\n"` per known reference; diagnostic only.
    pub fn write_references<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        for key in self.refs.keys() {
            write!(writer, "{}\t", key.len())?;
            writer.write_all(key)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// Reference names are non-empty, NUL-free, and at most 127 bytes.
fn validate_reference(reference: &[u8]) -> Result<(), Error> {
    if reference.is_empty() {
        return Err(Error::parse("empty reference name"));
    }
    if reference.len() > MAX_REFERENCE_LEN {
        return Err(Error::parse(format!(
            "reference name of {} bytes exceeds {} bytes",
            reference.len(),
            MAX_REFERENCE_LEN
        )));
    }
    if reference.contains(&0) {
        return Err(Error::parse("reference name contains NUL"));
    }
    Ok(())
}

/// Covered regions per sample; the denominator side of every annotation.
#[derive(Debug, Clone)]
pub struct CoverageTable {
    inner: Table<()>,
}

impl CoverageTable {
    pub fn new(
        ref_capacity: usize,
        ref_char_capacity: usize,
        tree_capacity: usize,
    ) -> Result<Self, Error> {
        Ok(CoverageTable {
            inner: Table::new(ref_capacity, ref_char_capacity, tree_capacity)?,
        })
    }

    /// Record that `sample_id` covers `[start, end)` on `reference`.
    ///
    /// Zero-length regions are accepted; they can never be stabbed but
    /// complete the coverage encoding.
    pub fn insert(
        &mut self,
        reference: &[u8],
        start: u32,
        end: u32,
        sample_id: u32,
    ) -> Result<(), Error> {
        self.inner
            .insert(reference, start, end, sample_id, HOMOZYGOUS, ())
    }

    /// Number of covering observations overlapping `[qs, qe)`.
    pub fn query_stab(
        &self,
        reference: &[u8],
        qs: u32,
        qe: u32,
        subset: Option<&SampleSet>,
    ) -> u64 {
        self.inner.query_stab(reference, qs, qe, subset)
    }

    pub fn remove(&mut self, subset: &SampleSet) -> u64 {
        self.inner.remove(subset)
    }

    pub fn reference_count(&self) -> usize {
        self.inner.reference_count()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.entry_count()
    }

    pub fn write_references<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        self.inner.write_references(writer)
    }
}

/// Single-nucleotide variants in canonical `[pos, pos + 1)` form.
#[derive(Debug, Clone)]
pub struct SnvTable {
    inner: Table<Base>,
}

impl SnvTable {
    pub fn new(
        ref_capacity: usize,
        ref_char_capacity: usize,
        tree_capacity: usize,
    ) -> Result<Self, Error> {
        Ok(SnvTable {
            inner: Table::new(ref_capacity, ref_char_capacity, tree_capacity)?,
        })
    }

    pub fn insert(
        &mut self,
        reference: &[u8],
        position: u32,
        sample_id: u32,
        phase: u32,
        base: Base,
    ) -> Result<(), Error> {
        let end = position
            .checked_add(1)
            .ok_or_else(|| Error::parse(format!("position {position} out of range")))?;
        self.inner
            .insert(reference, position, end, sample_id, phase, base)
    }

    /// Number of observations of `base` at exactly `position`.
    pub fn query(
        &self,
        reference: &[u8],
        position: u32,
        base: Base,
        subset: Option<&SampleSet>,
    ) -> u64 {
        match position.checked_add(1) {
            Some(end) => self.inner.query_exact(reference, position, end, base, subset),
            None => 0,
        }
    }

    pub fn remove(&mut self, subset: &SampleSet) -> u64 {
        self.inner.remove(subset)
    }

    pub fn reference_count(&self) -> usize {
        self.inner.reference_count()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.entry_count()
    }
}

/// Multi-nucleotide variants; the inserted sequence lives in the sequence
/// dictionary and entries store its handle.
#[derive(Debug, Clone)]
pub struct MnvTable {
    inner: Table<SeqHandle>,
}

impl MnvTable {
    pub fn new(
        ref_capacity: usize,
        ref_char_capacity: usize,
        tree_capacity: usize,
    ) -> Result<Self, Error> {
        Ok(MnvTable {
            inner: Table::new(ref_capacity, ref_char_capacity, tree_capacity)?,
        })
    }

    pub fn insert(
        &mut self,
        reference: &[u8],
        start: u32,
        end: u32,
        sample_id: u32,
        phase: u32,
        sequence: SeqHandle,
    ) -> Result<(), Error> {
        self.inner
            .insert(reference, start, end, sample_id, phase, sequence)
    }

    /// Number of observations replacing exactly `[start, end)` with the
    /// sequence behind `sequence`.
    pub fn query(
        &self,
        reference: &[u8],
        start: u32,
        end: u32,
        sequence: SeqHandle,
        subset: Option<&SampleSet>,
    ) -> u64 {
        self.inner.query_exact(reference, start, end, sequence, subset)
    }

    pub fn remove(&mut self, subset: &SampleSet) -> u64 {
        self.inner.remove(subset)
    }

    pub fn reference_count(&self) -> usize {
        self.inner.reference_count()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.entry_count()
    }
}
