//! Interval index: balanced search trees over half-open genomic intervals.
//!
//! Entries are keyed on `(start, end, sample_id, payload)`; re-inserting an
//! identical tuple bumps the entry's multiplicity instead of growing the
//! tree.  Every node carries the maximum `end` of its subtree so that
//! stabbing queries can prune whole subtrees.

use std::cmp::Ordering;
use std::fmt::Debug;

use super::{error::Error, sample_set::SampleSet};

/// Sentinel index for "no child".
const NIL: u32 = u32::MAX;

/// One stored interval entry.
///
/// `phase` is an annotation only: it takes no part in the entry's identity,
/// so coalescing keeps the phase of the first insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<P> {
    /// 0-based inclusive start position.
    pub start: u32,
    /// 0-based exclusive end position.
    pub end: u32,
    /// Identifier of the sample the observation belongs to.
    pub sample_id: u32,
    /// Phase tag of the observation.
    pub phase: u32,
    /// Multiplicity of this tuple.
    pub count: u32,
    /// Payload distinguishing the table specialisation.
    pub payload: P,
}

#[derive(Debug, Clone)]
struct Node<P> {
    entry: Entry<P>,
    /// Maximum `end` over this node's subtree.
    max_end: u32,
    left: u32,
    right: u32,
    height: u8,
}

/// An AVL tree of interval entries with subtree `max_end` augmentation.
///
/// The node arena is bounded by the capacity given at construction; a full
/// tree rejects inserts of new tuples but still coalesces known ones.
#[derive(Debug, Clone)]
pub struct ItvTree<P> {
    nodes: Vec<Node<P>>,
    root: u32,
    capacity: usize,
}

impl<P> ItvTree<P>
where
    P: Copy + Ord + Debug,
{
    /// Create an empty tree holding at most `capacity` distinct entries.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        if capacity > u32::MAX as usize {
            return Err(Error::capacity("tree capacity"));
        }
        Ok(ItvTree {
            nodes: Vec::new(),
            root: NIL,
            capacity,
        })
    }

    /// Number of distinct entries (coalesced tuples count once).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert one observation of `[start, end)` for `sample_id`.
    ///
    /// An identical tuple increments the stored multiplicity; a new tuple
    /// allocates a node.  On any error the tree is unchanged.
    pub fn insert(
        &mut self,
        start: u32,
        end: u32,
        sample_id: u32,
        phase: u32,
        payload: P,
    ) -> Result<(), Error> {
        if start > end {
            return Err(Error::parse(format!(
                "interval end {end} precedes start {start}"
            )));
        }

        let entry = Entry {
            start,
            end,
            sample_id,
            phase,
            count: 1,
            payload,
        };

        if let Some(at) = self.find_exact(&entry) {
            let count = &mut self.nodes[at as usize].entry.count;
            *count = count
                .checked_add(1)
                .ok_or_else(|| Error::capacity("entry multiplicity"))?;
            return Ok(());
        }

        if self.nodes.len() >= self.capacity {
            return Err(Error::capacity("tree capacity"));
        }

        let new = self.nodes.len() as u32;
        self.nodes.push(Node {
            entry,
            max_end: end,
            left: NIL,
            right: NIL,
            height: 1,
        });
        self.root = self.insert_at(self.root, new);

        Ok(())
    }

    /// Sum the multiplicities of all entries overlapping `[qs, qe)`.
    ///
    /// An entry `[es, ee)` overlaps iff `es < qe && qs < ee`; zero-length
    /// intervals on either side never overlap.  With a subset, only entries
    /// whose sample is a member contribute.
    pub fn query_stab(&self, qs: u32, qe: u32, subset: Option<&SampleSet>) -> u64 {
        if qs >= qe {
            return 0;
        }
        self.stab_at(self.root, qs, qe, subset)
    }

    /// Sum the multiplicities of entries matching the interval and payload
    /// exactly.
    pub fn query_exact(
        &self,
        start: u32,
        end: u32,
        payload: P,
        subset: Option<&SampleSet>,
    ) -> u64 {
        self.exact_at(self.root, start, end, payload, subset)
    }

    /// Retract every entry whose sample is in `subset`.
    ///
    /// Returns the sum of retracted multiplicities.  The surviving entries
    /// are rebuilt into a balanced tree in one pass.
    pub fn remove(&mut self, subset: &SampleSet) -> u64 {
        let mut kept = Vec::with_capacity(self.nodes.len());
        let mut removed = 0u64;
        self.in_order(self.root, &mut |entry| {
            if subset.contains(entry.sample_id) {
                removed += u64::from(entry.count);
            } else {
                kept.push(*entry);
            }
        });
        if removed > 0 {
            self.nodes.clear();
            self.root = self.build_range(&kept);
        }
        removed
    }

    /// All entries in key order; maintenance and test tooling only.
    pub fn entries(&self) -> Vec<Entry<P>> {
        let mut result = Vec::with_capacity(self.nodes.len());
        self.in_order(self.root, &mut |entry| result.push(*entry));
        result
    }

    fn cmp_entries(lhs: &Entry<P>, rhs: &Entry<P>) -> Ordering {
        (lhs.start, lhs.end, lhs.sample_id, lhs.payload).cmp(&(
            rhs.start,
            rhs.end,
            rhs.sample_id,
            rhs.payload,
        ))
    }

    fn find_exact(&self, probe: &Entry<P>) -> Option<u32> {
        let mut cur = self.root;
        while cur != NIL {
            match Self::cmp_entries(probe, &self.nodes[cur as usize].entry) {
                Ordering::Equal => return Some(cur),
                Ordering::Less => cur = self.nodes[cur as usize].left,
                Ordering::Greater => cur = self.nodes[cur as usize].right,
            }
        }
        None
    }

    fn stab_at(&self, at: u32, qs: u32, qe: u32, subset: Option<&SampleSet>) -> u64 {
        if at == NIL {
            return 0;
        }
        let node = &self.nodes[at as usize];
        // Nothing below this node reaches past the query start.
        if node.max_end <= qs {
            return 0;
        }
        let mut sum = self.stab_at(node.left, qs, qe, subset);
        if node.entry.start < qe {
            if node.entry.start < node.entry.end
                && qs < node.entry.end
                && subset.map_or(true, |s| s.contains(node.entry.sample_id))
            {
                sum += u64::from(node.entry.count);
            }
            sum += self.stab_at(node.right, qs, qe, subset);
        }
        sum
    }

    fn exact_at(
        &self,
        at: u32,
        start: u32,
        end: u32,
        payload: P,
        subset: Option<&SampleSet>,
    ) -> u64 {
        if at == NIL {
            return 0;
        }
        let node = &self.nodes[at as usize];
        match start.cmp(&node.entry.start) {
            Ordering::Less => self.exact_at(node.left, start, end, payload, subset),
            Ordering::Greater => self.exact_at(node.right, start, end, payload, subset),
            Ordering::Equal => {
                let mut sum = self.exact_at(node.left, start, end, payload, subset)
                    + self.exact_at(node.right, start, end, payload, subset);
                if node.entry.end == end
                    && node.entry.payload == payload
                    && subset.map_or(true, |s| s.contains(node.entry.sample_id))
                {
                    sum += u64::from(node.entry.count);
                }
                sum
            }
        }
    }

    fn in_order(&self, at: u32, visit: &mut impl FnMut(&Entry<P>)) {
        if at == NIL {
            return;
        }
        let node = &self.nodes[at as usize];
        self.in_order(node.left, visit);
        visit(&node.entry);
        self.in_order(node.right, visit);
    }

    /// Rebuild from entries sorted in key order.
    fn build_range(&mut self, entries: &[Entry<P>]) -> u32 {
        if entries.is_empty() {
            return NIL;
        }
        let mid = entries.len() / 2;
        let left = self.build_range(&entries[..mid]);
        let at = self.nodes.len() as u32;
        self.nodes.push(Node {
            entry: entries[mid],
            max_end: entries[mid].end,
            left,
            right: NIL,
            height: 1,
        });
        let right = self.build_range(&entries[mid + 1..]);
        self.nodes[at as usize].right = right;
        self.update(at);
        at
    }

    fn height(&self, at: u32) -> u8 {
        if at == NIL {
            0
        } else {
            self.nodes[at as usize].height
        }
    }

    fn max_end(&self, at: u32) -> u32 {
        if at == NIL {
            0
        } else {
            self.nodes[at as usize].max_end
        }
    }

    /// Recompute height and `max_end` from the children.
    fn update(&mut self, at: u32) {
        let (left, right) = {
            let node = &self.nodes[at as usize];
            (node.left, node.right)
        };
        let height = 1 + self.height(left).max(self.height(right));
        let max_end = self.nodes[at as usize]
            .entry
            .end
            .max(self.max_end(left))
            .max(self.max_end(right));
        let node = &mut self.nodes[at as usize];
        node.height = height;
        node.max_end = max_end;
    }

    fn balance_factor(&self, at: u32) -> i32 {
        let node = &self.nodes[at as usize];
        i32::from(self.height(node.left)) - i32::from(self.height(node.right))
    }

    fn rotate_left(&mut self, at: u32) -> u32 {
        let pivot = self.nodes[at as usize].right;
        self.nodes[at as usize].right = self.nodes[pivot as usize].left;
        self.nodes[pivot as usize].left = at;
        self.update(at);
        self.update(pivot);
        pivot
    }

    fn rotate_right(&mut self, at: u32) -> u32 {
        let pivot = self.nodes[at as usize].left;
        self.nodes[at as usize].left = self.nodes[pivot as usize].right;
        self.nodes[pivot as usize].right = at;
        self.update(at);
        self.update(pivot);
        pivot
    }

    fn rebalance(&mut self, at: u32) -> u32 {
        self.update(at);
        let factor = self.balance_factor(at);
        if factor > 1 {
            let left = self.nodes[at as usize].left;
            if self.balance_factor(left) < 0 {
                let new_left = self.rotate_left(left);
                self.nodes[at as usize].left = new_left;
            }
            self.rotate_right(at)
        } else if factor < -1 {
            let right = self.nodes[at as usize].right;
            if self.balance_factor(right) > 0 {
                let new_right = self.rotate_right(right);
                self.nodes[at as usize].right = new_right;
            }
            self.rotate_left(at)
        } else {
            at
        }
    }

    /// The caller has established that `new` carries a key not in the tree.
    fn insert_at(&mut self, at: u32, new: u32) -> u32 {
        if at == NIL {
            return new;
        }
        let ord = Self::cmp_entries(
            &self.nodes[new as usize].entry,
            &self.nodes[at as usize].entry,
        );
        if ord == Ordering::Less {
            let left = self.insert_at(self.nodes[at as usize].left, new);
            self.nodes[at as usize].left = left;
        } else {
            let right = self.insert_at(self.nodes[at as usize].right, new);
            self.nodes[at as usize].right = right;
        }
        self.rebalance(at)
    }
}
