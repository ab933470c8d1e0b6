//! IndexSet: sorted, duplicate-free sets of global indices.
//!
//! An `IndexSet` describes a subset of the global index universe
//! `[0, size)` as a list of coalesced half-open ranges. It is the currency
//! for describing owned ranges and ghost index sets: insertion order is
//! irrelevant, overlapping or adjacent insertions merge on the fly, and the
//! element order observed through iteration and position queries is always
//! ascending.

use crate::debug_invariants::DebugInvariants;
use crate::halo_error::HaloError;
use std::ops::Range;

/// A set of `u64` indices within a fixed universe `[0, size)`.
///
/// # Invariants
///
/// - `ranges` is sorted by `begin`, every range is non-empty, and
///   consecutive ranges neither overlap nor touch (fully coalesced).
/// - Every range lies within `[0, size)`.
/// - `n_elements` equals the sum of all range lengths.
///
/// These invariants are checked after mutations in debug builds and when
/// the `check-invariants` feature is enabled; equality derives on the
/// canonical range table, so two sets compare equal iff they contain the
/// same indices under the same universe size.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexSet {
    /// Universe bound; elements must be `< size`.
    size: u64,
    /// Coalesced half-open `(begin, end)` ranges, ascending.
    ranges: Vec<(u64, u64)>,
    /// Cached element count.
    n_elements: u64,
}

impl IndexSet {
    /// Create an empty set over the universe `[0, size)`.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            ranges: Vec::new(),
            n_elements: 0,
        }
    }

    /// Create the set holding every index of `[0, size)`.
    pub fn complete(size: u64) -> Self {
        let ranges = if size > 0 { vec![(0, size)] } else { Vec::new() };
        Self {
            size,
            ranges,
            n_elements: size,
        }
    }

    /// Create a set over `[0, size)` containing exactly `range`.
    pub fn from_range(size: u64, range: Range<u64>) -> Result<Self, HaloError> {
        let mut set = Self::new(size);
        set.add_range(range.start, range.end)?;
        Ok(set)
    }

    /// Universe bound (not the element count).
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of indices contained in the set.
    #[inline]
    pub fn n_elements(&self) -> u64 {
        self.n_elements
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of coalesced ranges.
    #[inline]
    pub fn n_ranges(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the set is empty or a single run of consecutive indices.
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.ranges.len() <= 1
    }

    /// The single `[begin, end)` run of a contiguous set.
    ///
    /// Returns `Some(0..0)` for an empty set and `None` when the set has
    /// more than one run.
    pub fn contiguous_range(&self) -> Option<Range<u64>> {
        match self.ranges.len() {
            0 => Some(0..0),
            1 => {
                let (b, e) = self.ranges[0];
                Some(b..e)
            }
            _ => None,
        }
    }

    /// Insert the half-open range `[begin, end)`.
    ///
    /// Overlapping or adjacent ranges coalesce. Empty ranges are no-ops.
    ///
    /// # Errors
    /// `InvalidIndexRange` if `begin > end`; `IndexSetOutOfBounds` if the
    /// range extends past the universe bound.
    pub fn add_range(&mut self, begin: u64, end: u64) -> Result<(), HaloError> {
        if begin > end {
            return Err(HaloError::InvalidIndexRange { begin, end });
        }
        if end > self.size {
            return Err(HaloError::IndexSetOutOfBounds {
                index: end,
                size: self.size,
            });
        }
        if begin == end {
            return Ok(());
        }
        // Ranges touching [begin, end): first with range_end >= begin up to
        // (exclusive) first with range_begin > end. Adjacency merges too.
        let lo = self.ranges.partition_point(|&(_, e)| e < begin);
        let hi = self.ranges.partition_point(|&(b, _)| b <= end);
        let merged = if lo < hi {
            (
                self.ranges[lo].0.min(begin),
                self.ranges[hi - 1].1.max(end),
            )
        } else {
            (begin, end)
        };
        self.ranges.splice(lo..hi, std::iter::once(merged));
        self.recount();
        self.debug_assert_invariants();
        Ok(())
    }

    /// Insert a single index.
    pub fn add_index(&mut self, index: u64) -> Result<(), HaloError> {
        if index >= self.size {
            return Err(HaloError::IndexSetOutOfBounds {
                index,
                size: self.size,
            });
        }
        self.add_range(index, index + 1)
    }

    /// Insert every index yielded by `indices`, in any order.
    pub fn add_indices<I>(&mut self, indices: I) -> Result<(), HaloError>
    where
        I: IntoIterator<Item = u64>,
    {
        for index in indices {
            self.add_index(index)?;
        }
        Ok(())
    }

    /// Merge every element of `other` into `self`.
    ///
    /// # Errors
    /// `IndexSetSizeMismatch` when the universe sizes differ.
    pub fn union_with(&mut self, other: &IndexSet) -> Result<(), HaloError> {
        if self.size != other.size {
            return Err(HaloError::IndexSetSizeMismatch {
                left: self.size,
                right: other.size,
            });
        }
        for &(b, e) in &other.ranges {
            self.add_range(b, e)?;
        }
        Ok(())
    }

    /// Membership test, `O(log n_ranges)`.
    #[inline]
    pub fn is_element(&self, index: u64) -> bool {
        let i = self.ranges.partition_point(|&(_, e)| e <= index);
        matches!(self.ranges.get(i), Some(&(b, _)) if b <= index)
    }

    /// Position of `index` within the ascending element order, or `None`
    /// when `index` is not an element.
    ///
    /// Costs `O(n_ranges)` for the preceding-length sum; sets produced by
    /// halo construction have few ranges.
    pub fn index_within_set(&self, index: u64) -> Option<u64> {
        let i = self.ranges.partition_point(|&(_, e)| e <= index);
        let &(b, _) = self.ranges.get(i)?;
        if index < b {
            return None;
        }
        let preceding: u64 = self.ranges[..i].iter().map(|&(rb, re)| re - rb).sum();
        Some(preceding + (index - b))
    }

    /// The `n`-th element in ascending order, or `None` when
    /// `n >= n_elements()`. Inverse of [`index_within_set`](Self::index_within_set).
    pub fn nth_index_in_set(&self, n: u64) -> Option<u64> {
        let mut acc = 0u64;
        for &(b, e) in &self.ranges {
            let len = e - b;
            if n < acc + len {
                return Some(b + (n - acc));
            }
            acc += len;
        }
        None
    }

    /// Iterate the coalesced ranges in ascending order.
    pub fn ranges(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.ranges.iter().map(|&(b, e)| b..e)
    }

    /// Iterate every element in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|&(b, e)| b..e)
    }

    /// Whether every element of `self` is an element of `other`.
    pub fn is_subset_of(&self, other: &IndexSet) -> bool {
        let mut j = 0;
        for &(b, e) in &self.ranges {
            while j < other.ranges.len() && other.ranges[j].1 < e {
                j += 1;
            }
            match other.ranges.get(j) {
                Some(&(ob, _)) if ob <= b => {}
                _ => return false,
            }
        }
        true
    }

    /// Whether `self` and `other` share no element.
    pub fn is_disjoint_from(&self, other: &IndexSet) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (ab, ae) = self.ranges[i];
            let (bb, be) = other.ranges[j];
            if ae <= bb {
                i += 1;
            } else if be <= ab {
                j += 1;
            } else {
                return false;
            }
        }
        true
    }

    fn recount(&mut self) {
        self.n_elements = self.ranges.iter().map(|&(b, e)| e - b).sum();
    }
}

impl DebugInvariants for IndexSet {
    fn debug_assert_invariants(&self) {
        crate::halo_debug_assert_ok!(self.validate_invariants(), "IndexSet invalid");
    }

    fn validate_invariants(&self) -> Result<(), HaloError> {
        let mut prev_end: Option<u64> = None;
        let mut sum = 0u64;
        for &(b, e) in &self.ranges {
            if b >= e {
                return Err(HaloError::InvalidIndexRange { begin: b, end: e });
            }
            if e > self.size {
                return Err(HaloError::IndexSetOutOfBounds {
                    index: e,
                    size: self.size,
                });
            }
            if let Some(pe) = prev_end {
                // strict inequality: touching ranges must have coalesced
                if pe >= b {
                    return Err(HaloError::IndexSetCorrupt {
                        detail: format!("ranges not coalesced around {pe}..{b}"),
                    });
                }
            }
            prev_end = Some(e);
            sum += e - b;
        }
        if sum != self.n_elements {
            return Err(HaloError::IndexSetCorrupt {
                detail: format!("cached count {} but ranges hold {sum}", self.n_elements),
            });
        }
        Ok(())
    }
}
