//! RankLayout: the allgathered owned ranges of every rank.
//!
//! Discovery needs to answer "who owns global index g" without further
//! communication. Each rank announces its `[begin, end)` once; the gathered
//! table is validated against the tiling invariant and then serves owner
//! lookups by binary search. Ranks may own ranges in any order (rank ids
//! need not ascend with range begins); empty ranges are allowed.

use crate::comm::communicator::Communicator;
use crate::comm::wire::{WireRange, cast_slice, cast_slice_mut};
use crate::debug_invariants::DebugInvariants;
use crate::halo_error::HaloError;
use bytemuck::Zeroable;
use std::ops::Range;

/// Owned ranges of all ranks, gathered once per (re)initialization.
///
/// # Invariants
///
/// - `ranges[r]` is the half-open range announced by rank `r`, with
///   `begin <= end`.
/// - `by_start` holds the non-empty ranges sorted by begin; together they
///   tile `[0, global_size)` exactly (no gap, no overlap).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RankLayout {
    global_size: u64,
    /// Announced `(begin, end)` per rank, indexed by rank id.
    ranges: Vec<(u64, u64)>,
    /// `(begin, end, rank)` sorted by begin, empty ranges excluded.
    by_start: Vec<(u64, u64, usize)>,
}

impl RankLayout {
    /// Collectively gather every rank's owned range and validate the tiling.
    ///
    /// All ranks must call this in the same program order.
    pub fn gather<C>(comm: &C, global_size: u64, local: Range<u64>) -> Result<Self, HaloError>
    where
        C: Communicator,
    {
        let size = comm.size();
        let mine = WireRange::new(local.start, local.end);
        let mut recv = vec![0u8; size * std::mem::size_of::<WireRange>()];
        comm.allgather(cast_slice(std::slice::from_ref(&mine)), &mut recv);
        let mut wire = vec![WireRange::zeroed(); size];
        cast_slice_mut(&mut wire).copy_from_slice(&recv);
        let layout =
            Self::from_ranges(global_size, wire.iter().map(|w| (w.begin(), w.end())).collect())?;
        log::debug!(
            "rank layout: {} ranks tiling [0, {}), local range {:?}",
            size,
            global_size,
            local
        );
        Ok(layout)
    }

    /// Layout of a one-rank group owning all of `[0, global_size)`.
    pub fn serial(global_size: u64) -> Self {
        let by_start = if global_size > 0 {
            vec![(0, global_size, 0)]
        } else {
            Vec::new()
        };
        Self {
            global_size,
            ranges: vec![(0, global_size)],
            by_start,
        }
    }

    /// Build a layout from already-known per-rank ranges.
    pub fn from_ranges(global_size: u64, ranges: Vec<(u64, u64)>) -> Result<Self, HaloError> {
        for (rank, &(b, e)) in ranges.iter().enumerate() {
            if b > e {
                return Err(HaloError::RankLayoutMismatch {
                    reason: format!("rank {rank} announced begin {b} > end {e}"),
                });
            }
        }
        let mut by_start: Vec<(u64, u64, usize)> = ranges
            .iter()
            .enumerate()
            .filter(|&(_, &(b, e))| b < e)
            .map(|(rank, &(b, e))| (b, e, rank))
            .collect();
        by_start.sort_unstable();

        let mut cursor = 0u64;
        for &(b, e, rank) in &by_start {
            if b != cursor {
                let kind = if b > cursor { "gap" } else { "overlap" };
                return Err(HaloError::RankLayoutMismatch {
                    reason: format!(
                        "{kind} at index {b} (rank {rank}): expected next range to start at {cursor}"
                    ),
                });
            }
            cursor = e;
        }
        if cursor != global_size {
            return Err(HaloError::RankLayoutMismatch {
                reason: format!("ranges cover [0, {cursor}) but global size is {global_size}"),
            });
        }

        Ok(Self {
            global_size,
            ranges,
            by_start,
        })
    }

    #[inline]
    pub fn global_size(&self) -> u64 {
        self.global_size
    }

    #[inline]
    pub fn n_ranks(&self) -> usize {
        self.ranges.len()
    }

    /// The range announced by `rank`.
    #[inline]
    pub fn range_of(&self, rank: usize) -> Range<u64> {
        let (b, e) = self.ranges[rank];
        b..e
    }

    /// The rank owning global index `g`, or `None` when `g` lies outside
    /// `[0, global_size)`.
    pub fn owner_of(&self, g: u64) -> Option<usize> {
        let i = self.by_start.partition_point(|&(_, e, _)| e <= g);
        match self.by_start.get(i) {
            Some(&(b, _, rank)) if b <= g => Some(rank),
            _ => None,
        }
    }
}

impl DebugInvariants for RankLayout {
    fn debug_assert_invariants(&self) {
        crate::halo_debug_assert_ok!(self.validate_invariants(), "RankLayout invalid");
    }

    fn validate_invariants(&self) -> Result<(), HaloError> {
        // reconstructing from the announced ranges re-runs every check
        let rebuilt = Self::from_ranges(self.global_size, self.ranges.clone())?;
        if rebuilt.by_start != self.by_start {
            return Err(HaloError::RankLayoutMismatch {
                reason: "cached owner table disagrees with announced ranges".into(),
            });
        }
        Ok(())
    }
}
