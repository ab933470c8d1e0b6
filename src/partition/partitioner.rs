//! The partitioner: one rank's view of a globally partitioned index space.
//!
//! Each rank owns a contiguous range `[lower, upper)` of the global index
//! space `[0, global_size)` and may read a sorted set of non-owned ghost
//! indices. Local storage is laid out owned-first: local slots
//! `[0, local_size)` are the owned range in order, slots
//! `[local_size, local_size + n_ghost)` are the ghosts in ascending global
//! order. Installing ghosts runs the collective target discovery once; the
//! resulting [`GhostPlan`] then drives any number of export/import epochs
//! (see `partition::exchange`).

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::comm::communicator::{CommTag, Communicator, ExchangeTags, NoComm, MAX_TAG_BASE};
use crate::debug_invariants::DebugInvariants;
use crate::halo_error::HaloError;
use crate::index_set::IndexSet;
use crate::partition::ghost_plan::GhostPlan;
use crate::partition::rank_layout::RankLayout;
use crate::partition::DEFAULT_TAG_BASE;

/// One rank's slice of a distributed index space plus its exchange tables.
///
/// # Invariants
///
/// - `owned` is contiguous, lies within `[0, global_size)`, and the owned
///   ranges of all ranks tile the global space exactly.
/// - `ghost_set` is disjoint from `owned`; its elements fill local slots
///   `[local_size, local_size + n_ghost)` in ascending global order.
/// - `plan` is always consistent with `ghost_set`; ghost (re)installation
///   replaces it wholesale, never piecewise.
pub struct Partitioner<C: Communicator = NoComm> {
    pub(crate) comm: Arc<C>,
    pub(crate) tags: ExchangeTags,
    pub(crate) global_size: u64,
    pub(crate) owned: Range<u64>,
    pub(crate) local_size: usize,
    owned_set: IndexSet,
    ghost_set: IndexSet,
    pub(crate) n_ghost: usize,
    layout: RankLayout,
    pub(crate) plan: GhostPlan,
    ghosts_installed: bool,
}

impl Partitioner<NoComm> {
    /// A one-rank partitioner owning all of `[0, global_size)`, no ghosts.
    pub fn new_serial(global_size: u64) -> Self {
        Self {
            comm: Arc::new(NoComm),
            tags: ExchangeTags::from_base(DEFAULT_TAG_BASE),
            global_size,
            owned: 0..global_size,
            local_size: global_size as usize,
            owned_set: IndexSet::complete(global_size),
            ghost_set: IndexSet::new(global_size),
            n_ghost: 0,
            layout: RankLayout::serial(global_size),
            plan: GhostPlan::empty(),
            ghosts_installed: false,
        }
    }
}

impl Default for Partitioner<NoComm> {
    fn default() -> Self {
        Self::new_serial(0)
    }
}

impl<C: Communicator> Partitioner<C> {
    /// Collective constructor from this rank's owned indices.
    ///
    /// `owned` must be contiguous (or empty) and its universe size is the
    /// global size; the per-rank ranges are allgathered and validated to
    /// tile `[0, global_size)`. No ghosts yet; install them with
    /// [`set_ghost_indices`](Self::set_ghost_indices).
    pub fn from_owned(owned: IndexSet, comm: Arc<C>) -> Result<Self, HaloError> {
        Self::from_owned_with_tags(owned, comm, DEFAULT_TAG_BASE)
    }

    /// Like [`from_owned`](Self::from_owned) with an explicit base tag, so
    /// several partitioners can discover and exchange over one transport
    /// without message cross-talk.
    pub fn from_owned_with_tags(
        owned: IndexSet,
        comm: Arc<C>,
        tag_base: CommTag,
    ) -> Result<Self, HaloError> {
        if tag_base.base() > MAX_TAG_BASE {
            return Err(HaloError::TagBaseOutOfRange {
                base: tag_base.base(),
                max: MAX_TAG_BASE,
            });
        }
        let global_size = owned.size();
        let range = owned
            .contiguous_range()
            .ok_or(HaloError::OwnedNotContiguous)?;
        let len = range.end - range.start;
        if len > u64::from(u32::MAX) {
            return Err(HaloError::RankLayoutMismatch {
                reason: format!(
                    "local range [{}, {}) holds {len} indices, beyond the u32 count bound",
                    range.start, range.end
                ),
            });
        }
        let layout = RankLayout::gather(comm.as_ref(), global_size, range.clone())?;
        let partitioner = Self {
            comm,
            tags: ExchangeTags::from_base(tag_base),
            global_size,
            owned: range,
            local_size: len as usize,
            owned_set: owned,
            ghost_set: IndexSet::new(global_size),
            n_ghost: 0,
            layout,
            plan: GhostPlan::empty(),
            ghosts_installed: false,
        };
        partitioner.debug_assert_invariants();
        Ok(partitioner)
    }

    /// Collective constructor with ghosts installed in one go.
    pub fn from_owned_and_ghosts(
        owned: IndexSet,
        ghosts: IndexSet,
        comm: Arc<C>,
    ) -> Result<Self, HaloError> {
        let mut partitioner = Self::from_owned(owned, comm)?;
        partitioner.set_ghost_indices(ghosts, None)?;
        Ok(partitioner)
    }

    /// Rebuild this partitioner for a new layout, collectively.
    ///
    /// Builds the replacement completely before swapping it in, so a failed
    /// rebuild leaves `self` untouched.
    pub fn reinit(&mut self, owned: IndexSet, ghosts: IndexSet) -> Result<(), HaloError> {
        // tags.counts carries the base tag
        let mut fresh = Self::from_owned_with_tags(owned, Arc::clone(&self.comm), self.tags.counts)?;
        fresh.set_ghost_indices(ghosts, None)?;
        *self = fresh;
        Ok(())
    }

    /// Install (or replace) this rank's ghost indices and run target
    /// discovery. Collective; every rank of the group must call in the same
    /// program order.
    ///
    /// With `larger` given, `ghosts` must be a subset of it and `larger`
    /// itself must avoid the owned range; ghost slots then map into the
    /// larger set's positions so one discovery can serve exchange buffers
    /// sized for the superset.
    pub fn set_ghost_indices(
        &mut self,
        ghosts: IndexSet,
        larger: Option<&IndexSet>,
    ) -> Result<(), HaloError> {
        if ghosts.size() != self.global_size {
            return Err(HaloError::IndexSetSizeMismatch {
                left: ghosts.size(),
                right: self.global_size,
            });
        }
        if let Some(index) = ghosts.iter().find(|&g| self.owned.contains(&g)) {
            return Err(HaloError::GhostInOwnedRange { index });
        }
        if let Some(larger_set) = larger {
            if larger_set.size() != self.global_size {
                return Err(HaloError::IndexSetSizeMismatch {
                    left: larger_set.size(),
                    right: self.global_size,
                });
            }
            if let Some(index) = ghosts.iter().find(|&g| !larger_set.is_element(g)) {
                return Err(HaloError::GhostNotInLargerSet { index });
            }
            if let Some(index) = larger_set.iter().find(|&g| self.owned.contains(&g)) {
                return Err(HaloError::GhostInOwnedRange { index });
            }
        }

        let n_ghost = ghosts.n_elements() as usize;
        // collective OR: do ghosts exist anywhere in the group?
        let mine = [u8::from(n_ghost > 0)];
        let mut flags = vec![0u8; self.comm.size()];
        self.comm.allgather(&mine, &mut flags);
        let installed = flags.iter().any(|&f| f != 0);

        let plan = GhostPlan::build(
            self.comm.as_ref(),
            &self.tags,
            &self.layout,
            self.owned.clone(),
            &ghosts,
            larger,
        )?;

        self.ghost_set = ghosts;
        self.n_ghost = n_ghost;
        self.plan = plan;
        self.ghosts_installed = installed;
        self.debug_assert_invariants();
        Ok(())
    }

    /// Translate a global index to its local slot.
    pub fn global_to_local(&self, index: u64) -> Result<usize, HaloError> {
        if self.owned.contains(&index) {
            return Ok((index - self.owned.start) as usize);
        }
        match self.ghost_set.index_within_set(index) {
            Some(pos) => Ok(self.local_size + pos as usize),
            None => Err(HaloError::IndexNotPresent {
                index,
                rank: self.comm.rank(),
            }),
        }
    }

    /// Translate a local slot back to its global index.
    pub fn local_to_global(&self, local: usize) -> Result<u64, HaloError> {
        if local < self.local_size {
            return Ok(self.owned.start + local as u64);
        }
        self.ghost_set
            .nth_index_in_set((local - self.local_size) as u64)
            .ok_or(HaloError::LocalIndexOutOfRange {
                index: local,
                len: self.local_size + self.n_ghost,
            })
    }

    /// Whether this rank owns `index`.
    #[inline]
    pub fn in_local_range(&self, index: u64) -> bool {
        self.owned.contains(&index)
    }

    /// Whether `index` occupies a ghost slot on this rank. Owned indices are
    /// never ghost entries.
    #[inline]
    pub fn is_ghost_entry(&self, index: u64) -> bool {
        !self.in_local_range(index) && self.ghost_set.is_element(index)
    }

    /// Structural equality of the local layout: same global size, same
    /// owned range, identical ghost set. Local, never errors.
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.global_size == other.global_size
            && self.owned == other.owned
            && self.ghost_set == other.ghost_set
    }

    /// Collective AND of [`is_compatible`](Self::is_compatible) over the
    /// whole group.
    pub fn is_globally_compatible(&self, other: &Self) -> bool {
        let mine = [u8::from(self.is_compatible(other))];
        let mut flags = vec![0u8; self.comm.size()];
        self.comm.allgather(&mine, &mut flags);
        flags.iter().all(|&f| f != 0)
    }

    /// Global length of the partitioned index space.
    #[inline]
    pub fn size(&self) -> u64 {
        self.global_size
    }

    /// Number of owned indices on this rank.
    #[inline]
    pub fn local_size(&self) -> usize {
        self.local_size
    }

    /// The owned range `[lower, upper)`.
    #[inline]
    pub fn local_range(&self) -> Range<u64> {
        self.owned.clone()
    }

    /// The owned indices as a set.
    #[inline]
    pub fn locally_owned_range(&self) -> &IndexSet {
        &self.owned_set
    }

    /// The installed ghost indices.
    #[inline]
    pub fn ghost_indices(&self) -> &IndexSet {
        &self.ghost_set
    }

    #[inline]
    pub fn n_ghost_indices(&self) -> usize {
        self.n_ghost
    }

    /// Ghost count of the larger set the ghosts were declared a subset of
    /// (equals [`n_ghost_indices`](Self::n_ghost_indices) without one).
    #[inline]
    pub fn n_ghost_indices_in_larger_set(&self) -> usize {
        self.plan.n_ghost_in_larger_set()
    }

    /// `(rank, count)` partition of the ghost slots by owning rank.
    #[inline]
    pub fn ghost_targets(&self) -> &[(usize, usize)] {
        self.plan.ghost_targets()
    }

    /// Half-open runs of owned local indices other ranks read.
    #[inline]
    pub fn import_indices(&self) -> &[(usize, usize)] {
        self.plan.import_indices()
    }

    #[inline]
    pub fn n_import_indices(&self) -> usize {
        self.plan.n_import_indices()
    }

    /// `(rank, count)` of ranks that ghost indices this rank owns.
    #[inline]
    pub fn import_targets(&self) -> &[(usize, usize)] {
        self.plan.import_targets()
    }

    #[inline]
    pub fn import_indices_chunks_by_rank(&self) -> &[usize] {
        self.plan.import_indices_chunks_by_rank()
    }

    /// Runs of ghost positions within the larger ghost set.
    #[inline]
    pub fn ghost_indices_within_larger_ghost_set(&self) -> &[(usize, usize)] {
        self.plan.ghost_subset_ranges()
    }

    #[inline]
    pub fn ghost_indices_subset_chunks_by_rank(&self) -> &[usize] {
        self.plan.ghost_subset_chunks_by_rank()
    }

    /// Whether any rank of the group has installed ghost indices. Known
    /// collectively after [`set_ghost_indices`](Self::set_ghost_indices).
    #[inline]
    pub fn ghost_indices_initialized(&self) -> bool {
        self.ghosts_installed
    }

    #[inline]
    pub fn this_rank(&self) -> usize {
        self.comm.rank()
    }

    #[inline]
    pub fn num_ranks(&self) -> usize {
        self.comm.size()
    }

    #[inline]
    pub fn communicator(&self) -> &Arc<C> {
        &self.comm
    }

    /// The full table snapshot of the current ghost installation.
    #[inline]
    pub fn plan(&self) -> &GhostPlan {
        &self.plan
    }

    /// The allgathered per-rank owned ranges.
    #[inline]
    pub fn rank_layout(&self) -> &RankLayout {
        &self.layout
    }
}

impl<C: Communicator> Clone for Partitioner<C> {
    fn clone(&self) -> Self {
        Self {
            comm: Arc::clone(&self.comm),
            tags: self.tags,
            global_size: self.global_size,
            owned: self.owned.clone(),
            local_size: self.local_size,
            owned_set: self.owned_set.clone(),
            ghost_set: self.ghost_set.clone(),
            n_ghost: self.n_ghost,
            layout: self.layout.clone(),
            plan: self.plan.clone(),
            ghosts_installed: self.ghosts_installed,
        }
    }
}

impl<C: Communicator> fmt::Debug for Partitioner<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partitioner")
            .field("rank", &self.comm.rank())
            .field("num_ranks", &self.comm.size())
            .field("global_size", &self.global_size)
            .field("owned", &self.owned)
            .field("n_ghost", &self.n_ghost)
            .field("ghosts_installed", &self.ghosts_installed)
            .finish_non_exhaustive()
    }
}

impl<C: Communicator> DebugInvariants for Partitioner<C> {
    fn debug_assert_invariants(&self) {
        crate::halo_debug_assert_ok!(self.validate_invariants(), "Partitioner invalid");
    }

    fn validate_invariants(&self) -> Result<(), HaloError> {
        if self.owned.start > self.owned.end || self.owned.end > self.global_size {
            return Err(HaloError::InvalidIndexRange {
                begin: self.owned.start,
                end: self.owned.end,
            });
        }
        if (self.owned.end - self.owned.start) as usize != self.local_size {
            return Err(HaloError::PlanCorrupt {
                detail: format!(
                    "local_size {} disagrees with owned range [{}, {})",
                    self.local_size, self.owned.start, self.owned.end
                ),
            });
        }
        if self.owned_set.n_elements() != self.local_size as u64 {
            return Err(HaloError::PlanCorrupt {
                detail: format!(
                    "owned set holds {} elements, local_size is {}",
                    self.owned_set.n_elements(),
                    self.local_size
                ),
            });
        }
        if self.ghost_set.size() != self.global_size {
            return Err(HaloError::IndexSetSizeMismatch {
                left: self.ghost_set.size(),
                right: self.global_size,
            });
        }
        if let Some(index) = self.ghost_set.iter().find(|&g| self.owned.contains(&g)) {
            return Err(HaloError::GhostInOwnedRange { index });
        }
        if self.ghost_set.n_elements() as usize != self.n_ghost
            || self.plan.n_ghost() != self.n_ghost
        {
            return Err(HaloError::PlanCorrupt {
                detail: format!(
                    "ghost counts disagree: set {}, cached {}, plan {}",
                    self.ghost_set.n_elements(),
                    self.n_ghost,
                    self.plan.n_ghost()
                ),
            });
        }
        self.layout.validate_invariants()?;
        self.plan.validate_invariants()
    }
}
