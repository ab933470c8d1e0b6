//! GhostPlan: the derived exchange tables, built by target discovery.
//!
//! Everything the exchange epochs touch is precomputed here: which ranks
//! supply our ghosts, which ranks want our owned values and at which local
//! offsets, and how ghost slots map into a larger ghost superset when one
//! is active. The plan is an immutable snapshot; ghost (re)installation
//! builds a complete new plan and swaps it in one assignment, so a failed
//! rebuild leaves the previous tables untouched.

use crate::comm::communicator::{Communicator, ExchangeTags};
use crate::comm::neighbor_exchange::{exchange_counts_symmetric, exchange_index_lists};
use crate::debug_invariants::DebugInvariants;
use crate::halo_error::HaloError;
use crate::index_set::IndexSet;
use crate::partition::rank_layout::RankLayout;
use std::ops::Range;

/// Derived exchange tables for one ghost installation.
///
/// # Invariants
///
/// - `ghost_targets` counts sum to `n_ghost`; each target appears once, in
///   first-encountered order while scanning ghosts ascending.
/// - `import_targets` counts sum to `n_import_indices`, ascending by rank;
///   the run lengths of `import_indices` sum to the same total.
/// - Both `*_chunks_by_rank` tables are monotone prefixes of length
///   `targets.len() + 1` into their range tables.
/// - `ghost_subset_ranges` lengths sum to `n_ghost` and its positions lie
///   within `[0, n_ghost_in_larger_set)`, split at ghost-target boundaries.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GhostPlan {
    /// `(rank, count)` partition of the ghost slots by owning rank.
    ghost_targets: Vec<(usize, usize)>,
    /// Half-open runs of owned local indices to send out, grouped per
    /// import target.
    import_indices: Vec<(usize, usize)>,
    n_import_indices: usize,
    /// `(rank, count)` of ranks that ghost indices we own.
    import_targets: Vec<(usize, usize)>,
    /// Prefix offsets into `import_indices`, one slot per import target
    /// plus the trailing total.
    import_indices_chunks_by_rank: Vec<usize>,
    /// Runs of ghost positions within the larger ghost set (identity
    /// partition when no superset is active).
    ghost_subset_ranges: Vec<(usize, usize)>,
    /// Prefix offsets into `ghost_subset_ranges` per ghost target.
    ghost_subset_chunks_by_rank: Vec<usize>,
    n_ghost: usize,
    n_ghost_in_larger_set: usize,
}

impl GhostPlan {
    /// The plan of a partitioner without installed ghosts.
    pub(crate) fn empty() -> Self {
        Self {
            ghost_targets: Vec::new(),
            import_indices: Vec::new(),
            n_import_indices: 0,
            import_targets: Vec::new(),
            import_indices_chunks_by_rank: vec![0],
            ghost_subset_ranges: Vec::new(),
            ghost_subset_chunks_by_rank: vec![0],
            n_ghost: 0,
            n_ghost_in_larger_set: 0,
        }
    }

    /// Run target discovery and build the full table snapshot.
    ///
    /// Collective: every rank of the group must call with its own ghosts in
    /// the same program order. The caller has already validated that
    /// `ghosts` is disjoint from the owned range and, when `larger` is
    /// given, contained in it.
    pub(crate) fn build<C>(
        comm: &C,
        tags: &ExchangeTags,
        layout: &RankLayout,
        owned: Range<u64>,
        ghosts: &IndexSet,
        larger: Option<&IndexSet>,
    ) -> Result<Self, HaloError>
    where
        C: Communicator,
    {
        let size = comm.size();
        let me = comm.rank();
        let n_ghost = ghosts.n_elements() as usize;

        if size < 2 {
            // a single rank owns everything; ghosts have nowhere to come from
            if n_ghost > 0 {
                return Err(HaloError::RankLayoutMismatch {
                    reason: "non-empty ghost set in a single-rank group".into(),
                });
            }
            return Ok(Self::empty());
        }

        // Step 1: group ghosts into per-owner runs, ascending by global
        // index. Each owner holds one contiguous range, so every target
        // shows up exactly once.
        let mut ghost_targets: Vec<(usize, usize)> = Vec::new();
        for r in ghosts.ranges() {
            let mut g = r.start;
            while g < r.end {
                let owner = layout.owner_of(g).ok_or(HaloError::GhostOutOfRange {
                    index: g,
                    global_size: layout.global_size(),
                })?;
                let run_end = r.end.min(layout.range_of(owner).end);
                let count = (run_end - g) as usize;
                match ghost_targets.last_mut() {
                    Some((last, c)) if *last == owner => *c += count,
                    _ => ghost_targets.push((owner, count)),
                }
                g = run_end;
            }
        }

        // Step 2a: tell every rank how many of its indices we want.
        let mut send_counts = vec![0usize; size];
        for &(rank, count) in &ghost_targets {
            send_counts[rank] += count;
        }
        let recv_counts = exchange_counts_symmetric(comm, tags.counts, &send_counts)?;

        // Step 2b: ship the wanted-index lists; receive the request lists
        // of every rank that wants something from us, ascending by rank.
        let mut outgoing: Vec<(usize, Vec<u64>)> = Vec::with_capacity(ghost_targets.len());
        let mut ghost_iter = ghosts.iter();
        for &(rank, count) in &ghost_targets {
            let list: Vec<u64> = ghost_iter.by_ref().take(count).collect();
            outgoing.push((rank, list));
        }
        let incoming: Vec<(usize, usize)> = (0..size)
            .filter(|&p| p != me && recv_counts[p] > 0)
            .map(|p| (p, recv_counts[p]))
            .collect();
        let request_lists = exchange_index_lists(comm, tags.payload, &outgoing, &incoming)?;

        // Step 2c: convert each request list to owned local offsets and
        // compress consecutive indices into runs.
        let mut import_indices: Vec<(usize, usize)> = Vec::new();
        let mut import_targets: Vec<(usize, usize)> = Vec::new();
        let mut import_indices_chunks_by_rank = vec![0usize];
        let mut n_import_indices = 0usize;
        for (peer, list) in request_lists {
            let count = list.len();
            let mut run: Option<(usize, usize)> = None;
            for g in list {
                if g < owned.start || g >= owned.end {
                    return Err(HaloError::ImportNotOwned {
                        index: g,
                        requester: peer,
                    });
                }
                let l = (g - owned.start) as usize;
                match run.as_mut() {
                    Some((_, e)) if *e == l => *e += 1,
                    _ => {
                        if let Some(done) = run.take() {
                            import_indices.push(done);
                        }
                        run = Some((l, l + 1));
                    }
                }
            }
            if let Some(done) = run {
                import_indices.push(done);
            }
            n_import_indices += count;
            import_targets.push((peer, count));
            import_indices_chunks_by_rank.push(import_indices.len());
        }

        // Step 3: positions of our ghosts within the larger ghost set,
        // split at target boundaries so each target's chunk is addressable.
        let mut ghost_subset_ranges: Vec<(usize, usize)> = Vec::new();
        let mut ghost_subset_chunks_by_rank = vec![0usize];
        let n_ghost_in_larger_set = match larger {
            Some(larger_set) => {
                let mut ghost_iter = ghosts.iter();
                for &(_, count) in &ghost_targets {
                    let mut run: Option<(usize, usize)> = None;
                    for g in ghost_iter.by_ref().take(count) {
                        let pos = larger_set
                            .index_within_set(g)
                            .ok_or(HaloError::GhostNotInLargerSet { index: g })?
                            as usize;
                        match run.as_mut() {
                            Some((_, e)) if *e == pos => *e += 1,
                            _ => {
                                if let Some(done) = run.take() {
                                    ghost_subset_ranges.push(done);
                                }
                                run = Some((pos, pos + 1));
                            }
                        }
                    }
                    if let Some(done) = run {
                        ghost_subset_ranges.push(done);
                    }
                    ghost_subset_chunks_by_rank.push(ghost_subset_ranges.len());
                }
                larger_set.n_elements() as usize
            }
            None => {
                let mut offset = 0usize;
                for &(_, count) in &ghost_targets {
                    ghost_subset_ranges.push((offset, offset + count));
                    offset += count;
                    ghost_subset_chunks_by_rank.push(ghost_subset_ranges.len());
                }
                n_ghost
            }
        };

        let plan = Self {
            ghost_targets,
            import_indices,
            n_import_indices,
            import_targets,
            import_indices_chunks_by_rank,
            ghost_subset_ranges,
            ghost_subset_chunks_by_rank,
            n_ghost,
            n_ghost_in_larger_set,
        };
        plan.debug_assert_invariants();
        log::debug!(
            "ghost plan on rank {me}: {} ghosts from {} targets, {} owned indices exported to {} targets",
            plan.n_ghost,
            plan.ghost_targets.len(),
            plan.n_import_indices,
            plan.import_targets.len()
        );
        Ok(plan)
    }

    #[inline]
    pub fn ghost_targets(&self) -> &[(usize, usize)] {
        &self.ghost_targets
    }

    #[inline]
    pub fn import_indices(&self) -> &[(usize, usize)] {
        &self.import_indices
    }

    #[inline]
    pub fn n_import_indices(&self) -> usize {
        self.n_import_indices
    }

    #[inline]
    pub fn import_targets(&self) -> &[(usize, usize)] {
        &self.import_targets
    }

    #[inline]
    pub fn import_indices_chunks_by_rank(&self) -> &[usize] {
        &self.import_indices_chunks_by_rank
    }

    #[inline]
    pub fn ghost_subset_ranges(&self) -> &[(usize, usize)] {
        &self.ghost_subset_ranges
    }

    #[inline]
    pub fn ghost_subset_chunks_by_rank(&self) -> &[usize] {
        &self.ghost_subset_chunks_by_rank
    }

    #[inline]
    pub fn n_ghost(&self) -> usize {
        self.n_ghost
    }

    #[inline]
    pub fn n_ghost_in_larger_set(&self) -> usize {
        self.n_ghost_in_larger_set
    }
}

impl Default for GhostPlan {
    fn default() -> Self {
        Self::empty()
    }
}

impl DebugInvariants for GhostPlan {
    fn debug_assert_invariants(&self) {
        crate::halo_debug_assert_ok!(self.validate_invariants(), "GhostPlan invalid");
    }

    fn validate_invariants(&self) -> Result<(), HaloError> {
        let ghost_sum: usize = self.ghost_targets.iter().map(|&(_, c)| c).sum();
        if ghost_sum != self.n_ghost {
            return Err(HaloError::PlanCorrupt {
                detail: format!("ghost target counts sum to {ghost_sum}, not {}", self.n_ghost),
            });
        }
        let import_sum: usize = self.import_targets.iter().map(|&(_, c)| c).sum();
        if import_sum != self.n_import_indices {
            return Err(HaloError::PlanCorrupt {
                detail: format!(
                    "import target counts sum to {import_sum}, not {}",
                    self.n_import_indices
                ),
            });
        }
        let run_sum: usize = self.import_indices.iter().map(|&(b, e)| e - b).sum();
        if run_sum != self.n_import_indices {
            return Err(HaloError::PlanCorrupt {
                detail: format!(
                    "import run lengths sum to {run_sum}, not {}",
                    self.n_import_indices
                ),
            });
        }
        check_prefix(
            &self.import_indices_chunks_by_rank,
            self.import_targets.len(),
            self.import_indices.len(),
            "import_indices_chunks_by_rank",
        )?;
        check_prefix(
            &self.ghost_subset_chunks_by_rank,
            self.ghost_targets.len(),
            self.ghost_subset_ranges.len(),
            "ghost_subset_chunks_by_rank",
        )?;
        let subset_sum: usize = self.ghost_subset_ranges.iter().map(|&(b, e)| e - b).sum();
        if subset_sum != self.n_ghost {
            return Err(HaloError::PlanCorrupt {
                detail: format!("subset range lengths sum to {subset_sum}, not {}", self.n_ghost),
            });
        }
        if self.n_ghost_in_larger_set < self.n_ghost {
            return Err(HaloError::PlanCorrupt {
                detail: format!(
                    "larger ghost set holds {} slots, fewer than {} ghosts",
                    self.n_ghost_in_larger_set, self.n_ghost
                ),
            });
        }
        for &(b, e) in self.import_indices.iter().chain(&self.ghost_subset_ranges) {
            if b >= e {
                return Err(HaloError::PlanCorrupt {
                    detail: format!("empty or reversed run ({b}, {e})"),
                });
            }
        }
        if let Some(&(_, e)) = self.ghost_subset_ranges.last() {
            if e > self.n_ghost_in_larger_set {
                return Err(HaloError::PlanCorrupt {
                    detail: format!(
                        "subset position {e} exceeds larger set bound {}",
                        self.n_ghost_in_larger_set
                    ),
                });
            }
        }
        Ok(())
    }
}

fn check_prefix(
    prefix: &[usize],
    n_targets: usize,
    table_len: usize,
    what: &str,
) -> Result<(), HaloError> {
    if prefix.len() != n_targets + 1
        || prefix.first() != Some(&0)
        || prefix.last() != Some(&table_len)
        || prefix.windows(2).any(|w| w[0] > w[1])
    {
        return Err(HaloError::PlanCorrupt {
            detail: format!("{what} is not a monotone prefix over {n_targets} targets"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{CommTag, NoComm, RayonComm};

    fn tags(base: u16) -> ExchangeTags {
        ExchangeTags::from_base(CommTag::new(base))
    }

    #[test]
    fn serial_empty_plan() {
        let layout = RankLayout::from_ranges(10, vec![(0, 10)]).unwrap();
        let ghosts = IndexSet::new(10);
        let plan =
            GhostPlan::build(&NoComm, &tags(0x3000), &layout, 0..10, &ghosts, None).unwrap();
        assert_eq!(plan, GhostPlan::empty());
        plan.validate_invariants().unwrap();
    }

    #[test]
    fn serial_rejects_ghosts() {
        let layout = RankLayout::from_ranges(10, vec![(0, 10)]).unwrap();
        let mut ghosts = IndexSet::new(11);
        ghosts.add_index(10).unwrap();
        let err =
            GhostPlan::build(&NoComm, &tags(0x3001), &layout, 0..10, &ghosts, None).unwrap_err();
        assert!(matches!(err, HaloError::RankLayoutMismatch { .. }));
    }

    // Two threaded ranks over N=20, rank 0 owns [0,10), rank 1 owns [10,20).
    // Rank 0 ghosts {10, 11, 19}; rank 1 ghosts {9}.
    #[test]
    fn two_rank_discovery() {
        let t0 = std::thread::spawn(move || {
            let comm = RayonComm::new(0, 2);
            let layout = RankLayout::from_ranges(20, vec![(0, 10), (10, 20)]).unwrap();
            let mut ghosts = IndexSet::new(20);
            ghosts.add_indices([10u64, 11, 19]).unwrap();
            GhostPlan::build(&comm, &tags(0x3002), &layout, 0..10, &ghosts, None).unwrap()
        });
        let t1 = std::thread::spawn(move || {
            let comm = RayonComm::new(1, 2);
            let layout = RankLayout::from_ranges(20, vec![(0, 10), (10, 20)]).unwrap();
            let mut ghosts = IndexSet::new(20);
            ghosts.add_index(9).unwrap();
            GhostPlan::build(&comm, &tags(0x3002), &layout, 10..20, &ghosts, None).unwrap()
        });
        let p0 = t0.join().unwrap();
        let p1 = t1.join().unwrap();

        assert_eq!(p0.ghost_targets(), &[(1, 3)]);
        assert_eq!(p0.import_targets(), &[(1, 1)]);
        // rank 1 wants our global 9 = local 9
        assert_eq!(p0.import_indices(), &[(9, 10)]);
        assert_eq!(p0.import_indices_chunks_by_rank(), &[0, 1]);
        assert_eq!(p0.ghost_subset_ranges(), &[(0, 3)]);

        assert_eq!(p1.ghost_targets(), &[(0, 1)]);
        assert_eq!(p1.import_targets(), &[(0, 3)]);
        // rank 0 wants globals 10, 11 (one run) and 19 (another)
        assert_eq!(p1.import_indices(), &[(0, 2), (9, 10)]);
        assert_eq!(p1.import_indices_chunks_by_rank(), &[0, 2]);
        assert_eq!(p1.n_import_indices(), 3);
        p0.validate_invariants().unwrap();
        p1.validate_invariants().unwrap();
    }

    #[test]
    fn subset_ranges_split_at_target_boundaries() {
        // ghosts {8, 9, 10}: positions 1,2,3 in larger {7, 8, 9, 10, 12};
        // owner changes between 9 and 10, so the run must split.
        let t0 = std::thread::spawn(move || {
            let comm = RayonComm::new(0, 3);
            let layout = RankLayout::from_ranges(15, vec![(0, 5), (5, 10), (10, 15)]).unwrap();
            let mut ghosts = IndexSet::new(15);
            ghosts.add_indices([8u64, 9, 10]).unwrap();
            let mut larger = IndexSet::new(15);
            larger.add_indices([7u64, 8, 9, 10, 12]).unwrap();
            GhostPlan::build(&comm, &tags(0x3100), &layout, 0..5, &ghosts, Some(&larger)).unwrap()
        });
        let t1 = std::thread::spawn(move || {
            let comm = RayonComm::new(1, 3);
            let layout = RankLayout::from_ranges(15, vec![(0, 5), (5, 10), (10, 15)]).unwrap();
            GhostPlan::build(
                &comm,
                &tags(0x3100),
                &layout,
                5..10,
                &IndexSet::new(15),
                None,
            )
            .unwrap()
        });
        let t2 = std::thread::spawn(move || {
            let comm = RayonComm::new(2, 3);
            let layout = RankLayout::from_ranges(15, vec![(0, 5), (5, 10), (10, 15)]).unwrap();
            GhostPlan::build(
                &comm,
                &tags(0x3100),
                &layout,
                10..15,
                &IndexSet::new(15),
                None,
            )
            .unwrap()
        });
        let p0 = t0.join().unwrap();
        let p1 = t1.join().unwrap();
        let p2 = t2.join().unwrap();

        assert_eq!(p0.ghost_targets(), &[(1, 2), (2, 1)]);
        assert_eq!(p0.n_ghost_in_larger_set(), 5);
        assert_eq!(p0.ghost_subset_ranges(), &[(1, 3), (3, 4)]);
        assert_eq!(p0.ghost_subset_chunks_by_rank(), &[0, 1, 2]);

        assert_eq!(p1.import_targets(), &[(0, 2)]);
        assert_eq!(p1.import_indices(), &[(3, 5)]);
        assert_eq!(p2.import_targets(), &[(0, 1)]);
        assert_eq!(p2.import_indices(), &[(0, 1)]);
    }
}
