//! Four ranks over a 100-index space, 25 apiece. Rank 1 ghosts global 24
//! (owned by rank 0) and global 74 (owned by rank 2); the other ranks hold
//! no ghosts. Drives discovery, translation, and one export round end to
//! end through the public API.

use std::sync::Arc;

use serial_test::serial;
use vec_halo::comm::communicator::{CommTag, RayonComm};
use vec_halo::halo_error::HaloError;
use vec_halo::index_set::IndexSet;
use vec_halo::partition::Partitioner;

const N: u64 = 100;
const PER_RANK: u64 = 25;

fn value_of(global: u64) -> f64 {
    3.0 * global as f64 + 1.0
}

fn run_rank(rank: usize) -> (Partitioner<RayonComm>, Vec<f64>) {
    let comm = Arc::new(RayonComm::new(rank, 4));
    let lower = rank as u64 * PER_RANK;
    let owned_set = IndexSet::from_range(N, lower..lower + PER_RANK).unwrap();
    let mut p = Partitioner::from_owned_with_tags(owned_set, comm, CommTag::new(0x6000)).unwrap();

    let mut ghosts = IndexSet::new(N);
    if rank == 1 {
        ghosts.add_indices([24u64, 74]).unwrap();
    }
    p.set_ghost_indices(ghosts, None).unwrap();

    let owned: Vec<f64> = (lower..lower + PER_RANK).map(value_of).collect();
    let mut temp = vec![0.0f64; p.n_import_indices()];
    let mut ghost = vec![0.0f64; p.n_ghost_indices()];
    let epoch = p
        .export_to_ghosted_array_start(0, &owned, &mut temp, &mut ghost)
        .unwrap();
    p.export_to_ghosted_array_finish(epoch, &mut ghost).unwrap();
    (p, ghost)
}

#[test]
#[serial]
fn one_ghosting_rank_among_four() {
    let t0 = std::thread::spawn(|| run_rank(0));
    let t1 = std::thread::spawn(|| run_rank(1));
    let t2 = std::thread::spawn(|| run_rank(2));
    let t3 = std::thread::spawn(|| run_rank(3));
    let (p0, ghost0) = t0.join().unwrap();
    let (p1, ghost1) = t1.join().unwrap();
    let (p2, _) = t2.join().unwrap();
    let (p3, _) = t3.join().unwrap();

    // rank 1 pulls one value each from ranks 0 and 2, in ghost order
    assert_eq!(p1.ghost_targets(), &[(0, 1), (2, 1)]);
    assert_eq!(p1.n_ghost_indices(), 2);
    assert!(p1.import_targets().is_empty());

    // ghost slots follow the owned block
    assert_eq!(p1.local_size(), 25);
    assert_eq!(p1.global_to_local(24).unwrap(), 25);
    assert_eq!(p1.global_to_local(74).unwrap(), 26);
    assert_eq!(p1.local_to_global(26).unwrap(), 74);
    assert!(p1.is_ghost_entry(74));

    // both owners discovered rank 1's request; rank 3 stays idle
    assert_eq!(p0.import_targets(), &[(1, 1)]);
    assert_eq!(p0.import_indices(), &[(24, 25)]);
    assert_eq!(p0.n_import_indices(), 1);
    assert_eq!(p2.import_targets(), &[(1, 1)]);
    // global 74 is local 24 on rank 2
    assert_eq!(p2.import_indices(), &[(24, 25)]);
    assert!(p3.import_targets().is_empty());
    assert!(p3.ghost_targets().is_empty());
    assert!(ghost0.is_empty());

    // the export round delivered the owners' values into rank 1's slots
    assert_eq!(ghost1, vec![value_of(24), value_of(74)]);

    // global 24 exists on rank 0 (owned) and rank 1 (ghost), nowhere else
    assert!(p0.in_local_range(24));
    assert!(matches!(
        p2.global_to_local(24),
        Err(HaloError::IndexNotPresent { index: 24, rank: 2 })
    ));

    for p in [&p0, &p1, &p2, &p3] {
        assert_eq!(p.size(), N);
        assert_eq!(p.num_ranks(), 4);
    }
}
