//! Rank ids need not ascend with range begins: here rank 0 owns the upper
//! half and rank 1 the lower half. One export round runs over the permuted
//! layout, then both ranks reinit to the identity split and exchange again.

use std::sync::Arc;

use serial_test::serial;
use vec_halo::comm::communicator::{CommTag, RayonComm};
use vec_halo::index_set::IndexSet;
use vec_halo::partition::Partitioner;

const N: u64 = 20;

fn value_of(global: u64) -> f64 {
    100.0 + global as f64
}

fn export_once(p: &Partitioner<RayonComm>) -> Vec<f64> {
    let lower = p.local_range().start;
    let owned: Vec<f64> = (lower..p.local_range().end).map(value_of).collect();
    let mut temp = vec![0.0f64; p.n_import_indices()];
    let mut ghost = vec![0.0f64; p.n_ghost_indices()];
    let epoch = p
        .export_to_ghosted_array_start(0, &owned, &mut temp, &mut ghost)
        .unwrap();
    p.export_to_ghosted_array_finish(epoch, &mut ghost).unwrap();
    ghost
}

fn run_rank(rank: usize) -> (Vec<f64>, Vec<f64>) {
    let comm = Arc::new(RayonComm::new(rank, 2));
    // rank 0 takes [10, 20), rank 1 takes [0, 10)
    let lower = (1 - rank) as u64 * 10;
    let owned = IndexSet::from_range(N, lower..lower + 10).unwrap();
    let mut p = Partitioner::from_owned_with_tags(owned, comm, CommTag::new(0x6600)).unwrap();

    let mut ghosts = IndexSet::new(N);
    // each rank ghosts the first index of the other one's block
    if rank == 0 {
        ghosts.add_index(0).unwrap();
    } else {
        ghosts.add_index(10).unwrap();
    }
    p.set_ghost_indices(ghosts, None).unwrap();

    assert_eq!(p.rank_layout().owner_of(5), Some(1));
    assert_eq!(p.rank_layout().owner_of(15), Some(0));
    assert_eq!(p.ghost_targets(), &[(1 - rank, 1)]);
    let permuted_ghost = export_once(&p);

    // identity split, rank 0 now ghosting global 15 from rank 1
    let owned = IndexSet::from_range(N, (rank as u64 * 10)..(rank as u64 * 10 + 10)).unwrap();
    let mut ghosts = IndexSet::new(N);
    if rank == 0 {
        ghosts.add_index(15).unwrap();
    }
    p.reinit(owned, ghosts).unwrap();
    assert_eq!(p.local_range(), (rank as u64 * 10)..(rank as u64 * 10 + 10));
    let identity_ghost = export_once(&p);

    (permuted_ghost, identity_ghost)
}

#[test]
#[serial]
fn exchange_survives_a_rank_permutation_and_a_reinit() {
    let t0 = std::thread::spawn(|| run_rank(0));
    let t1 = std::thread::spawn(|| run_rank(1));
    let (permuted0, identity0) = t0.join().unwrap();
    let (permuted1, identity1) = t1.join().unwrap();

    assert_eq!(permuted0, vec![value_of(0)]);
    assert_eq!(permuted1, vec![value_of(10)]);
    assert_eq!(identity0, vec![value_of(15)]);
    assert!(identity1.is_empty());
}
