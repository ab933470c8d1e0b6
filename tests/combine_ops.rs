//! Import (compress) combine semantics across three ranks. Ranks 1 and 2
//! both ghost global index 1, owned by rank 0, so every import round folds
//! two remote contributions into one owned entry.

use std::sync::Arc;

use serial_test::serial;
use vec_halo::comm::communicator::{CommTag, RayonComm};
use vec_halo::index_set::IndexSet;
use vec_halo::partition::{CombineOp, Partitioner};

const N: u64 = 12;

fn build(rank: usize, base: u16) -> Partitioner<RayonComm> {
    let comm = Arc::new(RayonComm::new(rank, 3));
    let lower = rank as u64 * 4;
    let owned = IndexSet::from_range(N, lower..lower + 4).unwrap();
    let mut p = Partitioner::from_owned_with_tags(owned, comm, CommTag::new(base)).unwrap();
    let mut ghosts = IndexSet::new(N);
    if rank > 0 {
        ghosts.add_index(1).unwrap();
    }
    p.set_ghost_indices(ghosts, None).unwrap();
    p
}

/// One compress round; every rank participates, ghost holders contribute
/// `ghost_value`. Returns the ghost buffer after the finish.
fn import_round(
    p: &Partitioner<RayonComm>,
    op: CombineOp,
    owned: &mut [f64],
    ghost_value: f64,
) -> Vec<f64> {
    let mut ghost = vec![ghost_value; p.n_ghost_indices()];
    let mut temp = vec![0.0f64; p.n_import_indices()];
    let epoch = p
        .import_from_ghosted_array_start(op, 0, &mut ghost, &mut temp)
        .unwrap();
    p.import_from_ghosted_array_finish(op, epoch, &mut temp, owned, &mut ghost)
        .unwrap();
    ghost
}

#[test]
#[serial]
fn insert_lets_the_last_import_target_win() {
    fn run(rank: usize) -> (Partitioner<RayonComm>, Vec<f64>, Vec<f64>) {
        let p = build(rank, 0x6100);
        let mut owned: Vec<f64> = (0..4).map(|i| (rank * 4 + i) as f64).collect();
        let ghost = import_round(&p, CombineOp::Insert, &mut owned, 10.0 * rank as f64);
        (p, owned, ghost)
    }
    let t0 = std::thread::spawn(|| run(0));
    let t1 = std::thread::spawn(|| run(1));
    let t2 = std::thread::spawn(|| run(2));
    let (p0, owned0, _) = t0.join().unwrap();
    let (_, owned1, ghost1) = t1.join().unwrap();
    let (_, owned2, ghost2) = t2.join().unwrap();

    // one run per requesting peer, peers in ascending rank order
    assert_eq!(p0.import_targets(), &[(1, 1), (2, 1)]);
    assert_eq!(p0.import_indices(), &[(1, 2), (1, 2)]);
    assert_eq!(p0.import_indices_chunks_by_rank(), &[0, 1, 2]);
    assert_eq!(p0.n_import_indices(), 2);

    // rank 1 wrote 10, rank 2 overwrote with 20; the rest is untouched
    assert_eq!(owned0, vec![0.0, 20.0, 2.0, 3.0]);
    assert_eq!(owned1, vec![4.0, 5.0, 6.0, 7.0]);
    assert_eq!(owned2, vec![8.0, 9.0, 10.0, 11.0]);

    // compress consumed the ghost entries
    assert_eq!(ghost1, vec![0.0]);
    assert_eq!(ghost2, vec![0.0]);
}

#[test]
#[serial]
fn add_accumulates_every_contribution() {
    fn run(rank: usize) -> Vec<f64> {
        let p = build(rank, 0x6200);
        let mut owned: Vec<f64> = (0..4).map(|i| (rank * 4 + i) as f64).collect();
        import_round(&p, CombineOp::Add, &mut owned, 10.0 * rank as f64);
        owned
    }
    let t0 = std::thread::spawn(|| run(0));
    let t1 = std::thread::spawn(|| run(1));
    let t2 = std::thread::spawn(|| run(2));
    let owned0 = t0.join().unwrap();
    t1.join().unwrap();
    t2.join().unwrap();

    // 1 (local) + 10 (rank 1) + 20 (rank 2)
    assert_eq!(owned0, vec![0.0, 31.0, 2.0, 3.0]);
}

#[test]
#[serial]
fn min_and_max_pick_the_extremes() {
    fn run(rank: usize) -> Vec<f64> {
        let p = build(rank, 0x6300);
        let mut owned = vec![100.0f64; 4];
        owned[1] = 15.0;
        // remote contributions 10 and 20; min over {15, 10, 20} is 10
        let ghost_value = 10.0 * rank.max(1) as f64;
        import_round(&p, CombineOp::Min, &mut owned, ghost_value);
        if rank == 0 {
            assert_eq!(owned[1], 10.0);
            owned[1] = 5.0;
        }
        // remote contributions 7 and 3; max over {5, 7, 3} is 7
        let ghost_value = if rank == 1 { 7.0 } else { 3.0 };
        import_round(&p, CombineOp::Max, &mut owned, ghost_value);
        owned
    }
    let t0 = std::thread::spawn(|| run(0));
    let t1 = std::thread::spawn(|| run(1));
    let t2 = std::thread::spawn(|| run(2));
    let owned0 = t0.join().unwrap();
    t1.join().unwrap();
    t2.join().unwrap();

    assert_eq!(owned0[1], 7.0);
    assert_eq!(owned0[0], 100.0);
}

#[test]
#[serial]
fn unordered_comparisons_keep_the_owned_value() {
    fn run(rank: usize) -> Vec<f64> {
        let p = build(rank, 0x6400);
        let mut owned = vec![0.0f64; 4];
        owned[1] = 15.0;
        // a NaN contribution never displaces the owned value
        import_round(&p, CombineOp::Min, &mut owned, f64::NAN);
        if rank == 0 {
            assert_eq!(owned[1], 15.0);
        }
        import_round(&p, CombineOp::Max, &mut owned, f64::NAN);
        if rank == 0 {
            assert_eq!(owned[1], 15.0);
            // and a finite contribution never displaces an owned NaN
            owned[1] = f64::NAN;
        }
        import_round(&p, CombineOp::Min, &mut owned, 3.0);
        owned
    }
    let t0 = std::thread::spawn(|| run(0));
    let t1 = std::thread::spawn(|| run(1));
    let t2 = std::thread::spawn(|| run(2));
    let owned0 = t0.join().unwrap();
    t1.join().unwrap();
    t2.join().unwrap();

    assert!(owned0[1].is_nan());
}
