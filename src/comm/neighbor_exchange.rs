//! Discovery transport: symmetric count exchange plus variable-size index
//! payloads.
//!
//! Target discovery must tell every peer how many of its indices this rank
//! wants before the actual index lists can flow (the receiver of a request
//! list does not know its size in advance). Both helpers post all receives
//! first, then all sends, and drain every handle before returning, even if
//! an error occurs.

use crate::comm::communicator::{CommTag, Communicator, Wait};
use crate::comm::wire::{WireCount, WireGlobalIndex, cast_slice, cast_slice_mut};
use crate::halo_error::HaloError;
use bytemuck::Zeroable;

/// Exchange one request count with every other rank.
///
/// `send_counts[p]` is the number of indices this rank will request from
/// rank `p` (zero allowed, and `send_counts[rank]` is returned untouched).
/// Returns the incoming counts indexed by rank.
pub fn exchange_counts_symmetric<C>(
    comm: &C,
    tag: CommTag,
    send_counts: &[usize],
) -> Result<Vec<usize>, HaloError>
where
    C: Communicator,
{
    let size = comm.size();
    let me = comm.rank();
    debug_assert_eq!(send_counts.len(), size);

    // 1) post all receives (one count slot per peer)
    let mut pending_recvs: Vec<(usize, C::RecvHandle, WireCount)> =
        Vec::with_capacity(size.saturating_sub(1));
    for peer in 0..size {
        if peer == me {
            continue;
        }
        let mut cnt = WireCount::new(0);
        let h = comm.irecv(
            peer,
            tag.as_u16(),
            cast_slice_mut(std::slice::from_mut(&mut cnt)),
        );
        pending_recvs.push((peer, h, cnt));
    }

    // 2) post all sends and keep buffers alive until completion
    let mut pending_sends = Vec::with_capacity(size.saturating_sub(1));
    let mut send_bufs = Vec::with_capacity(size.saturating_sub(1));
    for peer in 0..size {
        if peer == me {
            continue;
        }
        let wire = WireCount::new(send_counts[peer]);
        pending_sends.push(comm.isend(
            peer,
            tag.as_u16(),
            cast_slice(std::slice::from_ref(&wire)),
        ));
        send_bufs.push(wire);
    }

    // 3) wait for all recvs, collect counts (no early return)
    let mut counts_in = vec![0usize; size];
    counts_in[me] = send_counts[me];
    let mut maybe_err = None;
    for (peer, h, _cnt) in pending_recvs {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                if maybe_err.is_none() {
                    let mut cnt = WireCount::zeroed();
                    cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                    counts_in[peer] = cnt.get();
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(HaloError::BufferSizeMismatch {
                    neighbor: peer,
                    expected: std::mem::size_of::<WireCount>(),
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(HaloError::CommError {
                    neighbor: peer,
                    source: format!("failed to receive request count from rank {peer}").into(),
                });
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }
    drop(send_bufs);

    // 5) return error or success
    if let Some(err) = maybe_err {
        Err(err)
    } else {
        Ok(counts_in)
    }
}

/// Exchange variable-size global-index lists.
///
/// `outgoing` holds `(peer, ascending indices)` pairs to send;
/// `incoming_counts` holds `(peer, count)` pairs to receive, both with only
/// nonzero entries. The result preserves `incoming_counts` order, which
/// callers rely on for reproducible target ordering.
pub fn exchange_index_lists<C>(
    comm: &C,
    tag: CommTag,
    outgoing: &[(usize, Vec<u64>)],
    incoming_counts: &[(usize, usize)],
) -> Result<Vec<(usize, Vec<u64>)>, HaloError>
where
    C: Communicator,
{
    // 1) post all receives, sized by the announced counts
    let mut pending_recvs = Vec::with_capacity(incoming_counts.len());
    for &(peer, count) in incoming_counts {
        let mut buf = vec![WireGlobalIndex::zeroed(); count];
        let h = comm.irecv(peer, tag.as_u16(), cast_slice_mut(&mut buf));
        pending_recvs.push((peer, count, h, buf));
    }

    // 2) post all sends and stash buffers so they stay alive
    let mut pending_sends = Vec::with_capacity(outgoing.len());
    let mut send_bufs = Vec::with_capacity(outgoing.len());
    for (peer, indices) in outgoing {
        let wire: Vec<WireGlobalIndex> =
            indices.iter().map(|&g| WireGlobalIndex::of(g)).collect();
        pending_sends.push(comm.isend(*peer, tag.as_u16(), cast_slice(&wire)));
        send_bufs.push(wire);
    }

    // 3) wait for all recvs, decode (no early return)
    let mut lists = Vec::with_capacity(pending_recvs.len());
    let mut maybe_err = None;
    for (peer, count, h, _buf) in pending_recvs {
        let expected = count * std::mem::size_of::<WireGlobalIndex>();
        match h.wait() {
            Some(data) if data.len() == expected => {
                if maybe_err.is_none() {
                    let mut wire = vec![WireGlobalIndex::zeroed(); count];
                    cast_slice_mut(&mut wire).copy_from_slice(&data);
                    lists.push((peer, wire.iter().map(|w| w.get()).collect()));
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(HaloError::BufferSizeMismatch {
                    neighbor: peer,
                    expected,
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(HaloError::CommError {
                    neighbor: peer,
                    source: format!("failed to receive index list from rank {peer}").into(),
                });
            }
            _ => {}
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }
    drop(send_bufs);

    // 5) return error or success
    if let Some(err) = maybe_err {
        Err(err)
    } else {
        Ok(lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::RayonComm;

    #[test]
    fn counts_cross_two_ranks() {
        let tag = CommTag(0x2200);
        let t0 = std::thread::spawn(move || {
            let comm = RayonComm::new(0, 2);
            exchange_counts_symmetric(&comm, tag, &[0, 3]).unwrap()
        });
        let t1 = std::thread::spawn(move || {
            let comm = RayonComm::new(1, 2);
            exchange_counts_symmetric(&comm, tag, &[5, 0]).unwrap()
        });
        assert_eq!(t0.join().unwrap(), vec![0, 5]);
        assert_eq!(t1.join().unwrap(), vec![3, 0]);
    }

    #[test]
    fn index_lists_follow_counts() {
        let tag = CommTag(0x2201);
        let t0 = std::thread::spawn(move || {
            let comm = RayonComm::new(0, 2);
            // rank 0 wants {10, 11, 40} from rank 1 and expects 2 requests back
            exchange_index_lists(&comm, tag, &[(1, vec![10, 11, 40])], &[(1, 2)]).unwrap()
        });
        let t1 = std::thread::spawn(move || {
            let comm = RayonComm::new(1, 2);
            exchange_index_lists(&comm, tag, &[(0, vec![3, 7])], &[(0, 3)]).unwrap()
        });
        assert_eq!(t0.join().unwrap(), vec![(1, vec![3, 7])]);
        assert_eq!(t1.join().unwrap(), vec![(0, vec![10, 11, 40])]);
    }

    #[test]
    fn short_message_is_detected() {
        let tag = CommTag(0x2202);
        let c0 = RayonComm::new(0, 2);
        let c1 = RayonComm::new(1, 2);
        // rank 0 announces 2 indices but sends only 1
        c0.isend(1, tag.as_u16(), cast_slice(&[WireGlobalIndex::of(9)]));
        let err = exchange_index_lists(&c1, tag, &[], &[(0, 2)]).unwrap_err();
        assert!(matches!(
            err,
            HaloError::BufferSizeMismatch {
                neighbor: 0,
                expected: 16,
                got: 8
            }
        ));
    }
}
