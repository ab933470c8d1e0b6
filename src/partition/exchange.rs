//! Export and import epochs over a partitioner's cached tables.
//!
//! Export (update-ghost-values) pushes owned values out to every rank that
//! ghosts them; import (compress) pulls ghost-side contributions back into
//! the owned array under a [`CombineOp`]. Both run as a non-blocking
//! `start` that posts every receive and send, and a blocking `finish` that
//! drains the epoch's handles and unpacks. No index translation happens
//! here; everything is direct slicing by the offsets target discovery
//! cached in the [`GhostPlan`](crate::partition::GhostPlan).
//!
//! A `communication_channel` in `[0, MAX_COMMUNICATION_CHANNELS)` shifts
//! the message tags, so epochs over different value buffers can be in
//! flight at the same time.

use std::cmp::Ordering;
use std::ops::AddAssign;

use bytemuck::Pod;
use num_traits::Zero;

use crate::comm::communicator::{Communicator, Wait, MAX_COMMUNICATION_CHANNELS};
use crate::comm::wire::{cast_slice, cast_slice_mut};
use crate::halo_error::HaloError;
use crate::partition::partitioner::Partitioner;

/// Element types the exchange engine can move and combine: plain-old-data
/// with a zero value, accumulation, and a partial order.
pub trait ExchangeValue: Pod + Zero + AddAssign + PartialOrd + Send + Sync + 'static {}

impl<T> ExchangeValue for T where T: Pod + Zero + AddAssign + PartialOrd + Send + Sync + 'static {}

/// How import (compress) folds a received contribution into the owned value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CombineOp {
    /// Overwrite. With several contributors to one owned index, the last
    /// import target in table order wins.
    Insert,
    /// Accumulate with `+=`.
    Add,
    /// Keep the smaller value; the owned value survives an unordered compare.
    Min,
    /// Keep the larger value; the owned value survives an unordered compare.
    Max,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Direction {
    Export,
    Import,
}

impl Direction {
    fn name(self) -> &'static str {
        match self {
            Direction::Export => "export",
            Direction::Import => "import",
        }
    }
}

#[derive(Debug)]
struct PendingRecv<H> {
    peer: usize,
    /// Element offset of the destination segment.
    start: usize,
    /// Element count of the destination segment.
    count: usize,
    handle: H,
}

/// In-flight state of one started exchange, consumed by the matching finish.
///
/// Dropping an epoch without finishing it abandons its transport handles;
/// every `start` must be paired with exactly one `finish`.
#[derive(Debug)]
pub struct ExchangeEpoch<C: Communicator> {
    direction: Direction,
    recvs: Vec<PendingRecv<C::RecvHandle>>,
    sends: Vec<C::SendHandle>,
    ghost_len: usize,
    temp_len: usize,
}

impl<C: Communicator> Partitioner<C> {
    /// Start pushing owned values to the ranks that ghost them.
    ///
    /// `temp` stages the owned values at the cached `import_indices` runs
    /// (`n_import_indices` elements); `ghost` is the destination buffer,
    /// sized either exactly `n_ghost_indices` or for the larger ghost set.
    /// Returns the epoch to hand to
    /// [`export_to_ghosted_array_finish`](Self::export_to_ghosted_array_finish).
    pub fn export_to_ghosted_array_start<V>(
        &self,
        communication_channel: u16,
        owned: &[V],
        temp: &mut [V],
        ghost: &mut [V],
    ) -> Result<ExchangeEpoch<C>, HaloError>
    where
        V: ExchangeValue,
    {
        self.check_channel(communication_channel)?;
        self.check_ghost_buffer(ghost.len())?;
        let plan = &self.plan;
        if temp.len() != plan.n_import_indices() {
            return Err(HaloError::ExchangeBufferMismatch {
                buffer: "temp",
                expected: plan.n_import_indices(),
                got: temp.len(),
            });
        }
        if plan.n_import_indices() > 0 && owned.len() != self.local_size {
            return Err(HaloError::ExchangeBufferMismatch {
                buffer: "owned",
                expected: self.local_size,
                got: owned.len(),
            });
        }
        let tag = self.tags.export.offset(communication_channel).as_u16();

        // 1) post receives: per-target ghost segments, packed at the tail of
        //    a larger ghost buffer so finish can scatter forward
        let mut start = ghost.len() - plan.n_ghost();
        let mut recvs = Vec::with_capacity(plan.ghost_targets().len());
        for &(peer, count) in plan.ghost_targets() {
            let mut buf = vec![0u8; count * std::mem::size_of::<V>()];
            let handle = self.comm.irecv(peer, tag, &mut buf);
            recvs.push(PendingRecv {
                peer,
                start,
                count,
                handle,
            });
            start += count;
        }

        // 2) stage owned values run by run and post per-target sends
        let mut cursor = 0usize;
        for &(b, e) in plan.import_indices() {
            temp[cursor..cursor + (e - b)].copy_from_slice(&owned[b..e]);
            cursor += e - b;
        }
        let mut sends = Vec::with_capacity(plan.import_targets().len());
        let mut sent = 0usize;
        for &(peer, count) in plan.import_targets() {
            sends.push(
                self.comm
                    .isend(peer, tag, cast_slice(&temp[sent..sent + count])),
            );
            sent += count;
        }

        log::trace!(
            "rank {}: export start on channel {communication_channel}: {} receives, {} sends",
            self.comm.rank(),
            recvs.len(),
            sends.len()
        );
        Ok(ExchangeEpoch {
            direction: Direction::Export,
            recvs,
            sends,
            ghost_len: ghost.len(),
            temp_len: temp.len(),
        })
    }

    /// Wait out an export epoch and place the received values.
    ///
    /// With the larger-set layout active, the packed tail is scattered
    /// forward into the true subset positions and the vacated staging slots
    /// are zeroed.
    pub fn export_to_ghosted_array_finish<V>(
        &self,
        epoch: ExchangeEpoch<C>,
        ghost: &mut [V],
    ) -> Result<(), HaloError>
    where
        V: ExchangeValue,
    {
        let plan = &self.plan;
        self.check_epoch(
            &epoch,
            Direction::Export,
            plan.ghost_targets().len(),
            plan.import_targets().len(),
        )?;
        if ghost.len() != epoch.ghost_len {
            return Err(HaloError::ExchangeBufferMismatch {
                buffer: "ghost",
                expected: epoch.ghost_len,
                got: ghost.len(),
            });
        }

        // 3) wait on receives, copying each payload into its ghost segment
        let mut maybe_err = None;
        for pending in epoch.recvs {
            let expected = pending.count * std::mem::size_of::<V>();
            match pending.handle.wait() {
                Some(data) if data.len() == expected => {
                    if maybe_err.is_none() {
                        let dst = &mut ghost[pending.start..pending.start + pending.count];
                        cast_slice_mut(dst).copy_from_slice(&data);
                    }
                }
                Some(data) if maybe_err.is_none() => {
                    maybe_err = Some(HaloError::BufferSizeMismatch {
                        neighbor: pending.peer,
                        expected,
                        got: data.len(),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(HaloError::CommError {
                        neighbor: pending.peer,
                        source: format!(
                            "failed to receive ghost values from rank {}",
                            pending.peer
                        )
                        .into(),
                    });
                }
                _ => {} // already have an error; just drain
            }
        }

        // 4) always drain all send handles before returning
        for send in epoch.sends {
            let _ = send.wait();
        }
        if let Some(err) = maybe_err {
            return Err(err);
        }

        // 5) scatter the packed tail into true subset positions; the walk
        //    stops once packed and true positions coincide
        if epoch.ghost_len == plan.n_ghost_in_larger_set()
            && plan.n_ghost_in_larger_set() > plan.n_ghost()
        {
            let mut offset = plan.n_ghost_in_larger_set() - plan.n_ghost();
            for &(b, e) in plan.ghost_subset_ranges() {
                if offset == b {
                    break;
                }
                debug_assert!(offset > b);
                let len = e - b;
                ghost.copy_within(offset..offset + len, b);
                ghost[e.max(offset)..offset + len].fill(V::zero());
                offset += len;
            }
        }
        log::trace!("rank {}: export finish complete", self.comm.rank());
        Ok(())
    }

    /// Start pulling ghost contributions back to their owning ranks.
    ///
    /// `temp` receives the per-target contribution chunks
    /// (`n_import_indices` elements). With the larger-set layout active,
    /// the ghost values are first gathered to the buffer front and the
    /// slots they came from are zeroed.
    pub fn import_from_ghosted_array_start<V>(
        &self,
        op: CombineOp,
        communication_channel: u16,
        ghost: &mut [V],
        temp: &mut [V],
    ) -> Result<ExchangeEpoch<C>, HaloError>
    where
        V: ExchangeValue,
    {
        self.check_channel(communication_channel)?;
        self.check_ghost_buffer(ghost.len())?;
        let plan = &self.plan;
        if temp.len() != plan.n_import_indices() {
            return Err(HaloError::ExchangeBufferMismatch {
                buffer: "temp",
                expected: plan.n_import_indices(),
                got: temp.len(),
            });
        }
        let tag = self.tags.import.offset(communication_channel).as_u16();

        // 1) post receives into per-target segments of the staging buffer
        let mut recvs = Vec::with_capacity(plan.import_targets().len());
        let mut start = 0usize;
        for &(peer, count) in plan.import_targets() {
            let mut buf = vec![0u8; count * std::mem::size_of::<V>()];
            let handle = self.comm.irecv(peer, tag, &mut buf);
            recvs.push(PendingRecv {
                peer,
                start,
                count,
                handle,
            });
            start += count;
        }

        // 2) gather ghost values to the buffer front when the larger-set
        //    layout is active, zeroing the slots they came from
        if ghost.len() > plan.n_ghost() {
            let mut offset = 0usize;
            for &(b, e) in plan.ghost_subset_ranges() {
                let len = e - b;
                if offset != b {
                    ghost.copy_within(b..e, offset);
                    ghost[b.max(offset + len)..e].fill(V::zero());
                }
                offset += len;
            }
        }

        // 3) post sends: per-target chunks off the packed front
        let mut sends = Vec::with_capacity(plan.ghost_targets().len());
        let mut sent = 0usize;
        for &(peer, count) in plan.ghost_targets() {
            sends.push(
                self.comm
                    .isend(peer, tag, cast_slice(&ghost[sent..sent + count])),
            );
            sent += count;
        }

        log::trace!(
            "rank {}: import start ({op:?}) on channel {communication_channel}: {} receives, {} sends",
            self.comm.rank(),
            recvs.len(),
            sends.len()
        );
        Ok(ExchangeEpoch {
            direction: Direction::Import,
            recvs,
            sends,
            ghost_len: ghost.len(),
            temp_len: temp.len(),
        })
    }

    /// Wait out an import epoch and fold the contributions into `owned`.
    ///
    /// The ghost buffer is reset to zero afterwards: compress consumes the
    /// ghost data, and a subsequent export epoch refreshes it.
    pub fn import_from_ghosted_array_finish<V>(
        &self,
        op: CombineOp,
        epoch: ExchangeEpoch<C>,
        temp: &mut [V],
        owned: &mut [V],
        ghost: &mut [V],
    ) -> Result<(), HaloError>
    where
        V: ExchangeValue,
    {
        let plan = &self.plan;
        self.check_epoch(
            &epoch,
            Direction::Import,
            plan.import_targets().len(),
            plan.ghost_targets().len(),
        )?;
        if temp.len() != epoch.temp_len {
            return Err(HaloError::ExchangeBufferMismatch {
                buffer: "temp",
                expected: epoch.temp_len,
                got: temp.len(),
            });
        }
        if ghost.len() != epoch.ghost_len {
            return Err(HaloError::ExchangeBufferMismatch {
                buffer: "ghost",
                expected: epoch.ghost_len,
                got: ghost.len(),
            });
        }
        if plan.n_import_indices() > 0 && owned.len() != self.local_size {
            return Err(HaloError::ExchangeBufferMismatch {
                buffer: "owned",
                expected: self.local_size,
                got: owned.len(),
            });
        }

        // 3) wait on receives, copying each payload into the staging buffer
        let mut maybe_err = None;
        for pending in epoch.recvs {
            let expected = pending.count * std::mem::size_of::<V>();
            match pending.handle.wait() {
                Some(data) if data.len() == expected => {
                    if maybe_err.is_none() {
                        let dst = &mut temp[pending.start..pending.start + pending.count];
                        cast_slice_mut(dst).copy_from_slice(&data);
                    }
                }
                Some(data) if maybe_err.is_none() => {
                    maybe_err = Some(HaloError::BufferSizeMismatch {
                        neighbor: pending.peer,
                        expected,
                        got: data.len(),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(HaloError::CommError {
                        neighbor: pending.peer,
                        source: format!(
                            "failed to receive contributions from rank {}",
                            pending.peer
                        )
                        .into(),
                    });
                }
                _ => {} // already have an error; just drain
            }
        }

        // 4) always drain all send handles before returning
        for send in epoch.sends {
            let _ = send.wait();
        }
        if let Some(err) = maybe_err {
            return Err(err);
        }

        // 5) fold the staged contributions into the owned values, one linear
        //    pass over the import runs
        let mut cursor = 0usize;
        for &(b, e) in plan.import_indices() {
            for k in b..e {
                let v = temp[cursor];
                cursor += 1;
                match op {
                    CombineOp::Insert => owned[k] = v,
                    CombineOp::Add => owned[k] += v,
                    CombineOp::Min => {
                        if matches!(v.partial_cmp(&owned[k]), Some(Ordering::Less)) {
                            owned[k] = v;
                        }
                    }
                    CombineOp::Max => {
                        if matches!(v.partial_cmp(&owned[k]), Some(Ordering::Greater)) {
                            owned[k] = v;
                        }
                    }
                }
            }
        }

        // ghost data is consumed by compress; an export epoch refreshes it
        ghost.fill(V::zero());
        log::trace!("rank {}: import finish ({op:?}) complete", self.comm.rank());
        Ok(())
    }

    fn check_channel(&self, channel: u16) -> Result<(), HaloError> {
        if channel >= MAX_COMMUNICATION_CHANNELS {
            return Err(HaloError::ChannelOutOfRange {
                channel,
                max: MAX_COMMUNICATION_CHANNELS,
            });
        }
        Ok(())
    }

    fn check_ghost_buffer(&self, len: usize) -> Result<(), HaloError> {
        if len != self.plan.n_ghost() && len != self.plan.n_ghost_in_larger_set() {
            return Err(HaloError::ExchangeBufferMismatch {
                buffer: "ghost",
                expected: self.plan.n_ghost_in_larger_set(),
                got: len,
            });
        }
        Ok(())
    }

    fn check_epoch(
        &self,
        epoch: &ExchangeEpoch<C>,
        want: Direction,
        want_recvs: usize,
        want_sends: usize,
    ) -> Result<(), HaloError> {
        if epoch.direction != want {
            return Err(HaloError::EpochMismatch {
                detail: format!(
                    "{} finish was handed an {} epoch",
                    want.name(),
                    epoch.direction.name()
                ),
            });
        }
        if epoch.recvs.len() != want_recvs || epoch.sends.len() != want_sends {
            return Err(HaloError::EpochMismatch {
                detail: format!(
                    "epoch holds {} receives and {} sends, this partitioner expects {want_recvs} and {want_sends}",
                    epoch.recvs.len(),
                    epoch.sends.len()
                ),
            });
        }
        Ok(())
    }
}
