//! A narrow interface over the exchange surface of a ghost layout.
//!
//! Callers that only drive exchanges (rebuild the layout, push owned
//! values out, pull contributions back) can hold a
//! [`CommunicationPattern`] instead of the full
//! [`Partitioner`](crate::partition::Partitioner) API.

use crate::comm::communicator::Communicator;
use crate::halo_error::HaloError;
use crate::index_set::IndexSet;
use crate::partition::exchange::{CombineOp, ExchangeEpoch, ExchangeValue};
use crate::partition::partitioner::Partitioner;

/// Rebuild-and-exchange surface of a ghost layout for one element type.
pub trait CommunicationPattern<V: ExchangeValue> {
    /// In-flight state between a start and its matching finish.
    type Epoch;

    /// Collectively rebuild for a new owned/ghost layout.
    fn reinit(&mut self, owned: IndexSet, ghosts: IndexSet) -> Result<(), HaloError>;

    /// Start pushing owned values to the ranks that ghost them.
    fn export_start(
        &self,
        channel: u16,
        owned: &[V],
        temp: &mut [V],
        ghost: &mut [V],
    ) -> Result<Self::Epoch, HaloError>;

    /// Block until an export epoch completes and its ghost values are placed.
    fn export_finish(&self, epoch: Self::Epoch, ghost: &mut [V]) -> Result<(), HaloError>;

    /// Start pulling ghost contributions back to their owning ranks.
    fn import_start(
        &self,
        op: CombineOp,
        channel: u16,
        ghost: &mut [V],
        temp: &mut [V],
    ) -> Result<Self::Epoch, HaloError>;

    /// Block until an import epoch completes and `op` is folded into `owned`.
    fn import_finish(
        &self,
        op: CombineOp,
        epoch: Self::Epoch,
        temp: &mut [V],
        owned: &mut [V],
        ghost: &mut [V],
    ) -> Result<(), HaloError>;
}

impl<V, C> CommunicationPattern<V> for Partitioner<C>
where
    V: ExchangeValue,
    C: Communicator,
{
    type Epoch = ExchangeEpoch<C>;

    fn reinit(&mut self, owned: IndexSet, ghosts: IndexSet) -> Result<(), HaloError> {
        Partitioner::reinit(self, owned, ghosts)
    }

    fn export_start(
        &self,
        channel: u16,
        owned: &[V],
        temp: &mut [V],
        ghost: &mut [V],
    ) -> Result<Self::Epoch, HaloError> {
        self.export_to_ghosted_array_start(channel, owned, temp, ghost)
    }

    fn export_finish(&self, epoch: Self::Epoch, ghost: &mut [V]) -> Result<(), HaloError> {
        self.export_to_ghosted_array_finish(epoch, ghost)
    }

    fn import_start(
        &self,
        op: CombineOp,
        channel: u16,
        ghost: &mut [V],
        temp: &mut [V],
    ) -> Result<Self::Epoch, HaloError> {
        self.import_from_ghosted_array_start(op, channel, ghost, temp)
    }

    fn import_finish(
        &self,
        op: CombineOp,
        epoch: Self::Epoch,
        temp: &mut [V],
        owned: &mut [V],
        ghost: &mut [V],
    ) -> Result<(), HaloError> {
        self.import_from_ghosted_array_finish(op, epoch, temp, owned, ghost)
    }
}
