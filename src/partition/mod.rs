//! Index partitioning: rank layout, derived ghost tables, the partitioner
//! state object, and the exchange epochs it drives.

pub mod exchange;
pub mod ghost_plan;
pub mod partitioner;
pub mod rank_layout;

#[cfg(test)]
mod tests;

pub use exchange::{CombineOp, ExchangeEpoch, ExchangeValue};
pub use ghost_plan::GhostPlan;
pub use partitioner::Partitioner;
pub use rank_layout::RankLayout;

use crate::comm::communicator::CommTag;

/// Default tag base for partitioner traffic; constructors accept an explicit
/// base when several partitioners share a communicator concurrently.
pub const DEFAULT_TAG_BASE: CommTag = CommTag::new(0x4A00);
