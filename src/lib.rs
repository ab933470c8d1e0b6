#![cfg_attr(docsrs, feature(doc_cfg))]
//! # vec-halo
//!
//! vec-halo is a distributed index partitioning and ghost-value exchange
//! library for scientific computing codes. A logical vector of length N is
//! split across P cooperating ranks; each rank owns a contiguous range and
//! may read a set of non-owned ghost indices. One collective discovery at
//! setup caches every table the steady state needs, after which ghost
//! updates and compress rounds are cheap, non-blocking two-phase exchanges.
//!
//! ## Features
//! - Contiguous owned ranges with ghost slots appended in ascending global
//!   order, and stable global/local index translation
//! - One-time collective target discovery: who supplies our ghosts, who
//!   reads our owned values, at which local offsets
//! - Repeatable export (update-ghost-values) and import (compress) epochs
//!   with Insert/Add/Min/Max combine operations
//! - Sparse ghost subsets of a larger ghost superset, exchanged without
//!   rebuilding the larger layout
//! - Pluggable communication backends (serial, threaded, MPI) behind one
//!   `Communicator` trait
//! - Extensive serial, threaded, and property-based testing
//!
//! ## Usage
//! Add `vec-halo` as a dependency in your `Cargo.toml` and enable features
//! as needed:
//!
//! ```toml
//! [dependencies]
//! vec-halo = "0.3.0"
//! # Optional features:
//! # features = ["mpi-support", "check-invariants"]
//! ```

// Re-export our major subsystems:
pub mod comm;
pub mod debug_invariants;
pub mod halo_error;
pub mod index_set;
pub mod partition;
pub mod pattern;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::communicator::Communicator;
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::communicator::MpiComm;
    pub use crate::comm::communicator::{CommTag, ExchangeTags, NoComm, RayonComm, Wait};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::halo_error::HaloError;
    pub use crate::index_set::IndexSet;
    pub use crate::partition::{
        CombineOp, ExchangeEpoch, ExchangeValue, GhostPlan, Partitioner, RankLayout,
    };
    pub use crate::pattern::CommunicationPattern;
}
