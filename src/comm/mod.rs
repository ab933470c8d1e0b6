//! Message transport: communicator traits, backends, wire records, and the
//! discovery exchange helpers.

pub mod communicator;
pub mod neighbor_exchange;
pub mod wire;

pub use communicator::{CommTag, Communicator, ExchangeTags, NoComm, RayonComm, Wait};
#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
