//! HaloError: unified error type for vec-halo public APIs.
//!
//! Every fallible operation in this crate returns `Result<_, HaloError>`;
//! the library does not panic on malformed input. Layout errors are raised
//! eagerly at registration/discovery time and are fatal for the affected
//! partitioner; translation errors are per-call and leave state untouched.

use thiserror::Error;

/// Unified error type for vec-halo operations.
#[derive(Debug, Error)]
pub enum HaloError {
    /// A global index was translated on a rank where it is neither owned
    /// nor ghosted. Never reported through a sentinel value.
    #[error("global index {index} is neither owned nor ghosted on rank {rank}")]
    IndexNotPresent { index: u64, rank: usize },

    /// A local index was outside `[0, local_size + n_ghost_indices)`.
    #[error("local index {index} out of range (local storage holds {len} entries)")]
    LocalIndexOutOfRange { index: usize, len: usize },

    /// An index fell outside an index set's universe `[0, size)`.
    #[error("index {index} outside index-set bound {size}")]
    IndexSetOutOfBounds { index: u64, size: u64 },

    /// A range `[begin, end)` with `begin > end` was supplied.
    #[error("invalid index range: begin {begin} > end {end}")]
    InvalidIndexRange { begin: u64, end: u64 },

    /// Two index sets with different universe sizes were combined.
    #[error("index-set size mismatch: {left} vs {right}")]
    IndexSetSizeMismatch { left: u64, right: u64 },

    /// An index set's internal range table is inconsistent.
    #[error("index-set invariant violated: {detail}")]
    IndexSetCorrupt { detail: String },

    /// The owned index set handed to a partitioner was not a single
    /// contiguous range.
    #[error("owned index set must be empty or one contiguous range")]
    OwnedNotContiguous,

    /// A ghost index collides with the locally owned range.
    #[error("ghost index {index} lies inside the locally owned range")]
    GhostInOwnedRange { index: u64 },

    /// A ghost index lies beyond the global index space.
    #[error("ghost index {index} exceeds global size {global_size}")]
    GhostOutOfRange { index: u64, global_size: u64 },

    /// A ghost index is missing from the declared larger ghost superset.
    #[error("ghost index {index} not contained in the larger ghost set")]
    GhostNotInLargerSet { index: u64 },

    /// The allgathered owned ranges do not tile `[0, global_size)`.
    #[error("rank layout mismatch: {reason}")]
    RankLayoutMismatch { reason: String },

    /// A remote rank requested an index this rank does not own.
    #[error("rank {requester} requested global index {index} which is not owned here")]
    ImportNotOwned { index: u64, requester: usize },

    /// An exchange buffer does not match the cached table counts.
    #[error("exchange buffer `{buffer}`: expected {expected} elements, got {got}")]
    ExchangeBufferMismatch {
        buffer: &'static str,
        expected: usize,
        got: usize,
    },

    /// A finish call was handed an epoch that does not belong to it: wrong
    /// direction, or handle counts disagreeing with the cached targets.
    #[error("exchange epoch mismatch: {detail}")]
    EpochMismatch { detail: String },

    /// The requested communication channel does not fit the tag band.
    #[error("communication channel {channel} does not fit the {max}-channel tag band")]
    ChannelOutOfRange { channel: u16, max: u16 },

    /// The requested base tag leaves no room for a full exchange tag band
    /// below the reserved collective tag.
    #[error("tag base {base:#06x} exceeds the highest usable base {max:#06x}")]
    TagBaseOutOfRange { base: u16, max: u16 },

    /// A ghost plan's derived tables are inconsistent.
    #[error("ghost plan invariant violated: {detail}")]
    PlanCorrupt { detail: String },

    /// A transport-level failure reported by the communicator backend.
    #[error("communication with rank {neighbor} failed: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// A message arrived with an unexpected byte length.
    #[error("receive from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
}
