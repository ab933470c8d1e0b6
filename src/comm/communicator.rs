//! Thin façade over serial, intra-process (threaded), or inter-process (MPI)
//! message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). All
//! handles are **waitable** but non-blocking; completed payloads come back
//! from `.wait()`, never in place. Matching is by
//! `(source, destination, tag)` and FIFO per key, which is also what the
//! MPI backend guarantees per `(source, tag)`.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// This process's rank within the group.
    fn rank(&self) -> usize;
    /// Number of ranks in the group.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;

    /// Post a receive of up to `buf.len()` bytes from `peer`.
    ///
    /// `buf` only communicates the expected length: the payload is
    /// returned by [`Wait::wait`] on the handle, and a backend is free to
    /// leave `buf` untouched. Callers must not expect in-place receipt.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Collective gather: every rank contributes `send`, every rank receives
    /// the rank-ordered concatenation. `recv.len()` must equal
    /// `send.len() * size()`. All ranks must call in the same program order.
    fn allgather(&self, send: &[u8], recv: &mut [u8]);
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Drain a batch of handles, discarding any payloads.
pub fn wait_all<H: Wait>(handles: Vec<H>) {
    for h in handles {
        let _ = h.wait();
    }
}

/// Typed message tag.
///
/// Tag arithmetic goes through [`offset`](Self::offset) so channel shifts
/// stay explicit at call sites.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(base: u16) -> Self {
        Self(base)
    }
    #[inline]
    pub const fn base(self) -> u16 {
        self.0
    }
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    #[inline]
    pub const fn offset(self, n: u16) -> Self {
        Self(self.0.wrapping_add(n))
    }
}

/// Highest communication channel accepted by the exchange epochs; channels
/// shift the epoch tag space, so the bound keeps export and import bands
/// from overlapping.
pub const MAX_COMMUNICATION_CHANNELS: u16 = 64;

/// Width of the tag band one partitioner occupies: the discovery count and
/// payload tags plus a full export and a full import channel band.
pub const TAG_BAND_WIDTH: u16 = 2 + 2 * MAX_COMMUNICATION_CHANNELS;

/// Highest base tag whose band stays below the reserved collective tag.
/// Partitioner construction rejects larger bases; unchecked tag arithmetic
/// would wrap into low tags or onto the collective tag itself.
pub const MAX_TAG_BASE: u16 = u16::MAX - TAG_BAND_WIDTH;

/// Tag bundle for one partitioner.
///
/// Discovery traffic uses `counts`/`payload`; exchange epochs use the
/// `export`/`import` bands shifted by their communication channel.
#[derive(Copy, Clone, Debug)]
pub struct ExchangeTags {
    pub counts: CommTag,
    pub payload: CommTag,
    pub export: CommTag,
    pub import: CommTag,
}

impl ExchangeTags {
    /// Lay the four tag bands out from `base`, occupying
    /// `[base, base + TAG_BAND_WIDTH)`. Bases above [`MAX_TAG_BASE`] are
    /// rejected at partitioner construction.
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            counts: base,
            payload: base.offset(1),
            export: base.offset(2),
            import: base.offset(2 + MAX_COMMUNICATION_CHANNELS),
        }
    }
}

/// Compile-time no-op comm for pure serial use: one rank, no messages.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
    fn allgather(&self, send: &[u8], recv: &mut [u8]) {
        recv[..send.len()].copy_from_slice(send);
    }
}

// --- RayonComm: intra-process / multi-thread ---

type Key = (usize, usize, u16); // (src, dst, tag)

/// Process-global mailbox; FIFO queue per `(src, dst, tag)`.
static MAILBOX: Lazy<DashMap<Key, VecDeque<Bytes>>> = Lazy::new(DashMap::new);

/// Reserved tag for [`Communicator::allgather`]; user tags must stay below.
const ALLGATHER_TAG: u16 = u16::MAX;

fn mailbox_push(key: Key, data: &[u8]) {
    MAILBOX
        .entry(key)
        .or_default()
        .push_back(Bytes::copy_from_slice(data));
}

fn mailbox_pop(key: &Key) -> Option<Bytes> {
    MAILBOX.get_mut(key)?.pop_front()
}

/// Receive handle of [`RayonComm`]: a polling thread parks the payload in a
/// shared slot.
pub struct LocalHandle {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
    thread: Option<JoinHandle<()>>,
}

impl Wait for LocalHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
        self.slot.lock().take()
    }
}

/// Intra-process backend: ranks are threads of one process sharing the
/// global mailbox. Used by the multi-rank test suites; tests sharing tags
/// must be serialized (`serial_test`) because the mailbox is process-global.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
}

impl RayonComm {
    pub fn new(rank: usize, size: usize) -> Self {
        Self { rank, size }
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        mailbox_push((self.rank, peer, tag), buf);
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        let key = (peer, self.rank, tag);
        let slot = Arc::new(Mutex::new(None));
        let slot_in_thread = Arc::clone(&slot);
        let want = buf.len();
        let thread = std::thread::spawn(move || {
            loop {
                if let Some(bytes) = mailbox_pop(&key) {
                    // Oversized messages truncate to the posted buffer.
                    let n = want.min(bytes.len());
                    *slot_in_thread.lock() = Some(bytes[..n].to_vec());
                    break;
                }
                std::thread::yield_now();
            }
        });
        LocalHandle {
            slot,
            thread: Some(thread),
        }
    }

    fn allgather(&self, send: &[u8], recv: &mut [u8]) {
        let n = send.len();
        debug_assert_eq!(recv.len(), n * self.size);
        for peer in 0..self.size {
            if peer != self.rank {
                self.isend(peer, ALLGATHER_TAG, send);
            }
        }
        recv[self.rank * n..(self.rank + 1) * n].copy_from_slice(send);
        // FIFO queues line successive collectives up pairwise, the same way
        // MPI orders collectives on a communicator.
        for peer in 0..self.size {
            if peer == self.rank {
                continue;
            }
            let mut chunk = vec![0u8; n];
            let h = self.irecv(peer, ALLGATHER_TAG, &mut chunk);
            if let Some(data) = h.wait() {
                let m = n.min(data.len());
                recv[peer * n..peer * n + m].copy_from_slice(&data[..m]);
            }
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---

#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::datatype::Equivalence;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// Inter-process backend over MPI world ranks.
    pub struct MpiComm {
        world: SimpleCommunicator,
    }

    // MPI_Comm handles are plain integers; callers that drive this backend
    // from threads must initialize MPI with threading support.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        /// Initialize MPI and bind to the world communicator.
        ///
        /// Finalization is intentionally skipped (the universe is leaked):
        /// partitioners hold the communicator for the process lifetime and
        /// the ranks exit together.
        pub fn new() -> Self {
            let universe = mpi::initialize().expect("MPI already initialized");
            let world = universe.world();
            std::mem::forget(universe);
            Self { world }
        }
    }

    impl Default for MpiComm {
        fn default() -> Self {
            Self::new()
        }
    }

    pub struct MpiSendHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        buf: *mut [u8],
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                req.wait_without_status();
            }
            // Sole owner again once the request completed.
            unsafe { drop(Box::from_raw(self.buf)) };
            None
        }
    }

    pub struct MpiRecvHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        buf: *mut [u8],
    }

    impl Wait for MpiRecvHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            let req = self.req.take()?;
            let status = req.wait();
            let data = unsafe { Box::from_raw(self.buf) };
            let n = status.count(u8::equivalent_datatype()).max(0) as usize;
            let mut v = Vec::from(data);
            v.truncate(n);
            Some(v)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.world.rank() as usize
        }

        fn size(&self) -> usize {
            self.world.size() as usize
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let ptr = Box::into_raw(buf.to_vec().into_boxed_slice());
            // The allocation outlives the request; reclaimed in wait().
            let slice: &'static [u8] = unsafe { &*ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, slice, i32::from(tag));
            MpiSendHandle {
                req: Some(req),
                buf: ptr,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            let ptr = Box::into_raw(vec![0u8; buf.len()].into_boxed_slice());
            let slice: &'static mut [u8] = unsafe { &mut *ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, slice, i32::from(tag));
            MpiRecvHandle {
                req: Some(req),
                buf: ptr,
            }
        }

        fn allgather(&self, send: &[u8], recv: &mut [u8]) {
            self.world.all_gather_into(send, recv);
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
