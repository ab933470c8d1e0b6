//! Fixed little-endian wire types for discovery traffic.
//!
//! Exchange epochs move caller payloads verbatim; only target discovery
//! puts structured records on the wire, and those are pinned here. All
//! multi-byte integers are **little-endian**: stored pre-LE with `.to_le()`
//! and decoded with `from_le`.

use bytemuck::{Pod, Zeroable};
use static_assertions::{assert_eq_align, assert_eq_size};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Count of records in a following payload message.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// A global index carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireGlobalIndex {
    pub id_le: u64,
}

impl WireGlobalIndex {
    pub fn of(id: u64) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

/// A half-open owned range `[begin, end)` announced in the rank-layout
/// allgather.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireRange {
    pub begin_le: u64,
    pub end_le: u64,
}

impl WireRange {
    pub fn new(begin: u64, end: u64) -> Self {
        Self {
            begin_le: begin.to_le(),
            end_le: end.to_le(),
        }
    }
    pub fn begin(&self) -> u64 {
        u64::from_le(self.begin_le)
    }
    pub fn end(&self) -> u64 {
        u64::from_le(self.end_le)
    }
}

// Pod/Zeroable ensures no padding contains uninit when cast to bytes.
assert_eq_size!(WireCount, u64);
assert_eq_size!(WireGlobalIndex, u64);
assert_eq_size!(WireRange, [u64; 2]);
assert_eq_align!(WireRange, u64);
