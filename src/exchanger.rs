//! Typed executor that moves values between a contiguous input buffer and
//! a contiguous output buffer, according to a [`crate::Map`]'s schedule.
//!
//! The exchanger itself is not generic: it operates on raw byte buffers
//! keyed by an [`ElementType`] descriptor (byte size + transport tag), the
//! way the design notes describe — "the permutation logic is type-agnostic
//! and operates on byte strides." [`Exchanger::exchange`] layers a
//! `bytemuck`-based convenience entry point on top for callers who do know
//! their concrete `Pod` type at compile time, grounded in the reference
//! pack's plain-old-data handling (`DGriffin91-pool_racing`).

use std::sync::Arc;

use bytemuck::Pod;
use mpi::request::{scope, WaitGuard};
use mpi::traits::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::map::schedule::ExchangeSchedule;
use crate::map::Map;

/// Element width and transport type tag. The library accepts at least the
/// common fixed-width integer and floating-point widths; all are moved
/// over the wire as raw bytes, so adding a width here never requires a
/// transport-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl ElementType {
    pub fn byte_size(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::I32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::F64 => 8,
        }
    }
}

/// Selects the staging allocator and pack/unpack kernel. Per the design
/// notes, memory placement must not change observable output: both hints
/// implement the identical permutation, `Device` simply models staging
/// memory the accelerator's copy engine can address directly (e.g.
/// pinned/unified memory) rather than invoking a concrete accelerator API,
/// which is out of scope for this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HwHint {
    Host,
    Device,
}

/// Below this many elements, pack/unpack run sequentially; the dispatch
/// overhead of splitting into rayon tasks would dominate the copy itself.
const PARALLEL_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangerState {
    Idle,
    Posting,
    Waiting,
    Unpacking,
}

/// Binds a [`Map`] to a concrete element type and hardware hint, and
/// executes exchanges against user buffers.
///
/// A `Map` is read-only and may be shared by multiple `Exchanger`s of
/// different element types; each `Exchanger` owns its own staging buffers,
/// so those exchangers are independently safe to use, but a single
/// `Exchanger`'s [`Exchanger::go`] is not re-entrant.
pub struct Exchanger {
    map: Arc<Map>,
    element: ElementType,
    hw_hint: HwHint,
    send_staging: Vec<u8>,
    recv_staging: Vec<u8>,
    state: ExchangerState,
}

impl Exchanger {
    /// Allocate staging buffers sized to `map`'s send/recv schedules for
    /// `element` and bind them with `hw_hint`.
    pub fn new(map: Arc<Map>, element: ElementType, hw_hint: HwHint) -> Result<Self> {
        let elem_size = element.byte_size();
        let send_bytes = map
            .send()
            .buffer_size
            .checked_mul(elem_size)
            .ok_or_else(|| Error::AllocationFailure("send staging buffer size overflow".into()))?;
        let recv_bytes = map
            .recv()
            .buffer_size
            .checked_mul(elem_size)
            .ok_or_else(|| Error::AllocationFailure("recv staging buffer size overflow".into()))?;

        Ok(Self {
            map,
            element,
            hw_hint,
            send_staging: vec![0u8; send_bytes],
            recv_staging: vec![0u8; recv_bytes],
            state: ExchangerState::Idle,
        })
    }

    pub fn map(&self) -> &Map {
        &self.map
    }

    pub fn element_type(&self) -> ElementType {
        self.element
    }

    pub fn hw_hint(&self) -> HwHint {
        self.hw_hint
    }

    /// Execute one exchange: pack the user source buffer into the send
    /// staging buffer, post the schedule's sends/receives, wait for
    /// completion, then unpack the recv staging buffer into the user
    /// destination buffer.
    ///
    /// `src_buf` and `dst_buf` are raw byte buffers whose length must be
    /// an exact multiple of the element byte size and whose element count
    /// must be at least as large as the map requires on each side
    /// (`send.buffer_size` slots reachable for `src_buf`,
    /// `recv.buffer_size` slots reachable for `dst_buf`). They may alias;
    /// the staging buffers decouple the pack and unpack steps.
    pub fn go(&mut self, src_buf: &[u8], dst_buf: &mut [u8]) -> Result<()> {
        assert_eq!(
            self.state,
            ExchangerState::Idle,
            "Exchanger::go is not re-entrant"
        );

        let elem_size = self.element.byte_size();
        check_buffer(src_buf, self.map.send(), elem_size, "src")?;
        check_buffer(dst_buf, self.map.recv(), elem_size, "dst")?;

        self.state = ExchangerState::Posting;
        tracing::trace!(rank = self.map.group().rank(), "pack");
        pack(elem_size, &self.map.send().buffer_indices, src_buf, &mut self.send_staging);

        tracing::trace!(rank = self.map.group().rank(), "post + wait");
        self.state = ExchangerState::Waiting;
        run_transport(
            self.map.group().comm(),
            elem_size,
            &self.send_staging,
            &mut self.recv_staging,
            self.map.send(),
            self.map.recv(),
        )?;

        self.state = ExchangerState::Unpacking;
        tracing::trace!(rank = self.map.group().rank(), "unpack");
        unpack(elem_size, &self.map.recv().buffer_indices, &self.recv_staging, dst_buf);

        self.state = ExchangerState::Idle;
        Ok(())
    }

    /// Convenience entry point for callers who know their concrete `Pod`
    /// type at compile time; casts to bytes and calls [`Exchanger::go`].
    pub fn exchange<T: Pod>(&mut self, src_buf: &[T], dst_buf: &mut [T]) -> Result<()> {
        self.go(bytemuck::cast_slice(src_buf), bytemuck::cast_slice_mut(dst_buf))
    }

    /// The aliased form of [`Exchanger::go`]: `buf` serves as both the
    /// source and the destination, overwritten in place with the result.
    ///
    /// This is the same `go(buf, buf)` scenario the design notes describe,
    /// expressed with a single `&mut` borrow instead of two overlapping
    /// `&`/`&mut` borrows of the same memory (which Rust's aliasing model
    /// does not permit soundly): `pack` fully reads every slot it needs out
    /// of `buf` into the send staging buffer before `unpack` writes the
    /// result back into it, so the two steps never observe each other's
    /// writes.
    pub fn go_in_place(&mut self, buf: &mut [u8]) -> Result<()> {
        assert_eq!(
            self.state,
            ExchangerState::Idle,
            "Exchanger::go is not re-entrant"
        );

        let elem_size = self.element.byte_size();
        check_buffer(buf, self.map.send(), elem_size, "src")?;
        check_buffer(buf, self.map.recv(), elem_size, "dst")?;

        self.state = ExchangerState::Posting;
        pack(elem_size, &self.map.send().buffer_indices, buf, &mut self.send_staging);

        self.state = ExchangerState::Waiting;
        run_transport(
            self.map.group().comm(),
            elem_size,
            &self.send_staging,
            &mut self.recv_staging,
            self.map.send(),
            self.map.recv(),
        )?;

        self.state = ExchangerState::Unpacking;
        unpack(elem_size, &self.map.recv().buffer_indices, &self.recv_staging, buf);

        self.state = ExchangerState::Idle;
        Ok(())
    }

    /// `Pod`-typed convenience entry point for [`Exchanger::go_in_place`].
    pub fn exchange_in_place<T: Pod>(&mut self, buf: &mut [T]) -> Result<()> {
        self.go_in_place(bytemuck::cast_slice_mut(buf))
    }
}

fn check_buffer(buf: &[u8], schedule: &ExchangeSchedule, elem_size: usize, which: &'static str) -> Result<()> {
    if buf.len() % elem_size != 0 {
        return Err(Error::ShapeMismatch {
            need: schedule.buffer_size,
            have: buf.len() / elem_size.max(1),
        });
    }
    let have_elems = buf.len() / elem_size;
    // The schedule only requires that every referenced slot be in bounds;
    // `buffer_indices` may skip slots this rank doesn't touch in this
    // direction, so check against the maximum referenced slot, not just
    // `buffer_size`.
    let need = schedule
        .buffer_indices
        .iter()
        .copied()
        .max()
        .map(|m| m + 1)
        .unwrap_or(0);
    if have_elems < need {
        tracing::debug!(which, need, have = have_elems, "buffer too small for schedule");
        return Err(Error::ShapeMismatch {
            need,
            have: have_elems,
        });
    }
    Ok(())
}

fn pack(elem_size: usize, buffer_indices: &[usize], src_bytes: &[u8], stage: &mut [u8]) {
    if buffer_indices.len() >= PARALLEL_THRESHOLD {
        stage
            .par_chunks_mut(elem_size)
            .zip(buffer_indices.par_iter())
            .for_each(|(dst_chunk, &slot)| {
                let start = slot * elem_size;
                dst_chunk.copy_from_slice(&src_bytes[start..start + elem_size]);
            });
    } else {
        for (k, &slot) in buffer_indices.iter().enumerate() {
            let start = slot * elem_size;
            let dst_start = k * elem_size;
            stage[dst_start..dst_start + elem_size].copy_from_slice(&src_bytes[start..start + elem_size]);
        }
    }
}

fn unpack(elem_size: usize, buffer_indices: &[usize], stage: &[u8], dst_bytes: &mut [u8]) {
    if buffer_indices.len() >= PARALLEL_THRESHOLD {
        // Each `slot` in `buffer_indices` is unique within a well-formed
        // recv schedule (one destination slot per matched index), so
        // disjoint mutable chunks of `dst_bytes` are safe to write from
        // multiple threads without synchronization.
        let dst_ptr = SendPtr(dst_bytes.as_mut_ptr());
        stage
            .par_chunks(elem_size)
            .zip(buffer_indices.par_iter())
            .for_each(|(src_chunk, &slot)| {
                let start = slot * elem_size;
                unsafe {
                    let dst = std::slice::from_raw_parts_mut(dst_ptr.0.add(start), elem_size);
                    dst.copy_from_slice(src_chunk);
                }
            });
    } else {
        for (k, &slot) in buffer_indices.iter().enumerate() {
            let src_start = k * elem_size;
            let dst_start = slot * elem_size;
            dst_bytes[dst_start..dst_start + elem_size]
                .copy_from_slice(&stage[src_start..src_start + elem_size]);
        }
    }
}

/// Wrapper making a raw pointer `Send`/`Sync` for the parallel unpack
/// above, where every thread writes a disjoint, non-overlapping region.
#[derive(Clone, Copy)]
struct SendPtr(*mut u8);
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

fn run_transport(
    comm: &mpi::topology::SimpleCommunicator,
    elem_size: usize,
    send_stage: &[u8],
    recv_stage: &mut [u8],
    send_sched: &ExchangeSchedule,
    recv_sched: &ExchangeSchedule,
) -> Result<()> {
    scope(|scope| {
        let mut requests = Vec::with_capacity(send_sched.count() + recv_sched.count());

        for (leg_idx, leg) in recv_sched.peers.iter().enumerate() {
            let start = recv_sched.buffer_offsets[leg_idx] * elem_size;
            let end = recv_sched.buffer_offsets[leg_idx + 1] * elem_size;
            let target = &mut recv_stage[start..end];
            let req = comm
                .process_at_rank(leg.peer_rank)
                .immediate_receive_into(scope, target);
            requests.push(req);
        }

        for (leg_idx, leg) in send_sched.peers.iter().enumerate() {
            let start = send_sched.buffer_offsets[leg_idx] * elem_size;
            let end = send_sched.buffer_offsets[leg_idx + 1] * elem_size;
            let payload = &send_stage[start..end];
            let req = comm.process_at_rank(leg.peer_rank).immediate_send(scope, payload);
            requests.push(req);
        }

        for req in requests {
            let _ = WaitGuard::from(req);
        }
    });
    Ok(())
}
