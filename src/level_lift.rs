//! Derives a higher-rank [`Map`] from a base map by replicating its
//! schedule across a contiguous extra dimension ("levels"), without
//! re-running the negotiation. Purely local: no transport traffic.

use crate::error::{Error, Result};
use crate::map::schedule::{ExchangeSchedule, PeerLeg};
use crate::map::Map;

impl Map {
    /// Produce a new `Map` over the logical index space `self × {0..nlevels}`.
    ///
    /// Each peer leg's size is multiplied by `nlevels`; a leg's
    /// `buffer_indices` are expanded so that every original local slot `s`
    /// becomes `nlevels` lifted slots `s + L * stride` for
    /// `L in 0..nlevels`, where `stride` is the local element count of the
    /// `IndexList` on the corresponding role side (source for the send
    /// schedule, destination for the recv schedule).
    pub fn lift(&self, nlevels: usize) -> Result<Map> {
        if nlevels == 0 {
            return Err(Error::GroupInconsistent(
                "LevelLift requires nlevels >= 1".to_string(),
            ));
        }

        let send = lift_schedule(self.send(), nlevels, self.src_len());
        let recv = lift_schedule(self.recv(), nlevels, self.dst_len());

        Ok(Map::from_parts(
            send,
            recv,
            self.group().clone(),
            self.src_len() * nlevels,
            self.dst_len() * nlevels,
        ))
    }
}

fn lift_schedule(base: &ExchangeSchedule, nlevels: usize, stride: usize) -> ExchangeSchedule {
    let mut peers = Vec::with_capacity(base.peers.len());
    let mut buffer_indices = Vec::with_capacity(base.buffer_size * nlevels);
    let mut buffer_offsets = Vec::with_capacity(base.peers.len() + 1);
    buffer_offsets.push(0);

    for (leg_idx, leg) in base.peers.iter().enumerate() {
        let start = base.buffer_offsets[leg_idx];
        let end = base.buffer_offsets[leg_idx + 1];
        for level in 0..nlevels {
            for &slot in &base.buffer_indices[start..end] {
                buffer_indices.push(slot + level * stride);
            }
        }
        peers.push(PeerLeg {
            peer_rank: leg.peer_rank,
            leg_size: leg.leg_size * nlevels,
        });
        buffer_offsets.push(buffer_indices.len());
    }

    let buffer_size = buffer_indices.len();
    ExchangeSchedule {
        peers,
        buffer_size,
        buffer_indices,
        buffer_offsets,
    }
}
