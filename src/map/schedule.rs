//! `ExchangeSchedule` / `PeerLeg`: the ordered, rank-local plan for one
//! direction (send or recv) of a [`super::Map`], and the pure assembly
//! rule that turns resolved [`super::broker::MatchTuple`]s into one.

use super::broker::MatchTuple;

/// The data exchange with one specific peer in one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerLeg {
    pub peer_rank: i32,
    pub leg_size: usize,
}

/// The ordered set of legs for one direction (send or recv) on one rank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeSchedule {
    pub peers: Vec<PeerLeg>,
    pub buffer_size: usize,
    /// Gather/scatter permutation: local-slot indices, length
    /// `buffer_size`, concatenated leg by leg in `peers` order.
    pub buffer_indices: Vec<usize>,
    /// Start offset of each leg within `buffer_indices`/the staging
    /// buffer; length `peers.len() + 1`, with the last entry equal to
    /// `buffer_size`.
    pub buffer_offsets: Vec<usize>,
}

impl ExchangeSchedule {
    pub fn count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn from_sorted_legs(legs: Vec<(i32, Vec<usize>)>) -> Self {
        let mut peers = Vec::with_capacity(legs.len());
        let mut buffer_indices = Vec::new();
        let mut buffer_offsets = Vec::with_capacity(legs.len() + 1);
        buffer_offsets.push(0);

        for (peer_rank, slots) in legs {
            peers.push(PeerLeg {
                peer_rank,
                leg_size: slots.len(),
            });
            buffer_indices.extend(slots);
            buffer_offsets.push(buffer_indices.len());
        }

        let buffer_size = buffer_indices.len();
        Self {
            peers,
            buffer_size,
            buffer_indices,
            buffer_offsets,
        }
    }
}

/// Build this rank's send and recv schedules from the match tuples it
/// learned about in phase 3 (where it appears as `owner` and as `wanter`
/// respectively).
///
/// Send: grouped by `wanter` ascending; within a group, ordered by
/// `dst_slot` ascending (so the receiver can scatter in one sequential
/// pass), ties broken by `owner` then `src_slot` ascending.
/// Recv: grouped by `owner` ascending; within a group, same ordering rule.
/// This shared rule is what makes the send/recv permutations agree
/// element-for-element without further coordination.
pub fn build_schedules(tuples: &[MatchTuple], me: i32) -> (ExchangeSchedule, ExchangeSchedule) {
    let mut send_tuples: Vec<&MatchTuple> = tuples.iter().filter(|t| t.owner == me).collect();
    let mut recv_tuples: Vec<&MatchTuple> = tuples.iter().filter(|t| t.wanter == me).collect();

    let order_key = |t: &&MatchTuple| (t.dst_slot, t.owner, t.src_slot);
    send_tuples.sort_by_key(order_key);
    recv_tuples.sort_by_key(order_key);

    let send = ExchangeSchedule::from_sorted_legs(group_by_peer(
        &send_tuples,
        |t| t.wanter,
        |t| t.src_slot as usize,
    ));
    let recv = ExchangeSchedule::from_sorted_legs(group_by_peer(
        &recv_tuples,
        |t| t.owner,
        |t| t.dst_slot as usize,
    ));

    (send, recv)
}

/// Group an already-ordered slice of tuples by peer rank (ascending),
/// preserving the relative order within each peer's group.
fn group_by_peer(
    tuples: &[&MatchTuple],
    peer_of: impl Fn(&MatchTuple) -> i32,
    slot_of: impl Fn(&MatchTuple) -> usize,
) -> Vec<(i32, Vec<usize>)> {
    let mut by_peer: std::collections::BTreeMap<i32, Vec<usize>> = std::collections::BTreeMap::new();
    for &t in tuples {
        by_peer.entry(peer_of(t)).or_default().push(slot_of(t));
    }
    by_peer.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(owner: i32, src_slot: u64, wanter: i32, dst_slot: u64) -> MatchTuple {
        MatchTuple {
            owner,
            src_slot,
            wanter,
            dst_slot,
        }
    }

    #[test]
    fn send_schedule_groups_by_wanter_ascending() {
        let tuples = vec![
            tuple(0, 0, 3, 1),
            tuple(0, 1, 2, 0),
            tuple(0, 2, 3, 0),
        ];
        let (send, _recv) = build_schedules(&tuples, 0);
        assert_eq!(send.count(), 2);
        assert_eq!(send.peers[0].peer_rank, 2);
        assert_eq!(send.peers[1].peer_rank, 3);
        assert_eq!(send.buffer_offsets, vec![0, 1, 3]);
        // peer 3 group ordered by dst_slot ascending: slot0(src=2) before slot1(src=0)
        assert_eq!(&send.buffer_indices[1..3], &[2, 0]);
    }

    #[test]
    fn recv_schedule_groups_by_owner_ascending() {
        let tuples = vec![tuple(1, 4, 0, 0), tuple(2, 9, 0, 1)];
        let (_send, recv) = build_schedules(&tuples, 0);
        assert_eq!(recv.count(), 2);
        assert_eq!(recv.peers[0].peer_rank, 1);
        assert_eq!(recv.peers[1].peer_rank, 2);
        assert_eq!(recv.buffer_indices, vec![0, 1]);
    }

    #[test]
    fn buffer_offsets_terminate_at_buffer_size() {
        let tuples = vec![tuple(0, 0, 1, 0), tuple(0, 1, 1, 1), tuple(0, 2, 2, 0)];
        let (send, _recv) = build_schedules(&tuples, 0);
        assert_eq!(*send.buffer_offsets.last().unwrap(), send.buffer_size);
    }

    #[test]
    fn ranks_not_involved_get_empty_schedules() {
        let tuples = vec![tuple(5, 0, 6, 0)];
        let (send, recv) = build_schedules(&tuples, 1);
        assert!(send.is_empty());
        assert!(recv.is_empty());
        assert_eq!(send.buffer_size, 0);
        assert_eq!(recv.buffer_size, 0);
    }
}
