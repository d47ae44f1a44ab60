//! Thin wrapper over the transport's all-to-all primitives.
//!
//! `Map::new`'s three phases (bucketing, broker matching, dissemination)
//! each boil down to "every rank has a variable-length payload for every
//! other rank; exchange them all." This module hides the
//! counts-then-payload dance required to drive `mpi`'s variable-count
//! collectives behind one generic function, the way a production
//! transport layer would.

use mpi::datatype::{Equivalence, Partition, PartitionMut};
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

use crate::error::{Error, Result};

/// Exchange variable-length per-destination payloads: `send[d]` is this
/// rank's payload for rank `d`. Returns `recv[s]`, the payload this rank
/// received from rank `s`. `send.len()` and the returned vector's length
/// both equal `comm.size()`.
pub(crate) fn all_to_all_varcount<T>(comm: &SimpleCommunicator, send: &[Vec<T>]) -> Result<Vec<Vec<T>>>
where
    T: Equivalence + Copy + Default,
{
    let size = comm.size() as usize;
    if send.len() != size {
        return Err(Error::GroupInconsistent(format!(
            "all_to_all_varcount: expected one payload per rank ({size}), got {}",
            send.len()
        )));
    }

    // Phase A: exchange counts so every rank knows how much it will
    // receive from every other rank.
    let send_counts: Vec<Count> = send.iter().map(|v| v.len() as Count).collect();
    let mut recv_counts = vec![0 as Count; size];
    comm.all_to_all_into(&send_counts, &mut recv_counts);

    // Phase B: flatten the send side into one contiguous buffer with
    // displacements, exchange the payloads, then unflatten the recv side.
    let send_displs = displacements(&send_counts);
    let flat_send: Vec<T> = send.iter().flatten().copied().collect();

    let recv_displs = displacements(&recv_counts);
    let total_recv = recv_counts.iter().sum::<Count>() as usize;
    let mut flat_recv = vec![T::default(); total_recv];

    {
        let send_partition = Partition::new(&flat_send, send_counts.clone(), send_displs.clone());
        let mut recv_partition =
            PartitionMut::new(&mut flat_recv, recv_counts.clone(), recv_displs.clone());
        comm.all_to_all_varcount_into(&send_partition, &mut recv_partition);
    }

    let mut out = Vec::with_capacity(size);
    for rank in 0..size {
        let start = recv_displs[rank] as usize;
        let len = recv_counts[rank] as usize;
        out.push(flat_recv[start..start + len].to_vec());
    }
    Ok(out)
}

/// Gather every rank's payload to every rank (Allgatherv).
pub(crate) fn all_gather_varcount<T>(comm: &SimpleCommunicator, local: &[T]) -> Result<Vec<T>>
where
    T: Equivalence + Copy + Default,
{
    let size = comm.size() as usize;
    let local_count = local.len() as Count;
    let mut counts = vec![0 as Count; size];
    comm.all_gather_into(&local_count, &mut counts);

    let displs = displacements(&counts);
    let total = counts.iter().sum::<Count>() as usize;
    let mut recv = vec![T::default(); total];

    {
        let mut recv_partition = PartitionMut::new(&mut recv, counts, displs);
        comm.all_gather_varcount_into(local, &mut recv_partition);
    }
    Ok(recv)
}

fn displacements(counts: &[Count]) -> Vec<Count> {
    let mut displs = Vec::with_capacity(counts.len());
    let mut running = 0;
    for &c in counts {
        displs.push(running);
        running += c;
    }
    displs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displacements_are_cumulative() {
        assert_eq!(displacements(&[3, 0, 2, 5]), vec![0, 3, 3, 5]);
        assert_eq!(displacements(&[]), Vec::<Count>::new());
    }
}
