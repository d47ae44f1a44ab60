//! Transport-free core of map construction: bucketing, broker matching,
//! and diagnostic collection.
//!
//! These are pure functions over plain in-memory records. [`super::Map::new`]
//! drives them with real collective calls, but every rule that actually
//! decides what a schedule looks like — bucket assignment, lowest-rank-wins
//! tie-breaking, unmatched-index detection — lives here, where it can be
//! unit-tested by simulating several ranks' local state directly in one
//! test process.

use std::collections::HashMap;

/// This rank's claim to own global index `index` at local slot `src_slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRecord {
    pub index: i64,
    pub owner: i32,
    pub src_slot: u64,
}

/// This rank's request for global index `index` to land at local slot
/// `dst_slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestRecord {
    pub index: i64,
    pub wanter: i32,
    pub dst_slot: u64,
}

/// A resolved match: `owner` must send what it calls `src_slot` to
/// `wanter`, which will place it at `dst_slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchTuple {
    pub owner: i32,
    pub src_slot: u64,
    pub wanter: i32,
    pub dst_slot: u64,
}

/// A destination index with no source owner anywhere in the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmatchedDiag {
    pub index: i64,
    pub wanter: i32,
}

/// Deterministic bucket assignment used to route records to their broker.
/// Identical on every rank by construction; `num_buckets` is normally the
/// group size (one broker per rank).
pub fn bucket_of(index: i64, num_buckets: i32) -> i32 {
    debug_assert!(num_buckets > 0);
    let m = index % num_buckets as i64;
    ((m + num_buckets as i64) % num_buckets as i64) as i32
}

/// Partition this rank's local source indices into per-broker record
/// lists, one list per bucket, ready to be routed by an all-to-all-v.
pub fn bucket_sources(indices: &[i64], owner: i32, num_buckets: i32) -> Vec<Vec<SourceRecord>> {
    let mut out = vec![Vec::new(); num_buckets as usize];
    for (slot, &index) in indices.iter().enumerate() {
        let bucket = bucket_of(index, num_buckets) as usize;
        out[bucket].push(SourceRecord {
            index,
            owner,
            src_slot: slot as u64,
        });
    }
    out
}

/// Partition this rank's local destination indices into per-broker record
/// lists, symmetric to [`bucket_sources`].
pub fn bucket_dests(indices: &[i64], wanter: i32, num_buckets: i32) -> Vec<Vec<DestRecord>> {
    let mut out = vec![Vec::new(); num_buckets as usize];
    for (slot, &index) in indices.iter().enumerate() {
        let bucket = bucket_of(index, num_buckets) as usize;
        out[bucket].push(DestRecord {
            index,
            wanter,
            dst_slot: slot as u64,
        });
    }
    out
}

/// Outcome of one broker resolving the bucket it is responsible for.
#[derive(Debug, Default)]
pub struct BrokerOutcome {
    pub matches: Vec<MatchTuple>,
    pub unmatched: Vec<UnmatchedDiag>,
    /// Indices where a source claim from one rank overrode a source claim
    /// from another; empty in the common case of no duplicate ownership.
    pub duplicate_owners: Vec<(i64, i32, i32)>,
}

/// Resolve all source/destination records routed to one broker bucket.
///
/// Builds an `index -> (owner, src_slot)` map from `sources`, resolving
/// duplicate claims by lowest-rank-wins, then resolves every `dests`
/// record against it: a hit produces a [`MatchTuple`], a miss produces an
/// [`UnmatchedDiag`].
pub fn match_at_broker(sources: &[SourceRecord], dests: &[DestRecord]) -> BrokerOutcome {
    let mut owners: HashMap<i64, (i32, u64)> = HashMap::with_capacity(sources.len());
    let mut duplicate_owners = Vec::new();

    for rec in sources {
        match owners.get(&rec.index) {
            None => {
                owners.insert(rec.index, (rec.owner, rec.src_slot));
            }
            Some(&(existing_owner, existing_slot)) => {
                if rec.owner < existing_owner {
                    duplicate_owners.push((rec.index, rec.owner, existing_owner));
                    owners.insert(rec.index, (rec.owner, rec.src_slot));
                } else if rec.owner > existing_owner {
                    duplicate_owners.push((rec.index, existing_owner, rec.owner));
                } else {
                    // Same rank emitted the same index twice as a source:
                    // not a cross-rank conflict, first slot wins.
                    let _ = existing_slot;
                }
            }
        }
    }

    let mut matches = Vec::with_capacity(dests.len());
    let mut unmatched = Vec::new();
    for rec in dests {
        match owners.get(&rec.index) {
            Some(&(owner, src_slot)) => matches.push(MatchTuple {
                owner,
                src_slot,
                wanter: rec.wanter,
                dst_slot: rec.dst_slot,
            }),
            None => unmatched.push(UnmatchedDiag {
                index: rec.index,
                wanter: rec.wanter,
            }),
        }
    }

    BrokerOutcome {
        matches,
        unmatched,
        duplicate_owners,
    }
}

/// Route a match tuple to the rank(s) that need to learn about it: its
/// owner (who must send) and its wanter (who must receive). When a rank is
/// both the owner and the wanter of the same index (legal: nothing in §3
/// forbids a rank requesting an index it also owns), the tuple is routed
/// there only once — otherwise it would arrive twice and double-count into
/// both the send and recv schedule for that peer. Used by `Map::new` to
/// build the phase-3 dissemination payload.
pub fn dissemination_targets(tuple: &MatchTuple) -> impl Iterator<Item = i32> {
    let wanter = if tuple.wanter == tuple.owner {
        None
    } else {
        Some(tuple.wanter)
    };
    std::iter::once(tuple.owner).chain(wanter)
}
