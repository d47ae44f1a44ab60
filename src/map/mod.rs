//! The negotiated redistribution plan between a source and a destination
//! [`crate::IndexList`] — the heart of the crate.
//!
//! [`Map::new`] is collective over every rank in a [`crate::Group`]: it
//! runs the three-phase bucket/broker/disseminate negotiation described in
//! the top-level design notes and returns a `Map` holding this rank's send
//! and recv [`schedule::ExchangeSchedule`]s. Everything after construction
//! is pure, rank-local data.

pub mod broker;
pub mod schedule;

use crate::error::{Error, Result};
use crate::group::Group;
use crate::index_list::IndexList;
use crate::transport;

use crate::config::DistdirConfig;
use broker::{match_at_broker, BrokerOutcome, DestRecord, MatchTuple, SourceRecord, UnmatchedDiag};
use schedule::{build_schedules, ExchangeSchedule};

/// The negotiated redistribution plan between a source and destination
/// `IndexList`, bound to a transport group.
#[derive(Debug, Clone)]
pub struct Map {
    send: ExchangeSchedule,
    recv: ExchangeSchedule,
    group: Group,
    /// Local element counts of the `IndexList`s this map was built from,
    /// on the source and destination side respectively. Only needed to
    /// derive the per-level stride in [`Map::lift`]; not part of the
    /// schedule itself.
    src_len: usize,
    dst_len: usize,
}

/// Wire-format source record used by the phase-1 bucketing exchange.
#[derive(Debug, Clone, Copy, Default, mpi::traits::Equivalence)]
struct WireSourceRecord {
    index: i64,
    owner: i32,
    src_slot: i64,
}

#[derive(Debug, Clone, Copy, Default, mpi::traits::Equivalence)]
struct WireDestRecord {
    index: i64,
    wanter: i32,
    dst_slot: i64,
}

#[derive(Debug, Clone, Copy, Default, mpi::traits::Equivalence)]
struct WireMatchTuple {
    owner: i32,
    src_slot: i64,
    wanter: i32,
    dst_slot: i64,
}

#[derive(Debug, Clone, Copy, Default, mpi::traits::Equivalence)]
struct WireUnmatchedDiag {
    index: i64,
    wanter: i32,
}

/// Wire-format duplicate-owner diagnostic, gathered from every rank so that
/// the `strict_duplicate_owner` decision is made identically everywhere
/// (see the collective-symmetry note on `Map::new_with_config`).
#[derive(Debug, Clone, Copy, Default, mpi::traits::Equivalence)]
struct WireDuplicateOwner {
    index: i64,
    first_owner: i32,
    other_owner: i32,
}

impl From<SourceRecord> for WireSourceRecord {
    fn from(r: SourceRecord) -> Self {
        Self {
            index: r.index,
            owner: r.owner,
            src_slot: r.src_slot as i64,
        }
    }
}
impl From<WireSourceRecord> for SourceRecord {
    fn from(r: WireSourceRecord) -> Self {
        Self {
            index: r.index,
            owner: r.owner,
            src_slot: r.src_slot as u64,
        }
    }
}
impl From<DestRecord> for WireDestRecord {
    fn from(r: DestRecord) -> Self {
        Self {
            index: r.index,
            wanter: r.wanter,
            dst_slot: r.dst_slot as i64,
        }
    }
}
impl From<WireDestRecord> for DestRecord {
    fn from(r: WireDestRecord) -> Self {
        Self {
            index: r.index,
            wanter: r.wanter,
            dst_slot: r.dst_slot as u64,
        }
    }
}
impl From<MatchTuple> for WireMatchTuple {
    fn from(t: MatchTuple) -> Self {
        Self {
            owner: t.owner,
            src_slot: t.src_slot as i64,
            wanter: t.wanter,
            dst_slot: t.dst_slot as i64,
        }
    }
}
impl From<WireMatchTuple> for MatchTuple {
    fn from(t: WireMatchTuple) -> Self {
        Self {
            owner: t.owner,
            src_slot: t.src_slot as u64,
            wanter: t.wanter,
            dst_slot: t.dst_slot as u64,
        }
    }
}
impl From<UnmatchedDiag> for WireUnmatchedDiag {
    fn from(d: UnmatchedDiag) -> Self {
        Self {
            index: d.index,
            wanter: d.wanter,
        }
    }
}
impl From<WireUnmatchedDiag> for UnmatchedDiag {
    fn from(d: WireUnmatchedDiag) -> Self {
        Self {
            index: d.index,
            wanter: d.wanter,
        }
    }
}

impl Map {
    /// Negotiate a redistribution plan between `src` (this rank's source
    /// contribution) and `dst` (this rank's destination contribution).
    /// Collective over every rank in `group`.
    ///
    /// `stride_hint` is advisory only (`-1` canonically disables it); it
    /// must never change the resulting schedule, per the invariant in the
    /// top-level design notes.
    pub fn new(src: &IndexList, dst: &IndexList, stride_hint: i64, group: &Group) -> Result<Self> {
        Self::new_with_config(src, dst, stride_hint, group, &DistdirConfig::default())
    }

    /// Same as [`Map::new`], but honors [`DistdirConfig::strict_duplicate_owner`]:
    /// when set, a rank claiming the same source index as a lower rank is
    /// promoted from a logged warning to a hard [`Error::DuplicateOwner`].
    #[tracing::instrument(skip(src, dst, group, config), fields(rank = group.rank(), size = group.size()))]
    pub fn new_with_config(
        src: &IndexList,
        dst: &IndexList,
        stride_hint: i64,
        group: &Group,
        config: &DistdirConfig,
    ) -> Result<Self> {
        let _ = stride_hint; // advisory only; never affects the schedule below
        let comm = group.comm();
        let size = group.size();
        let me = group.rank();

        if size < 1 {
            return Err(Error::GroupTooSmall {
                need: 1,
                have: size.max(0) as usize,
            });
        }

        // Phase 1: bucket this rank's local records and exchange them so
        // every rank ends up with all records for the bucket it brokers.
        tracing::debug!("phase 1: bucketing {} src / {} dst indices", src.count(), dst.count());
        let source_buckets = broker::bucket_sources(src.as_slice(), me, size);
        let dest_buckets = broker::bucket_dests(dst.as_slice(), me, size);

        let wire_sources: Vec<Vec<WireSourceRecord>> = source_buckets
            .into_iter()
            .map(|bucket| bucket.into_iter().map(Into::into).collect())
            .collect();
        let wire_dests: Vec<Vec<WireDestRecord>> = dest_buckets
            .into_iter()
            .map(|bucket| bucket.into_iter().map(Into::into).collect())
            .collect();

        let my_sources = transport::all_to_all_varcount(comm, &wire_sources)?
            .into_iter()
            .flatten()
            .map(SourceRecord::from)
            .collect::<Vec<_>>();
        let my_dests = transport::all_to_all_varcount(comm, &wire_dests)?
            .into_iter()
            .flatten()
            .map(DestRecord::from)
            .collect::<Vec<_>>();

        // Phase 2: as broker for bucket `me`, resolve every destination
        // record against the source records routed here.
        tracing::debug!(
            "phase 2: matching {} src records against {} dst records",
            my_sources.len(),
            my_dests.len()
        );
        let BrokerOutcome {
            matches,
            unmatched,
            duplicate_owners,
        } = match_at_broker(&my_sources, &my_dests);

        for (index, first_owner, other_owner) in &duplicate_owners {
            tracing::warn!(
                index,
                first_owner,
                other_owner,
                "duplicate owner for global index; lowest rank wins"
            );
        }

        // `duplicate_owners` only reflects what *this* rank saw while
        // brokering its own bucket; a conflict may surface on only one or
        // two ranks in the whole group. Every rank must still reach the
        // same decision about whether to bail out here, otherwise the
        // bailing rank skips the phase-3 collectives below while the rest
        // of the group blocks waiting on them. Gather the diagnostics to
        // every rank first, so the strict-mode decision is a deterministic
        // function of group-wide state, not of what one broker happened to
        // see.
        let local_duplicates: Vec<WireDuplicateOwner> = duplicate_owners
            .iter()
            .map(|&(index, first_owner, other_owner)| WireDuplicateOwner {
                index,
                first_owner,
                other_owner,
            })
            .collect();
        let all_duplicates = transport::all_gather_varcount(comm, &local_duplicates)?;

        if config.strict_duplicate_owner {
            if let Some(first) = all_duplicates.iter().min_by_key(|d| d.index) {
                return Err(Error::DuplicateOwner {
                    index: first.index,
                    first_owner: first.first_owner,
                    other_owner: first.other_owner,
                });
            }
        }

        // Phase 3: disseminate resolved matches to both the owner and the
        // wanter, and gather unmatched diagnostics to every rank so the
        // UnmatchedIndex discipline (P6) holds group-wide.
        tracing::debug!("phase 3: disseminating {} matches", matches.len());
        let mut outgoing: Vec<Vec<WireMatchTuple>> = vec![Vec::new(); size as usize];
        for m in &matches {
            for target in broker::dissemination_targets(m) {
                outgoing[target as usize].push((*m).into());
            }
        }
        let my_tuples: Vec<MatchTuple> = transport::all_to_all_varcount(comm, &outgoing)?
            .into_iter()
            .flatten()
            .map(MatchTuple::from)
            .collect();

        let local_unmatched: Vec<WireUnmatchedDiag> =
            unmatched.into_iter().map(Into::into).collect();
        let all_unmatched: Vec<UnmatchedDiag> = transport::all_gather_varcount(comm, &local_unmatched)?
            .into_iter()
            .map(Into::into)
            .collect();

        if !all_unmatched.is_empty() {
            let mut indices: Vec<i64> = all_unmatched.iter().map(|d| d.index).collect();
            indices.sort_unstable();
            indices.dedup();
            return Err(Error::UnmatchedIndex {
                total: indices.len(),
                examples: indices
                    .into_iter()
                    .take(config.unmatched_index_report_cap)
                    .collect(),
            });
        }

        let (send, recv) = build_schedules(&my_tuples, me);

        Ok(Self {
            send,
            recv,
            group: group.clone(),
            src_len: src.count(),
            dst_len: dst.count(),
        })
    }

    pub fn send(&self) -> &ExchangeSchedule {
        &self.send
    }

    pub fn recv(&self) -> &ExchangeSchedule {
        &self.recv
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub(crate) fn src_len(&self) -> usize {
        self.src_len
    }

    pub(crate) fn dst_len(&self) -> usize {
        self.dst_len
    }

    /// Assemble a `Map` from already-computed schedules. Used by
    /// [`crate::level_lift`] to build a lifted map without re-running the
    /// negotiation.
    pub(crate) fn from_parts(
        send: ExchangeSchedule,
        recv: ExchangeSchedule,
        group: Group,
        src_len: usize,
        dst_len: usize,
    ) -> Self {
        Self {
            send,
            recv,
            group,
            src_len,
            dst_len,
        }
    }
}
