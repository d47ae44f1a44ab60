//! Crate-wide error type.
//!
//! Every failure kind enumerated in the map-construction and exchange
//! design is represented here; there is no local recovery anywhere in the
//! crate, only propagation (see the propagation policy in the top-level
//! design notes).

use thiserror::Error as ThisError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// A local allocation failed. Any partially constructed state is
    /// released before this is returned.
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    /// The transport group is smaller than an operation requires.
    #[error("group too small: need at least {need}, have {have}")]
    GroupTooSmall { need: usize, have: usize },

    /// Ranks disagree about a collective precondition (e.g. one rank
    /// believes a call is collective while another does not issue it).
    #[error("group inconsistent: {0}")]
    GroupInconsistent(String),

    /// Some destination index has no source owner anywhere in the group.
    #[error(
        "unmatched index: {total} destination index(es) with no source owner across the group \
         (showing up to {} of them: {examples:?})", examples.len()
    )]
    UnmatchedIndex { total: usize, examples: Vec<i64> },

    /// The same global index was claimed as a source by more than one
    /// rank. Resolved deterministically by lowest-rank-wins; only
    /// returned as a hard error when strict mode is enabled.
    #[error("duplicate owner for index {index}: ranks {first_owner} and {other_owner} both claimed it")]
    DuplicateOwner {
        index: i64,
        first_owner: i32,
        other_owner: i32,
    },

    /// The underlying transport reported a failure during map
    /// construction or exchange.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// A caller-supplied buffer is too small for the map's schedule.
    #[error("shape mismatch: buffer has {have} elements, schedule needs {need}")]
    ShapeMismatch { need: usize, have: usize },
}
