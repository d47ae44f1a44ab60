//! # distdir — distributed index exchange
//!
//! Given a global N-dimensional index space partitioned arbitrarily across a
//! set of cooperating MPI ranks, `distdir` negotiates a redistribution plan
//! between a *source* decomposition and a *destination* decomposition and
//! executes bulk data exchanges that move element values from the ranks
//! that own them to the ranks that want them.
//!
//! The flow is: build two [`IndexList`]s locally, negotiate a [`Map`]
//! between them (collective over an MPI group), optionally extend it to a
//! higher dimension with [`Map::lift`], then bind an [`Exchanger`] to a
//! concrete element type and call [`Exchanger::go`] as many times as needed.

pub mod config;
pub mod error;
pub mod exchanger;
pub mod group;
pub mod index_list;
pub mod level_lift;
pub mod map;
mod transport;

pub use error::{Error, Result};
pub use exchanger::{ElementType, Exchanger, HwHint};
pub use group::Group;
pub use index_list::IndexList;
pub use map::Map;
