//! The transport group a [`crate::Map`] is bound to.
//!
//! Initialization and finalization of MPI itself are out of scope for this
//! crate (they are the caller's job, done once at process startup); `Group`
//! only wraps a communicator the caller already has in hand, the way
//! `MpiUniverse` in the reference pack wraps `mpi::initialize`'s output —
//! except here we take the communicator as a parameter rather than owning
//! the `Universe`, since bootstrapping MPI is an external collaborator's
//! responsibility.

use std::sync::Arc;

use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

/// A transport group: an opaque handle with a known size and this rank's
/// identity within it. Cheap to clone; the underlying communicator handle
/// is shared and released when the last `Group` referencing it is dropped.
#[derive(Clone)]
pub struct Group {
    inner: Arc<SimpleCommunicator>,
}

impl Group {
    /// Wrap an existing communicator (typically `universe.world()`, or a
    /// sub-communicator split off from it by the caller).
    pub fn new(comm: SimpleCommunicator) -> Self {
        Self {
            inner: Arc::new(comm),
        }
    }

    pub fn rank(&self) -> i32 {
        self.inner.rank()
    }

    pub fn size(&self) -> i32 {
        self.inner.size()
    }

    pub(crate) fn comm(&self) -> &SimpleCommunicator {
        &self.inner
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}
