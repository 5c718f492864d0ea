use std::sync::Arc;

use crate::transport::{Rank, Transport, COORDINATOR};

/// One endpoint's view of the cluster, passed explicitly to coordinator and
/// worker code.
#[derive(Clone)]
pub struct ClusterContext {
    pub rank: Rank,
    pub size: usize,
    transport: Arc<dyn Transport>,
}

impl ClusterContext {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            rank: transport.rank(),
            size: transport.size(),
            transport,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank == COORDINATOR
    }

    /// Every rank except the coordinator.
    pub fn worker_ranks(&self) -> impl Iterator<Item = Rank> {
        (0..self.size).filter(|r| *r != COORDINATOR)
    }

    pub fn worker_count(&self) -> usize {
        self.size.saturating_sub(1)
    }
}

impl std::fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterContext")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl std::ops::Deref for ClusterContext {
    type Target = dyn Transport;

    fn deref(&self) -> &Self::Target {
        self.transport.as_ref()
    }
}
