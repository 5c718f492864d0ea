//! # hs-cluster
//!
//! Distributed hyperspace search. Rank 0 coordinates and every other rank
//! runs a [`Worker`] that searches the hyperspaces it is handed. Ranks talk
//! over a message-passing [`Transport`]; [`local_cluster`] builds an
//! in-process one on channels.
//!
//! [`run_fleet`] is the usual entry point: it partitions the space, builds
//! the ranks and runs them in the configured dispatch mode.

pub mod context;
pub mod coordinator;
pub mod drive;
pub mod runner;
pub mod transport;
pub mod worker;

pub use context::ClusterContext;
pub use coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorState, DispatchReport, WorkItem,
};
pub use drive::{
    plan_work, run_elastic, run_fleet, run_static, run_static_worker, static_worker_count,
    FleetOptions, FleetReport,
};
pub use runner::SearchRunner;
pub use transport::{
    local_cluster, ChannelTransport, Message, Payload, Rank, Tag, Transport, COORDINATOR,
};
pub use worker::{Heartbeat, Worker, WorkerReport, WorkerState};
