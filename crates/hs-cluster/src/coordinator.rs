//! Rank 0: hands hyperspaces to idle workers until none are left.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::thread;
use std::time::{Duration, Instant};

use hs_types::{
    validation_error, ClusterError, HsError, HsResult, Hyperspace, HyperspaceBounds, Trace,
    WorkAssignment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::ClusterContext;
use crate::transport::{Message, Payload, Rank, Tag};

/// A pending unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub hyperspace: Hyperspace,
    pub bounds: Option<HyperspaceBounds>,
    pub checkpoint: Option<Trace>,
}

impl WorkItem {
    pub fn new(hyperspace: Hyperspace) -> Self {
        Self {
            hyperspace,
            bounds: None,
            checkpoint: None,
        }
    }

    pub fn index(&self) -> usize {
        self.hyperspace.index
    }

    fn assign_to(&self, worker: Rank) -> WorkAssignment {
        WorkAssignment {
            worker_id: worker,
            hyperspace: self.hyperspace.clone(),
            bounds: self.bounds.clone(),
            checkpoint: self.checkpoint.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Init,
    AwaitReady,
    Dispatching,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Sleep between dispatch iterations that made no progress.
    pub poll_interval: Duration,
    /// Busy workers silent for longer than this are treated as lost.
    /// `None` disables liveness tracking.
    pub liveness_timeout: Option<Duration>,
    /// After KILL, wait for the results of assignments still in flight.
    pub collect_results: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            liveness_timeout: None,
            collect_results: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = Some(timeout);
        self
    }
}

/// What happened during a dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// `(hyperspace, worker)` in dispatch order, requeued items included.
    pub assignments: Vec<(usize, Rank)>,
    /// Finished traces, keyed by hyperspace index.
    pub completed: BTreeMap<usize, Trace>,
    pub kills_sent: usize,
    pub lost_workers: Vec<Rank>,
}

struct InFlight {
    item: WorkItem,
    last_seen: Instant,
}

pub struct Coordinator {
    ctx: ClusterContext,
    config: CoordinatorConfig,
    state: CoordinatorState,
    pending: VecDeque<WorkItem>,
    idle: VecDeque<Rank>,
    busy: HashMap<Rank, InFlight>,
    lost: BTreeSet<Rank>,
    report: DispatchReport,
}

impl Coordinator {
    pub fn new(
        ctx: ClusterContext,
        items: Vec<WorkItem>,
        config: CoordinatorConfig,
    ) -> HsResult<Self> {
        if !ctx.is_coordinator() {
            return Err(validation_error!(
                "the coordinator must run as rank 0, not rank {}",
                ctx.rank
            ));
        }
        if ctx.worker_count() == 0 {
            return Err(validation_error!("the cluster has no workers"));
        }
        Ok(Self {
            ctx,
            config,
            state: CoordinatorState::Init,
            pending: items.into(),
            idle: VecDeque::new(),
            busy: HashMap::new(),
            lost: BTreeSet::new(),
            report: DispatchReport::default(),
        })
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Drive the protocol to completion: setup, dispatch, shutdown.
    pub fn run(mut self) -> HsResult<DispatchReport> {
        info!(
            workers = self.ctx.worker_count(),
            hyperspaces = self.pending.len(),
            "coordinator starting"
        );

        self.ctx.broadcast(Payload::Start)?;
        self.transition(CoordinatorState::AwaitReady);
        self.await_ready()?;

        self.transition(CoordinatorState::Dispatching);
        let dispatched = self.dispatch();

        // KILL goes out even when dispatch failed, so no worker is left waiting.
        self.transition(CoordinatorState::Shutdown);
        self.shutdown()?;
        dispatched?;

        if self.config.collect_results {
            self.collect_in_flight()?;
        }

        info!(
            completed = self.report.completed.len(),
            lost = self.report.lost_workers.len(),
            "coordinator finished"
        );
        Ok(self.report)
    }

    fn transition(&mut self, next: CoordinatorState) {
        debug!(from = ?self.state, to = ?next, "coordinator state change");
        self.state = next;
    }

    fn await_ready(&mut self) -> HsResult<()> {
        let mut waiting: BTreeSet<Rank> = self.ctx.worker_ranks().collect();
        while !waiting.is_empty() {
            let message = self.ctx.recv(None, Some(Tag::Ready))?;
            if waiting.remove(&message.source) {
                self.idle.push_back(message.source);
            } else {
                warn!(worker = message.source, "duplicate ready message ignored");
            }
        }
        Ok(())
    }

    /// Whether the dispatch loop still has work to watch over.
    ///
    /// With liveness tracking on, in-flight items may still be requeued, so
    /// the loop also waits for every busy worker.
    fn dispatching(&self) -> bool {
        !self.pending.is_empty()
            || (self.config.liveness_timeout.is_some() && !self.busy.is_empty())
    }

    fn dispatch(&mut self) -> HsResult<()> {
        while self.dispatching() {
            let mut progressed = self.drain_messages()?;
            self.check_liveness()?;

            if self.idle.is_empty() && self.busy.is_empty() && !self.pending.is_empty() {
                return Err(ClusterError::FleetExhausted {
                    pending: self.pending.len(),
                }
                .into());
            }

            if let Some(worker) = self.idle.pop_front() {
                if let Some(item) = self.pending.pop_front() {
                    self.assign(worker, item)?;
                    progressed = true;
                } else {
                    self.idle.push_front(worker);
                }
            }

            if !progressed {
                thread::sleep(self.config.poll_interval);
            }
        }
        Ok(())
    }

    fn assign(&mut self, worker: Rank, item: WorkItem) -> HsResult<()> {
        debug!(worker, hyperspace = item.index(), "dispatching");
        let assignment = Payload::Assignment(Box::new(item.assign_to(worker)));
        match self.ctx.send(worker, assignment) {
            Ok(()) => {}
            Err(HsError::Cluster(ClusterError::Disconnected { .. })) => {
                warn!(worker, hyperspace = item.index(), "worker hung up, requeueing");
                self.mark_lost(worker, item);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.report.assignments.push((item.index(), worker));
        self.busy.insert(
            worker,
            InFlight {
                item,
                last_seen: Instant::now(),
            },
        );
        Ok(())
    }

    /// Handle every message already waiting. Returns whether any arrived.
    fn drain_messages(&mut self) -> HsResult<bool> {
        let mut any = false;
        loop {
            match self.ctx.try_recv(None, None) {
                Ok(Some(message)) => {
                    any = true;
                    self.handle(message)?;
                }
                Ok(None) => break,
                Err(HsError::Cluster(ClusterError::Disconnected { .. })) => {
                    self.abandon_in_flight();
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(any)
    }

    /// Every worker has hung up, so nothing in flight can report back.
    fn abandon_in_flight(&mut self) {
        let mut workers: Vec<Rank> = self.busy.keys().copied().collect();
        workers.sort_unstable();
        for worker in workers {
            if let Some(in_flight) = self.busy.remove(&worker) {
                warn!(
                    worker,
                    hyperspace = in_flight.item.index(),
                    "worker hung up mid-assignment"
                );
                self.mark_lost(worker, in_flight.item);
            }
        }
    }

    /// Retire `worker` and put its item back at the front of the queue.
    fn mark_lost(&mut self, worker: Rank, item: WorkItem) {
        self.lost.insert(worker);
        self.report.lost_workers.push(worker);
        self.pending.push_front(item);
    }

    fn handle(&mut self, message: Message) -> HsResult<()> {
        let worker = message.source;
        match message.payload {
            Payload::Finished { hyperspace, trace } => {
                self.busy.remove(&worker);
                if self.lost.contains(&worker) {
                    info!(worker, hyperspace, "late result from a lost worker");
                    self.pending.retain(|item| item.index() != hyperspace);
                } else {
                    self.idle.push_back(worker);
                }
                debug!(worker, hyperspace, evaluations = trace.len(), "finished");
                self.report.completed.entry(hyperspace).or_insert(trace);
            }
            Payload::Heartbeat { hyperspace, evaluations } => {
                if let Some(in_flight) = self.busy.get_mut(&worker) {
                    in_flight.last_seen = Instant::now();
                }
                debug!(worker, hyperspace, evaluations, "heartbeat");
            }
            other => {
                return Err(ClusterError::UnexpectedMessage {
                    source_rank: worker,
                    expected: format!("{} or {}", Tag::Finished, Tag::Heartbeat),
                    actual: other.tag().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Requeue the work of busy workers that went silent.
    ///
    /// Losing the last live worker is fatal.
    fn check_liveness(&mut self) -> HsResult<()> {
        let Some(timeout) = self.config.liveness_timeout else {
            return Ok(());
        };
        let silent: Vec<Rank> = self
            .busy
            .iter()
            .filter(|(_, in_flight)| in_flight.last_seen.elapsed() > timeout)
            .map(|(worker, _)| *worker)
            .collect();

        for worker in silent {
            let Some(in_flight) = self.busy.remove(&worker) else {
                continue;
            };
            let hyperspace = in_flight.item.index();
            let silent_ms = in_flight.last_seen.elapsed().as_millis() as u64;
            warn!(worker, hyperspace, silent_ms, "worker lost, requeueing its hyperspace");

            self.mark_lost(worker, in_flight.item);

            if self.idle.is_empty() && self.busy.is_empty() {
                return Err(ClusterError::WorkerUnresponsive {
                    worker,
                    hyperspace,
                    silent_ms,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Send KILL to every worker rank.
    ///
    /// A lost worker may already be gone; failing to reach it is only
    /// logged. Any other send failure is returned once every rank has been
    /// tried.
    fn shutdown(&mut self) -> HsResult<()> {
        let mut first_error = None;
        let ranks: Vec<Rank> = self.ctx.worker_ranks().collect();
        for worker in ranks {
            match self.ctx.send(worker, Payload::Kill) {
                Ok(()) => self.report.kills_sent += 1,
                Err(e) if self.lost.contains(&worker) => {
                    warn!(worker, error = %e, "lost worker is gone, kill not delivered");
                }
                Err(e) => {
                    warn!(worker, error = %e, "could not send kill");
                    first_error.get_or_insert(e);
                }
            }
        }
        info!(
            kills = self.report.kills_sent,
            in_flight = self.busy.len(),
            "kill sent to every worker"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn collect_in_flight(&mut self) -> HsResult<()> {
        while !self.busy.is_empty() {
            let message = self.ctx.recv(None, None)?;
            self.handle(message)?;
        }
        Ok(())
    }
}
