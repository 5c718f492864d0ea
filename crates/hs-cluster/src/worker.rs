//! Worker ranks: run assignments until told to stop.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hs_optimizer::{StepCallback, StepControl};
use hs_types::{ClusterError, HsResult, Trace};
use tracing::{debug, info, warn};

use crate::context::ClusterContext;
use crate::runner::SearchRunner;
use crate::transport::{Payload, Tag, Transport, COORDINATOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    AwaitSetup,
    AwaitAssignment,
    Running,
    Terminated,
}

/// Sends a heartbeat to the coordinator after every step.
pub struct Heartbeat {
    transport: Arc<dyn Transport>,
    hyperspace: usize,
}

impl Heartbeat {
    pub fn new(transport: Arc<dyn Transport>, hyperspace: usize) -> Self {
        Self {
            transport,
            hyperspace,
        }
    }
}

impl StepCallback for Heartbeat {
    fn on_step(&mut self, trace: &Trace) -> HsResult<StepControl> {
        self.transport.send(
            COORDINATOR,
            Payload::Heartbeat {
                hyperspace: self.hyperspace,
                evaluations: trace.len(),
            },
        )?;
        Ok(StepControl::Continue)
    }

    fn name(&self) -> &str {
        "heartbeat"
    }
}

/// Hyperspaces a worker finished, in processing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerReport {
    pub rank: usize,
    pub completed: Vec<usize>,
}

pub struct Worker<'r, 'a> {
    ctx: ClusterContext,
    runner: &'r SearchRunner<'a>,
    poll_interval: Duration,
    heartbeats: bool,
    state: WorkerState,
}

impl<'r, 'a> Worker<'r, 'a> {
    pub fn new(ctx: ClusterContext, runner: &'r SearchRunner<'a>) -> Self {
        Self {
            ctx,
            runner,
            poll_interval: Duration::from_millis(1),
            heartbeats: false,
            state: WorkerState::AwaitSetup,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Send a heartbeat after every evaluation step.
    pub fn with_heartbeats(mut self, enabled: bool) -> Self {
        self.heartbeats = enabled;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn run(mut self) -> HsResult<WorkerReport> {
        let rank = self.ctx.rank;
        let mut report = WorkerReport {
            rank,
            completed: Vec::new(),
        };

        self.ctx.recv(Some(COORDINATOR), Some(Tag::Start))?;
        self.ctx.send(COORDINATOR, Payload::Ready)?;
        self.state = WorkerState::AwaitAssignment;
        debug!(rank, "worker ready");

        while self.state != WorkerState::Terminated {
            if !self.ctx.probe(Some(COORDINATOR), None)? {
                thread::sleep(self.poll_interval);
                continue;
            }

            let message = self.ctx.recv(Some(COORDINATOR), None)?;
            match message.payload {
                Payload::Assignment(assignment) => {
                    self.state = WorkerState::Running;
                    let index = assignment.hyperspace_index();

                    let mut callbacks: Vec<Box<dyn StepCallback>> = Vec::new();
                    if self.heartbeats {
                        callbacks.push(Box::new(Heartbeat::new(
                            Arc::clone(self.ctx.transport()),
                            index,
                        )));
                    }
                    let trace = self.runner.run(&assignment, callbacks)?;

                    let finished = self.ctx.send(
                        COORDINATOR,
                        Payload::Finished {
                            hyperspace: index,
                            trace,
                        },
                    );
                    if let Err(e) = finished {
                        // the result is already on disk
                        warn!(rank, hyperspace = index, error = %e, "could not report result");
                    }
                    report.completed.push(index);
                    self.state = WorkerState::AwaitAssignment;
                }
                Payload::Kill => {
                    self.state = WorkerState::Terminated;
                }
                other => {
                    return Err(ClusterError::UnexpectedMessage {
                        source_rank: message.source,
                        expected: format!("{} or {}", Tag::Assignment, Tag::Kill),
                        actual: other.tag().to_string(),
                    }
                    .into());
                }
            }
        }

        info!(rank, completed = report.completed.len(), "worker terminated");
        Ok(report)
    }
}
