//! Callbacks invoked after every optimization step.

use std::time::{Duration, Instant};

use hs_types::{HsResult, Trace};
use tracing::info;

/// What the optimizer should do after a callback has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    Stop,
}

/// Observer of a running optimization.
///
/// Called with the full trace after each evaluation. Returning
/// [`StepControl::Stop`] ends the run early; an error aborts it.
pub trait StepCallback: Send {
    fn on_step(&mut self, trace: &Trace) -> HsResult<StepControl>;

    fn name(&self) -> &str;
}

/// Run every callback, returning `true` if any of them asked to stop.
///
/// All callbacks see the step even when an earlier one asks to stop.
pub fn notify(callbacks: &mut [Box<dyn StepCallback>], trace: &Trace) -> HsResult<bool> {
    let mut stop = false;
    for callback in callbacks.iter_mut() {
        if callback.on_step(trace)? == StepControl::Stop {
            info!(callback = callback.name(), steps = trace.len(), "stopping early");
            stop = true;
        }
    }
    Ok(stop)
}

/// Stops the search when the next step would likely overrun a wall-clock
/// budget.
///
/// The next step is assumed to take as long as the slowest step seen so far.
#[derive(Debug, Clone)]
pub struct DeadlineStopper {
    total: Duration,
    started: Instant,
    last_step: Instant,
    slowest_step: Duration,
}

impl DeadlineStopper {
    pub fn new(total: Duration) -> Self {
        let now = Instant::now();
        Self {
            total,
            started: now,
            last_step: now,
            slowest_step: Duration::ZERO,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.started.elapsed())
    }
}

impl StepCallback for DeadlineStopper {
    fn on_step(&mut self, _trace: &Trace) -> HsResult<StepControl> {
        let now = Instant::now();
        self.slowest_step = self.slowest_step.max(now - self.last_step);
        self.last_step = now;

        if self.remaining() <= self.slowest_step {
            Ok(StepControl::Stop)
        } else {
            Ok(StepControl::Continue)
        }
    }

    fn name(&self) -> &str {
        "deadline"
    }
}
