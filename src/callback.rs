use crate::poll::{PollTask, TickStep, TimedTask};
use crate::scheduler::Scheduler;
use rhai::Dynamic;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl CallbackId {
    pub fn from_raw(raw: u64) -> Self {
        CallbackId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback#{}", self.0)
    }
}

/// Calls a root-scope script function once after a delay. Runs outside any
/// task, so pause does not hold it back.
#[derive(Debug)]
pub struct Callback {
    id: CallbackId,
    timer: TimedTask,
    method: String,
    arg: Option<Dynamic>,
    done: bool,
}

impl Callback {
    pub fn new(id: CallbackId, seconds: f32, method: impl Into<String>, arg: Option<Dynamic>) -> Self {
        Self { id, timer: TimedTask::new(seconds), method: method.into(), arg, done: false }
    }

    pub fn id(&self) -> CallbackId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl PollTask for Callback {
    fn advance(&mut self, scheduler: &Scheduler, step: &TickStep) {
        if self.done {
            return;
        }
        if !scheduler.is_callback_pending(self.id) {
            // removed before it was due
            self.done = true;
            return;
        }
        if !self.timer.accumulate(step.dt) {
            return;
        }
        self.done = true;
        scheduler.fire_callback(self.id, &self.method, self.arg.take());
    }

    fn is_elapsed(&self) -> bool {
        self.done
    }

    fn label(&self) -> &str {
        "callback"
    }
}
