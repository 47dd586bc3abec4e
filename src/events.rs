use crate::callback::CallbackId;
use crate::cutscene::CutsceneState;
use crate::task::TaskId;
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    TaskSpawned { task: TaskId, closure: String },
    TaskFinished { task: TaskId },
    TaskStopped { task: TaskId },
    TaskFailed { task: TaskId, message: String },
    ResumeDropped { task: TaskId },
    CutsceneTransition { cutscene: TaskId, from: CutsceneState, to: CutsceneState },
    CallbackFired { callback: CallbackId, method: String },
    CallbackFailed { callback: CallbackId, message: String },
    CallbackRemoved { callback: CallbackId },
}

impl fmt::Display for SchedulerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerEvent::TaskSpawned { task, closure } => write!(f, "TaskSpawned {task} closure={closure}"),
            SchedulerEvent::TaskFinished { task } => write!(f, "TaskFinished {task}"),
            SchedulerEvent::TaskStopped { task } => write!(f, "TaskStopped {task}"),
            SchedulerEvent::TaskFailed { task, message } => write!(f, "TaskFailed {task} error={message}"),
            SchedulerEvent::ResumeDropped { task } => write!(f, "ResumeDropped {task}"),
            SchedulerEvent::CutsceneTransition { cutscene, from, to } => {
                write!(f, "CutsceneTransition {cutscene} {from:?}->{to:?}")
            }
            SchedulerEvent::CallbackFired { callback, method } => {
                write!(f, "CallbackFired {callback} method={method}")
            }
            SchedulerEvent::CallbackFailed { callback, message } => {
                write!(f, "CallbackFailed {callback} error={message}")
            }
            SchedulerEvent::CallbackRemoved { callback } => write!(f, "CallbackRemoved {callback}"),
        }
    }
}

/// Bounded event log. When full the oldest entry is dropped.
#[derive(Debug)]
pub struct EventBus {
    capacity: usize,
    events: VecDeque<SchedulerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), events: VecDeque::new() }
    }

    pub fn push(&mut self, event: SchedulerEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<SchedulerEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
