use crate::input::InputState;
use crate::poll::{PollTask, TickStep};
use crate::scheduler::Scheduler;
use crate::scripts::{ScriptClosure, ScriptEnv};
use crate::task::TaskId;
use serde::Serialize;
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CutsceneState {
    Start,
    Running,
    OverrideRequested,
    OverrideRunning,
    Ending,
    Ended,
}

/// The scheduler's view of a cutscene. Shares the state cell with the
/// [`Cutscene`] so an override request lands without waiting for a tick.
#[derive(Debug, Clone)]
pub(crate) struct CutsceneHandle {
    id: TaskId,
    state: Rc<Cell<CutsceneState>>,
    has_override: bool,
}

impl CutsceneHandle {
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn state(&self) -> CutsceneState {
        self.state.get()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state.get() == CutsceneState::Ended
    }

    /// Running -> OverrideRequested, only when an override closure exists.
    pub(crate) fn request_override(&self) -> bool {
        if self.has_override && self.state.get() == CutsceneState::Running {
            self.state.set(CutsceneState::OverrideRequested);
            true
        } else {
            false
        }
    }
}

/// Input-locking state machine around a main closure and an optional
/// override. Main and override each run as a child task so a stopped main
/// cannot be resumed by an awaiter it left behind.
pub struct Cutscene {
    id: TaskId,
    state: Rc<Cell<CutsceneState>>,
    main: ScriptClosure,
    override_closure: Option<ScriptClosure>,
    env: ScriptEnv,
    caller: Option<TaskId>,
    input_snapshot: Option<InputState>,
    child: Option<TaskId>,
}

impl Cutscene {
    pub(crate) fn new(
        id: TaskId,
        main: ScriptClosure,
        override_closure: Option<ScriptClosure>,
        env: ScriptEnv,
        caller: Option<TaskId>,
    ) -> (Self, CutsceneHandle) {
        let state = Rc::new(Cell::new(CutsceneState::Start));
        let handle = CutsceneHandle { id, state: state.clone(), has_override: override_closure.is_some() };
        let cutscene =
            Self { id, state, main, override_closure, env, caller, input_snapshot: None, child: None };
        (cutscene, handle)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> CutsceneState {
        self.state.get()
    }

    fn transition(&self, scheduler: &Scheduler, to: CutsceneState) {
        let from = self.state.replace(to);
        debug!(target: "scheduler", "cutscene {} {from:?} -> {to:?}", self.id);
        scheduler.note_cutscene_transition(self.id, from, to);
    }

    fn start(&mut self, scheduler: &Scheduler) {
        if !scheduler.is_task_alive(self.id) {
            self.finish(scheduler);
            return;
        }
        let snapshot = scheduler.with_world(|world| world.input_state());
        self.input_snapshot = Some(snapshot);
        scheduler.with_world_mut(|world| world.set_input_state(snapshot.locked()));
        match scheduler.spawn_cutscene_child(&self.main, self.env.clone()) {
            Ok(child) => {
                self.child = Some(child);
                self.transition(scheduler, CutsceneState::Running);
            }
            Err(err) => {
                error!(target: "scheduler", "cutscene {} main '{}' failed to start: {err}", self.id, self.main.name());
                self.finish(scheduler);
            }
        }
    }

    fn start_override(&mut self, scheduler: &Scheduler) {
        if let Some(main) = self.child.take() {
            scheduler.stop_task(main);
        }
        let Some(closure) = self.override_closure.clone() else {
            self.finish(scheduler);
            return;
        };
        if !scheduler.is_task_alive(self.id) {
            self.finish(scheduler);
            return;
        }
        match scheduler.spawn_cutscene_child(&closure, self.env.clone()) {
            Ok(child) => {
                self.child = Some(child);
                self.transition(scheduler, CutsceneState::OverrideRunning);
            }
            Err(err) => {
                error!(target: "scheduler", "cutscene {} override '{}' failed: {err}", self.id, closure.name());
                self.finish(scheduler);
            }
        }
    }

    fn child_alive(&self, scheduler: &Scheduler) -> bool {
        self.child.map_or(false, |child| scheduler.is_task_alive(child))
    }

    /// Enters Ending and runs its actions: restore input, refocus the camera,
    /// wake the caller and retire the cutscene record.
    fn finish(&mut self, scheduler: &Scheduler) {
        if self.state.get() != CutsceneState::Ending {
            self.transition(scheduler, CutsceneState::Ending);
        }
        if let Some(snapshot) = self.input_snapshot.take() {
            scheduler.with_world_mut(|world| world.set_input_state(snapshot));
        }
        scheduler.with_world_mut(|world| world.follow_current_actor());
        if let Some(child) = self.child.take() {
            scheduler.stop_task(child);
        }
        if let Some(caller) = self.caller.take() {
            scheduler.resume_task(caller);
        }
        scheduler.stop_task(self.id);
        self.transition(scheduler, CutsceneState::Ended);
    }
}

impl PollTask for Cutscene {
    fn advance(&mut self, scheduler: &Scheduler, _step: &TickStep) {
        match self.state.get() {
            CutsceneState::Start => self.start(scheduler),
            CutsceneState::Running | CutsceneState::OverrideRunning => {
                if !scheduler.is_task_alive(self.id) || !self.child_alive(scheduler) {
                    self.finish(scheduler);
                }
            }
            CutsceneState::OverrideRequested => self.start_override(scheduler),
            CutsceneState::Ending => self.finish(scheduler),
            CutsceneState::Ended => {}
        }
    }

    fn is_elapsed(&self) -> bool {
        self.state.get() == CutsceneState::Ended
    }

    fn label(&self) -> &str {
        "cutscene"
    }
}
