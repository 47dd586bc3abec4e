use std::cell::{RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::Path;
use std::rc::{Rc, Weak};

use anyhow::Result;
use rhai::Dynamic;
use smallvec::SmallVec;
use tracing::{debug, error, info, trace, warn};

use crate::api::{self, RootPort};
use crate::awaiter::{Awaiter, WaitCondition};
use crate::callback::{Callback, CallbackId};
use crate::config::SchedulerConfig;
use crate::context::TaskContext;
use crate::cutscene::{Cutscene, CutsceneHandle, CutsceneState};
use crate::error::{ScriptError, ScriptResult};
use crate::events::{EventBus, SchedulerEvent};
use crate::fiber::{FiberBody, FiberStep, ScriptFiber};
use crate::poll::{PollTask, TickStep};
use crate::scripts::{self, NativeClosure, ScriptClosure, ScriptEnv, ScriptHost};
use crate::task::{ScriptTask, TaskArena, TaskId, TaskKind};
use crate::time::GameTime;
use crate::world::GameWorld;

#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Global tasks survive [`Scheduler::stop_local_tasks`].
    pub global: bool,
    /// Pauseable tasks are not resumed while the scheduler is paused.
    pub pauseable: bool,
    pub env: ScriptEnv,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self { global: false, pauseable: true, env: ScriptEnv::new() }
    }
}

struct SchedulerState {
    tasks: TaskArena,
    /// Entries polled by the current or next tick.
    active: Vec<Box<dyn PollTask>>,
    /// Registered since the last tick started; merged at the next one.
    pending: Vec<Box<dyn PollTask>>,
    cutscenes: Vec<CutsceneHandle>,
    callbacks: BTreeSet<CallbackId>,
    next_callback: u64,
    time: GameTime,
    paused: bool,
    ticking: bool,
    hot_reload: bool,
    events: EventBus,
}

impl SchedulerState {
    fn new(config: &SchedulerConfig) -> Self {
        Self {
            tasks: TaskArena::new(),
            active: Vec::new(),
            pending: Vec::new(),
            cutscenes: Vec::new(),
            callbacks: BTreeSet::new(),
            next_callback: 0,
            time: GameTime::new(config.speed_factor),
            paused: config.start_paused,
            ticking: false,
            hot_reload: config.hot_reload,
            events: EventBus::new(config.event_capacity),
        }
    }
}

pub(crate) struct SchedulerInner {
    state: RefCell<SchedulerState>,
    host: RefCell<ScriptHost>,
    world: RefCell<Box<dyn GameWorld>>,
}

/// Cooperative scheduler for script tasks. Cloning yields another handle to
/// the same scheduler.
///
/// No internal borrow is held while a fiber, a script function or a poll
/// task runs, so all of them may call back into the scheduler freely.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(world: impl GameWorld + 'static) -> Self {
        Self::with_config(&SchedulerConfig::default(), world)
    }

    pub fn with_config(config: &SchedulerConfig, world: impl GameWorld + 'static) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<SchedulerInner>| SchedulerInner {
            state: RefCell::new(SchedulerState::new(config)),
            host: RefCell::new(ScriptHost::new(|engine| api::register_api(engine, Rc::new(RootPort::new(weak.clone()))))),
            world: RefCell::new(Box::new(world)),
        });
        let scheduler = Self { inner };
        if let Some(path) = &config.main_script {
            if let Err(err) = scheduler.load_script(path) {
                warn!(target: "scheduler", "Main script {} not loaded: {err:#}", path.display());
            }
        }
        scheduler
    }

    pub(crate) fn downgrade(&self) -> Weak<SchedulerInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_weak(weak: &Weak<SchedulerInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn state(&self) -> RefMut<'_, SchedulerState> {
        self.inner.state.borrow_mut()
    }

    fn publish(&self, event: SchedulerEvent) {
        self.state().events.push(event);
    }

    // ---- world, time and host -------------------------------------------

    pub fn with_world<R>(&self, f: impl FnOnce(&dyn GameWorld) -> R) -> R {
        let world = self.inner.world.borrow();
        f(&**world)
    }

    pub fn with_world_mut<R>(&self, f: impl FnOnce(&mut dyn GameWorld) -> R) -> R {
        let mut world = self.inner.world.borrow_mut();
        f(&mut **world)
    }

    pub fn frame(&self) -> u64 {
        self.inner.state.borrow().time.frame()
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.inner.state.borrow().time.elapsed_seconds()
    }

    pub fn speed_factor(&self) -> f32 {
        self.inner.state.borrow().time.speed_factor()
    }

    pub fn set_speed_factor(&self, factor: f32) {
        self.state().time.set_speed_factor(factor);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.borrow().paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.state().paused = paused;
    }

    pub fn load_script(&self, path: impl AsRef<Path>) -> Result<()> {
        self.inner.host.borrow_mut().load_file(path)
    }

    pub fn load_script_source(&self, source: &str) -> Result<()> {
        self.inner.host.borrow_mut().load_source(source)
    }

    pub fn reload_script_if_changed(&self) -> Result<bool> {
        self.inner.host.borrow_mut().reload_if_needed()
    }

    pub fn script_error(&self) -> Option<String> {
        self.inner.host.borrow().last_error().map(str::to_string)
    }

    /// Registers an async closure tasks can run by name.
    pub fn register_closure<F, Fut>(&self, name: &str, closure: F)
    where
        F: Fn(TaskContext, Vec<Dynamic>) -> Fut + 'static,
        Fut: Future<Output = ScriptResult<()>> + 'static,
    {
        let body: NativeClosure =
            Rc::new(move |context: TaskContext, args: Vec<Dynamic>| -> FiberBody { Box::pin(closure(context, args)) });
        self.inner.host.borrow_mut().register_native(name, body);
    }

    pub(crate) fn script_source(&self) -> Option<String> {
        self.inner.host.borrow().source().map(str::to_string)
    }

    /// Looks up a registered closure, then a script function, by name.
    pub fn closure(&self, name: &str) -> ScriptResult<ScriptClosure> {
        self.inner.host.borrow().resolve(name)
    }

    pub fn global(&self, name: &str) -> Option<Dynamic> {
        self.inner.host.borrow().global(name)
    }

    pub fn set_global<T: Clone + 'static>(&self, name: &str, value: T) {
        self.inner.host.borrow_mut().set_global(name, Dynamic::from(value));
    }

    pub fn globals(&self) -> BTreeMap<String, Dynamic> {
        self.inner.host.borrow().globals().clone()
    }

    /// Script-visible log line. Also goes to tracing.
    pub fn log_script(&self, message: &str) {
        info!(target: "script", "{message}");
        self.inner.host.borrow_mut().push_log(message);
    }

    pub fn take_logs(&self) -> Vec<String> {
        self.inner.host.borrow_mut().take_logs()
    }

    pub fn take_events(&self) -> Vec<SchedulerEvent> {
        self.state().events.drain()
    }

    /// Calls a root-scope script function to completion, outside any task.
    pub fn call_script_fn(&self, name: &str, args: Vec<Dynamic>, this: Option<ScriptEnv>) -> ScriptResult<Dynamic> {
        let parts = self.inner.host.borrow().invocation_parts();
        let (engine, ast) =
            parts.ok_or_else(|| ScriptError::resolution(format!("script function '{name}' (no script loaded)")))?;
        scripts::invoke(&engine, &ast, name, args, this)
    }

    // ---- tasks ------------------------------------------------------------

    /// Creates a task and runs it until its first suspension or completion.
    pub fn spawn_task(&self, closure: &ScriptClosure, args: Vec<Dynamic>, global: bool) -> ScriptResult<TaskId> {
        self.spawn_task_with(closure, args, SpawnOptions { global, ..SpawnOptions::default() })
    }

    pub fn spawn_task_with(
        &self,
        closure: &ScriptClosure,
        args: Vec<Dynamic>,
        options: SpawnOptions,
    ) -> ScriptResult<TaskId> {
        self.start_fiber(closure, args, options.env, options.global, options.pauseable)
    }

    fn start_fiber(
        &self,
        closure: &ScriptClosure,
        args: Vec<Dynamic>,
        env: ScriptEnv,
        global: bool,
        pauseable: bool,
    ) -> ScriptResult<TaskId> {
        self.inner.host.borrow().check_invocable(closure, args.len())?;
        let id = self
            .state()
            .tasks
            .insert_with(|id| ScriptTask::new(id, TaskKind::Plain, closure.name(), global, pauseable));
        debug!(target: "scheduler", "spawned {id} running '{}'", closure.name());
        self.publish(SchedulerEvent::TaskSpawned { task: id, closure: closure.name().to_string() });
        let body = closure.instantiate(TaskContext::new(self.downgrade(), id, env), args);
        self.drive(id, ScriptFiber::new(closure.name(), body))?;
        Ok(id)
    }

    /// Steps `fiber` once and files the outcome against its task record.
    fn drive(&self, id: TaskId, mut fiber: ScriptFiber) -> ScriptResult<()> {
        let outcome = fiber.step();
        let mut state = self.state();
        match outcome {
            FiberStep::Suspended => {
                let abandoned = match state.tasks.get_mut(id) {
                    Some(task) if !task.is_stopped() => {
                        if !task.is_suspended() {
                            warn!(target: "scheduler", "{id} yielded without a pending resume; parking it");
                            task.suspend();
                        }
                        task.park(fiber);
                        None
                    }
                    _ => Some(fiber),
                };
                drop(state);
                if let Some(fiber) = abandoned {
                    trace!(target: "scheduler", "{id} was stopped while running; dropping '{}'", fiber.name());
                }
                Ok(())
            }
            FiberStep::Finished => {
                let finished = state.tasks.remove(id).is_some();
                if finished {
                    state.events.push(SchedulerEvent::TaskFinished { task: id });
                }
                drop(state);
                if finished {
                    debug!(target: "scheduler", "{id} ('{}') finished", fiber.name());
                }
                Ok(())
            }
            FiberStep::Failed(err) => {
                state.tasks.remove(id);
                state.events.push(SchedulerEvent::TaskFailed { task: id, message: err.to_string() });
                drop(state);
                error!(target: "scheduler", "{id} ('{}') failed: {err}", fiber.name());
                Err(err)
            }
        }
    }

    /// Continues a suspended task from its last suspension point. Resuming a
    /// task that is not parked and suspended does nothing.
    pub fn resume_task(&self, id: TaskId) -> bool {
        let fiber = self.state().tasks.get_mut(id).and_then(ScriptTask::take_for_resume);
        let Some(fiber) = fiber else {
            trace!(target: "scheduler", "resume of {id} ignored");
            return false;
        };
        // failures are already logged and published by drive
        let _ = self.drive(id, fiber);
        true
    }

    /// Flags a task as waiting for an explicit resume.
    pub fn suspend_task(&self, id: TaskId) -> bool {
        match self.state().tasks.get_mut(id) {
            Some(task) if task.is_alive() => {
                task.suspend();
                true
            }
            _ => false,
        }
    }

    /// Terminates a task. Stopping an unknown or finished task is a no-op.
    pub fn stop_task(&self, id: TaskId) -> bool {
        let mut state = self.state();
        let fiber = match state.tasks.get_mut(id) {
            Some(task) if !task.is_stopped() => task.stop(),
            _ => return false,
        };
        state.tasks.remove(id);
        state.events.push(SchedulerEvent::TaskStopped { task: id });
        drop(state);
        debug!(target: "scheduler", "stopped {id}");
        drop(fiber);
        true
    }

    /// Stops every non-global plain task, e.g. on a room change.
    pub fn stop_local_tasks(&self) -> usize {
        let local: SmallVec<[TaskId; 16]> = self
            .inner
            .state
            .borrow()
            .tasks
            .iter()
            .filter(|task| task.kind() == TaskKind::Plain && !task.is_global())
            .map(ScriptTask::id)
            .collect();
        local.into_iter().filter(|id| self.stop_task(*id)).count()
    }

    pub fn is_task_alive(&self, id: TaskId) -> bool {
        self.inner.state.borrow().tasks.get(id).map_or(false, ScriptTask::is_alive)
    }

    pub fn is_task_suspended(&self, id: TaskId) -> bool {
        self.inner.state.borrow().tasks.get(id).map_or(false, ScriptTask::is_suspended)
    }

    pub fn is_task_pauseable(&self, id: TaskId) -> bool {
        self.inner.state.borrow().tasks.get(id).map_or(false, ScriptTask::is_pauseable)
    }

    pub fn task_name(&self, id: TaskId) -> Option<String> {
        self.inner.state.borrow().tasks.get(id).map(|task| task.name().to_string())
    }

    pub fn task_count(&self) -> usize {
        self.inner.state.borrow().tasks.len()
    }

    // ---- poll tasks -------------------------------------------------------

    /// Queues a poll task. It is first advanced by the next tick.
    pub fn add_poll_task(&self, poll_task: Box<dyn PollTask>) {
        self.state().pending.push(poll_task);
    }

    pub fn poll_task_count(&self) -> usize {
        let state = self.inner.state.borrow();
        state.active.len() + state.pending.len()
    }

    /// Marks `task` suspended and registers the awaiter that will resume it.
    pub(crate) fn suspend_on(&self, task: TaskId, condition: WaitCondition) -> bool {
        let mut state = self.state();
        match state.tasks.get_mut(task) {
            Some(record) if record.is_alive() => {
                trace!(target: "scheduler", "{task} waits on {}", condition.label());
                record.suspend();
                state.pending.push(Box::new(Awaiter::new(task, condition)));
                true
            }
            _ => false,
        }
    }

    pub(crate) fn note_dropped_resume(&self, task: TaskId, reason: &str) {
        trace!(target: "scheduler", "dropping {reason} resume for dead {task}");
        self.publish(SchedulerEvent::ResumeDropped { task });
    }

    /// Advances every queued poll task once, in registration order.
    pub fn tick(&self, dt: f32) {
        if self.inner.state.borrow().hot_reload {
            match self.reload_script_if_changed() {
                Ok(true) => debug!(target: "scheduler", "script reloaded"),
                Ok(false) => {}
                Err(err) => warn!(target: "scheduler", "Script reload failed: {err:#}"),
            }
        }
        let (step, mut entries) = {
            let mut state = self.state();
            if state.ticking {
                warn!(target: "scheduler", "tick requested while a tick is running; ignored");
                return;
            }
            state.ticking = true;
            let scaled = state.time.tick(dt);
            let mut entries = std::mem::take(&mut state.active);
            entries.append(&mut state.pending);
            (TickStep { dt: scaled, frame: state.time.frame(), paused: state.paused }, entries)
        };
        for entry in entries.iter_mut() {
            entry.advance(self, &step);
        }
        entries.retain(|entry| !entry.is_elapsed());
        let mut state = self.state();
        state.active = entries;
        state.cutscenes.retain(|handle| !handle.is_finished());
        state.ticking = false;
    }

    // ---- cutscenes --------------------------------------------------------

    /// Starts a cutscene not owned by any task.
    pub fn start_cutscene(
        &self,
        main: &ScriptClosure,
        override_closure: Option<&ScriptClosure>,
        env: ScriptEnv,
    ) -> ScriptResult<TaskId> {
        self.start_cutscene_for(None, main, override_closure, env)
    }

    /// Registers a cutscene. When `caller` is set, it is suspended until the
    /// cutscene ends.
    pub(crate) fn start_cutscene_for(
        &self,
        caller: Option<TaskId>,
        main: &ScriptClosure,
        override_closure: Option<&ScriptClosure>,
        env: ScriptEnv,
    ) -> ScriptResult<TaskId> {
        {
            let host = self.inner.host.borrow();
            host.check_invocable(main, 0)?;
            if let Some(closure) = override_closure {
                host.check_invocable(closure, 0)?;
            }
        }
        let mut state = self.state();
        let id = state.tasks.insert_with(|id| ScriptTask::new(id, TaskKind::Cutscene, main.name(), true, false));
        let (cutscene, handle) = Cutscene::new(id, main.clone(), override_closure.cloned(), env, caller);
        state.cutscenes.push(handle);
        state.pending.push(Box::new(cutscene));
        if let Some(caller) = caller {
            if let Some(task) = state.tasks.get_mut(caller) {
                task.suspend();
            }
        }
        state.events.push(SchedulerEvent::TaskSpawned { task: id, closure: main.name().to_string() });
        drop(state);
        debug!(target: "scheduler", "cutscene {id} queued with main '{}'", main.name());
        Ok(id)
    }

    /// Main and override closures run as global, non-pauseable children.
    pub(crate) fn spawn_cutscene_child(&self, closure: &ScriptClosure, env: ScriptEnv) -> ScriptResult<TaskId> {
        self.start_fiber(closure, Vec::new(), env, true, false)
    }

    /// Asks the most recent cutscene to skip to its override. Ignored unless
    /// that cutscene is running and has an override closure.
    pub fn request_cutscene_override(&self) -> bool {
        let requested = {
            let state = self.inner.state.borrow();
            state
                .cutscenes
                .iter()
                .rev()
                .find(|handle| !handle.is_finished())
                .and_then(|handle| handle.request_override().then(|| handle.id()))
        };
        match requested {
            Some(cutscene) => {
                debug!(target: "scheduler", "override requested for cutscene {cutscene}");
                self.note_cutscene_transition(cutscene, CutsceneState::Running, CutsceneState::OverrideRequested);
                true
            }
            None => false,
        }
    }

    pub(crate) fn note_cutscene_transition(&self, cutscene: TaskId, from: CutsceneState, to: CutsceneState) {
        self.publish(SchedulerEvent::CutsceneTransition { cutscene, from, to });
    }

    pub fn cutscene_active(&self) -> bool {
        self.inner.state.borrow().cutscenes.iter().any(|handle| !handle.is_finished())
    }

    /// State of a cutscene that has not been reaped yet.
    pub fn cutscene_state(&self, id: TaskId) -> Option<CutsceneState> {
        let state = self.inner.state.borrow();
        state.cutscenes.iter().find(|handle| handle.id() == id).map(CutsceneHandle::state)
    }

    // ---- callbacks --------------------------------------------------------

    /// Schedules `method` to run once after `seconds` of game time. The
    /// method must exist with a matching arity now.
    pub fn add_timed_callback(&self, seconds: f32, method: &str, arg: Option<Dynamic>) -> ScriptResult<CallbackId> {
        let arity = usize::from(arg.is_some());
        if !self.inner.host.borrow().has_function(method, arity) {
            return Err(ScriptError::resolution(format!("callback method '{method}' taking {arity} argument(s)")));
        }
        let mut state = self.state();
        state.next_callback += 1;
        let id = CallbackId::from_raw(state.next_callback);
        state.callbacks.insert(id);
        state.pending.push(Box::new(Callback::new(id, seconds, method, arg)));
        drop(state);
        debug!(target: "scheduler", "{id} scheduled '{method}' in {seconds}s");
        Ok(id)
    }

    /// Cancels a callback that has not fired yet.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let removed = self.state().callbacks.remove(&id);
        if removed {
            self.publish(SchedulerEvent::CallbackRemoved { callback: id });
        }
        removed
    }

    pub fn is_callback_pending(&self, id: CallbackId) -> bool {
        self.inner.state.borrow().callbacks.contains(&id)
    }

    pub(crate) fn fire_callback(&self, id: CallbackId, method: &str, arg: Option<Dynamic>) {
        self.state().callbacks.remove(&id);
        let args: Vec<Dynamic> = arg.into_iter().collect();
        match self.call_script_fn(method, args, None) {
            Ok(_) => {
                debug!(target: "scheduler", "{id} fired '{method}'");
                self.publish(SchedulerEvent::CallbackFired { callback: id, method: method.to_string() });
            }
            Err(err) => {
                error!(target: "scheduler", "{id} '{method}' failed: {err}");
                self.publish(SchedulerEvent::CallbackFailed { callback: id, message: err.to_string() });
            }
        }
    }
}
