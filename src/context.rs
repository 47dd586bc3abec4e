use std::rc::Weak;

use rhai::Dynamic;

use crate::awaiter::WaitCondition;
use crate::callback::CallbackId;
use crate::error::{ScriptError, ScriptResult};
use crate::fiber::Suspend;
use crate::poll::TimedTask;
use crate::scheduler::{Scheduler, SchedulerInner, SpawnOptions};
use crate::scripts::{ScriptClosure, ScriptEnv};
use crate::task::TaskId;
use crate::world::{EntityId, GameWorld, SoundId};

/// Handed to every native closure. The suspension primitives are the async
/// methods; awaiting one parks the task until its condition clears.
///
/// Holds the scheduler weakly, so a fiber never keeps its own scheduler alive.
#[derive(Clone)]
pub struct TaskContext {
    scheduler: Weak<SchedulerInner>,
    task: TaskId,
    env: ScriptEnv,
}

impl TaskContext {
    pub(crate) fn new(scheduler: Weak<SchedulerInner>, task: TaskId, env: ScriptEnv) -> Self {
        Self { scheduler, task, env }
    }

    pub fn task_id(&self) -> TaskId {
        self.task
    }

    pub fn env(&self) -> &ScriptEnv {
        &self.env
    }

    pub fn scheduler(&self) -> ScriptResult<Scheduler> {
        Scheduler::from_weak(&self.scheduler).ok_or(ScriptError::Detached(self.task))
    }

    async fn wait_on(&self, condition: WaitCondition) -> ScriptResult<()> {
        self.scheduler()?.suspend_on(self.task, condition);
        Suspend::default().await;
        Ok(())
    }

    fn entity_query<R>(&self, entity: EntityId, query: impl FnOnce(&dyn GameWorld) -> R) -> ScriptResult<R> {
        self.scheduler()?.with_world(|world| {
            if world.has_entity(entity) {
                Ok(query(world))
            } else {
                Err(ScriptError::resolution(format!("{entity}")))
            }
        })
    }

    // ---- suspension primitives ---------------------------------------------

    /// Waits `frames` ticks. Zero returns without suspending.
    pub async fn wait_frames(&self, frames: u32) -> ScriptResult<()> {
        if frames == 0 {
            return Ok(());
        }
        self.wait_on(WaitCondition::Frames { remaining: frames }).await
    }

    /// Waits until `seconds` of scaled game time have passed.
    pub async fn wait_seconds(&self, seconds: f32) -> ScriptResult<()> {
        self.wait_on(WaitCondition::Seconds(TimedTask::new(seconds))).await
    }

    /// Waits for the animation playing on `entity` right now. A replacement
    /// animation started later ends the wait.
    pub async fn wait_while_animating(&self, entity: EntityId) -> ScriptResult<()> {
        let animation = self.entity_query(entity, |world| world.current_animation(entity))?;
        self.wait_on(WaitCondition::Animating { entity, animation }).await
    }

    pub async fn wait_while_walking(&self, entity: EntityId) -> ScriptResult<()> {
        self.entity_query(entity, |_| ())?;
        self.wait_on(WaitCondition::Walking(entity)).await
    }

    /// `None` waits until no actor is talking.
    pub async fn wait_while_talking(&self, entity: Option<EntityId>) -> ScriptResult<()> {
        let condition = match entity {
            Some(entity) => {
                self.entity_query(entity, |_| ())?;
                WaitCondition::Talking(entity)
            }
            None => WaitCondition::AnyTalking,
        };
        self.wait_on(condition).await
    }

    pub async fn wait_while_sound(&self, sound: SoundId) -> ScriptResult<()> {
        self.wait_on(WaitCondition::Sound(sound)).await
    }

    pub async fn wait_while_dialog(&self) -> ScriptResult<()> {
        self.wait_on(WaitCondition::Dialog).await
    }

    pub async fn wait_while_cutscene(&self) -> ScriptResult<()> {
        self.wait_on(WaitCondition::Cutscene).await
    }

    pub async fn wait_while_camera(&self) -> ScriptResult<()> {
        self.wait_on(WaitCondition::Camera).await
    }

    pub async fn wait_while_input_off(&self) -> ScriptResult<()> {
        self.wait_on(WaitCondition::InputOff).await
    }

    /// Waits for another task to end. A task that is already gone, or never
    /// existed, counts as finished.
    pub async fn wait_while_running(&self, task: TaskId) -> ScriptResult<()> {
        if !self.scheduler()?.is_task_alive(task) {
            return Ok(());
        }
        self.wait_on(WaitCondition::TaskRunning(task)).await
    }

    /// Parks until something calls [`Scheduler::resume_task`] on this task.
    pub async fn suspend(&self) -> ScriptResult<()> {
        self.scheduler()?.suspend_task(self.task);
        Suspend::default().await;
        Ok(())
    }

    /// Runs a cutscene and returns once it has ended.
    pub async fn start_cutscene(
        &self,
        main: &ScriptClosure,
        override_closure: Option<&ScriptClosure>,
    ) -> ScriptResult<TaskId> {
        let cutscene =
            self.scheduler()?.start_cutscene_for(Some(self.task), main, override_closure, self.env.clone())?;
        Suspend::default().await;
        Ok(cutscene)
    }

    // ---- non-suspending helpers --------------------------------------------

    pub fn closure(&self, name: &str) -> ScriptResult<ScriptClosure> {
        self.scheduler()?.closure(name)
    }

    /// Child tasks inherit this task's environment.
    pub fn spawn_task(&self, closure: &ScriptClosure, args: Vec<Dynamic>, global: bool) -> ScriptResult<TaskId> {
        let options = SpawnOptions { global, env: self.env.clone(), ..SpawnOptions::default() };
        self.scheduler()?.spawn_task_with(closure, args, options)
    }

    pub fn stop_task(&self, task: TaskId) -> bool {
        self.scheduler().map_or(false, |scheduler| scheduler.stop_task(task))
    }

    pub fn is_task_alive(&self, task: TaskId) -> bool {
        self.scheduler().map_or(false, |scheduler| scheduler.is_task_alive(task))
    }

    pub fn request_cutscene_override(&self) -> bool {
        self.scheduler().map_or(false, |scheduler| scheduler.request_cutscene_override())
    }

    pub fn add_timed_callback(&self, seconds: f32, method: &str, arg: Option<Dynamic>) -> ScriptResult<CallbackId> {
        self.scheduler()?.add_timed_callback(seconds, method, arg)
    }

    pub fn remove_callback(&self, callback: CallbackId) -> bool {
        self.scheduler().map_or(false, |scheduler| scheduler.remove_callback(callback))
    }

    pub fn global(&self, name: &str) -> Option<Dynamic> {
        self.scheduler().ok().and_then(|scheduler| scheduler.global(name))
    }

    pub fn set_global<T: Clone + 'static>(&self, name: &str, value: T) -> ScriptResult<()> {
        self.scheduler()?.set_global(name, value);
        Ok(())
    }

    pub fn log(&self, message: impl AsRef<str>) -> ScriptResult<()> {
        self.scheduler()?.log_script(message.as_ref());
        Ok(())
    }

    pub fn frame(&self) -> u64 {
        self.scheduler().map_or(0, |scheduler| scheduler.frame())
    }
}
