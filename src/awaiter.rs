use crate::poll::{PollTask, TickStep, TimedTask};
use crate::scheduler::Scheduler;
use crate::task::TaskId;
use crate::world::{AnimationHandle, EntityId, SoundId};

/// One variant per suspension primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitCondition {
    Frames { remaining: u32 },
    Seconds(TimedTask),
    /// Tracks the animation instance captured when the wait began.
    Animating { entity: EntityId, animation: Option<AnimationHandle> },
    Walking(EntityId),
    Talking(EntityId),
    AnyTalking,
    Sound(SoundId),
    Dialog,
    Cutscene,
    Camera,
    InputOff,
    TaskRunning(TaskId),
}

impl WaitCondition {
    /// Returns true once the wait is over.
    pub fn poll(&mut self, scheduler: &Scheduler, step: &TickStep) -> bool {
        match self {
            WaitCondition::Frames { remaining } => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            WaitCondition::Seconds(timer) => timer.accumulate(step.dt),
            WaitCondition::Animating { animation, .. } => match *animation {
                Some(handle) => !scheduler.with_world(|world| world.is_animation_playing(handle)),
                None => true,
            },
            WaitCondition::Walking(entity) => !scheduler.with_world(|world| world.is_walking(*entity)),
            WaitCondition::Talking(entity) => !scheduler.with_world(|world| world.is_talking(*entity)),
            WaitCondition::AnyTalking => !scheduler.with_world(|world| world.is_any_actor_talking()),
            WaitCondition::Sound(sound) => !scheduler.with_world(|world| world.is_sound_playing(*sound)),
            WaitCondition::Dialog => !scheduler.with_world(|world| world.is_dialog_active()),
            WaitCondition::Cutscene => !scheduler.cutscene_active(),
            WaitCondition::Camera => !scheduler.with_world(|world| world.is_camera_moving()),
            WaitCondition::InputOff => scheduler.with_world(|world| world.input_state().input_active()),
            WaitCondition::TaskRunning(task) => !scheduler.is_task_alive(*task),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WaitCondition::Frames { .. } => "frames",
            WaitCondition::Seconds(_) => "seconds",
            WaitCondition::Animating { .. } => "animating",
            WaitCondition::Walking(_) => "walking",
            WaitCondition::Talking(_) => "talking",
            WaitCondition::AnyTalking => "any_talking",
            WaitCondition::Sound(_) => "sound",
            WaitCondition::Dialog => "dialog",
            WaitCondition::Cutscene => "cutscene",
            WaitCondition::Camera => "camera",
            WaitCondition::InputOff => "input_off",
            WaitCondition::TaskRunning(_) => "task_running",
        }
    }
}

/// A suspended task waiting on a condition. Issues at most one resume.
#[derive(Debug)]
pub struct Awaiter {
    target: TaskId,
    condition: WaitCondition,
    done: bool,
}

impl Awaiter {
    pub fn new(target: TaskId, condition: WaitCondition) -> Self {
        Self { target, condition, done: false }
    }

    pub fn target(&self) -> TaskId {
        self.target
    }

    pub fn condition(&self) -> &WaitCondition {
        &self.condition
    }
}

impl PollTask for Awaiter {
    fn advance(&mut self, scheduler: &Scheduler, step: &TickStep) {
        if self.done {
            return;
        }
        if !scheduler.is_task_alive(self.target) {
            self.done = true;
            scheduler.note_dropped_resume(self.target, self.condition.label());
            return;
        }
        if step.paused && scheduler.is_task_pauseable(self.target) {
            return;
        }
        if self.condition.poll(scheduler, step) {
            self.done = true;
            scheduler.resume_task(self.target);
        }
    }

    fn is_elapsed(&self) -> bool {
        self.done
    }

    fn label(&self) -> &str {
        self.condition.label()
    }
}
