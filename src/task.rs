use crate::fiber::{FiberState, ScriptFiber};
use std::fmt;

/// Task identifier. The high half is a serial that is never reused, the low
/// half is the arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn new(serial: u32, index: u32) -> Self {
        TaskId(((serial as u64) << 32) | index as u64)
    }

    pub fn serial(self) -> u32 {
        (self.0 >> 32) as u32
    }

    fn index(self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }

    pub fn to_bits(self) -> u64 {
        self.0
    }

    pub fn from_bits(bits: u64) -> Self {
        TaskId(bits)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.serial())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Plain,
    Cutscene,
}

#[derive(Debug)]
pub(crate) enum FiberSlot {
    Parked(ScriptFiber),
    /// The fiber is being stepped somewhere up the call stack.
    OnStack,
    /// No fiber of its own; a state machine decides aliveness.
    Driven,
}

#[derive(Debug)]
pub struct ScriptTask {
    id: TaskId,
    kind: TaskKind,
    name: String,
    global: bool,
    pauseable: bool,
    stopped: bool,
    suspended: bool,
    slot: FiberSlot,
}

impl ScriptTask {
    pub(crate) fn new(id: TaskId, kind: TaskKind, name: impl Into<String>, global: bool, pauseable: bool) -> Self {
        let slot = match kind {
            TaskKind::Plain => FiberSlot::OnStack,
            TaskKind::Cutscene => FiberSlot::Driven,
        };
        Self { id, kind, name: name.into(), global, pauseable, stopped: false, suspended: false, slot }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn is_pauseable(&self) -> bool {
        self.pauseable
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn fiber_state(&self) -> FiberState {
        match &self.slot {
            FiberSlot::Parked(fiber) => fiber.state(),
            FiberSlot::OnStack | FiberSlot::Driven => FiberState::Running,
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.stopped && self.fiber_state() != FiberState::Idle
    }

    pub(crate) fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Hands out the parked fiber for a resume. `None` means the resume is a no-op.
    pub(crate) fn take_for_resume(&mut self) -> Option<ScriptFiber> {
        if self.stopped || !self.suspended || !matches!(self.slot, FiberSlot::Parked(_)) {
            return None;
        }
        self.suspended = false;
        match std::mem::replace(&mut self.slot, FiberSlot::OnStack) {
            FiberSlot::Parked(fiber) => Some(fiber),
            _ => None,
        }
    }

    pub(crate) fn park(&mut self, fiber: ScriptFiber) {
        self.slot = FiberSlot::Parked(fiber);
    }

    /// Marks the task stopped and returns the fiber it was holding, if any.
    pub(crate) fn stop(&mut self) -> Option<ScriptFiber> {
        self.stopped = true;
        match std::mem::replace(&mut self.slot, FiberSlot::Driven) {
            FiberSlot::Parked(fiber) => Some(fiber),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Slot {
    id: TaskId,
    task: Option<ScriptTask>,
}

/// Dense task storage with a free-list.
#[derive(Debug, Default)]
pub struct TaskArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    next_serial: u32,
    live: usize,
}

impl TaskArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_with(&mut self, make: impl FnOnce(TaskId) -> ScriptTask) -> TaskId {
        self.next_serial = self.next_serial.wrapping_add(1);
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot { id: TaskId(0), task: None });
                (self.slots.len() - 1) as u32
            }
        };
        let id = TaskId::new(self.next_serial, index);
        let slot = &mut self.slots[index as usize];
        slot.id = id;
        slot.task = Some(make(id));
        self.live += 1;
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&ScriptTask> {
        self.slots.get(id.index()).filter(|slot| slot.id == id).and_then(|slot| slot.task.as_ref())
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut ScriptTask> {
        self.slots.get_mut(id.index()).filter(|slot| slot.id == id).and_then(|slot| slot.task.as_mut())
    }

    pub fn remove(&mut self, id: TaskId) -> Option<ScriptTask> {
        let slot = self.slots.get_mut(id.index()).filter(|slot| slot.id == id)?;
        let task = slot.task.take()?;
        self.free.push(id.index() as u32);
        self.live -= 1;
        Some(task)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScriptTask> {
        self.slots.iter().filter_map(|slot| slot.task.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(arena: &mut TaskArena) -> TaskId {
        arena.insert_with(|id| ScriptTask::new(id, TaskKind::Plain, "t", false, true))
    }

    #[test]
    fn ids_are_monotonic_even_when_slots_are_reused() {
        let mut arena = TaskArena::new();
        let a = plain(&mut arena);
        let b = plain(&mut arena);
        assert!(b > a);
        arena.remove(a).expect("a is live");
        let c = plain(&mut arena);
        assert!(c > b, "reused slot must still get a fresh id");
        assert_eq!(c.index(), a.index(), "free-list should hand back the vacated slot");
        assert!(arena.get(a).is_none(), "stale id must not alias the new occupant");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn stopping_is_terminal_and_reports_not_alive() {
        let mut arena = TaskArena::new();
        let id = plain(&mut arena);
        let task = arena.get_mut(id).expect("task");
        assert!(task.is_alive());
        assert!(task.stop().is_none(), "on-stack tasks hold no parked fiber");
        assert!(!task.is_alive());
        task.suspend();
        assert!(task.take_for_resume().is_none(), "stopped tasks never resume");
    }

    #[test]
    fn resume_requires_a_parked_suspended_fiber() {
        let mut arena = TaskArena::new();
        let id = plain(&mut arena);
        let task = arena.get_mut(id).expect("task");
        task.park(ScriptFiber::new("t", Box::pin(async { Ok::<(), crate::error::ScriptError>(()) })));
        assert!(task.take_for_resume().is_none(), "not suspended yet");
        task.suspend();
        task.suspend();
        assert!(task.take_for_resume().is_some());
        assert!(!task.is_suspended());
        assert_eq!(task.fiber_state(), FiberState::Running);
    }
}
