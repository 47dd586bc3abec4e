use crate::input::InputState;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnimationHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SoundId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// Queries the scheduler needs from the rest of the engine. Actors are
/// entities; objects can talk too.
pub trait GameWorld {
    fn has_entity(&self, entity: EntityId) -> bool;
    fn current_animation(&self, entity: EntityId) -> Option<AnimationHandle>;
    fn is_animation_playing(&self, animation: AnimationHandle) -> bool;
    fn is_walking(&self, entity: EntityId) -> bool;
    fn is_talking(&self, entity: EntityId) -> bool;
    fn is_any_actor_talking(&self) -> bool;
    fn is_sound_playing(&self, sound: SoundId) -> bool;
    fn is_dialog_active(&self) -> bool;
    fn is_camera_moving(&self) -> bool;
    fn input_state(&self) -> InputState;
    fn set_input_state(&mut self, state: InputState);
    fn follow_current_actor(&mut self);
}

#[derive(Debug, Default, Clone)]
struct StageEntity {
    animation: Option<AnimationHandle>,
    walking: bool,
    talking: bool,
}

/// In-memory world used by the replay harness and tests. State only changes
/// when the host says so, which keeps runs deterministic.
#[derive(Debug, Default, Clone)]
pub struct StageWorld {
    entities: HashMap<EntityId, StageEntity>,
    playing_animations: HashSet<AnimationHandle>,
    playing_sounds: HashSet<SoundId>,
    next_handle: u32,
    dialog_active: bool,
    camera_moving: bool,
    input: InputState,
    follow_requests: u32,
}

impl StageWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, entity: EntityId) {
        self.entities.entry(entity).or_default();
    }

    pub fn remove_entity(&mut self, entity: EntityId) -> bool {
        match self.entities.remove(&entity) {
            Some(removed) => {
                if let Some(animation) = removed.animation {
                    self.playing_animations.remove(&animation);
                }
                true
            }
            None => false,
        }
    }

    /// Starts a new animation instance on `entity`, replacing the previous one.
    pub fn play_animation(&mut self, entity: EntityId) -> Option<AnimationHandle> {
        let handle = AnimationHandle(self.allocate_handle());
        let slot = self.entities.get_mut(&entity)?;
        if let Some(previous) = slot.animation.replace(handle) {
            self.playing_animations.remove(&previous);
        }
        self.playing_animations.insert(handle);
        Some(handle)
    }

    pub fn stop_animation(&mut self, entity: EntityId) {
        if let Some(handle) = self.entities.get_mut(&entity).and_then(|slot| slot.animation.take()) {
            self.playing_animations.remove(&handle);
        }
    }

    pub fn set_walking(&mut self, entity: EntityId, walking: bool) {
        if let Some(slot) = self.entities.get_mut(&entity) {
            slot.walking = walking;
        }
    }

    pub fn set_talking(&mut self, entity: EntityId, talking: bool) {
        if let Some(slot) = self.entities.get_mut(&entity) {
            slot.talking = talking;
        }
    }

    pub fn play_sound(&mut self) -> SoundId {
        let sound = SoundId(self.allocate_handle());
        self.playing_sounds.insert(sound);
        sound
    }

    pub fn stop_sound(&mut self, sound: SoundId) {
        self.playing_sounds.remove(&sound);
    }

    pub fn set_dialog_active(&mut self, active: bool) {
        self.dialog_active = active;
    }

    pub fn set_camera_moving(&mut self, moving: bool) {
        self.camera_moving = moving;
    }

    pub fn follow_requests(&self) -> u32 {
        self.follow_requests
    }

    fn allocate_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl GameWorld for StageWorld {
    fn has_entity(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    fn current_animation(&self, entity: EntityId) -> Option<AnimationHandle> {
        self.entities.get(&entity).and_then(|slot| slot.animation)
    }

    fn is_animation_playing(&self, animation: AnimationHandle) -> bool {
        self.playing_animations.contains(&animation)
    }

    fn is_walking(&self, entity: EntityId) -> bool {
        self.entities.get(&entity).map_or(false, |slot| slot.walking)
    }

    fn is_talking(&self, entity: EntityId) -> bool {
        self.entities.get(&entity).map_or(false, |slot| slot.talking)
    }

    fn is_any_actor_talking(&self) -> bool {
        self.entities.values().any(|slot| slot.talking)
    }

    fn is_sound_playing(&self, sound: SoundId) -> bool {
        self.playing_sounds.contains(&sound)
    }

    fn is_dialog_active(&self) -> bool {
        self.dialog_active
    }

    fn is_camera_moving(&self) -> bool {
        self.camera_moving
    }

    fn input_state(&self) -> InputState {
        self.input
    }

    fn set_input_state(&mut self, state: InputState) {
        self.input = state;
    }

    fn follow_current_actor(&mut self) {
        self.follow_requests += 1;
    }
}

/// Lets the host keep a handle to the world it gave the scheduler.
impl<W: GameWorld> GameWorld for Rc<RefCell<W>> {
    fn has_entity(&self, entity: EntityId) -> bool {
        self.borrow().has_entity(entity)
    }

    fn current_animation(&self, entity: EntityId) -> Option<AnimationHandle> {
        self.borrow().current_animation(entity)
    }

    fn is_animation_playing(&self, animation: AnimationHandle) -> bool {
        self.borrow().is_animation_playing(animation)
    }

    fn is_walking(&self, entity: EntityId) -> bool {
        self.borrow().is_walking(entity)
    }

    fn is_talking(&self, entity: EntityId) -> bool {
        self.borrow().is_talking(entity)
    }

    fn is_any_actor_talking(&self) -> bool {
        self.borrow().is_any_actor_talking()
    }

    fn is_sound_playing(&self, sound: SoundId) -> bool {
        self.borrow().is_sound_playing(sound)
    }

    fn is_dialog_active(&self) -> bool {
        self.borrow().is_dialog_active()
    }

    fn is_camera_moving(&self) -> bool {
        self.borrow().is_camera_moving()
    }

    fn input_state(&self) -> InputState {
        self.borrow().input_state()
    }

    fn set_input_state(&mut self, state: InputState) {
        self.borrow_mut().set_input_state(state);
    }

    fn follow_current_actor(&mut self) {
        self.borrow_mut().follow_current_actor();
    }
}
