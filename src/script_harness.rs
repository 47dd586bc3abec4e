use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use rhai::{Dynamic, INT};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::SchedulerConfig;
use crate::scheduler::Scheduler;
use crate::scripts::ScriptEnv;
use crate::world::{EntityId, GameWorld, StageWorld};

/// A scripted replay: a script, a world, and a timeline of host actions fed
/// to the scheduler before chosen ticks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessFixture {
    pub main_script: String,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_dt")]
    pub dt: f32,
    #[serde(default = "default_speed_factor")]
    pub speed_factor: f32,
    #[serde(default)]
    pub entities: Vec<EntityId>,
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEntry {
    /// Applied right before the tick of this step.
    pub step: usize,
    #[serde(flatten)]
    pub action: FixtureAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FixtureAction {
    StartTask {
        closure: String,
        #[serde(default)]
        global: bool,
    },
    StartCutscene {
        main: String,
        #[serde(default)]
        override_closure: Option<String>,
    },
    RequestOverride,
    AddCallback {
        seconds: f32,
        method: String,
        #[serde(default)]
        arg: Option<i64>,
    },
    StopLocalTasks,
    SetPaused {
        paused: bool,
    },
    SetWalking {
        entity: EntityId,
        walking: bool,
    },
    SetTalking {
        entity: EntityId,
        talking: bool,
    },
    PlayAnimation {
        entity: EntityId,
    },
    StopAnimation {
        entity: EntityId,
    },
    SetDialog {
        active: bool,
    },
    SetCamera {
        moving: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub steps: usize,
    pub dt: f32,
    pub results: Vec<StepResult>,
    pub globals: BTreeMap<String, String>,
    pub final_input_active: bool,
    pub live_tasks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: usize,
    pub frame: u64,
    pub logs: Vec<String>,
    pub events: Vec<String>,
}

fn default_steps() -> usize {
    60
}

fn default_dt() -> f32 {
    1.0 / 60.0
}

fn default_speed_factor() -> f32 {
    1.0
}

pub fn run_fixture(fixture: &HarnessFixture) -> Result<HarnessOutput> {
    let world = Rc::new(RefCell::new(StageWorld::new()));
    for entity in &fixture.entities {
        world.borrow_mut().add_entity(*entity);
    }
    let config = SchedulerConfig { speed_factor: fixture.speed_factor, ..SchedulerConfig::default() };
    let scheduler = Scheduler::with_config(&config, world.clone());
    scheduler.load_script(&fixture.main_script)?;

    let mut results = Vec::with_capacity(fixture.steps);
    for step in 0..fixture.steps {
        for entry in fixture.timeline.iter().filter(|entry| entry.step == step) {
            apply_action(&scheduler, &world, &entry.action)
                .with_context(|| format!("applying {:?} at step {step}", entry.action))?;
        }
        scheduler.tick(fixture.dt);
        let events = scheduler.take_events().iter().map(ToString::to_string).collect();
        results.push(StepResult { step, frame: scheduler.frame(), logs: scheduler.take_logs(), events });
    }

    let globals = scheduler.globals().into_iter().map(|(name, value)| (name, value.to_string())).collect();
    let final_input_active = world.borrow().input_state().input_active();
    Ok(HarnessOutput {
        steps: fixture.steps,
        dt: fixture.dt,
        results,
        globals,
        final_input_active,
        live_tasks: scheduler.task_count(),
    })
}

fn apply_action(scheduler: &Scheduler, world: &RefCell<StageWorld>, action: &FixtureAction) -> Result<()> {
    match action {
        FixtureAction::StartTask { closure, global } => {
            let resolved = scheduler.closure(closure)?;
            // a failing first step is part of the replay, not a harness error
            if let Err(err) = scheduler.spawn_task(&resolved, Vec::new(), *global) {
                warn!(target: "scheduler", "Fixture task '{closure}' failed on its first step: {err}");
            }
        }
        FixtureAction::StartCutscene { main, override_closure } => {
            let main = scheduler.closure(main)?;
            let override_closure = override_closure.as_deref().map(|name| scheduler.closure(name)).transpose()?;
            scheduler.start_cutscene(&main, override_closure.as_ref(), ScriptEnv::new())?;
        }
        FixtureAction::RequestOverride => {
            scheduler.request_cutscene_override();
        }
        FixtureAction::AddCallback { seconds, method, arg } => {
            let arg = arg.map(|value| Dynamic::from(value as INT));
            scheduler.add_timed_callback(*seconds, method, arg)?;
        }
        FixtureAction::StopLocalTasks => {
            scheduler.stop_local_tasks();
        }
        FixtureAction::SetPaused { paused } => scheduler.set_paused(*paused),
        FixtureAction::SetWalking { entity, walking } => world.borrow_mut().set_walking(*entity, *walking),
        FixtureAction::SetTalking { entity, talking } => world.borrow_mut().set_talking(*entity, *talking),
        FixtureAction::PlayAnimation { entity } => {
            world.borrow_mut().play_animation(*entity);
        }
        FixtureAction::StopAnimation { entity } => world.borrow_mut().stop_animation(*entity),
        FixtureAction::SetDialog { active } => world.borrow_mut().set_dialog_active(*active),
        FixtureAction::SetCamera { moving } => world.borrow_mut().set_camera_moving(*moving),
    }
    Ok(())
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let file = File::open(path.as_ref()).with_context(|| format!("opening fixture '{}'", path.as_ref().display()))?;
    serde_json::from_reader(file).with_context(|| "parsing fixture JSON")
}
