pub(crate) mod api;
pub mod awaiter;
pub mod callback;
pub mod config;
pub mod context;
pub(crate) mod coroutine;
pub mod cutscene;
pub mod error;
pub mod events;
pub mod fiber;
pub mod input;
pub mod poll;
pub mod scheduler;
pub mod script_harness;
pub mod scripts;
pub mod task;
pub mod time;
pub mod world;

pub use callback::CallbackId;
pub use config::SchedulerConfig;
pub use context::TaskContext;
pub use cutscene::CutsceneState;
pub use error::{ScriptError, ScriptResult};
pub use events::SchedulerEvent;
pub use scheduler::{Scheduler, SpawnOptions};
pub use scripts::{ScriptClosure, ScriptEnv};
pub use task::TaskId;
pub use world::{EntityId, GameWorld, SoundId, StageWorld};
