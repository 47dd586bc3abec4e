//! Functions scripts can call. Task, callback and entity ids cross the
//! boundary as plain integers; other values travel as JSON so a call can be
//! handed over from a script coroutine's thread.

use std::rc::{Rc, Weak};

use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, FLOAT, INT};
use serde_json::Value;

use crate::callback::CallbackId;
use crate::context::TaskContext;
use crate::error::ScriptResult;
use crate::scheduler::{Scheduler, SchedulerInner};
use crate::scripts::ScriptEnv;
use crate::task::TaskId;
use crate::world::{EntityId, SoundId};

pub(crate) type ApiResult<T> = Result<T, Box<EvalAltResult>>;

/// One primitive call made by a script.
#[derive(Debug)]
pub(crate) enum ScriptCall {
    Log(String),
    SetGlobal(String, Value),
    GetGlobal(String),
    Frame,
    StartTask { name: String, args: Vec<Value>, global: bool },
    StopTask(TaskId),
    IsTaskAlive(TaskId),
    StartCutscene { main: String, override_name: Option<String> },
    RequestOverride,
    AddCallback { seconds: f32, method: String, arg: Option<Value> },
    RemoveCallback(CallbackId),
    Wait(ScriptWait),
}

/// Suspension primitives. Only meaningful inside a task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ScriptWait {
    Frames(u32),
    Seconds(f32),
    Animating(EntityId),
    Walking(EntityId),
    Talking(Option<EntityId>),
    Sound(SoundId),
    Dialog,
    Cutscene,
    Camera,
    InputOff,
    Running(TaskId),
    Suspend,
}

impl ScriptWait {
    fn name(&self) -> &'static str {
        match self {
            ScriptWait::Frames(_) => "wait_frames",
            ScriptWait::Seconds(_) => "wait_seconds",
            ScriptWait::Animating(_) => "wait_while_animating",
            ScriptWait::Walking(_) => "wait_while_walking",
            ScriptWait::Talking(_) => "wait_while_talking",
            ScriptWait::Sound(_) => "wait_while_sound",
            ScriptWait::Dialog => "wait_while_dialog",
            ScriptWait::Cutscene => "wait_while_cutscene",
            ScriptWait::Camera => "wait_while_camera",
            ScriptWait::InputOff => "wait_while_input_off",
            ScriptWait::Running(_) => "wait_while_running",
            ScriptWait::Suspend => "suspend",
        }
    }
}

/// Where an engine sends its primitive calls.
pub(crate) trait ScriptPort {
    fn call(&self, call: ScriptCall) -> ApiResult<Value>;
}

/// Calls made from root-scope script functions (callbacks, host calls).
pub(crate) struct RootPort {
    scheduler: Weak<SchedulerInner>,
}

impl RootPort {
    pub(crate) fn new(scheduler: Weak<SchedulerInner>) -> Self {
        Self { scheduler }
    }
}

impl ScriptPort for RootPort {
    fn call(&self, call: ScriptCall) -> ApiResult<Value> {
        let scheduler = Scheduler::from_weak(&self.scheduler).ok_or_else(|| "scheduler is gone".to_string())?;
        dispatch(&scheduler, call)
    }
}

/// Runs a call outside any task.
pub(crate) fn dispatch(scheduler: &Scheduler, call: ScriptCall) -> ApiResult<Value> {
    match call {
        ScriptCall::Log(message) => {
            scheduler.log_script(&message);
            Ok(Value::Null)
        }
        ScriptCall::SetGlobal(name, value) => {
            scheduler.set_global(&name, dynamic_of(value)?);
            Ok(Value::Null)
        }
        ScriptCall::GetGlobal(name) => scheduler.global(&name).map_or(Ok(Value::Null), |value| value_of(&value)),
        ScriptCall::Frame => Ok(Value::from(scheduler.frame())),
        ScriptCall::StartTask { name, args, global } => {
            let closure = scheduler.closure(&name)?;
            let task = scheduler.spawn_task(&closure, dynamics_of(args)?, global)?;
            Ok(task_value(task))
        }
        ScriptCall::StopTask(task) => Ok(Value::Bool(scheduler.stop_task(task))),
        ScriptCall::IsTaskAlive(task) => Ok(Value::Bool(scheduler.is_task_alive(task))),
        ScriptCall::StartCutscene { main, override_name } => {
            let main = scheduler.closure(&main)?;
            let override_closure = override_name.map(|name| scheduler.closure(&name)).transpose()?;
            let cutscene = scheduler.start_cutscene(&main, override_closure.as_ref(), ScriptEnv::new())?;
            Ok(task_value(cutscene))
        }
        ScriptCall::RequestOverride => Ok(Value::Bool(scheduler.request_cutscene_override())),
        ScriptCall::AddCallback { seconds, method, arg } => {
            let arg = arg.map(dynamic_of).transpose()?;
            let callback = scheduler.add_timed_callback(seconds, &method, arg)?;
            Ok(Value::from(callback.raw()))
        }
        ScriptCall::RemoveCallback(callback) => Ok(Value::Bool(scheduler.remove_callback(callback))),
        ScriptCall::Wait(wait) => Err(format!("{} can only be called from a task", wait.name()).into()),
    }
}

/// Runs a call on behalf of the task behind `cx`. Waits park the task until
/// their awaiter resumes it; a cutscene parks it until the cutscene ends.
pub(crate) async fn serve(cx: &TaskContext, call: ScriptCall) -> ApiResult<Value> {
    match call {
        ScriptCall::Wait(wait) => {
            wait_for(cx, wait).await?;
            Ok(Value::Null)
        }
        ScriptCall::StartTask { name, args, global } => {
            let closure = cx.closure(&name)?;
            let task = cx.spawn_task(&closure, dynamics_of(args)?, global)?;
            Ok(task_value(task))
        }
        ScriptCall::StartCutscene { main, override_name } => {
            let main = cx.closure(&main)?;
            let override_closure = override_name.map(|name| cx.closure(&name)).transpose()?;
            let cutscene = cx.start_cutscene(&main, override_closure.as_ref()).await?;
            Ok(task_value(cutscene))
        }
        other => dispatch(&cx.scheduler()?, other),
    }
}

async fn wait_for(cx: &TaskContext, wait: ScriptWait) -> ScriptResult<()> {
    match wait {
        ScriptWait::Frames(frames) => cx.wait_frames(frames).await,
        ScriptWait::Seconds(seconds) => cx.wait_seconds(seconds).await,
        ScriptWait::Animating(entity) => cx.wait_while_animating(entity).await,
        ScriptWait::Walking(entity) => cx.wait_while_walking(entity).await,
        ScriptWait::Talking(entity) => cx.wait_while_talking(entity).await,
        ScriptWait::Sound(sound) => cx.wait_while_sound(sound).await,
        ScriptWait::Dialog => cx.wait_while_dialog().await,
        ScriptWait::Cutscene => cx.wait_while_cutscene().await,
        ScriptWait::Camera => cx.wait_while_camera().await,
        ScriptWait::InputOff => cx.wait_while_input_off().await,
        ScriptWait::Running(task) => cx.wait_while_running(task).await,
        ScriptWait::Suspend => cx.suspend().await,
    }
}

pub(crate) fn value_of(value: &Dynamic) -> ApiResult<Value> {
    rhai::serde::from_dynamic(value)
}

pub(crate) fn dynamic_of(value: Value) -> ApiResult<Dynamic> {
    rhai::serde::to_dynamic(value)
}

fn dynamics_of(values: Vec<Value>) -> ApiResult<Vec<Dynamic>> {
    values.into_iter().map(dynamic_of).collect()
}

fn task_value(task: TaskId) -> Value {
    Value::from(task_to_int(task))
}

fn task_to_int(task: TaskId) -> INT {
    task.to_bits() as INT
}

fn task_from_int(bits: INT) -> TaskId {
    TaskId::from_bits(bits as u64)
}

fn entity_from_int(entity: INT) -> EntityId {
    EntityId(entity as u32)
}

fn frames_from_int(frames: INT) -> u32 {
    frames.clamp(0, u32::MAX as INT) as u32
}

#[derive(Clone)]
struct ScriptApi {
    port: Rc<dyn ScriptPort>,
}

impl ScriptApi {
    fn call(&self, call: ScriptCall) -> ApiResult<Dynamic> {
        dynamic_of(self.port.call(call)?)
    }

    fn wait(&self, wait: ScriptWait) -> ApiResult<()> {
        self.port.call(ScriptCall::Wait(wait)).map(|_| ())
    }

    fn start_task(&self, name: ImmutableString, args: Array, global: bool) -> ApiResult<Dynamic> {
        let args = args.iter().map(value_of).collect::<ApiResult<Vec<_>>>()?;
        self.call(ScriptCall::StartTask { name: name.to_string(), args, global })
    }

    fn start_cutscene(&self, main: ImmutableString, override_name: Option<ImmutableString>) -> ApiResult<Dynamic> {
        let override_name = override_name.map(|name| name.to_string());
        self.call(ScriptCall::StartCutscene { main: main.to_string(), override_name })
    }

    fn add_timed_callback(&self, seconds: FLOAT, method: ImmutableString, arg: Option<Dynamic>) -> ApiResult<Dynamic> {
        let arg = arg.as_ref().map(value_of).transpose()?;
        self.call(ScriptCall::AddCallback { seconds: seconds as f32, method: method.to_string(), arg })
    }
}

pub(crate) fn register_api(engine: &mut Engine, port: Rc<dyn ScriptPort>) {
    let api = ScriptApi { port };

    let a = api.clone();
    engine.register_fn("log", move |message: ImmutableString| a.call(ScriptCall::Log(message.to_string())));
    let a = api.clone();
    engine.register_fn("set_global", move |name: ImmutableString, value: Dynamic| {
        a.call(ScriptCall::SetGlobal(name.to_string(), value_of(&value)?))
    });
    let a = api.clone();
    engine.register_fn("get_global", move |name: ImmutableString| a.call(ScriptCall::GetGlobal(name.to_string())));
    let a = api.clone();
    engine.register_fn("frame", move || a.call(ScriptCall::Frame));

    let a = api.clone();
    engine.register_fn("start_task", move |name: ImmutableString| a.start_task(name, Array::new(), false));
    let a = api.clone();
    engine.register_fn("start_task", move |name: ImmutableString, args: Array| a.start_task(name, args, false));
    let a = api.clone();
    engine.register_fn("start_global_task", move |name: ImmutableString| a.start_task(name, Array::new(), true));
    let a = api.clone();
    engine.register_fn("start_global_task", move |name: ImmutableString, args: Array| {
        a.start_task(name, args, true)
    });
    let a = api.clone();
    engine.register_fn("stop_task", move |task: INT| a.call(ScriptCall::StopTask(task_from_int(task))));
    let a = api.clone();
    engine.register_fn("is_task_alive", move |task: INT| a.call(ScriptCall::IsTaskAlive(task_from_int(task))));

    let a = api.clone();
    engine.register_fn("start_cutscene", move |main: ImmutableString| a.start_cutscene(main, None));
    let a = api.clone();
    engine.register_fn("start_cutscene", move |main: ImmutableString, override_name: ImmutableString| {
        a.start_cutscene(main, Some(override_name))
    });
    let a = api.clone();
    engine.register_fn("request_cutscene_override", move || a.call(ScriptCall::RequestOverride));

    let a = api.clone();
    engine.register_fn("add_timed_callback", move |seconds: FLOAT, method: ImmutableString| {
        a.add_timed_callback(seconds, method, None)
    });
    let a = api.clone();
    engine.register_fn("add_timed_callback", move |seconds: FLOAT, method: ImmutableString, arg: Dynamic| {
        a.add_timed_callback(seconds, method, Some(arg))
    });
    let a = api.clone();
    engine.register_fn("remove_callback", move |callback: INT| {
        a.call(ScriptCall::RemoveCallback(CallbackId::from_raw(callback as u64)))
    });

    register_waits(engine, &api);
}

fn register_waits(engine: &mut Engine, api: &ScriptApi) {
    let a = api.clone();
    engine.register_fn("wait_frames", move |frames: INT| a.wait(ScriptWait::Frames(frames_from_int(frames))));
    let a = api.clone();
    engine.register_fn("wait_seconds", move |seconds: FLOAT| a.wait(ScriptWait::Seconds(seconds as f32)));
    let a = api.clone();
    engine.register_fn("wait_seconds", move |seconds: INT| a.wait(ScriptWait::Seconds(seconds as f32)));
    let a = api.clone();
    engine.register_fn("wait_while_animating", move |entity: INT| {
        a.wait(ScriptWait::Animating(entity_from_int(entity)))
    });
    let a = api.clone();
    engine.register_fn("wait_while_walking", move |entity: INT| a.wait(ScriptWait::Walking(entity_from_int(entity))));
    let a = api.clone();
    engine.register_fn("wait_while_talking", move || a.wait(ScriptWait::Talking(None)));
    let a = api.clone();
    engine.register_fn("wait_while_talking", move |entity: INT| {
        a.wait(ScriptWait::Talking(Some(entity_from_int(entity))))
    });
    let a = api.clone();
    engine.register_fn("wait_while_sound", move |sound: INT| a.wait(ScriptWait::Sound(SoundId(sound as u32))));
    let a = api.clone();
    engine.register_fn("wait_while_dialog", move || a.wait(ScriptWait::Dialog));
    let a = api.clone();
    engine.register_fn("wait_while_cutscene", move || a.wait(ScriptWait::Cutscene));
    let a = api.clone();
    engine.register_fn("wait_while_camera", move || a.wait(ScriptWait::Camera));
    let a = api.clone();
    engine.register_fn("wait_while_input_off", move || a.wait(ScriptWait::InputOff));
    let a = api.clone();
    engine.register_fn("wait_while_running", move |task: INT| a.wait(ScriptWait::Running(task_from_int(task))));
    let a = api.clone();
    engine.register_fn("suspend", move || a.wait(ScriptWait::Suspend));
}
