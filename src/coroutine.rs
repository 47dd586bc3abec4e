//! Script coroutines. rhai cannot yield, so each script task evaluates on a
//! worker thread of its own that parks whenever the script calls a
//! primitive. The scheduler serves the call (suspending the task when the
//! call is a wait) and sends the reply back. Exactly one side runs at a time.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use rhai::{Dynamic, Engine, EvalAltResult, Position};
use serde_json::Value;
use tracing::trace;

use crate::api::{self, ApiResult, ScriptCall, ScriptPort};
use crate::context::TaskContext;
use crate::error::{ScriptError, ScriptResult};
use crate::scripts::{self, ScriptEnv};

type Reply = Result<Value, String>;

enum WorkerMessage {
    Call(ScriptCall),
    Finished(Result<(), String>),
}

/// Scheduler end of a running script function. Dropping it terminates the
/// script at its next primitive call.
pub(crate) struct ScriptCoroutine {
    name: String,
    messages: Receiver<WorkerMessage>,
    replies: Sender<Reply>,
}

impl ScriptCoroutine {
    /// Compiles `source` on a fresh worker and starts calling `name`. The
    /// script runs until its first primitive call before this returns control
    /// to anyone, because [`ScriptCoroutine::run`] blocks on it.
    pub(crate) fn start(name: &str, source: String, args: Vec<Dynamic>, env: ScriptEnv) -> ScriptResult<Self> {
        let args = args
            .iter()
            .map(api::value_of)
            .collect::<ApiResult<Vec<_>>>()
            .map_err(|err| ScriptError::invocation(name, err))?;
        let env = api::value_of(&Dynamic::from_map(env)).map_err(|err| ScriptError::invocation(name, err))?;

        let (message_tx, messages) = mpsc::channel();
        let (replies, reply_rx) = mpsc::channel();
        let function = name.to_string();
        thread::Builder::new()
            .name(format!("script:{name}"))
            .spawn(move || run_worker(&function, &source, args, env, message_tx, reply_rx))
            .map_err(|err| ScriptError::invocation(name, err))?;
        Ok(Self { name: name.to_string(), messages, replies })
    }

    /// Serves the script's primitive calls until the function returns.
    pub(crate) async fn run(self, cx: TaskContext) -> ScriptResult<()> {
        loop {
            let message = self.messages.recv().map_err(|_| self.worker_gone())?;
            match message {
                WorkerMessage::Finished(result) => {
                    return result.map_err(|message| ScriptError::invocation(&self.name, message));
                }
                WorkerMessage::Call(call) => {
                    trace!(target: "script", "{} ('{}') calls {call:?}", cx.task_id(), self.name);
                    let reply = api::serve(&cx, call).await.map_err(|err| error_message(&err));
                    self.replies.send(reply).map_err(|_| self.worker_gone())?;
                }
            }
        }
    }

    fn worker_gone(&self) -> ScriptError {
        ScriptError::invocation(&self.name, "script thread exited unexpectedly")
    }
}

/// Worker end. A disconnected channel means the task was stopped.
struct WorkerPort {
    messages: Sender<WorkerMessage>,
    replies: Receiver<Reply>,
    stopped: Rc<Cell<bool>>,
}

impl WorkerPort {
    fn terminated(&self) -> Box<EvalAltResult> {
        self.stopped.set(true);
        EvalAltResult::ErrorTerminated(Dynamic::UNIT, Position::NONE).into()
    }
}

impl ScriptPort for WorkerPort {
    fn call(&self, call: ScriptCall) -> ApiResult<Value> {
        if self.stopped.get() || self.messages.send(WorkerMessage::Call(call)).is_err() {
            return Err(self.terminated());
        }
        match self.replies.recv() {
            Ok(reply) => reply.map_err(Into::into),
            Err(_) => Err(self.terminated()),
        }
    }
}

/// Runtime errors carry their message as the payload; re-raising the
/// formatted error would prefix it twice.
fn error_message(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorRuntime(payload, _) => payload.to_string(),
        other => other.to_string(),
    }
}

fn run_worker(
    name: &str,
    source: &str,
    args: Vec<Value>,
    env: Value,
    messages: Sender<WorkerMessage>,
    replies: Receiver<Reply>,
) {
    let stopped = Rc::new(Cell::new(false));
    let mut engine = scripts::script_engine();
    let flag = stopped.clone();
    // a stopped script that loops without calling a primitive still ends
    engine.on_progress(move |_| flag.get().then_some(Dynamic::UNIT));
    let port = WorkerPort { messages: messages.clone(), replies, stopped };
    api::register_api(&mut engine, Rc::new(port));

    let outcome = evaluate(&engine, name, source, args, env);
    // the task may already be gone
    let _ = messages.send(WorkerMessage::Finished(outcome));
}

fn evaluate(engine: &Engine, name: &str, source: &str, args: Vec<Value>, env: Value) -> Result<(), String> {
    let ast = engine.compile(source).map_err(|err| err.to_string())?;
    let args = args.into_iter().map(api::dynamic_of).collect::<ApiResult<Vec<_>>>().map_err(|err| err.to_string())?;
    let env = api::dynamic_of(env).map_err(|err| err.to_string())?.try_cast::<ScriptEnv>();
    scripts::call_function(engine, &ast, name, args, env).map(|_| ()).map_err(|err| err.to_string())
}
