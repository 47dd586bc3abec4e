use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope, AST};

use crate::context::TaskContext;
use crate::coroutine::ScriptCoroutine;
use crate::error::{ScriptError, ScriptResult};
use crate::fiber::FiberBody;

/// Variables a closure was created with. Script functions see it as `this`.
pub type ScriptEnv = rhai::Map;

pub type NativeClosure = Rc<dyn Fn(TaskContext, Vec<Dynamic>) -> FiberBody>;

/// A callable a task can run.
#[derive(Clone)]
pub enum ScriptClosure {
    /// Host-registered async body; may suspend any number of times.
    Native { name: String, body: NativeClosure },
    /// Script function looked up by name. Runs as a coroutine that suspends
    /// whenever it calls a wait primitive.
    Script { name: String },
}

impl ScriptClosure {
    pub fn script(name: impl Into<String>) -> Self {
        ScriptClosure::Script { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            ScriptClosure::Native { name, .. } | ScriptClosure::Script { name } => name,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, ScriptClosure::Native { .. })
    }

    pub(crate) fn instantiate(&self, context: TaskContext, args: Vec<Dynamic>) -> FiberBody {
        match self {
            ScriptClosure::Native { body, .. } => body(context, args),
            ScriptClosure::Script { name } => {
                let name = name.clone();
                Box::pin(async move {
                    let source = context.scheduler()?.script_source().ok_or_else(|| {
                        ScriptError::resolution(format!("script function '{name}' (no script loaded)"))
                    })?;
                    let coroutine = ScriptCoroutine::start(&name, source, args, context.env().clone())?;
                    coroutine.run(context).await
                })
            }
        }
    }
}

impl fmt::Debug for ScriptClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptClosure::Native { name, .. } => f.debug_tuple("Native").field(name).finish(),
            ScriptClosure::Script { name } => f.debug_tuple("Script").field(name).finish(),
        }
    }
}

/// Owns the rhai engine, the compiled script and everything scripts share:
/// registered closures, globals and the log buffer.
pub struct ScriptHost {
    engine: Rc<Engine>,
    ast: Option<Rc<AST>>,
    /// Text of the compiled script; script coroutines compile their own copy.
    source: Option<String>,
    script_path: Option<PathBuf>,
    last_modified: Option<SystemTime>,
    error: Option<String>,
    closures: HashMap<String, NativeClosure>,
    globals: BTreeMap<String, Dynamic>,
    logs: Vec<String>,
}

impl ScriptHost {
    pub fn new(register: impl FnOnce(&mut Engine)) -> Self {
        let mut engine = script_engine();
        register(&mut engine);
        Self {
            engine: Rc::new(engine),
            ast: None,
            source: None,
            script_path: None,
            last_modified: None,
            error: None,
            closures: HashMap::new(),
            globals: BTreeMap::new(),
            logs: Vec::new(),
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn script_path(&self) -> Option<&Path> {
        self.script_path.as_deref()
    }

    pub fn has_script(&self) -> bool {
        self.ast.is_some()
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.script_path = Some(path.as_ref().to_path_buf());
        self.load_script()
    }

    pub fn load_source(&mut self, source: &str) -> Result<()> {
        self.compile(source.to_string())?;
        self.script_path = None;
        self.last_modified = None;
        Ok(())
    }

    pub fn force_reload(&mut self) -> Result<()> {
        self.load_script()
    }

    /// Recompiles the script when its file changed on disk. Returns whether
    /// a reload happened.
    pub fn reload_if_needed(&mut self) -> Result<bool> {
        let Some(path) = &self.script_path else {
            return Ok(false);
        };
        let metadata = fs::metadata(path).map_err(|err| anyhow!("Script file not accessible: {err}"))?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if self.ast.is_none() || self.last_modified.map_or(true, |prev| modified > prev) {
            self.load_script()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn load_script(&mut self) -> Result<()> {
        let path = self.script_path.clone().ok_or_else(|| anyhow!("No script path set"))?;
        let source = match fs::read_to_string(&path).with_context(|| format!("Reading {}", path.display())) {
            Ok(source) => source,
            Err(err) => {
                self.error = Some(err.to_string());
                return Err(err);
            }
        };
        self.compile(source)?;
        self.last_modified = fs::metadata(&path).ok().and_then(|meta| meta.modified().ok());
        Ok(())
    }

    fn compile(&mut self, source: String) -> Result<()> {
        match self.engine.compile(&source).with_context(|| "Compiling Rhai script") {
            Ok(ast) => {
                self.ast = Some(Rc::new(ast));
                self.source = Some(source);
                self.error = None;
                Ok(())
            }
            Err(err) => {
                self.error = Some(format!("{err:#}"));
                Err(err)
            }
        }
    }

    pub fn register_native(&mut self, name: impl Into<String>, body: NativeClosure) {
        self.closures.insert(name.into(), body);
    }

    /// Native closures shadow script functions of the same name.
    pub fn resolve(&self, name: &str) -> ScriptResult<ScriptClosure> {
        if let Some(body) = self.closures.get(name) {
            return Ok(ScriptClosure::Native { name: name.to_string(), body: body.clone() });
        }
        let known = self.ast.as_ref().map_or(false, |ast| ast.iter_functions().any(|func| func.name == name));
        if known {
            Ok(ScriptClosure::script(name))
        } else {
            Err(ScriptError::resolution(format!("closure '{name}'")))
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn has_function(&self, name: &str, arity: usize) -> bool {
        self.ast.as_ref().map_or(false, |ast| {
            ast.iter_functions().any(|func| func.name == name && func.params.len() == arity)
        })
    }

    pub(crate) fn check_invocable(&self, closure: &ScriptClosure, arity: usize) -> ScriptResult<()> {
        match closure {
            ScriptClosure::Native { .. } => Ok(()),
            ScriptClosure::Script { name } if self.has_function(name, arity) => Ok(()),
            ScriptClosure::Script { name } => {
                Err(ScriptError::resolution(format!("script function '{name}' taking {arity} argument(s)")))
            }
        }
    }

    /// Shared handles for a call, so no borrow of the host outlives it.
    pub(crate) fn invocation_parts(&self) -> Option<(Rc<Engine>, Rc<AST>)> {
        self.ast.as_ref().map(|ast| (self.engine.clone(), ast.clone()))
    }

    pub fn global(&self, name: &str) -> Option<Dynamic> {
        self.globals.get(name).cloned()
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Dynamic) {
        self.globals.insert(name.into(), value);
    }

    pub fn globals(&self) -> &BTreeMap<String, Dynamic> {
        &self.globals
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    pub fn take_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.logs)
    }
}

/// Engine configuration shared by the root engine and script coroutines.
pub(crate) fn script_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_fast_operators(true);
    engine
}

/// Calls a root-scope script function with a fresh scope, `this` bound to
/// the environment when there is one.
pub(crate) fn call_function(
    engine: &Engine,
    ast: &AST,
    name: &str,
    args: Vec<Dynamic>,
    this: Option<ScriptEnv>,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let mut scope = Scope::new();
    let mut this_ptr = this.map(Dynamic::from);
    let mut options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
    if let Some(this_ptr) = this_ptr.as_mut() {
        options = options.bind_this_ptr(this_ptr);
    }
    engine.call_fn_with_options::<Dynamic>(options, &mut scope, ast, name, args)
}

pub(crate) fn invoke(
    engine: &Engine,
    ast: &AST,
    name: &str,
    args: Vec<Dynamic>,
    this: Option<ScriptEnv>,
) -> ScriptResult<Dynamic> {
    call_function(engine, ast, name, args, this).map_err(|err| ScriptError::invocation(name, err))
}
