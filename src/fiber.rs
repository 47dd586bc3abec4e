use crate::error::{ScriptError, ScriptResult};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// Body of a fiber. Suspension points are the `await`s on [`Suspend`].
pub type FiberBody = Pin<Box<dyn Future<Output = ScriptResult<()>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    Running,
    Suspended,
    Idle,
}

#[derive(Debug)]
pub(crate) enum FiberStep {
    Suspended,
    Finished,
    Failed(ScriptError),
}

/// One cooperative execution context. Stepping a fiber runs it on the
/// caller's stack until it yields or completes.
pub struct ScriptFiber {
    name: String,
    body: Option<FiberBody>,
    state: FiberState,
}

impl ScriptFiber {
    pub fn new(name: impl Into<String>, body: FiberBody) -> Self {
        Self { name: name.into(), body: Some(body), state: FiberState::Suspended }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> FiberState {
        self.state
    }

    pub(crate) fn step(&mut self) -> FiberStep {
        let Some(body) = self.body.as_mut() else {
            return FiberStep::Finished;
        };
        self.state = FiberState::Running;
        let mut cx = Context::from_waker(Waker::noop());
        match body.as_mut().poll(&mut cx) {
            Poll::Pending => {
                self.state = FiberState::Suspended;
                FiberStep::Suspended
            }
            Poll::Ready(result) => {
                self.state = FiberState::Idle;
                self.body = None;
                match result {
                    Ok(()) => FiberStep::Finished,
                    Err(err) => FiberStep::Failed(err),
                }
            }
        }
    }
}

impl fmt::Debug for ScriptFiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFiber").field("name", &self.name).field("state", &self.state).finish()
    }
}

/// Yields control back to whoever stepped the fiber. Completes on the next
/// step, which only a scheduler resume issues.
#[derive(Debug, Default)]
#[must_use = "a suspension does nothing unless awaited"]
pub struct Suspend {
    yielded: bool,
}

impl Future for Suspend {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            Poll::Pending
        }
    }
}
