use crate::scheduler::Scheduler;

/// What a poll task sees of the current tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickStep {
    /// Game time elapsed this tick, already scaled by the speed factor.
    pub dt: f32,
    pub frame: u64,
    pub paused: bool,
}

/// Deferred work polled once per tick until it reports elapsed.
pub trait PollTask {
    fn advance(&mut self, scheduler: &Scheduler, step: &TickStep);
    fn is_elapsed(&self) -> bool;

    fn label(&self) -> &str {
        "poll_task"
    }
}

/// Elapsed once a fixed amount of game time has accumulated.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedTask {
    duration: f32,
    elapsed: f32,
}

impl TimedTask {
    pub fn new(seconds: f32) -> Self {
        Self { duration: seconds.max(0.0), elapsed: 0.0 }
    }

    /// Adds `dt` and reports whether the duration has been reached.
    pub fn accumulate(&mut self, dt: f32) -> bool {
        self.elapsed += dt;
        self.is_done()
    }

    pub fn is_done(&self) -> bool {
        self.elapsed >= self.duration
    }

    pub fn remaining(&self) -> f32 {
        (self.duration - self.elapsed).max(0.0)
    }
}

impl PollTask for TimedTask {
    fn advance(&mut self, _scheduler: &Scheduler, step: &TickStep) {
        self.accumulate(step.dt);
    }

    fn is_elapsed(&self) -> bool {
        self.is_done()
    }

    fn label(&self) -> &str {
        "timed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_reaches_duration_on_the_boundary_tick() {
        let mut timer = TimedTask::new(1.0);
        assert!(!timer.accumulate(0.5));
        assert!((timer.remaining() - 0.5).abs() < f32::EPSILON);
        assert!(timer.accumulate(0.5));
        assert_eq!(timer.remaining(), 0.0);
    }

    #[test]
    fn zero_duration_is_done_immediately() {
        let timer = TimedTask::new(-2.0);
        assert!(timer.is_done());
    }
}
