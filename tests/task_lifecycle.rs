use std::cell::RefCell;
use std::rc::Rc;

use kestrel_tasks::{Scheduler, SchedulerEvent, ScriptError, StageWorld, TaskContext};
use rhai::Dynamic;

type Trace = Rc<RefCell<Vec<String>>>;

fn scheduler() -> Scheduler {
    Scheduler::new(StageWorld::new())
}

fn push(trace: &Trace, line: &str) {
    trace.borrow_mut().push(line.to_string());
}

#[test]
fn spawn_runs_until_the_first_suspension() {
    let scheduler = scheduler();
    let trace: Trace = Rc::default();
    let t = trace.clone();
    scheduler.register_closure("walker", move |cx: TaskContext, _args: Vec<Dynamic>| {
        let t = t.clone();
        async move {
            push(&t, "start");
            cx.wait_frames(1).await?;
            push(&t, "end");
            Ok::<(), ScriptError>(())
        }
    });
    let closure = scheduler.closure("walker").expect("registered");
    let task = scheduler.spawn_task(&closure, Vec::new(), false).expect("spawn");

    assert_eq!(*trace.borrow(), vec!["start"]);
    assert!(scheduler.is_task_alive(task));
    assert!(scheduler.is_task_suspended(task));

    scheduler.tick(0.016);
    assert_eq!(*trace.borrow(), vec!["start", "end"]);
    assert!(!scheduler.is_task_alive(task));
    assert_eq!(scheduler.task_count(), 0, "finished records are reaped");
}

#[test]
fn task_without_suspension_finishes_inside_spawn() {
    let scheduler = scheduler();
    scheduler.register_closure("instant", |_cx: TaskContext, _args: Vec<Dynamic>| async { Ok::<(), ScriptError>(()) });
    let closure = scheduler.closure("instant").expect("registered");
    let task = scheduler.spawn_task(&closure, Vec::new(), false).expect("spawn");
    assert!(!scheduler.is_task_alive(task));
    let events = scheduler.take_events();
    assert_eq!(
        events,
        vec![
            SchedulerEvent::TaskSpawned { task, closure: "instant".into() },
            SchedulerEvent::TaskFinished { task },
        ]
    );
}

#[test]
fn redundant_resume_suspend_and_stop_are_no_ops() {
    let scheduler = scheduler();
    let steps = Rc::new(RefCell::new(0));
    let s = steps.clone();
    scheduler.register_closure("sleeper", move |cx: TaskContext, _args: Vec<Dynamic>| {
        let s = s.clone();
        async move {
            for _ in 0..2 {
                *s.borrow_mut() += 1;
                cx.suspend().await?;
            }
            Ok::<(), ScriptError>(())
        }
    });
    let closure = scheduler.closure("sleeper").expect("registered");
    let task = scheduler.spawn_task(&closure, Vec::new(), false).expect("spawn");
    assert_eq!(*steps.borrow(), 1);

    assert!(scheduler.suspend_task(task), "suspending a suspended task is allowed");
    assert!(scheduler.resume_task(task));
    assert_eq!(*steps.borrow(), 2);
    assert!(scheduler.resume_task(task));
    assert!(!scheduler.is_task_alive(task));
    assert!(!scheduler.resume_task(task), "finished tasks ignore resumes");
    assert!(!scheduler.stop_task(task), "stopping a finished task does nothing");
}

#[test]
fn resume_is_ignored_while_the_task_is_not_suspended() {
    let scheduler = scheduler();
    let resumed_self = Rc::new(RefCell::new(None));
    let r = resumed_self.clone();
    scheduler.register_closure("selfish", move |cx: TaskContext, _args: Vec<Dynamic>| {
        let r = r.clone();
        async move {
            let scheduler = cx.scheduler()?;
            *r.borrow_mut() = Some(scheduler.resume_task(cx.task_id()));
            Ok::<(), ScriptError>(())
        }
    });
    let closure = scheduler.closure("selfish").expect("registered");
    scheduler.spawn_task(&closure, Vec::new(), false).expect("spawn");
    assert_eq!(*resumed_self.borrow(), Some(false));
}

#[test]
fn stopped_tasks_never_run_again() {
    let scheduler = scheduler();
    let trace: Trace = Rc::default();
    let t = trace.clone();
    scheduler.register_closure("waiter", move |cx: TaskContext, _args: Vec<Dynamic>| {
        let t = t.clone();
        async move {
            cx.wait_seconds(0.1).await?;
            push(&t, "woke");
            Ok::<(), ScriptError>(())
        }
    });
    let closure = scheduler.closure("waiter").expect("registered");
    let task = scheduler.spawn_task(&closure, Vec::new(), false).expect("spawn");
    scheduler.take_events();

    assert!(scheduler.stop_task(task));
    assert!(!scheduler.is_task_alive(task));
    for _ in 0..3 {
        scheduler.tick(0.5);
        assert!(!scheduler.is_task_alive(task));
    }
    assert!(trace.borrow().is_empty());
    assert_eq!(
        scheduler.take_events(),
        vec![SchedulerEvent::TaskStopped { task }, SchedulerEvent::ResumeDropped { task }]
    );
    assert_eq!(scheduler.poll_task_count(), 0, "the orphaned awaiter elapsed");
}

#[test]
fn task_ids_are_not_reused_after_completion() {
    let scheduler = scheduler();
    scheduler.register_closure("instant", |_cx: TaskContext, _args: Vec<Dynamic>| async { Ok::<(), ScriptError>(()) });
    let closure = scheduler.closure("instant").expect("registered");
    let first = scheduler.spawn_task(&closure, Vec::new(), false).expect("spawn");
    let second = scheduler.spawn_task(&closure, Vec::new(), false).expect("spawn");
    assert_ne!(first, second);
    assert!(second > first);
}

#[test]
fn failing_first_step_reports_invocation_error() {
    let scheduler = scheduler();
    scheduler.register_closure("broken", |_cx: TaskContext, _args: Vec<Dynamic>| async {
        Err::<(), _>(ScriptError::invocation("broken", "missing prop"))
    });
    let closure = scheduler.closure("broken").expect("registered");
    let err = scheduler.spawn_task(&closure, Vec::new(), false).expect_err("body raises");
    assert!(matches!(err, ScriptError::Invocation { .. }));
    assert_eq!(scheduler.task_count(), 0);
    assert!(scheduler
        .take_events()
        .iter()
        .any(|event| matches!(event, SchedulerEvent::TaskFailed { message, .. } if message.contains("missing prop"))));
}

#[test]
fn failure_after_a_resume_ends_the_task_without_stopping_the_tick() {
    let scheduler = scheduler();
    let trace: Trace = Rc::default();
    let t = trace.clone();
    scheduler.register_closure("fragile", |cx: TaskContext, _args: Vec<Dynamic>| async move {
        cx.wait_frames(1).await?;
        Err::<(), _>(ScriptError::invocation("fragile", "bad state"))
    });
    scheduler.register_closure("steady", move |cx: TaskContext, _args: Vec<Dynamic>| {
        let t = t.clone();
        async move {
            cx.wait_frames(1).await?;
            push(&t, "steady");
            Ok::<(), ScriptError>(())
        }
    });
    let fragile = scheduler.spawn_task(&scheduler.closure("fragile").expect("fragile"), Vec::new(), false).expect("spawn");
    let steady = scheduler.spawn_task(&scheduler.closure("steady").expect("steady"), Vec::new(), false).expect("spawn");

    scheduler.tick(0.016);
    assert!(!scheduler.is_task_alive(fragile));
    assert!(!scheduler.is_task_alive(steady));
    assert_eq!(*trace.borrow(), vec!["steady"]);
}

#[test]
fn unknown_closures_fail_resolution_and_register_nothing() {
    let scheduler = scheduler();
    scheduler.load_script_source("fn greet(name) { log(\"hello \" + name); }").expect("compile");

    assert!(scheduler.closure("missing").expect_err("unknown").is_resolution());

    let greet = scheduler.closure("greet").expect("script function");
    let err = scheduler.spawn_task(&greet, Vec::new(), false).expect_err("wrong arity");
    assert!(err.is_resolution());
    assert_eq!(scheduler.task_count(), 0);
    assert!(scheduler.take_events().is_empty());

    scheduler.spawn_task(&greet, vec![Dynamic::from("elaine".to_string())], false).expect("spawn");
    assert_eq!(scheduler.take_logs(), vec!["hello elaine"]);
}

#[test]
fn stop_local_tasks_spares_global_tasks() {
    let scheduler = scheduler();
    scheduler.register_closure("idle", |cx: TaskContext, _args: Vec<Dynamic>| async move {
        cx.suspend().await?;
        Ok::<(), ScriptError>(())
    });
    let idle = scheduler.closure("idle").expect("registered");
    let local = scheduler.spawn_task(&idle, Vec::new(), false).expect("spawn local");
    let global = scheduler.spawn_task(&idle, Vec::new(), true).expect("spawn global");

    assert_eq!(scheduler.stop_local_tasks(), 1);
    assert!(!scheduler.is_task_alive(local));
    assert!(scheduler.is_task_alive(global));
}

#[test]
fn script_tasks_see_their_environment_as_this() {
    let scheduler = scheduler();
    scheduler
        .load_script_source("fn announce() { set_global(\"room\", this.room); }")
        .expect("compile");
    let mut env = kestrel_tasks::ScriptEnv::new();
    env.insert("room".into(), Dynamic::from("scumm_bar".to_string()));
    let options = kestrel_tasks::SpawnOptions { env, ..Default::default() };
    let announce = scheduler.closure("announce").expect("script function");
    scheduler.spawn_task_with(&announce, Vec::new(), options).expect("spawn");
    let room = scheduler.global("room").expect("global set");
    assert_eq!(room.into_string().expect("string"), "scumm_bar");
}
