use std::cell::{Cell, RefCell};
use std::rc::Rc;

use kestrel_tasks::input::InputState;
use kestrel_tasks::{EntityId, GameWorld, Scheduler, ScriptError, SpawnOptions, StageWorld, TaskContext, TaskId};
use rhai::{Dynamic, INT};

type SharedWorld = Rc<RefCell<StageWorld>>;

const ACTOR: EntityId = EntityId(1);
const SIDEKICK: EntityId = EntityId(2);

fn stage() -> (Scheduler, SharedWorld) {
    let world: SharedWorld = Rc::new(RefCell::new(StageWorld::new()));
    world.borrow_mut().add_entity(ACTOR);
    world.borrow_mut().add_entity(SIDEKICK);
    (Scheduler::new(world.clone()), world)
}

/// Registers `name` as a closure that runs `wait` once and records the frame
/// it woke up on.
fn register_waiter<W, Fut>(scheduler: &Scheduler, name: &str, wait: W) -> Rc<Cell<Option<u64>>>
where
    W: Fn(TaskContext) -> Fut + Clone + 'static,
    Fut: std::future::Future<Output = Result<(), ScriptError>> + 'static,
{
    let woke = Rc::new(Cell::new(None));
    let w = woke.clone();
    scheduler.register_closure(name, move |cx: TaskContext, _args: Vec<Dynamic>| {
        let w = w.clone();
        let wait = wait.clone();
        async move {
            wait(cx.clone()).await?;
            w.set(Some(cx.frame()));
            Ok::<(), ScriptError>(())
        }
    });
    woke
}

fn spawn(scheduler: &Scheduler, name: &str) -> Result<TaskId, ScriptError> {
    let closure = scheduler.closure(name)?;
    scheduler.spawn_task(&closure, Vec::new(), false)
}

#[test]
fn wait_seconds_sets_global_on_the_third_tick() {
    let (scheduler, _) = stage();
    scheduler.register_closure("answer", |cx: TaskContext, _args: Vec<Dynamic>| async move {
        cx.wait_seconds(1.0).await?;
        cx.set_global("answer", 42 as INT)?;
        Ok::<(), ScriptError>(())
    });
    spawn(&scheduler, "answer").expect("spawn");

    scheduler.tick(0.4);
    assert!(scheduler.global("answer").is_none());
    scheduler.tick(0.4);
    assert!(scheduler.global("answer").is_none());
    scheduler.tick(0.4);
    assert_eq!(scheduler.global("answer").and_then(|value| value.as_int().ok()), Some(42));
}

#[test]
fn waiting_on_a_stopped_task_resumes_within_one_tick() {
    let (scheduler, _) = stage();
    scheduler.register_closure("idle", |cx: TaskContext, _args: Vec<Dynamic>| async move {
        cx.suspend().await?;
        Ok::<(), ScriptError>(())
    });
    scheduler.register_closure("watcher", |cx: TaskContext, args: Vec<Dynamic>| async move {
        let bits = args.first().and_then(|value| value.as_int().ok()).unwrap_or_default();
        let watched = TaskId::from_bits(bits as u64);
        while cx.is_task_alive(watched) {
            cx.wait_frames(1).await?;
        }
        Ok::<(), ScriptError>(())
    });
    let t1 = spawn(&scheduler, "idle").expect("spawn t1");
    let watcher = scheduler.closure("watcher").expect("registered");
    let t2 = scheduler
        .spawn_task(&watcher, vec![Dynamic::from(t1.to_bits() as INT)], false)
        .expect("spawn t2");

    scheduler.tick(0.016);
    assert!(scheduler.is_task_alive(t2), "t1 still running");
    scheduler.stop_task(t1);
    scheduler.tick(0.016);
    assert!(!scheduler.is_task_alive(t2));
}

#[test]
fn wait_frames_counts_ticks_regardless_of_dt() {
    let dts = [0.5_f32, 0.001, 0.2, 0.016, 3.0, 0.0];
    for frames in [0_u32, 1, 2, 3, 5] {
        let (scheduler, _) = stage();
        let woke = register_waiter(&scheduler, "frames", move |cx: TaskContext| async move { cx.wait_frames(frames).await });
        spawn(&scheduler, "frames").expect("spawn");
        for dt in dts {
            if woke.get().is_some() {
                break;
            }
            scheduler.tick(dt);
        }
        assert_eq!(woke.get(), Some(u64::from(frames)), "wait_frames({frames})");
    }
}

#[test]
fn wait_seconds_never_resumes_early() {
    let dt = 0.1_f32;
    for seconds in [0.0_f32, 0.05, 0.25, 1.0, 2.5] {
        let mut expected = 0_u64;
        let mut elapsed = 0.0_f32;
        loop {
            expected += 1;
            elapsed += dt;
            if elapsed >= seconds {
                break;
            }
        }

        let (scheduler, _) = stage();
        let woke = register_waiter(&scheduler, "seconds", move |cx: TaskContext| async move { cx.wait_seconds(seconds).await });
        spawn(&scheduler, "seconds").expect("spawn");
        for _ in 0..40 {
            scheduler.tick(dt);
        }
        assert_eq!(woke.get(), Some(expected), "wait_seconds({seconds})");
    }
}

#[test]
fn speed_factor_scales_seconds_but_not_frames() {
    let (scheduler, _) = stage();
    scheduler.set_speed_factor(2.0);
    let seconds = register_waiter(&scheduler, "seconds", |cx: TaskContext| async move { cx.wait_seconds(1.0).await });
    let frames = register_waiter(&scheduler, "frames", |cx: TaskContext| async move { cx.wait_frames(3).await });
    spawn(&scheduler, "seconds").expect("spawn");
    spawn(&scheduler, "frames").expect("spawn");
    for _ in 0..4 {
        scheduler.tick(0.25);
    }
    assert_eq!(seconds.get(), Some(2));
    assert_eq!(frames.get(), Some(3));
}

#[test]
fn pause_holds_back_pauseable_tasks_only() {
    let (scheduler, _) = stage();
    let woke = register_waiter(&scheduler, "frames", |cx: TaskContext| async move { cx.wait_frames(1).await });
    let frames = scheduler.closure("frames").expect("registered");
    scheduler.spawn_task(&frames, Vec::new(), false).expect("pauseable");
    let ui = scheduler
        .spawn_task_with(&frames, Vec::new(), SpawnOptions { pauseable: false, ..SpawnOptions::default() })
        .expect("non-pauseable");

    scheduler.set_paused(true);
    scheduler.tick(0.016);
    assert!(!scheduler.is_task_alive(ui), "non-pauseable task ran while paused");
    assert_eq!(woke.get(), Some(1));
    assert_eq!(scheduler.poll_task_count(), 1, "pauseable awaiter still waiting");

    scheduler.set_paused(false);
    scheduler.tick(0.016);
    assert_eq!(woke.get(), Some(2));
    assert_eq!(scheduler.task_count(), 0);
}

#[test]
fn animation_wait_tracks_the_captured_instance() {
    let (scheduler, world) = stage();
    world.borrow_mut().play_animation(ACTOR).expect("actor exists");
    let woke = register_waiter(&scheduler, "anim", |cx: TaskContext| async move { cx.wait_while_animating(ACTOR).await });
    spawn(&scheduler, "anim").expect("spawn");

    scheduler.tick(0.016);
    assert_eq!(woke.get(), None);
    world.borrow_mut().play_animation(ACTOR).expect("actor exists");
    scheduler.tick(0.016);
    assert_eq!(woke.get(), Some(2), "replacement animation ends the wait");
}

#[test]
fn animation_wait_without_animation_resumes_next_tick() {
    let (scheduler, _) = stage();
    let woke = register_waiter(&scheduler, "anim", |cx: TaskContext| async move { cx.wait_while_animating(SIDEKICK).await });
    spawn(&scheduler, "anim").expect("spawn");
    scheduler.tick(0.016);
    assert_eq!(woke.get(), Some(1));
}

#[test]
fn unknown_entities_fail_resolution_and_register_nothing() {
    let (scheduler, _) = stage();
    register_waiter(&scheduler, "ghost", |cx: TaskContext| async move { cx.wait_while_walking(EntityId(99)).await });
    let err = spawn(&scheduler, "ghost").expect_err("no such actor");
    assert!(err.is_resolution(), "{err}");
    assert_eq!(scheduler.poll_task_count(), 0);
    assert_eq!(scheduler.task_count(), 0);
}

#[test]
fn walking_wait_resumes_after_the_walk_ends() {
    let (scheduler, world) = stage();
    world.borrow_mut().set_walking(ACTOR, true);
    let woke = register_waiter(&scheduler, "walk", |cx: TaskContext| async move { cx.wait_while_walking(ACTOR).await });
    spawn(&scheduler, "walk").expect("spawn");
    scheduler.tick(0.016);
    scheduler.tick(0.016);
    assert_eq!(woke.get(), None);
    world.borrow_mut().set_walking(ACTOR, false);
    scheduler.tick(0.016);
    assert_eq!(woke.get(), Some(3));
}

#[test]
fn talking_wait_without_entity_waits_for_everyone() {
    let (scheduler, world) = stage();
    world.borrow_mut().set_talking(ACTOR, true);
    world.borrow_mut().set_talking(SIDEKICK, true);
    let anyone = register_waiter(&scheduler, "anyone", |cx: TaskContext| async move { cx.wait_while_talking(None).await });
    let actor = register_waiter(&scheduler, "actor", |cx: TaskContext| async move { cx.wait_while_talking(Some(ACTOR)).await });
    spawn(&scheduler, "anyone").expect("spawn");
    spawn(&scheduler, "actor").expect("spawn");

    world.borrow_mut().set_talking(ACTOR, false);
    scheduler.tick(0.016);
    assert_eq!(actor.get(), Some(1));
    assert_eq!(anyone.get(), None);

    world.borrow_mut().set_talking(SIDEKICK, false);
    scheduler.tick(0.016);
    assert_eq!(anyone.get(), Some(2));
}

#[test]
fn sound_wait_treats_unknown_sounds_as_finished() {
    let (scheduler, world) = stage();
    let sound = world.borrow_mut().play_sound();
    let playing = register_waiter(&scheduler, "playing", move |cx: TaskContext| async move { cx.wait_while_sound(sound).await });
    let unknown = register_waiter(&scheduler, "unknown", |cx: TaskContext| async move {
        cx.wait_while_sound(kestrel_tasks::SoundId(404)).await
    });
    spawn(&scheduler, "playing").expect("spawn");
    spawn(&scheduler, "unknown").expect("spawn");

    scheduler.tick(0.016);
    assert_eq!(unknown.get(), Some(1));
    assert_eq!(playing.get(), None);
    world.borrow_mut().stop_sound(sound);
    scheduler.tick(0.016);
    assert_eq!(playing.get(), Some(2));
}

#[test]
fn dialog_camera_and_input_waits_query_the_world() {
    let (scheduler, world) = stage();
    world.borrow_mut().set_dialog_active(true);
    world.borrow_mut().set_camera_moving(true);
    let locked = world.borrow().input_state().locked();
    world.borrow_mut().set_input_state(locked);

    let dialog = register_waiter(&scheduler, "dialog", |cx: TaskContext| async move { cx.wait_while_dialog().await });
    let camera = register_waiter(&scheduler, "camera", |cx: TaskContext| async move { cx.wait_while_camera().await });
    let input = register_waiter(&scheduler, "input", |cx: TaskContext| async move { cx.wait_while_input_off().await });
    for name in ["dialog", "camera", "input"] {
        spawn(&scheduler, name).expect("spawn");
    }

    scheduler.tick(0.016);
    assert_eq!((dialog.get(), camera.get(), input.get()), (None, None, None));

    world.borrow_mut().set_dialog_active(false);
    scheduler.tick(0.016);
    world.borrow_mut().set_camera_moving(false);
    scheduler.tick(0.016);
    world.borrow_mut().set_input_state(InputState::default());
    scheduler.tick(0.016);
    assert_eq!((dialog.get(), camera.get(), input.get()), (Some(2), Some(3), Some(4)));
}

#[test]
fn waiting_on_an_unknown_task_returns_immediately() {
    let (scheduler, _) = stage();
    let woke = register_waiter(&scheduler, "orphan", |cx: TaskContext| async move {
        cx.wait_while_running(TaskId::from_bits(0xdead_beef)).await
    });
    spawn(&scheduler, "orphan").expect("spawn");
    assert_eq!(woke.get(), Some(0), "no suspension happened");
    assert_eq!(scheduler.poll_task_count(), 0);
}

#[test]
fn waiting_on_a_running_task_wakes_when_it_finishes() {
    let (scheduler, _) = stage();
    register_waiter(&scheduler, "errand", |cx: TaskContext| async move { cx.wait_frames(2).await });
    let errand = spawn(&scheduler, "errand").expect("spawn errand");
    let watcher = register_waiter(&scheduler, "watcher", move |cx: TaskContext| async move {
        cx.wait_while_running(errand).await
    });
    spawn(&scheduler, "watcher").expect("spawn watcher");

    scheduler.tick(0.016);
    assert_eq!(watcher.get(), None, "errand is still running");
    scheduler.tick(0.016);
    assert!(!scheduler.is_task_alive(errand));
    assert_eq!(watcher.get(), Some(2));
}

#[test]
fn waiting_on_a_running_task_wakes_when_it_is_stopped() {
    let (scheduler, _) = stage();
    register_waiter(&scheduler, "idler", |cx: TaskContext| async move { cx.suspend().await });
    let idler = spawn(&scheduler, "idler").expect("spawn idler");
    let watcher = register_waiter(&scheduler, "watcher", move |cx: TaskContext| async move {
        cx.wait_while_running(idler).await
    });
    spawn(&scheduler, "watcher").expect("spawn watcher");

    scheduler.tick(0.016);
    assert_eq!(watcher.get(), None);
    assert!(scheduler.stop_task(idler));
    scheduler.tick(0.016);
    assert_eq!(watcher.get(), Some(2));
}

#[test]
fn entity_waits_end_when_the_entity_vanishes() {
    let (scheduler, world) = stage();
    world.borrow_mut().set_walking(ACTOR, true);
    world.borrow_mut().play_animation(SIDEKICK).expect("sidekick exists");
    let walking =
        register_waiter(&scheduler, "walking", |cx: TaskContext| async move { cx.wait_while_walking(ACTOR).await });
    let animating = register_waiter(&scheduler, "animating", |cx: TaskContext| async move {
        cx.wait_while_animating(SIDEKICK).await
    });
    spawn(&scheduler, "walking").expect("spawn");
    spawn(&scheduler, "animating").expect("spawn");

    scheduler.tick(0.016);
    assert_eq!((walking.get(), animating.get()), (None, None));

    assert!(world.borrow_mut().remove_entity(ACTOR));
    assert!(world.borrow_mut().remove_entity(SIDEKICK));
    assert!(!world.borrow_mut().remove_entity(SIDEKICK), "already gone");
    scheduler.tick(0.016);
    assert_eq!((walking.get(), animating.get()), (Some(2), Some(2)));
}
