//! Integration tests for the playback pipeline.
//!
//! These exercise `PlaybackScheduler` end to end against a real
//! `MarkerRegistry`, the `MockPointerInjector`, and a pacer that records each
//! pause together with the number of actions injected before it.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use autopoint::application::playback::{
    FinishReason, Pacer, PhysicalButton, PlaybackEvent, PlaybackScheduler, PlaybackSettings,
    PlaybackState, PointerInjector, StartOutcome,
};
use autopoint::infrastructure::pointer_injection::mock::{InjectedAction, MockPointerInjector};
use autopoint_core::{
    ClickKind, MarkerImage, MarkerRegistry, MarkerSize, MarkerVisuals, MouseButton, ScreenPoint,
    VisualError, VisualHandle,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Records `(actions injected so far, pause)` for every pause.
struct RecordingPacer {
    injector: Arc<MockPointerInjector>,
    pauses: Mutex<Vec<(usize, Duration)>>,
}

impl RecordingPacer {
    fn new(injector: Arc<MockPointerInjector>) -> Self {
        Self {
            injector,
            pauses: Mutex::new(Vec::new()),
        }
    }

    fn pauses(&self) -> Vec<(usize, Duration)> {
        self.pauses.lock().unwrap().clone()
    }
}

impl Pacer for RecordingPacer {
    fn pause(&self, duration: Duration) {
        let done = self.injector.actions().len();
        self.pauses.lock().unwrap().push((done, duration));
        thread::sleep(Duration::from_millis(1));
    }
}

struct NullVisuals;

impl MarkerVisuals for NullVisuals {
    fn add_visual(
        &self,
        _image: &MarkerImage,
        _top_left: ScreenPoint,
        _size: MarkerSize,
    ) -> Result<VisualHandle, VisualError> {
        Ok(VisualHandle::new_v4())
    }

    fn remove_visual(&self, _handle: VisualHandle) {}
}

struct Rig {
    injector: Arc<MockPointerInjector>,
    pacer: Arc<RecordingPacer>,
    scheduler: PlaybackScheduler,
    registry: MarkerRegistry,
}

fn rig(points: &[(i32, i32, MouseButton, ClickKind, u32)]) -> Rig {
    let injector = Arc::new(MockPointerInjector::new());
    let pacer = Arc::new(RecordingPacer::new(Arc::clone(&injector)));
    let scheduler = PlaybackScheduler::new(
        Arc::clone(&injector) as Arc<dyn PointerInjector>,
        Arc::clone(&pacer) as Arc<dyn Pacer>,
    );
    let mut registry = MarkerRegistry::new(Arc::new(NullVisuals), MarkerSize::default());
    for &(x, y, button, kind, ms) in points {
        registry
            .add_point(&MarkerImage::BuiltIn, ScreenPoint::new(x, y), button, kind, ms)
            .expect("add must succeed");
    }
    Rig {
        injector,
        pacer,
        scheduler,
        registry,
    }
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_single_pass_produces_exact_timeline() {
    // Arrange
    let mut rig = rig(&[
        (10, 10, MouseButton::Left, ClickKind::Single, 500),
        (20, 20, MouseButton::Right, ClickKind::Double, 300),
    ]);
    let settings = PlaybackSettings {
        looped: false,
        ..PlaybackSettings::default()
    };

    // Act
    rig.scheduler.start(&mut rig.registry, &settings).unwrap();
    wait_for("idle", || rig.scheduler.state() == PlaybackState::Idle);
    let report = rig
        .scheduler
        .reap_finished(&mut rig.registry)
        .expect("finished run must be reaped");

    // Assert
    use InjectedAction::{Move, Press, Release};
    assert_eq!(
        rig.injector.actions(),
        vec![
            Move(ScreenPoint::new(10, 10)),
            Press(PhysicalButton::Left),
            Release(PhysicalButton::Left),
            Move(ScreenPoint::new(20, 20)),
            Press(PhysicalButton::Right),
            Release(PhysicalButton::Right),
            Press(PhysicalButton::Right),
            Release(PhysicalButton::Right),
        ]
    );
    assert_eq!(
        rig.pacer.pauses(),
        vec![(3, Duration::from_millis(500)), (8, Duration::from_millis(300))]
    );
    assert_eq!(report.passes, 1);
    assert_eq!(report.actions, 2);
    assert_eq!(report.reason, FinishReason::Completed);
    assert!(!rig.registry.is_runtime_mode());
}

#[test]
fn test_playback_follows_order_not_insertion() {
    // Arrange
    let mut rig = rig(&[
        (1, 1, MouseButton::Left, ClickKind::Single, 0),
        (2, 2, MouseButton::Left, ClickKind::Single, 0),
    ]);
    let second = rig.registry.markers()[1].id();
    let first = rig.registry.markers()[0].id();
    rig.registry.request_order(first, 5).unwrap();
    rig.registry.request_order(second, 0).unwrap();
    let settings = PlaybackSettings {
        looped: false,
        ..PlaybackSettings::default()
    };

    // Act
    rig.scheduler.start(&mut rig.registry, &settings).unwrap();
    wait_for("idle", || rig.scheduler.state() == PlaybackState::Idle);
    rig.scheduler.reap_finished(&mut rig.registry);

    // Assert
    let moves: Vec<ScreenPoint> = rig
        .injector
        .actions()
        .into_iter()
        .filter_map(|a| match a {
            InjectedAction::Move(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(moves, vec![ScreenPoint::new(2, 2), ScreenPoint::new(1, 1)]);
}

#[test]
fn test_empty_registry_clicks_default_button_until_stopped() {
    // Arrange
    let mut rig = rig(&[]);
    let settings = PlaybackSettings {
        looped: true,
        default_button: MouseButton::Left,
        global_duration: Duration::from_millis(200),
        ..PlaybackSettings::default()
    };

    // Act
    rig.scheduler.start(&mut rig.registry, &settings).unwrap();
    let pacer = Arc::clone(&rig.pacer);
    wait_for("three default clicks", || pacer.pauses().len() >= 3);
    let report = rig
        .scheduler
        .stop(&mut rig.registry)
        .expect("a run was active");

    // Assert
    let actions = rig.injector.actions();
    assert!(actions.iter().all(|a| !matches!(a, InjectedAction::Move(_))));
    assert!(actions.iter().all(|a| matches!(
        a,
        InjectedAction::Press(PhysicalButton::Left) | InjectedAction::Release(PhysicalButton::Left)
    )));
    assert!(rig
        .pacer
        .pauses()
        .iter()
        .all(|(_, d)| *d == Duration::from_millis(200)));
    assert_eq!(report.reason, FinishReason::Stopped);
    assert_eq!(report.passes, 0);
}

#[test]
fn test_second_start_while_running_is_ignored() {
    // Arrange
    let mut rig = rig(&[(5, 5, MouseButton::Left, ClickKind::Single, 1)]);
    let mut events = rig.scheduler.subscribe();
    let settings = PlaybackSettings::default();

    // Act
    let first = rig.scheduler.start(&mut rig.registry, &settings).unwrap();
    let second = rig.scheduler.start(&mut rig.registry, &settings).unwrap();
    rig.scheduler.stop(&mut rig.registry);

    // Assert
    assert_eq!(first, StartOutcome::Started);
    assert_eq!(second, StartOutcome::AlreadyRunning);
    let mut started = 0;
    let mut finished = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            PlaybackEvent::Started => started += 1,
            PlaybackEvent::Finished(_) => finished += 1,
            PlaybackEvent::PassCompleted(_) => {}
        }
    }
    assert_eq!(started, 1);
    assert_eq!(finished, 1);
}

#[test]
fn test_loop_count_emits_pass_events() {
    // Arrange
    let mut rig = rig(&[(0, 0, MouseButton::Middle, ClickKind::Single, 0)]);
    let mut events = rig.scheduler.subscribe();
    let settings = PlaybackSettings {
        looped: true,
        loop_count: 2,
        ..PlaybackSettings::default()
    };

    // Act
    rig.scheduler.start(&mut rig.registry, &settings).unwrap();
    wait_for("idle", || rig.scheduler.state() == PlaybackState::Idle);
    let report = rig.scheduler.reap_finished(&mut rig.registry).unwrap();

    // Assert
    assert_eq!(report.passes, 2);
    assert_eq!(rig.injector.press_count(), 2);
    let passes: Vec<u32> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| match e {
            PlaybackEvent::PassCompleted(n) => Some(n),
            _ => None,
        })
        .collect();
    assert_eq!(passes, vec![1, 2]);
}

#[test]
fn test_unbounded_loop_runs_past_two_passes_until_stopped() {
    // Arrange
    let mut rig = rig(&[(3, 4, MouseButton::Left, ClickKind::Single, 1)]);
    let mut events = rig.scheduler.subscribe();
    let settings = PlaybackSettings {
        looped: true,
        loop_count: 0,
        ..PlaybackSettings::default()
    };

    // Act: a fourth pause means the third pass has completed.
    rig.scheduler.start(&mut rig.registry, &settings).unwrap();
    let pacer = Arc::clone(&rig.pacer);
    wait_for("more than two passes", || pacer.pauses().len() > 3);
    let report = rig
        .scheduler
        .stop(&mut rig.registry)
        .expect("a run was active");

    // Assert
    assert_eq!(report.reason, FinishReason::Stopped);
    assert!(report.passes > 2, "only {} passes", report.passes);
    assert_eq!(rig.scheduler.state(), PlaybackState::Idle);
    assert!(!rig.registry.is_runtime_mode());

    let seen: Vec<PlaybackEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    let passes: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::PassCompleted(n) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(passes, (1..=report.passes).collect::<Vec<u32>>());
    assert!(matches!(seen.last(), Some(PlaybackEvent::Finished(_))));
    assert!(rig.scheduler.stop(&mut rig.registry).is_none());
}

#[test]
fn test_registry_edits_during_run_do_not_affect_snapshot() {
    // Arrange
    let mut rig = rig(&[(7, 7, MouseButton::Left, ClickKind::Single, 1)]);
    rig.scheduler
        .start(&mut rig.registry, &PlaybackSettings::default())
        .unwrap();

    // Act: marker added while the run is in progress.
    rig.registry
        .add_point(
            &MarkerImage::BuiltIn,
            ScreenPoint::new(99, 99),
            MouseButton::Left,
            ClickKind::Single,
            1,
        )
        .unwrap();
    let pacer = Arc::clone(&rig.pacer);
    wait_for("a few passes", || pacer.pauses().len() >= 3);
    rig.scheduler.stop(&mut rig.registry);

    // Assert
    assert!(rig
        .injector
        .actions()
        .iter()
        .all(|a| *a != InjectedAction::Move(ScreenPoint::new(99, 99))));
    assert_eq!(rig.registry.len(), 2);
}

#[test]
fn test_injection_fault_ends_run_and_releases_lock() {
    // Arrange
    let mut rig = rig(&[(1, 2, MouseButton::Left, ClickKind::Single, 1)]);
    rig.injector.set_should_fail(true);
    let mut events = rig.scheduler.subscribe();

    // Act
    rig.scheduler
        .start(&mut rig.registry, &PlaybackSettings::default())
        .unwrap();
    wait_for("idle", || rig.scheduler.state() == PlaybackState::Idle);
    let report = rig.scheduler.reap_finished(&mut rig.registry).unwrap();

    // Assert
    assert!(matches!(report.reason, FinishReason::Fault(_)));
    assert!(!rig.registry.is_runtime_mode());
    let last = std::iter::from_fn(|| events.try_recv().ok()).last();
    assert!(matches!(last, Some(PlaybackEvent::Finished(_))));

    // A new run can start after a fault.
    rig.injector.set_should_fail(false);
    let outcome = rig
        .scheduler
        .start(&mut rig.registry, &PlaybackSettings::default())
        .unwrap();
    assert_eq!(outcome, StartOutcome::Started);
    rig.scheduler.stop(&mut rig.registry);
}
