//! Integration tests for the global input hook path.
//!
//! Synthetic events enter through `MockHookBackend`, are dispatched by
//! `InputHookManager` to the `HookBridge`, and the queued `UiCommand`s are
//! applied by `ModeController` to a real `MarkerRegistry`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use autopoint::application::hotkey::{Hotkey, HotkeyTracker};
use autopoint::application::modes::{
    HookBridge, InteractionMode, InteractionSettings, ModeController, SharedMode, UiCommand,
};
use autopoint::application::playback::{
    Pacer, PlaybackScheduler, PlaybackSettings, PlaybackState, PointerInjector,
};
use autopoint::infrastructure::input_hooks::mock::MockHookBackend;
use autopoint::infrastructure::input_hooks::{
    ClickHandler, DeviceClass, HookError, HookEventKind, HookHandler, HookVerdict, InputHookManager,
    KeyHandler, MoveHandler, RawHookEvent,
};
use autopoint::infrastructure::pointer_injection::mock::MockPointerInjector;
use autopoint_core::{
    MarkerImage, MarkerRegistry, MarkerSize, MarkerVisuals, MouseButton, ScreenPoint,
    VisualError, VisualHandle,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

// ── Fixtures ──────────────────────────────────────────────────────────────────

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

struct SleepPacer;

impl Pacer for SleepPacer {
    fn pause(&self, _duration: Duration) {
        thread::sleep(Duration::from_millis(1));
    }
}

fn click(x: i32, y: i32) -> RawHookEvent {
    RawHookEvent::PointerButtonDown {
        button: MouseButton::Left,
        position: ScreenPoint::new(x, y),
    }
}

/// Everything `main` wires together, minus the OS.
struct App {
    backend: MockHookBackend,
    hooks: InputHookManager,
    commands: UnboundedReceiver<UiCommand>,
    controller: ModeController,
    registry: MarkerRegistry,
    scheduler: PlaybackScheduler,
}

impl App {
    fn new() -> Self {
        let backend = MockHookBackend::new();
        let hooks = InputHookManager::new(Box::new(backend.clone()));
        let registry = MarkerRegistry::new(Arc::new(NullVisuals), MarkerSize::default());
        let scheduler = PlaybackScheduler::new(
            Arc::new(MockPointerInjector::new()) as Arc<dyn PointerInjector>,
            Arc::new(SleepPacer) as Arc<dyn Pacer>,
        );
        let mode = SharedMode::default();
        let (tx, commands) = unbounded_channel();
        let bridge = Arc::new(HookBridge::new(
            mode.clone(),
            registry.positions(),
            tx,
            InteractionSettings::default(),
            HotkeyTracker::new(Hotkey::default()),
        ));
        let controller = ModeController::new(
            mode,
            InteractionSettings::default(),
            PlaybackSettings::default(),
            MarkerImage::BuiltIn,
        );

        let b = Arc::clone(&bridge);
        let on_click: ClickHandler = Arc::new(
            move |button: MouseButton, position: ScreenPoint| -> anyhow::Result<bool> {
                Ok(b.on_click(button, position))
            },
        );
        let b = Arc::clone(&bridge);
        let on_move: MoveHandler = Arc::new(move |position: ScreenPoint| b.on_move(position));
        let b = Arc::clone(&bridge);
        let on_key_down: KeyHandler = Arc::new(move |vk: u16| b.on_key_down(vk));
        let b = Arc::clone(&bridge);
        let on_key_up: KeyHandler = Arc::new(move |vk: u16| b.on_key_up(vk));
        hooks.subscribe(HookHandler::PointerClick(on_click)).unwrap();
        hooks.subscribe(HookHandler::PointerMove(on_move)).unwrap();
        hooks.subscribe(HookHandler::KeyDown(on_key_down)).unwrap();
        hooks.subscribe(HookHandler::KeyUp(on_key_up)).unwrap();

        Self {
            backend,
            hooks,
            commands,
            controller,
            registry,
            scheduler,
        }
    }

    /// Applies every queued command, as the UI loop would.
    fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.commands.try_recv() {
            self.controller
                .apply(command, &mut self.registry, &mut self.scheduler)
                .expect("command must apply");
            applied += 1;
        }
        applied
    }

    fn enter(&mut self, mode: InteractionMode) {
        self.controller
            .apply(
                UiCommand::EnterMode(mode),
                &mut self.registry,
                &mut self.scheduler,
            )
            .unwrap();
    }
}

// ── Manager behaviour ─────────────────────────────────────────────────────────

#[test]
fn test_hooks_are_installed_once_per_device_class() {
    let app = App::new();

    assert_eq!(app.backend.install_count(), 2);
    assert!(app.hooks.is_installed(DeviceClass::Pointer));
    assert!(app.hooks.is_installed(DeviceClass::Keyboard));
}

#[test]
fn test_last_unsubscribe_uninstalls_device_hook() {
    // Arrange
    let app = App::new();

    // Act
    app.hooks.unsubscribe(HookEventKind::PointerClick);
    let still_installed = app.backend.is_installed(DeviceClass::Pointer);
    app.hooks.unsubscribe(HookEventKind::PointerMove);

    // Assert
    assert!(still_installed, "move handler still needs the pointer hook");
    assert!(!app.backend.is_installed(DeviceClass::Pointer));
    assert!(app.backend.is_installed(DeviceClass::Keyboard));
    assert_eq!(app.backend.uninstall_count(), 1);
}

#[test]
fn test_shutdown_removes_every_hook() {
    let app = App::new();

    app.hooks.shutdown();

    assert!(!app.backend.is_installed(DeviceClass::Pointer));
    assert!(!app.backend.is_installed(DeviceClass::Keyboard));
    assert_eq!(app.backend.uninstall_count(), 2);
}

#[test]
fn test_install_failure_leaves_no_handler_behind() {
    // Arrange
    let backend = MockHookBackend::new();
    backend.set_fail_install(true);
    let hooks = InputHookManager::new(Box::new(backend.clone()));
    let calls = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&calls);
    let handler: KeyHandler = Arc::new(move |_vk: u16| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    // Act
    let result = hooks.subscribe(HookHandler::KeyDown(handler));
    backend.set_fail_install(false);
    let m: MoveHandler = Arc::new(|_p: ScreenPoint| {});
    hooks.subscribe(HookHandler::PointerMove(m)).unwrap();

    // Assert
    assert!(matches!(result, Err(HookError::InstallFailed { .. })));
    assert!(!hooks.is_installed(DeviceClass::Keyboard));
    assert_eq!(backend.inject(RawHookEvent::KeyDown { vk_code: 0x41 }), None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_panicking_click_handler_passes_event_through() {
    // Arrange
    let backend = MockHookBackend::new();
    let hooks = InputHookManager::new(Box::new(backend.clone()));
    let handler: ClickHandler = Arc::new(
        |_b: MouseButton, _p: ScreenPoint| -> anyhow::Result<bool> { panic!("handler bug") },
    );
    hooks.subscribe(HookHandler::PointerClick(handler)).unwrap();

    // Act
    let first = backend.inject(click(1, 1));
    let second = backend.inject(click(2, 2));

    // Assert: the hook survives and keeps passing events on.
    assert_eq!(first, Some(HookVerdict::PassThrough));
    assert_eq!(second, Some(HookVerdict::PassThrough));
}

#[test]
fn test_failing_click_handler_passes_event_through() {
    let backend = MockHookBackend::new();
    let hooks = InputHookManager::new(Box::new(backend.clone()));
    let handler: ClickHandler = Arc::new(
        |_b: MouseButton, _p: ScreenPoint| -> anyhow::Result<bool> {
            anyhow::bail!("queue closed")
        },
    );
    hooks.subscribe(HookHandler::PointerClick(handler)).unwrap();

    assert_eq!(backend.inject(click(1, 1)), Some(HookVerdict::PassThrough));
}

// ── End to end through the mode dispatcher ────────────────────────────────────

#[test]
fn test_add_mode_click_is_consumed_and_creates_marker() {
    // Arrange
    let mut app = App::new();
    app.enter(InteractionMode::Add);

    // Act
    let verdict = app.backend.inject(click(640, 360));
    app.pump();

    // Assert
    assert_eq!(verdict, Some(HookVerdict::Consume));
    assert_eq!(app.registry.len(), 1);
    let marker = &app.registry.markers()[0];
    assert_eq!(marker.position(), ScreenPoint::new(640, 360));
    assert_eq!(marker.order(), 0);
}

#[test]
fn test_normal_mode_click_passes_through_untouched() {
    let mut app = App::new();

    let verdict = app.backend.inject(click(10, 10));

    assert_eq!(verdict, Some(HookVerdict::PassThrough));
    assert_eq!(app.pump(), 0);
    assert!(app.registry.is_empty());
}

#[test]
fn test_right_click_in_add_mode_is_not_captured() {
    let mut app = App::new();
    app.enter(InteractionMode::Add);

    let verdict = app.backend.inject(RawHookEvent::PointerButtonDown {
        button: MouseButton::Right,
        position: ScreenPoint::new(5, 5),
    });

    assert_eq!(verdict, Some(HookVerdict::PassThrough));
    assert_eq!(app.pump(), 0);
}

#[test]
fn test_remove_mode_consumes_only_clicks_on_markers() {
    // Arrange
    let mut app = App::new();
    app.enter(InteractionMode::Add);
    app.backend.inject(click(100, 100));
    app.backend.inject(click(400, 400));
    app.pump();
    app.enter(InteractionMode::Remove);

    // Act
    let miss = app.backend.inject(click(250, 250));
    let hit = app.backend.inject(click(104, 98));
    app.pump();

    // Assert
    assert_eq!(miss, Some(HookVerdict::PassThrough));
    assert_eq!(hit, Some(HookVerdict::Consume));
    assert_eq!(app.registry.len(), 1);
    assert_eq!(
        app.registry.markers()[0].position(),
        ScreenPoint::new(400, 400)
    );
}

#[test]
fn test_pointer_move_updates_hover_in_normal_mode() {
    // Arrange
    let mut app = App::new();
    app.enter(InteractionMode::Add);
    app.backend.inject(click(50, 50));
    app.pump();
    app.enter(InteractionMode::Add);
    assert_eq!(app.controller.mode(), InteractionMode::Normal);

    // Act
    let verdict = app.backend.inject(RawHookEvent::PointerMove {
        position: ScreenPoint::new(55, 52),
    });
    app.pump();

    // Assert
    assert_eq!(verdict, Some(HookVerdict::PassThrough));
    assert!(app.registry.markers()[0].is_hovered());
}

#[test]
fn test_hotkey_toggles_playback_on_and_off() {
    // Arrange
    let mut app = App::new();
    let f6 = Hotkey::default().key;

    // Act: press and release, then press again.
    app.backend.inject(RawHookEvent::KeyDown { vk_code: f6 });
    app.backend.inject(RawHookEvent::KeyUp { vk_code: f6 });
    app.pump();
    let running = app.controller.mode();
    let locked = app.registry.is_runtime_mode();
    app.backend.inject(RawHookEvent::KeyDown { vk_code: f6 });
    app.backend.inject(RawHookEvent::KeyUp { vk_code: f6 });
    app.pump();

    // Assert
    assert_eq!(running, InteractionMode::Running);
    assert!(locked);
    assert_eq!(app.controller.mode(), InteractionMode::Normal);
    assert_eq!(app.scheduler.state(), PlaybackState::Idle);
    assert!(!app.registry.is_runtime_mode());
}

#[test]
fn test_auto_repeat_key_down_does_not_toggle_twice() {
    let mut app = App::new();
    let f6 = Hotkey::default().key;

    app.backend.inject(RawHookEvent::KeyDown { vk_code: f6 });
    app.backend.inject(RawHookEvent::KeyDown { vk_code: f6 });
    let applied = app.pump();

    assert_eq!(applied, 1);
    assert_eq!(app.controller.mode(), InteractionMode::Running);
    app.scheduler.stop(&mut app.registry);
}
