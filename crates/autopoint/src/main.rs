//! AutoPoint entry point.
//!
//! Wires the input hooks, overlay, marker registry and playback scheduler
//! together, then runs the UI event loop on the Tokio runtime.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config, init tracing
//!  └─ OverlayService::initialize()      -- layered window or headless
//!  └─ InputHookManager::subscribe(...)   -- hook threads → HookBridge → UiCommand
//!  └─ UI loop (tokio::select!)
//!       ├─ UiCommand            -> ModeController::apply
//!       ├─ console line         -> ConsoleCommand
//!       ├─ OverlayEvent         -> MarkerRegistry::rebind_visuals
//!       ├─ PlaybackEvent        -> ModeController::on_playback_finished
//!       ├─ SurfaceEvent         -> OverlayService::handle_surface_event
//!       ├─ restore tick         -> OverlayService::restore (while unavailable)
//!       └─ Ctrl-C               -> shutdown
//! ```
//!
//! # Why `block_in_place`? (for beginners)
//!
//! Stopping playback joins the worker thread, and a device-loss recovery
//! sleeps for the configured backoff.  Both block.  `block_in_place` tells
//! the multi-threaded runtime to move other tasks off this worker while the
//! call runs, so the rest of the runtime keeps going.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::block_in_place;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use autopoint::application::console::{ConsoleCommand, HELP};
use autopoint::application::hotkey::HotkeyTracker;
use autopoint::application::modes::{HookBridge, ModeController, SharedMode, UiCommand};
use autopoint::application::playback::{
    Pacer, PlaybackEvent, PlaybackScheduler, PointerInjector, ThreadPacer,
};
use autopoint::infrastructure::input_hooks::{
    ClickHandler, HookBackend, HookHandler, InputHookManager, KeyHandler, MoveHandler,
};
use autopoint::infrastructure::overlay::{
    OverlayEvent, OverlayService, RenderError, SurfaceDevice, SurfaceEvent,
};
use autopoint::infrastructure::storage::config::{
    load_config, load_config_from, AppConfig, MIN_DURATION_MS,
};
use autopoint_core::{
    load_points, read_document, save_points, write_document, MarkerId, MarkerImage,
    MarkerRegistry, MarkerVisuals, MouseButton, ScreenPoint,
};

/// Shortest interval between overlay restore attempts while it is down.
const MIN_RESTORE_PERIOD: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
#[command(name = "autopoint", version, about = "Replays clicks at marked screen points")]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, env = "AUTOPOINT_CONFIG")]
    config: Option<PathBuf>,

    /// Point file to load at startup.
    #[arg(long)]
    points: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, config_warning) = match &cli.config {
        Some(path) => (
            load_config_from(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None,
        ),
        None => match load_config() {
            Ok(config) => (config, None),
            Err(e) => (AppConfig::default(), Some(e)),
        },
    };
    init_tracing(&config.general.log_level);
    if let Some(e) = config_warning {
        warn!("using default config: {e}");
    }

    info!("AutoPoint starting");

    // ── Overlay ───────────────────────────────────────────────────────────────
    let (device, mut surface_rx) = create_surface();
    let overlay_config = config.overlay_config();
    let mut restore_tick = tokio::time::interval(overlay_config.recreate_backoff.max(MIN_RESTORE_PERIOD));
    restore_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let overlay = Arc::new(OverlayService::new(device, overlay_config));
    overlay
        .initialize()
        .context("initializing overlay renderer")?;
    let mut overlay_events = overlay.subscribe();

    // ── Domain state ──────────────────────────────────────────────────────────
    let visuals: Arc<dyn MarkerVisuals> = overlay.clone();
    let mut registry = MarkerRegistry::new(visuals, config.marker_size());
    let marker_image = config.marker_image();

    let pacer: Arc<dyn Pacer> = Arc::new(ThreadPacer);
    let mut scheduler = PlaybackScheduler::new(create_injector(), pacer);
    let mut playback_events = scheduler.subscribe();

    let mode = SharedMode::default();
    let interaction = config.interaction_settings();
    let mut controller = ModeController::new(
        mode.clone(),
        interaction,
        config.playback_settings(),
        marker_image.clone(),
    );

    if let Some(path) = &cli.points {
        load_point_file(path, &mut registry, &mut controller, &marker_image)
            .with_context(|| format!("loading points {}", path.display()))?;
    }

    // ── Input hooks ───────────────────────────────────────────────────────────
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<UiCommand>();
    let hotkey = config.toggle_hotkey();
    let bridge = Arc::new(HookBridge::new(
        mode,
        registry.positions(),
        ui_tx,
        interaction,
        HotkeyTracker::new(hotkey),
    ));
    let hooks = InputHookManager::new(create_hook_backend());
    subscribe_hooks(&hooks, &bridge);

    // ── Console ───────────────────────────────────────────────────────────────
    let mut console_rx = spawn_console_reader();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(%hotkey, "AutoPoint ready; type `help` for commands");

    // ── UI loop ───────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            Some(command) = ui_rx.recv() => {
                block_in_place(|| {
                    if let Err(e) = controller.apply(command, &mut registry, &mut scheduler) {
                        warn!("command failed: {e}");
                    }
                });
            }

            Some(line) = console_rx.recv() => {
                let command = match line.parse::<ConsoleCommand>() {
                    Ok(command) => command,
                    Err(e) => {
                        println!("{e}");
                        continue;
                    }
                };
                if command == ConsoleCommand::Quit {
                    break;
                }
                block_in_place(|| {
                    run_console_command(command, &mut registry, &mut scheduler, &mut controller, &marker_image);
                });
            }

            Some(event) = overlay_events.recv() => match event {
                OverlayEvent::RendererRecreated => {
                    let rebound = block_in_place(|| registry.rebind_visuals());
                    info!(markers = rebound, "marker visuals rebound after renderer recreation");
                }
            },

            Some(event) = playback_events.recv() => match event {
                PlaybackEvent::Started => debug!("playback started"),
                PlaybackEvent::PassCompleted(pass) => debug!(pass, "playback pass completed"),
                PlaybackEvent::Finished(report) => {
                    debug!(passes = report.passes, "playback finished");
                    block_in_place(|| controller.on_playback_finished(&mut registry, &mut scheduler));
                }
            },

            Some(event) = next_surface_event(&mut surface_rx) => {
                block_in_place(|| overlay.handle_surface_event(event));
            }

            _ = restore_tick.tick() => {
                if !overlay.is_available() {
                    match block_in_place(|| overlay.restore()) {
                        Ok(_) | Err(RenderError::Unavailable) => {}
                        Err(e) => debug!("overlay restore failed, retrying: {e}"),
                    }
                }
            }

            _ = &mut ctrl_c => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    hooks.shutdown();
    if let Some(report) = block_in_place(|| scheduler.stop(&mut registry)) {
        info!(passes = report.passes, "playback stopped for shutdown");
    }
    overlay.shutdown();
    info!("AutoPoint stopped");
    Ok(())
}

/// `RUST_LOG` wins, then the configured level, then `info`.
fn init_tracing(configured_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ── Platform backends ─────────────────────────────────────────────────────────

#[cfg(target_os = "windows")]
fn create_surface() -> (Box<dyn SurfaceDevice>, Option<UnboundedReceiver<SurfaceEvent>>) {
    use autopoint::infrastructure::overlay::headless::HeadlessSurface;
    use autopoint::infrastructure::overlay::windows::{virtual_desktop_bounds, LayeredWindowSurface};

    match LayeredWindowSurface::create() {
        Ok(mut surface) => {
            let events = surface.take_surface_events();
            (Box::new(surface), events)
        }
        Err(e) => {
            tracing::error!("overlay window unavailable ({e}); markers will not be visible");
            (Box::new(HeadlessSurface::new(virtual_desktop_bounds())), None)
        }
    }
}

#[cfg(not(target_os = "windows"))]
fn create_surface() -> (Box<dyn SurfaceDevice>, Option<UnboundedReceiver<SurfaceEvent>>) {
    use autopoint::infrastructure::overlay::headless::HeadlessSurface;
    use autopoint::infrastructure::overlay::SurfaceRect;

    warn!("no overlay window on this platform; rendering headless");
    let bounds = SurfaceRect {
        x: 0,
        y: 0,
        width: 1920,
        height: 1080,
    };
    (Box::new(HeadlessSurface::new(bounds)), None)
}

#[cfg(target_os = "windows")]
fn create_injector() -> Arc<dyn PointerInjector> {
    Arc::new(autopoint::infrastructure::pointer_injection::windows::WindowsPointerInjector::new())
}

#[cfg(not(target_os = "windows"))]
fn create_injector() -> Arc<dyn PointerInjector> {
    warn!("pointer injection is not supported on this platform; playback will fault");
    Arc::new(autopoint::infrastructure::pointer_injection::UnsupportedInjector)
}

#[cfg(target_os = "windows")]
fn create_hook_backend() -> Box<dyn HookBackend> {
    Box::new(autopoint::infrastructure::input_hooks::windows::WindowsHookBackend::new())
}

#[cfg(not(target_os = "windows"))]
fn create_hook_backend() -> Box<dyn HookBackend> {
    Box::new(autopoint::infrastructure::input_hooks::UnsupportedHookBackend)
}

/// Subscribes every hook the bridge needs.  A class whose hook cannot be
/// installed is logged and skipped; the console keeps working.
fn subscribe_hooks(hooks: &InputHookManager, bridge: &Arc<HookBridge>) {
    let b = Arc::clone(bridge);
    let click: ClickHandler = Arc::new(
        move |button: MouseButton, position: ScreenPoint| -> anyhow::Result<bool> {
            Ok(b.on_click(button, position))
        },
    );
    let b = Arc::clone(bridge);
    let moved: MoveHandler = Arc::new(move |position: ScreenPoint| b.on_move(position));
    let b = Arc::clone(bridge);
    let key_down: KeyHandler = Arc::new(move |vk: u16| b.on_key_down(vk));
    let b = Arc::clone(bridge);
    let key_up: KeyHandler = Arc::new(move |vk: u16| b.on_key_up(vk));

    for handler in [
        HookHandler::PointerClick(click),
        HookHandler::PointerMove(moved),
        HookHandler::KeyDown(key_down),
        HookHandler::KeyUp(key_up),
    ] {
        let kind = handler.kind();
        if let Err(e) = hooks.subscribe(handler) {
            warn!(?kind, "input hook unavailable: {e}");
        }
    }
}

/// Reads stdin on a dedicated thread; a blocking read must not hold a runtime
/// worker.
fn spawn_console_reader() -> UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = thread::Builder::new()
        .name("autopoint-console".to_string())
        .spawn(move || read_console(tx));
    if let Err(e) = spawned {
        warn!("console unavailable: {e}");
    }
    rx
}

fn read_console(tx: UnboundedSender<String>) {
    for line in std::io::stdin().lock().lines() {
        match line {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("console closed: {e}");
                break;
            }
        }
    }
}

async fn next_surface_event(rx: &mut Option<UnboundedReceiver<SurfaceEvent>>) -> Option<SurfaceEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ── Console commands ──────────────────────────────────────────────────────────

fn run_console_command(
    command: ConsoleCommand,
    registry: &mut MarkerRegistry,
    scheduler: &mut PlaybackScheduler,
    controller: &mut ModeController,
    marker_image: &MarkerImage,
) {
    let result: anyhow::Result<()> = match command {
        ConsoleCommand::Ui(ui) => controller
            .apply(ui, registry, scheduler)
            .map_err(anyhow::Error::from),
        ConsoleCommand::Reorder { from, to } => marker_at(registry, from)
            .and_then(|id| registry.request_order(id, to).map_err(anyhow::Error::from)),
        ConsoleCommand::SetDuration { order, duration_ms } => {
            let duration_ms = duration_ms.max(MIN_DURATION_MS);
            marker_at(registry, order).and_then(|id| {
                registry
                    .set_duration(id, duration_ms)
                    .map_err(anyhow::Error::from)
            })
        }
        ConsoleCommand::SetAction {
            order,
            button,
            click_kind,
        } => marker_at(registry, order).and_then(|id| {
            registry
                .set_action(id, button, click_kind)
                .map_err(anyhow::Error::from)
        }),
        ConsoleCommand::List => {
            print_markers(registry, controller);
            Ok(())
        }
        ConsoleCommand::Save(path) => save_point_file(&path, registry, controller),
        ConsoleCommand::Load(path) => {
            if registry.is_runtime_mode() {
                Err(anyhow::anyhow!("stop playback before loading points"))
            } else {
                load_point_file(&path, registry, controller, marker_image)
            }
        }
        ConsoleCommand::Help => {
            println!("{HELP}");
            Ok(())
        }
        ConsoleCommand::Quit => Ok(()),
    };
    if let Err(e) = result {
        println!("error: {e:#}");
    }
}

fn marker_at(registry: &MarkerRegistry, order: u32) -> anyhow::Result<MarkerId> {
    registry
        .markers()
        .iter()
        .find(|m| m.order() == order)
        .map(|m| m.id())
        .ok_or_else(|| anyhow::anyhow!("no marker with order {order}"))
}

fn print_markers(registry: &MarkerRegistry, controller: &ModeController) {
    println!(
        "mode {:?}, {} marker(s), global duration {} ms",
        controller.mode(),
        registry.len(),
        controller.playback_settings().global_duration.as_millis()
    );
    for step in registry.ordered_snapshot() {
        println!(
            "  #{:<3} {:>6},{:<6} {:<7} {:<6} {} ms",
            step.order,
            step.position.x,
            step.position.y,
            step.button,
            step.click_kind,
            step.dwell.as_millis()
        );
    }
}

fn load_point_file(
    path: &Path,
    registry: &mut MarkerRegistry,
    controller: &mut ModeController,
    marker_image: &MarkerImage,
) -> anyhow::Result<()> {
    let document = read_document(path)?;
    let ids = load_points(registry, &document, marker_image)?;
    if let Some(ms) = document.duration {
        controller.set_global_duration(Duration::from_millis(u64::from(ms.max(MIN_DURATION_MS))));
    }
    info!(path = %path.display(), markers = ids.len(), "points loaded");
    Ok(())
}

fn save_point_file(
    path: &Path,
    registry: &MarkerRegistry,
    controller: &ModeController,
) -> anyhow::Result<()> {
    let mut document = save_points(registry);
    let global_ms = controller.playback_settings().global_duration.as_millis();
    document.duration = Some(u32::try_from(global_ms).unwrap_or(u32::MAX));
    write_document(path, &document)?;
    info!(path = %path.display(), markers = document.points.len(), "points saved");
    Ok(())
}
