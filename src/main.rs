use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use padhub::config::AppConfig;
use padhub::input::{
    channel_subscriber, DiscreteEvent, HatMask, InputEvent, InputManager, SlotEvent,
    VirtualBackend, VirtualDeviceFeed, VirtualDeviceSpec,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "padhub")]
#[command(about = "Game controller event monitor")]
#[command(version)]
struct Cli {
    /// Path to the config file (default: <config dir>/padhub/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Drive the manager from a scripted virtual gamepad instead of hardware
    #[arg(long)]
    r#virtual: bool,

    /// Tag axis and hat motion with the device slot
    #[arg(long)]
    resolve_motion_slots: bool,

    /// Rumble duration in milliseconds when the south face button is pressed
    #[arg(long, default_value_t = 250)]
    rumble_ms: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_default()?,
    };
    setup(config.logging.level())?;

    let mut settings = config.input.clone();
    settings.resolve_motion_slots |= cli.resolve_motion_slots;
    info!("Starting padhub with settings: {:?}", settings);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let builder = InputManager::builder()
        .settings(settings.clone())
        .subscribe(channel_subscriber(event_tx));

    let manager = if cli.r#virtual {
        let (backend, feed) = VirtualBackend::new();
        let manager = builder.spawn(move || Ok(backend))?;
        std::thread::spawn(move || play_demo_script(feed));
        manager
    } else {
        spawn_hardware(builder, Duration::from_millis(settings.poll_interval_ms))?
    };
    let manager = Arc::new(manager);

    loop {
        tokio::select! {
            received = event_rx.recv() => {
                let Some(slot_event) = received else {
                    info!("Input thread finished");
                    break;
                };
                handle_event(&manager, slot_event, cli.rumble_ms).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    let stopping = manager.clone();
    tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .map_err(|e| eyre!("Failed to join shutdown task: {}", e))??;

    Ok(())
}

#[cfg(feature = "gilrs")]
fn spawn_hardware(
    builder: padhub::input::InputManagerBuilder,
    poll_interval: Duration,
) -> Result<InputManager> {
    use padhub::input::GilrsBackend;
    Ok(builder.spawn(move || GilrsBackend::new(poll_interval))?)
}

#[cfg(not(feature = "gilrs"))]
fn spawn_hardware(
    _builder: padhub::input::InputManagerBuilder,
    _poll_interval: Duration,
) -> Result<InputManager> {
    Err(eyre!(
        "Built without hardware support; run with --virtual or enable the gilrs feature"
    ))
}

async fn handle_event(manager: &Arc<InputManager>, slot_event: SlotEvent, rumble_ms: u32) {
    let SlotEvent {
        event,
        slot,
        timestamp,
    } = slot_event;
    debug!("[{}] slot {}: {:?}", timestamp.format("%H:%M:%S.%3f"), slot, event);

    match event {
        InputEvent::AxisMotion { .. } | InputEvent::HatMotion { .. } => {
            let manager = manager.clone();
            match tokio::task::spawn_blocking(move || manager.discretize(&event)).await {
                Ok(Ok(Some(DiscreteEvent::Axis(axis)))) => info!(
                    "Slot {} axis {}: {} {}",
                    axis.slot,
                    axis.axis,
                    if axis.direction > 0 { "+" } else { "-" },
                    if axis.pressed { "pressed" } else { "released" }
                ),
                Ok(Ok(Some(DiscreteEvent::Hat(hat)))) => info!(
                    "Slot {} hat {}: {:?} {}",
                    hat.slot,
                    hat.hat,
                    hat.direction,
                    if hat.pressed { "pressed" } else { "released" }
                ),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!("Failed to discretize {:?}: {}", event, e),
                Err(e) => warn!("Discretize task failed: {}", e),
            }
        }
        InputEvent::ButtonDown { button, .. } => {
            info!("Slot {} button {} down", slot, button);
            if button == 0 {
                if let Err(e) = manager.rumble(0x4000, 0xc000, rumble_ms) {
                    warn!("Failed to rumble: {}", e);
                }
            }
        }
        InputEvent::ButtonUp { button, .. } => info!("Slot {} button {} up", slot, button),
        InputEvent::DeviceAdded { .. } | InputEvent::DeviceRemoved { .. } => {
            let manager = manager.clone();
            match tokio::task::spawn_blocking(move || manager.list_controller_devices()).await {
                Ok(Ok(controllers)) => {
                    info!("{} controller(s) connected", controllers.len());
                    for (instance_id, name) in controllers {
                        info!("  [{}] {}", instance_id, name);
                    }
                }
                Ok(Err(e)) => warn!("Failed to list controllers: {}", e),
                Err(e) => warn!("Controller listing task failed: {}", e),
            }
        }
    }
}

/// Plays a short scripted session on a virtual gamepad, then quits.
fn play_demo_script(feed: VirtualDeviceFeed) {
    let step = || std::thread::sleep(Duration::from_millis(150));
    let pad = 7;

    feed.plug(0, VirtualDeviceSpec::gamepad(pad, "Virtual Pad"));
    feed.plug(1, VirtualDeviceSpec::joystick(9, "Virtual Stick"));
    step();

    for value in [0, 12000, 26000, 8000, -15000, -300] {
        feed.axis(pad, 0, value);
        step();
    }
    for mask in [HatMask::UP, HatMask::UP | HatMask::RIGHT, HatMask::CENTERED] {
        feed.hat(pad, 0, mask);
        step();
    }
    feed.button(pad, 0, true);
    step();
    feed.button(pad, 0, false);
    std::thread::sleep(Duration::from_millis(600));

    feed.unplug(9);
    step();
    feed.quit();
}

fn setup(level: Level) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env(level);
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
