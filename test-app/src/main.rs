// polectl test application -- CLI tool for exercising the controller,
// the device pipeline, and the operator routines against the simulated
// pole robot.
//
// Usage:
//   polectl-test-app scan
//   polectl-test-app --robots 3 status
//   polectl-test-app motor up --speed 0x90 --autostop
//   polectl-test-app motor stop
//   polectl-test-app latch 75
//   polectl-test-app --no-ack launcher 30
//   polectl-test-app launch
//   polectl-test-app --power-on-delay-ms 2000 monitor --duration 20 --drop-after 12
//   polectl-test-app --log polectl_session=debug status

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{info, warn};

use polectl::{
    ControllerBuilder, DeviceFacade, MotorControl, MotorDirection, RobotController,
    ServoPosition, StatusSnapshot,
};
use polectl_test_harness::{SimConfig, SimulatedAdapter};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// polectl test application -- drives the simulated pole robot.
#[derive(Parser)]
#[command(name = "polectl-test-app", version, about)]
struct Cli {
    /// Number of simulated robots in range.
    #[arg(long, default_value_t = 1)]
    robots: usize,

    /// Delay before the simulated adapter powers on, in milliseconds.
    #[arg(long, default_value_t = 0)]
    power_on_delay_ms: u64,

    /// Simulated robot never acknowledges writes (exercises write timeouts).
    #[arg(long)]
    no_ack: bool,

    /// Send writes without requesting acknowledgement.
    #[arg(long)]
    unconfirmed: bool,

    /// Log filter directives (e.g. `debug` or `polectl_session=trace`).
    /// Falls back to RUST_LOG, then `warn`.
    #[arg(long)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan for robots and list them.
    Scan,

    /// Read every control point of the first robot found.
    Status,

    /// Motor operations.
    Motor {
        #[command(subcommand)]
        action: MotorAction,
    },

    /// Set the latch servo position (0-180).
    Latch { position: u8 },

    /// Set the launcher servo position (0-180).
    Launcher { position: u8 },

    /// Set the latch to the lifting position.
    Retrieve,

    /// Run the launch sequence.
    Launch,

    /// Poll status and print session events.
    Monitor {
        /// Duration in seconds.
        #[arg(long, default_value_t = 15)]
        duration: u64,

        /// Poll interval in seconds.
        #[arg(long, default_value_t = 5)]
        interval: u64,

        /// Drop the robot's link after this many seconds.
        #[arg(long)]
        drop_after: Option<u64>,
    },
}

#[derive(Subcommand)]
enum MotorAction {
    /// Run the motor up.
    Up {
        /// Speed magnitude (decimal or 0x-prefixed hex, at most 0xFF).
        #[arg(long, value_parser = parse_speed, default_value = "0x90")]
        speed: u16,
        /// Stop at the limit switch.
        #[arg(long)]
        autostop: bool,
    },
    /// Run the motor down.
    Down {
        #[arg(long, value_parser = parse_speed, default_value = "0x80")]
        speed: u16,
        #[arg(long)]
        autostop: bool,
    },
    /// Stop the motor.
    Stop,
    /// Read the current motor setting.
    Get,
}

/// Parse a speed like "0x90" or "144".
fn parse_speed(s: &str) -> std::result::Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid speed: {e}"))
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn init_tracing(filter: Option<&str>) {
    let env_filter = match filter {
        Some(directives) => tracing_subscriber::EnvFilter::new(directives),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn sim_config(cli: &Cli) -> SimConfig {
    SimConfig {
        robots: cli.robots,
        power_on_delay: Duration::from_millis(cli.power_on_delay_ms),
        ack_writes: !cli.no_ack,
        ..SimConfig::default()
    }
}

/// Scan and connect to the first robot found.
async fn connect_first(controller: &RobotController) -> Result<Arc<DeviceFacade>> {
    let peers = controller.scan().await.context("scan failed")?;
    let Some(peer) = peers.first() else {
        bail!("no robots found");
    };
    println!("Connecting to {} ({})...", peer.display_name(), peer.id);
    let robot = controller
        .connect(peer.id.clone())
        .await
        .with_context(|| format!("failed to connect to {}", peer.id))?;
    info!(peer = %peer.id, "robot ready");
    Ok(robot)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_scan(controller: &RobotController) -> Result<()> {
    let start = Instant::now();
    let peers = controller.scan().await.context("scan failed")?;
    println!(
        "Found {} robot(s) in {:.1}s:",
        peers.len(),
        start.elapsed().as_secs_f64()
    );
    for peer in &peers {
        let rssi = peer
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "-".into());
        println!("  {:<12} {:<28} {}", peer.id, peer.display_name(), rssi);
    }
    Ok(())
}

async fn cmd_status(robot: &DeviceFacade) -> Result<()> {
    println!("Robot: {}", robot.peer().display_name());
    match robot.battery().await {
        Ok(b) => println!("  Battery:         {:.2} V (code {})", b.volts(), b.code()),
        Err(e) => println!("  Battery:         ERR ({e})"),
    }
    match robot.signal_strength().await {
        Ok(s) => println!("  Signal strength: {} dBm", s.dbm()),
        Err(e) => println!("  Signal strength: ERR ({e})"),
    }
    match robot.robot_position().await {
        Ok(p) => println!("  Position:        {p}"),
        Err(e) => println!("  Position:        ERR ({e})"),
    }
    match robot.motor_control().await {
        Ok(m) => println!("  Motor:           {}", describe_motor(&m)),
        Err(e) => println!("  Motor:           ERR ({e})"),
    }
    match robot.latch_position().await {
        Ok(s) => println!("  Latch:           {}", s.position()),
        Err(e) => println!("  Latch:           ERR ({e})"),
    }
    match robot.launcher_position().await {
        Ok(s) => println!("  Launcher:        {}", s.position()),
        Err(e) => println!("  Launcher:        ERR ({e})"),
    }
    Ok(())
}

fn describe_motor(motor: &MotorControl) -> String {
    match motor.direction() {
        MotorDirection::Stopped => "stopped".to_string(),
        direction => format!(
            "{direction:?} at 0x{:02X}{}",
            motor.speed(),
            if motor.autostop() { " (autostop)" } else { "" }
        ),
    }
}

async fn cmd_motor(robot: &DeviceFacade, action: &MotorAction) -> Result<()> {
    let key = robot.config().write_key;
    let motor = match action {
        MotorAction::Get => {
            let motor = robot.motor_control().await?;
            println!("Motor: {}", describe_motor(&motor));
            return Ok(());
        }
        MotorAction::Stop => MotorControl::stopped(key),
        MotorAction::Up { speed, autostop } => {
            MotorControl::new(*speed, MotorDirection::Up, *autostop, key)?
        }
        MotorAction::Down { speed, autostop } => {
            MotorControl::new(*speed, MotorDirection::Down, *autostop, key)?
        }
    };
    robot.set_motor_control(motor).await?;
    println!("Motor set: {}", describe_motor(&motor));
    Ok(())
}

async fn cmd_servo(robot: &DeviceFacade, latch: bool, position: u8) -> Result<()> {
    let setting = ServoPosition::new(position, robot.config().write_key)?;
    if latch {
        robot.set_latch_position(setting).await?;
        let readback = robot.latch_position().await?;
        println!("Latch set to {position} (reads back {})", readback.position());
    } else {
        robot.set_launcher_position(setting).await?;
        let readback = robot.launcher_position().await?;
        println!(
            "Launcher set to {position} (reads back {})",
            readback.position()
        );
    }
    Ok(())
}

async fn cmd_launch(robot: &DeviceFacade) -> Result<()> {
    let start = Instant::now();
    robot.launch().await.context("launch failed")?;
    println!(
        "Launch sequence complete in {} ms",
        start.elapsed().as_millis()
    );
    Ok(())
}

fn print_snapshot(elapsed: Duration, s: &StatusSnapshot) {
    let rssi = s
        .signal_strength
        .map(|r| format!("{} dBm", r.dbm()))
        .unwrap_or_else(|| "-".into());
    let battery = s
        .battery
        .map(|b| format!("{:.2} V", b.volts()))
        .unwrap_or_else(|| "-".into());
    let error = s
        .last_error
        .as_ref()
        .map(|e| format!("  [{e}]"))
        .unwrap_or_default();
    println!(
        "[{:>5.1}s] poll #{:<3} rssi {rssi:<8} battery {battery}{error}",
        elapsed.as_secs_f64(),
        s.polls
    );
}

async fn cmd_monitor(
    controller: &RobotController,
    sim: &SimulatedAdapter,
    duration: u64,
    interval: u64,
    drop_after: Option<u64>,
) -> Result<()> {
    let robot = controller.robot().await?;
    let poller = controller
        .status_poller(Duration::from_secs(interval.max(1)))
        .await?;
    let mut snapshots = poller.subscribe();
    let mut events = controller.subscribe();

    println!("Monitoring {} for {duration}s...", robot.peer().display_name());
    let start = Instant::now();
    let end = start + Duration::from_secs(duration);
    let mut drop_pending = drop_after.is_some();
    let drop_link = tokio::time::sleep_until(start + Duration::from_secs(drop_after.unwrap_or(0)));
    tokio::pin!(drop_link);

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(end) => {
                println!("Monitor duration elapsed.");
                break;
            }

            _ = &mut drop_link, if drop_pending => {
                println!("[event] simulating link loss");
                sim.drop_link(&robot.peer().id);
                drop_pending = false;
            }

            changed = snapshots.changed() => {
                if changed.is_err() {
                    println!("Status polling stopped.");
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_snapshot(start.elapsed(), &snapshot);
            }

            event = events.recv() => match event {
                Ok(event) => println!("[event] {event:?}"),
                Err(RecvError::Lagged(n)) => {
                    println!("[warning] missed {n} events (consumer too slow)");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    poller.stop().await;
    Ok(())
}

/// Connect to the first robot, run `command`, then disconnect.
async fn run_on_robot(
    controller: &RobotController,
    sim: &SimulatedAdapter,
    command: &Command,
) -> Result<()> {
    let robot = connect_first(controller).await?;

    let result = match command {
        Command::Scan => Ok(()),
        Command::Status => cmd_status(&robot).await,
        Command::Motor { action } => cmd_motor(&robot, action).await,
        Command::Latch { position } => cmd_servo(&robot, true, *position).await,
        Command::Launcher { position } => cmd_servo(&robot, false, *position).await,
        Command::Retrieve => robot
            .retrieve_position()
            .await
            .map(|()| println!("Latch set to lifting position"))
            .map_err(Into::into),
        Command::Launch => cmd_launch(&robot).await,
        Command::Monitor {
            duration,
            interval,
            drop_after,
        } => cmd_monitor(controller, sim, *duration, *interval, *drop_after).await,
    };

    // The robot may already be gone (monitor --drop-after).
    match controller.disconnect().await {
        Ok(peer) => println!("Disconnected from {peer}"),
        Err(polectl::Error::NotConnected) => {}
        Err(e) => warn!(error = %e, "disconnect failed"),
    }
    result
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    let (sim, events) = SimulatedAdapter::new(sim_config(&cli));
    let controller = ControllerBuilder::new()
        .confirm_writes(!cli.unconfirmed)
        .build(sim.clone(), events);

    let result = match &cli.command {
        Command::Scan => cmd_scan(&controller).await,
        command => run_on_robot(&controller, &sim, command).await,
    };
    controller.shutdown().await;
    result
}
