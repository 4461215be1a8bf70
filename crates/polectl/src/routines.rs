//! Operator routines and periodic status polling.
//!
//! The routines are the control-panel actions: fixed motor and servo
//! settings issued through a [`DeviceFacade`] with the facade's write key.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use polectl_core::error::{Error, Result};
use polectl_core::events::SessionEvent;
use polectl_records::{Battery, MotorControl, MotorDirection, ServoPosition, SignalStrength};

use crate::robot::DeviceFacade;

/// Motor speed for upward travel.
pub const MOTOR_UP_SPEED: u16 = 0x90;
/// Motor speed for downward travel.
pub const MOTOR_DOWN_SPEED: u16 = 0x80;
/// Latch position that holds the payload for lifting.
pub const RETRIEVE_LATCH_POSITION: u8 = 75;
/// Latch position that flips the payload off the launcher.
pub const LAUNCH_LATCH_POSITION: u8 = 175;
/// Delay between starting the motor and flipping the latch during a launch.
pub const LAUNCH_LATCH_DELAY: Duration = Duration::from_millis(250);
/// Delay between flipping the latch and stopping the motor.
pub const LAUNCH_STOP_DELAY: Duration = Duration::from_millis(400);
/// Default status poll interval.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(5);

impl DeviceFacade {
    async fn run_motor(&self, speed: u16, direction: MotorDirection, autostop: bool) -> Result<()> {
        let motor = MotorControl::new(speed, direction, autostop, self.config().write_key)?;
        info!(peer = %self.peer().id, ?direction, speed, autostop, "motor command");
        self.set_motor_control(motor).await
    }

    /// Run the motor up until the top limit switch stops it.
    pub async fn start_motor_up(&self) -> Result<()> {
        self.run_motor(MOTOR_UP_SPEED, MotorDirection::Up, true).await
    }

    /// Run the motor down until the bottom limit switch stops it.
    pub async fn start_motor_down(&self) -> Result<()> {
        self.run_motor(MOTOR_DOWN_SPEED, MotorDirection::Down, true)
            .await
    }

    /// Raise without autostop.
    pub async fn raise_to_top(&self) -> Result<()> {
        self.run_motor(MOTOR_UP_SPEED, MotorDirection::Up, false)
            .await
    }

    /// Lower without autostop.
    pub async fn lower_to_bottom(&self) -> Result<()> {
        self.run_motor(MOTOR_DOWN_SPEED, MotorDirection::Down, false)
            .await
    }

    pub async fn stop_motor(&self) -> Result<()> {
        info!(peer = %self.peer().id, "motor stop");
        let motor = MotorControl::stopped(self.config().write_key);
        self.set_motor_control(motor).await
    }

    pub async fn emergency_stop(&self) -> Result<()> {
        warn!(peer = %self.peer().id, "emergency stop");
        self.stop_motor().await
    }

    /// Set the latch to hold the payload for lifting.
    pub async fn retrieve_position(&self) -> Result<()> {
        let latch = ServoPosition::new(RETRIEVE_LATCH_POSITION, self.config().write_key)?;
        self.set_latch_position(latch).await
    }

    /// Launch: run the motor up, flip the latch, then stop the motor.
    ///
    /// Delays are measured from the start of the preceding command. The
    /// motor is stopped even if the latch command fails.
    pub async fn launch(&self) -> Result<()> {
        info!(peer = %self.peer().id, "launch sequence started");
        let started = Instant::now();
        self.start_motor_up().await?;

        tokio::time::sleep_until(started + LAUNCH_LATCH_DELAY).await;
        let flipped = Instant::now();
        let latch = match ServoPosition::new(LAUNCH_LATCH_POSITION, self.config().write_key) {
            Ok(latch) => self.set_latch_position(latch).await,
            Err(e) => Err(e),
        };

        tokio::time::sleep_until(flipped + LAUNCH_STOP_DELAY).await;
        let stopped = self.stop_motor().await;

        if let Err(e) = &latch {
            warn!(error = %e, "launch latch command failed");
        }
        latch.and(stopped)
    }
}

// ---------------------------------------------------------------------------
// Status polling
// ---------------------------------------------------------------------------

/// The latest status readings. A failed reading keeps its last good value
/// and records the error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub signal_strength: Option<SignalStrength>,
    pub battery: Option<Battery>,
    pub last_error: Option<Error>,
    /// Completed poll rounds.
    pub polls: u64,
}

/// Background task reading signal strength and battery on an interval.
///
/// Stops on its own when the robot it polls is reported disconnected.
pub struct StatusPoller {
    rx: watch::Receiver<StatusSnapshot>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StatusPoller {
    pub fn spawn(
        robot: Arc<DeviceFacade>,
        events: broadcast::Receiver<SessionEvent>,
        interval: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(StatusSnapshot::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(robot, events, interval, tx, cancel.clone()));
        StatusPoller { rx, cancel, task }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.rx.clone()
    }

    pub fn latest(&self) -> StatusSnapshot {
        self.rx.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn poll_loop(
    robot: Arc<DeviceFacade>,
    mut events: broadcast::Receiver<SessionEvent>,
    interval: Duration,
    tx: watch::Sender<StatusSnapshot>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let peer = robot.peer().id.clone();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            event = events.recv() => match event {
                Ok(SessionEvent::RobotDisconnected(gone)) if gone == peer => {
                    debug!(%peer, "robot disconnected, status polling stopped");
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "status poller lagged on session events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            _ = ticker.tick() => {
                let (rssi, battery) = tokio::join!(robot.signal_strength(), robot.battery());
                tx.send_modify(|s| {
                    s.polls += 1;
                    s.last_error = None;
                    match rssi {
                        Ok(r) => s.signal_strength = Some(r),
                        Err(e) => s.last_error = Some(e),
                    }
                    match battery {
                        Ok(b) => s.battery = Some(b),
                        Err(e) => s.last_error = Some(e),
                    }
                });
            }
        }
    }
}
