//! Simulated adapter and robot firmware.
//!
//! Unlike the scripted mocks, the simulator answers every request on its
//! own after [`SimConfig::latency`]. The robot keeps the state its firmware
//! would: motor setting, servo positions, battery level, and a simple
//! travel model in which a running motor reaches the top or bottom limit
//! after [`SimConfig::travel_time`] and stops there when autostop is set.
//!
//! Spawning delayed events requires a tokio runtime, so the simulator must
//! be created and used from within one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use polectl_core::error::{Error, Result};
use polectl_core::transport::{
    Adapter, AdapterEvent, AdapterEventReceiver, AdapterEventSender, Peripheral, PeripheralEvent,
    PeripheralEventSender, PeripheralLink,
};
use polectl_core::types::{
    AdapterState, ControlPointHandle, ControlPointId, PeerId, PeerInfo, ROBOT_SERVICE_ID,
    WRITE_KEY,
};
use polectl_records::{
    Battery, MotorControl, MotorDirection, MotorFormat, RobotPosition, ServoPosition,
};

use crate::MockPeripheral;

/// Behavior of the simulated adapter and robots.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of robots advertising the robot service.
    pub robots: usize,
    /// Time before the adapter reports powered on. Zero starts powered on.
    pub power_on_delay: Duration,
    /// Delay before each response event.
    pub latency: Duration,
    /// Whether writes requested with a response are acknowledged.
    pub ack_writes: bool,
    /// Time for a running motor to reach a limit.
    pub travel_time: Duration,
    /// Key the firmware expects at the start of every write.
    pub write_key: u16,
    /// Motor record shape the firmware speaks.
    pub motor_format: MotorFormat,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            robots: 1,
            power_on_delay: Duration::ZERO,
            latency: Duration::from_millis(20),
            ack_writes: true,
            travel_time: Duration::from_secs(3),
            write_key: WRITE_KEY,
            motor_format: MotorFormat::Extended,
        }
    }
}

/// Send `event` on `tx` after `latency`, or at once if it is zero.
fn emit_after<E: Send + 'static>(tx: &mpsc::UnboundedSender<E>, latency: Duration, event: E) {
    if latency.is_zero() {
        let _ = tx.send(event);
        return;
    }
    let tx = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(latency).await;
        let _ = tx.send(event);
    });
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// A simulated radio adapter with a fixed set of robots in range.
pub struct SimulatedAdapter {
    state: Arc<Mutex<AdapterState>>,
    events: AdapterEventSender,
    robots: Vec<Arc<SimulatedRobot>>,
    latency: Duration,
}

impl SimulatedAdapter {
    pub fn new(config: SimConfig) -> (Arc<Self>, AdapterEventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();

        let initial = if config.power_on_delay.is_zero() {
            AdapterState::PoweredOn
        } else {
            AdapterState::PoweredOff
        };
        let state = Arc::new(Mutex::new(initial));
        if !config.power_on_delay.is_zero() {
            let state = state.clone();
            let events = events.clone();
            let delay = config.power_on_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Ok(mut s) = state.lock() {
                    *s = AdapterState::PoweredOn;
                }
                debug!("simulated adapter powered on");
                let _ = events.send(AdapterEvent::StateChanged(AdapterState::PoweredOn));
            });
        }

        let robots = (1..=config.robots)
            .map(|n| Arc::new(SimulatedRobot::new(n, config.clone())))
            .collect();
        let adapter = SimulatedAdapter {
            state,
            events,
            robots,
            latency: config.latency,
        };
        (Arc::new(adapter), rx)
    }

    pub fn robots(&self) -> &[Arc<SimulatedRobot>] {
        &self.robots
    }

    pub fn robot(&self, peer: &PeerId) -> Option<&Arc<SimulatedRobot>> {
        self.robots.iter().find(|r| r.info.id == *peer)
    }

    /// Drop a robot's link as if it went out of range.
    pub fn drop_link(&self, peer: &PeerId) {
        if let Some(robot) = self.robot(peer) {
            robot.disconnect();
            emit_after(
                &self.events,
                self.latency,
                AdapterEvent::PeerDisconnected(peer.clone()),
            );
        }
    }
}

#[async_trait]
impl Adapter for SimulatedAdapter {
    fn state(&self) -> AdapterState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(AdapterState::Unknown)
    }

    async fn start_scan(&self, services: &[String], _allow_duplicates: bool) -> Result<()> {
        let advertised = services.is_empty()
            || services
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ROBOT_SERVICE_ID));
        if !advertised {
            return Ok(());
        }
        for robot in &self.robots {
            emit_after(
                &self.events,
                self.latency,
                AdapterEvent::PeerDiscovered(robot.info.clone()),
            );
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, peer: &PeerId) -> Result<()> {
        let event = match self.robot(peer) {
            Some(robot) => {
                robot.connected.store(true, Ordering::SeqCst);
                AdapterEvent::PeerConnected(peer.clone())
            }
            None => AdapterEvent::PeerConnectFailed {
                peer: peer.clone(),
                reason: "peer not in range".into(),
            },
        };
        emit_after(&self.events, self.latency, event);
        Ok(())
    }

    async fn cancel_connection(&self, peer: &PeerId) -> Result<()> {
        if let Some(robot) = self.robot(peer) {
            robot.disconnect();
        }
        emit_after(
            &self.events,
            self.latency,
            AdapterEvent::PeerDisconnected(peer.clone()),
        );
        Ok(())
    }

    async fn open_link(&self, peer: &PeerId) -> Result<PeripheralLink> {
        match self.robot(peer) {
            Some(robot) => robot.open_link(),
            None => Err(Error::NotConnected),
        }
    }
}

// ---------------------------------------------------------------------------
// Robot
// ---------------------------------------------------------------------------

struct RobotState {
    motor: MotorControl,
    /// When the current motor run started, if the motor is running.
    moving_since: Option<Instant>,
    /// Position while the motor is not running.
    resting: RobotPosition,
    latch: u8,
    launcher: u8,
    battery_code: u16,
    rssi: i16,
}

impl RobotState {
    /// Advance the travel model to `now` and report the position.
    fn position(&mut self, now: Instant, travel_time: Duration, write_key: u16) -> RobotPosition {
        let Some(since) = self.moving_since else {
            return self.resting;
        };
        let elapsed = now.duration_since(since);
        let up = self.motor.direction() == MotorDirection::Up;
        if elapsed >= travel_time {
            self.resting = if up {
                RobotPosition::Top
            } else {
                RobotPosition::Bottom
            };
            if self.motor.autostop() {
                self.motor = MotorControl::stopped(write_key);
                self.moving_since = None;
            }
            return self.resting;
        }
        let speed = self.motor.speed().min(i8::MAX as u16) as i8;
        let duration = elapsed.as_secs().min(u8::MAX as u64) as u8;
        if up {
            RobotPosition::GoingUp { speed, duration }
        } else {
            RobotPosition::GoingDown { speed, duration }
        }
    }

    fn set_motor(&mut self, motor: MotorControl, now: Instant) {
        let was_running = self.moving_since.is_some();
        match motor.direction() {
            MotorDirection::Stopped => {
                if was_running && !matches!(self.resting, RobotPosition::Top | RobotPosition::Bottom)
                {
                    self.resting = RobotPosition::StoppedUnknown;
                }
                self.moving_since = None;
            }
            direction => {
                let same_run = was_running && self.motor.direction() == direction;
                if !same_run {
                    self.moving_since = Some(now);
                    self.resting = RobotPosition::StoppedUnknown;
                }
            }
        }
        self.motor = motor;
    }
}

/// A simulated pole robot.
pub struct SimulatedRobot {
    info: PeerInfo,
    config: SimConfig,
    state: Mutex<RobotState>,
    events: Mutex<Option<PeripheralEventSender>>,
    connected: AtomicBool,
}

impl SimulatedRobot {
    fn new(number: usize, config: SimConfig) -> Self {
        let info = PeerInfo {
            id: PeerId::new(format!("robot-{number}")),
            name: Some(format!("Pole Robot {number}")),
            rssi: Some(-50 - 5 * number.min(8) as i16),
        };
        let state = RobotState {
            motor: MotorControl::stopped(config.write_key),
            moving_since: None,
            resting: RobotPosition::Bottom,
            latch: 90,
            launcher: 0,
            battery_code: 744,
            rssi: info.rssi.unwrap_or(-60),
        };
        SimulatedRobot {
            info,
            config,
            state: Mutex::new(state),
            events: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    /// Open a fresh event feed. Any earlier feed is closed.
    pub fn open_link(self: &Arc<Self>) -> Result<PeripheralLink> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.lock_events()? = Some(tx);
        Ok(PeripheralLink {
            peripheral: self.clone(),
            events: rx,
        })
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut events) = self.events.lock() {
            events.take();
        }
    }

    pub fn motor(&self) -> Option<MotorControl> {
        self.state.lock().ok().map(|s| s.motor)
    }

    pub fn latch(&self) -> Option<u8> {
        self.state.lock().ok().map(|s| s.latch)
    }

    pub fn launcher(&self) -> Option<u8> {
        self.state.lock().ok().map(|s| s.launcher)
    }

    pub fn set_battery_code(&self, code: u16) {
        if let Ok(mut s) = self.state.lock() {
            s.battery_code = code;
        }
    }

    pub fn set_rssi(&self, dbm: i16) {
        if let Ok(mut s) = self.state.lock() {
            s.rssi = dbm;
        }
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, RobotState>> {
        self.state
            .lock()
            .map_err(|_| Error::Transport("robot state poisoned".into()))
    }

    fn lock_events(&self) -> Result<std::sync::MutexGuard<'_, Option<PeripheralEventSender>>> {
        self.events
            .lock()
            .map_err(|_| Error::Transport("robot link poisoned".into()))
    }

    fn emit(&self, event: PeripheralEvent) {
        if let Ok(events) = self.events.lock() {
            if let Some(tx) = events.as_ref() {
                emit_after(tx, self.config.latency, event);
            }
        }
    }

    fn control_point(handle: ControlPointHandle) -> Result<ControlPointId> {
        ControlPointId::DATA_POINTS
            .into_iter()
            .find(|id| MockPeripheral::handle_for(*id) == handle)
            .ok_or_else(|| Error::Transport(format!("unknown handle {}", handle.0)))
    }

    fn record(&self, id: ControlPointId) -> Result<Vec<u8>> {
        let mut state = self.lock_state()?;
        let bytes = match id {
            ControlPointId::Battery => Battery::from_code(state.battery_code).to_bytes(),
            ControlPointId::Motor => {
                state.position(Instant::now(), self.config.travel_time, self.config.write_key);
                state.motor.to_bytes(self.config.motor_format)
            }
            ControlPointId::RobotPosition => state
                .position(Instant::now(), self.config.travel_time, self.config.write_key)
                .to_bytes(),
            ControlPointId::Latch => ServoPosition::new(state.latch, 0)?.to_bytes(),
            ControlPointId::Launcher => ServoPosition::new(state.launcher, 0)?.to_bytes(),
            ControlPointId::SignalStrength => state.rssi.to_le_bytes().to_vec(),
        };
        Ok(bytes)
    }

    fn apply_write(&self, id: ControlPointId, data: &[u8]) -> Result<()> {
        if data.len() < 2 || u16::from_le_bytes([data[0], data[1]]) != self.config.write_key {
            return Err(Error::Transport("invalid write key".into()));
        }
        let mut state = self.lock_state()?;
        match id {
            ControlPointId::Motor => {
                let motor = MotorControl::decode(data, self.config.motor_format)?;
                let now = Instant::now();
                state.position(now, self.config.travel_time, self.config.write_key);
                state.set_motor(motor, now);
            }
            ControlPointId::Latch => state.latch = ServoPosition::decode(data)?.position(),
            ControlPointId::Launcher => state.launcher = ServoPosition::decode(data)?.position(),
            other => return Err(Error::Transport(format!("{other} is read-only"))),
        }
        Ok(())
    }
}

#[async_trait]
impl Peripheral for SimulatedRobot {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn discover_control_points(&self, ids: &[ControlPointId]) -> Result<()> {
        let found = ids
            .iter()
            .filter(|id| !id.is_pseudo())
            .map(|id| (*id, MockPeripheral::handle_for(*id)))
            .collect();
        self.emit(PeripheralEvent::ControlPointsDiscovered(found));
        Ok(())
    }

    async fn read(&self, handle: ControlPointHandle) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let id = Self::control_point(handle)?;
        let value = self.record(id).map(Some);
        trace!(%id, "simulated read");
        self.emit(PeripheralEvent::ValueUpdated { id, value });
        Ok(())
    }

    async fn write(&self, handle: ControlPointHandle, data: &[u8], with_response: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let id = Self::control_point(handle)?;
        let result = self.apply_write(id, data);
        debug!(%id, ok = result.is_ok(), "simulated write");
        if with_response && self.config.ack_writes {
            self.emit(PeripheralEvent::WriteCompleted { id, result });
        }
        Ok(())
    }

    async fn read_rssi(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let rssi = self.lock_state()?.rssi;
        self.emit(PeripheralEvent::SignalStrengthRead(Ok(rssi)));
        Ok(())
    }
}
