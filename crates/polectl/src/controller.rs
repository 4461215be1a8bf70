//! RobotController: owns the adapter session and the single attached robot.
//!
//! The controller serializes connection management through the
//! [`AdapterSession`] and keeps at most one [`DeviceFacade`] attached. A
//! background watcher detaches the robot when the adapter reports its peer
//! gone, so callers holding the facade see [`Error::NotConnected`] instead
//! of timeouts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use polectl_core::error::{Error, Result};
use polectl_core::events::SessionEvent;
use polectl_core::transport::{Adapter, AdapterEventReceiver};
use polectl_core::types::{AdapterState, PeerId, PeerInfo, ROBOT_SERVICE_ID};
use polectl_records::MotorFormat;
use polectl_session::{AdapterConfig, AdapterSession, ConnectedPeer, DeviceConfig, DeviceSession};

use crate::robot::{DeviceFacade, FacadeConfig};
use crate::routines::StatusPoller;

type Attached = Arc<Mutex<Option<Arc<DeviceFacade>>>>;

/// Connection manager for the pole robot.
pub struct RobotController {
    adapter: AdapterSession,
    robot: Attached,
    events: broadcast::Sender<SessionEvent>,
    device_config: DeviceConfig,
    facade_config: FacadeConfig,
    discovery_timeout: Duration,
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
}

impl RobotController {
    /// Build a controller with default settings.
    pub fn new(adapter: Arc<dyn Adapter>, events: AdapterEventReceiver) -> Self {
        ControllerBuilder::new().build(adapter, events)
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.adapter.state()
    }

    /// Scan for robots for the configured scan window.
    pub async fn scan(&self) -> Result<Vec<PeerInfo>> {
        let peers = self.adapter.discover(vec![ROBOT_SERVICE_ID.to_string()]).await?;
        info!(count = peers.len(), "robot scan complete");
        Ok(peers)
    }

    /// Connect to `peer` and attach it as the active robot.
    ///
    /// Any robot already attached is disconnected first. The returned facade
    /// is ready for use: its control points have been discovered.
    pub async fn connect(&self, peer: PeerId) -> Result<Arc<DeviceFacade>> {
        if self.robot.lock().await.is_some() {
            if let Err(e) = self.disconnect().await {
                warn!(error = %e, "failed to disconnect previous robot");
            }
        }

        let ConnectedPeer { info, link } = self.adapter.connect(peer).await?;
        let session = DeviceSession::spawn(link, self.device_config.clone());
        if let Err(e) = session.wait_discovered(self.discovery_timeout).await {
            warn!(peer = %info.id, error = %e, "control-point discovery failed");
            session.shutdown().await;
            if let Err(e) = self.adapter.disconnect(info.id.clone()).await {
                debug!(peer = %info.id, error = %e, "disconnect after failed discovery");
            }
            return Err(e);
        }

        let robot = Arc::new(DeviceFacade::new(
            info.clone(),
            session,
            self.facade_config.clone(),
        ));
        if let Some(previous) = self.robot.lock().await.replace(robot.clone()) {
            previous.detach().await;
        }
        info!(peer = %info.id, name = info.display_name(), "robot connected");
        let _ = self.events.send(SessionEvent::RobotConnected(info));
        Ok(robot)
    }

    /// Disconnect the attached robot.
    pub async fn disconnect(&self) -> Result<PeerId> {
        let robot = self.robot.lock().await.take().ok_or(Error::NotConnected)?;
        let peer = robot.peer().id.clone();
        robot.detach().await;

        let result = self.adapter.disconnect(peer.clone()).await;
        info!(%peer, ok = result.is_ok(), "robot disconnected");
        let _ = self.events.send(SessionEvent::RobotDisconnected(peer));
        result
    }

    /// The attached robot.
    pub async fn robot(&self) -> Result<Arc<DeviceFacade>> {
        self.robot.lock().await.clone().ok_or(Error::NotConnected)
    }

    /// Connection-state feed.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Start polling the attached robot's status every `interval`.
    pub async fn status_poller(&self, interval: Duration) -> Result<StatusPoller> {
        let robot = self.robot().await?;
        Ok(StatusPoller::spawn(robot, self.subscribe(), interval))
    }

    /// Flush the adapter queue, drop the attached robot, and stop both IO
    /// tasks.
    pub async fn shutdown(self) {
        self.adapter.flush();
        if let Some(robot) = self.robot.lock().await.take() {
            robot.detach().await;
        }
        self.cancel.cancel();
        let _ = self.watcher.await;
        self.adapter.shutdown().await;
    }
}

/// Detach the robot when its peer disconnects without being asked to.
async fn watch_disconnects(
    robot: Attached,
    mut events: broadcast::Receiver<SessionEvent>,
    notify: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let peer = match event {
            Ok(SessionEvent::PeerDisconnected(peer)) => peer,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "disconnect watcher lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let mut attached = robot.lock().await;
        if !matches!(attached.as_ref(), Some(r) if r.peer().id == peer) {
            continue;
        }
        if let Some(lost) = attached.take() {
            drop(attached);
            lost.detach().await;
            warn!(%peer, "robot connection lost");
            let _ = notify.send(SessionEvent::RobotDisconnected(peer));
        }
    }
}

/// Fluent builder for [`RobotController`].
///
/// ```no_run
/// use std::time::Duration;
/// use polectl::ControllerBuilder;
/// use polectl_test_harness::{SimConfig, SimulatedAdapter};
///
/// # async fn example() {
/// let (adapter, events) = SimulatedAdapter::new(SimConfig::default());
/// let controller = ControllerBuilder::new()
///     .scan_duration(Duration::from_secs(2))
///     .write_timeout(Duration::from_secs(3))
///     .build(adapter, events);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ControllerBuilder {
    adapter: AdapterConfig,
    device: DeviceConfig,
    facade: FacadeConfig,
    discovery_timeout: Duration,
    event_capacity: usize,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        ControllerBuilder {
            adapter: AdapterConfig::default(),
            device: DeviceConfig::default(),
            facade: FacadeConfig::default(),
            discovery_timeout: Duration::from_secs(5),
            event_capacity: 64,
        }
    }

    /// How long queued adapter operations wait for power on.
    pub fn power_on_timeout(mut self, timeout: Duration) -> Self {
        self.adapter.power_on_timeout = timeout;
        self
    }

    pub fn scan_duration(mut self, duration: Duration) -> Self {
        self.adapter.scan_duration = duration;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.adapter.connect_timeout = timeout;
        self
    }

    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.adapter.disconnect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.device.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.device.write_timeout = timeout;
        self
    }

    /// How long a new connection may take to report its control points.
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn write_key(mut self, key: u16) -> Self {
        self.facade.write_key = key;
        self
    }

    pub fn motor_format(mut self, format: MotorFormat) -> Self {
        self.facade.motor_format = format;
        self
    }

    /// Whether writes wait for the robot's acknowledgement (default on).
    pub fn confirm_writes(mut self, confirm: bool) -> Self {
        self.facade.confirm_writes = confirm;
        self
    }

    /// Capacity of the session event broadcast channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Spawn the adapter session and the disconnect watcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self, adapter: Arc<dyn Adapter>, events: AdapterEventReceiver) -> RobotController {
        let (event_tx, _) = broadcast::channel(self.event_capacity);
        // Subscribe before the adapter task exists so no disconnect is missed.
        let watcher_rx = event_tx.subscribe();
        let session = AdapterSession::spawn(adapter, events, self.adapter, event_tx.clone());

        let robot: Attached = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_disconnects(
            robot.clone(),
            watcher_rx,
            event_tx.clone(),
            cancel.clone(),
        ));

        RobotController {
            adapter: session,
            robot,
            events: event_tx,
            device_config: self.device,
            facade_config: self.facade,
            discovery_timeout: self.discovery_timeout,
            cancel,
            watcher,
        }
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
