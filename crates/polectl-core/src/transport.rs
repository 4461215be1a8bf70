//! Transport traits for the radio adapter and a connected peripheral.
//!
//! The [`Adapter`] and [`Peripheral`] traits abstract over the radio stack.
//! Implementations issue requests and report their outcomes asynchronously
//! by pushing [`AdapterEvent`]s and [`PeripheralEvent`]s into the channels
//! handed to the session IO tasks. A request method returning `Ok(())` only
//! means the request was accepted; completion always arrives as an event.
//!
//! Session IO tasks operate on these traits rather than on a concrete radio
//! binding, enabling deterministic unit testing with the mock transports in
//! the `polectl-test-harness` crate.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{AdapterState, ControlPointHandle, ControlPointId, PeerId, PeerInfo};

/// Event pushed by an [`Adapter`] implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// The adapter's power/availability state changed.
    StateChanged(AdapterState),
    /// A peer was seen while scanning.
    PeerDiscovered(PeerInfo),
    /// A connection attempt succeeded.
    PeerConnected(PeerId),
    /// A connection attempt failed.
    PeerConnectFailed { peer: PeerId, reason: String },
    /// A peer disconnected, either on request or unexpectedly.
    PeerDisconnected(PeerId),
}

/// Event pushed by a [`Peripheral`] implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralEvent {
    /// Control points found by [`Peripheral::discover_control_points`].
    ControlPointsDiscovered(Vec<(ControlPointId, ControlPointHandle)>),
    /// A control point value arrived, either as a read response or as an
    /// unsolicited notification.
    ValueUpdated {
        id: ControlPointId,
        value: Result<Option<Vec<u8>>>,
    },
    /// A write requested with a response was acknowledged (or rejected).
    WriteCompleted { id: ControlPointId, result: Result<()> },
    /// Response to [`Peripheral::read_rssi`], in dBm.
    SignalStrengthRead(Result<i16>),
}

/// Sending half of an adapter event feed.
pub type AdapterEventSender = mpsc::UnboundedSender<AdapterEvent>;
/// Receiving half of an adapter event feed.
pub type AdapterEventReceiver = mpsc::UnboundedReceiver<AdapterEvent>;
/// Sending half of a peripheral event feed.
pub type PeripheralEventSender = mpsc::UnboundedSender<PeripheralEvent>;
/// Receiving half of a peripheral event feed.
pub type PeripheralEventReceiver = mpsc::UnboundedReceiver<PeripheralEvent>;

/// Local radio adapter: scanning and connection management.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Current power/availability state.
    fn state(&self) -> AdapterState;

    /// Begin scanning for peers advertising any of the `services`.
    ///
    /// With `allow_duplicates` false the stack reports each peer at most
    /// once per scan.
    async fn start_scan(&self, services: &[String], allow_duplicates: bool) -> Result<()>;

    /// Stop an active scan.
    async fn stop_scan(&self) -> Result<()>;

    /// Initiate a connection. Completion arrives as
    /// [`AdapterEvent::PeerConnected`] or [`AdapterEvent::PeerConnectFailed`].
    async fn connect(&self, peer: &PeerId) -> Result<()>;

    /// Cancel a pending or established connection. Completion arrives as
    /// [`AdapterEvent::PeerDisconnected`].
    async fn cancel_connection(&self, peer: &PeerId) -> Result<()>;

    /// Open the data link to a connected peer.
    async fn open_link(&self, peer: &PeerId) -> Result<PeripheralLink>;
}

/// A connected peer's control-point service.
#[async_trait]
pub trait Peripheral: Send + Sync {
    /// Whether the underlying link is still up.
    fn is_connected(&self) -> bool;

    /// Discover handles for the given control points. Results arrive as
    /// [`PeripheralEvent::ControlPointsDiscovered`].
    async fn discover_control_points(&self, ids: &[ControlPointId]) -> Result<()>;

    /// Request the value of a control point. The value arrives as
    /// [`PeripheralEvent::ValueUpdated`].
    async fn read(&self, handle: ControlPointHandle) -> Result<()>;

    /// Write bytes to a control point.
    ///
    /// With `with_response` the peripheral acknowledges via
    /// [`PeripheralEvent::WriteCompleted`]; without it nothing is reported.
    async fn write(&self, handle: ControlPointHandle, data: &[u8], with_response: bool)
        -> Result<()>;

    /// Request the link's signal strength. The reading arrives as
    /// [`PeripheralEvent::SignalStrengthRead`].
    async fn read_rssi(&self) -> Result<()>;
}

/// A peripheral together with the event feed it pushes into.
pub struct PeripheralLink {
    pub peripheral: Arc<dyn Peripheral>,
    pub events: PeripheralEventReceiver,
}

impl std::fmt::Debug for PeripheralLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralLink")
            .field("connected", &self.peripheral.is_connected())
            .finish_non_exhaustive()
    }
}
