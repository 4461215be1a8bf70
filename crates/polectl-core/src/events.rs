//! Session event types.
//!
//! Events are emitted through a [`tokio::sync::broadcast`] channel when the
//! adapter or the robot connection changes state. The presentation layer
//! subscribes to these for connection-status updates without polling.

use crate::types::{AdapterState, PeerId, PeerInfo};

/// An event emitted when adapter or connection state changes.
///
/// Events are delivered on a best-effort basis through a bounded broadcast
/// channel; slow consumers may miss events.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The local adapter's power/availability state changed.
    AdapterStateChanged(AdapterState),

    /// The adapter reported a peer disconnect. Emitted for every peer,
    /// whether or not a disconnect was requested.
    PeerDisconnected(PeerId),

    /// A robot connected and its device session was started.
    RobotConnected(PeerInfo),

    /// The attached robot disconnected and its device session was dropped.
    RobotDisconnected(PeerId),
}
