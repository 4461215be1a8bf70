//! Shared identifiers and value types.
//!
//! These types cross the boundary between the transport collaborator, the
//! session IO tasks, and the presentation layer, so they are deliberately
//! small, cloneable, and free of any transport-specific detail.

use std::fmt;

/// Service identifier advertised by the pole robot. Scans filter on it.
pub const ROBOT_SERVICE_ID: &str = "C700604B-2757-49A0-B02A-6A8C061BBC1E";

/// Write key prefixed (little-endian) to every write payload in this
/// deployment.
pub const WRITE_KEY: u16 = 0xF032;

/// Power/availability state of the local radio adapter.
///
/// Only [`AdapterState::PoweredOn`] allows adapter operations to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Resetting,
    Unauthorized,
    Unsupported,
    Unknown,
}

impl AdapterState {
    /// Returns `true` if operations may start.
    pub fn is_ready(self) -> bool {
        matches!(self, AdapterState::PoweredOn)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterState::PoweredOn => "powered on",
            AdapterState::PoweredOff => "powered off",
            AdapterState::Resetting => "resetting",
            AdapterState::Unauthorized => "unauthorized",
            AdapterState::Unsupported => "unsupported",
            AdapterState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Stable identity of a discoverable peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

/// A peer as seen during discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub id: PeerId,
    /// Advertised name, when the peer provides one.
    pub name: Option<String>,
    /// Signal strength of the most recent sighting in dBm.
    pub rssi: Option<i16>,
}

impl PeerInfo {
    pub fn new(id: impl Into<PeerId>) -> Self {
        PeerInfo {
            id: id.into(),
            name: None,
            rssi: None,
        }
    }

    /// Name for display, falling back to a placeholder.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<Device Name Not Available>")
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId(s)
    }
}

/// Named control points on the robot.
///
/// [`ControlPointId::SignalStrength`] is a pseudo point: reads of it are
/// routed to the link's signal-strength query and never need a discovered
/// handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ControlPointId {
    Battery,
    Motor,
    RobotPosition,
    Latch,
    Launcher,
    SignalStrength,
}

impl ControlPointId {
    /// The five data control points discovered on every connection.
    pub const DATA_POINTS: [ControlPointId; 5] = [
        ControlPointId::RobotPosition,
        ControlPointId::Motor,
        ControlPointId::Latch,
        ControlPointId::Launcher,
        ControlPointId::Battery,
    ];

    /// Wire identifier of the control point.
    pub fn uuid(self) -> &'static str {
        match self {
            ControlPointId::Battery => "33DFD573-ABF9-4707-9E34-29E2011C231E",
            ControlPointId::Motor => "C82B4753-2D94-47DF-B2FF-09099F2B0E39",
            ControlPointId::RobotPosition => "AD123765-A421-4F80-BE1B-62DEEB854141",
            ControlPointId::Latch => "675CF627-6CC0-4810-AFDB-B6AA3F7183C5",
            ControlPointId::Launcher => "434D078D-7903-44D0-A3B5-7E87884B80ED",
            ControlPointId::SignalStrength => "F3148B6A-982B-4116-8B99-BDFB457DD3C8",
        }
    }

    /// Look up a control point by wire identifier (case-insensitive).
    pub fn from_uuid(uuid: &str) -> Option<Self> {
        [
            ControlPointId::Battery,
            ControlPointId::Motor,
            ControlPointId::RobotPosition,
            ControlPointId::Latch,
            ControlPointId::Launcher,
            ControlPointId::SignalStrength,
        ]
        .into_iter()
        .find(|id| id.uuid().eq_ignore_ascii_case(uuid))
    }

    pub fn is_pseudo(self) -> bool {
        matches!(self, ControlPointId::SignalStrength)
    }
}

impl fmt::Display for ControlPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlPointId::Battery => "battery voltage",
            ControlPointId::Motor => "motor control",
            ControlPointId::RobotPosition => "robot position",
            ControlPointId::Latch => "latch position",
            ControlPointId::Launcher => "launcher position",
            ControlPointId::SignalStrength => "signal strength",
        };
        f.write_str(s)
    }
}

/// Opaque handle the transport assigned to a discovered control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlPointHandle(pub u16);
