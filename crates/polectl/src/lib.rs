//! # polectl -- remote control for the pole-mounted winch and launcher robot
//!
//! `polectl` drives a robot that climbs a pole on a motorised winch and
//! carries a latch and launcher servo. The robot exposes a handful of named
//! control points over a low-power wireless link, each holding a
//! fixed-width binary record.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::time::Duration;
//! use polectl::ControllerBuilder;
//! use polectl_test_harness::{SimConfig, SimulatedAdapter};
//!
//! #[tokio::main]
//! async fn main() -> polectl::Result<()> {
//!     let (adapter, events) = SimulatedAdapter::new(SimConfig::default());
//!     let controller = ControllerBuilder::new().build(adapter, events);
//!
//!     let peers = controller.scan().await?;
//!     let Some(peer) = peers.first() else { return Ok(()) };
//!     let robot = controller.connect(peer.id.clone()).await?;
//!
//!     println!("battery: {:.2} V", robot.battery().await?.volts());
//!     robot.start_motor_up().await?;
//!     tokio::time::sleep(Duration::from_secs(2)).await;
//!     robot.stop_motor().await?;
//!
//!     controller.disconnect().await?;
//!     controller.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                  | Purpose                                              |
//! |------------------------|------------------------------------------------------|
//! | `polectl-core`         | Transport traits, shared types, errors, command queue |
//! | `polectl-records`      | Control-point record encode/decode                   |
//! | `polectl-session`      | Adapter and device IO tasks                          |
//! | `polectl-test-harness` | Scripted mocks and a simulated robot                 |
//! | **`polectl`**          | This facade: controller, robot operations, routines  |
//!
//! Every adapter operation (discover, connect, disconnect) runs through one
//! queue with at most one operation outstanding. Each connected robot gets
//! a device session with independent read and write queues. All waits are
//! bounded by timeouts, and every failure resolves exactly the operation it
//! belongs to.

pub mod controller;
pub mod robot;
pub mod routines;

pub use controller::{ControllerBuilder, RobotController};
pub use robot::{DeviceFacade, FacadeConfig};
pub use routines::{StatusPoller, StatusSnapshot};

pub use polectl_core::{
    AdapterState, ControlPointId, Error, PeerId, PeerInfo, Result, SessionEvent, ROBOT_SERVICE_ID,
    WRITE_KEY,
};
pub use polectl_records::{
    Battery, MotorControl, MotorDirection, MotorFormat, RobotPosition, ServoPosition,
    SignalStrength,
};
pub use polectl_session::{AdapterConfig, DeviceConfig};
