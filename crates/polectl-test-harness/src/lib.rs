//! polectl-test-harness: mock transports and a simulated robot for polectl.
//!
//! [`MockAdapter`] and [`MockPeripheral`] are scripted: they record every
//! request and only emit the events a test pushes, which makes queue and
//! timeout behavior fully deterministic under a paused tokio clock.
//!
//! [`SimulatedAdapter`] and [`SimulatedRobot`] respond on their own after a
//! configurable latency, modelling the robot firmware closely enough to run
//! the controller end to end without a radio.

pub mod mock_adapter;
pub mod mock_peripheral;
pub mod sim;

pub use mock_adapter::{AdapterCall, MockAdapter};
pub use mock_peripheral::{MockPeripheral, PeripheralCall};
pub use sim::{SimConfig, SimulatedAdapter, SimulatedRobot};
