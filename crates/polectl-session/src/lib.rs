//! Session IO tasks for the pole robot link.
//!
//! Each session is one tokio task that owns its transport exclusively and
//! serializes operations through a [`CommandQueue`](polectl_core::queue::CommandQueue)
//! with at most one operation outstanding per queue.
//!
//! # Architecture
//!
//! - [`adapter`]: readiness gating plus discover/connect/disconnect
//! - [`device`]: control-point discovery plus the read and write pipelines

pub mod adapter;
pub mod device;
mod timer;

pub use adapter::{AdapterConfig, AdapterOperation, AdapterSession, ConnectedPeer};
pub use device::{DeviceConfig, DeviceSession, ReadOperation, WriteOperation};
