//! polectl-core: Core traits, types, and error definitions for polectl.
//!
//! This crate defines the transport-agnostic abstractions shared by the
//! session IO tasks, the record codec, and the controller facade.
//!
//! # Key types
//!
//! - [`Adapter`] / [`Peripheral`] -- the radio transport collaborator
//! - [`CommandQueue`] -- FIFO of pending operations
//! - [`SessionEvent`] -- connection-state notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod queue;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::SessionEvent;
pub use queue::CommandQueue;
pub use transport::{
    Adapter, AdapterEvent, AdapterEventReceiver, AdapterEventSender, Peripheral, PeripheralEvent,
    PeripheralEventReceiver, PeripheralEventSender, PeripheralLink,
};
pub use types::*;
