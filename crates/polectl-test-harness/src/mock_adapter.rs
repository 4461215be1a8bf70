//! Scripted [`Adapter`] for deterministic session tests.
//!
//! ```
//! use polectl_core::transport::AdapterEvent;
//! use polectl_core::types::AdapterState;
//! use polectl_test_harness::MockAdapter;
//!
//! let (mock, mut events) = MockAdapter::new(AdapterState::PoweredOff);
//! mock.set_state(AdapterState::PoweredOn);
//! assert_eq!(
//!     events.try_recv().unwrap(),
//!     AdapterEvent::StateChanged(AdapterState::PoweredOn)
//! );
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use polectl_core::error::{Error, Result};
use polectl_core::transport::{
    Adapter, AdapterEvent, AdapterEventReceiver, AdapterEventSender, PeripheralLink,
};
use polectl_core::types::{AdapterState, PeerId};

/// One request made through the [`Adapter`] trait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    StartScan {
        services: Vec<String>,
        allow_duplicates: bool,
    },
    StopScan,
    Connect(PeerId),
    CancelConnection(PeerId),
    OpenLink(PeerId),
}

/// A mock [`Adapter`] that records requests and emits only pushed events.
///
/// Request methods succeed unless [`reject_requests`](Self::reject_requests)
/// is on. [`open_link`](Adapter::open_link) hands out links registered with
/// [`register_link`](Self::register_link), each at most once.
pub struct MockAdapter {
    state: Mutex<AdapterState>,
    events: AdapterEventSender,
    calls: Mutex<Vec<AdapterCall>>,
    links: Mutex<HashMap<PeerId, PeripheralLink>>,
    reject: AtomicBool,
}

impl MockAdapter {
    /// Create a mock in `state`, returning the event feed to hand to the
    /// session.
    pub fn new(state: AdapterState) -> (Arc<Self>, AdapterEventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let mock = MockAdapter {
            state: Mutex::new(state),
            events,
            calls: Mutex::new(Vec::new()),
            links: Mutex::new(HashMap::new()),
            reject: AtomicBool::new(false),
        };
        (Arc::new(mock), rx)
    }

    /// Emit an event. A [`AdapterEvent::StateChanged`] also updates the
    /// state reported by [`Adapter::state`].
    pub fn push(&self, event: AdapterEvent) {
        if let AdapterEvent::StateChanged(state) = &event {
            *self.state.lock().unwrap() = *state;
        }
        let _ = self.events.send(event);
    }

    /// Change state and emit the matching event.
    pub fn set_state(&self, state: AdapterState) {
        self.push(AdapterEvent::StateChanged(state));
    }

    /// Every request made so far, in order.
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Provide the link returned when `peer` is opened.
    pub fn register_link(&self, peer: impl Into<PeerId>, link: PeripheralLink) {
        self.links.lock().unwrap().insert(peer.into(), link);
    }

    /// Make scan and connection requests fail with [`Error::Transport`].
    pub fn reject_requests(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    fn record(&self, call: AdapterCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.reject.load(Ordering::SeqCst) {
            return Err(Error::Transport("request rejected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn state(&self) -> AdapterState {
        *self.state.lock().unwrap()
    }

    async fn start_scan(&self, services: &[String], allow_duplicates: bool) -> Result<()> {
        self.record(AdapterCall::StartScan {
            services: services.to_vec(),
            allow_duplicates,
        })
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(AdapterCall::StopScan)
    }

    async fn connect(&self, peer: &PeerId) -> Result<()> {
        self.record(AdapterCall::Connect(peer.clone()))
    }

    async fn cancel_connection(&self, peer: &PeerId) -> Result<()> {
        self.record(AdapterCall::CancelConnection(peer.clone()))
    }

    async fn open_link(&self, peer: &PeerId) -> Result<PeripheralLink> {
        self.calls
            .lock()
            .unwrap()
            .push(AdapterCall::OpenLink(peer.clone()));
        self.links
            .lock()
            .unwrap()
            .remove(peer)
            .ok_or_else(|| Error::Transport(format!("no link registered for {peer}")))
    }
}
