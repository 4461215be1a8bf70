//! Scripted [`Peripheral`] for deterministic device-session tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use polectl_core::error::{Error, Result};
use polectl_core::transport::{Peripheral, PeripheralEvent, PeripheralEventSender, PeripheralLink};
use polectl_core::types::{ControlPointHandle, ControlPointId};

/// One request made through the [`Peripheral`] trait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralCall {
    DiscoverControlPoints(Vec<ControlPointId>),
    Read(ControlPointHandle),
    Write {
        handle: ControlPointHandle,
        data: Vec<u8>,
        with_response: bool,
    },
    ReadRssi,
}

/// A mock [`Peripheral`] that records requests and emits only pushed
/// events, except for discovery.
///
/// With auto-discovery on (the default) a discovery request is answered
/// at once with handles from [`MockPeripheral::handle_for`].
pub struct MockPeripheral {
    events: Mutex<Option<PeripheralEventSender>>,
    calls: Mutex<Vec<PeripheralCall>>,
    connected: AtomicBool,
    auto_discover: AtomicBool,
    reject: AtomicBool,
}

impl MockPeripheral {
    /// Create a connected mock and the link to hand to a device session.
    pub fn new() -> (Arc<Self>, PeripheralLink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mock = Arc::new(MockPeripheral {
            events: Mutex::new(Some(tx)),
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            auto_discover: AtomicBool::new(true),
            reject: AtomicBool::new(false),
        });
        let link = PeripheralLink {
            peripheral: mock.clone(),
            events: rx,
        };
        (mock, link)
    }

    /// Handle the mock assigns to a control point during discovery.
    pub fn handle_for(id: ControlPointId) -> ControlPointHandle {
        let index = ControlPointId::DATA_POINTS
            .iter()
            .position(|p| *p == id)
            .map_or(0, |i| i + 1);
        ControlPointHandle(index as u16)
    }

    /// Emit an event. Ignored once the feed is closed.
    pub fn push(&self, event: PeripheralEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Close the event feed, as a dropped link would.
    pub fn close(&self) {
        self.events.lock().unwrap().take();
    }

    /// Every request made so far, in order.
    pub fn calls(&self) -> Vec<PeripheralCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_auto_discover(&self, on: bool) {
        self.auto_discover.store(on, Ordering::SeqCst);
    }

    /// Make read and write requests fail with [`Error::Transport`].
    pub fn reject_requests(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    fn record(&self, call: PeripheralCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.reject.load(Ordering::SeqCst) {
            return Err(Error::Transport("request rejected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Peripheral for MockPeripheral {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn discover_control_points(&self, ids: &[ControlPointId]) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(PeripheralCall::DiscoverControlPoints(ids.to_vec()));
        if self.auto_discover.load(Ordering::SeqCst) {
            let found = ids.iter().map(|id| (*id, Self::handle_for(*id))).collect();
            self.push(PeripheralEvent::ControlPointsDiscovered(found));
        }
        Ok(())
    }

    async fn read(&self, handle: ControlPointHandle) -> Result<()> {
        self.record(PeripheralCall::Read(handle))
    }

    async fn write(
        &self,
        handle: ControlPointHandle,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        self.record(PeripheralCall::Write {
            handle,
            data: data.to_vec(),
            with_response,
        })
    }

    async fn read_rssi(&self) -> Result<()> {
        self.record(PeripheralCall::ReadRssi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_answers_with_stable_handles() {
        let (mock, mut link) = MockPeripheral::new();
        mock.discover_control_points(&ControlPointId::DATA_POINTS)
            .await
            .unwrap();
        match link.events.try_recv().unwrap() {
            PeripheralEvent::ControlPointsDiscovered(found) => {
                assert_eq!(found.len(), 5);
                for (id, handle) in found {
                    assert_eq!(handle, MockPeripheral::handle_for(id));
                }
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn discovery_can_be_withheld() {
        let (mock, mut link) = MockPeripheral::new();
        mock.set_auto_discover(false);
        mock.discover_control_points(&[ControlPointId::Battery])
            .await
            .unwrap();
        assert!(link.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_ends_the_feed() {
        let (mock, mut link) = MockPeripheral::new();
        mock.close();
        mock.push(PeripheralEvent::SignalStrengthRead(Ok(-50)));
        assert!(link.events.recv().await.is_none());
    }

    #[test]
    fn handles_are_distinct() {
        let mut handles: Vec<_> = ControlPointId::DATA_POINTS
            .iter()
            .map(|id| MockPeripheral::handle_for(*id))
            .collect();
        handles.sort_by_key(|h| h.0);
        handles.dedup();
        assert_eq!(handles.len(), 5);
        assert_eq!(
            MockPeripheral::handle_for(ControlPointId::SignalStrength),
            ControlPointHandle(0)
        );
    }
}
