//! Device IO task: control-point discovery and the read/write pipelines.
//!
//! A [`DeviceSession`] is spawned for each successful connection. Its task
//! owns the [`Peripheral`] and holds two independent FIFOs, one for reads
//! and one for writes. Each FIFO has at most one operation outstanding at the
//! transport and its own deadline; there is no ordering between the two.
//!
//! ```text
//!   handle ──mpsc──▶ ┌──────────────┐ ──read/write──▶ Peripheral
//!                    │  DeviceTask  │
//!   oneshot ◀─────── └──────────────┘ ◀──events────── PeripheralEvent
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use polectl_core::error::{Error, Result};
use polectl_core::queue::CommandQueue;
use polectl_core::transport::{Peripheral, PeripheralEvent, PeripheralEventReceiver, PeripheralLink};
use polectl_core::types::{ControlPointHandle, ControlPointId};

use crate::timer::{wait_until, Deadline};

/// Timing configuration for the device IO task.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// A pending read of one control point.
#[derive(Debug)]
pub struct ReadOperation {
    pub id: ControlPointId,
    pub reply: oneshot::Sender<Result<Vec<u8>>>,
}

/// A pending write to one control point.
///
/// With `confirm` false the write completes as soon as the transport
/// accepts the bytes.
#[derive(Debug)]
pub struct WriteOperation {
    pub id: ControlPointId,
    pub payload: Vec<u8>,
    pub confirm: bool,
    pub reply: oneshot::Sender<Result<()>>,
}

enum Request {
    Read(ReadOperation),
    Write(WriteOperation),
}

/// Handle to a device IO task.
pub struct DeviceSession {
    tx: mpsc::UnboundedSender<Request>,
    discovered: watch::Receiver<Option<Vec<ControlPointId>>>,
    peripheral: Arc<dyn Peripheral>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DeviceSession {
    /// Spawn the IO task for a freshly connected peripheral. Control-point
    /// discovery is requested immediately.
    pub fn spawn(link: PeripheralLink, config: DeviceConfig) -> Self {
        let PeripheralLink { peripheral, events } = link;
        let (tx, rx) = mpsc::unbounded_channel();
        let (discovered_tx, discovered) = watch::channel(None);
        let cancel = CancellationToken::new();

        let task = DeviceTask {
            peripheral: peripheral.clone(),
            config,
            handles: HashMap::new(),
            reads: CommandQueue::new(),
            current_read: None,
            read_deadline: Deadline::default(),
            writes: CommandQueue::new(),
            current_write: None,
            write_deadline: Deadline::default(),
            link_closed: false,
            discovered_tx,
        };
        let task = tokio::spawn(task.run(rx, events, cancel.clone()));

        DeviceSession {
            tx,
            discovered,
            peripheral,
            cancel,
            task,
        }
    }

    /// Fail-fast checks made before an operation is queued. The task checks
    /// again when the operation reaches the head of its queue.
    fn precheck(&self, id: ControlPointId, writing: bool) -> Result<()> {
        if !self.peripheral.is_connected() {
            return Err(Error::NotConnected);
        }
        if id.is_pseudo() {
            return if writing {
                Err(Error::UnknownControlPoint(id))
            } else {
                Ok(())
            };
        }
        match &*self.discovered.borrow() {
            Some(ids) if ids.contains(&id) => Ok(()),
            _ => Err(Error::UnknownControlPoint(id)),
        }
    }

    pub fn submit_read(&self, op: ReadOperation) {
        if let Err(e) = self.precheck(op.id, false) {
            let _ = op.reply.send(Err(e));
            return;
        }
        if let Err(mpsc::error::SendError(Request::Read(op))) = self.tx.send(Request::Read(op)) {
            let _ = op.reply.send(Err(Error::NotConnected));
        }
    }

    pub fn submit_write(&self, op: WriteOperation) {
        if let Err(e) = self.precheck(op.id, true) {
            let _ = op.reply.send(Err(e));
            return;
        }
        if let Err(mpsc::error::SendError(Request::Write(op))) = self.tx.send(Request::Write(op))
        {
            let _ = op.reply.send(Err(Error::NotConnected));
        }
    }

    /// Read the raw record held by a control point.
    pub async fn read(&self, id: ControlPointId) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.submit_read(ReadOperation { id, reply });
        rx.await.unwrap_or(Err(Error::NotConnected))
    }

    /// Write a raw record to a control point.
    pub async fn write(&self, id: ControlPointId, payload: Vec<u8>, confirm: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit_write(WriteOperation {
            id,
            payload,
            confirm,
            reply,
        });
        rx.await.unwrap_or(Err(Error::NotConnected))
    }

    /// Wait until the peripheral has reported its control points.
    pub async fn wait_discovered(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.discovered.clone();
        let res = match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::DiscoveryTimeout),
        };
        res
    }

    /// Control points discovered so far.
    pub fn control_points(&self) -> Vec<ControlPointId> {
        self.discovered.borrow().clone().unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.peripheral.is_connected()
    }

    /// Signal the IO task to stop without waiting for it to exit.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.task.is_finished()
    }

    /// Stop the IO task. Callers still waiting see [`Error::NotConnected`].
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

struct DeviceTask {
    peripheral: Arc<dyn Peripheral>,
    config: DeviceConfig,
    handles: HashMap<ControlPointId, ControlPointHandle>,
    reads: CommandQueue<ReadOperation>,
    current_read: Option<ReadOperation>,
    read_deadline: Deadline,
    writes: CommandQueue<WriteOperation>,
    current_write: Option<WriteOperation>,
    write_deadline: Deadline,
    /// Set once the peripheral's event feed has closed.
    link_closed: bool,
    discovered_tx: watch::Sender<Option<Vec<ControlPointId>>>,
}

impl DeviceTask {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Request>,
        mut events: PeripheralEventReceiver,
        cancel: CancellationToken,
    ) {
        if let Err(e) = self
            .peripheral
            .discover_control_points(&ControlPointId::DATA_POINTS)
            .await
        {
            warn!(error = %e, "control-point discovery request failed");
        }

        loop {
            let read_at = self.read_deadline.at();
            let write_at = self.write_deadline.at();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("device IO task cancelled");
                    break;
                }

                req = rx.recv() => match req {
                    Some(Request::Read(op)) => {
                        self.reads.enqueue(op);
                        self.start_next_read().await;
                    }
                    Some(Request::Write(op)) => {
                        self.writes.enqueue(op);
                        self.start_next_write().await;
                    }
                    None => break,
                },

                event = events.recv(), if !self.link_closed => match event {
                    Some(event) => self.handle_event(event).await,
                    None => self.close_link(),
                },

                _ = wait_until(read_at) => {
                    self.read_deadline.clear();
                    if let Some(op) = self.current_read.take() {
                        warn!(id = %op.id, "read timed out");
                        let _ = op.reply.send(Err(Error::ReadTimeout));
                    }
                    self.start_next_read().await;
                }

                _ = wait_until(write_at) => {
                    self.write_deadline.clear();
                    if let Some(op) = self.current_write.take() {
                        warn!(id = %op.id, "write timed out");
                        let _ = op.reply.send(Err(Error::WriteTimeout));
                    }
                    self.start_next_write().await;
                }
            }
        }
    }

    /// Resolve the handle for `id`, or `None` for the pseudo point.
    fn precheck(&self, id: ControlPointId, writing: bool) -> Result<Option<ControlPointHandle>> {
        if self.link_closed || !self.peripheral.is_connected() {
            return Err(Error::NotConnected);
        }
        if id.is_pseudo() && !writing {
            return Ok(None);
        }
        self.handles
            .get(&id)
            .copied()
            .map(Some)
            .ok_or(Error::UnknownControlPoint(id))
    }

    async fn start_next_read(&mut self) {
        while self.current_read.is_none() {
            let Some(op) = self.reads.dequeue() else {
                return;
            };
            let requested = match self.precheck(op.id, false) {
                Ok(Some(handle)) => self.peripheral.read(handle).await,
                Ok(None) => self.peripheral.read_rssi().await,
                Err(e) => Err(e),
            };
            match requested {
                Ok(()) => {
                    trace!(id = %op.id, "read started");
                    self.read_deadline.arm(self.config.read_timeout);
                    self.current_read = Some(op);
                }
                Err(e) => {
                    debug!(id = %op.id, error = %e, "read failed to start");
                    let _ = op.reply.send(Err(e));
                }
            }
        }
    }

    async fn start_next_write(&mut self) {
        while self.current_write.is_none() {
            let Some(op) = self.writes.dequeue() else {
                return;
            };
            let requested = match self.precheck(op.id, true) {
                Ok(Some(handle)) => self.peripheral.write(handle, &op.payload, op.confirm).await,
                Ok(None) => Err(Error::UnknownControlPoint(op.id)),
                Err(e) => Err(e),
            };
            match requested {
                Ok(()) if op.confirm => {
                    trace!(id = %op.id, len = op.payload.len(), "write started");
                    self.write_deadline.arm(self.config.write_timeout);
                    self.current_write = Some(op);
                }
                Ok(()) => {
                    trace!(id = %op.id, len = op.payload.len(), "unconfirmed write sent");
                    let _ = op.reply.send(Ok(()));
                }
                Err(e) => {
                    debug!(id = %op.id, error = %e, "write failed to start");
                    let _ = op.reply.send(Err(e));
                }
            }
        }
    }

    async fn handle_event(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::ControlPointsDiscovered(found) => {
                info!(count = found.len(), "control points discovered");
                self.handles.extend(found);
                let mut ids: Vec<ControlPointId> = self.handles.keys().copied().collect();
                ids.sort();
                self.discovered_tx.send_replace(Some(ids));
            }

            PeripheralEvent::ValueUpdated { id, value } => {
                if !matches!(&self.current_read, Some(op) if op.id == id) {
                    trace!(%id, "discarding unsolicited value update");
                    return;
                }
                let result = match value {
                    Ok(Some(bytes)) => Ok(bytes),
                    Ok(None) => Err(Error::NoData),
                    Err(e) => Err(e),
                };
                self.finish_read(result).await;
            }

            PeripheralEvent::SignalStrengthRead(reading) => {
                if !matches!(&self.current_read, Some(op) if op.id.is_pseudo()) {
                    trace!("discarding unsolicited signal-strength reading");
                    return;
                }
                let result = reading.map(|dbm| dbm.to_le_bytes().to_vec());
                self.finish_read(result).await;
            }

            PeripheralEvent::WriteCompleted { id, result } => {
                if !matches!(&self.current_write, Some(op) if op.id == id) {
                    trace!(%id, "discarding unexpected write acknowledgement");
                    return;
                }
                self.write_deadline.clear();
                if let Some(op) = self.current_write.take() {
                    let _ = op.reply.send(result);
                }
                self.start_next_write().await;
            }
        }
    }

    async fn finish_read(&mut self, result: Result<Vec<u8>>) {
        self.read_deadline.clear();
        if let Some(op) = self.current_read.take() {
            let _ = op.reply.send(result);
        }
        self.start_next_read().await;
    }

    /// The peripheral's event feed closed: nothing can complete any more.
    fn close_link(&mut self) {
        warn!("peripheral event feed closed");
        self.link_closed = true;
        self.read_deadline.clear();
        self.write_deadline.clear();
        for op in self.current_read.take().into_iter().chain(self.reads.drain()) {
            let _ = op.reply.send(Err(Error::NotConnected));
        }
        for op in self.current_write.take().into_iter().chain(self.writes.drain()) {
            let _ = op.reply.send(Err(Error::NotConnected));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polectl_test_harness::{MockPeripheral, PeripheralCall};

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn connected() -> (Arc<MockPeripheral>, DeviceSession) {
        let (mock, link) = MockPeripheral::new();
        let session = DeviceSession::spawn(link, DeviceConfig::default());
        session
            .wait_discovered(Duration::from_secs(1))
            .await
            .unwrap();
        (mock, session)
    }

    fn handle(id: ControlPointId) -> ControlPointHandle {
        MockPeripheral::handle_for(id)
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_requested_on_spawn() {
        let (mock, session) = connected().await;
        assert_eq!(
            mock.calls()[0],
            PeripheralCall::DiscoverControlPoints(ControlPointId::DATA_POINTS.to_vec())
        );
        let mut expected = ControlPointId::DATA_POINTS.to_vec();
        expected.sort();
        assert_eq!(session.control_points(), expected);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn wait_discovered_times_out() {
        let (mock, link) = MockPeripheral::new();
        mock.set_auto_discover(false);
        let session = DeviceSession::spawn(link, DeviceConfig::default());
        let result = session.wait_discovered(Duration::from_secs(2)).await;
        assert_eq!(result.unwrap_err(), Error::DiscoveryTimeout);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn read_resolves_with_payload() {
        let (mock, session) = connected().await;

        let (reply, rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::Latch,
            reply,
        });
        settle().await;
        assert_eq!(
            mock.calls().last(),
            Some(&PeripheralCall::Read(handle(ControlPointId::Latch)))
        );

        mock.push(PeripheralEvent::ValueUpdated {
            id: ControlPointId::Latch,
            value: Ok(Some(vec![0, 0, 75])),
        });
        assert_eq!(rx.await.unwrap().unwrap(), vec![0, 0, 75]);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn read_empty_value_is_no_data() {
        let (mock, session) = connected().await;
        let (reply, rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::Battery,
            reply,
        });
        settle().await;
        mock.push(PeripheralEvent::ValueUpdated {
            id: ControlPointId::Battery,
            value: Ok(None),
        });
        assert_eq!(rx.await.unwrap().unwrap_err(), Error::NoData);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn read_transport_error_is_propagated() {
        let (mock, session) = connected().await;
        let (reply, rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::Battery,
            reply,
        });
        settle().await;
        mock.push(PeripheralEvent::ValueUpdated {
            id: ControlPointId::Battery,
            value: Err(Error::Transport("attribute not readable".into())),
        });
        assert_eq!(
            rx.await.unwrap().unwrap_err(),
            Error::Transport("attribute not readable".into())
        );
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn undiscovered_control_point_fails_fast() {
        let (mock, link) = MockPeripheral::new();
        mock.set_auto_discover(false);
        let session = DeviceSession::spawn(link, DeviceConfig::default());

        let result = session.read(ControlPointId::Motor).await;
        assert_eq!(
            result.unwrap_err(),
            Error::UnknownControlPoint(ControlPointId::Motor)
        );
        settle().await;
        assert!(!mock
            .calls()
            .iter()
            .any(|c| matches!(c, PeripheralCall::Read(_))));
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_link_fails_fast() {
        let (mock, session) = connected().await;
        mock.set_connected(false);
        assert_eq!(
            session.read(ControlPointId::Battery).await.unwrap_err(),
            Error::NotConnected
        );
        assert_eq!(
            session
                .write(ControlPointId::Latch, vec![0x32, 0xF0, 75], true)
                .await
                .unwrap_err(),
            Error::NotConnected
        );
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reads_are_serialized_in_fifo_order() {
        let (mock, session) = connected().await;

        let (first_reply, first_rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::Battery,
            reply: first_reply,
        });
        let (second_reply, second_rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::RobotPosition,
            reply: second_reply,
        });
        settle().await;

        let reads = |calls: Vec<PeripheralCall>| {
            calls
                .into_iter()
                .filter(|c| matches!(c, PeripheralCall::Read(_)))
                .count()
        };
        assert_eq!(reads(mock.calls()), 1);

        mock.push(PeripheralEvent::ValueUpdated {
            id: ControlPointId::Battery,
            value: Ok(Some(vec![0xFF, 0x03])),
        });
        assert_eq!(first_rx.await.unwrap().unwrap(), vec![0xFF, 0x03]);
        settle().await;
        assert_eq!(reads(mock.calls()), 2);
        assert_eq!(
            mock.calls().last(),
            Some(&PeripheralCall::Read(handle(ControlPointId::RobotPosition)))
        );

        mock.push(PeripheralEvent::ValueUpdated {
            id: ControlPointId::RobotPosition,
            value: Ok(Some(vec![1, 0, 0])),
        });
        assert_eq!(second_rx.await.unwrap().unwrap(), vec![1, 0, 0]);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unsolicited_updates_are_discarded() {
        let (mock, session) = connected().await;

        // Nothing outstanding.
        mock.push(PeripheralEvent::ValueUpdated {
            id: ControlPointId::Motor,
            value: Ok(Some(vec![1, 2, 3, 4, 5])),
        });

        let (reply, mut rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::Latch,
            reply,
        });
        settle().await;

        // Different control point than the outstanding read.
        mock.push(PeripheralEvent::ValueUpdated {
            id: ControlPointId::Launcher,
            value: Ok(Some(vec![0, 0, 10])),
        });
        settle().await;
        assert!(rx.try_recv().is_err());

        mock.push(PeripheralEvent::ValueUpdated {
            id: ControlPointId::Latch,
            value: Ok(Some(vec![0, 0, 20])),
        });
        assert_eq!(rx.await.unwrap().unwrap(), vec![0, 0, 20]);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn read_timeout_advances_queue() {
        let (mock, session) = connected().await;

        let (first_reply, first_rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::Battery,
            reply: first_reply,
        });
        let (second_reply, second_rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::Latch,
            reply: second_reply,
        });

        let start = tokio::time::Instant::now();
        assert_eq!(first_rx.await.unwrap().unwrap_err(), Error::ReadTimeout);
        assert!(start.elapsed() >= Duration::from_secs(5));

        settle().await;
        assert_eq!(
            mock.calls().last(),
            Some(&PeripheralCall::Read(handle(ControlPointId::Latch)))
        );
        mock.push(PeripheralEvent::ValueUpdated {
            id: ControlPointId::Latch,
            value: Ok(Some(vec![0, 0, 1])),
        });
        assert_eq!(second_rx.await.unwrap().unwrap(), vec![0, 0, 1]);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn read_and_write_queues_are_independent() {
        let (mock, session) = connected().await;

        let (read_reply, _read_rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::Battery,
            reply: read_reply,
        });
        let (write_reply, write_rx) = oneshot::channel();
        session.submit_write(WriteOperation {
            id: ControlPointId::Latch,
            payload: vec![0x32, 0xF0, 75],
            confirm: true,
            reply: write_reply,
        });
        settle().await;

        let calls = mock.calls();
        assert!(calls.contains(&PeripheralCall::Read(handle(ControlPointId::Battery))));
        assert!(calls.contains(&PeripheralCall::Write {
            handle: handle(ControlPointId::Latch),
            data: vec![0x32, 0xF0, 75],
            with_response: true,
        }));

        mock.push(PeripheralEvent::WriteCompleted {
            id: ControlPointId::Latch,
            result: Ok(()),
        });
        assert!(write_rx.await.unwrap().is_ok());
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_writes_complete_immediately() {
        let (mock, session) = connected().await;

        session
            .write(ControlPointId::Launcher, vec![0x32, 0xF0, 10], false)
            .await
            .unwrap();
        session
            .write(ControlPointId::Launcher, vec![0x32, 0xF0, 20], false)
            .await
            .unwrap();

        let writes: Vec<_> = mock
            .calls()
            .into_iter()
            .filter(|c| matches!(c, PeripheralCall::Write { .. }))
            .collect();
        assert_eq!(writes.len(), 2);
        assert!(writes
            .iter()
            .all(|c| matches!(c, PeripheralCall::Write { with_response: false, .. })));
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_write_times_out_then_advances() {
        let (mock, session) = connected().await;

        let (first_reply, first_rx) = oneshot::channel();
        session.submit_write(WriteOperation {
            id: ControlPointId::Motor,
            payload: vec![0x32, 0xF0, 0x90, 0x00, 0x01],
            confirm: true,
            reply: first_reply,
        });
        let (second_reply, second_rx) = oneshot::channel();
        session.submit_write(WriteOperation {
            id: ControlPointId::Motor,
            payload: vec![0x32, 0xF0, 0x00, 0x00, 0x00],
            confirm: true,
            reply: second_reply,
        });

        assert_eq!(first_rx.await.unwrap().unwrap_err(), Error::WriteTimeout);
        settle().await;

        // A late acknowledgement for a different control point is ignored.
        mock.push(PeripheralEvent::WriteCompleted {
            id: ControlPointId::Latch,
            result: Ok(()),
        });
        mock.push(PeripheralEvent::WriteCompleted {
            id: ControlPointId::Motor,
            result: Err(Error::Transport("write rejected".into())),
        });
        assert_eq!(
            second_rx.await.unwrap().unwrap_err(),
            Error::Transport("write rejected".into())
        );
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn signal_strength_read_uses_rssi_query() {
        let (mock, session) = connected().await;

        let (reply, rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::SignalStrength,
            reply,
        });
        settle().await;
        assert_eq!(mock.calls().last(), Some(&PeripheralCall::ReadRssi));

        mock.push(PeripheralEvent::SignalStrengthRead(Ok(-67)));
        assert_eq!(rx.await.unwrap().unwrap(), (-67i16).to_le_bytes().to_vec());
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn signal_strength_is_not_writable() {
        let (_mock, session) = connected().await;
        let result = session
            .write(ControlPointId::SignalStrength, vec![0, 0], false)
            .await;
        assert_eq!(
            result.unwrap_err(),
            Error::UnknownControlPoint(ControlPointId::SignalStrength)
        );
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_time_recheck_fails_queued_read() {
        let (mock, session) = connected().await;

        let (first_reply, first_rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::Battery,
            reply: first_reply,
        });
        let (second_reply, second_rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::Latch,
            reply: second_reply,
        });
        settle().await;

        mock.set_connected(false);
        mock.push(PeripheralEvent::ValueUpdated {
            id: ControlPointId::Battery,
            value: Ok(Some(vec![0, 2])),
        });
        assert!(first_rx.await.unwrap().is_ok());
        assert_eq!(second_rx.await.unwrap().unwrap_err(), Error::NotConnected);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn closed_event_feed_fails_pending_operations() {
        let (mock, session) = connected().await;

        let (reply, rx) = oneshot::channel();
        session.submit_read(ReadOperation {
            id: ControlPointId::Battery,
            reply,
        });
        settle().await;
        mock.close();
        assert_eq!(rx.await.unwrap().unwrap_err(), Error::NotConnected);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_resolves_waiting_callers() {
        let (_mock, session) = connected().await;
        let session = Arc::new(session);

        let reader = {
            let session = session.clone();
            tokio::spawn(async move { session.read(ControlPointId::Battery).await })
        };
        settle().await;

        session.close();
        assert_eq!(reader.await.unwrap().unwrap_err(), Error::NotConnected);
        assert!(session.is_closed());

        // Requests after close never reach a transport.
        settle().await;
        assert_eq!(
            session.read(ControlPointId::Battery).await.unwrap_err(),
            Error::NotConnected
        );
    }
}
