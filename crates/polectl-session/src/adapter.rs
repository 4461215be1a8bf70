//! Adapter IO task: readiness gating and the adapter command queue.
//!
//! One tokio task owns the [`Adapter`] exclusively and serializes every
//! adapter-level operation (discover, connect, disconnect) through a single
//! [`CommandQueue`]. At most one operation runs at a time. Each running
//! operation is bounded by its own deadline, and every completion (success,
//! failure, or timeout) starts the next queued operation.
//!
//! Operations submitted while the adapter is not powered on stay queued
//! behind a readiness deadline. If the adapter powers on first the queue
//! starts; if the deadline expires first every queued operation fails with
//! [`Error::PowerOnTimeout`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use polectl_core::error::{Error, Result};
use polectl_core::events::SessionEvent;
use polectl_core::queue::CommandQueue;
use polectl_core::transport::{Adapter, AdapterEvent, AdapterEventReceiver, PeripheralLink};
use polectl_core::types::{AdapterState, PeerId, PeerInfo};

use crate::timer::{wait_until, Deadline};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Timing configuration for the adapter IO task.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// How long queued operations wait for the adapter to power on.
    pub power_on_timeout: Duration,
    /// Length of the discovery scan window.
    pub scan_duration: Duration,
    /// Deadline for a connect to complete.
    pub connect_timeout: Duration,
    /// Deadline for a disconnect to be acknowledged.
    pub disconnect_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            power_on_timeout: Duration::from_secs(10),
            scan_duration: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

/// A successful connection: the peer and its open data link.
#[derive(Debug)]
pub struct ConnectedPeer {
    pub info: PeerInfo,
    pub link: PeripheralLink,
}

/// An adapter-level operation together with the channel its outcome is
/// delivered on.
///
/// Each operation is consumed exactly once by the IO task. Its reply is sent
/// at most once; a flush drops the reply without sending.
pub enum AdapterOperation {
    /// Scan for peers advertising any of `services` for the scan window.
    Discover {
        services: Vec<String>,
        reply: oneshot::Sender<Result<Vec<PeerInfo>>>,
    },
    /// Connect to `peer` and open its data link.
    Connect {
        peer: PeerId,
        reply: oneshot::Sender<Result<ConnectedPeer>>,
    },
    /// Disconnect from `peer`.
    Disconnect {
        peer: PeerId,
        reply: oneshot::Sender<Result<PeerId>>,
    },
}

impl AdapterOperation {
    fn kind(&self) -> &'static str {
        match self {
            AdapterOperation::Discover { .. } => "discover",
            AdapterOperation::Connect { .. } => "connect",
            AdapterOperation::Disconnect { .. } => "disconnect",
        }
    }

    /// Resolve the operation with an error.
    fn fail(self, err: Error) {
        debug!(op = self.kind(), error = %err, "adapter operation failed");
        match self {
            AdapterOperation::Discover { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            AdapterOperation::Connect { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            AdapterOperation::Disconnect { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

impl std::fmt::Debug for AdapterOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterOperation::Discover { services, .. } => {
                f.debug_struct("Discover").field("services", services).finish()
            }
            AdapterOperation::Connect { peer, .. } => {
                f.debug_struct("Connect").field("peer", peer).finish()
            }
            AdapterOperation::Disconnect { peer, .. } => {
                f.debug_struct("Disconnect").field("peer", peer).finish()
            }
        }
    }
}

/// A request sent from the handle to the IO task.
enum Request {
    Submit(AdapterOperation),
    Flush,
}

/// Handle to the adapter IO task.
///
/// Submitting never blocks; outcomes arrive on each operation's reply
/// channel. Dropping the handle does not stop the task; call
/// [`shutdown`](AdapterSession::shutdown).
pub struct AdapterSession {
    tx: mpsc::UnboundedSender<Request>,
    event_tx: broadcast::Sender<SessionEvent>,
    state_rx: watch::Receiver<AdapterState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl AdapterSession {
    /// Spawn the adapter IO task.
    ///
    /// The task owns `adapter` and consumes `events`, the feed the adapter
    /// implementation pushes into. Session events are broadcast on
    /// `event_tx`.
    pub fn spawn(
        adapter: Arc<dyn Adapter>,
        events: AdapterEventReceiver,
        config: AdapterConfig,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let initial = adapter.state();
        let (state_tx, state_rx) = watch::channel(initial);
        let cancel = CancellationToken::new();

        let task = AdapterTask {
            adapter,
            config,
            queue: CommandQueue::new(),
            current: None,
            state: initial,
            discovered: Vec::new(),
            known: HashMap::new(),
            power_on: Deadline::default(),
            scan: Deadline::default(),
            command: Deadline::default(),
            event_tx: event_tx.clone(),
            state_tx,
        };
        let task = tokio::spawn(task.run(rx, events, cancel.clone()));

        AdapterSession {
            tx,
            event_tx,
            state_rx,
            cancel,
            task,
        }
    }

    /// Queue an operation. Never blocks.
    ///
    /// If the IO task has stopped the operation is resolved immediately
    /// with [`Error::Cancelled`].
    pub fn submit(&self, op: AdapterOperation) {
        if let Err(mpsc::error::SendError(Request::Submit(op))) = self.tx.send(Request::Submit(op))
        {
            op.fail(Error::Cancelled);
        }
    }

    /// Scan for peers advertising any of `services`.
    pub async fn discover(&self, services: Vec<String>) -> Result<Vec<PeerInfo>> {
        let (reply, rx) = oneshot::channel();
        self.submit(AdapterOperation::Discover { services, reply });
        rx.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Connect to `peer` and open its data link.
    pub async fn connect(&self, peer: PeerId) -> Result<ConnectedPeer> {
        let (reply, rx) = oneshot::channel();
        self.submit(AdapterOperation::Connect { peer, reply });
        rx.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Disconnect from `peer`.
    pub async fn disconnect(&self, peer: PeerId) -> Result<PeerId> {
        let (reply, rx) = oneshot::channel();
        self.submit(AdapterOperation::Disconnect { peer, reply });
        rx.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Cancel all timers and drop every queued and running operation
    /// without replying. Callers awaiting them see [`Error::Cancelled`].
    pub fn flush(&self) {
        let _ = self.tx.send(Request::Flush);
    }

    /// The last adapter state seen by the IO task.
    pub fn state(&self) -> AdapterState {
        *self.state_rx.borrow()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the IO task. Pending operations are dropped.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

// ---------------------------------------------------------------------------
// IO task
// ---------------------------------------------------------------------------

struct AdapterTask {
    adapter: Arc<dyn Adapter>,
    config: AdapterConfig,
    queue: CommandQueue<AdapterOperation>,
    current: Option<AdapterOperation>,
    state: AdapterState,
    /// Results of the running scan, deduplicated by peer id.
    discovered: Vec<PeerInfo>,
    /// Every peer seen by any scan, for naming connected peers.
    known: HashMap<PeerId, PeerInfo>,
    power_on: Deadline,
    scan: Deadline,
    command: Deadline,
    event_tx: broadcast::Sender<SessionEvent>,
    state_tx: watch::Sender<AdapterState>,
}

impl AdapterTask {
    /// The main loop.
    ///
    /// Priority: cancellation, then handle requests, then transport events,
    /// then deadlines.
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Request>,
        mut events: AdapterEventReceiver,
        cancel: CancellationToken,
    ) {
        let mut events_open = true;

        loop {
            let power_on_at = self.power_on.at();
            let scan_at = self.scan.at();
            let command_at = self.command.at();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("adapter IO task cancelled");
                    break;
                }

                req = rx.recv() => match req {
                    Some(Request::Submit(op)) => self.submit(op).await,
                    Some(Request::Flush) => self.flush().await,
                    None => {
                        debug!("adapter request channel closed, exiting IO task");
                        break;
                    }
                },

                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("adapter event feed closed");
                        events_open = false;
                    }
                },

                _ = wait_until(power_on_at) => self.power_on_expired(),

                _ = wait_until(scan_at) => self.scan_expired().await,

                _ = wait_until(command_at) => self.command_timed_out().await,
            }
        }

        if matches!(self.current, Some(AdapterOperation::Discover { .. })) {
            let _ = self.adapter.stop_scan().await;
        }
    }

    // -- queue --------------------------------------------------------------

    async fn submit(&mut self, op: AdapterOperation) {
        debug!(op = op.kind(), queued = self.queue.len(), "adapter operation submitted");
        self.queue.enqueue(op);
        if !self.state.is_ready() {
            debug!(state = %self.state, "adapter not ready, waiting for power on");
            self.power_on.arm(self.config.power_on_timeout);
            return;
        }
        self.process_next().await;
    }

    /// Start queued operations until one is running or the queue is empty.
    async fn process_next(&mut self) {
        while self.current.is_none() && !self.queue.is_empty() {
            if !self.state.is_ready() {
                if !self.power_on.is_armed() {
                    self.power_on.arm(self.config.power_on_timeout);
                }
                return;
            }
            if let Some(op) = self.queue.dequeue() {
                self.start(op).await;
            }
        }
    }

    async fn start(&mut self, op: AdapterOperation) {
        let requested = match &op {
            AdapterOperation::Discover { services, .. } => {
                info!(?services, "scan started");
                self.discovered.clear();
                self.scan.arm(self.config.scan_duration);
                self.adapter.start_scan(services, false).await
            }
            AdapterOperation::Connect { peer, .. } => {
                info!(%peer, "connect started");
                self.command.arm(self.config.connect_timeout);
                self.adapter.connect(peer).await
            }
            AdapterOperation::Disconnect { peer, .. } => {
                info!(%peer, "disconnect started");
                self.command.arm(self.config.disconnect_timeout);
                self.adapter.cancel_connection(peer).await
            }
        };

        match requested {
            Ok(()) => self.current = Some(op),
            Err(e) => {
                warn!(op = op.kind(), error = %e, "adapter rejected request");
                self.scan.clear();
                self.command.clear();
                op.fail(e);
            }
        }
    }

    /// Take the running operation and disarm its deadlines.
    fn finish(&mut self) -> Option<AdapterOperation> {
        self.scan.clear();
        self.command.clear();
        self.current.take()
    }

    /// Fail the running operation, stopping its scan if it was a discover.
    async fn abort_current(&mut self, err: Error) {
        if let Some(op) = self.finish() {
            if matches!(op, AdapterOperation::Discover { .. }) {
                if let Err(e) = self.adapter.stop_scan().await {
                    warn!(error = %e, "failed to stop scan");
                }
            }
            op.fail(err);
        }
    }

    async fn flush(&mut self) {
        self.power_on.clear();
        let running = self.finish();
        if matches!(running, Some(AdapterOperation::Discover { .. })) {
            let _ = self.adapter.stop_scan().await;
        }
        let dropped = self.queue.flush() + usize::from(running.is_some());
        info!(dropped, "adapter queue flushed");
    }

    // -- deadlines ----------------------------------------------------------

    fn power_on_expired(&mut self) {
        self.power_on.clear();
        if self.state.is_ready() {
            return;
        }
        warn!(
            state = %self.state,
            queued = self.queue.len(),
            "adapter did not power on within limit, failing queued operations"
        );
        let state = self.state;
        for op in self.queue.drain() {
            op.fail(Error::PowerOnTimeout(state));
        }
    }

    async fn scan_expired(&mut self) {
        if let Err(e) = self.adapter.stop_scan().await {
            warn!(error = %e, "failed to stop scan");
        }
        match self.finish() {
            Some(AdapterOperation::Discover { reply, .. }) => {
                let peers = std::mem::take(&mut self.discovered);
                info!(count = peers.len(), "scan ended");
                let _ = reply.send(Ok(peers));
            }
            Some(op) => op.fail(Error::OutOfOrderCompletion),
            None => {}
        }
        self.process_next().await;
    }

    async fn command_timed_out(&mut self) {
        if let Some(op) = self.finish() {
            warn!(op = op.kind(), "adapter command timed out");
            if let AdapterOperation::Connect { peer, .. } = &op {
                if let Err(e) = self.adapter.cancel_connection(peer).await {
                    warn!(%peer, error = %e, "failed to cancel timed-out connect");
                }
            }
            op.fail(Error::CommandTimeout);
        }
        self.process_next().await;
    }

    // -- transport events ---------------------------------------------------

    async fn handle_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::StateChanged(state) => self.state_changed(state).await,
            AdapterEvent::PeerDiscovered(info) => self.peer_discovered(info),
            AdapterEvent::PeerConnected(peer) => self.peer_connected(peer).await,
            AdapterEvent::PeerConnectFailed { peer, reason } => {
                self.peer_connect_failed(peer, reason).await
            }
            AdapterEvent::PeerDisconnected(peer) => self.peer_disconnected(peer).await,
        }
    }

    async fn state_changed(&mut self, state: AdapterState) {
        if state == self.state {
            return;
        }
        info!(from = %self.state, to = %state, "adapter state changed");
        self.state = state;
        self.state_tx.send_replace(state);
        let _ = self.event_tx.send(SessionEvent::AdapterStateChanged(state));

        if state.is_ready() {
            self.power_on.clear();
            self.process_next().await;
        } else {
            self.abort_current(Error::AdapterNotReady(state)).await;
            if !self.queue.is_empty() && !self.power_on.is_armed() {
                self.power_on.arm(self.config.power_on_timeout);
            }
        }
    }

    fn peer_discovered(&mut self, info: PeerInfo) {
        if !matches!(self.current, Some(AdapterOperation::Discover { .. })) {
            trace!(peer = %info.id, "dropping peer sighting outside discovery");
            return;
        }
        debug!(peer = %info.id, name = ?info.name, rssi = ?info.rssi, "peer found");
        self.known.insert(info.id.clone(), info.clone());
        match self.discovered.iter_mut().find(|p| p.id == info.id) {
            Some(existing) => *existing = info,
            None => self.discovered.push(info),
        }
    }

    async fn peer_connected(&mut self, peer: PeerId) {
        info!(%peer, "peer connected");
        match self.finish() {
            Some(AdapterOperation::Connect {
                peer: requested,
                reply,
            }) if requested == peer => {
                let result = self.adapter.open_link(&peer).await.map(|link| ConnectedPeer {
                    info: self
                        .known
                        .get(&peer)
                        .cloned()
                        .unwrap_or_else(|| PeerInfo::new(peer.clone())),
                    link,
                });
                let _ = reply.send(result);
            }
            Some(op) => {
                if matches!(op, AdapterOperation::Discover { .. }) {
                    let _ = self.adapter.stop_scan().await;
                }
                op.fail(Error::OutOfOrderCompletion);
            }
            None => debug!(%peer, "connect signal with no running operation"),
        }
        self.process_next().await;
    }

    async fn peer_connect_failed(&mut self, peer: PeerId, reason: String) {
        warn!(%peer, %reason, "peer failed to connect");
        let err = match &self.current {
            Some(AdapterOperation::Connect { peer: requested, .. }) if *requested == peer => {
                Error::ConnectFailed(reason)
            }
            Some(_) => Error::OutOfOrderCompletion,
            None => {
                debug!(%peer, "connect-failed signal with no running operation");
                return;
            }
        };
        self.abort_current(err).await;
        self.process_next().await;
    }

    async fn peer_disconnected(&mut self, peer: PeerId) {
        info!(%peer, "peer disconnected");
        let _ = self.event_tx.send(SessionEvent::PeerDisconnected(peer.clone()));

        let acknowledged = matches!(
            &self.current,
            Some(AdapterOperation::Disconnect { peer: requested, .. }) if *requested == peer
        );
        if !acknowledged {
            return;
        }
        if let Some(AdapterOperation::Disconnect { reply, .. }) = self.finish() {
            let _ = reply.send(Ok(peer));
        }
        self.process_next().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
