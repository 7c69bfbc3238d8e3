//! The protocol engine: handshake, steady-state session loop, disconnect
//!
//! Exactly one logical task consumes the inbound frame queue and mutates
//! the connection state, the assembly buffer and the telemetry snapshot:
//! first the authentication loop (on the caller's task, inside
//! [`ValveClient::connect`]), then — after a strictly sequential handoff —
//! the spawned session loop. That single-consumer shape is what lets the
//! engine run without locks around the buffer.

use crate::link::{LinkError, LinkPort};
use crate::protocol::frame::Frame;
use crate::protocol::profile::{DeviceProfile, ProfileError};
use crate::protocol::token::AuthToken;
use crate::telemetry::decoder;
use crate::telemetry::snapshot::TelemetrySnapshot;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Connection lifecycle. Transitions are the only way state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

/// Errors surfaced to the caller. Decode failures and malformed frames are
/// absorbed inside the session and never appear here.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication timed out")]
    AuthenticationTimeout,
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("already connected or connecting")]
    AlreadyConnected,
    #[error("client already ran a session; create a new client to reconnect")]
    SessionConsumed,
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Timeouts for the two wait states of the engine.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on each wait during the handshake.
    pub auth_timeout: Duration,
    /// Bound on each wait in the steady-state loop. Expiry is not an error
    /// unless the link also reports down.
    pub frame_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(10),
            frame_timeout: Duration::from_secs(30),
        }
    }
}

/// Callback invoked with the updated snapshot after every successful merge.
/// The reference points at a point-in-time copy taken after the merge; the
/// snapshot lock is not held during the call, so a sink may freely read the
/// client's snapshot or call back into the engine.
pub type EventSink = Arc<dyn Fn(&TelemetrySnapshot) + Send + Sync>;

/// The single consumer of the inbound queue. Owns the assembly buffer;
/// moved onto the session task once the handshake completes.
struct SessionEngine {
    profile: DeviceProfile,
    token: AuthToken,
    link: Arc<dyn LinkPort>,
    inbound: mpsc::Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    snapshot: Arc<RwLock<TelemetrySnapshot>>,
    sink: Option<EventSink>,
    state: Arc<RwLock<ConnectionState>>,
    config: SessionConfig,
    stop: watch::Receiver<bool>,
}

impl SessionEngine {
    fn set_state(&self, state: ConnectionState) {
        trace!(?state, "connection state");
        *self.state.write() = state;
    }

    /// Drive the one-time handshake to an authenticated session.
    ///
    /// Telemetry the device pushes before the handshake completes is acked
    /// and reassembled through the identical path used in steady state, so
    /// pre-authentication data is not lost.
    async fn authenticate(&mut self) -> Result<(), ClientError> {
        self.link.write(&[self.profile.auth_request]).await?;
        self.set_state(ConnectionState::Authenticating);

        loop {
            let raw = match timeout(self.config.auth_timeout, self.inbound.recv()).await {
                Err(_) => {
                    warn!("authentication timed out");
                    return Err(ClientError::AuthenticationTimeout);
                }
                Ok(None) => {
                    return Err(ClientError::ConnectionLost(
                        "inbound queue closed".to_string(),
                    ))
                }
                Ok(Some(raw)) => raw,
            };

            match Frame::classify(&raw, &self.profile) {
                Frame::Ack => {
                    self.link.write(self.token.as_bytes()).await?;
                    self.set_state(ConnectionState::Connected);
                    info!(device = self.profile.name, "authentication successful");
                    return Ok(());
                }
                frame => self.handle_frame(frame).await?,
            }
        }
    }

    /// Steady-state loop: sole consumer of inbound frames until stopped.
    async fn run(mut self) -> Result<(), ClientError> {
        debug!("session loop started");
        let result = self.run_inner().await;
        self.set_state(ConnectionState::Disconnected);
        debug!("session loop ended");
        result
    }

    async fn run_inner(&mut self) -> Result<(), ClientError> {
        loop {
            if *self.stop.borrow() {
                return Ok(());
            }
            tokio::select! {
                // Stop request (or handle dropped): exit at the wait
                // boundary without decoding a partial buffer.
                _ = self.stop.changed() => return Ok(()),
                next = timeout(self.config.frame_timeout, self.inbound.recv()) => match next {
                    Err(_) => {
                        // A quiet period is normal; only fatal if the
                        // transport is actually gone.
                        if !self.link.is_up() {
                            warn!("link down during idle period");
                            return Err(ClientError::ConnectionLost(
                                "link reported down".to_string(),
                            ));
                        }
                    }
                    Ok(None) => {
                        return Err(ClientError::ConnectionLost(
                            "inbound queue closed".to_string(),
                        ))
                    }
                    Ok(Some(raw)) => {
                        let frame = Frame::classify(&raw, &self.profile);
                        self.handle_frame(frame).await.map_err(|err| {
                            ClientError::ConnectionLost(err.to_string())
                        })?;
                    }
                }
            }
        }
    }

    /// Handle one classified frame. Shared by the handshake and the
    /// steady-state loop.
    async fn handle_frame(&mut self, frame: Frame) -> Result<(), LinkError> {
        match frame {
            Frame::KeepAlive => {
                debug!("keep-alive probe, replying");
                self.link.write(&[self.profile.keepalive_reply]).await?;
            }
            Frame::Ack => {
                // Flow-control ack for a prior write; nothing in flight
                // needs it, so this is inert.
            }
            Frame::Malformed => trace!("dropping malformed frame"),
            Frame::Data { header, payload } => {
                // Mandatory synchronous flow control: the valve will not
                // send the next fragment until this one is acknowledged.
                self.link.write(&[self.profile.ack]).await?;

                if header.is_first() && !self.buffer.is_empty() {
                    warn!(
                        stale = self.buffer.len(),
                        "first fragment with non-empty buffer, dropping stale bytes"
                    );
                    self.buffer.clear();
                }
                self.buffer.extend_from_slice(&payload);
                if header.is_last() {
                    self.complete_message();
                }
            }
        }
        Ok(())
    }

    /// Decode the assembled message and notify the sink. The buffer is
    /// cleared regardless of the decode outcome.
    ///
    /// The sink runs after the snapshot lock is released, on a copy of the
    /// merged state, so a sink touching the snapshot cannot deadlock.
    fn complete_message(&mut self) {
        let message = std::mem::take(&mut self.buffer);
        let mut guard = self.snapshot.write();
        match decoder::decode_and_merge(self.profile.fields, &message, &mut guard) {
            Ok(()) => {
                let updated = guard.clone();
                drop(guard);
                if let Some(sink) = &self.sink {
                    sink(&updated);
                }
            }
            Err(err) => warn!(%err, "discarding undecodable message"),
        }
    }
}

/// Protocol engine for one valve controller session.
///
/// A client runs exactly one session: [`ValveClient::connect`] performs the
/// handshake inline, then hands the engine to a spawned session task.
/// Reconnection policy belongs to the transport layer — to reconnect,
/// create a fresh client (and frame channel).
pub struct ValveClient {
    profile: DeviceProfile,
    token: AuthToken,
    link: Arc<dyn LinkPort>,
    config: SessionConfig,
    sink: Option<EventSink>,
    snapshot: Arc<RwLock<TelemetrySnapshot>>,
    state: Arc<RwLock<ConnectionState>>,
    inbound: Option<mpsc::Receiver<Vec<u8>>>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<Result<(), ClientError>>>,
}

impl ValveClient {
    /// Create a client. `inbound` is the consumer side of the frame channel
    /// whose [`crate::link::FrameSink`] was handed to the transport. The
    /// profile is validated here, before a session ever starts.
    pub fn new(
        profile: DeviceProfile,
        token: AuthToken,
        link: Arc<dyn LinkPort>,
        inbound: mpsc::Receiver<Vec<u8>>,
        config: SessionConfig,
    ) -> Result<Self, ClientError> {
        profile.validate()?;
        Ok(Self {
            profile,
            token,
            link,
            config,
            sink: None,
            snapshot: Arc::new(RwLock::new(TelemetrySnapshot::default())),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            inbound: Some(inbound),
            stop_tx: None,
            task: None,
        })
    }

    /// Install the event sink invoked after every decoded message.
    pub fn with_event_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&TelemetrySnapshot) + Send + Sync + 'static,
    {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the session is authenticated and the link still up.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.link.is_up()
    }

    /// Copy of the current snapshot, for polling callers.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot.read().clone()
    }

    /// Run the handshake, then start the session loop.
    ///
    /// On a failed handshake the state stays non-connected and the caller
    /// owns tearing down the underlying link. No retries are attempted.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Disconnected {
            warn!("connect called while already active");
            return Err(ClientError::AlreadyConnected);
        }
        let inbound = self.inbound.take().ok_or(ClientError::SessionConsumed)?;

        *self.state.write() = ConnectionState::Connecting;
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut engine = SessionEngine {
            profile: self.profile.clone(),
            token: self.token.clone(),
            link: Arc::clone(&self.link),
            inbound,
            buffer: Vec::new(),
            snapshot: Arc::clone(&self.snapshot),
            sink: self.sink.clone(),
            state: Arc::clone(&self.state),
            config: self.config.clone(),
            stop: stop_rx,
        };

        if let Err(err) = engine.authenticate().await {
            *self.state.write() = ConnectionState::Disconnected;
            return Err(err);
        }

        // Sequential handoff: the handshake has fully completed on this
        // task before the session loop takes over the queue.
        self.stop_tx = Some(stop_tx);
        self.task = Some(tokio::spawn(engine.run()));
        Ok(())
    }

    /// Wait for the session loop to end on its own (stop or link loss).
    pub async fn closed(&mut self) -> Result<(), ClientError> {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(err) => Err(ClientError::ConnectionLost(format!(
                    "session task failed: {err}"
                ))),
            },
            None => Ok(()),
        }
    }

    /// Stop the session, close the link, reset state. Idempotent; safe to
    /// call when already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(true);
        }
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(%err, "session ended with error"),
                Err(err) => warn!(%err, "session task panicked"),
            }
        }
        self.link.close().await;
        *self.state.write() = ConnectionState::Disconnected;
        info!("disconnected");
    }
}
