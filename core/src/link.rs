//! Link port — the abstract BLE capability the engine is built on
//!
//! The engine never talks to a radio directly. A transport implements
//! [`LinkPort`] for outbound bytes and pushes every inbound notification
//! through a [`FrameSink`]; the engine task is the sole consumer of the
//! resulting queue. Connection establishment, retry and backoff all belong
//! to the transport behind the trait, never to the engine.
//!
//! The sink never blocks: radio-stack callbacks must return immediately, so
//! delivery is `try_send` and overflow drops the frame with a warning.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Default depth of the inbound frame queue. Fragments are acknowledged one
/// at a time, so the queue only ever builds up while the engine is busy
/// inside a decode.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Errors surfaced by a link implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("link write failed: {0}")]
    WriteFailed(String),
    #[error("link is not connected")]
    NotConnected,
}

/// Outbound half of the transport, plus liveness and teardown.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkPort: Send + Sync {
    /// Write raw bytes to the device.
    async fn write(&self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Whether the underlying link still looks alive. Consulted when the
    /// session loop has seen nothing for a full wait period.
    fn is_up(&self) -> bool;

    /// Tear down the link. Idempotent.
    async fn close(&self);
}

/// Producer handle the transport uses to deliver inbound notifications.
///
/// Safe to call from a radio-stack callback context: enqueue only, never
/// blocking, never touching engine state.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl FrameSink {
    /// Enqueue one inbound frame without blocking.
    pub fn deliver(&self, frame: Vec<u8>) {
        trace!(payload = %hex::encode(&frame), "inbound frame");
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("inbound queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("inbound queue closed, dropping frame");
            }
        }
    }
}

/// Create the inbound frame queue: one producer (the transport callback),
/// one consumer (the engine task).
pub fn frame_channel(depth: usize) -> (FrameSink, mpsc::Receiver<Vec<u8>>) {
    let (tx, rx) = mpsc::channel(depth);
    (FrameSink { tx }, rx)
}
