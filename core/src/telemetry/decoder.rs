//! Decode a completed message and merge it into the snapshot
//!
//! A completed message is the byte-concatenation of fragment payloads. It
//! must be UTF-8 text holding one JSON object. Decode failures are
//! non-fatal: the message is discarded and the session continues.

use crate::telemetry::fields::FieldSpec;
use crate::telemetry::snapshot::TelemetrySnapshot;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

/// Errors decoding a completed telemetry message.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message is not a JSON object")]
    NotAnObject,
}

/// Parse one completed message and merge it into the snapshot.
///
/// Every key is stored verbatim in the snapshot's raw map; keys matching
/// the field table are additionally transformed into typed fields. Keys
/// absent from the message keep their previous value, and unknown keys
/// never cause failure — the merge stays forward-compatible with firmware
/// fields this engine does not yet recognize.
pub fn decode_and_merge(
    table: &[FieldSpec],
    message: &[u8],
    snapshot: &mut TelemetrySnapshot,
) -> Result<(), DecodeError> {
    let text = std::str::from_utf8(message)?;
    let value: Value = serde_json::from_str(text)?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    for (key, value) in object {
        snapshot.raw.insert(key.clone(), value.clone());
    }
    for spec in table {
        if let Some(value) = object.get(spec.key) {
            spec.merge(snapshot, value);
        }
    }

    trace!(keys = object.len(), "merged telemetry message");
    Ok(())
}
