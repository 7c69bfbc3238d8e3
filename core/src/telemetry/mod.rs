/// Telemetry Module
///
/// Decoding of completed JSON telemetry messages and the long-lived device
/// state they merge into:
///
/// - **fields**: the static field table mapping firmware keys to typed
///   snapshot fields with their scale transforms
/// - **snapshot**: the cumulative, merge-only device-state record plus its
///   derived (computed-on-read) values
/// - **decoder**: UTF-8/JSON parse and the merge itself

pub mod decoder;
pub mod fields;
pub mod snapshot;

pub use decoder::{decode_and_merge, DecodeError};
pub use fields::{FieldSpec, Transform, FIELDS};
pub use snapshot::TelemetrySnapshot;
