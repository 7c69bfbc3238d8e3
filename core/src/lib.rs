// Valvelink Core — Valve Telemetry Spine
//
// "Does this turn an unreliable stream of BLE notifications into a
//  coherent, authenticated telemetry session?"
//
// If the answer is no, it doesn't belong in this crate.

pub mod client;
pub mod link;
pub mod protocol;
pub mod telemetry;

pub use client::{ClientError, ConnectionState, SessionConfig, ValveClient};
pub use link::{frame_channel, FrameSink, LinkError, LinkPort, DEFAULT_QUEUE_DEPTH};
pub use protocol::frame::{Frame, FragmentHeader};
pub use protocol::profile::{DeviceProfile, ProfileError};
pub use protocol::token::{AuthToken, TokenError};
pub use telemetry::decoder::DecodeError;
pub use telemetry::snapshot::TelemetrySnapshot;
