/// Wire Protocol Module
///
/// Protocol-level abstractions for the valve controller link:
///
/// - **frame**: classification of inbound notifications (control bytes vs.
///   data fragments) and the fragment header bits
/// - **profile**: per-variant wire parameters (control codes, GATT UUIDs,
///   telemetry field table) so one engine serves every device variant
/// - **token**: the 16-byte shared secret used by the handshake
///
/// The actual radio is behind [`crate::link::LinkPort`]; everything here is
/// testable without BLE hardware.

pub mod frame;
pub mod profile;
pub mod token;

pub use frame::{Frame, FragmentHeader, HEADER_FIRST_FRAGMENT, HEADER_LAST_FRAGMENT};
pub use profile::{DeviceProfile, ProfileError};
pub use token::{AuthToken, TokenError, TOKEN_LEN};
