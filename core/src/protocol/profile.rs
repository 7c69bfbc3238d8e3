//! Device profiles — per-variant wire parameters
//!
//! Both supported product lines (water softener and whole-house filtration)
//! run the same valve firmware and speak the same framing; they differ only
//! in naming and discovery metadata. A profile bundles the control codes,
//! the GATT endpoints, and the telemetry field table so one engine serves
//! every variant instead of duplicating the protocol per integration.

use crate::telemetry::fields::{FieldSpec, FIELDS};
use std::collections::HashSet;
use thiserror::Error;

/// Control byte opening the handshake (engine → device).
pub const AUTH_REQUEST: u8 = 0xEA;
/// Flow-control acknowledgement byte (both directions).
pub const ACK: u8 = 0xCC;
/// Liveness probe byte (device → engine).
pub const KEEP_ALIVE_PROBE: u8 = 0xE0;
/// Liveness reply byte (engine → device).
pub const KEEP_ALIVE_REPLY: u8 = 0xF0;

/// BLE manufacturer ID carried in the valve's advertisements.
pub const MANUFACTURER_ID: u16 = 1850;

/// Advertised service UUID, used during discovery.
pub const SERVICE_UUID_ADVERTISED: &str = "8d53dc1d-1db7-4cd3-868b-8a527460aa84";
/// GATT service UUID, used for communication.
pub const SERVICE_UUID_GATT: &str = "a725458c-bee1-4d2e-9555-edf5a8082303";
/// Notify characteristic delivering inbound frames.
pub const CHAR_UUID_READ: &str = "a725458c-bee2-4d2e-9555-edf5a8082303";
/// Write characteristic for engine → device bytes.
pub const CHAR_UUID_WRITE: &str = "a725458c-bee3-4d2e-9555-edf5a8082303";

/// Errors detected while validating a profile.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("duplicate key in field table: {0}")]
    DuplicateFieldKey(&'static str),
    #[error("control codes must be distinct: {0:#04x} appears twice")]
    AmbiguousControlCode(u8),
}

/// Wire parameters and field table for one device variant.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    /// Human-readable variant name.
    pub name: &'static str,
    /// Control byte opening the handshake.
    pub auth_request: u8,
    /// Flow-control acknowledgement byte.
    pub ack: u8,
    /// Liveness probe byte (device → engine).
    pub keepalive_probe: u8,
    /// Liveness reply byte (engine → device).
    pub keepalive_reply: u8,
    /// Advertised service UUID used during discovery.
    pub service_uuid: &'static str,
    /// Notify characteristic delivering inbound frames.
    pub read_characteristic: &'static str,
    /// Write characteristic for engine → device bytes.
    pub write_characteristic: &'static str,
    /// Telemetry field table — a fixed contract with the valve firmware.
    pub fields: &'static [FieldSpec],
}

impl DeviceProfile {
    /// Profile for the water-softener variant.
    pub fn softener() -> Self {
        Self {
            name: "Water Softener",
            auth_request: AUTH_REQUEST,
            ack: ACK,
            keepalive_probe: KEEP_ALIVE_PROBE,
            keepalive_reply: KEEP_ALIVE_REPLY,
            service_uuid: SERVICE_UUID_ADVERTISED,
            read_characteristic: CHAR_UUID_READ,
            write_characteristic: CHAR_UUID_WRITE,
            fields: FIELDS,
        }
    }

    /// Profile for the whole-house filtration variant. Same valve firmware
    /// and codes as the softener; kept separate so discovery and display
    /// can tell the products apart.
    pub fn filtration() -> Self {
        Self {
            name: "Whole House Filtration",
            ..Self::softener()
        }
    }

    /// Validate the profile before a session ever starts.
    ///
    /// Rejects field tables with duplicate keys (a duplicate would make the
    /// merge order-dependent) and control codes that collide (an inbound
    /// byte must classify unambiguously).
    pub fn validate(&self) -> Result<(), ProfileError> {
        let mut seen = HashSet::new();
        for spec in self.fields {
            if !seen.insert(spec.key) {
                return Err(ProfileError::DuplicateFieldKey(spec.key));
            }
        }
        if self.ack == self.keepalive_probe {
            return Err(ProfileError::AmbiguousControlCode(self.ack));
        }
        Ok(())
    }
}
