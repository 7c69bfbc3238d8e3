//! The cumulative device-state record
//!
//! One snapshot lives for the whole session. Decoding a message only
//! overwrites the fields present in that message; everything else keeps its
//! previous value. The snapshot is never wholly replaced or cleared during
//! normal operation — consumers needing a stable point-in-time view must
//! copy it inside the event callback.

use serde::Serialize;
use serde_json::{Map, Value};

/// Valve status bit indicating low salt.
const STATUS_SALT_LOW: i64 = 0x80;

/// Most recently known value for every telemetry field, plus a verbatim map
/// of every key the firmware has ever sent (forward compatibility with
/// fields this engine does not yet recognize).
///
/// Scaled quantities are stored post-transform: gallons as gallons, pounds
/// as pounds, grains as grains. The firmware's raw fixed-point integers
/// remain available in [`TelemetrySnapshot::raw`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct TelemetrySnapshot {
    // Dashboard
    pub time_hours: Option<i64>,                  // dh
    pub time_minutes: Option<i64>,                // dm
    pub battery_level_mv: Option<i64>,            // dbl (millivolts)
    pub total_gallons_remaining: Option<f64>,     // dtgr (gallons)
    pub peak_flow_daily: Option<f64>,             // dpfd (gal/min)
    pub water_hardness: Option<i64>,              // dwh (GPG)
    pub day_override: Option<i64>,                // ddo
    pub current_day_override: Option<i64>,        // dcdo
    pub water_used_today: Option<f64>,            // dwu (gallons)
    pub average_water_used: Option<f64>,          // dwau (gallons)
    pub regen_time_hours: Option<i64>,            // drth
    pub regen_time_type: Option<i64>,             // drtt
    pub regen_time_remaining: Option<i64>,        // drtr
    pub regen_current_position: Option<i64>,      // drcp
    pub regen_in_aeration: Option<bool>,          // dria
    pub regen_soak_mode: Option<bool>,            // dps
    pub regen_soak_timer: Option<i64>,            // drst
    pub prefill_enabled: Option<bool>,            // dpe
    pub prefill_duration: Option<i64>,            // dpd

    // Brine tank
    pub brine_tank_total_salt: Option<i64>,       // dbts (pounds)
    pub remaining_salt_lbs: Option<f64>,          // dbtr (pounds)
    pub brine_tank_width: Option<i64>,            // dbtw
    pub brine_tank_height: Option<i64>,           // dbth
    pub brine_tank_reserve_time: Option<i64>,     // dbrt

    // Advanced settings
    pub days_until_regen: Option<i64>,            // asd
    pub regen_day_override: Option<i64>,          // asr
    pub auto_reserve_mode: Option<bool>,          // asar
    pub reserve_capacity: Option<i64>,            // asrc
    pub reserve_capacity_gallons: Option<f64>,    // asrg (gallons)
    pub total_grains_capacity: Option<i64>,       // astg (grains)
    pub aeration_days: Option<i64>,               // asad
    pub chlorine_pulses: Option<i64>,             // ascp
    pub display_off: Option<bool>,                // asdo
    pub num_regen_positions: Option<i64>,         // asnp

    // Status & history
    pub days_in_operation: Option<i64>,           // shdo
    pub days_since_last_regen: Option<i64>,       // shdr
    pub gallons_since_last_regen: Option<f64>,    // shgs (gallons)
    pub regen_counter: Option<i64>,               // shrc
    pub regen_counter_resettable: Option<i64>,    // shrr
    pub total_gallons: Option<f64>,               // shgt (gallons)
    pub total_gallons_resettable: Option<f64>,    // shgr (gallons)

    // Global
    pub valve_status: Option<i64>,                // gvs
    pub valve_error: Option<i64>,                 // gve
    pub present_flow: Option<f64>,                // gpf (gal/min)
    pub regen_active: Option<bool>,               // gra
    pub regen_state: Option<i64>,                 // grs
    pub auth_state: Option<i64>,                  // as (2 = authenticated)

    /// Every key the device has ever sent, verbatim.
    pub raw: Map<String, Value>,
}

impl TelemetrySnapshot {
    /// Battery level in volts.
    pub fn battery_level_volts(&self) -> Option<f64> {
        self.battery_level_mv.map(|mv| mv as f64 / 1000.0)
    }

    /// Low-salt alert, taken from the valve status bit.
    pub fn salt_low(&self) -> Option<bool> {
        self.valve_status.map(|status| status & STATUS_SALT_LOW != 0)
    }

    /// Remaining salt in whole pounds, rounded.
    pub fn remaining_salt_pounds(&self) -> Option<i64> {
        self.remaining_salt_lbs.map(|lbs| lbs.round() as i64)
    }

    /// Salt level as a percentage of the configured tank total, clamped to
    /// [0, 100].
    pub fn salt_level_percent(&self) -> Option<f64> {
        match (self.remaining_salt_lbs, self.brine_tank_total_salt) {
            (Some(remaining), Some(total)) if total > 0 => {
                Some((remaining / total as f64 * 100.0).clamp(0.0, 100.0))
            }
            _ => None,
        }
    }

    /// Treated-water capacity remaining as a percentage of the configured
    /// grains capacity, clamped to [0, 100].
    pub fn capacity_remaining_percent(&self) -> Option<f64> {
        match (self.total_gallons_remaining, self.total_grains_capacity) {
            (Some(remaining), Some(capacity)) if capacity > 0 => {
                Some((remaining / capacity as f64 * 100.0).clamp(0.0, 100.0))
            }
            _ => None,
        }
    }

    /// Human-readable valve error. The firmware omits `gve` entirely in the
    /// healthy case, so absent means "No Error".
    pub fn valve_error_text(&self) -> String {
        valve_error_text(self.valve_error)
    }
}

/// Map a valve error code to display text, per the firmware manual.
pub fn valve_error_text(code: Option<i64>) -> String {
    match code {
        None | Some(0) => "No Error".to_string(),
        Some(2) => "Lost Home".to_string(),
        Some(3) => "No Encoder Slots (Normal Current)".to_string(),
        Some(4) => "Can't Find Home".to_string(),
        Some(5) => "No Encoder Slots (High Current)".to_string(),
        Some(6) => "No Encoder Slots (No Current)".to_string(),
        Some(7) => "TWEDO Motor Timeout".to_string(),
        Some(192) => "Regen Aborted (On Battery)".to_string(),
        Some(other) => format!("Unknown Error ({other})"),
    }
}
