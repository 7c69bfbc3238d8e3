//! The telemetry field table — a fixed contract with the valve firmware
//!
//! Every entry maps one short JSON key pushed by the device to a typed
//! snapshot field together with the scale the firmware applies before
//! sending (hundredths for volumes and flows, tenths for salt weight,
//! thousands for grains capacity). The table is static data, validated at
//! startup and exhaustively testable, instead of per-field bespoke code.

use crate::telemetry::snapshot::TelemetrySnapshot;
use serde_json::Value;

/// Scale transform applied to a raw JSON value before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Stored as sent.
    Identity,
    /// Firmware sends tenths; stored ÷ 10.
    Tenths,
    /// Firmware sends hundredths; stored ÷ 100.
    Hundredths,
    /// Firmware sends thousands; stored × 1000.
    Thousands,
    /// Any truthy value becomes `true`.
    Flag,
}

/// Typed destination of a decoded value. The variant fixes both the scale
/// transform and the setter signature, so a table row can never pair a
/// boolean setter with a numeric transform.
#[derive(Debug, Clone, Copy)]
pub enum Apply {
    Identity(fn(&mut TelemetrySnapshot, i64)),
    Tenths(fn(&mut TelemetrySnapshot, f64)),
    Hundredths(fn(&mut TelemetrySnapshot, f64)),
    Thousands(fn(&mut TelemetrySnapshot, i64)),
    Flag(fn(&mut TelemetrySnapshot, bool)),
}

/// One row of the field table: a (key, setter, transform) triple.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// The short key as sent by the firmware.
    pub key: &'static str,
    /// Transform plus typed setter.
    pub apply: Apply,
}

impl FieldSpec {
    /// The scale transform this row applies.
    pub fn transform(&self) -> Transform {
        match self.apply {
            Apply::Identity(_) => Transform::Identity,
            Apply::Tenths(_) => Transform::Tenths,
            Apply::Hundredths(_) => Transform::Hundredths,
            Apply::Thousands(_) => Transform::Thousands,
            Apply::Flag(_) => Transform::Flag,
        }
    }

    /// Apply this row to one decoded JSON value.
    ///
    /// A value of an unexpected type is skipped, leaving the previous field
    /// value in place; a recognized key never fails the merge.
    pub fn merge(&self, snapshot: &mut TelemetrySnapshot, value: &Value) {
        match self.apply {
            Apply::Identity(set) => {
                if let Some(n) = as_i64(value) {
                    set(snapshot, n);
                }
            }
            Apply::Tenths(set) => {
                if let Some(n) = value.as_f64() {
                    set(snapshot, n / 10.0);
                }
            }
            Apply::Hundredths(set) => {
                if let Some(n) = value.as_f64() {
                    set(snapshot, n / 100.0);
                }
            }
            Apply::Thousands(set) => {
                if let Some(n) = as_i64(value) {
                    set(snapshot, n.saturating_mul(1000));
                }
            }
            Apply::Flag(set) => set(snapshot, truthy(value)),
        }
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
}

/// Boolean coercion matching the firmware's loose flag encoding (flags
/// arrive as 0/1, occasionally as `true`/`false`).
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// The full field table. Reproduced exactly from the device firmware's
/// telemetry key set; interoperability depends on it.
pub static FIELDS: &[FieldSpec] = &[
    // Dashboard
    FieldSpec { key: "dh", apply: Apply::Identity(|s, v| s.time_hours = Some(v)) },
    FieldSpec { key: "dm", apply: Apply::Identity(|s, v| s.time_minutes = Some(v)) },
    FieldSpec { key: "dbl", apply: Apply::Identity(|s, v| s.battery_level_mv = Some(v)) },
    FieldSpec { key: "dtgr", apply: Apply::Hundredths(|s, v| s.total_gallons_remaining = Some(v)) },
    FieldSpec { key: "dpfd", apply: Apply::Hundredths(|s, v| s.peak_flow_daily = Some(v)) },
    FieldSpec { key: "dwh", apply: Apply::Identity(|s, v| s.water_hardness = Some(v)) },
    FieldSpec { key: "ddo", apply: Apply::Identity(|s, v| s.day_override = Some(v)) },
    FieldSpec { key: "dcdo", apply: Apply::Identity(|s, v| s.current_day_override = Some(v)) },
    FieldSpec { key: "dwu", apply: Apply::Hundredths(|s, v| s.water_used_today = Some(v)) },
    FieldSpec { key: "dwau", apply: Apply::Hundredths(|s, v| s.average_water_used = Some(v)) },
    FieldSpec { key: "drth", apply: Apply::Identity(|s, v| s.regen_time_hours = Some(v)) },
    FieldSpec { key: "drtt", apply: Apply::Identity(|s, v| s.regen_time_type = Some(v)) },
    FieldSpec { key: "drtr", apply: Apply::Identity(|s, v| s.regen_time_remaining = Some(v)) },
    FieldSpec { key: "drcp", apply: Apply::Identity(|s, v| s.regen_current_position = Some(v)) },
    FieldSpec { key: "dria", apply: Apply::Flag(|s, v| s.regen_in_aeration = Some(v)) },
    FieldSpec { key: "dps", apply: Apply::Flag(|s, v| s.regen_soak_mode = Some(v)) },
    FieldSpec { key: "drst", apply: Apply::Identity(|s, v| s.regen_soak_timer = Some(v)) },
    FieldSpec { key: "dpe", apply: Apply::Flag(|s, v| s.prefill_enabled = Some(v)) },
    FieldSpec { key: "dpd", apply: Apply::Identity(|s, v| s.prefill_duration = Some(v)) },
    // Brine tank
    FieldSpec { key: "dbts", apply: Apply::Identity(|s, v| s.brine_tank_total_salt = Some(v)) },
    FieldSpec { key: "dbtr", apply: Apply::Tenths(|s, v| s.remaining_salt_lbs = Some(v)) },
    FieldSpec { key: "dbtw", apply: Apply::Identity(|s, v| s.brine_tank_width = Some(v)) },
    FieldSpec { key: "dbth", apply: Apply::Identity(|s, v| s.brine_tank_height = Some(v)) },
    FieldSpec { key: "dbrt", apply: Apply::Identity(|s, v| s.brine_tank_reserve_time = Some(v)) },
    // Advanced settings
    FieldSpec { key: "asd", apply: Apply::Identity(|s, v| s.days_until_regen = Some(v)) },
    FieldSpec { key: "asr", apply: Apply::Identity(|s, v| s.regen_day_override = Some(v)) },
    FieldSpec { key: "asar", apply: Apply::Flag(|s, v| s.auto_reserve_mode = Some(v)) },
    FieldSpec { key: "asrc", apply: Apply::Identity(|s, v| s.reserve_capacity = Some(v)) },
    FieldSpec { key: "asrg", apply: Apply::Hundredths(|s, v| s.reserve_capacity_gallons = Some(v)) },
    FieldSpec { key: "astg", apply: Apply::Thousands(|s, v| s.total_grains_capacity = Some(v)) },
    FieldSpec { key: "asad", apply: Apply::Identity(|s, v| s.aeration_days = Some(v)) },
    FieldSpec { key: "ascp", apply: Apply::Identity(|s, v| s.chlorine_pulses = Some(v)) },
    FieldSpec { key: "asdo", apply: Apply::Flag(|s, v| s.display_off = Some(v)) },
    FieldSpec { key: "asnp", apply: Apply::Identity(|s, v| s.num_regen_positions = Some(v)) },
    // Status & history
    FieldSpec { key: "shdo", apply: Apply::Identity(|s, v| s.days_in_operation = Some(v)) },
    FieldSpec { key: "shdr", apply: Apply::Identity(|s, v| s.days_since_last_regen = Some(v)) },
    FieldSpec { key: "shgs", apply: Apply::Hundredths(|s, v| s.gallons_since_last_regen = Some(v)) },
    FieldSpec { key: "shrc", apply: Apply::Identity(|s, v| s.regen_counter = Some(v)) },
    FieldSpec { key: "shrr", apply: Apply::Identity(|s, v| s.regen_counter_resettable = Some(v)) },
    FieldSpec { key: "shgt", apply: Apply::Hundredths(|s, v| s.total_gallons = Some(v)) },
    FieldSpec { key: "shgr", apply: Apply::Hundredths(|s, v| s.total_gallons_resettable = Some(v)) },
    // Global
    FieldSpec { key: "gvs", apply: Apply::Identity(|s, v| s.valve_status = Some(v)) },
    FieldSpec { key: "gve", apply: Apply::Identity(|s, v| s.valve_error = Some(v)) },
    FieldSpec { key: "gpf", apply: Apply::Hundredths(|s, v| s.present_flow = Some(v)) },
    FieldSpec { key: "gra", apply: Apply::Flag(|s, v| s.regen_active = Some(v)) },
    FieldSpec { key: "grs", apply: Apply::Identity(|s, v| s.regen_state = Some(v)) },
    FieldSpec { key: "as", apply: Apply::Identity(|s, v| s.auth_state = Some(v)) },
];
