//! Bluetooth UUIDs for Mi Band devices.
//!
//! The band exposes the standard Heart Rate service alongside Xiaomi's
//! proprietary authentication service.

use uuid::{Uuid, uuid};

// --- Standard Heart Rate service ---

/// Heart Rate service.
pub const HEART_RATE_SERVICE: Uuid = uuid!("0000180d-0000-1000-8000-00805f9b34fb");

/// Heart Rate Measurement characteristic (notify).
pub const HEART_RATE_MEASUREMENT: Uuid = uuid!("00002a37-0000-1000-8000-00805f9b34fb");

/// Heart Rate Control Point characteristic (write).
pub const HEART_RATE_CONTROL_POINT: Uuid = uuid!("00002a39-0000-1000-8000-00805f9b34fb");

// --- Xiaomi services ---

/// Mi Band service hosting the authentication characteristic.
pub const MIBAND_AUTH_SERVICE: Uuid = uuid!("0000fee1-0000-1000-8000-00805f9b34fb");

/// Authentication characteristic (write + notify).
pub const MIBAND_AUTH: Uuid = uuid!("00000009-0000-3512-2118-0009af100700");

/// Mi Band primary service (advertised by bands 2 through 5).
pub const MIBAND_SERVICE: Uuid = uuid!("0000fee0-0000-1000-8000-00805f9b34fb");

/// Xiaomi (Huami) company identifier used in manufacturer data.
pub const MANUFACTURER_ID: u16 = 0x0157;
