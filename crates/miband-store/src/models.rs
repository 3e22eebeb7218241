//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use miband_types::BpmSample;

use crate::error::{Error, Result};

/// A band stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDevice {
    /// Band MAC address.
    pub id: String,
    /// Advertised name, if one was ever seen.
    pub name: Option<String>,
    /// First time this band produced a sample.
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    /// Last time this band produced a sample.
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

/// A heart-rate sample stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSample {
    /// Database row ID.
    pub id: i64,
    /// Band MAC address.
    pub device_id: String,
    /// When the sample was captured.
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    /// Heart rate in beats per minute.
    pub bpm: u16,
}

impl StoredSample {
    /// Convert to a [`BpmSample`].
    pub fn to_sample(&self) -> BpmSample {
        BpmSample::new(self.captured_at, self.bpm)
    }
}

/// Microseconds since the unix epoch, the precision samples are stored at.
pub(crate) fn to_micros(time: OffsetDateTime) -> i64 {
    (time.unix_timestamp_nanos() / 1_000) as i64
}

pub(crate) fn from_micros(micros: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000)
        .map_err(|e| Error::InvalidValue(format!("timestamp {}: {}", micros, e)))
}

pub(crate) fn from_seconds(seconds: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|e| Error::InvalidValue(format!("timestamp {}: {}", seconds, e)))
}
