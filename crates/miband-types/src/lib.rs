//! Platform-agnostic types for Mi Band heart-rate monitoring.
//!
//! This crate provides the shared vocabulary used by `miband-core`,
//! `miband-store` and the command-line tool: canonical device addresses,
//! authentication keys, heart-rate samples, session states and the BLE UUIDs
//! the band exposes.
//!
//! # Example
//!
//! ```
//! use miband_types::{AuthKey, MacAddress};
//!
//! let address: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
//! let key = AuthKey::from_hex("0123456789abcdef0123456789abcdef").unwrap();
//! assert_eq!(address.as_str(), "AA:BB:CC:DD:EE:FF");
//! assert_eq!(key.as_bytes().len(), 16);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    AUTH_KEY_LEN, AuthKey, BpmSample, DeviceHandle, DeviceKeyRecord, LiveStatus,
    MAC_ADDRESS_LEN, MacAddress, SessionState, parse_heart_rate_measurement,
};
pub use uuid as uuids;
