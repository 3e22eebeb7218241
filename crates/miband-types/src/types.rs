//! Core types for Mi Band monitoring.

use core::fmt;
use core::str::FromStr;

use bytes::Buf;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};

/// Length of a canonical MAC address string (`AA:BB:CC:DD:EE:FF`).
pub const MAC_ADDRESS_LEN: usize = 17;

/// Length in bytes of a band authentication key.
pub const AUTH_KEY_LEN: usize = 16;

/// A Bluetooth hardware address in canonical form.
///
/// Canonical form is six upper-case hex pairs separated by colons. Parsing
/// accepts either case but nothing else, so two addresses that compare equal
/// always refer to the same radio.
///
/// ```
/// use miband_types::MacAddress;
///
/// let addr: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
/// assert_eq!(addr.as_str(), "AA:BB:CC:DD:EE:FF");
/// assert!("AABBCCDDEEFF".parse::<MacAddress>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct MacAddress(String);

impl MacAddress {
    /// Parse and canonicalize an address.
    pub fn parse(text: &str) -> ParseResult<Self> {
        let text = text.trim();
        let bytes = text.as_bytes();
        if bytes.len() != MAC_ADDRESS_LEN {
            return Err(ParseError::InvalidAddress(text.to_string()));
        }
        for (i, b) in bytes.iter().enumerate() {
            let ok = if i % 3 == 2 {
                *b == b':'
            } else {
                b.is_ascii_hexdigit()
            };
            if !ok {
                return Err(ParseError::InvalidAddress(text.to_string()));
            }
        }
        Ok(Self(text.to_ascii_uppercase()))
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.0
    }
}

impl AsRef<str> for MacAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A 128-bit band authentication key.
///
/// `Debug` never prints the key material.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthKey([u8; AUTH_KEY_LEN]);

impl AuthKey {
    /// Wrap raw key bytes.
    pub const fn new(bytes: [u8; AUTH_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a key from exactly 32 hex digits, most-significant byte first.
    ///
    /// ```
    /// use miband_types::AuthKey;
    ///
    /// let key = AuthKey::from_hex("0123456789abcdef0123456789abcdef").unwrap();
    /// assert_eq!(key.as_bytes()[..2], [0x01, 0x23]);
    /// assert!(AuthKey::from_hex("0123").is_err());
    /// ```
    pub fn from_hex(text: &str) -> ParseResult<Self> {
        let text = text.trim();
        if text.len() != AUTH_KEY_LEN * 2 {
            return Err(ParseError::InvalidKey(format!(
                "expected {} hex digits, got {}",
                AUTH_KEY_LEN * 2,
                text.len()
            )));
        }
        let mut bytes = [0u8; AUTH_KEY_LEN];
        hex::decode_to_slice(text, &mut bytes)
            .map_err(|e| ParseError::InvalidKey(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Build a key from a byte slice of exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> ParseResult<Self> {
        let bytes: [u8; AUTH_KEY_LEN] = bytes.try_into().map_err(|_| {
            ParseError::InvalidKey(format!(
                "expected {} bytes, got {}",
                AUTH_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; AUTH_KEY_LEN] {
        &self.0
    }

    /// Lower-case hex encoding of the key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Key with all but the last four hex digits hidden, for display.
    pub fn masked(&self) -> String {
        let hex = self.to_hex();
        format!("{}{}", "*".repeat(hex.len() - 4), &hex[hex.len() - 4..])
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthKey(..)")
    }
}

/// An address bound to its authentication key, as read from an exported key file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceKeyRecord {
    /// Canonical device address.
    pub address: MacAddress,
    /// Authentication key.
    pub key: AuthKey,
}

/// A reference to a physical band found on the radio.
///
/// A handle is produced by discovery and consumed by a connection attempt;
/// it is not reused once the connection that took it is released.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceHandle {
    /// Canonical device address.
    pub address: MacAddress,
    /// Advertised name, if the band reported one.
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(address: MacAddress, name: Option<String>) -> Self {
        Self { address, name }
    }

    /// Name suitable for display, falling back to `"Unknown"`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.address)
    }
}

/// One heart-rate measurement with its capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BpmSample {
    /// Wall-clock capture time (UTC).
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Beats per minute.
    pub bpm: u16,
}

impl BpmSample {
    pub fn new(timestamp: OffsetDateTime, bpm: u16) -> Self {
        Self { timestamp, bpm }
    }
}

/// Lifecycle of a single monitoring request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SessionState {
    /// No request in progress.
    #[default]
    Idle,
    /// Looking for the band.
    Resolving,
    /// Opening and authenticating the connection.
    Connecting,
    /// Samples are flowing to the sink.
    Streaming,
    /// Releasing the producer, channel and connection.
    Terminating,
    /// The request ended with an error.
    Failed,
}

impl SessionState {
    /// True once the request can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Failed)
    }

    /// True while the request holds or is acquiring the band.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Resolving => "resolving",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Terminating => "terminating",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What the lifecycle reporter shows to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LiveStatus {
    /// Session started; no sample yet.
    #[default]
    Connecting,
    /// Most recent heart rate.
    Bpm(u16),
}

impl fmt::Display for LiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveStatus::Connecting => write!(f, "Connecting…"),
            LiveStatus::Bpm(bpm) => write!(f, "{} bpm", bpm),
        }
    }
}

/// Decode a BLE Heart Rate Measurement value into beats per minute.
///
/// Bit 0 of the flags byte selects between a `u8` and a little-endian `u16`
/// heart-rate field. Trailing fields (energy, RR intervals) are ignored.
///
/// ```
/// use miband_types::parse_heart_rate_measurement;
///
/// assert_eq!(parse_heart_rate_measurement(&[0x00, 72]).unwrap(), 72);
/// assert_eq!(parse_heart_rate_measurement(&[0x01, 0x2C, 0x01]).unwrap(), 300);
/// ```
pub fn parse_heart_rate_measurement(data: &[u8]) -> ParseResult<u16> {
    let mut buf = data;
    if buf.remaining() < 2 {
        return Err(ParseError::InsufficientBytes {
            expected: 2,
            actual: data.len(),
        });
    }
    let flags = buf.get_u8();
    if flags & 0x01 == 0 {
        Ok(u16::from(buf.get_u8()))
    } else if buf.remaining() >= 2 {
        Ok(buf.get_u16_le())
    } else {
        Err(ParseError::InsufficientBytes {
            expected: 3,
            actual: data.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_address_uppercases() {
        let addr = MacAddress::parse("0a:1b:2c:3d:4e:5f").unwrap();
        assert_eq!(addr.to_string(), "0A:1B:2C:3D:4E:5F");
        assert_eq!(addr.as_str().len(), MAC_ADDRESS_LEN);
    }

    #[test]
    fn test_mac_address_rejects_other_shapes() {
        for bad in [
            "",
            "AA:BB:CC:DD:EE",
            "AA-BB-CC-DD-EE-FF",
            "AABBCCDDEEFF",
            "AA:BB:CC:DD:EE:FG",
            "AA:BB:CC:DD:EE:FF:00",
            "A:ABB:CC:DD:EE:FF",
        ] {
            assert!(MacAddress::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_mac_address_equality_is_case_insensitive() {
        let a: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let b: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_auth_key_from_hex() {
        let key = AuthKey::from_hex("0123456789abcdef0123456789abcdef").unwrap();
        assert_eq!(
            key.as_bytes(),
            &[
                0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89,
                0xab, 0xcd, 0xef
            ]
        );
        assert_eq!(key.to_hex(), "0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn test_auth_key_rejects_wrong_length_or_digits() {
        assert!(AuthKey::from_hex("").is_err());
        assert!(AuthKey::from_hex("0123456789abcdef").is_err());
        assert!(AuthKey::from_hex("zz23456789abcdef0123456789abcdef").is_err());
        assert!(AuthKey::from_slice(&[0u8; 15]).is_err());
        assert!(AuthKey::from_slice(&[0u8; 16]).is_ok());
    }

    #[test]
    fn test_auth_key_debug_is_masked() {
        let key = AuthKey::new([0xAB; AUTH_KEY_LEN]);
        let debug = format!("{:?}", key);
        assert!(!debug.contains("ab"));
        assert!(key.masked().ends_with("abab"));
        assert!(key.masked().starts_with("****"));
    }

    #[test]
    fn test_session_state_terminality() {
        assert!(SessionState::Idle.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Streaming.is_active());
        assert!(SessionState::Terminating.is_active());
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[test]
    fn test_live_status_display() {
        assert_eq!(LiveStatus::Connecting.to_string(), "Connecting…");
        assert_eq!(LiveStatus::Bpm(72).to_string(), "72 bpm");
    }

    #[test]
    fn test_parse_heart_rate_u8() {
        assert_eq!(parse_heart_rate_measurement(&[0x00, 0x48]).unwrap(), 72);
        // Trailing RR intervals are ignored.
        assert_eq!(
            parse_heart_rate_measurement(&[0x10, 0x4B, 0x00, 0x04]).unwrap(),
            75
        );
    }

    #[test]
    fn test_parse_heart_rate_u16() {
        assert_eq!(parse_heart_rate_measurement(&[0x01, 0x4A, 0x00]).unwrap(), 74);
    }

    #[test]
    fn test_parse_heart_rate_short_payload() {
        assert!(matches!(
            parse_heart_rate_measurement(&[0x00]),
            Err(ParseError::InsufficientBytes { expected: 2, .. })
        ));
        assert!(matches!(
            parse_heart_rate_measurement(&[0x01, 0x4A]),
            Err(ParseError::InsufficientBytes { expected: 3, .. })
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_bpm_sample_serializes_rfc3339() {
        let sample = BpmSample::new(
            OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            72,
        );
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"2023-11-14T22:13:20Z\""));
        assert!(json.contains("\"bpm\":72"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_mac_address_serde_validates() {
        let addr: MacAddress = serde_json::from_str("\"aa:bb:cc:dd:ee:ff\"").unwrap();
        assert_eq!(addr.as_str(), "AA:BB:CC:DD:EE:FF");
        assert!(serde_json::from_str::<MacAddress>("\"nope\"").is_err());
    }
}
