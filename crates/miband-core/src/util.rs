//! Peripheral identifier helpers.

use btleplug::platform::PeripheralId;

/// Format a peripheral ID as a plain string.
///
/// On macOS peripheral IDs are UUIDs; elsewhere they wrap the Bluetooth
/// address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    strip_peripheral_id(&format!("{:?}", id)).to_string()
}

/// Identifier for a peripheral: its address, or the peripheral ID when the
/// platform hides the address (macOS reports `00:00:00:00:00:00`).
///
/// Bands are keyed by MAC address, so a hidden address makes a peripheral
/// unmatchable against key files.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_hidden_address(address) {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

fn strip_peripheral_id(debug: &str) -> &str {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
}

fn is_hidden_address(address: &str) -> bool {
    address == "00:00:00:00:00:00"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_peripheral_id() {
        assert_eq!(
            strip_peripheral_id("PeripheralId(AA:BB:CC:DD:EE:FF)"),
            "AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(strip_peripheral_id("hci0/dev_AA"), "hci0/dev_AA");
    }

    #[test]
    fn test_hidden_address() {
        assert!(is_hidden_address("00:00:00:00:00:00"));
        assert!(!is_hidden_address("AA:BB:CC:DD:EE:FF"));
    }
}
