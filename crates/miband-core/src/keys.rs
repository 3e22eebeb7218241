//! Extraction of per-device authentication keys from exported key files.
//!
//! Key files are plain text artifacts named `miband<12 upper-case hex>.txt`,
//! each holding one `AA:BB:CC:DD:EE:FF;<32 lower-case hex>` record. Parsing
//! happens in two independent stages:
//!
//! 1. [`is_key_file_name`] decides whether a source is eligible at all.
//! 2. [`parse_key_record`] extracts the record from the source's text.
//!
//! Anything that fails either stage is skipped, never reported as an error:
//! a shared folder is expected to contain unrelated files.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use miband_types::{AuthKey, DeviceKeyRecord, MacAddress};

use crate::error::Result;

static FILE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^miband[0-9A-F]{12}\.txt$").expect("file name pattern is valid")
});

static RECORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-F]{2}(?::[0-9A-F]{2}){5});([0-9a-f]{32})")
        .expect("record pattern is valid")
});

/// Returns true if `name` has the shape of an exported key file.
///
/// ```
/// use miband_core::keys::is_key_file_name;
///
/// assert!(is_key_file_name("miband001122334455.txt"));
/// assert!(!is_key_file_name("miband001122334455.TXT"));
/// assert!(!is_key_file_name("mibandaabbccddeeff.txt"));
/// ```
pub fn is_key_file_name(name: &str) -> bool {
    FILE_NAME_PATTERN.is_match(name)
}

/// Extract a key record from the text of a key file.
///
/// The text is trimmed and searched for the first `MAC;key` match. Returns
/// `None` when nothing matches.
///
/// ```
/// use miband_core::keys::parse_key_record;
///
/// let record = parse_key_record("AA:BB:CC:DD:EE:FF;0123456789abcdef0123456789abcdef\n").unwrap();
/// assert_eq!(record.address.as_str(), "AA:BB:CC:DD:EE:FF");
/// assert_eq!(record.key.as_bytes()[0], 0x01);
/// assert!(parse_key_record("AA:BB:CC:DD:EE:FF;0123").is_none());
/// ```
pub fn parse_key_record(text: &str) -> Option<DeviceKeyRecord> {
    let captures = RECORD_PATTERN.captures(text.trim())?;
    let address = MacAddress::parse(captures.get(1)?.as_str()).ok()?;
    let key = AuthKey::from_hex(captures.get(2)?.as_str()).ok()?;
    Some(DeviceKeyRecord { address, key })
}

/// The addresses of a [`KeyIndex`], used to constrain discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilterSet {
    addresses: BTreeSet<MacAddress>,
}

impl ScanFilterSet {
    /// Filter set matching exactly the given addresses.
    pub fn new(addresses: impl IntoIterator<Item = MacAddress>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
        }
    }

    /// True if `address` is one of the candidates.
    pub fn contains(&self, address: &MacAddress) -> bool {
        self.addresses.contains(address)
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MacAddress> {
        self.addresses.iter()
    }
}

impl FromIterator<MacAddress> for ScanFilterSet {
    fn from_iter<I: IntoIterator<Item = MacAddress>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Mapping from device address to its key record.
///
/// An index is built in one pass and never merged with an older one; rescan
/// the source to get a fresh index.
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    records: HashMap<MacAddress, DeviceKeyRecord>,
}

impl KeyIndex {
    /// Build an index from records; later records replace earlier ones with
    /// the same address.
    pub fn from_records(records: impl IntoIterator<Item = DeviceKeyRecord>) -> Self {
        let mut index = Self::default();
        for record in records {
            index.insert(record);
        }
        index
    }

    fn insert(&mut self, record: DeviceKeyRecord) {
        if self
            .records
            .insert(record.address.clone(), record)
            .is_some()
        {
            debug!("Duplicate key record replaced earlier entry");
        }
    }

    /// Look up the key for `address`.
    pub fn get(&self, address: &MacAddress) -> Option<&DeviceKeyRecord> {
        self.records.get(address)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in address order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceKeyRecord> {
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_by(|a, b| a.address.cmp(&b.address));
        records.into_iter()
    }

    /// Discovery filters derived from this index.
    pub fn filters(&self) -> ScanFilterSet {
        self.records.keys().cloned().collect()
    }
}

/// Builds a [`KeyIndex`] from exported key files.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyExtractor;

impl KeyExtractor {
    /// Build an index from `(name, text)` pairs.
    ///
    /// `text` is `None` for a source that could not be read. Sources are
    /// processed in iteration order, so for duplicate addresses the last
    /// eligible source wins.
    pub fn extract<I, N, T>(blobs: I) -> KeyIndex
    where
        I: IntoIterator<Item = (N, Option<T>)>,
        N: AsRef<str>,
        T: AsRef<str>,
    {
        let mut index = KeyIndex::default();
        for (name, text) in blobs {
            let name = name.as_ref();
            if !is_key_file_name(name) {
                debug!("Skipping {}: not a key file name", name);
                continue;
            }
            let Some(text) = text else {
                debug!("Skipping {}: unreadable", name);
                continue;
            };
            match parse_key_record(text.as_ref()) {
                Some(record) => {
                    debug!("Key record for {} found in {}", record.address, name);
                    index.insert(record);
                }
                None => debug!("Skipping {}: no key record", name),
            }
        }
        index
    }

    /// Build an index from the key files in `dir`.
    ///
    /// Failing to list the folder is an error; individual files that cannot
    /// be read are skipped. Files are processed in name order.
    pub fn scan_dir(dir: impl AsRef<Path>) -> Result<KeyIndex> {
        let dir = dir.as_ref();
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_ok_and(|t| t.is_file()) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();

        let blobs = names.into_iter().filter(|n| is_key_file_name(n)).map(|name| {
            let text = std::fs::read_to_string(dir.join(&name)).ok();
            (name, text)
        });
        let index = Self::extract(blobs);
        info!("Found {} key record(s) in {}", index.len(), dir.display());
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_TEXT: &str = "AA:BB:CC:DD:EE:FF;0123456789abcdef0123456789abcdef";

    fn addr(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_file_name_stage() {
        assert!(is_key_file_name("miband001122334455.txt"));
        assert!(is_key_file_name("mibandABCDEF012345.txt"));
        assert!(!is_key_file_name("miband00112233445.txt"));
        assert!(!is_key_file_name("miband0011223344556.txt"));
        assert!(!is_key_file_name("mibandabcdef012345.txt"));
        assert!(!is_key_file_name("Miband001122334455.txt"));
        assert!(!is_key_file_name("xmiband001122334455.txt"));
        assert!(!is_key_file_name("miband001122334455.txt.bak"));
    }

    #[test]
    fn test_content_stage() {
        let record = parse_key_record(SCENARIO_TEXT).unwrap();
        assert_eq!(record.address, addr("AA:BB:CC:DD:EE:FF"));
        assert_eq!(
            record.key.as_bytes(),
            &[
                0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89,
                0xab, 0xcd, 0xef
            ]
        );
    }

    #[test]
    fn test_content_stage_tolerates_surrounding_text() {
        let text = format!("  \n# exported\n{}\n\n", SCENARIO_TEXT);
        assert!(parse_key_record(&text).is_some());
    }

    #[test]
    fn test_content_stage_rejects_malformed() {
        for bad in [
            "",
            "AA:BB:CC:DD:EE:FF",
            "aa:bb:cc:dd:ee:ff;0123456789abcdef0123456789abcdef",
            "AA:BB:CC:DD:EE:FF;0123456789ABCDEF0123456789ABCDEF",
            "AA:BB:CC:DD:EE:FF 0123456789abcdef0123456789abcdef",
            "AA:BB:CC:DD:EE:FF;0123456789abcdef",
            "AABBCCDDEEFF;0123456789abcdef0123456789abcdef",
        ] {
            assert!(parse_key_record(bad).is_none(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_extract_scenario() {
        let index = KeyExtractor::extract([("miband001122334455.txt", Some(SCENARIO_TEXT))]);
        assert_eq!(index.len(), 1);
        let record = index.get(&addr("AA:BB:CC:DD:EE:FF")).unwrap();
        assert_eq!(record.key.to_hex(), "0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn test_extract_skips_ineligible_and_unreadable() {
        let index = KeyExtractor::extract([
            ("notes.txt", Some(SCENARIO_TEXT)),
            ("miband001122334455.txt", None),
            ("miband00112233445A.txt", Some("garbage")),
        ]);
        assert!(index.is_empty());
    }

    #[test]
    fn test_extract_last_write_wins() {
        let first = "AA:BB:CC:DD:EE:FF;00000000000000000000000000000000";
        let second = "AA:BB:CC:DD:EE:FF;ffffffffffffffffffffffffffffffff";
        let index = KeyExtractor::extract([
            ("miband000000000001.txt", Some(first)),
            ("miband000000000002.txt", Some(second)),
        ]);
        assert_eq!(index.len(), 1);
        let record = index.get(&addr("AA:BB:CC:DD:EE:FF")).unwrap();
        assert_eq!(record.key.as_bytes(), &[0xff; 16]);
    }

    #[test]
    fn test_filters_cover_every_address() {
        let index = KeyExtractor::extract([
            (
                "miband000000000001.txt",
                Some("11:22:33:44:55:66;00000000000000000000000000000000"),
            ),
            ("miband000000000002.txt", Some(SCENARIO_TEXT)),
        ]);
        let filters = index.filters();
        assert_eq!(filters.len(), 2);
        assert!(filters.contains(&addr("11:22:33:44:55:66")));
        assert!(filters.contains(&addr("AA:BB:CC:DD:EE:FF")));
        let addresses: Vec<_> = index.iter().map(|r| r.address.to_string()).collect();
        assert_eq!(addresses, ["11:22:33:44:55:66", "AA:BB:CC:DD:EE:FF"]);
    }

    #[test]
    fn test_scan_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("miband001122334455.txt"), SCENARIO_TEXT).unwrap();
        std::fs::write(dir.path().join("readme.md"), SCENARIO_TEXT).unwrap();
        std::fs::create_dir(dir.path().join("miband00112233445A.txt")).unwrap();

        let index = KeyExtractor::scan_dir(dir.path()).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.get(&addr("AA:BB:CC:DD:EE:FF")).is_some());
    }

    #[test]
    fn test_scan_dir_processes_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("miband00000000000B.txt"),
            "AA:BB:CC:DD:EE:FF;bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("miband00000000000A.txt"),
            "AA:BB:CC:DD:EE:FF;aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        )
        .unwrap();

        let index = KeyExtractor::scan_dir(dir.path()).unwrap();
        let record = index.get(&addr("AA:BB:CC:DD:EE:FF")).unwrap();
        assert_eq!(record.key.as_bytes(), &[0xbb; 16]);
    }

    #[test]
    fn test_scan_dir_empty_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = KeyExtractor::scan_dir(dir.path()).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_scan_dir_missing_folder_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            KeyExtractor::scan_dir(&missing),
            Err(crate::Error::Io(_))
        ));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn valid_records_always_extract(
            mac in proptest::array::uniform6(any::<u8>()),
            key in proptest::array::uniform16(any::<u8>()),
        ) {
            let mac_text = mac
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(":");
            let key_text: String = key.iter().map(|b| format!("{:02x}", b)).collect();
            let record = parse_key_record(&format!("{};{}", mac_text, key_text)).unwrap();
            prop_assert_eq!(record.address.as_str().len(), 17);
            prop_assert_eq!(record.key.as_bytes().len(), 16);
            prop_assert_eq!(record.key.as_bytes(), &key);
        }

        #[test]
        fn arbitrary_text_never_panics(text in ".{0,80}") {
            let _ = parse_key_record(&text);
            let _ = is_key_file_name(&text);
        }

        #[test]
        fn duplicates_keep_only_the_last(keys in proptest::collection::vec(proptest::array::uniform16(any::<u8>()), 1..6)) {
            let blobs: Vec<(String, Option<String>)> = keys
                .iter()
                .enumerate()
                .map(|(i, k)| {
                    let hex: String = k.iter().map(|b| format!("{:02x}", b)).collect();
                    (format!("miband{:012X}.txt", i), Some(format!("AA:BB:CC:DD:EE:FF;{}", hex)))
                })
                .collect();
            let index = KeyExtractor::extract(blobs);
            prop_assert_eq!(index.len(), 1);
            let addr: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
            prop_assert_eq!(index.get(&addr).unwrap().key.as_bytes(), keys.last().unwrap());
        }
    }
}
