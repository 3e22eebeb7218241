//! Main store implementation.

use std::io::Write;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

use miband_types::{BpmSample, DeviceHandle};

use crate::error::{Error, Result};
use crate::models::{StoredDevice, StoredSample, from_micros, from_seconds, to_micros};
use crate::queries::SampleQuery;
use crate::schema;

/// SQLite-based store for heart-rate samples.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    // === Device operations ===

    /// Get or create a device entry, refreshing its name and last-seen time.
    pub fn upsert_device(&self, device_id: &str, name: Option<&str>) -> Result<StoredDevice> {
        let now = OffsetDateTime::now_utc().unix_timestamp();

        self.conn.execute(
            "INSERT INTO devices (id, name, first_seen, last_seen) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET
                name = COALESCE(?2, name),
                last_seen = ?3",
            rusqlite::params![device_id, name, now],
        )?;

        self.get_device(device_id)?
            .ok_or_else(|| Error::InvalidValue(format!("device {} vanished", device_id)))
    }

    /// Get a device by address.
    pub fn get_device(&self, device_id: &str) -> Result<Option<StoredDevice>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, first_seen, last_seen FROM devices WHERE id = ?",
                [device_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(device_from_parts).transpose()
    }

    /// List all devices, most recently seen first.
    pub fn list_devices(&self) -> Result<Vec<StoredDevice>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, first_seen, last_seen FROM devices ORDER BY last_seen DESC")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(device_from_parts).collect()
    }
}

fn device_from_parts(
    (id, name, first_seen, last_seen): (String, Option<String>, i64, i64),
) -> Result<StoredDevice> {
    Ok(StoredDevice {
        id,
        name,
        first_seen: from_seconds(first_seen)?,
        last_seen: from_seconds(last_seen)?,
    })
}

type SampleRow = (i64, String, i64, i64);

fn sample_row(row: &Row<'_>) -> rusqlite::Result<SampleRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn sample_from_row((id, device_id, captured_at_us, bpm): SampleRow) -> Result<StoredSample> {
    let bpm = u16::try_from(bpm).map_err(|_| Error::InvalidValue(format!("bpm {}", bpm)))?;
    Ok(StoredSample {
        id,
        device_id,
        captured_at: from_micros(captured_at_us)?,
        bpm,
    })
}

// Sample operations
impl Store {
    /// Insert one sample for `device`.
    pub fn insert_sample(&self, device: &DeviceHandle, sample: &BpmSample) -> Result<i64> {
        let device_id = device.address.as_str();
        self.upsert_device(device_id, device.name.as_deref())?;

        self.conn.execute(
            "INSERT INTO heart_rate (device_id, captured_at_us, bpm) VALUES (?1, ?2, ?3)",
            rusqlite::params![device_id, to_micros(sample.timestamp), sample.bpm],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Query samples with filters.
    pub fn query_samples(&self, query: &SampleQuery) -> Result<Vec<StoredSample>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), sample_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(sample_from_row).collect()
    }

    /// Most recent sample for a band.
    pub fn latest_sample(&self, device_id: &str) -> Result<Option<StoredSample>> {
        let query = SampleQuery::new().device(device_id).limit(1);
        let mut samples = self.query_samples(&query)?;
        Ok(samples.pop())
    }

    /// Count samples, for one band or all of them.
    pub fn count_samples(&self, device_id: Option<&str>) -> Result<u64> {
        let count: i64 = match device_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM heart_rate WHERE device_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM heart_rate", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// Write the samples matching `query` as CSV with a header row.
    ///
    /// Returns the number of data rows written.
    pub fn export_csv<W: Write>(&self, query: &SampleQuery, writer: W) -> Result<usize> {
        let samples = self.query_samples(query)?;
        let mut csv = csv::Writer::from_writer(writer);

        csv.write_record(["device_id", "captured_at", "bpm"])?;
        for sample in &samples {
            let captured_at = sample
                .captured_at
                .format(&Rfc3339)
                .map_err(|e| Error::InvalidValue(e.to_string()))?;
            csv.write_record([
                sample.device_id.as_str(),
                captured_at.as_str(),
                sample.bpm.to_string().as_str(),
            ])?;
        }
        csv.flush()?;

        Ok(samples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn band(address: &str) -> DeviceHandle {
        DeviceHandle::new(address.parse().unwrap(), Some("Mi Smart Band 4".into()))
    }

    fn sample_at(offset_secs: i64, bpm: u16) -> BpmSample {
        let base = OffsetDateTime::from_unix_timestamp(1_709_294_400).unwrap();
        BpmSample::new(base + Duration::seconds(offset_secs), bpm)
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.list_devices().unwrap().is_empty());
        assert_eq!(store.count_samples(None).unwrap(), 0);
    }

    #[test]
    fn test_upsert_device_keeps_name() {
        let store = Store::open_in_memory().unwrap();

        let device = store
            .upsert_device("AA:BB:CC:DD:EE:FF", Some("Band"))
            .unwrap();
        assert_eq!(device.name.as_deref(), Some("Band"));

        let device = store.upsert_device("AA:BB:CC:DD:EE:FF", None).unwrap();
        assert_eq!(device.name.as_deref(), Some("Band"));
    }

    #[test]
    fn test_insert_and_query_in_order() {
        let store = Store::open_in_memory().unwrap();
        let device = band("AA:BB:CC:DD:EE:FF");
        for (i, bpm) in [72, 75, 74].into_iter().enumerate() {
            store.insert_sample(&device, &sample_at(i as i64, bpm)).unwrap();
        }

        let newest_first = store.query_samples(&SampleQuery::new()).unwrap();
        let bpms: Vec<u16> = newest_first.iter().map(|s| s.bpm).collect();
        assert_eq!(bpms, vec![74, 75, 72]);

        let oldest_first = store
            .query_samples(&SampleQuery::new().oldest_first())
            .unwrap();
        let bpms: Vec<u16> = oldest_first.iter().map(|s| s.bpm).collect();
        assert_eq!(bpms, vec![72, 75, 74]);
    }

    #[test]
    fn test_sub_second_timestamps_are_distinct() {
        let store = Store::open_in_memory().unwrap();
        let device = band("AA:BB:CC:DD:EE:FF");
        let base = sample_at(0, 70).timestamp;
        store
            .insert_sample(&device, &BpmSample::new(base, 70))
            .unwrap();
        store
            .insert_sample(&device, &BpmSample::new(base + Duration::microseconds(1), 71))
            .unwrap();

        let samples = store
            .query_samples(&SampleQuery::new().oldest_first())
            .unwrap();
        assert!(samples[0].captured_at < samples[1].captured_at);
    }

    #[test]
    fn test_filters() {
        let store = Store::open_in_memory().unwrap();
        let a = band("AA:BB:CC:DD:EE:FF");
        let b = band("11:22:33:44:55:66");
        store.insert_sample(&a, &sample_at(0, 60)).unwrap();
        store.insert_sample(&a, &sample_at(60, 61)).unwrap();
        store.insert_sample(&b, &sample_at(120, 90)).unwrap();

        assert_eq!(store.count_samples(Some("AA:BB:CC:DD:EE:FF")).unwrap(), 2);
        assert_eq!(store.count_samples(None).unwrap(), 3);

        let since = sample_at(30, 0).timestamp;
        let recent = store
            .query_samples(&SampleQuery::new().device("AA:BB:CC:DD:EE:FF").since(since))
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].bpm, 61);

        let limited = store.query_samples(&SampleQuery::new().limit(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].bpm, 90);

        assert_eq!(store.list_devices().unwrap().len(), 2);
    }

    #[test]
    fn test_latest_sample() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.latest_sample("AA:BB:CC:DD:EE:FF").unwrap().is_none());

        let device = band("AA:BB:CC:DD:EE:FF");
        store.insert_sample(&device, &sample_at(0, 60)).unwrap();
        store.insert_sample(&device, &sample_at(5, 65)).unwrap();
        let latest = store.latest_sample("AA:BB:CC:DD:EE:FF").unwrap().unwrap();
        assert_eq!(latest.bpm, 65);
    }

    #[test]
    fn test_export_csv() {
        let store = Store::open_in_memory().unwrap();
        let device = band("AA:BB:CC:DD:EE:FF");
        store.insert_sample(&device, &sample_at(0, 72)).unwrap();
        store.insert_sample(&device, &sample_at(1, 75)).unwrap();

        let mut out = Vec::new();
        let rows = store
            .export_csv(&SampleQuery::new().oldest_first(), &mut out)
            .unwrap();
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "device_id,captured_at,bpm");
        assert_eq!(lines[1], "AA:BB:CC:DD:EE:FF,2024-03-01T12:00:00Z,72");
        assert_eq!(lines[2], "AA:BB:CC:DD:EE:FF,2024-03-01T12:00:01Z,75");
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");
        let store = Store::open(&path).unwrap();
        store
            .insert_sample(&band("AA:BB:CC:DD:EE:FF"), &sample_at(0, 70))
            .unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.count_samples(None).unwrap(), 1);
    }
}
