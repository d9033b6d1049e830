//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Embedded schema migrations, applied in order against `PRAGMA user_version`.
///
/// Every step is additive: new tables, or new columns with defaults.
const MIGRATIONS: &[(i32, &str)] = &[
    (1, include_str!("../../migrations/000001_init.up.sql")),
    (2, include_str!("../../migrations/000002_sent_flag.up.sql")),
    (3, include_str!("../../migrations/000003_settings.up.sql")),
];

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// The two outbox tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbox {
    CellMeasurements,
    TestResults,
}

impl Outbox {
    fn table(&self) -> &'static str {
        match self {
            Outbox::CellMeasurements => "cell_measurements",
            Outbox::TestResults => "test_results",
        }
    }
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let current: i32 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;

        for (version, sql) in MIGRATIONS {
            if *version <= current {
                continue;
            }
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(sql)
                .map_err(|e| DbError::Migration(format!("Migration {} failed: {}", version, e)))?;
            tx.pragma_update(None, "user_version", version)?;
            tx.commit()?;
            tracing::info!("Applied schema migration {}", version);
        }

        Ok(())
    }

    /// Current schema version.
    pub fn schema_version(&self) -> Result<i32, DbError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.pragma_query_value(None, "user_version", |r| r.get(0))?)
    }

    // --- Cell measurements ---

    /// Append a sample as unsent and return its row id.
    pub fn append_sample(&self, sample: &SampleRecord) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cell_measurements (latitude, longitude, timestamp, signal_level, carrier, technology, tac, plmn_id, arfcn, rsrq, rsrp, rscp, ec_no, rx_lev, sent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 0)",
            params![
                sample.latitude,
                sample.longitude,
                sample.captured_at.format(TIME_FORMAT).to_string(),
                sample.signal_level,
                sample.carrier,
                sample.technology.map(|t| t.as_str()),
                sample.tac,
                sample.plmn_id,
                sample.arfcn,
                sample.rsrq,
                sample.rsrp,
                sample.rscp,
                sample.ec_no,
                sample.rx_lev,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All unsent samples in insertion order.
    pub fn unsent_samples(&self) -> Result<Vec<Outboxed<SampleRecord>>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, latitude, longitude, timestamp, signal_level, carrier, technology, tac, plmn_id, arfcn, rsrq, rsrp, rscp, ec_no, rx_lev
             FROM cell_measurements WHERE sent = 0 ORDER BY id ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Outboxed {
                    id: row.get(0)?,
                    record: sample_from_row(row)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(rows)
    }

    // --- Test results ---

    /// Append a suite result as unsent and return its row id.
    pub fn append_probe_result(&self, result: &ProbeResult) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO test_results (latitude, longitude, timestamp, ping, dns, throughput, web, sms, sent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                result.latitude,
                result.longitude,
                result.captured_at.format(TIME_FORMAT).to_string(),
                result.ping_ms,
                result.dns_ms,
                result.throughput_kbps,
                result.web_ms,
                result.sms_ms,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All unsent suite results in insertion order.
    pub fn unsent_probe_results(&self) -> Result<Vec<Outboxed<ProbeResult>>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, latitude, longitude, timestamp, ping, dns, throughput, web, sms
             FROM test_results WHERE sent = 0 ORDER BY id ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let time_str: String = row.get(3)?;
                Ok(Outboxed {
                    id: row.get(0)?,
                    record: ProbeResult {
                        latitude: row.get(1)?,
                        longitude: row.get(2)?,
                        captured_at: parse_db_time(&time_str).unwrap_or_else(Utc::now),
                        ping_ms: row.get(4)?,
                        dns_ms: row.get(5)?,
                        throughput_kbps: row.get(6)?,
                        web_ms: row.get(7)?,
                        sms_ms: row.get(8)?,
                    },
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(rows)
    }

    // --- Reconciliation ---

    /// Mark rows as sent. Ids that are unknown or already sent are ignored.
    ///
    /// Returns the number of rows that changed state.
    pub fn mark_sent(&self, outbox: Outbox, ids: &[i64]) -> Result<usize, DbError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let mut updated = 0;

        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE {} SET sent = 1 WHERE id = ?1 AND sent = 0",
                outbox.table()
            ))?;
            for id in ids {
                updated += stmt.execute(params![id])?;
            }
        }

        tx.commit()?;
        Ok(updated)
    }

    /// Remove rows outright instead of marking them sent.
    pub fn delete(&self, outbox: Outbox, ids: &[i64]) -> Result<usize, DbError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let mut deleted = 0;

        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {} WHERE id = ?1", outbox.table()))?;
            for id in ids {
                deleted += stmt.execute(params![id])?;
            }
        }

        tx.commit()?;
        Ok(deleted)
    }

    /// Count unsent rows in both outboxes.
    pub fn pending_counts(&self) -> Result<PendingCounts, DbError> {
        let conn = self.conn.lock().unwrap();
        let cell_measurements: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cell_measurements WHERE sent = 0",
            [],
            |r| r.get(0),
        )?;
        let test_results: i64 =
            conn.query_row("SELECT COUNT(*) FROM test_results WHERE sent = 0", [], |r| r.get(0))?;
        Ok(PendingCounts {
            cell_measurements,
            test_results,
        })
    }

    // --- Settings ---

    /// Read a settings value.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, DbError> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?;
        Ok(value)
    }

    /// Insert or replace a settings value.
    pub fn put_setting(&self, key: &str, value: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Remove a settings value.
    pub fn delete_setting(&self, key: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }
}

fn sample_from_row(row: &Row<'_>) -> SqlResult<SampleRecord> {
    let time_str: String = row.get(3)?;
    let technology: Option<String> = row.get(6)?;
    Ok(SampleRecord {
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        captured_at: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        signal_level: row.get(4)?,
        carrier: row.get(5)?,
        technology: technology.and_then(|t| t.parse().ok()),
        tac: row.get(7)?,
        plmn_id: row.get(8)?,
        arfcn: row.get(9)?,
        rsrq: row.get(10)?,
        rsrp: row.get(11)?,
        rscp: row.get(12)?,
        ec_no: row.get(13)?,
        rx_lev: row.get(14)?,
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn sample(lat: f64) -> SampleRecord {
        SampleRecord {
            technology: Some(RadioTech::Lte),
            rsrp: Some(-95),
            rsrq: Some(0),
            plmn_id: Some("43211".to_string()),
            ..SampleRecord::location_only(lat, 51.4, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        }
    }

    #[test]
    fn test_outbox_round_trip() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let first = store.append_sample(&sample(35.1)).unwrap();
        let second = store.append_sample(&sample(35.2)).unwrap();

        let unsent = store.unsent_samples().unwrap();
        assert_eq!(unsent.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first, second]);
        assert_eq!(unsent[0].record, sample(35.1));
        // Zero readings survive storage as zero, absent ones as None.
        assert_eq!(unsent[0].record.rsrq, Some(0));
        assert_eq!(unsent[0].record.rscp, None);

        assert_eq!(store.mark_sent(Outbox::CellMeasurements, &[first]).unwrap(), 1);
        let unsent = store.unsent_samples().unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].id, second);
    }

    #[test]
    fn test_mark_sent_is_idempotent() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let id = store.append_probe_result(&ProbeResult::default()).unwrap();
        assert_eq!(store.mark_sent(Outbox::TestResults, &[]).unwrap(), 0);
        assert_eq!(store.mark_sent(Outbox::TestResults, &[id]).unwrap(), 1);
        assert_eq!(store.mark_sent(Outbox::TestResults, &[id]).unwrap(), 0);
        assert_eq!(store.mark_sent(Outbox::TestResults, &[id + 100]).unwrap(), 0);
        assert!(store.unsent_probe_results().unwrap().is_empty());
    }

    #[test]
    fn test_probe_result_sentinels_persist() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let result = ProbeResult {
            captured_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            latitude: None,
            longitude: None,
            ping_ms: Some(PROBE_FAILED),
            web_ms: Some(180),
            dns_ms: None,
            throughput_kbps: Some(0),
            sms_ms: None,
        };
        store.append_probe_result(&result).unwrap();

        let unsent = store.unsent_probe_results().unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].record, result);
        assert!(unsent[0].record.has_failed_run());
    }

    #[test]
    fn test_delete_removes_rows() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let a = store.append_probe_result(&ProbeResult::default()).unwrap();
        let b = store.append_probe_result(&ProbeResult::default()).unwrap();
        assert_eq!(store.delete(Outbox::TestResults, &[a]).unwrap(), 1);

        let counts = store.pending_counts().unwrap();
        assert_eq!(counts.test_results, 1);
        assert_eq!(store.unsent_probe_results().unwrap()[0].id, b);
    }

    #[test]
    fn test_upgrade_from_v1_keeps_rows() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let conn = Connection::open(tmp.path()).unwrap();
            conn.execute_batch(MIGRATIONS[0].1).unwrap();
            conn.pragma_update(None, "user_version", 1).unwrap();
            conn.execute(
                "INSERT INTO cell_measurements (latitude, longitude, timestamp, technology) VALUES (1.0, 2.0, '2024-05-01 12:00:00', 'NR (5G)')",
                [],
            )
            .unwrap();
        }

        let store = Store::new(tmp.path()).unwrap();
        assert_eq!(store.schema_version().unwrap(), 3);

        let unsent = store.unsent_samples().unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].record.technology, Some(RadioTech::Nr));
    }

    #[test]
    fn test_reopen_does_not_rerun_migrations() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let store = Store::new(tmp.path()).unwrap();
            store.append_sample(&sample(1.0)).unwrap();
        }
        let store = Store::new(tmp.path()).unwrap();
        assert_eq!(store.unsent_samples().unwrap().len(), 1);
    }

    #[test]
    fn test_settings_crud() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        assert_eq!(store.get_setting("k").unwrap(), None);
        store.put_setting("k", "v1").unwrap();
        store.put_setting("k", "v2").unwrap();
        assert_eq!(store.get_setting("k").unwrap().as_deref(), Some("v2"));
        store.delete_setting("k").unwrap();
        assert_eq!(store.get_setting("k").unwrap(), None);
    }
}
