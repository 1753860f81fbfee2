//! Main store implementation.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use time::OffsetDateTime;
use tracing::{debug, info};

use fireserver_types::{Alarm, FireState, HistoryRecord, SensorReading};

use crate::error::{Error, Result};
use crate::models::NewHistoryEntry;
use crate::queries::HistoryQuery;
use crate::schema;

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based append-only history store.
///
/// A `Store` owns one connection and is `Send` but not `Sync`; share it
/// behind a mutex, or open one store per thread on the same file.
pub struct Store {
    conn: Connection,
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
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL lets the history reader run while the persistence worker appends.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

// History operations
impl Store {
    /// Append one classified reading and return its row id.
    ///
    /// Every call inserts a new row; retries are not deduplicated.
    pub fn append(&self, entry: &NewHistoryEntry) -> Result<i64> {
        let reading = &entry.reading;
        self.conn.execute(
            "INSERT INTO history (device_id, sensor_1, sensor_2, sensor_3,
             raw_1, raw_2, raw_3, status, alarm, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                reading.device_id,
                reading.sensor_1,
                reading.sensor_2,
                reading.sensor_3,
                reading.raw_1,
                reading.raw_2,
                reading.raw_3,
                entry.state.label(),
                entry.alarm.label(),
                entry.created_at.unix_timestamp(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(id, device_id = %reading.device_id, status = %entry.state, "Appended history record");
        Ok(id)
    }

    /// Query history records, newest first unless the query says otherwise.
    pub fn recent(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok(HistoryRow {
                    id: row.get(0)?,
                    device_id: row.get(1)?,
                    sensors: [row.get(2)?, row.get(3)?, row.get(4)?],
                    raw: [row.get(5)?, row.get(6)?, row.get(7)?],
                    status: row.get(8)?,
                    alarm: row.get(9)?,
                    created_at: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(HistoryRow::into_record).collect()
    }

    /// Get the newest record for a device.
    pub fn latest(&self, device_id: &str) -> Result<Option<HistoryRecord>> {
        let query = HistoryQuery::new().device(device_id).limit(1);
        let mut records = self.recent(&query)?;
        Ok(records.pop())
    }

    /// Count history records, optionally for one device.
    pub fn count(&self, device_id: Option<&str>) -> Result<u64> {
        let count: i64 = match device_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM history WHERE device_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }
}

/// A row as SQLite returns it, before domain validation.
struct HistoryRow {
    id: i64,
    device_id: String,
    sensors: [i64; 3],
    raw: [Option<i64>; 3],
    status: String,
    alarm: String,
    created_at: i64,
}

impl HistoryRow {
    fn into_record(self) -> Result<HistoryRecord> {
        let id = self.id;
        let corrupt = |reason: String| Error::CorruptRow { id, reason };

        let mut flags = [0u8; 3];
        for (flag, value) in flags.iter_mut().zip(self.sensors) {
            *flag = u8::try_from(value).map_err(|_| corrupt(format!("sensor value {value}")))?;
        }
        let mut raw = [None; 3];
        for (slot, value) in raw.iter_mut().zip(self.raw) {
            *slot = value
                .map(|v| u16::try_from(v).map_err(|_| corrupt(format!("raw value {v}"))))
                .transpose()?;
        }

        let state = FireState::from_label(&self.status)
            .ok_or_else(|| corrupt(format!("status {:?}", self.status)))?;
        let alarm = Alarm::from_label(&self.alarm)
            .ok_or_else(|| corrupt(format!("alarm {:?}", self.alarm)))?;
        let created_at = OffsetDateTime::from_unix_timestamp(self.created_at)
            .map_err(|e| corrupt(e.to_string()))?;

        // Stored flags are already canonical; keep them as written.
        let reading = SensorReading {
            device_id: self.device_id,
            sensor_1: flags[0],
            sensor_2: flags[1],
            sensor_3: flags[2],
            raw_1: raw[0],
            raw_2: raw[1],
            raw_3: raw[2],
        };

        Ok(HistoryRecord {
            id,
            reading,
            state,
            alarm,
            created_at,
        })
    }
}
