//! DuckDB storage for per-contract synchronisation state and run reports.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::SecondsFormat;
use duckdb::{Connection, params};
use meterlink_core::timefmt;
use meterlink_core::{
    MeasureType, PersistenceError, RunReport, RunStatus, Watermark, WatermarkState, WatermarkStore,
};
use tracing::{debug, info};

use crate::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS contracts (
    contract_id VARCHAR PRIMARY KEY,
    fingerprint VARCHAR,
    metering_point_id VARCHAR,
    pmax_min VARCHAR,
    pmax_max VARCHAR,
    consoglo_min VARCHAR,
    consoglo_max VARCHAR,
    cdc_min VARCHAR,
    cdc_max VARCHAR,
    last_op VARCHAR
);
CREATE TABLE IF NOT EXISTS reports (
    started_at VARCHAR PRIMARY KEY,
    status VARCHAR NOT NULL,
    report VARCHAR NOT NULL
);
";

/// Column order of the watermark bounds in `contracts`.
const BOUND_COLUMNS: [MeasureType; 3] = [MeasureType::Pmax, MeasureType::Consoglo, MeasureType::Cdc];

/// DuckDB store holding one `contracts` row per contract and one `reports`
/// row per run.
///
/// A row is always written whole, so a contract's fingerprint and watermarks
/// change together or not at all. Timestamps are stored as
/// `YYYY-MM-DDTHH:MM:SSZ` strings.
///
/// Use [`open`](Self::open) for in-memory and [`open_persistent`](Self::open_persistent)
/// for file-backed storage that survives across runs.
pub struct DuckStore {
    conn: Mutex<Connection>,
}

struct StoredRow {
    fingerprint: Option<String>,
    metering_point_id: Option<String>,
    bounds: [(Option<String>, Option<String>); 3],
    last_op: Option<String>,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), contracts = store.state_count()?, "opened watermark store");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Other("connection lock poisoned".into()))
    }

    // ── Counts ──

    /// Number of contracts with stored state.
    pub fn state_count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT count(*) FROM contracts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ── Watermark state ──

    /// Stored state of a contract, `None` if it was never synchronised.
    pub fn load_state(&self, contract_id: &str) -> Result<Option<WatermarkState>, StoreError> {
        let conn = self.lock()?;
        let row = conn.query_row(
            "SELECT fingerprint, metering_point_id, pmax_min, pmax_max, consoglo_min, \
             consoglo_max, cdc_min, cdc_max, last_op FROM contracts WHERE contract_id = ?",
            [contract_id],
            |row| {
                Ok(StoredRow {
                    fingerprint: row.get(0)?,
                    metering_point_id: row.get(1)?,
                    bounds: [
                        (row.get(2)?, row.get(3)?),
                        (row.get(4)?, row.get(5)?),
                        (row.get(6)?, row.get(7)?),
                    ],
                    last_op: row.get(8)?,
                })
            },
        );
        let row = match row {
            Ok(row) => row,
            Err(duckdb::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_row(contract_id, row).map(Some)
    }

    /// Insert or replace the whole row of a contract.
    pub fn save_state(&self, contract_id: &str, state: &WatermarkState) -> Result<(), StoreError> {
        let bounds = BOUND_COLUMNS.map(|kind| match state.watermark(kind) {
            Some(w) => (Some(timefmt::format(&w.min())), Some(timefmt::format(&w.max()))),
            None => (None, None),
        });
        let last_op = state.last_op.as_ref().map(timefmt::format);

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO contracts VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                contract_id,
                state.fingerprint,
                state.metering_point_id,
                bounds[0].0,
                bounds[0].1,
                bounds[1].0,
                bounds[1].1,
                bounds[2].0,
                bounds[2].1,
                last_op,
            ],
        )?;
        debug!(contract = %contract_id, "stored contract state");
        Ok(())
    }

    // ── Run reports ──

    /// Insert or replace the report of the run that started at `report.started_at`.
    pub fn save_report(&self, report: &RunReport) -> Result<(), StoreError> {
        let key = report
            .started_at
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        let status = match report.status {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
        };
        let json = serde_json::to_string(report)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO reports VALUES (?, ?, ?)",
            params![key, status, json],
        )?;
        info!(status, contracts = report.num_contracts, "saved run report");
        Ok(())
    }

    /// The most recently started run's report.
    pub fn latest_report(&self) -> Result<Option<RunReport>, StoreError> {
        let conn = self.lock()?;
        let json = conn.query_row(
            "SELECT report FROM reports ORDER BY started_at DESC LIMIT 1",
            [],
            |row| row.get::<_, String>(0),
        );
        match json {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Direct access to the underlying DuckDB connection.
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.lock()
    }
}

fn decode_row(contract_id: &str, row: StoredRow) -> Result<WatermarkState, StoreError> {
    let corrupt = |detail: String| StoreError::Corrupt {
        contract: contract_id.to_string(),
        detail,
    };
    let instant = |s: &str| timefmt::parse(s).ok_or_else(|| corrupt(format!("bad timestamp '{s}'")));

    let mut state = WatermarkState {
        fingerprint: row.fingerprint,
        metering_point_id: row.metering_point_id,
        last_op: row.last_op.as_deref().map(instant).transpose()?,
        ..Default::default()
    };
    for (kind, bounds) in BOUND_COLUMNS.into_iter().zip(row.bounds) {
        let watermark = match bounds {
            (None, None) => None,
            (Some(min), Some(max)) => {
                let (min, max) = (instant(&min)?, instant(&max)?);
                Some(
                    Watermark::new(min, max)
                        .ok_or_else(|| corrupt(format!("{kind} watermark has min after max")))?,
                )
            }
            _ => return Err(corrupt(format!("{kind} watermark has a single bound"))),
        };
        state.set_watermark(kind, watermark);
    }
    Ok(state)
}

#[async_trait]
impl WatermarkStore for DuckStore {
    async fn get(&self, contract_id: &str) -> Result<Option<WatermarkState>, PersistenceError> {
        Ok(self.load_state(contract_id)?)
    }

    async fn upsert(&self, contract_id: &str, state: &WatermarkState) -> Result<(), PersistenceError> {
        Ok(self.save_state(contract_id, state)?)
    }
}
