//! SQLite storage adapter.
//!
//! Bars, feature rows, edge candidates and validated setups live in separate
//! tables. Only [`RegistryPort::promote`] writes `validated_setups`.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::domain::bar::{validate_bars, Bar};
use crate::domain::candidate::{CandidateManifest, CandidateStatus, EdgeCandidate};
use crate::domain::error::{LifecycleError, OrbError};
use crate::domain::features::DailyFeatureRow;
use crate::domain::promotion;
use crate::domain::setup::ValidatedSetup;
use crate::ports::bar_port::BarPort;
use crate::ports::config_port::ConfigPort;
use crate::ports::feature_port::FeaturePort;
use crate::ports::registry_port::RegistryPort;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bars (
    instrument TEXT NOT NULL,
    ts TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    PRIMARY KEY (instrument, ts)
);

CREATE TABLE IF NOT EXISTS daily_features (
    instrument TEXT NOT NULL,
    trading_day TEXT NOT NULL,
    row_json TEXT NOT NULL,
    PRIMARY KEY (instrument, trading_day)
);

CREATE TABLE IF NOT EXISTS edge_candidates (
    candidate_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    instrument TEXT,
    manifest_json TEXT NOT NULL,
    status TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    submitted_at TEXT,
    approved_by TEXT,
    approved_at TEXT,
    rejection_reason TEXT,
    promoted_setup_id TEXT UNIQUE,
    promoted_by TEXT,
    promoted_at TEXT
);

CREATE TABLE IF NOT EXISTS candidate_transitions (
    transition_id INTEGER PRIMARY KEY AUTOINCREMENT,
    candidate_id INTEGER NOT NULL REFERENCES edge_candidates(candidate_id),
    from_status TEXT NOT NULL,
    to_status TEXT NOT NULL,
    actor TEXT NOT NULL,
    at TEXT NOT NULL,
    note TEXT
);

CREATE TABLE IF NOT EXISTS validated_setups (
    setup_id TEXT PRIMARY KEY,
    instrument TEXT NOT NULL,
    orb_time TEXT NOT NULL,
    risk_reward REAL NOT NULL,
    stop_mode TEXT NOT NULL,
    size_filter REAL,
    direction_filter TEXT,
    trades INTEGER,
    win_rate REAL NOT NULL,
    avg_r REAL NOT NULL,
    annual_trades REAL NOT NULL,
    tier TEXT NOT NULL,
    validated_date TEXT NOT NULL,
    data_source TEXT NOT NULL,
    code_version TEXT NOT NULL,
    source_candidate_id INTEGER NOT NULL UNIQUE REFERENCES edge_candidates(candidate_id),
    promoted_by TEXT NOT NULL,
    promoted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_validated_setups_key ON validated_setups(instrument, orb_time);
CREATE INDEX IF NOT EXISTS idx_transitions_candidate ON candidate_transitions(candidate_id);
";

const CANDIDATE_COLUMNS: &str = "candidate_id, manifest_json, status, created_by, created_at,
    submitted_at, approved_by, approved_at, rejection_reason,
    promoted_setup_id, promoted_by, promoted_at";

const SETUP_COLUMNS: &str = "setup_id, instrument, orb_time, risk_reward, stop_mode,
    size_filter, direction_filter, trades, win_rate, avg_r, annual_trades, tier,
    validated_date, data_source, code_version, source_candidate_id, promoted_by, promoted_at";

fn query_err(e: rusqlite::Error) -> OrbError {
    OrbError::DatabaseQuery {
        reason: e.to_string(),
    }
}

/// Fixed-width UTC text so lexical order matches time order.
fn ts_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn conversion_err(idx: usize, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(reason),
    )
}

fn parse_ts(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, format!("invalid timestamp `{text}`: {e}")))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| parse_ts(idx, &t)).transpose()
}

fn parse_text<T>(idx: usize, text: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    text.parse().map_err(|e| conversion_err(idx, e))
}

fn parse_day(idx: usize, text: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| conversion_err(idx, format!("invalid date `{text}`: {e}")))
}

fn candidate_from_row(row: &Row<'_>) -> rusqlite::Result<EdgeCandidate> {
    let manifest_json: String = row.get(1)?;
    let manifest: CandidateManifest = serde_json::from_str(&manifest_json)
        .map_err(|e| conversion_err(1, format!("invalid manifest: {e}")))?;
    let status: String = row.get(2)?;
    let created_at: String = row.get(4)?;
    Ok(EdgeCandidate {
        candidate_id: row.get(0)?,
        manifest,
        status: parse_text(2, &status)?,
        created_by: row.get(3)?,
        created_at: parse_ts(4, &created_at)?,
        submitted_at: opt_ts(row, 5)?,
        approved_by: row.get(6)?,
        approved_at: opt_ts(row, 7)?,
        rejection_reason: row.get(8)?,
        promoted_setup_id: row.get(9)?,
        promoted_by: row.get(10)?,
        promoted_at: opt_ts(row, 11)?,
    })
}

fn setup_from_row(row: &Row<'_>) -> rusqlite::Result<ValidatedSetup> {
    let stop_mode: String = row.get(4)?;
    let direction: Option<String> = row.get(6)?;
    let trades: Option<i64> = row.get(7)?;
    let tier: String = row.get(11)?;
    let validated_date: String = row.get(12)?;
    let promoted_at: String = row.get(17)?;
    Ok(ValidatedSetup {
        setup_id: row.get(0)?,
        instrument: row.get(1)?,
        orb_time: row.get(2)?,
        risk_reward: row.get(3)?,
        stop_mode: parse_text(4, &stop_mode)?,
        size_filter: row.get(5)?,
        direction_filter: direction.map(|d| parse_text(6, &d)).transpose()?,
        trades: trades.map(|t| t.max(0) as u64),
        win_rate: row.get(8)?,
        avg_r: row.get(9)?,
        annual_trades: row.get(10)?,
        tier: parse_text(11, &tier)?,
        validated_date: parse_day(12, &validated_date)?,
        data_source: row.get(13)?,
        code_version: row.get(14)?,
        source_candidate_id: row.get(15)?,
        promoted_by: row.get(16)?,
        promoted_at: parse_ts(17, &promoted_at)?,
    })
}

fn load_candidate_in(conn: &Connection, candidate_id: i64) -> Result<EdgeCandidate, OrbError> {
    let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM edge_candidates WHERE candidate_id = ?1");
    conn.query_row(&sql, params![candidate_id], candidate_from_row)
        .optional()
        .map_err(query_err)?
        .ok_or_else(|| LifecycleError::NotFound(candidate_id).into())
}

fn insert_transition(
    conn: &Connection,
    candidate_id: i64,
    from: CandidateStatus,
    to: CandidateStatus,
    actor: &str,
    at: DateTime<Utc>,
    note: Option<&str>,
) -> Result<(), OrbError> {
    conn.execute(
        "INSERT INTO candidate_transitions (candidate_id, from_status, to_status, actor, at, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![candidate_id, from.to_string(), to.to_string(), actor, ts_text(at), note],
    )
    .map_err(query_err)?;
    Ok(())
}

/// One entry of a candidate's audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRecord {
    pub from: CandidateStatus,
    pub to: CandidateStatus,
    pub actor: String,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, OrbError> {
        let db_path = config
            .get_string("sqlite", "path")
            .ok_or_else(|| OrbError::ConfigMissing {
                section: "sqlite".into(),
                key: "path".into(),
            })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path).with_init(|c| {
            c.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
        });
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e: r2d2::Error| OrbError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, OrbError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| OrbError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, OrbError> {
        self.pool.get().map_err(|e: r2d2::Error| OrbError::Database {
            reason: e.to_string(),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), OrbError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_err)?;
        Ok(())
    }

    /// Append bars in one transaction. Each instrument's bars must pass
    /// [`validate_bars`] in the order given. Bars are never overwritten: a
    /// timestamp already stored aborts the whole import.
    pub fn insert_bars(&self, bars: &[Bar]) -> Result<usize, OrbError> {
        let instruments: BTreeSet<&str> = bars.iter().map(|b| b.instrument.as_str()).collect();
        for instrument in instruments {
            let own: Vec<Bar> = bars
                .iter()
                .filter(|b| b.instrument == instrument)
                .cloned()
                .collect();
            validate_bars(instrument, &own)?;
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO bars (instrument, ts, open, high, low, close, volume)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(query_err)?;
            for bar in bars {
                stmt.execute(params![
                    bar.instrument,
                    ts_text(bar.timestamp),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ])
                .map_err(|e| OrbError::DatabaseQuery {
                    reason: format!("{} {}: {e}", bar.instrument, ts_text(bar.timestamp)),
                })?;
            }
        }
        tx.commit().map_err(query_err)?;
        Ok(bars.len())
    }

    /// Audit trail of a candidate, oldest first.
    pub fn transitions(&self, candidate_id: i64) -> Result<Vec<TransitionRecord>, OrbError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT from_status, to_status, actor, at, note FROM candidate_transitions
                 WHERE candidate_id = ?1 ORDER BY transition_id",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![candidate_id], |row| {
                let from: String = row.get(0)?;
                let to: String = row.get(1)?;
                let at: String = row.get(3)?;
                Ok(TransitionRecord {
                    from: parse_text(0, &from)?,
                    to: parse_text(1, &to)?,
                    actor: row.get(2)?,
                    at: parse_ts(3, &at)?,
                    note: row.get(4)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(query_err)
    }
}

impl BarPort for SqliteAdapter {
    fn fetch_bars(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, OrbError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT instrument, ts, open, high, low, close, volume FROM bars
                 WHERE instrument = ?1 AND ts >= ?2 AND ts < ?3
                 ORDER BY ts ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![instrument, ts_text(start), ts_text(end)], |row| {
                let ts: String = row.get(1)?;
                Ok(Bar {
                    instrument: row.get(0)?,
                    timestamp: parse_ts(1, &ts)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    volume: row.get(6)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(query_err)
    }
}

impl FeaturePort for SqliteAdapter {
    fn save_feature_row(&self, row: &DailyFeatureRow) -> Result<(), OrbError> {
        let json = row.to_canonical_json()?;
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO daily_features (instrument, trading_day, row_json)
                 VALUES (?1, ?2, ?3)",
                params![row.instrument, row.trading_day.to_string(), json],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn has_feature_row(&self, instrument: &str, trading_day: NaiveDate) -> Result<bool, OrbError> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM daily_features WHERE instrument = ?1 AND trading_day = ?2",
                params![instrument, trading_day.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        Ok(found.is_some())
    }

    fn load_feature_row(
        &self,
        instrument: &str,
        trading_day: NaiveDate,
    ) -> Result<Option<DailyFeatureRow>, OrbError> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT row_json FROM daily_features WHERE instrument = ?1 AND trading_day = ?2",
                params![instrument, trading_day.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        json.map(|j| DailyFeatureRow::from_json(&j)).transpose()
    }

    fn feature_days(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, OrbError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT trading_day FROM daily_features
                 WHERE instrument = ?1 AND trading_day >= ?2 AND trading_day <= ?3
                 ORDER BY trading_day",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![instrument, start.to_string(), end.to_string()], |row| {
                let day: String = row.get(0)?;
                parse_day(0, &day)
            })
            .map_err(query_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(query_err)
    }
}

impl RegistryPort for SqliteAdapter {
    fn create_candidate(
        &self,
        manifest: &CandidateManifest,
        created_by: &str,
        at: DateTime<Utc>,
    ) -> Result<EdgeCandidate, OrbError> {
        if created_by.trim().is_empty() {
            return Err(LifecycleError::MissingField {
                field: "created_by".into(),
            }
            .into());
        }
        let json = serde_json::to_string(manifest)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO edge_candidates
                 (name, instrument, manifest_json, status, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                manifest.name,
                manifest.instrument.as_deref().map(str::to_uppercase),
                json,
                CandidateStatus::Draft.to_string(),
                created_by.trim(),
                ts_text(at)
            ],
        )
        .map_err(query_err)?;
        let id = conn.last_insert_rowid();
        tracing::info!(candidate_id = id, created_by = created_by.trim(), "candidate created");
        Ok(EdgeCandidate::new(id, manifest.clone(), created_by.trim(), at))
    }

    fn load_candidate(&self, candidate_id: i64) -> Result<EdgeCandidate, OrbError> {
        let conn = self.conn()?;
        load_candidate_in(&conn, candidate_id)
    }

    fn list_candidates(
        &self,
        status: Option<CandidateStatus>,
    ) -> Result<Vec<EdgeCandidate>, OrbError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {CANDIDATE_COLUMNS} FROM edge_candidates
             WHERE ?1 IS NULL OR status = ?1 ORDER BY candidate_id"
        );
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(params![status.map(|s| s.to_string())], candidate_from_row)
            .map_err(query_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(query_err)
    }

    fn record_transition(
        &self,
        prev: CandidateStatus,
        candidate: &EdgeCandidate,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(), OrbError> {
        prev.transition(candidate.status)?;
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let updated = tx
            .execute(
                "UPDATE edge_candidates
                 SET status = ?1, submitted_at = ?2, approved_by = ?3, approved_at = ?4,
                     rejection_reason = ?5
                 WHERE candidate_id = ?6 AND status = ?7",
                params![
                    candidate.status.to_string(),
                    candidate.submitted_at.map(ts_text),
                    candidate.approved_by,
                    candidate.approved_at.map(ts_text),
                    candidate.rejection_reason,
                    candidate.candidate_id,
                    prev.to_string()
                ],
            )
            .map_err(query_err)?;
        if updated == 0 {
            load_candidate_in(&tx, candidate.candidate_id)?;
            return Err(LifecycleError::StaleStatus {
                candidate_id: candidate.candidate_id,
                expected: prev,
            }
            .into());
        }

        insert_transition(
            &tx,
            candidate.candidate_id,
            prev,
            candidate.status,
            actor,
            at,
            candidate.rejection_reason.as_deref(),
        )?;
        tx.commit().map_err(query_err)?;

        tracing::info!(
            candidate_id = candidate.candidate_id,
            from = %prev,
            to = %candidate.status,
            actor,
            "candidate transition"
        );
        Ok(())
    }

    fn promote(
        &self,
        candidate_id: i64,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<ValidatedSetup, OrbError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        // Preconditions are re-checked against the row read inside the
        // transaction; any early return rolls back.
        let mut candidate = load_candidate_in(&tx, candidate_id)?;
        let prev = candidate.status;
        let setup = promotion::promote(&mut candidate, actor, at)?;

        let insert = format!(
            "INSERT INTO validated_setups ({SETUP_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9,
                     ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
        );
        tx.execute(
            &insert,
            params![
                setup.setup_id,
                setup.instrument,
                setup.orb_time,
                setup.risk_reward,
                setup.stop_mode.to_string(),
                setup.size_filter,
                setup.direction_filter.map(|d| d.to_string()),
                setup.trades.map(|t| t as i64),
                setup.win_rate,
                setup.avg_r,
                setup.annual_trades,
                setup.tier.to_string(),
                setup.validated_date.to_string(),
                setup.data_source,
                setup.code_version,
                setup.source_candidate_id,
                setup.promoted_by,
                ts_text(setup.promoted_at)
            ],
        )
        .map_err(query_err)?;

        let updated = tx
            .execute(
                "UPDATE edge_candidates
                 SET status = ?1, promoted_setup_id = ?2, promoted_by = ?3, promoted_at = ?4
                 WHERE candidate_id = ?5 AND status = ?6 AND promoted_setup_id IS NULL",
                params![
                    candidate.status.to_string(),
                    setup.setup_id,
                    setup.promoted_by,
                    ts_text(at),
                    candidate_id,
                    prev.to_string()
                ],
            )
            .map_err(query_err)?;
        if updated != 1 {
            return Err(LifecycleError::StaleStatus {
                candidate_id,
                expected: prev,
            }
            .into());
        }

        insert_transition(
            &tx,
            candidate_id,
            prev,
            candidate.status,
            &setup.promoted_by,
            at,
            Some(&setup.setup_id),
        )?;
        tx.commit().map_err(query_err)?;
        Ok(setup)
    }

    fn validated_setups(&self, instrument: Option<&str>) -> Result<Vec<ValidatedSetup>, OrbError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {SETUP_COLUMNS} FROM validated_setups
             WHERE ?1 IS NULL OR instrument = ?1
             ORDER BY instrument, orb_time, setup_id"
        );
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(params![instrument.map(str::to_uppercase)], setup_from_row)
            .map_err(query_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(query_err)
    }
}
