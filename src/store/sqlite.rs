// =============================================================================
// SQLite Store — embedded persistence behind the Store port
// =============================================================================
//
// WAL mode so dashboard reads never block the save pulse. The feature columns
// of signal_features are generated from the shared schema so the table can
// never drift from the vector layout.
// =============================================================================

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info};

use crate::features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
use crate::types::{Outcome, QualityTier};

use super::{AlertRow, ModelMetricsRow, OpportunityRow, SignalFeaturesRow, Store};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and initialise) the database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite store at {path}"))?;
        Self::init_schema(&conn)?;
        info!(path, "sqlite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let feature_columns = FEATURE_NAMES
            .iter()
            .map(|name| format!("{name} REAL NOT NULL DEFAULT 0"))
            .collect::<Vec<_>>()
            .join(",\n    ");

        let schema = format!(
            "PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS opportunities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    type TEXT NOT NULL,
    score REAL NOT NULL,
    direction TEXT NOT NULL,
    change24h REAL,
    vol_mult REAL,
    velocity REAL,
    range_pct REAL,
    is_new INTEGER NOT NULL DEFAULT 0,
    last_price REAL NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE(symbol, type, created_at)
);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    level TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    total_opportunities INTEGER NOT NULL DEFAULT 0,
    total_alerts INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS signal_features (
    signal_id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    ts INTEGER NOT NULL,
    {feature_columns},
    outcome TEXT NOT NULL DEFAULT 'PENDING',
    pnl_percent REAL,
    ml_win_probability REAL,
    ml_quality_tier TEXT,
    ml_model_version TEXT
);

CREATE INDEX IF NOT EXISTS idx_signal_features_symbol ON signal_features(symbol);
CREATE INDEX IF NOT EXISTS idx_signal_features_ts ON signal_features(ts);
CREATE INDEX IF NOT EXISTS idx_signal_features_outcome ON signal_features(outcome);

CREATE TABLE IF NOT EXISTS ml_model_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_version TEXT NOT NULL,
    training_date INTEGER NOT NULL,
    training_samples INTEGER NOT NULL,
    validation_auc REAL NOT NULL,
    validation_accuracy REAL NOT NULL,
    win_rate_predicted REAL NOT NULL,
    win_rate_actual REAL NOT NULL,
    feature_importance_json TEXT NOT NULL
);"
        );

        conn.execute_batch(&schema)
            .context("failed to initialise store schema")?;
        Ok(())
    }

    fn row_to_features(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<FeatureVector> {
        let mut values = [0.0_f64; FEATURE_COUNT];
        for (i, v) in values.iter_mut().enumerate() {
            *v = row.get(offset + i)?;
        }
        Ok(FeatureVector::from_array(&values))
    }
}

impl Store for SqliteStore {
    fn record_opportunity(&self, row: &OpportunityRow) -> Result<()> {
        let conn = self.conn.lock();
        // UNIQUE(symbol, type, created_at) makes re-recording idempotent.
        conn.execute(
            "INSERT OR IGNORE INTO opportunities
                (symbol, type, score, direction, change24h, vol_mult, velocity, range_pct,
                 is_new, last_price, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                row.symbol,
                row.kind,
                row.score,
                row.direction.to_string(),
                row.change_24h,
                row.vol_mult,
                row.velocity,
                row.range_pct,
                row.is_new as i64,
                row.last_price,
                row.created_at,
            ],
        )
        .context("failed to insert opportunity")?;
        Ok(())
    }

    fn record_alert(&self, row: &AlertRow) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO alerts (symbol, kind, message, level, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![row.symbol, row.kind, row.message, row.level, row.created_at],
        )
        .context("failed to insert alert")?;
        Ok(())
    }

    fn open_session(&self, started_at: i64) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (started_at) VALUES (?1)",
            params![started_at],
        )
        .context("failed to open session")?;
        Ok(conn.last_insert_rowid())
    }

    fn close_session(
        &self,
        session_id: i64,
        ended_at: i64,
        total_opportunities: u64,
        total_alerts: u64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions
             SET ended_at = ?2, total_opportunities = ?3, total_alerts = ?4
             WHERE id = ?1",
            params![
                session_id,
                ended_at,
                total_opportunities as i64,
                total_alerts as i64
            ],
        )
        .context("failed to close session")?;
        Ok(())
    }

    fn upsert_signal_features(&self, row: &SignalFeaturesRow) -> Result<()> {
        let feature_cols = FEATURE_NAMES.join(", ");
        let feature_placeholders = (4..4 + FEATURE_COUNT)
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let update_cols = FEATURE_NAMES
            .iter()
            .map(|name| format!("{name} = excluded.{name}"))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "INSERT INTO signal_features
                (signal_id, symbol, ts, {feature_cols},
                 outcome, pnl_percent, ml_win_probability, ml_quality_tier, ml_model_version)
             VALUES (?1, ?2, ?3, {feature_placeholders}, ?{o}, ?{p}, ?{w}, ?{q}, ?{m})
             ON CONFLICT(signal_id) DO UPDATE SET
                {update_cols},
                outcome = excluded.outcome,
                pnl_percent = excluded.pnl_percent,
                ml_win_probability = excluded.ml_win_probability,
                ml_quality_tier = excluded.ml_quality_tier,
                ml_model_version = excluded.ml_model_version",
            o = 4 + FEATURE_COUNT,
            p = 5 + FEATURE_COUNT,
            w = 6 + FEATURE_COUNT,
            q = 7 + FEATURE_COUNT,
            m = 8 + FEATURE_COUNT,
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(8 + FEATURE_COUNT);
        values.push(row.signal_id.clone().into());
        values.push(row.symbol.clone().into());
        values.push(row.ts.into());
        for v in row.features.to_array() {
            values.push(v.into());
        }
        values.push(row.outcome.as_str().to_string().into());
        values.push(match row.pnl_percent {
            Some(p) => p.into(),
            None => rusqlite::types::Value::Null,
        });
        values.push(match row.ml_win_probability {
            Some(p) => p.into(),
            None => rusqlite::types::Value::Null,
        });
        values.push(match row.ml_quality_tier {
            Some(t) => t.to_string().into(),
            None => rusqlite::types::Value::Null,
        });
        values.push(match &row.ml_model_version {
            Some(v) => v.clone().into(),
            None => rusqlite::types::Value::Null,
        });

        let conn = self.conn.lock();
        conn.execute(&sql, params_from_iter(values))
            .context("failed to upsert signal features")?;
        debug!(signal_id = %row.signal_id, outcome = %row.outcome, "signal features upserted");
        Ok(())
    }

    fn update_outcome(&self, signal_id: &str, outcome: Outcome, pnl_percent: f64) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE signal_features SET outcome = ?2, pnl_percent = ?3 WHERE signal_id = ?1",
                params![signal_id, outcome.as_str(), pnl_percent],
            )
            .context("failed to update outcome")?;
        if updated == 0 {
            anyhow::bail!("no signal_features row for signal_id {signal_id}");
        }
        Ok(())
    }

    fn load_pending(&self) -> Result<Vec<SignalFeaturesRow>> {
        let feature_cols = FEATURE_NAMES.join(", ");
        let sql = format!(
            "SELECT signal_id, symbol, ts, {feature_cols},
                    outcome, pnl_percent, ml_win_probability, ml_quality_tier, ml_model_version
             FROM signal_features WHERE outcome = 'PENDING' ORDER BY ts ASC"
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).context("failed to prepare pending query")?;
        let rows = stmt
            .query_map([], |row| {
                let features = Self::row_to_features(row, 3)?;
                let outcome: String = row.get(3 + FEATURE_COUNT)?;
                let tier: Option<String> = row.get(6 + FEATURE_COUNT)?;
                Ok(SignalFeaturesRow {
                    signal_id: row.get(0)?,
                    symbol: row.get(1)?,
                    ts: row.get(2)?,
                    features,
                    outcome: Outcome::parse(&outcome).unwrap_or(Outcome::Pending),
                    pnl_percent: row.get(4 + FEATURE_COUNT)?,
                    ml_win_probability: row.get(5 + FEATURE_COUNT)?,
                    ml_quality_tier: tier.as_deref().and_then(QualityTier::parse),
                    ml_model_version: row.get(7 + FEATURE_COUNT)?,
                })
            })
            .context("failed to query pending rows")?;

        let mut pending = Vec::new();
        for row in rows {
            pending.push(row.context("failed to read pending row")?);
        }
        Ok(pending)
    }

    fn record_model_metrics(&self, row: &ModelMetricsRow) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ml_model_metrics
                (model_version, training_date, training_samples, validation_auc,
                 validation_accuracy, win_rate_predicted, win_rate_actual,
                 feature_importance_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.model_version,
                row.training_date,
                row.training_samples as i64,
                row.validation_auc,
                row.validation_accuracy,
                row.win_rate_predicted,
                row.win_rate_actual,
                row.feature_importance_json,
            ],
        )
        .context("failed to insert model metrics")?;
        Ok(())
    }

    fn export_completed_csv(&self) -> Result<String> {
        let feature_cols = FEATURE_NAMES.join(", ");
        let sql = format!(
            "SELECT signal_id, symbol, ts, {feature_cols}, outcome, pnl_percent
             FROM signal_features
             WHERE outcome IN ('WIN', 'LOSS')
             ORDER BY ts ASC"
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).context("failed to prepare export query")?;
        let rows = stmt
            .query_map([], |row| {
                let features = Self::row_to_features(row, 3)?;
                let signal_id: String = row.get(0)?;
                let symbol: String = row.get(1)?;
                let ts: i64 = row.get(2)?;
                let outcome: String = row.get(3 + FEATURE_COUNT)?;
                let pnl: Option<f64> = row.get(4 + FEATURE_COUNT)?;
                Ok((signal_id, symbol, ts, features, outcome, pnl))
            })
            .context("failed to query completed rows")?;

        let mut csv = format!(
            "signal_id,symbol,ts,{},outcome,pnl_percent\n",
            FEATURE_NAMES.join(",")
        );
        for row in rows {
            let (signal_id, symbol, ts, features, outcome, pnl) =
                row.context("failed to read completed row")?;
            let pnl = pnl.map(|p| p.to_string()).unwrap_or_default();
            csv.push_str(&format!(
                "{signal_id},{symbol},{ts},{},{outcome},{pnl}\n",
                features.to_csv_row()
            ));
        }
        Ok(csv)
    }
}

impl SqliteStore {
    /// Re-ingest rows produced by [`Store::export_completed_csv`]. Upserts by
    /// signal id, so importing an export is a no-op on identical data.
    pub fn import_completed_csv(&self, csv: &str) -> Result<usize> {
        let mut imported = 0;
        for (line_no, line) in csv.lines().enumerate() {
            if line_no == 0 || line.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != 3 + FEATURE_COUNT + 2 {
                anyhow::bail!("malformed CSV row at line {}", line_no + 1);
            }

            let feature_row = fields[3..3 + FEATURE_COUNT].join(",");
            let features = FeatureVector::from_csv_row(&feature_row)
                .with_context(|| format!("bad feature columns at line {}", line_no + 1))?;
            let outcome = Outcome::parse(fields[3 + FEATURE_COUNT])
                .with_context(|| format!("bad outcome at line {}", line_no + 1))?;
            let pnl_percent = {
                let raw = fields[4 + FEATURE_COUNT].trim();
                if raw.is_empty() {
                    None
                } else {
                    Some(raw.parse().context("bad pnl_percent")?)
                }
            };

            self.upsert_signal_features(&SignalFeaturesRow {
                signal_id: fields[0].to_string(),
                symbol: fields[1].to_string(),
                ts: fields[2].parse().context("bad ts column")?,
                features,
                outcome,
                pnl_percent,
                ml_win_probability: None,
                ml_quality_tier: None,
                ml_model_version: None,
            })?;
            imported += 1;
        }
        Ok(imported)
    }
}
