// =============================================================================
// Store Port — persistence surface for signals, outcomes and model metrics
// =============================================================================
//
// The engine only ever talks to this trait. A write failure is logged by the
// caller and dropped when the data is recoverable on the next save pulse;
// the pending set in particular is derivable from signal_features rows where
// outcome = PENDING, which is how restarts recover.
// =============================================================================

pub mod sqlite;

pub use sqlite::SqliteStore;

use std::sync::Arc;

use anyhow::Result;

use crate::features::FeatureVector;
use crate::types::{Direction, Outcome, QualityTier};

/// A detector opportunity row, append-only.
#[derive(Debug, Clone)]
pub struct OpportunityRow {
    pub symbol: String,
    pub kind: String,
    pub score: f64,
    pub direction: Direction,
    pub change_24h: Option<f64>,
    pub vol_mult: Option<f64>,
    pub velocity: Option<f64>,
    pub range_pct: Option<f64>,
    pub is_new: bool,
    pub last_price: f64,
    pub created_at: i64,
}

/// An operator-visible alert row, append-only.
#[derive(Debug, Clone)]
pub struct AlertRow {
    pub symbol: String,
    pub kind: String,
    pub message: String,
    pub level: String,
    pub created_at: i64,
}

/// One signal's persisted feature vector and outcome.
#[derive(Debug, Clone)]
pub struct SignalFeaturesRow {
    pub signal_id: String,
    pub symbol: String,
    pub ts: i64,
    pub features: FeatureVector,
    pub outcome: Outcome,
    pub pnl_percent: Option<f64>,
    pub ml_win_probability: Option<f64>,
    pub ml_quality_tier: Option<QualityTier>,
    pub ml_model_version: Option<String>,
}

/// Aggregate metrics for one trained model version.
#[derive(Debug, Clone)]
pub struct ModelMetricsRow {
    pub model_version: String,
    pub training_date: i64,
    pub training_samples: u64,
    pub validation_auc: f64,
    pub validation_accuracy: f64,
    pub win_rate_predicted: f64,
    pub win_rate_actual: f64,
    pub feature_importance_json: String,
}

/// Persistence port.
pub trait Store: Send + Sync {
    fn record_opportunity(&self, row: &OpportunityRow) -> Result<()>;

    fn record_alert(&self, row: &AlertRow) -> Result<()>;

    /// Open a session row; returns its id.
    fn open_session(&self, started_at: i64) -> Result<i64>;

    /// Close a session with its final counters.
    fn close_session(
        &self,
        session_id: i64,
        ended_at: i64,
        total_opportunities: u64,
        total_alerts: u64,
    ) -> Result<()>;

    /// Idempotent upsert keyed on `signal_id`.
    fn upsert_signal_features(&self, row: &SignalFeaturesRow) -> Result<()>;

    /// Flip a signal's outcome and pnl by id.
    fn update_outcome(&self, signal_id: &str, outcome: Outcome, pnl_percent: f64) -> Result<()>;

    /// Rows still awaiting evaluation, for restart recovery.
    fn load_pending(&self) -> Result<Vec<SignalFeaturesRow>>;

    fn record_model_metrics(&self, row: &ModelMetricsRow) -> Result<()>;

    /// Completed rows (WIN or LOSS) as CSV in ascending `ts`.
    fn export_completed_csv(&self) -> Result<String>;
}

/// Shared store handle.
pub type SharedStore = Arc<dyn Store>;
