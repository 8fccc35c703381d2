// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Every recognised tunable lives here, grouped by subsystem. All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an older
// config file. Persistence uses an atomic tmp + rename pattern to prevent
// corruption on crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineError;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_min_change_24h() -> f64 {
    10.0
}

fn default_critical_change_24h() -> f64 {
    25.0
}

fn default_spike_multiplier() -> f64 {
    3.0
}

fn default_avg_window_minutes() -> u64 {
    60
}

fn default_min_quote_volume() -> f64 {
    1_000_000.0
}

fn default_min_velocity() -> f64 {
    0.5
}

fn default_velocity_window_minutes() -> u64 {
    5
}

fn default_acceleration_threshold() -> f64 {
    0.1
}

fn default_min_range() -> f64 {
    15.0
}

fn default_refresh_ms() -> u64 {
    2_000
}

fn default_max_displayed() -> usize {
    15
}

fn default_true() -> bool {
    true
}

fn default_ml_weight() -> f64 {
    0.6
}

fn default_rule_weight() -> f64 {
    0.4
}

fn default_filter_threshold() -> f64 {
    0.3
}

fn default_min_signals_for_training() -> usize {
    50
}

fn default_emit_threshold() -> f64 {
    60.0
}

fn default_evaluation_time_ms() -> i64 {
    15 * 60 * 1000
}

fn default_funding_secs() -> u64 {
    120
}

fn default_oi_secs() -> u64 {
    120
}

fn default_mtf_secs() -> u64 {
    60
}

fn default_pattern_secs() -> u64 {
    60
}

fn default_entry_timing_secs() -> u64 {
    30
}

fn default_correlation_secs() -> u64 {
    30
}

fn default_whale_secs() -> u64 {
    10
}

fn default_top_picks_secs() -> u64 {
    5
}

fn default_liquidation_secs() -> u64 {
    5
}

fn default_snapshot_secs() -> u64 {
    2
}

fn default_outcome_secs() -> u64 {
    15
}

fn default_save_pulse_secs() -> u64 {
    30
}

// =============================================================================
// Sections
// =============================================================================

/// 24h price-change detector thresholds (percent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityConfig {
    #[serde(default = "default_min_change_24h")]
    pub min_change_24h: f64,

    #[serde(default = "default_critical_change_24h")]
    pub critical_change_24h: f64,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            min_change_24h: default_min_change_24h(),
            critical_change_24h: default_critical_change_24h(),
        }
    }
}

/// Volume spike detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Minimum recent-rate / average-rate ratio to emit a spike alert.
    #[serde(default = "default_spike_multiplier")]
    pub spike_multiplier: f64,

    /// Rolling window over which cumulative volume history is retained.
    #[serde(default = "default_avg_window_minutes")]
    pub avg_window_minutes: u64,

    /// 24h quote volume floor; symbols at or below are excluded.
    #[serde(default = "default_min_quote_volume")]
    pub min_quote_volume: f64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            spike_multiplier: default_spike_multiplier(),
            avg_window_minutes: default_avg_window_minutes(),
            min_quote_volume: default_min_quote_volume(),
        }
    }
}

/// Price velocity detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityConfig {
    /// Minimum |%/minute| to emit.
    #[serde(default = "default_min_velocity")]
    pub min_velocity: f64,

    /// Rolling price-history window in minutes.
    #[serde(default = "default_velocity_window_minutes")]
    pub window_minutes: u64,

    /// Velocity delta beyond which the trend flips accelerating/decelerating.
    #[serde(default = "default_acceleration_threshold")]
    pub acceleration_threshold: f64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            min_velocity: default_min_velocity(),
            window_minutes: default_velocity_window_minutes(),
            acceleration_threshold: default_acceleration_threshold(),
        }
    }
}

/// 24h range detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeConfig {
    /// Minimum (high - low) / open, in percent, to emit.
    #[serde(default = "default_min_range")]
    pub min_range: f64,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            min_range: default_min_range(),
        }
    }
}

/// Dashboard-facing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// Snapshot publish interval.
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,

    /// Top-K cap applied to each category list in the snapshot.
    #[serde(default = "default_max_displayed")]
    pub max_displayed: usize,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            refresh_ms: default_refresh_ms(),
            max_displayed: default_max_displayed(),
        }
    }
}

/// ML enhancement parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Weight of the predictor probability in the blended confidence.
    #[serde(default = "default_ml_weight")]
    pub ml_weight: f64,

    /// Weight of the rule-based confidence in the blended confidence.
    #[serde(default = "default_rule_weight")]
    pub rule_weight: f64,

    /// Signals whose win probability falls below this are tier FILTER.
    #[serde(default = "default_filter_threshold")]
    pub filter_threshold: f64,

    /// Minimum completed records before training is worthwhile.
    #[serde(default = "default_min_signals_for_training")]
    pub min_signals_for_training: usize,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ml_weight: default_ml_weight(),
            rule_weight: default_rule_weight(),
            filter_threshold: default_filter_threshold(),
            min_signals_for_training: default_min_signals_for_training(),
        }
    }
}

/// Per-detector loop cadences, seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default = "default_funding_secs")]
    pub funding_secs: u64,

    #[serde(default = "default_oi_secs")]
    pub open_interest_secs: u64,

    #[serde(default = "default_mtf_secs")]
    pub multi_timeframe_secs: u64,

    #[serde(default = "default_pattern_secs")]
    pub pattern_secs: u64,

    #[serde(default = "default_entry_timing_secs")]
    pub entry_timing_secs: u64,

    #[serde(default = "default_correlation_secs")]
    pub correlation_secs: u64,

    #[serde(default = "default_whale_secs")]
    pub whale_secs: u64,

    #[serde(default = "default_top_picks_secs")]
    pub top_picks_secs: u64,

    #[serde(default = "default_liquidation_secs")]
    pub liquidation_secs: u64,

    #[serde(default = "default_snapshot_secs")]
    pub snapshot_secs: u64,

    #[serde(default = "default_outcome_secs")]
    pub outcome_evaluation_secs: u64,

    #[serde(default = "default_save_pulse_secs")]
    pub save_pulse_secs: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            funding_secs: default_funding_secs(),
            open_interest_secs: default_oi_secs(),
            multi_timeframe_secs: default_mtf_secs(),
            pattern_secs: default_pattern_secs(),
            entry_timing_secs: default_entry_timing_secs(),
            correlation_secs: default_correlation_secs(),
            whale_secs: default_whale_secs(),
            top_picks_secs: default_top_picks_secs(),
            liquidation_secs: default_liquidation_secs(),
            snapshot_secs: default_snapshot_secs(),
            outcome_evaluation_secs: default_outcome_secs(),
            save_pulse_secs: default_save_pulse_secs(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Quasar engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub volatility: VolatilityConfig,

    #[serde(default)]
    pub volume: VolumeConfig,

    #[serde(default)]
    pub velocity: VelocityConfig,

    #[serde(default)]
    pub range: RangeConfig,

    #[serde(default)]
    pub ui: UiConfig,

    #[serde(default)]
    pub ml: MlConfig,

    #[serde(default)]
    pub cadences: CadenceConfig,

    /// Minimum fused confidence for a signal to be recorded for outcome
    /// tracking.
    #[serde(default = "default_emit_threshold")]
    pub emit_threshold: f64,

    /// How long a recorded signal waits before win/loss evaluation. The exit
    /// price is the most recent observed price at that moment, so labels are
    /// biased toward mean-reverting noise; kept configurable on purpose.
    #[serde(default = "default_evaluation_time_ms")]
    pub evaluation_time_ms: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            volatility: VolatilityConfig::default(),
            volume: VolumeConfig::default(),
            velocity: VelocityConfig::default(),
            range: RangeConfig::default(),
            ui: UiConfig::default(),
            ml: MlConfig::default(),
            cadences: CadenceConfig::default(),
            emit_threshold: default_emit_threshold(),
            evaluation_time_ms: default_evaluation_time_ms(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(path = %path.display(), "runtime config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Bounds check, fatal at startup only.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.volatility.min_change_24h <= 0.0
            || self.volatility.critical_change_24h < self.volatility.min_change_24h
        {
            return Err(EngineError::Config(
                "volatility thresholds must satisfy 0 < min_change_24h <= critical_change_24h"
                    .into(),
            ));
        }
        if self.volume.spike_multiplier <= 1.0 {
            return Err(EngineError::Config(
                "volume.spike_multiplier must be > 1".into(),
            ));
        }
        if self.volume.avg_window_minutes == 0 || self.velocity.window_minutes == 0 {
            return Err(EngineError::Config(
                "history windows must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ml.ml_weight) || !(0.0..=1.0).contains(&self.ml.rule_weight)
        {
            return Err(EngineError::Config(
                "ml weights must lie in [0, 1]".into(),
            ));
        }
        if self.emit_threshold < 0.0 || self.emit_threshold > 100.0 {
            return Err(EngineError::Config(
                "emit_threshold must lie in [0, 100]".into(),
            ));
        }
        if self.evaluation_time_ms <= 0 {
            return Err(EngineError::Config(
                "evaluation_time_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
