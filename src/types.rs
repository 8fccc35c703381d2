// =============================================================================
// Shared types used across the Quasar signal engine
// =============================================================================
//
// Every string-tagged category that crosses the feature-vector boundary is a
// closed enum with a stable integer encoding. The encodings feed the ML
// feature schema and must never be renumbered.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Trade direction of an emitted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    /// Feature encoding: LONG = +1, SHORT = -1. Neutral signals are never
    /// persisted, but encode as 0 for completeness.
    pub fn encode(self) -> i8 {
        match self {
            Self::Long => 1,
            Self::Short => -1,
            Self::Neutral => 0,
        }
    }

    /// Direction from the sign of a numeric value.
    pub fn from_sign(v: f64) -> Self {
        if v > 0.0 {
            Self::Long
        } else if v < 0.0 {
            Self::Short
        } else {
            Self::Neutral
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Per-component directional vote inside a fused signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for ComponentDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "BULLISH"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Categorical label for the trading thesis behind an emitted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Early,
    Momentum,
    Reversal,
    Breakout,
}

impl EntryType {
    /// Stable feature encoding.
    pub fn encode(self) -> u8 {
        match self {
            Self::Early => 0,
            Self::Momentum => 1,
            Self::Reversal => 2,
            Self::Breakout => 3,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Early => write!(f, "EARLY"),
            Self::Momentum => write!(f, "MOMENTUM"),
            Self::Reversal => write!(f, "REVERSAL"),
            Self::Breakout => write!(f, "BREAKOUT"),
        }
    }
}

/// Risk classification of an emitted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn encode(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Quality tier returned by the predictor for its own probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityTier {
    High,
    Medium,
    Low,
    Filter,
}

impl QualityTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            "FILTER" => Some(Self::Filter),
            _ => None,
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
            Self::Filter => write!(f, "FILTER"),
        }
    }
}

/// Lifecycle state of a recorded signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pending,
    Win,
    Loss,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Win => "WIN",
            Self::Loss => "LOSS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "WIN" => Some(Self::Win),
            "LOSS" => Some(Self::Loss),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Velocity trend classification relative to the previous observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendState {
    Accelerating,
    Steady,
    Decelerating,
}

impl TrendState {
    pub fn encode(self) -> u8 {
        match self {
            Self::Decelerating => 0,
            Self::Steady => 1,
            Self::Accelerating => 2,
        }
    }
}

impl std::fmt::Display for TrendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accelerating => write!(f, "ACCELERATING"),
            Self::Steady => write!(f, "STEADY"),
            Self::Decelerating => write!(f, "DECELERATING"),
        }
    }
}

/// Multi-timeframe alignment classification across 15m / 1h / 4h.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MtfAlignment {
    StrongBullish,
    Bullish,
    Mixed,
    Bearish,
    StrongBearish,
}

impl MtfAlignment {
    /// Signed encoding: strong bullish +2 … strong bearish -2.
    pub fn encode(self) -> i8 {
        match self {
            Self::StrongBullish => 2,
            Self::Bullish => 1,
            Self::Mixed => 0,
            Self::Bearish => -1,
            Self::StrongBearish => -2,
        }
    }
}

impl std::fmt::Display for MtfAlignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongBullish => write!(f, "STRONG_BULLISH"),
            Self::Bullish => write!(f, "BULLISH"),
            Self::Mixed => write!(f, "MIXED"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::StrongBearish => write!(f, "STRONG_BEARISH"),
        }
    }
}

/// Divergence between the 15m and 4h timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceType {
    None,
    /// 15m falling while 4h rising by >= 2%.
    BearishDivergence,
    /// 15m rising while 4h falling by >= 2%.
    BullishDivergence,
}

impl DivergenceType {
    pub fn encode(self) -> i8 {
        match self {
            Self::None => 0,
            Self::BullishDivergence => 1,
            Self::BearishDivergence => -1,
        }
    }
}

impl std::fmt::Display for DivergenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::BearishDivergence => write!(f, "BEARISH_DIVERGENCE"),
            Self::BullishDivergence => write!(f, "BULLISH_DIVERGENCE"),
        }
    }
}
