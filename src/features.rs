// =============================================================================
// Feature Schema — the 35-column vector shared with predictor and store
// =============================================================================
//
// Column order and names are versioned; the predictor and the signal_features
// table both depend on them. Categorical fields carry the stable integer
// encodings from `types`; `direction` is the final column and is ±1.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Schema version written alongside persisted vectors.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Number of feature columns.
pub const FEATURE_COUNT: usize = 35;

/// Ordered column names.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "price_change_24h",
    "price_change_1h",
    "price_change_15m",
    "price_change_5m",
    "high_low_range",
    "price_position",
    "volume_quote_24h",
    "volume_multiplier",
    "volume_change_1h",
    "velocity",
    "acceleration",
    "trend_state",
    "rsi_1h",
    "mtf_alignment",
    "divergence_type",
    "funding_rate",
    "funding_signal",
    "funding_direction_match",
    "oi_change_percent",
    "oi_signal",
    "oi_price_alignment",
    "pattern_type",
    "pattern_confidence",
    "distance_from_level",
    "smart_confidence",
    "component_count",
    "entry_type",
    "risk_level",
    "atr_percent",
    "vwap_distance",
    "risk_reward_ratio",
    "whale_activity",
    "btc_correlation",
    "btc_outperformance",
    "direction",
];

/// One row of the feature schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub price_change_24h: f64,
    pub price_change_1h: f64,
    pub price_change_15m: f64,
    pub price_change_5m: f64,
    pub high_low_range: f64,
    pub price_position: f64,
    pub volume_quote_24h: f64,
    pub volume_multiplier: f64,
    pub volume_change_1h: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub trend_state: f64,
    pub rsi_1h: f64,
    pub mtf_alignment: f64,
    pub divergence_type: f64,
    pub funding_rate: f64,
    pub funding_signal: f64,
    pub funding_direction_match: f64,
    pub oi_change_percent: f64,
    pub oi_signal: f64,
    pub oi_price_alignment: f64,
    pub pattern_type: f64,
    pub pattern_confidence: f64,
    pub distance_from_level: f64,
    pub smart_confidence: f64,
    pub component_count: f64,
    pub entry_type: f64,
    pub risk_level: f64,
    pub atr_percent: f64,
    pub vwap_distance: f64,
    pub risk_reward_ratio: f64,
    pub whale_activity: f64,
    pub btc_correlation: f64,
    pub btc_outperformance: f64,
    /// +1 LONG, -1 SHORT. Required for training; always the last column.
    pub direction: f64,
}

impl FeatureVector {
    /// Columns in schema order.
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.price_change_24h,
            self.price_change_1h,
            self.price_change_15m,
            self.price_change_5m,
            self.high_low_range,
            self.price_position,
            self.volume_quote_24h,
            self.volume_multiplier,
            self.volume_change_1h,
            self.velocity,
            self.acceleration,
            self.trend_state,
            self.rsi_1h,
            self.mtf_alignment,
            self.divergence_type,
            self.funding_rate,
            self.funding_signal,
            self.funding_direction_match,
            self.oi_change_percent,
            self.oi_signal,
            self.oi_price_alignment,
            self.pattern_type,
            self.pattern_confidence,
            self.distance_from_level,
            self.smart_confidence,
            self.component_count,
            self.entry_type,
            self.risk_level,
            self.atr_percent,
            self.vwap_distance,
            self.risk_reward_ratio,
            self.whale_activity,
            self.btc_correlation,
            self.btc_outperformance,
            self.direction,
        ]
    }

    /// Rebuild from columns in schema order.
    pub fn from_array(values: &[f64; FEATURE_COUNT]) -> Self {
        Self {
            price_change_24h: values[0],
            price_change_1h: values[1],
            price_change_15m: values[2],
            price_change_5m: values[3],
            high_low_range: values[4],
            price_position: values[5],
            volume_quote_24h: values[6],
            volume_multiplier: values[7],
            volume_change_1h: values[8],
            velocity: values[9],
            acceleration: values[10],
            trend_state: values[11],
            rsi_1h: values[12],
            mtf_alignment: values[13],
            divergence_type: values[14],
            funding_rate: values[15],
            funding_signal: values[16],
            funding_direction_match: values[17],
            oi_change_percent: values[18],
            oi_signal: values[19],
            oi_price_alignment: values[20],
            pattern_type: values[21],
            pattern_confidence: values[22],
            distance_from_level: values[23],
            smart_confidence: values[24],
            component_count: values[25],
            entry_type: values[26],
            risk_level: values[27],
            atr_percent: values[28],
            vwap_distance: values[29],
            risk_reward_ratio: values[30],
            whale_activity: values[31],
            btc_correlation: values[32],
            btc_outperformance: values[33],
            direction: values[34],
        }
    }

    /// Comma-joined columns. `f64`'s Display is shortest-round-trip, so a
    /// parse of this row reproduces the exact values.
    pub fn to_csv_row(&self) -> String {
        self.to_array()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse a row produced by [`to_csv_row`]. None on wrong arity or a
    /// non-numeric column.
    pub fn from_csv_row(row: &str) -> Option<Self> {
        let mut values = [0.0_f64; FEATURE_COUNT];
        let mut count = 0;
        for (i, field) in row.split(',').enumerate() {
            if i >= FEATURE_COUNT {
                return None;
            }
            values[i] = field.trim().parse().ok()?;
            count += 1;
        }
        (count == FEATURE_COUNT).then(|| Self::from_array(&values))
    }

    /// CSV header in schema order.
    pub fn csv_header() -> String {
        FEATURE_NAMES.join(",")
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FeatureVector {
        let mut values = [0.0_f64; FEATURE_COUNT];
        for (i, v) in values.iter_mut().enumerate() {
            *v = (i as f64) * 1.375 - 7.25 + 1.0 / 3.0;
        }
        values[FEATURE_COUNT - 1] = -1.0;
        FeatureVector::from_array(&values)
    }

    #[test]
    fn names_match_count() {
        assert_eq!(FEATURE_NAMES.len(), FEATURE_COUNT);
        assert_eq!(FEATURE_NAMES[FEATURE_COUNT - 1], "direction");
    }

    #[test]
    fn array_roundtrip_is_exact() {
        let fv = sample();
        let rebuilt = FeatureVector::from_array(&fv.to_array());
        assert_eq!(fv, rebuilt);
    }

    #[test]
    fn csv_roundtrip_is_exact() {
        let fv = sample();
        let rebuilt = FeatureVector::from_csv_row(&fv.to_csv_row()).expect("row should parse");
        for (a, b) in fv.to_array().iter().zip(rebuilt.to_array().iter()) {
            assert!((a - b).abs() < 1e-9, "column drifted: {a} vs {b}");
        }
    }

    #[test]
    fn csv_rejects_wrong_arity() {
        assert!(FeatureVector::from_csv_row("1.0,2.0").is_none());
        let long = vec!["1.0"; FEATURE_COUNT + 1].join(",");
        assert!(FeatureVector::from_csv_row(&long).is_none());
        assert!(FeatureVector::from_csv_row("").is_none());
    }

    #[test]
    fn header_matches_names() {
        let header = FeatureVector::csv_header();
        assert!(header.starts_with("price_change_24h,"));
        assert!(header.ends_with(",direction"));
        assert_eq!(header.split(',').count(), FEATURE_COUNT);
    }
}
