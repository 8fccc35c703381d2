// =============================================================================
// Signal Engine — weighted fusion of detector outputs
// =============================================================================
//
// Per symbol, per analysis cycle, up to six weighted components are read off
// the detector caches (PriceMovement 20, Volume 15, Velocity 20, Funding 15,
// OpenInterest 10, MultiTimeframe 20) and fused into a directional signal
// with a confluence score and a confidence. A healthy predictor upgrades the
// confidence with a blended win probability; any predictor failure degrades
// silently and the signal ships rule-only.
//
// The engine retains the latest signal per symbol (overwrite semantics) and
// answers the dashboard queries over that map.
// =============================================================================

pub mod reversal;

pub use reversal::{ReversalInputs, ReversalSignal};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::detectors::DetectorSet;
use crate::features::FeatureVector;
use crate::market_data::DataStore;
use crate::predictor::{Prediction, SharedPredictor};
use crate::runtime_config::MlConfig;
use crate::types::{
    ComponentDirection, Direction, DivergenceType, EntryType, MtfAlignment, QualityTier,
    RiskLevel, TrendState,
};

// Fixed component weights.
const WEIGHT_PRICE_MOVEMENT: u32 = 20;
const WEIGHT_VOLUME: u32 = 15;
const WEIGHT_VELOCITY: u32 = 20;
const WEIGHT_FUNDING: u32 = 15;
const WEIGHT_OPEN_INTEREST: u32 = 10;
const WEIGHT_MULTI_TIMEFRAME: u32 = 20;

/// Net weighted score beyond which the fused direction leaves NEUTRAL.
const DIRECTION_NET_THRESHOLD: f64 = 10.0;

/// One detector's contribution to a fused signal.
#[derive(Debug, Clone, Serialize)]
pub struct SignalComponent {
    pub name: String,
    pub direction: ComponentDirection,
    pub strength: f64,
    pub weight: u32,
}

/// A fused, ranked trading signal.
#[derive(Debug, Clone, Serialize)]
pub struct SmartSignal {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub confidence: f64,
    pub confluence_score: f64,
    pub components: Vec<SignalComponent>,
    pub reasoning: Vec<String>,
    pub entry_type: EntryType,
    pub risk_level: RiskLevel,
    pub price: f64,
    pub timestamp: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ml_prediction: Option<Prediction>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_confidence: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_tier: Option<QualityTier>,
}

impl SmartSignal {
    /// Confidence used for ranking: the ML blend when present.
    pub fn effective_confidence(&self) -> f64 {
        self.combined_confidence.unwrap_or(self.confidence)
    }
}

/// Result of the confluence fusion.
#[derive(Debug, Clone, Copy)]
pub struct ConfluenceResult {
    pub net: f64,
    pub confluence: f64,
    pub aligned: usize,
    pub total: usize,
    pub confidence: f64,
    pub direction: Direction,
}

/// Weighted fusion over the present components. None when the list is empty
/// or carries no weight.
pub fn calculate_confluence(components: &[SignalComponent]) -> Option<ConfluenceResult> {
    let total_weight: u32 = components.iter().map(|c| c.weight).sum();
    if components.is_empty() || total_weight == 0 {
        return None;
    }

    let mut bullish = 0.0;
    let mut bearish = 0.0;
    for c in components {
        let contribution = c.strength / 100.0 * c.weight as f64;
        match c.direction {
            ComponentDirection::Bullish => bullish += contribution,
            ComponentDirection::Bearish => bearish += contribution,
            ComponentDirection::Neutral => {}
        }
    }

    let net = bullish - bearish;
    let confluence = net.abs() / total_weight as f64 * 100.0;

    let majority = if net > 0.0 {
        ComponentDirection::Bullish
    } else if net < 0.0 {
        ComponentDirection::Bearish
    } else {
        ComponentDirection::Neutral
    };
    let aligned = components.iter().filter(|c| c.direction == majority).count();
    let total = components.len();

    let confidence = (confluence + aligned as f64 / total as f64 * 20.0).min(100.0);

    let direction = if net > DIRECTION_NET_THRESHOLD {
        Direction::Long
    } else if net < -DIRECTION_NET_THRESHOLD {
        Direction::Short
    } else {
        Direction::Neutral
    };

    Some(ConfluenceResult {
        net,
        confluence,
        aligned,
        total,
        confidence,
        direction,
    })
}

/// Blend the predictor's probability with the rule confidence.
///
/// base = ml·w_ml + rule·w_rule, boosted 10% when both agree strongly
/// (both above 60 or both below 40) and cut 10% when they disagree by more
/// than 30 points.
pub fn blend_confidence(ml: f64, rule: f64, w_ml: f64, w_rule: f64) -> f64 {
    let mut base = ml * w_ml + rule * w_rule;
    if (ml > 60.0 && rule > 60.0) || (ml < 40.0 && rule < 40.0) {
        base *= 1.1;
    }
    if (ml - rule).abs() > 30.0 {
        base *= 0.9;
    }
    base.clamp(0.0, 100.0)
}

// =============================================================================
// Engine
// =============================================================================

pub struct SignalEngine {
    store: Arc<DataStore>,
    detectors: Arc<DetectorSet>,
    ml: MlConfig,
    predictor: Option<SharedPredictor>,
    signals: RwLock<HashMap<String, SmartSignal>>,
    reversals: RwLock<HashMap<String, ReversalSignal>>,
}

impl SignalEngine {
    pub fn new(
        store: Arc<DataStore>,
        detectors: Arc<DetectorSet>,
        ml: MlConfig,
        predictor: Option<SharedPredictor>,
    ) -> Self {
        Self {
            store,
            detectors,
            ml,
            predictor,
            signals: RwLock::new(HashMap::new()),
            reversals: RwLock::new(HashMap::new()),
        }
    }

    /// Symbols with at least one live component source.
    pub fn candidate_symbols(&self) -> Vec<String> {
        let mut symbols = BTreeSet::new();
        for a in self.detectors.volatility.detect() {
            symbols.insert(a.symbol);
        }
        for a in self.detectors.volume.detect() {
            symbols.insert(a.symbol);
        }
        for a in self.detectors.velocity.detect() {
            symbols.insert(a.symbol);
        }
        for a in self.detectors.funding.detect() {
            symbols.insert(a.symbol);
        }
        for a in self.detectors.open_interest.detect() {
            symbols.insert(a.symbol);
        }
        for a in self.detectors.multi_timeframe.detect() {
            symbols.insert(a.symbol);
        }
        symbols.into_iter().collect()
    }

    /// Run one analysis cycle over every candidate symbol, retaining the
    /// latest signal per symbol. Returns the signals produced this cycle.
    pub async fn run_cycle(&self) -> Vec<SmartSignal> {
        let mut produced = Vec::new();

        for symbol in self.candidate_symbols() {
            if let Some(signal) = self.analyze_symbol(&symbol).await {
                self.signals
                    .write()
                    .insert(symbol.clone(), signal.clone());
                produced.push(signal);
            }

            match self.evaluate_reversal(&symbol) {
                Some(reversal) => {
                    self.reversals.write().insert(symbol, reversal);
                }
                None => {
                    self.reversals.write().remove(&symbol);
                }
            }
        }

        produced
    }

    /// Fuse the components for one symbol and, when possible, enhance with
    /// the predictor. None when no component is available.
    pub async fn analyze_symbol(&self, symbol: &str) -> Option<SmartSignal> {
        let ticker = self.store.current(symbol)?;
        let components = self.build_components(symbol);
        if components.is_empty() {
            return None;
        }

        let fusion = calculate_confluence(&components)?;
        let entry_type = self.select_entry_type(symbol, &components);
        let risk_level = select_risk_level(fusion.confluence, &components);
        let reasoning = build_reasoning(&components, &fusion);

        let mut signal = SmartSignal {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            direction: fusion.direction,
            confidence: fusion.confidence,
            confluence_score: fusion.confluence,
            components,
            reasoning,
            entry_type,
            risk_level,
            price: ticker.last_price,
            timestamp: self.store.clock().now_ms(),
            ml_prediction: None,
            combined_confidence: None,
            quality_tier: None,
        };

        if signal.direction != Direction::Neutral {
            self.enhance_with_prediction(&mut signal).await;
        }

        Some(signal)
    }

    /// Best-effort ML enhancement. All failure modes leave the signal as-is.
    async fn enhance_with_prediction(&self, signal: &mut SmartSignal) {
        if !self.ml.enabled {
            return;
        }
        let Some(predictor) = &self.predictor else {
            return;
        };
        if !predictor.health().await {
            debug!(symbol = %signal.symbol, "predictor unhealthy — emitting rule-only signal");
            return;
        }

        let features = self.build_features(&signal.symbol, signal);
        match predictor.predict(&signal.id, &features).await {
            Ok(prediction) => {
                let ml = prediction.win_probability * 100.0;
                let combined =
                    blend_confidence(ml, signal.confidence, self.ml.ml_weight, self.ml.rule_weight);
                signal.quality_tier = Some(prediction.quality_tier);
                signal.combined_confidence = Some(combined);
                signal.ml_prediction = Some(prediction);
            }
            Err(e) => {
                debug!(symbol = %signal.symbol, error = %e, "prediction failed — emitting rule-only signal");
            }
        }
    }

    /// Read up to six weighted components off the detector caches.
    pub fn build_components(&self, symbol: &str) -> Vec<SignalComponent> {
        let mut components = Vec::with_capacity(6);

        if let Some(ticker) = self.store.current(symbol) {
            let change = ticker.price_change_percent;
            components.push(SignalComponent {
                name: "price_movement".to_string(),
                direction: component_direction(change),
                strength: (change.abs() * 4.0).clamp(0.0, 100.0),
                weight: WEIGHT_PRICE_MOVEMENT,
            });

            if let Some(multiplier) = self.detectors.volume.raw_multiplier_for(symbol) {
                components.push(SignalComponent {
                    name: "volume".to_string(),
                    direction: component_direction(change),
                    strength: (multiplier * 20.0).clamp(0.0, 100.0),
                    weight: WEIGHT_VOLUME,
                });
            }
        }

        if let Some((velocity, _accel)) = self.detectors.velocity.velocity_for(symbol) {
            components.push(SignalComponent {
                name: "velocity".to_string(),
                direction: component_direction(velocity),
                strength: (velocity.abs() * 100.0).clamp(0.0, 100.0),
                weight: WEIGHT_VELOCITY,
            });
        }

        if let Some(alert) = self.detectors.funding.alert_for(symbol) {
            components.push(SignalComponent {
                name: "funding".to_string(),
                direction: direction_to_component(alert.direction),
                strength: alert.strength,
                weight: WEIGHT_FUNDING,
            });
        }

        if let Some(alert) = self.detectors.open_interest.alert_for(symbol) {
            components.push(SignalComponent {
                name: "open_interest".to_string(),
                direction: direction_to_component(alert.direction),
                strength: (alert.oi_change_pct.abs() * 10.0).clamp(0.0, 100.0),
                weight: WEIGHT_OPEN_INTEREST,
            });
        }

        if let Some(alert) = self.detectors.multi_timeframe.alert_for(symbol) {
            let strength = match alert.alignment {
                MtfAlignment::StrongBullish | MtfAlignment::StrongBearish => 85.0,
                MtfAlignment::Bullish | MtfAlignment::Bearish => 60.0,
                MtfAlignment::Mixed => 30.0,
            };
            components.push(SignalComponent {
                name: "multi_timeframe".to_string(),
                direction: component_direction(alert.alignment.encode() as f64),
                strength,
                weight: WEIGHT_MULTI_TIMEFRAME,
            });
        }

        components
    }

    /// Entry-type priority: reversal conditions, then early volume, then
    /// breakout, else momentum. First match wins.
    fn select_entry_type(&self, symbol: &str, components: &[SignalComponent]) -> EntryType {
        let strength = |name: &str| {
            components
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.strength)
                .unwrap_or(0.0)
        };

        let divergence = self
            .detectors
            .multi_timeframe
            .alert_for(symbol)
            .map(|a| a.divergence)
            .unwrap_or(DivergenceType::None);

        if divergence != DivergenceType::None || strength("funding") > 70.0 {
            EntryType::Reversal
        } else if strength("volume") > 60.0 && strength("velocity") < 40.0 {
            EntryType::Early
        } else if strength("velocity") > 70.0 && strength("multi_timeframe") > 60.0 {
            EntryType::Breakout
        } else {
            EntryType::Momentum
        }
    }

    /// Run the reversal sub-engine for one symbol.
    fn evaluate_reversal(&self, symbol: &str) -> Option<ReversalSignal> {
        let ticker = self.store.current(symbol)?;
        let mtf = self.detectors.multi_timeframe.alert_for(symbol);

        let inputs = ReversalInputs {
            change_24h: ticker.price_change_percent,
            rsi_1h: mtf.as_ref().map(|a| a.rsi_1h),
            mtf_divergence: mtf
                .as_ref()
                .map(|a| a.divergence != DivergenceType::None)
                .unwrap_or(false),
            funding_strength: self
                .detectors
                .funding
                .alert_for(symbol)
                .map(|a| (a.strength, a.direction)),
            oi_unwinding: self
                .detectors
                .open_interest
                .alert_for(symbol)
                .map(|a| a.signal == crate::detectors::OiSignal::ClosingPositions)
                .unwrap_or(false),
            volume_multiplier: self.detectors.volume.raw_multiplier_for(symbol),
        };

        reversal::evaluate(
            symbol,
            ticker.last_price,
            self.store.clock().now_ms(),
            &inputs,
        )
    }

    /// Assemble the full 35-column feature vector for a fused signal.
    pub fn build_features(&self, symbol: &str, signal: &SmartSignal) -> FeatureVector {
        let mut fv = FeatureVector::default();

        if let Some(t) = self.store.current(symbol) {
            fv.price_change_24h = t.price_change_percent;
            fv.volume_quote_24h = t.quote_volume;
            if t.open_price > 0.0 && t.high_price > t.low_price {
                fv.high_low_range = (t.high_price - t.low_price) / t.open_price * 100.0;
                fv.price_position = (t.last_price - t.low_price) / (t.high_price - t.low_price);
            }
        }

        let prices = self.store.price_history(symbol);
        if let (Some(first), Some(last)) = (prices.first(), prices.last()) {
            if first.value != 0.0 {
                fv.price_change_5m = (last.value - first.value) / first.value * 100.0;
            }
        }
        let volumes = self.store.volume_history(symbol);
        if let (Some(first), Some(last)) = (volumes.first(), volumes.last()) {
            if first.value != 0.0 {
                fv.volume_change_1h = (last.value - first.value) / first.value * 100.0;
            }
        }

        fv.volume_multiplier = self
            .detectors
            .volume
            .raw_multiplier_for(symbol)
            .unwrap_or(1.0);

        if let Some((velocity, acceleration)) = self.detectors.velocity.velocity_for(symbol) {
            fv.velocity = velocity;
            fv.acceleration = acceleration;
            let trend = if acceleration > 0.1 {
                TrendState::Accelerating
            } else if acceleration < -0.1 {
                TrendState::Decelerating
            } else {
                TrendState::Steady
            };
            fv.trend_state = trend.encode() as f64;
        } else {
            fv.trend_state = TrendState::Steady.encode() as f64;
        }

        if let Some(mtf) = self.detectors.multi_timeframe.alert_for(symbol) {
            fv.price_change_1h = mtf.change_1h;
            fv.price_change_15m = mtf.change_15m;
            fv.rsi_1h = mtf.rsi_1h;
            fv.mtf_alignment = mtf.alignment.encode() as f64;
            fv.divergence_type = mtf.divergence.encode() as f64;
        } else {
            fv.rsi_1h = 50.0;
        }

        if let Some(funding) = self.detectors.funding.alert_for(symbol) {
            fv.funding_rate = funding.rate_pct;
            fv.funding_signal = funding.signal.encode() as f64;
            fv.funding_direction_match = if funding.direction == signal.direction {
                1.0
            } else {
                0.0
            };
        } else {
            fv.funding_rate = self.detectors.funding.rate_pct_for(symbol).unwrap_or(0.0);
        }

        if let Some(oi) = self.detectors.open_interest.alert_for(symbol) {
            fv.oi_change_percent = oi.oi_change_pct;
            fv.oi_signal = oi.signal.encode() as f64;
            fv.oi_price_alignment =
                if oi.oi_change_pct.signum() == oi.price_change_pct.signum() {
                    1.0
                } else {
                    -1.0
                };
        }

        if let Some(pattern) = self.detectors.pattern.pattern_for(symbol) {
            fv.pattern_type = pattern.kind.encode() as f64;
            fv.pattern_confidence = pattern.confidence;
            fv.distance_from_level = pattern.distance_pct;
        }

        fv.smart_confidence = signal.confidence;
        fv.component_count = signal.components.len() as f64;
        fv.entry_type = signal.entry_type.encode() as f64;
        fv.risk_level = signal.risk_level.encode() as f64;

        if let Some(plan) = self.detectors.entry_timing.plan_for(symbol) {
            fv.atr_percent = plan.atr_pct;
            fv.vwap_distance = plan.vwap_distance_pct;
            fv.risk_reward_ratio = plan.risk_reward;
        }

        if let Some(whale) = self.detectors.whale.activity_for(symbol) {
            fv.whale_activity = whale.activity.encode() as f64;
        }

        if let Some((correlation, relative)) = self.detectors.correlation.correlation_for(symbol) {
            fv.btc_correlation = correlation;
            fv.btc_outperformance = relative;
        }

        fv.direction = signal.direction.encode() as f64;
        fv
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn signal_for(&self, symbol: &str) -> Option<SmartSignal> {
        self.signals.read().get(symbol).cloned()
    }

    /// Strongest signals by effective confidence, optionally filtered by
    /// direction. Symbol is the tiebreak.
    pub fn top_signals(&self, limit: usize, direction: Option<Direction>) -> Vec<SmartSignal> {
        let mut signals: Vec<SmartSignal> = self
            .signals
            .read()
            .values()
            .filter(|s| direction.map_or(true, |d| s.direction == d))
            .cloned()
            .collect();
        signals.sort_by(|a, b| {
            b.effective_confidence()
                .partial_cmp(&a.effective_confidence())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        signals.truncate(limit);
        signals
    }

    pub fn early_entries(&self) -> Vec<SmartSignal> {
        self.filtered(|s| s.entry_type == EntryType::Early)
    }

    pub fn breakout_candidates(&self) -> Vec<SmartSignal> {
        self.filtered(|s| s.entry_type == EntryType::Breakout)
    }

    pub fn low_risk_setups(&self) -> Vec<SmartSignal> {
        self.filtered(|s| s.risk_level == RiskLevel::Low)
    }

    pub fn reversal_signals(&self) -> Vec<ReversalSignal> {
        let mut reversals: Vec<ReversalSignal> = self.reversals.read().values().cloned().collect();
        reversals.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        reversals
    }

    fn filtered(&self, keep: impl Fn(&SmartSignal) -> bool) -> Vec<SmartSignal> {
        let mut signals: Vec<SmartSignal> = self
            .signals
            .read()
            .values()
            .filter(|s| keep(s) && s.direction != Direction::Neutral)
            .cloned()
            .collect();
        signals.sort_by(|a, b| {
            b.effective_confidence()
                .partial_cmp(&a.effective_confidence())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        signals
    }
}

fn component_direction(value: f64) -> ComponentDirection {
    if value > 0.0 {
        ComponentDirection::Bullish
    } else if value < 0.0 {
        ComponentDirection::Bearish
    } else {
        ComponentDirection::Neutral
    }
}

fn direction_to_component(direction: Direction) -> ComponentDirection {
    match direction {
        Direction::Long => ComponentDirection::Bullish,
        Direction::Short => ComponentDirection::Bearish,
        Direction::Neutral => ComponentDirection::Neutral,
    }
}

/// LOW needs high confluence with broad strong agreement; MEDIUM a majority.
fn select_risk_level(confluence: f64, components: &[SignalComponent]) -> RiskLevel {
    let strong = components.iter().filter(|c| c.strength > 50.0).count();
    if confluence > 70.0 && strong >= 4 {
        RiskLevel::Low
    } else if confluence > 50.0 && strong >= 3 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

fn build_reasoning(components: &[SignalComponent], fusion: &ConfluenceResult) -> Vec<String> {
    let mut reasoning: Vec<String> = components
        .iter()
        .filter(|c| c.direction != ComponentDirection::Neutral && c.strength > 0.0)
        .map(|c| format!("{} {} at strength {:.0}", c.name, c.direction, c.strength))
        .collect();
    reasoning.push(format!(
        "{} of {} components aligned, confluence {:.1}",
        fusion.aligned, fusion.total, fusion.confluence
    ));
    reasoning
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str, direction: ComponentDirection, strength: f64, weight: u32) -> SignalComponent {
        SignalComponent {
            name: name.to_string(),
            direction,
            strength,
            weight,
        }
    }

    /// The six-component fusion example: five bullish components against one
    /// neutral produce a LONG with confluence = net and a 5/6 alignment
    /// bonus.
    #[test]
    fn fusion_example() {
        let components = vec![
            component("price_movement", ComponentDirection::Bullish, 60.0, 20),
            component("volume", ComponentDirection::Bullish, 70.0, 15),
            component("velocity", ComponentDirection::Bullish, 55.0, 20),
            component("funding", ComponentDirection::Neutral, 30.0, 15),
            component("open_interest", ComponentDirection::Bullish, 50.0, 10),
            component("multi_timeframe", ComponentDirection::Bullish, 80.0, 20),
        ];

        let fusion = calculate_confluence(&components).unwrap();
        // net = 0.60*20 + 0.70*15 + 0.55*20 + 0.50*10 + 0.80*20 = 54.5
        assert!((fusion.net - 54.5).abs() < 1e-9, "net {}", fusion.net);
        assert!((fusion.confluence - 54.5).abs() < 1e-9);
        assert_eq!(fusion.aligned, 5);
        assert_eq!(fusion.total, 6);
        let expected_confidence = (54.5_f64 + 5.0 / 6.0 * 20.0).min(100.0);
        assert!((fusion.confidence - expected_confidence).abs() < 1e-9);
        assert_eq!(fusion.direction, Direction::Long);
    }

    #[test]
    fn fusion_bounds_and_direction_threshold() {
        // Weak, conflicted components: inside the neutral band.
        let components = vec![
            component("price_movement", ComponentDirection::Bullish, 30.0, 20),
            component("velocity", ComponentDirection::Bearish, 20.0, 20),
        ];
        let fusion = calculate_confluence(&components).unwrap();
        assert!(fusion.confluence >= 0.0 && fusion.confluence <= 100.0);
        assert!(fusion.confidence >= 0.0 && fusion.confidence <= 100.0);
        assert_eq!(fusion.direction, Direction::Neutral);
        assert!(fusion.net.abs() <= DIRECTION_NET_THRESHOLD);

        // A non-neutral direction implies |net| beyond the threshold.
        let strong = vec![
            component("price_movement", ComponentDirection::Bearish, 90.0, 20),
            component("velocity", ComponentDirection::Bearish, 80.0, 20),
        ];
        let fusion = calculate_confluence(&strong).unwrap();
        assert_eq!(fusion.direction, Direction::Short);
        assert!(fusion.net.abs() > DIRECTION_NET_THRESHOLD);
    }

    #[test]
    fn fusion_rejects_empty() {
        assert!(calculate_confluence(&[]).is_none());
    }

    /// ml = 80, rule = 70, weights 0.6/0.4: base 76, agreement boost 1.1,
    /// no disagreement penalty => 83.6.
    #[test]
    fn ml_blend_example() {
        let combined = blend_confidence(80.0, 70.0, 0.6, 0.4);
        assert!((combined - 83.6).abs() < 1e-9, "combined {combined}");
    }

    #[test]
    fn ml_blend_neutral_midpoint_is_identity() {
        // With weights summing to 1, ml = rule = 50 stays 50 (no boost, no
        // penalty).
        let combined = blend_confidence(50.0, 50.0, 0.6, 0.4);
        assert!((combined - 50.0).abs() < 1e-9);
        let combined = blend_confidence(50.0, 50.0, 0.3, 0.7);
        assert!((combined - 50.0).abs() < 1e-9);
    }

    #[test]
    fn ml_blend_penalty_and_clamp() {
        // Strong disagreement takes the 0.9 haircut.
        let combined = blend_confidence(90.0, 20.0, 0.5, 0.5);
        assert!((combined - 55.0 * 0.9).abs() < 1e-9);

        // Blend never exceeds 100.
        let combined = blend_confidence(100.0, 100.0, 0.6, 0.4);
        assert!((combined - 100.0).abs() < 1e-9);
    }

    #[test]
    fn risk_level_rules() {
        let strong4 = vec![
            component("a", ComponentDirection::Bullish, 60.0, 20),
            component("b", ComponentDirection::Bullish, 70.0, 15),
            component("c", ComponentDirection::Bullish, 80.0, 20),
            component("d", ComponentDirection::Bullish, 90.0, 20),
        ];
        assert_eq!(select_risk_level(75.0, &strong4), RiskLevel::Low);
        assert_eq!(select_risk_level(60.0, &strong4), RiskLevel::Medium);
        assert_eq!(select_risk_level(40.0, &strong4), RiskLevel::High);

        let strong2 = vec![
            component("a", ComponentDirection::Bullish, 60.0, 20),
            component("b", ComponentDirection::Bullish, 70.0, 15),
        ];
        assert_eq!(select_risk_level(80.0, &strong2), RiskLevel::High);
    }
}
