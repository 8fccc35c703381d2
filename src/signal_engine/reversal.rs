// =============================================================================
// Reversal Sub-Engine — additive exhaustion triggers
// =============================================================================
//
// Independently of the main fusion, accumulates reversal triggers per symbol:
// RSI extremes, RSI/price divergence, extreme funding, OI divergence and
// volume climax. Each trigger adds 15-25 points of confidence; the first
// trigger to fire sets the direction, and at most one reversal is produced
// per symbol.
// =============================================================================

use serde::Serialize;

use crate::types::Direction;

#[derive(Debug, Clone, Serialize)]
pub struct ReversalSignal {
    pub symbol: String,
    pub direction: Direction,
    pub confidence: f64,
    pub triggers: Vec<String>,
    pub price: f64,
    pub timestamp: i64,
}

/// Everything the trigger evaluation looks at for one symbol.
#[derive(Debug, Clone, Default)]
pub struct ReversalInputs {
    pub change_24h: f64,
    /// 1h RSI where a multi-timeframe refresh exists.
    pub rsi_1h: Option<f64>,
    /// True when the MTF scan reports a 15m-vs-4h divergence.
    pub mtf_divergence: bool,
    /// Funding strength band and contrarian direction, when classified.
    pub funding_strength: Option<(f64, Direction)>,
    /// True when open interest is unwinding (positions closing).
    pub oi_unwinding: bool,
    /// Ungated volume flow multiplier.
    pub volume_multiplier: Option<f64>,
}

const RSI_EXTREME_HIGH: f64 = 75.0;
const RSI_EXTREME_LOW: f64 = 25.0;
const FUNDING_EXTREME_STRENGTH: f64 = 70.0;
const CLIMAX_MULTIPLIER: f64 = 5.0;
const CLIMAX_MOVE_PCT: f64 = 10.0;

/// Evaluate all triggers; None when nothing fires.
pub fn evaluate(symbol: &str, price: f64, now: i64, inputs: &ReversalInputs) -> Option<ReversalSignal> {
    let mut confidence = 0.0;
    let mut triggers = Vec::new();
    let mut direction = Direction::Neutral;

    let mut fire = |points: f64, dir: Direction, name: &str, triggers: &mut Vec<String>| {
        if direction == Direction::Neutral {
            direction = dir;
        }
        confidence += points;
        triggers.push(name.to_string());
    };

    // RSI extreme: stretched momentum snapping back.
    if let Some(rsi) = inputs.rsi_1h {
        if rsi >= RSI_EXTREME_HIGH {
            fire(20.0, Direction::Short, "rsi_overbought", &mut triggers);
        } else if rsi <= RSI_EXTREME_LOW {
            fire(20.0, Direction::Long, "rsi_oversold", &mut triggers);
        }

        // RSI divergence: price pressing on while RSI has already turned.
        if inputs.change_24h > 3.0 && rsi < 45.0 {
            fire(15.0, Direction::Short, "rsi_divergence", &mut triggers);
        } else if inputs.change_24h < -3.0 && rsi > 55.0 {
            fire(15.0, Direction::Long, "rsi_divergence", &mut triggers);
        }
    }

    // Timeframe divergence counts toward the same exhaustion picture.
    if inputs.mtf_divergence {
        let dir = Direction::from_sign(-inputs.change_24h);
        fire(15.0, dir, "mtf_divergence", &mut triggers);
    }

    // Extreme funding: the crowd is paying heavily to stay in.
    if let Some((strength, dir)) = inputs.funding_strength {
        if strength > FUNDING_EXTREME_STRENGTH {
            fire(25.0, dir, "extreme_funding", &mut triggers);
        }
    }

    // OI divergence: participation leaving while price still moves.
    if inputs.oi_unwinding && inputs.change_24h.abs() > 3.0 {
        let dir = Direction::from_sign(-inputs.change_24h);
        fire(15.0, dir, "oi_divergence", &mut triggers);
    }

    // Volume climax: blow-off flow on an already extended move.
    if let Some(multiplier) = inputs.volume_multiplier {
        if multiplier >= CLIMAX_MULTIPLIER && inputs.change_24h.abs() > CLIMAX_MOVE_PCT {
            let dir = Direction::from_sign(-inputs.change_24h);
            fire(20.0, dir, "volume_climax", &mut triggers);
        }
    }

    if triggers.is_empty() || direction == Direction::Neutral {
        return None;
    }

    Some(ReversalSignal {
        symbol: symbol.to_string(),
        direction,
        confidence: confidence.min(100.0),
        triggers,
        price,
        timestamp: now,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_triggers_no_signal() {
        let inputs = ReversalInputs {
            change_24h: 1.0,
            rsi_1h: Some(50.0),
            ..Default::default()
        };
        assert!(evaluate("AAAUSDT", 100.0, 0, &inputs).is_none());
    }

    #[test]
    fn overbought_rsi_fires_short() {
        let inputs = ReversalInputs {
            change_24h: 2.0,
            rsi_1h: Some(80.0),
            ..Default::default()
        };
        let signal = evaluate("AAAUSDT", 100.0, 0, &inputs).unwrap();
        assert_eq!(signal.direction, Direction::Short);
        assert!((signal.confidence - 20.0).abs() < 1e-12);
        assert_eq!(signal.triggers, vec!["rsi_overbought"]);
    }

    #[test]
    fn first_trigger_sets_direction() {
        // RSI oversold fires Long first; extreme funding would prefer Short
        // but only adds confidence.
        let inputs = ReversalInputs {
            change_24h: -4.0,
            rsi_1h: Some(20.0),
            funding_strength: Some((80.0, Direction::Short)),
            ..Default::default()
        };
        let signal = evaluate("AAAUSDT", 100.0, 0, &inputs).unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert!((signal.confidence - 45.0).abs() < 1e-12);
        assert_eq!(signal.triggers.len(), 2);
    }

    #[test]
    fn stacked_triggers_clamp_at_100() {
        let inputs = ReversalInputs {
            change_24h: 15.0,
            rsi_1h: Some(40.0), // divergence against the 24h pump
            mtf_divergence: true,
            funding_strength: Some((90.0, Direction::Short)),
            oi_unwinding: true,
            volume_multiplier: Some(6.0),
        };
        let signal = evaluate("AAAUSDT", 100.0, 0, &inputs).unwrap();
        assert_eq!(signal.direction, Direction::Short);
        assert!(signal.confidence <= 100.0);
        assert!(signal.triggers.len() >= 4);
    }

    #[test]
    fn volume_climax_needs_extended_move() {
        let calm = ReversalInputs {
            change_24h: 2.0,
            volume_multiplier: Some(6.0),
            ..Default::default()
        };
        assert!(evaluate("AAAUSDT", 100.0, 0, &calm).is_none());

        let extended = ReversalInputs {
            change_24h: 12.0,
            volume_multiplier: Some(6.0),
            ..Default::default()
        };
        let signal = evaluate("AAAUSDT", 100.0, 0, &extended).unwrap();
        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.triggers, vec!["volume_climax"]);
    }
}
