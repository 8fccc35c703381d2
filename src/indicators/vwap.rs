// =============================================================================
// Volume-Weighted Average Price
// =============================================================================
//
// VWAP over the trailing window: sum(typical * volume) / sum(volume) with
// typical price (H + L + C) / 3.
// =============================================================================

use crate::market_data::Candle;

/// VWAP over the last `window` candles (oldest first input).
///
/// Returns None when there are fewer than `window` candles or the window's
/// total volume is zero.
pub fn calculate_vwap(candles: &[Candle], window: usize) -> Option<f64> {
    if window == 0 || candles.len() < window {
        return None;
    }

    let tail = &candles[candles.len() - window..];
    let (pv_sum, vol_sum) = tail.iter().fold((0.0_f64, 0.0_f64), |(pv, vol), c| {
        (pv + c.typical_price() * c.volume, vol + c.volume)
    });

    if vol_sum == 0.0 || !pv_sum.is_finite() {
        return None;
    }
    Some(pv_sum / vol_sum)
}

/// Signed distance of `price` from the window VWAP, in percent of VWAP.
pub fn vwap_distance_pct(candles: &[Candle], window: usize, price: f64) -> Option<f64> {
    let vwap = calculate_vwap(candles, window)?;
    (vwap != 0.0).then(|| (price - vwap) / vwap * 100.0)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64, volume: f64) -> Candle {
        let mut c = Candle::new(0, close, high, low, close, volume, 0);
        c.quote_volume = close * volume;
        c
    }

    #[test]
    fn short_input_yields_none() {
        let candles = vec![candle(101.0, 99.0, 100.0, 10.0); 5];
        assert!(calculate_vwap(&candles, 20).is_none());
        assert!(calculate_vwap(&candles, 0).is_none());
    }

    #[test]
    fn uniform_candles_vwap_equals_typical() {
        let candles = vec![candle(102.0, 98.0, 100.0, 10.0); 20];
        let vwap = calculate_vwap(&candles, 20).unwrap();
        assert!((vwap - 100.0).abs() < 1e-10);
    }

    #[test]
    fn volume_weighting_pulls_toward_heavy_bars() {
        let mut candles = vec![candle(101.0, 99.0, 100.0, 1.0); 19];
        candles.push(candle(201.0, 199.0, 200.0, 100.0));
        let vwap = calculate_vwap(&candles, 20).unwrap();
        assert!(vwap > 180.0, "heavy bar should dominate, got {vwap}");
    }

    #[test]
    fn zero_volume_yields_none() {
        let candles = vec![candle(101.0, 99.0, 100.0, 0.0); 20];
        assert!(calculate_vwap(&candles, 20).is_none());
    }

    #[test]
    fn distance_is_signed() {
        let candles = vec![candle(102.0, 98.0, 100.0, 10.0); 20];
        let above = vwap_distance_pct(&candles, 20, 110.0).unwrap();
        let below = vwap_distance_pct(&candles, 20, 90.0).unwrap();
        assert!(above > 0.0 && below < 0.0);
        assert!((above - 10.0).abs() < 1e-9);
    }
}
