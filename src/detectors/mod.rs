// =============================================================================
// Detectors — independent scanners over the DataStore
// =============================================================================
//
// Every detector is a value holding its own caches with two operations:
//
//   detect() -> Vec<OwnAlert>   pure over the store and the detector's cache
//   update(...)                 for detectors with rolling state or REST data
//
// Detectors are pure with respect to each other; none reads another's alert
// output. The one sanctioned exception is the TopPicker, which ranks symbols
// across the other detectors' caches (the dependency is strictly one-way).
//
// Shared conventions:
//   - Too-short history means the symbol is silently omitted, never NaN.
//   - Alert lists are ordered by descending absolute primary metric, with
//     the symbol as tiebreak.
//   - REST failures keep the previous cache authoritative.
// =============================================================================

pub mod correlation;
pub mod entry_timing;
pub mod funding;
pub mod liquidation;
pub mod multi_timeframe;
pub mod new_listing;
pub mod open_interest;
pub mod pattern;
pub mod range;
pub mod sentiment;
pub mod set;
pub mod top_picks;
pub mod velocity;
pub mod volatility;
pub mod volume;
pub mod whale;

pub use correlation::{CorrelationAlert, CorrelationDetector};
pub use entry_timing::{EntryTimingAlert, EntryTimingDetector};
pub use funding::{FundingAlert, FundingDetector, FundingSignal};
pub use liquidation::{LiquidationAlert, LiquidationDetector, LiquidationIntensity};
pub use multi_timeframe::{MtfAlert, MultiTimeframeDetector};
pub use new_listing::{NewListingAlert, NewListingDetector};
pub use open_interest::{OiAlert, OiSignal, OpenInterestDetector};
pub use pattern::{PatternAlert, PatternDetector, PatternKind};
pub use range::{RangeAlert, RangeDetector, RangePosition};
pub use sentiment::{MarketSentiment, SentimentAlert, SentimentDetector, SymbolSentiment};
pub use set::DetectorSet;
pub use top_picks::{TopPickAlert, TopPicker};
pub use velocity::{VelocityAlert, VelocityDetector};
pub use volatility::{VolatilityAlert, VolatilityDetector};
pub use volume::{VolumeAlert, VolumeDetector};
pub use whale::{WhaleActivity, WhaleAlert, WhaleDetector};

/// Order alerts by descending absolute primary metric, symbol ascending on
/// ties.
pub(crate) fn sort_by_magnitude<T, F>(alerts: &mut [T], symbol: fn(&T) -> &str, metric: F)
where
    F: Fn(&T) -> f64,
{
    alerts.sort_by(|a, b| {
        metric(b)
            .abs()
            .partial_cmp(&metric(a).abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| symbol(a).cmp(symbol(b)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row {
        symbol: String,
        metric: f64,
    }

    #[test]
    fn sort_is_magnitude_then_symbol() {
        let mut rows = vec![
            Row { symbol: "B".into(), metric: -5.0 },
            Row { symbol: "C".into(), metric: 2.0 },
            Row { symbol: "A".into(), metric: 5.0 },
        ];
        sort_by_magnitude(&mut rows, |r| &r.symbol, |r| r.metric);
        let order: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }
}
