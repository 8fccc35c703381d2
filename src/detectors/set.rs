// =============================================================================
// DetectorSet — the wired detector family
// =============================================================================
//
// Built once by the composition root. The TopPicker's one-way references to
// the other detectors are wired here, so no detector ever needs to know about
// the set itself.
// =============================================================================

use std::sync::Arc;

use crate::exchange::FuturesRestClient;
use crate::market_data::DataStore;
use crate::runtime_config::RuntimeConfig;

use super::{
    CorrelationDetector, EntryTimingDetector, FundingDetector, LiquidationDetector,
    MultiTimeframeDetector, NewListingDetector, OpenInterestDetector, PatternDetector,
    RangeDetector, SentimentDetector, TopPicker, VelocityDetector, VolatilityDetector,
    VolumeDetector, WhaleDetector,
};

pub struct DetectorSet {
    pub volatility: Arc<VolatilityDetector>,
    pub volume: Arc<VolumeDetector>,
    pub velocity: Arc<VelocityDetector>,
    pub range: Arc<RangeDetector>,
    pub new_listing: Arc<NewListingDetector>,
    pub funding: Arc<FundingDetector>,
    pub open_interest: Arc<OpenInterestDetector>,
    pub multi_timeframe: Arc<MultiTimeframeDetector>,
    pub liquidation: Arc<LiquidationDetector>,
    pub whale: Arc<WhaleDetector>,
    pub correlation: Arc<CorrelationDetector>,
    pub sentiment: Arc<SentimentDetector>,
    pub pattern: Arc<PatternDetector>,
    pub entry_timing: Arc<EntryTimingDetector>,
    pub top_picker: Arc<TopPicker>,
}

impl DetectorSet {
    pub fn new(
        store: Arc<DataStore>,
        client: Arc<FuturesRestClient>,
        config: &RuntimeConfig,
    ) -> Self {
        let volatility = Arc::new(VolatilityDetector::new(
            store.clone(),
            config.volatility.min_change_24h,
            config.volatility.critical_change_24h,
        ));
        let volume = Arc::new(VolumeDetector::new(
            store.clone(),
            config.volume.spike_multiplier,
            config.volume.min_quote_volume,
        ));
        let velocity = Arc::new(VelocityDetector::new(
            store.clone(),
            config.velocity.min_velocity,
            config.velocity.acceleration_threshold,
        ));
        let range = Arc::new(RangeDetector::new(store.clone(), config.range.min_range));
        let new_listing = Arc::new(NewListingDetector::new(store.clone()));
        let funding = Arc::new(FundingDetector::new(client.clone(), store.clone()));
        let open_interest = Arc::new(OpenInterestDetector::new(client.clone(), store.clone()));
        let multi_timeframe = Arc::new(MultiTimeframeDetector::new(client.clone(), store.clone()));
        let liquidation = Arc::new(LiquidationDetector::new(store.clone()));
        let whale = Arc::new(WhaleDetector::new(store.clone()));
        let correlation = Arc::new(CorrelationDetector::new(store.clone()));
        let sentiment = Arc::new(SentimentDetector::new(store.clone()));
        let pattern = Arc::new(PatternDetector::new(client.clone(), store.clone()));
        let entry_timing = Arc::new(EntryTimingDetector::new(client, store.clone()));

        let top_picker = Arc::new(TopPicker::new(
            store,
            volatility.clone(),
            volume.clone(),
            velocity.clone(),
            range.clone(),
            funding.clone(),
            multi_timeframe.clone(),
            whale.clone(),
            pattern.clone(),
            liquidation.clone(),
            correlation.clone(),
        ));

        Self {
            volatility,
            volume,
            velocity,
            range,
            new_listing,
            funding,
            open_interest,
            multi_timeframe,
            liquidation,
            whale,
            correlation,
            sentiment,
            pattern,
            entry_timing,
            top_picker,
        }
    }
}
