// =============================================================================
// New Listing Detector — first-hour tracking of freshly listed symbols
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::market_data::DataStore;
use crate::types::Direction;

#[derive(Debug, Clone, Serialize)]
pub struct NewListingAlert {
    pub symbol: String,
    /// First price observed after listing.
    pub first_price: f64,
    pub current_price: f64,
    pub change_from_first_pct: f64,
    pub quote_volume_24h: f64,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct NewListingDetector {
    store: Arc<DataStore>,
    /// First observed price per symbol, retained for the listing's lifetime.
    first_prices: RwLock<HashMap<String, f64>>,
}

impl NewListingDetector {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self {
            store,
            first_prices: RwLock::new(HashMap::new()),
        }
    }

    pub fn detect(&self) -> Vec<NewListingAlert> {
        let now = self.store.clock().now_ms();
        let mut first_prices = self.first_prices.write();
        let mut alerts = Vec::new();

        for state in self.store.new_listings() {
            let first_price = *first_prices
                .entry(state.symbol.clone())
                .or_insert(state.current.last_price);
            if first_price == 0.0 {
                continue;
            }

            let change = (state.current.last_price - first_price) / first_price * 100.0;
            alerts.push(NewListingAlert {
                symbol: state.symbol,
                first_price,
                current_price: state.current.last_price,
                change_from_first_pct: change,
                quote_volume_24h: state.current.quote_volume,
                direction: Direction::from_sign(change),
                timestamp: now,
            });
        }

        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.change_from_first_pct);
        alerts
    }
}
