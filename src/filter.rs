// =============================================================================
// Symbol Filter — allow/deny applied at snapshot time
// =============================================================================
//
// Every category list in the snapshot passes through this filter, so a
// symbol the filter rejects can never appear on the dashboard. The watchlist
// turns into a hard allow-list the moment it is non-empty.
// =============================================================================

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::market_data::Ticker;

/// Quote assets whose base is itself a stablecoin are never interesting
/// movers; the "move" is the other leg depegging.
const STABLECOIN_BASES: &[&str] = &[
    "USDC", "BUSD", "TUSD", "DAI", "FDUSD", "USDP", "USDD", "PAX", "UST", "EUR",
];

/// Filter configuration; all bounds inclusive-exclusive per the volume rule
/// (a symbol exactly at the volume floor is excluded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub name: String,
    pub min_volume_24h: f64,
    pub min_change_24h: f64,
    /// Symbols never shown, regardless of anything else.
    #[serde(default)]
    pub exclusions: HashSet<String>,
    /// When non-empty, acts as an allow-list.
    #[serde(default)]
    pub watchlist: HashSet<String>,
    /// Only symbols quoted in this asset pass. Empty disables the check.
    pub only_quote: String,
    pub exclude_stablecoins: bool,
}

impl FilterConfig {
    /// Preset: liquid names only.
    pub fn high_volume() -> Self {
        Self {
            name: "highVolume".to_string(),
            min_volume_24h: 10_000_000.0,
            min_change_24h: 0.0,
            exclusions: HashSet::new(),
            watchlist: HashSet::new(),
            only_quote: "USDT".to_string(),
            exclude_stablecoins: true,
        }
    }

    /// Preset: liquid names already in motion.
    pub fn big_movers() -> Self {
        Self {
            name: "bigMovers".to_string(),
            min_volume_24h: 10_000_000.0,
            min_change_24h: 5.0,
            exclusions: HashSet::new(),
            watchlist: HashSet::new(),
            only_quote: "USDT".to_string(),
            exclude_stablecoins: true,
        }
    }

    /// Preset: the deepest books only.
    pub fn top_tier() -> Self {
        Self {
            name: "topTier".to_string(),
            min_volume_24h: 100_000_000.0,
            min_change_24h: 0.0,
            exclusions: HashSet::new(),
            watchlist: HashSet::new(),
            only_quote: "USDT".to_string(),
            exclude_stablecoins: true,
        }
    }

    /// Preset: everything through.
    pub fn all() -> Self {
        Self {
            name: "all".to_string(),
            min_volume_24h: 0.0,
            min_change_24h: 0.0,
            exclusions: HashSet::new(),
            watchlist: HashSet::new(),
            only_quote: String::new(),
            exclude_stablecoins: false,
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "highVolume" => Some(Self::high_volume()),
            "bigMovers" => Some(Self::big_movers()),
            "topTier" => Some(Self::top_tier()),
            "all" => Some(Self::all()),
            _ => None,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::all()
    }
}

/// The filter itself; cheap to clone into the snapshot task.
#[derive(Debug, Clone, Default)]
pub struct SymbolFilter {
    config: FilterConfig,
}

impl SymbolFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FilterConfig) {
        self.config = config;
    }

    /// Whether `ticker` may appear in any snapshot list.
    pub fn pass(&self, ticker: &Ticker) -> bool {
        let symbol = ticker.symbol.as_str();

        if self.config.exclusions.contains(symbol) {
            return false;
        }
        if !self.config.watchlist.is_empty() && !self.config.watchlist.contains(symbol) {
            return false;
        }
        if !self.config.only_quote.is_empty() && !symbol.ends_with(&self.config.only_quote) {
            return false;
        }
        if self.config.exclude_stablecoins && self.is_stablecoin_base(symbol) {
            return false;
        }
        // Strict floor: a symbol exactly at the volume minimum is excluded.
        if self.config.min_volume_24h > 0.0 && ticker.quote_volume <= self.config.min_volume_24h {
            return false;
        }
        if ticker.price_change_percent.abs() < self.config.min_change_24h {
            return false;
        }
        true
    }

    fn is_stablecoin_base(&self, symbol: &str) -> bool {
        let base = if !self.config.only_quote.is_empty() {
            symbol.strip_suffix(&self.config.only_quote).unwrap_or(symbol)
        } else {
            symbol.strip_suffix("USDT").unwrap_or(symbol)
        };
        STABLECOIN_BASES.contains(&base)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, quote_volume: f64, change: f64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 1.0,
            price_change: 0.0,
            price_change_percent: change,
            open_price: 1.0,
            high_price: 1.0,
            low_price: 1.0,
            base_volume: 0.0,
            quote_volume,
            trade_count: 0,
            event_time: 1,
        }
    }

    /// Preset scenario: a depegging stablecoin is excluded no matter how big
    /// the move, while a real mover passes.
    #[test]
    fn big_movers_preset() {
        let filter = SymbolFilter::new(FilterConfig::big_movers());

        assert!(!filter.pass(&ticker("USDCUSDT", 50_000_000.0, 20.0)));
        assert!(filter.pass(&ticker("DOGEUSDT", 20_000_000.0, 6.0)));
        assert!(!filter.pass(&ticker("DOGEUSDT", 20_000_000.0, 4.0))); // too quiet
        assert!(!filter.pass(&ticker("DOGEBTC", 20_000_000.0, 8.0))); // wrong quote
    }

    #[test]
    fn volume_floor_is_strict() {
        let filter = SymbolFilter::new(FilterConfig::high_volume());
        assert!(!filter.pass(&ticker("AAAUSDT", 10_000_000.0, 3.0))); // exactly at floor
        assert!(filter.pass(&ticker("AAAUSDT", 10_000_000.1, 3.0)));
    }

    #[test]
    fn watchlist_becomes_allow_list() {
        let mut config = FilterConfig::all();
        config.watchlist.insert("BTCUSDT".to_string());

        let filter = SymbolFilter::new(config);
        assert!(filter.pass(&ticker("BTCUSDT", 1.0, 0.0)));
        assert!(!filter.pass(&ticker("ETHUSDT", 1e9, 50.0)));
    }

    #[test]
    fn exclusions_override_everything() {
        let mut config = FilterConfig::all();
        config.exclusions.insert("SCAMUSDT".to_string());
        let filter = SymbolFilter::new(config);
        assert!(!filter.pass(&ticker("SCAMUSDT", 1e9, 90.0)));
    }

    #[test]
    fn all_preset_passes_anything() {
        let filter = SymbolFilter::new(FilterConfig::all());
        assert!(filter.pass(&ticker("ANYBTC", 0.0, 0.0)));
        assert!(filter.pass(&ticker("USDCUSDT", 1.0, 0.0)));
    }

    #[test]
    fn presets_resolve_by_name() {
        for name in ["highVolume", "bigMovers", "topTier", "all"] {
            assert_eq!(FilterConfig::preset(name).unwrap().name, name);
        }
        assert!(FilterConfig::preset("nope").is_none());
    }

    #[test]
    fn negative_moves_count_as_change() {
        let filter = SymbolFilter::new(FilterConfig::big_movers());
        assert!(filter.pass(&ticker("DOGEUSDT", 20_000_000.0, -6.0)));
    }
}
