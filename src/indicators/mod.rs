// =============================================================================
// Technical Indicators
// =============================================================================
//
// Pure functions over close/candle slices. Insufficient input yields None or
// an empty series, never NaN.

pub mod atr;
pub mod rsi;
pub mod vwap;
