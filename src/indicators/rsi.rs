// =============================================================================
// Relative Strength Index — Wilder's smoothing
// =============================================================================
//
// avg_gain/avg_loss are seeded with the SMA of the first `period` deltas and
// then smoothed:  avg = (prev_avg * (period - 1) + current) / period.
// RS = avg_gain / avg_loss, RSI = 100 - 100 / (1 + RS).
// =============================================================================

/// RSI series over `closes`, one value per close from index `period` on.
///
/// Returns an empty vec when `period` is zero or there are fewer than
/// `period + 1` closes. A flat market reads 50, an all-gain market 100.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let period_f = period as f64;

    let mut avg_gain = deltas[..period].iter().filter(|&&d| d > 0.0).sum::<f64>() / period_f;
    let mut avg_loss = deltas[..period]
        .iter()
        .filter(|&&d| d < 0.0)
        .map(|d| d.abs())
        .sum::<f64>()
        / period_f;

    let mut series = Vec::with_capacity(deltas.len() - period + 1);
    match rsi_value(avg_gain, avg_loss) {
        Some(first) => series.push(first),
        None => return Vec::new(),
    }

    for &delta in &deltas[period..] {
        avg_gain = (avg_gain * (period_f - 1.0) + delta.max(0.0)) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + (-delta).max(0.0)) / period_f;

        match rsi_value(avg_gain, avg_loss) {
            Some(v) => series.push(v),
            None => break,
        }
    }

    series
}

/// Most recent RSI value with an overbought/oversold label.
pub fn current_rsi(closes: &[f64], period: usize) -> Option<(f64, &'static str)> {
    let value = *calculate_rsi(closes, period).last()?;
    let label = if value >= 70.0 {
        "OVERBOUGHT"
    } else if value <= 30.0 {
        "OVERSOLD"
    } else {
        "NEUTRAL"
    };
    Some((value, label))
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };
    rsi.is_finite().then_some(rsi)
}
