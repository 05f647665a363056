/// Arithmetic mean of a price window. `None` for an empty window.
pub fn mean(prices: &[f64]) -> Option<f64> {
    if prices.is_empty() {
        return None;
    }

    let sum: f64 = prices.iter().sum();
    Some(sum / prices.len() as f64)
}

/// Simple moving average over the most recent `period` prices.
///
/// Windows shorter than `period` (holidays, half-filled history) average what
/// is there instead of failing; only an empty window yields `None`.
pub fn trailing_mean(prices: &[f64], period: usize) -> Option<f64> {
    let start = prices.len().saturating_sub(period);
    mean(&prices[start..])
}
