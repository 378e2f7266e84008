/// Exponential moving average over close prices.
///
/// Seeded with the simple average of the first `period` closes, then smoothed
/// with `alpha = 2 / (period + 1)`.
#[derive(Debug, Clone)]
pub struct EmaIndicator {
    pub period: usize,
}

impl EmaIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self { period }
    }

    /// Latest EMA value, or `None` with fewer than `period` closes.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period {
            return None;
        }
        let alpha = 2.0 / (self.period as f64 + 1.0);
        let seed = closes[..self.period].iter().sum::<f64>() / self.period as f64;
        Some(
            closes[self.period..]
                .iter()
                .fold(seed, |ema, &close| alpha * close + (1.0 - alpha) * ema),
        )
    }
}
