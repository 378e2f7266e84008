/// Upper/lower bands around a simple moving average.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub lower: f64,
    pub middle: f64,
    pub upper: f64,
}

/// Bollinger bands: SMA(period) ± `std_dev` population standard deviations.
#[derive(Debug, Clone)]
pub struct BollingerIndicator {
    pub period: usize,
    pub std_dev: f64,
}

impl BollingerIndicator {
    pub fn new(period: usize, std_dev: f64) -> Self {
        assert!(period >= 2, "Bollinger period must be >= 2");
        Self { period, std_dev }
    }

    /// Bands over the last `period` closes, or `None` if there are fewer.
    pub fn compute(&self, closes: &[f64]) -> Option<BollingerBands> {
        if closes.len() < self.period {
            return None;
        }
        let window = &closes[closes.len() - self.period..];
        let n = self.period as f64;
        let middle = window.iter().sum::<f64>() / n;
        let variance = window.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / n;
        let band = self.std_dev * variance.sqrt();
        Some(BollingerBands {
            lower: middle - band,
            middle,
            upper: middle + band,
        })
    }
}
