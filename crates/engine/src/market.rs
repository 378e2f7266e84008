use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use common::{indicator, ExchangeClient, MarketDataProvider, MarketSnapshot};
use strategy::indicators::{BollingerIndicator, EmaIndicator, RsiIndicator};
use strategy::MarketSettings;

/// Builds snapshots from the latest klines: price is the last close, and
/// RSI, EMA and Bollinger bands are computed over the fetched closes.
pub struct KlineMarketData {
    client: Arc<dyn ExchangeClient>,
    candle_limit: usize,
    rsi: RsiIndicator,
    ema: EmaIndicator,
    bollinger: BollingerIndicator,
}

impl KlineMarketData {
    pub fn new(client: Arc<dyn ExchangeClient>, settings: &MarketSettings) -> Self {
        Self {
            client,
            candle_limit: settings.candle_limit,
            rsi: RsiIndicator::new(settings.rsi_period),
            ema: EmaIndicator::new(settings.ema_period),
            bollinger: BollingerIndicator::new(settings.bollinger_period, settings.bollinger_std_dev),
        }
    }

    /// Snapshot from closes, oldest first. `None` when there are no closes.
    pub fn snapshot_from_closes(
        &self,
        symbol: &str,
        interval: &str,
        closes: &[f64],
    ) -> Option<MarketSnapshot> {
        let price = *closes.last()?;
        let bands = self.bollinger.compute(closes);

        Some(
            MarketSnapshot::new(symbol, interval, price)
                .with_indicator(indicator::RSI, self.rsi.compute(closes))
                .with_indicator(indicator::EMA, self.ema.compute(closes))
                .with_indicator(indicator::BOLLINGER_LOWER, bands.map(|b| b.lower))
                .with_indicator(indicator::BOLLINGER_MIDDLE, bands.map(|b| b.middle))
                .with_indicator(indicator::BOLLINGER_UPPER, bands.map(|b| b.upper)),
        )
    }
}

#[async_trait]
impl MarketDataProvider for KlineMarketData {
    async fn get_snapshot(&self, symbol: &str, interval: &str) -> Option<MarketSnapshot> {
        let candles = match self.client.klines(symbol, interval, self.candle_limit).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!(%symbol, %interval, error = %e, "Kline fetch failed");
                return None;
            }
        };

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let snapshot = self.snapshot_from_closes(symbol, interval, &closes)?;
        debug!(
            %symbol,
            price = snapshot.price,
            rsi = ?snapshot.indicator(indicator::RSI),
            ema = ?snapshot.indicator(indicator::EMA),
            "Snapshot built"
        );
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::Utc;
    use common::{Candle, Error, Fill, Order, Result, SymbolFilters};

    struct CandleFeed {
        closes: Vec<f64>,
        fail: bool,
    }

    #[async_trait]
    impl ExchangeClient for CandleFeed {
        async fn submit_order(&self, _: &Order) -> Result<Fill> {
            Err(Error::Other("unused".into()))
        }

        async fn balances(&self) -> Result<HashMap<String, f64>> {
            Ok(HashMap::new())
        }

        async fn klines(&self, _: &str, _: &str, limit: usize) -> Result<Vec<Candle>> {
            if self.fail {
                return Err(Error::Http("timeout".into()));
            }
            let now = Utc::now();
            Ok(self
                .closes
                .iter()
                .rev()
                .take(limit)
                .rev()
                .map(|&close| Candle {
                    open_time: now,
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 1.0,
                    close_time: now,
                })
                .collect())
        }

        async fn current_price(&self, _: &str) -> Result<f64> {
            Ok(0.0)
        }

        async fn symbol_filters(&self, _: &str) -> Result<SymbolFilters> {
            Err(Error::Other("unused".into()))
        }
    }

    fn provider(closes: Vec<f64>, fail: bool) -> KlineMarketData {
        KlineMarketData::new(Arc::new(CandleFeed { closes, fail }), &MarketSettings::default())
    }

    #[tokio::test]
    async fn full_history_yields_every_indicator() {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + (i % 7) as f64).collect();
        let snapshot = provider(closes.clone(), false)
            .get_snapshot("BTCEUR", "1m")
            .await
            .unwrap();

        assert_eq!(snapshot.price, *closes.last().unwrap());
        assert_eq!(snapshot.interval, "1m");
        for name in [
            indicator::RSI,
            indicator::EMA,
            indicator::BOLLINGER_LOWER,
            indicator::BOLLINGER_MIDDLE,
            indicator::BOLLINGER_UPPER,
        ] {
            assert!(snapshot.indicator(name).is_some(), "{name} missing");
        }
    }

    #[tokio::test]
    async fn short_history_leaves_indicators_out() {
        // Enough for RSI(2) but not for EMA(20) or Bollinger(20)
        let snapshot = provider(vec![100.0, 99.0, 98.0, 97.0], false)
            .get_snapshot("BTCEUR", "1m")
            .await
            .unwrap();

        assert!(snapshot.indicator(indicator::RSI).is_some());
        assert!(snapshot.indicator(indicator::EMA).is_none());
        assert!(snapshot.indicator(indicator::BOLLINGER_LOWER).is_none());
    }

    #[tokio::test]
    async fn fetch_failure_or_no_candles_is_unavailable() {
        assert!(provider(vec![100.0; 50], true)
            .get_snapshot("BTCEUR", "1m")
            .await
            .is_none());
        assert!(provider(Vec::new(), false)
            .get_snapshot("BTCEUR", "1m")
            .await
            .is_none());
    }
}
