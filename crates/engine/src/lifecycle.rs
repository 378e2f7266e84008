use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use common::{indicator, Error, MarketDataProvider, MarketSnapshot, Position, Result, TradeOutcome};

use crate::trader::Trader;

/// Read-only view of one trader, as shown by `/status`.
#[derive(Debug, Clone)]
pub struct TraderStatus {
    /// 1-based, stable for the life of the process.
    pub index: usize,
    pub name: String,
    pub symbol: String,
    pub position: Position,
    pub last_price: Option<f64>,
    pub rsi: Option<f64>,
    pub ema: Option<f64>,
    /// Take-profit price while a position is open.
    pub target_price: Option<f64>,
}

/// Result of a manual command against one trader.
#[derive(Debug)]
pub struct CommandResult {
    pub trader: String,
    pub outcome: Result<bool>,
}

/// Cloneable handle to every registered trader, shared by the poll loop and
/// the command surface. Holding the lock serializes commands against a
/// running cycle.
#[derive(Clone)]
pub struct TraderRegistry {
    inner: Arc<Mutex<Vec<Trader>>>,
}

impl TraderRegistry {
    pub fn new(traders: Vec<Trader>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(traders)),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn status(&self) -> Vec<TraderStatus> {
        let traders = self.inner.lock().await;
        traders
            .iter()
            .enumerate()
            .map(|(i, t)| TraderStatus {
                index: i + 1,
                name: t.spec().name.clone(),
                symbol: t.spec().symbol.clone(),
                position: t.position().clone(),
                last_price: t.last_price(),
                rsi: t.last_snapshot().and_then(|s| s.indicator(indicator::RSI)),
                ema: t.last_snapshot().and_then(|s| s.indicator(indicator::EMA)),
                target_price: t.position().entry_price().map(|p| t.spec().target_price(p)),
            })
            .collect()
    }

    /// Manual buy on trader `index` (1-based), or on the first FLAT trader.
    pub async fn manual_buy(&self, index: Option<usize>) -> Vec<CommandResult> {
        let mut traders = self.inner.lock().await;
        let target = match index {
            Some(n) => match slot(n, traders.len()) {
                Ok(i) => i,
                Err(e) => return vec![unknown(n, e)],
            },
            None => match traders.iter().position(|t| !t.position().is_open()) {
                Some(i) => i,
                None => {
                    return vec![CommandResult {
                        trader: "all".into(),
                        outcome: Err(Error::Other("every trader already holds a position".into())),
                    }]
                }
            },
        };

        let trader = &mut traders[target];
        let outcome = trader.manual_buy().await;
        vec![CommandResult {
            trader: trader.spec().name.clone(),
            outcome,
        }]
    }

    /// Manual sell on trader `index`, or on every trader holding a position.
    pub async fn manual_sell(&self, index: Option<usize>) -> Vec<CommandResult> {
        let mut traders = self.inner.lock().await;
        let targets: Vec<usize> = match index {
            Some(n) => match slot(n, traders.len()) {
                Ok(i) => vec![i],
                Err(e) => return vec![unknown(n, e)],
            },
            None => (0..traders.len())
                .filter(|&i| traders[i].position().is_open())
                .collect(),
        };

        let mut results = Vec::with_capacity(targets.len());
        for i in targets {
            let trader = &mut traders[i];
            let outcome = trader.manual_sell().await;
            results.push(CommandResult {
                trader: trader.spec().name.clone(),
                outcome,
            });
        }
        results
    }

    /// Sell the entire free base balance of each targeted symbol.
    ///
    /// Traders sharing a symbol share one sell. Once the whole balance is
    /// gone, every open trader on that symbol is closed as manual, targeted
    /// or not, since none of them holds coins any more.
    pub async fn force_flatten(&self, index: Option<usize>) -> Vec<CommandResult> {
        let mut traders = self.inner.lock().await;
        let targets: Vec<usize> = match index {
            Some(n) => match slot(n, traders.len()) {
                Ok(i) => vec![i],
                Err(e) => return vec![unknown(n, e)],
            },
            None => (0..traders.len()).collect(),
        };

        let mut symbols: Vec<String> = Vec::new();
        for &i in &targets {
            let symbol = &traders[i].spec().symbol;
            if !symbols.contains(symbol) {
                symbols.push(symbol.clone());
            }
        }

        let mut results = Vec::new();
        for symbol in symbols {
            let Some(seller) = targets.iter().copied().find(|&i| traders[i].spec().symbol == symbol)
            else {
                continue;
            };
            let sold = traders[seller].sell_entire_balance().await;
            let flattened = matches!(sold, Ok(true));
            if !flattened {
                debug!(%symbol, "Nothing flattened");
            }

            let affected: Vec<usize> = (0..traders.len())
                .filter(|&i| traders[i].spec().symbol == symbol)
                .filter(|&i| targets.contains(&i) || (flattened && traders[i].position().is_open()))
                .collect();

            for i in affected {
                let trader = &mut traders[i];
                let outcome = match &sold {
                    Ok(true) if trader.position().is_open() => {
                        trader.mark_closed(TradeOutcome::Manual);
                        Ok(true)
                    }
                    Ok(_) => Ok(false),
                    Err(e) => Err(Error::Other(e.to_string())),
                };
                results.push(CommandResult {
                    trader: trader.spec().name.clone(),
                    outcome,
                });
            }
        }
        results
    }
}

fn slot(n: usize, len: usize) -> Result<usize> {
    if n == 0 || n > len {
        return Err(Error::Other(format!("no trader #{n} (have {len})")));
    }
    Ok(n - 1)
}

fn unknown(n: usize, e: Error) -> CommandResult {
    CommandResult {
        trader: format!("#{n}"),
        outcome: Err(e),
    }
}

/// Counts from one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub updated: usize,
    /// Traders whose snapshot was unavailable this cycle.
    pub skipped: usize,
    pub failed: usize,
}

/// The execution loop: one snapshot per distinct (symbol, interval), fed to
/// every trader in registration order, once per poll interval.
pub struct Engine {
    registry: TraderRegistry,
    market: Arc<dyn MarketDataProvider>,
    poll_interval: Duration,
}

impl Engine {
    pub fn new(
        registry: TraderRegistry,
        market: Arc<dyn MarketDataProvider>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            market,
            poll_interval,
        }
    }

    pub async fn run_cycle(&self) -> CycleSummary {
        let pairs: Vec<(String, String)> = {
            let traders = self.registry.inner.lock().await;
            let mut pairs = Vec::new();
            for t in traders.iter() {
                let pair = (t.spec().symbol.clone(), t.spec().interval.clone());
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
            pairs
        };

        // Fetched without the registry lock so commands are not held up by I/O.
        let mut snapshots: HashMap<(String, String), MarketSnapshot> = HashMap::new();
        for (symbol, interval) in pairs {
            match self.market.get_snapshot(&symbol, &interval).await {
                Some(snapshot) => {
                    snapshots.insert((symbol, interval), snapshot);
                }
                None => warn!(%symbol, %interval, "Snapshot unavailable, skipping"),
            }
        }

        let mut summary = CycleSummary::default();
        let mut traders = self.registry.inner.lock().await;
        for trader in traders.iter_mut() {
            let key = (trader.spec().symbol.clone(), trader.spec().interval.clone());
            let Some(snapshot) = snapshots.get(&key) else {
                summary.skipped += 1;
                continue;
            };
            match trader.update(snapshot).await {
                Ok(()) => summary.updated += 1,
                Err(e) => {
                    warn!(strategy = %trader.spec().name, error = %e, "Trader update failed");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Poll forever. Call from `tokio::spawn`.
    pub async fn run(self) {
        let traders = self.registry.len().await;
        info!(
            traders = traders,
            poll_secs = self.poll_interval.as_secs(),
            "Engine started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let summary = self.run_cycle().await;
            debug!(
                updated = summary.updated,
                skipped = summary.skipped,
                failed = summary.failed,
                "Cycle complete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;

    use crate::trader::tests::{snap, spec, FakeAccount, FakeOrders};

    /// Serves fixed snapshots and records every fetch.
    struct ScriptedMarket {
        snapshots: HashMap<String, MarketSnapshot>,
        fetches: std::sync::Mutex<Vec<(String, String)>>,
    }

    impl ScriptedMarket {
        fn new(snapshots: Vec<MarketSnapshot>) -> Arc<Self> {
            Arc::new(Self {
                snapshots: snapshots.into_iter().map(|s| (s.symbol.clone(), s)).collect(),
                fetches: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedMarket {
        async fn get_snapshot(&self, symbol: &str, interval: &str) -> Option<MarketSnapshot> {
            self.fetches
                .lock()
                .unwrap()
                .push((symbol.to_string(), interval.to_string()));
            self.snapshots.get(symbol).cloned()
        }
    }

    fn named(name: &str, symbol: &str, base: &str) -> strategy::StrategySpec {
        let mut s = spec(0.01, None);
        s.name = name.into();
        s.symbol = symbol.into();
        s.base_asset = base.into();
        s
    }

    fn build(
        specs: Vec<strategy::StrategySpec>,
        eur: f64,
    ) -> (TraderRegistry, Arc<FakeAccount>, Arc<FakeOrders>) {
        let account = FakeAccount::new(eur, 0.0);
        let orders = FakeOrders::new(account.clone(), 100.0);
        let traders = specs
            .into_iter()
            .map(|s| {
                Trader::new(s, account.clone(), orders.clone()).with_settle_delay(Duration::ZERO)
            })
            .collect();
        (TraderRegistry::new(traders), account, orders)
    }

    #[tokio::test]
    async fn one_fetch_per_distinct_pair_in_registration_order() {
        let (registry, _account, _orders) = build(
            vec![
                named("a", "BTCEUR", "BTC"),
                named("b", "ETHEUR", "ETH"),
                named("c", "BTCEUR", "BTC"),
            ],
            0.0,
        );
        let market = ScriptedMarket::new(vec![
            snap(100.0, 50.0),
            MarketSnapshot::new("ETHEUR", "1m", 10.0),
        ]);
        let engine = Engine::new(registry, market.clone(), Duration::from_secs(60));

        let summary = engine.run_cycle().await;

        assert_eq!(summary.updated, 3);
        let fetches = market.fetches.lock().unwrap().clone();
        assert_eq!(
            fetches,
            vec![
                ("BTCEUR".to_string(), "1m".to_string()),
                ("ETHEUR".to_string(), "1m".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_snapshot_skips_only_its_traders() {
        let (registry, _account, _orders) = build(
            vec![named("a", "BTCEUR", "BTC"), named("b", "ETHEUR", "ETH")],
            100.0,
        );
        let market = ScriptedMarket::new(vec![snap(100.0, 5.0)]);
        let engine = Engine::new(registry.clone(), market, Duration::from_secs(60));

        let summary = engine.run_cycle().await;

        assert_eq!(
            summary,
            CycleSummary {
                updated: 1,
                skipped: 1,
                failed: 0
            }
        );
        let status = registry.status().await;
        assert!(status[0].position.is_open());
        assert!(!status[1].position.is_open());
    }

    #[tokio::test]
    async fn failing_trader_does_not_stop_the_cycle() {
        // "a" receives a snapshot with an unusable price
        let (registry, _account, _orders) = build(
            vec![named("a", "BTCEUR", "BTC"), named("b", "ETHEUR", "ETH")],
            100.0,
        );
        let bad = snap(f64::NAN, 5.0);
        let eth = MarketSnapshot::new("ETHEUR", "1m", 100.0)
            .with_indicator(common::indicator::RSI, Some(5.0));
        let market = ScriptedMarket::new(vec![bad, eth]);
        let engine = Engine::new(registry.clone(), market, Duration::from_secs(60));

        let summary = engine.run_cycle().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.updated, 1);
        assert!(registry.status().await[1].position.is_open());
    }

    #[tokio::test]
    async fn traders_are_evaluated_in_registration_order() {
        // Both want to enter; only the first can afford it.
        let (registry, _account, orders) = build(
            vec![named("first", "BTCEUR", "BTC"), named("second", "BTCEUR", "BTC")],
            15.0,
        );
        let market = ScriptedMarket::new(vec![snap(100.0, 5.0)]);
        let engine = Engine::new(registry.clone(), market, Duration::from_secs(60));

        engine.run_cycle().await;

        let status = registry.status().await;
        assert!(status[0].position.is_open());
        assert!(!status[1].position.is_open());
        assert_eq!(orders.buys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_reports_target_for_open_positions() {
        let (registry, _account, _orders) = build(vec![named("a", "BTCEUR", "BTC")], 100.0);
        let market = ScriptedMarket::new(vec![snap(100.0, 5.0)]);
        Engine::new(registry.clone(), market, Duration::from_secs(60))
            .run_cycle()
            .await;

        let status = registry.status().await;
        assert_eq!(status[0].index, 1);
        assert_eq!(status[0].last_price, Some(100.0));
        assert_eq!(status[0].rsi, Some(5.0));
        assert_eq!(status[0].ema, None);
        let target = status[0].target_price.unwrap();
        assert!((target - 101.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn manual_commands_resolve_targets() {
        let (registry, _account, _orders) = build(
            vec![named("a", "BTCEUR", "BTC"), named("b", "BTCEUR", "BTC")],
            100.0,
        );
        let market = ScriptedMarket::new(vec![snap(100.0, 50.0)]);
        Engine::new(registry.clone(), market, Duration::from_secs(60))
            .run_cycle()
            .await;

        let out_of_range = registry.manual_buy(Some(3)).await;
        assert!(out_of_range[0].outcome.is_err());

        let bought = registry.manual_buy(None).await;
        assert_eq!(bought[0].trader, "a");
        assert!(matches!(bought[0].outcome, Ok(true)));

        let bought = registry.manual_buy(None).await;
        assert_eq!(bought[0].trader, "b");

        let sold = registry.manual_sell(None).await;
        assert_eq!(sold.len(), 2);
        assert!(sold.iter().all(|r| matches!(r.outcome, Ok(true))));
        assert!(registry.manual_sell(None).await.is_empty());
    }

    #[tokio::test]
    async fn flatten_sells_whole_balance_once_per_symbol() {
        let (registry, account, orders) = build(
            vec![named("a", "BTCEUR", "BTC"), named("b", "BTCEUR", "BTC")],
            100.0,
        );
        let market = ScriptedMarket::new(vec![snap(100.0, 5.0)]);
        let engine = Engine::new(registry.clone(), market, Duration::from_secs(60));
        engine.run_cycle().await;
        assert!(registry.status().await.iter().all(|s| s.position.is_open()));

        let results = registry.force_flatten(None).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r.outcome, Ok(true))));
        assert_eq!(orders.sells.load(Ordering::SeqCst), 1);
        assert!(account.get("BTC").abs() < 1e-12);
        for s in registry.status().await {
            assert!(!s.position.is_open());
            assert_eq!(s.position.trades, 1);
        }
    }

    #[tokio::test]
    async fn targeted_flatten_closes_every_holder_of_the_symbol() {
        let (registry, account, orders) = build(
            vec![
                named("a", "BTCEUR", "BTC"),
                named("b", "BTCEUR", "BTC"),
                named("c", "ETHEUR", "ETH"),
            ],
            100.0,
        );
        let eth = MarketSnapshot::new("ETHEUR", "1m", 100.0);
        let market = ScriptedMarket::new(vec![snap(100.0, 5.0), eth]);
        Engine::new(registry.clone(), market, Duration::from_secs(60))
            .run_cycle()
            .await;

        let results = registry.force_flatten(Some(1)).await;

        let names: Vec<&str> = results.iter().map(|r| r.trader.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(results.iter().all(|r| matches!(r.outcome, Ok(true))));
        assert_eq!(orders.sells.load(Ordering::SeqCst), 1);
        assert!(account.get("BTC").abs() < 1e-12);
        let status = registry.status().await;
        assert!(!status[0].position.is_open());
        assert!(!status[1].position.is_open());
        assert_eq!(status[1].position.trades, 1);

        // Nothing left for "b" to sell on later polls
        assert!(registry.manual_sell(Some(2)).await[0].outcome.is_err());
    }

    #[tokio::test]
    async fn flatten_reports_flat_traders_as_untouched() {
        // Only "a" can afford an entry
        let (registry, _account, _orders) = build(
            vec![named("a", "BTCEUR", "BTC"), named("b", "BTCEUR", "BTC")],
            15.0,
        );
        let market = ScriptedMarket::new(vec![snap(100.0, 5.0)]);
        Engine::new(registry.clone(), market, Duration::from_secs(60))
            .run_cycle()
            .await;

        let results = registry.force_flatten(None).await;

        assert_eq!(results[0].trader, "a");
        assert!(matches!(results[0].outcome, Ok(true)));
        assert_eq!(results[1].trader, "b");
        assert!(matches!(results[1].outcome, Ok(false)));
        assert_eq!(registry.status().await[1].position.trades, 0);
    }

    #[tokio::test]
    async fn flatten_with_nothing_held_sends_no_order() {
        let (registry, _account, orders) = build(vec![named("a", "BTCEUR", "BTC")], 100.0);

        let results = registry.force_flatten(Some(1)).await;

        assert!(matches!(results[0].outcome, Ok(false)));
        assert_eq!(orders.sells.load(Ordering::SeqCst), 0);
    }
}
