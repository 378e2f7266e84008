use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{
    AccountGateway, Decision, Error, MarketSnapshot, OrderGateway, OrderSide, Position, Result,
    TradeEvent, TradeOutcome,
};
use strategy::{decide, StrategySpec};

/// How far an observed fill may exceed `amount / price` before it is treated
/// as a misread balance rather than this trader's own purchase.
const FILL_TOLERANCE: f64 = 0.05;

/// Owns one position and drives it through FLAT -> OPEN -> FLAT.
///
/// Every state change is all-or-nothing: the position only moves after the
/// order gateway confirms a fill, and a failed order leaves it untouched so
/// the next poll re-evaluates from the same state.
pub struct Trader {
    spec: StrategySpec,
    position: Position,
    account: Arc<dyn AccountGateway>,
    orders: Arc<dyn OrderGateway>,
    events: Option<mpsc::Sender<TradeEvent>>,
    /// Wait between a confirmed buy and the balance re-read.
    settle_delay: Duration,
    last_snapshot: Option<MarketSnapshot>,
}

impl Trader {
    pub fn new(
        spec: StrategySpec,
        account: Arc<dyn AccountGateway>,
        orders: Arc<dyn OrderGateway>,
    ) -> Self {
        Self {
            spec,
            position: Position::default(),
            account,
            orders,
            events: None,
            settle_delay: Duration::from_secs(1),
            last_snapshot: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::Sender<TradeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn spec(&self) -> &StrategySpec {
        &self.spec
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Price of the most recent snapshot this trader processed.
    pub fn last_price(&self) -> Option<f64> {
        self.last_snapshot.as_ref().map(|s| s.price)
    }

    /// Most recent snapshot this trader processed.
    pub fn last_snapshot(&self) -> Option<&MarketSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Apply one poll's snapshot.
    pub async fn update(&mut self, snapshot: &MarketSnapshot) -> Result<()> {
        if snapshot.symbol != self.spec.symbol {
            return Err(Error::InvalidSnapshot(format!(
                "snapshot for {} routed to trader on {}",
                snapshot.symbol, self.spec.symbol
            )));
        }
        if !(snapshot.price.is_finite() && snapshot.price > 0.0) {
            return Err(Error::InvalidSnapshot(format!(
                "unusable price {} for {}",
                snapshot.price, snapshot.symbol
            )));
        }
        self.last_snapshot = Some(snapshot.clone());

        let decision = decide(snapshot, &self.spec, &self.position);
        debug!(strategy = %self.spec.name, price = snapshot.price, ?decision, "Evaluated");

        match decision {
            Decision::Enter => {
                self.enter(snapshot.price).await;
            }
            Decision::Exit(outcome) => {
                self.exit(outcome, snapshot.price).await;
            }
            Decision::Hold => {}
        }
        Ok(())
    }

    /// Buy at the last seen price, bypassing the strategy.
    pub async fn manual_buy(&mut self) -> Result<bool> {
        if self.position.is_open() {
            return Err(Error::Other(format!("{} already holds a position", self.spec.name)));
        }
        let price = self.last_price().ok_or_else(|| {
            Error::Other(format!("{} has not seen a price yet", self.spec.name))
        })?;
        info!(strategy = %self.spec.name, price, "Manual buy requested");
        Ok(self.enter(price).await)
    }

    /// Sell the recorded position, counting the trade as manual.
    pub async fn manual_sell(&mut self) -> Result<bool> {
        if !self.position.is_open() {
            return Err(Error::Other(format!("{} has no open position", self.spec.name)));
        }
        let price = self
            .last_price()
            .or(self.position.entry_price())
            .unwrap_or_default();
        info!(strategy = %self.spec.name, price, "Manual sell requested");
        Ok(self.exit(TradeOutcome::Manual, price).await)
    }

    /// Sell the whole free base-asset balance, whatever this trader recorded.
    /// Returns `Ok(false)` when there is nothing to sell or the sell failed.
    pub(crate) async fn sell_entire_balance(&self) -> Result<bool> {
        self.account.invalidate().await;
        let balance = self.account.get_balance(&self.spec.base_asset).await;
        if balance <= 0.0 {
            return Ok(false);
        }
        info!(strategy = %self.spec.name, asset = %self.spec.base_asset, balance, "Flattening entire balance");
        let sold = self.orders.place_sell(&self.spec.symbol, balance).await;
        self.account.invalidate().await;
        if !sold {
            self.emit(TradeEvent::OrderFailed {
                strategy: self.spec.name.clone(),
                symbol: self.spec.symbol.clone(),
                side: OrderSide::Sell,
            });
        }
        Ok(sold)
    }

    /// Close the local position after a sell confirmed elsewhere.
    pub(crate) fn mark_closed(&mut self, outcome: TradeOutcome) {
        let exit_price = self.last_price().unwrap_or_default();
        self.close_position(outcome, exit_price);
    }

    async fn enter(&mut self, price: f64) -> bool {
        let spec = &self.spec;
        let quote = self.account.get_balance(&spec.quote_asset).await;
        if quote < spec.amount {
            info!(
                strategy = %spec.name,
                balance = quote,
                required = spec.amount,
                asset = %spec.quote_asset,
                "Entry skipped: insufficient balance"
            );
            self.emit(TradeEvent::EntrySkipped {
                strategy: spec.name.clone(),
                symbol: spec.symbol.clone(),
                balance: quote,
                required: spec.amount,
            });
            return false;
        }

        self.account.invalidate().await;
        let base_before = self.account.get_balance(&spec.base_asset).await;

        if !self.orders.place_buy(&spec.symbol, spec.amount).await {
            warn!(strategy = %spec.name, "Buy failed, staying flat");
            self.emit(TradeEvent::OrderFailed {
                strategy: spec.name.clone(),
                symbol: spec.symbol.clone(),
                side: OrderSide::Buy,
            });
            return false;
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        self.account.invalidate().await;
        let base_after = self.account.get_balance(&spec.base_asset).await;

        let estimate = spec.amount / price;
        let observed = base_after - base_before;
        let quantity = if observed.is_nan() || observed <= 0.0 {
            // Dry-run or lagging account data
            warn!(
                strategy = %spec.name,
                base_before,
                base_after,
                estimated = estimate,
                "No filled quantity observed, estimating from price"
            );
            estimate
        } else if observed > estimate * (1.0 + FILL_TOLERANCE) {
            // A failed pre-buy read reports zero and would claim coins held by others.
            warn!(
                strategy = %spec.name,
                base_before,
                base_after,
                estimated = estimate,
                "Observed fill exceeds the order notional, estimating from price"
            );
            estimate
        } else {
            observed
        };

        self.position.open(price, quantity);
        info!(
            strategy = %spec.name,
            symbol = %spec.symbol,
            price,
            quantity,
            target = spec.target_price(price),
            "Position opened"
        );
        self.emit(TradeEvent::Entered {
            strategy: spec.name.clone(),
            symbol: spec.symbol.clone(),
            price,
            quantity,
        });
        true
    }

    async fn exit(&mut self, outcome: TradeOutcome, price: f64) -> bool {
        let Some(quantity) = self.position.quantity() else {
            return false;
        };

        if !self.orders.place_sell(&self.spec.symbol, quantity).await {
            warn!(strategy = %self.spec.name, %outcome, "Sell failed, position stays open");
            self.emit(TradeEvent::OrderFailed {
                strategy: self.spec.name.clone(),
                symbol: self.spec.symbol.clone(),
                side: OrderSide::Sell,
            });
            return false;
        }

        self.account.invalidate().await;
        self.close_position(outcome, price);
        true
    }

    fn close_position(&mut self, outcome: TradeOutcome, exit_price: f64) {
        let Some((entry_price, quantity)) = self.position.close(outcome) else {
            return;
        };
        info!(
            strategy = %self.spec.name,
            symbol = %self.spec.symbol,
            %outcome,
            entry_price,
            exit_price,
            trades = self.position.trades,
            wins = self.position.wins,
            losses = self.position.losses,
            "Position closed"
        );
        self.emit(TradeEvent::Exited {
            strategy: self.spec.name.clone(),
            symbol: self.spec.symbol.clone(),
            entry_price,
            exit_price,
            quantity,
            outcome,
        });
    }

    fn emit(&self, event: TradeEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                debug!(error = %e, "Trade event dropped");
            }
        }
    }
}
