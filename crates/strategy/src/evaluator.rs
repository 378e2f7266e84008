//! Pure entry/exit decisions. Nothing here mutates a position or places orders.

use common::{indicator, Decision, MarketSnapshot, Position, PositionStatus, TradeOutcome};

use crate::registry::StrategySpec;

/// RSI reading above which an open position is closed regardless of profit.
pub const RSI_OVERBOUGHT: f64 = 70.0;

/// Decide what the trader should do with `position` given `snapshot`.
pub fn decide(snapshot: &MarketSnapshot, spec: &StrategySpec, position: &Position) -> Decision {
    match position.status() {
        PositionStatus::Flat => {
            if should_enter(snapshot, spec) {
                Decision::Enter
            } else {
                Decision::Hold
            }
        }
        PositionStatus::Open { entry_price, .. } => exit_reason(snapshot, spec, *entry_price)
            .map(Decision::Exit)
            .unwrap_or(Decision::Hold),
    }
}

/// True only when every configured indicator passes.
pub fn should_enter(snapshot: &MarketSnapshot, spec: &StrategySpec) -> bool {
    !spec.indicators.is_empty()
        && spec
            .indicators
            .iter()
            .all(|kind| kind.passes(snapshot, &spec.thresholds))
}

/// First satisfied exit condition, in priority order:
/// take-profit, stop-loss, RSI overbought, upper Bollinger breakout.
///
/// `entry_price` is the literal price recorded at fill time.
pub fn exit_reason(
    snapshot: &MarketSnapshot,
    spec: &StrategySpec,
    entry_price: f64,
) -> Option<TradeOutcome> {
    let price = snapshot.price;

    if entry_price > 0.0 {
        if (price - entry_price) / entry_price >= spec.target_pct {
            return Some(TradeOutcome::TakeProfit);
        }
        if let Some(stop) = spec.stop_pct {
            if (entry_price - price) / entry_price >= stop {
                return Some(TradeOutcome::StopLoss);
            }
        }
    }

    if snapshot
        .indicator(indicator::RSI)
        .is_some_and(|rsi| rsi > RSI_OVERBOUGHT)
    {
        return Some(TradeOutcome::TakeProfit);
    }

    if snapshot
        .indicator(indicator::BOLLINGER_UPPER)
        .is_some_and(|upper| price > upper)
    {
        return Some(TradeOutcome::TakeProfit);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{IndicatorKind, Thresholds};

    fn spec(indicators: Vec<IndicatorKind>, target_pct: f64, stop_pct: Option<f64>) -> StrategySpec {
        StrategySpec {
            name: "test".into(),
            symbol: "BTCEUR".into(),
            base_asset: "BTC".into(),
            quote_asset: "EUR".into(),
            interval: "1m".into(),
            indicators,
            thresholds: Thresholds::default(),
            target_pct,
            stop_pct,
            amount: 10.0,
        }
    }

    fn open_at(entry_price: f64) -> Position {
        let mut p = Position::default();
        p.open(entry_price, 0.1);
        p
    }

    fn snap(price: f64) -> MarketSnapshot {
        MarketSnapshot::new("BTCEUR", "1m", price)
    }

    #[test]
    fn enters_when_rsi_below_threshold() {
        let s = spec(vec![IndicatorKind::Rsi], 0.01, None);
        let snapshot = snap(100.0).with_indicator(indicator::RSI, Some(5.0));
        assert_eq!(decide(&snapshot, &s, &Position::default()), Decision::Enter);
    }

    #[test]
    fn holds_when_rsi_at_threshold() {
        let s = spec(vec![IndicatorKind::Rsi], 0.01, None);
        let snapshot = snap(100.0).with_indicator(indicator::RSI, Some(10.0));
        assert_eq!(decide(&snapshot, &s, &Position::default()), Decision::Hold);
    }

    #[test]
    fn all_indicators_must_pass() {
        let s = spec(vec![IndicatorKind::Rsi, IndicatorKind::Ema], 0.01, None);
        let rsi_only = snap(100.0).with_indicator(indicator::RSI, Some(5.0));
        assert_eq!(decide(&rsi_only, &s, &Position::default()), Decision::Hold);

        let both = rsi_only.with_indicator(indicator::EMA, Some(100.0));
        assert_eq!(decide(&both, &s, &Position::default()), Decision::Enter);
    }

    #[test]
    fn open_position_never_re_enters() {
        let s = spec(vec![IndicatorKind::Rsi], 0.01, None);
        let snapshot = snap(100.0).with_indicator(indicator::RSI, Some(5.0));
        assert_eq!(decide(&snapshot, &s, &open_at(100.0)), Decision::Hold);
    }

    #[test]
    fn take_profit_at_target() {
        let s = spec(vec![IndicatorKind::Rsi], 0.01, None);
        assert_eq!(
            decide(&snap(101.0), &s, &open_at(100.0)),
            Decision::Exit(TradeOutcome::TakeProfit)
        );
        assert_eq!(decide(&snap(100.9), &s, &open_at(100.0)), Decision::Hold);
    }

    #[test]
    fn stop_loss_below_entry() {
        let s = spec(vec![IndicatorKind::Rsi], 0.01, Some(0.05));
        assert_eq!(
            decide(&snap(94.0), &s, &open_at(100.0)),
            Decision::Exit(TradeOutcome::StopLoss)
        );
    }

    #[test]
    fn no_stop_loss_without_config() {
        let s = spec(vec![IndicatorKind::Rsi], 0.01, None);
        assert_eq!(decide(&snap(50.0), &s, &open_at(100.0)), Decision::Hold);
    }

    #[test]
    fn take_profit_wins_over_stop_loss() {
        // Contradictory config: both conditions hold at the entry price.
        let s = spec(vec![IndicatorKind::Rsi], -0.01, Some(-0.01));
        assert_eq!(
            decide(&snap(100.0), &s, &open_at(100.0)),
            Decision::Exit(TradeOutcome::TakeProfit)
        );
    }

    #[test]
    fn stop_loss_wins_over_rsi_overbought() {
        let s = spec(vec![IndicatorKind::Rsi], 0.01, Some(0.05));
        let snapshot = snap(90.0).with_indicator(indicator::RSI, Some(80.0));
        assert_eq!(
            decide(&snapshot, &s, &open_at(100.0)),
            Decision::Exit(TradeOutcome::StopLoss)
        );
    }

    #[test]
    fn rsi_overbought_exits_before_target() {
        let s = spec(vec![IndicatorKind::Rsi], 0.05, None);
        let snapshot = snap(100.5).with_indicator(indicator::RSI, Some(71.0));
        assert_eq!(
            decide(&snapshot, &s, &open_at(100.0)),
            Decision::Exit(TradeOutcome::TakeProfit)
        );
        let at_70 = snap(100.5).with_indicator(indicator::RSI, Some(70.0));
        assert_eq!(decide(&at_70, &s, &open_at(100.0)), Decision::Hold);
    }

    #[test]
    fn upper_band_breakout_exits() {
        let s = spec(vec![IndicatorKind::Bollinger], 0.05, None);
        let snapshot = snap(100.5).with_indicator(indicator::BOLLINGER_UPPER, Some(100.2));
        assert_eq!(
            decide(&snapshot, &s, &open_at(100.0)),
            Decision::Exit(TradeOutcome::TakeProfit)
        );
    }
}
