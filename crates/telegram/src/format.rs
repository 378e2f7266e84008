//! Plain-text rendering for command replies and trade alerts.

use common::{PositionStatus, TradeEvent, TradeOutcome, TradingMode};
use engine::{CommandResult, TraderStatus};

/// Parse the optional 1-based trader index following a command.
pub fn parse_target(args: &str) -> Result<Option<usize>, String> {
    let args = args.trim();
    if args.is_empty() {
        return Ok(None);
    }
    match args.parse::<usize>() {
        Ok(0) | Err(_) => Err(format!("'{args}' is not a trader number; see /status")),
        Ok(n) => Ok(Some(n)),
    }
}

pub fn format_status(traders: &[TraderStatus], mode: TradingMode, dry_run: bool) -> String {
    let mut out = format!("ScalpBot Status\nMode: {mode}");
    if dry_run {
        out.push_str(" (dry-run)");
    }

    if traders.is_empty() {
        out.push_str("\nNo traders configured.");
        return out;
    }

    for t in traders {
        let price = t
            .last_price
            .map(|p| format!("{p:.4}"))
            .unwrap_or_else(|| "n/a".into());
        out.push_str(&format!("\n\n#{} {} [{}]\nLast: {price}", t.index, t.name, t.symbol));

        let rsi = t.rsi.map(|v| format!("{v:.1}")).unwrap_or_else(|| "n/a".into());
        let ema = t.ema.map(|v| format!("{v:.4}")).unwrap_or_else(|| "n/a".into());
        out.push_str(&format!("\nRSI: {rsi} | EMA: {ema} | Trend: {}", trend(t)));

        match t.position.status() {
            PositionStatus::Flat => out.push_str("\nPosition: FLAT"),
            PositionStatus::Open {
                entry_price,
                quantity,
                opened_at,
            } => {
                out.push_str(&format!(
                    "\nPosition: OPEN {quantity:.8} @ {entry_price:.4} since {}",
                    opened_at.format("%Y-%m-%d %H:%M UTC")
                ));
                if let Some(target) = t.target_price {
                    out.push_str(&format!("\nTarget: {target:.4}"));
                }
            }
        }

        let p = &t.position;
        out.push_str(&format!(
            "\nTrades: {} (W {} / L {}, {:.0}% win rate)",
            p.trades,
            p.wins,
            p.losses,
            p.win_rate()
        ));
    }
    out
}

/// Price against the EMA, with a 1% band counted as sideways.
fn trend(t: &TraderStatus) -> &'static str {
    match (t.last_price, t.ema) {
        (Some(price), Some(ema)) if ema != 0.0 => {
            let diff = (price - ema) / ema;
            if diff > 0.01 {
                "📈 up"
            } else if diff < -0.01 {
                "📉 down"
            } else {
                "sideways"
            }
        }
        _ => "n/a",
    }
}

/// One line per trader touched by a manual command.
pub fn format_results(action: &str, results: &[CommandResult]) -> String {
    if results.is_empty() {
        return format!("{action}: nothing to do.");
    }
    results
        .iter()
        .map(|r| match &r.outcome {
            Ok(true) => format!("{action} {}: done.", r.trader),
            Ok(false) => format!("{action} {}: not executed, see logs.", r.trader),
            Err(e) => format!("{action} {}: {e}", r.trader),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_event(event: &TradeEvent) -> String {
    match event {
        TradeEvent::Entered {
            strategy,
            symbol,
            price,
            quantity,
        } => format!("🟢 {strategy}: bought {quantity:.8} {symbol} at {price:.4}."),
        TradeEvent::Exited {
            strategy,
            symbol,
            entry_price,
            exit_price,
            outcome,
            ..
        } => {
            let pnl_pct = (exit_price - entry_price) / entry_price * 100.0;
            let icon = match outcome {
                TradeOutcome::TakeProfit => "✅",
                TradeOutcome::StopLoss => "⚠️",
                TradeOutcome::Manual => "✋",
            };
            format!(
                "{icon} {strategy}: {outcome} on {symbol}. Entry {entry_price:.4}, exit {exit_price:.4} ({pnl_pct:+.2}%)."
            )
        }
        TradeEvent::EntrySkipped {
            strategy,
            symbol,
            balance,
            required,
        } => format!(
            "💤 {strategy}: entry on {symbol} skipped, balance {balance:.2} below {required:.2}."
        ),
        TradeEvent::OrderFailed {
            strategy,
            symbol,
            side,
        } => format!("🚨 {strategy}: {side} order on {symbol} failed after retries."),
    }
}
