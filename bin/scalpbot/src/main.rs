use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, ExchangeClient, TradeEvent, TradingMode};
use engine::{
    AccountCache, BinanceClient, Engine, KlineMarketData, OrderManager, RetryPolicy, Trader,
    TraderRegistry,
};
use paper::PaperClient;
use strategy::{StrategyFileConfig, StrategySpec};
use telegram_ctrl::{format::format_event, start_bot, BotDeps};

/// Single-position scalping bot for Binance spot.
#[derive(Debug, Parser)]
#[command(name = "scalpbot", version, about)]
struct Args {
    /// Log orders instead of submitting them.
    #[arg(long)]
    dry_run: bool,

    /// Strategy file; overrides STRATEGY_CONFIG_PATH.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let config_path = args.config.unwrap_or_else(|| cfg.strategy_config_path.clone());
    info!(mode = %cfg.trading_mode, dry_run = args.dry_run, config = %config_path, "ScalpBot starting");

    let strategy_file = StrategyFileConfig::load(&config_path)
        .unwrap_or_else(|e| panic!("Failed to load strategies: {e}"));
    let specs = StrategySpec::load_all(&strategy_file)
        .unwrap_or_else(|e| panic!("Invalid strategy: {e}"));
    if specs.is_empty() {
        panic!("No [[strategy]] entries in {config_path}");
    }

    // ── Exchange client (injected based on TRADING_MODE) ──────────────────────
    let exchange_client: Arc<dyn ExchangeClient> = match cfg.trading_mode {
        TradingMode::Live => {
            info!("Live trading mode — using BinanceClient");
            let (key, secret) = (
                cfg.binance_api_key.clone().unwrap_or_default(),
                cfg.binance_secret.clone().unwrap_or_default(),
            );
            Arc::new(
                BinanceClient::new(key, secret)
                    .unwrap_or_else(|e| panic!("Failed to build Binance client: {e}")),
            )
        }
        TradingMode::Paper => {
            info!(
                slippage_bps = cfg.paper_slippage_bps,
                balance = cfg.paper_balance,
                "Paper trading mode — using PaperClient"
            );
            let market = BinanceClient::public()
                .unwrap_or_else(|e| panic!("Failed to build Binance client: {e}"));
            let mut client = PaperClient::new(Arc::new(market), cfg.paper_slippage_bps);
            let quotes: BTreeSet<&str> = specs.iter().map(|s| s.quote_asset.as_str()).collect();
            for spec in &specs {
                client = client.with_symbol(&spec.symbol, &spec.base_asset, &spec.quote_asset);
            }
            for quote in quotes {
                client = client.with_balance(quote, cfg.paper_balance);
            }
            Arc::new(client)
        }
    };

    // ── Gateways ──────────────────────────────────────────────────────────────
    let account = Arc::new(AccountCache::new(
        exchange_client.clone(),
        Duration::from_secs(cfg.balance_cache_secs),
    ));
    let retry = RetryPolicy {
        attempts: strategy_file.retry.attempts,
        delay: Duration::from_secs(strategy_file.retry.delay_secs),
    };
    let orders = Arc::new(OrderManager::new(exchange_client.clone(), retry, args.dry_run));
    let market = Arc::new(KlineMarketData::new(exchange_client, &strategy_file.market));

    // ── Traders ───────────────────────────────────────────────────────────────
    let (event_tx, mut event_rx) = mpsc::channel::<TradeEvent>(128);
    let traders: Vec<Trader> = specs
        .into_iter()
        .map(|spec| Trader::new(spec, account.clone(), orders.clone()).with_events(event_tx.clone()))
        .collect();
    drop(event_tx);
    let registry = TraderRegistry::new(traders);

    let engine = Engine::new(
        registry.clone(),
        market,
        Duration::from_secs(strategy_file.poll_interval_secs),
    );

    // ── Trade event forwarder (sends alerts to Telegram) ──────────────────────
    let alert_bot = cfg.telegram_token.clone().map(teloxide::Bot::new);
    let chat_ids: Vec<teloxide::types::ChatId> = cfg
        .telegram_allowed_user_ids
        .iter()
        .map(|&id| teloxide::types::ChatId(id))
        .collect();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let msg = format_event(&event);
            match &alert_bot {
                Some(bot) => telegram_ctrl::send_alert(bot, &chat_ids, &msg).await,
                None => info!(alert = %msg, "Trade event"),
            }
        }
    });

    // ── Telegram C2 ───────────────────────────────────────────────────────────
    match cfg.telegram_token.clone() {
        Some(token) => {
            if cfg.telegram_allowed_user_ids.is_empty() {
                warn!("TELEGRAM_ALLOWED_USER_IDS is empty; every command will be refused");
            }
            let bot_deps = BotDeps {
                registry: registry.clone(),
                trading_mode: cfg.trading_mode,
                dry_run: args.dry_run,
                allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
            };
            tokio::spawn(start_bot(token, bot_deps));
        }
        None => warn!("TELEGRAM_TOKEN not set; command surface disabled"),
    }

    // ── Spawn the poll loop ───────────────────────────────────────────────────
    tokio::spawn(engine.run());

    // Keep main alive
    info!(traders = registry.len().await, "All subsystems started. Waiting for shutdown signal.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received. Exiting.");
}
