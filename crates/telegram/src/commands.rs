use std::sync::Arc;

use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    utils::command::BotCommands,
};
use tracing::{info, warn};

use common::TradingMode;
use engine::TraderRegistry;

use crate::format::{format_results, format_status, parse_target};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub registry: TraderRegistry,
    pub trading_mode: TradingMode,
    pub dry_run: bool,
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "ScalpBot commands:")]
pub enum Command {
    #[command(description = "Show every trader's position and counters")]
    Status,
    #[command(description = "Buy now: /buy [n], defaults to the first flat trader")]
    Buy(String),
    #[command(description = "Sell the recorded position: /sell [n], defaults to all")]
    Sell(String),
    #[command(description = "Sell the whole base balance: /cancel [n], defaults to all")]
    Cancel(String),
    #[command(description = "Show this help")]
    Help,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(token: String, deps: BotDeps) {
    let bot = Bot::new(token);
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Buy(args)].endpoint(handle_buy))
        .branch(case![Command::Sell(args)].endpoint(handle_sell))
        .branch(case![Command::Cancel(args)].endpoint(handle_cancel))
        .branch(case![Command::Help].endpoint(handle_help));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let traders = deps.registry.status().await;
    let text = format_status(&traders, deps.trading_mode, deps.dry_run);
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_buy(bot: Bot, msg: Message, args: String, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match parse_target(&args) {
        Ok(target) => {
            info!(?target, "Manual buy via Telegram");
            format_results("Buy", &deps.registry.manual_buy(target).await)
        }
        Err(e) => e,
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_sell(bot: Bot, msg: Message, args: String, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match parse_target(&args) {
        Ok(target) => {
            info!(?target, "Manual sell via Telegram");
            format_results("Sell", &deps.registry.manual_sell(target).await)
        }
        Err(e) => e,
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_cancel(bot: Bot, msg: Message, args: String, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match parse_target(&args) {
        Ok(target) => {
            info!(?target, "Flatten via Telegram");
            bot.send_message(msg.chat.id, "Selling entire balance\u{2026}").await?;
            format_results("Cancel", &deps.registry.force_flatten(target).await)
        }
        Err(e) => e,
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

/// Send a proactive alert to all configured chat IDs.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) {
    for &chat_id in chat_ids {
        if let Err(e) = bot.send_message(chat_id, message).await {
            warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert");
        }
    }
}
