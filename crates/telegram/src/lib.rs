pub mod commands;
pub mod format;

pub use commands::{send_alert, start_bot, BotDeps, Command};
