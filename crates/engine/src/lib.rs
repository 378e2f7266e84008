pub mod account;
pub mod binance;
pub mod lifecycle;
pub mod market;
pub mod orders;
pub mod trader;

pub use account::AccountCache;
pub use binance::BinanceClient;
pub use lifecycle::{CommandResult, CycleSummary, Engine, TraderRegistry, TraderStatus};
pub use market::KlineMarketData;
pub use orders::{OrderManager, RetryPolicy};
pub use trader::Trader;
