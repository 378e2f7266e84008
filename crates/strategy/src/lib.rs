pub mod config;
pub mod evaluator;
pub mod indicators;
pub mod registry;

pub use config::{MarketSettings, RetrySettings, StrategyConfig, StrategyFileConfig};
pub use evaluator::{decide, exit_reason, should_enter, RSI_OVERBOUGHT};
pub use registry::{IndicatorKind, StrategySpec, Thresholds};
