use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub mod decision;
pub mod error;
pub mod trader;

pub use decision::{
    bracket_order, decide, Decision, DecisionInput, HoldReason, TradeSide, PROBABILITY_THRESHOLD,
};
pub use error::{Collaborator, StrategyError, StrategyResult};
pub use trader::{IterationOutcome, SentimentTrader, StrategyConfig, StrategyState, TradeReport};

/// Source of "now" for an iteration.
///
/// Live runs use [`SystemClock`]; replays supply their own simulated clock so
/// the iteration logic is the same in both modes.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Lifecycle driven by an external scheduler (live loop or backtest replay).
///
/// `on_iteration` takes `&mut self`, so iterations never overlap.
#[async_trait]
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Called once before the first iteration
    async fn initialize(&mut self) -> StrategyResult<()>;

    /// One scheduled evaluation
    async fn on_iteration(&mut self) -> StrategyResult<IterationOutcome>;
}
