use async_trait::async_trait;
use broker_trait::{BracketOrderRequest, BrokerClient};
use news_feed::{NewsSource, NewsWindow};
use position_sizer::{SizingError, SizingResult};
use sentiment_analysis::{SentimentScorer, SentimentSignal};
use serde::{Deserialize, Serialize};

use crate::decision::{bracket_order, decide, Decision, DecisionInput, HoldReason, TradeSide};
use crate::error::{StrategyError, StrategyResult};
use crate::{Clock, Strategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub symbol: String,
    /// Fraction of cash committed per trade, in (0, 1]
    pub cash_at_risk: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "mlstrat".to_string(),
            symbol: "SPY".to_string(),
            cash_at_risk: 0.5,
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> StrategyResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(StrategyError::InvalidConfig("symbol is empty".to_string()));
        }
        position_sizer::validate_risk_fraction(self.cash_at_risk)
            .map_err(|e| StrategyError::InvalidConfig(e.to_string()))
    }
}

/// Everything the strategy remembers between iterations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    pub symbol: String,
    pub cash_at_risk: f64,
    pub last_trade: TradeSide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReport {
    pub order: BracketOrderRequest,
    /// An opposing position was closed before the order went in
    pub flattened: bool,
    pub broker_order_id: String,
    pub signal: SentimentSignal,
    pub sizing: SizingResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IterationOutcome {
    Held(HoldReason),
    Traded(TradeReport),
}

impl IterationOutcome {
    pub fn is_trade(&self) -> bool {
        matches!(self, IterationOutcome::Traded(_))
    }
}

/// News-sentiment bracket trader for a single symbol.
///
/// Each iteration sizes against current cash, scores the trailing three days
/// of headlines, and either holds or submits a bracket order, closing an
/// opposing position first.
pub struct SentimentTrader<B, N, S, C> {
    config: StrategyConfig,
    broker: B,
    news: N,
    sentiment: S,
    clock: C,
    last_trade: TradeSide,
}

impl<B, N, S, C> SentimentTrader<B, N, S, C>
where
    B: BrokerClient,
    N: NewsSource,
    S: SentimentScorer,
    C: Clock,
{
    pub fn new(
        config: StrategyConfig,
        broker: B,
        news: N,
        sentiment: S,
        clock: C,
    ) -> StrategyResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            broker,
            news,
            sentiment,
            clock,
            last_trade: TradeSide::None,
        })
    }

    pub fn state(&self) -> StrategyState {
        StrategyState {
            symbol: self.config.symbol.clone(),
            cash_at_risk: self.config.cash_at_risk,
            last_trade: self.last_trade,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    async fn position_sizing(&self) -> StrategyResult<SizingResult> {
        let symbol = &self.config.symbol;
        let cash = self.broker.get_cash().await.map_err(StrategyError::broker)?;
        let last_price = self
            .broker
            .get_last_price(symbol)
            .await
            .map_err(StrategyError::broker)?;

        position_sizer::size(cash, last_price, self.config.cash_at_risk).map_err(|e| match e {
            SizingError::InvalidPrice(price) => StrategyError::InvalidPrice {
                symbol: symbol.clone(),
                price,
            },
            SizingError::Overflow { cash, last_price } => StrategyError::SizingOverflow {
                symbol: symbol.clone(),
                cash,
                last_price,
            },
            invalid @ SizingError::InvalidRiskFraction(_) => {
                StrategyError::InvalidConfig(invalid.to_string())
            }
        })
    }

    async fn get_sentiment(&self) -> StrategyResult<SentimentSignal> {
        let window = NewsWindow::ending_at(self.clock.now());
        let headlines = self
            .news
            .get_headlines(&self.config.symbol, window.start, window.end)
            .await
            .map_err(StrategyError::news)?;

        tracing::debug!(
            "{}: {} headlines from {} for {}",
            self.config.symbol,
            headlines.len(),
            self.news.source_name(),
            window
        );

        self.sentiment
            .score(&headlines)
            .await
            .map_err(StrategyError::sentiment)
    }

    async fn dispatch(
        &mut self,
        decision: Decision,
        sizing: SizingResult,
        signal: SentimentSignal,
    ) -> StrategyResult<IterationOutcome> {
        let (side, flatten) = match decision {
            Decision::Hold(reason) => return Ok(IterationOutcome::Held(reason)),
            Decision::Open(side) => (side, false),
            Decision::Flip(side) => (side, true),
        };
        let symbol = self.config.symbol.clone();

        if flatten {
            tracing::info!("{}: closing {} position before {}", symbol, self.last_trade, side);
            self.broker
                .close_position(&symbol)
                .await
                .map_err(StrategyError::broker)?;
        }

        let order = bracket_order(&symbol, side, sizing.quantity, sizing.last_price);
        tracing::info!(
            "{}: {} {} @ ~{} (take profit {}, stop loss {}) on {} sentiment {:.4}",
            symbol,
            side,
            order.quantity,
            sizing.last_price,
            order.take_profit_price.round_dp(2),
            order.stop_loss_price.round_dp(2),
            signal.polarity,
            signal.probability
        );

        // State only moves once the broker has accepted the order
        let placed = self
            .broker
            .submit_bracket_order(order.clone())
            .await
            .map_err(StrategyError::broker)?;
        self.last_trade = TradeSide::from(side);

        Ok(IterationOutcome::Traded(TradeReport {
            order,
            flattened: flatten,
            broker_order_id: placed.id,
            signal,
            sizing,
        }))
    }
}

#[async_trait]
impl<B, N, S, C> Strategy for SentimentTrader<B, N, S, C>
where
    B: BrokerClient,
    N: NewsSource,
    S: SentimentScorer,
    C: Clock,
{
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn initialize(&mut self) -> StrategyResult<()> {
        self.config.validate()?;
        self.last_trade = TradeSide::None;

        tracing::info!(
            "Strategy {} initialized: {} with {:.0}% cash at risk via {} ({}), news from {}, sentiment from {}",
            self.config.name,
            self.config.symbol,
            self.config.cash_at_risk * 100.0,
            self.broker.broker_name(),
            if self.broker.is_paper() { "paper" } else { "live" },
            self.news.source_name(),
            self.sentiment.scorer_name()
        );
        Ok(())
    }

    async fn on_iteration(&mut self) -> StrategyResult<IterationOutcome> {
        let sizing = self.position_sizing().await?;
        let signal = self.get_sentiment().await?;

        let decision = decide(&DecisionInput {
            last_trade: self.last_trade,
            signal,
            cash: sizing.cash,
            last_price: sizing.last_price,
            quantity: sizing.quantity,
        });

        if let Decision::Hold(reason) = decision {
            tracing::info!(
                "{}: holding ({}), cash {} price {} sentiment {} {:.4}",
                self.config.symbol,
                reason,
                sizing.cash.round_dp(2),
                sizing.last_price,
                signal.polarity,
                signal.probability
            );
        }

        self.dispatch(decision, sizing, signal).await
    }
}
