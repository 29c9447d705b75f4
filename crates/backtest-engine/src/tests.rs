use anyhow::Result;
use async_trait::async_trait;
use broker_trait::{BrokerClient, OrderSide};
use chrono::{NaiveDate, TimeZone, Utc};
use news_feed::{FileNewsSource, HeadlineRecord};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentiment_analysis::{Polarity, SentimentScorer, SentimentSignal};
use sentiment_strategy::{
    bracket_order, HoldReason, IterationOutcome, SentimentTrader, Strategy, StrategyConfig,
    StrategyError, StrategyResult,
};

use crate::broker::SimulatedBroker;
use crate::engine::{load_bars, BacktestEngine};
use crate::models::*;

/// Helper: create a HistoricalBar with the given OHLCV data.
fn bar(date: &str, open: f64, high: f64, low: f64, close: f64) -> HistoricalBar {
    HistoricalBar {
        date: date.to_string(),
        open: Decimal::from_f64(open).unwrap(),
        high: Decimal::from_f64(high).unwrap(),
        low: Decimal::from_f64(low).unwrap(),
        close: Decimal::from_f64(close).unwrap(),
        volume: 1_000_000.0,
    }
}

/// Helper: flat bar that never touches a 5% leg.
fn flat(date: &str, price: f64) -> HistoricalBar {
    bar(date, price, price + 1.0, price - 1.0, price)
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Helper: build a basic config for testing.
fn test_config(start: &str, end: &str) -> BacktestConfig {
    BacktestConfig {
        strategy_name: "mlstrat".to_string(),
        symbol: "SPY".to_string(),
        start_date: date(start),
        end_date: date(end),
        initial_capital: dec!(10000),
        fail_fast: true,
    }
}

/// Broker with `bar` loaded and a long of `qty` opened at its close.
async fn broker_with_long(qty: u64) -> SimulatedBroker {
    let broker = SimulatedBroker::new("SPY", dec!(10000));
    broker.advance(&flat("2024-01-02", 100.0));
    broker
        .submit_bracket_order(bracket_order("SPY", OrderSide::Buy, qty, dec!(100)))
        .await
        .unwrap();
    broker
}

// ---- SimulatedBroker ----

#[tokio::test]
async fn test_buy_fills_at_close_and_debits_cash() {
    let broker = broker_with_long(10).await;

    assert_eq!(broker.cash(), dec!(9000));
    assert_eq!(broker.net_position(), dec!(10));
    assert_eq!(broker.equity(), dec!(10000));
    assert_eq!(broker.get_last_price("SPY").await.unwrap(), dec!(100));
}

#[tokio::test]
async fn test_buy_rejected_without_buying_power() {
    let broker = SimulatedBroker::new("SPY", dec!(500));
    broker.advance(&flat("2024-01-02", 100.0));

    let err = broker
        .submit_bracket_order(bracket_order("SPY", OrderSide::Buy, 6, dec!(100)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Insufficient buying power"));
    assert_eq!(broker.cash(), dec!(500));
    assert_eq!(broker.open_lots(), 0);
}

#[tokio::test]
async fn test_short_credits_proceeds() {
    let broker = SimulatedBroker::new("SPY", dec!(10000));
    broker.advance(&flat("2024-01-02", 100.0));
    broker
        .submit_bracket_order(bracket_order("SPY", OrderSide::Sell, 20, dec!(100)))
        .await
        .unwrap();

    assert_eq!(broker.cash(), dec!(12000));
    assert_eq!(broker.net_position(), dec!(-20));
    assert_eq!(broker.equity(), dec!(10000));

    // Price drops 2: short gains 40
    broker.advance(&flat("2024-01-03", 98.0));
    assert_eq!(broker.equity(), dec!(10040));
}

#[tokio::test]
async fn test_take_profit_leg() {
    let broker = broker_with_long(10).await;
    broker.advance(&bar("2024-01-05", 110.0, 121.0, 109.0, 119.0));

    let trades = broker.trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].exit_reason, ExitReason::TakeProfit);
    assert_eq!(trades[0].exit_price, dec!(120));
    assert_eq!(trades[0].profit_loss, dec!(200));
    assert_eq!(trades[0].holding_period_days, 3);
    assert_eq!(broker.cash(), dec!(10200));
    assert_eq!(broker.open_lots(), 0);
}

#[tokio::test]
async fn test_stop_loss_wins_when_both_legs_touched() {
    let broker = broker_with_long(10).await;
    broker.advance(&bar("2024-01-03", 100.0, 125.0, 94.0, 110.0));

    let trades = broker.trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].exit_reason, ExitReason::StopLoss);
    assert_eq!(trades[0].exit_price, dec!(95));
    assert_eq!(trades[0].profit_loss, dec!(-50));
}

#[tokio::test]
async fn test_gap_through_stop_fills_at_open() {
    let broker = broker_with_long(10).await;
    broker.advance(&bar("2024-01-03", 90.0, 92.0, 88.0, 91.0));

    let trades = broker.trades();
    assert_eq!(trades[0].exit_reason, ExitReason::StopLoss);
    assert_eq!(trades[0].exit_price, dec!(90));
}

#[tokio::test]
async fn test_short_stop_loss_above_entry() {
    let broker = SimulatedBroker::new("SPY", dec!(10000));
    broker.advance(&flat("2024-01-02", 100.0));
    broker
        .submit_bracket_order(bracket_order("SPY", OrderSide::Sell, 10, dec!(100)))
        .await
        .unwrap();

    broker.advance(&bar("2024-01-03", 104.0, 106.0, 103.0, 105.5));

    let trades = broker.trades();
    assert_eq!(trades[0].direction, "short");
    assert_eq!(trades[0].exit_reason, ExitReason::StopLoss);
    assert_eq!(trades[0].exit_price, dec!(105));
    assert_eq!(trades[0].profit_loss, dec!(-50));
    assert_eq!(broker.cash(), dec!(9950));
}

#[tokio::test]
async fn test_close_position_flattens_at_close() {
    let broker = broker_with_long(10).await;
    broker.advance(&flat("2024-01-03", 102.0));

    let order = broker.close_position("SPY").await.unwrap().unwrap();
    assert_eq!(order.side, "sell");
    assert_eq!(order.filled_avg_price.as_deref(), Some("102"));
    assert_eq!(broker.net_position(), Decimal::ZERO);
    assert_eq!(broker.trades()[0].exit_reason, ExitReason::Flatten);
    assert_eq!(broker.cash(), dec!(10020));

    // Already flat
    assert!(broker.close_position("SPY").await.unwrap().is_none());
}

#[tokio::test]
async fn test_no_price_before_first_bar() {
    let broker = SimulatedBroker::new("SPY", dec!(10000));
    assert!(broker.get_last_price("SPY").await.is_err());

    broker.advance(&flat("2024-01-02", 100.0));
    assert!(broker.get_last_price("QQQ").await.is_err());
    assert!(broker.is_paper());
    assert_eq!(broker.broker_name(), "simulated");
}

// ---- BacktestEngine ----

/// Scores 1.0 positive on "beat", 1.0 negative on "miss", neutral otherwise.
struct ScriptedScorer;

#[async_trait]
impl SentimentScorer for ScriptedScorer {
    async fn score(&self, headlines: &[String]) -> Result<SentimentSignal> {
        let joined = headlines.join(" ").to_lowercase();
        Ok(if joined.contains("beat") {
            SentimentSignal::new(1.0, Polarity::Positive)
        } else if joined.contains("miss") {
            SentimentSignal::new(1.0, Polarity::Negative)
        } else {
            SentimentSignal::neutral()
        })
    }

    fn scorer_name(&self) -> &str {
        "scripted"
    }
}

fn headline(published: (i32, u32, u32), text: &str) -> HeadlineRecord {
    let (y, m, d) = published;
    HeadlineRecord {
        symbol: "SPY".to_string(),
        published: Utc.with_ymd_and_hms(y, m, d, 14, 0, 0).unwrap(),
        headline: text.to_string(),
    }
}

#[tokio::test]
async fn test_sentiment_trader_replay() {
    let engine = BacktestEngine::new(test_config("2024-01-01", "2024-01-31"));
    let news = FileNewsSource::new(vec![
        headline((2024, 1, 2), "Index components beat earnings"),
        headline((2024, 1, 15), "Retail sales miss forecasts"),
    ]);
    let mut trader = SentimentTrader::new(
        StrategyConfig::default(),
        engine.broker(),
        news,
        ScriptedScorer,
        engine.clock(),
    )
    .unwrap();

    let bars = vec![
        flat("2024-01-02", 100.0),
        // Outside the range
        flat("2024-02-01", 100.0),
        bar("2024-01-09", 110.0, 125.0, 105.0, 118.0),
        flat("2024-01-16", 100.0),
    ];

    let result = engine.run(&mut trader, &bars).await.unwrap();

    // Buy 50 @ 100, take profit at 120, short 55 @ 100, liquidated at 100
    assert_eq!(result.iterations, 3);
    assert_eq!(result.orders_submitted, 2);
    assert_eq!(result.held_iterations, 1);
    assert_eq!(result.failed_iterations, 0);
    assert_eq!(result.final_equity, dec!(11000));
    assert_eq!(result.total_return, dec!(1000));
    assert_eq!(result.total_trades, 2);
    assert_eq!(result.winning_trades, 1);
    assert_eq!(result.losing_trades, 0);
    assert_eq!(result.trades[0].shares, dec!(50));
    assert_eq!(result.trades[0].exit_reason, ExitReason::TakeProfit);
    assert_eq!(result.trades[1].shares, dec!(55));
    assert_eq!(result.trades[1].direction, "short");
    assert_eq!(result.trades[1].exit_reason, ExitReason::EndOfBacktest);
    assert_eq!(result.equity_curve.len(), 3);
    assert_eq!(result.equity_curve[0].timestamp, "2024-01-02");
    approx::assert_relative_eq!(result.total_return_percent, 10.0);
    approx::assert_relative_eq!(result.max_drawdown_percent, 0.0);
}

/// Fails on the listed iteration numbers, holds otherwise.
struct FlakyStrategy {
    calls: usize,
    fail_on: Vec<usize>,
    initialized: bool,
}

#[async_trait]
impl Strategy for FlakyStrategy {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn initialize(&mut self) -> StrategyResult<()> {
        self.initialized = true;
        Ok(())
    }

    async fn on_iteration(&mut self) -> StrategyResult<IterationOutcome> {
        self.calls += 1;
        if self.fail_on.contains(&self.calls) {
            return Err(StrategyError::InvalidConfig("scripted failure".to_string()));
        }
        Ok(IterationOutcome::Held(HoldReason::BelowThreshold))
    }
}

fn three_bars() -> Vec<HistoricalBar> {
    vec![
        flat("2024-01-02", 100.0),
        flat("2024-01-03", 101.0),
        flat("2024-01-04", 102.0),
    ]
}

#[tokio::test]
async fn test_fail_fast_stops_run() {
    let engine = BacktestEngine::new(test_config("2024-01-01", "2024-01-31"));
    let mut strategy = FlakyStrategy {
        calls: 0,
        fail_on: vec![2],
        initialized: false,
    };

    let err = engine.run(&mut strategy, &three_bars()).await.unwrap_err();
    assert!(format!("{:#}", err).contains("2024-01-03"));
    assert!(strategy.initialized);
    assert_eq!(strategy.calls, 2);
}

#[tokio::test]
async fn test_failures_counted_when_not_fail_fast() {
    let mut config = test_config("2024-01-01", "2024-01-31");
    config.fail_fast = false;
    let engine = BacktestEngine::new(config);
    let mut strategy = FlakyStrategy {
        calls: 0,
        fail_on: vec![1, 3],
        initialized: false,
    };

    let result = engine.run(&mut strategy, &three_bars()).await.unwrap();
    assert_eq!(result.iterations, 3);
    assert_eq!(result.failed_iterations, 2);
    assert_eq!(result.held_iterations, 1);
    assert_eq!(result.final_equity, dec!(10000));
    assert_eq!(result.total_trades, 0);
    assert_eq!(result.win_rate, 0.0);
}

#[tokio::test]
async fn test_rejected_order_does_not_end_default_run() {
    let config: BacktestConfig = serde_json::from_value(serde_json::json!({
        "strategy_name": "mlstrat",
        "symbol": "SPY",
        "start_date": "2024-01-01",
        "end_date": "2024-01-31",
        "initial_capital": "10000",
    }))
    .unwrap();
    let engine = BacktestEngine::new(config);
    let news = FileNewsSource::new(vec![headline((2024, 1, 2), "Index components beat earnings")]);
    let strategy_config = StrategyConfig {
        cash_at_risk: 1.0,
        ..StrategyConfig::default()
    };
    let mut trader = SentimentTrader::new(
        strategy_config,
        engine.broker(),
        news,
        ScriptedScorer,
        engine.clock(),
    )
    .unwrap();
    let bars = vec![
        flat("2024-01-02", 100.5),
        flat("2024-01-03", 101.0),
        flat("2024-01-04", 102.0),
    ];

    let result = engine.run(&mut trader, &bars).await.unwrap();

    // 100 @ 100.5 exceeds cash; 99 @ 101 fits, then held and liquidated at 102
    assert_eq!(result.iterations, 3);
    assert_eq!(result.failed_iterations, 1);
    assert_eq!(result.orders_submitted, 1);
    assert_eq!(result.held_iterations, 1);
    assert_eq!(result.total_trades, 1);
    assert_eq!(result.trades[0].shares, dec!(99));
    assert_eq!(result.final_equity, dec!(10099));
    assert_eq!(result.equity_curve.len(), 3);
}

#[tokio::test]
async fn test_empty_range_is_an_error() {
    let engine = BacktestEngine::new(test_config("2023-01-01", "2023-01-31"));
    let mut strategy = FlakyStrategy {
        calls: 0,
        fail_on: vec![],
        initialized: false,
    };

    assert!(engine.run(&mut strategy, &three_bars()).await.is_err());
    assert!(!strategy.initialized);
}

#[tokio::test]
async fn test_inverted_dates_rejected() {
    let engine = BacktestEngine::new(test_config("2024-02-01", "2024-01-01"));
    let mut strategy = FlakyStrategy {
        calls: 0,
        fail_on: vec![],
        initialized: false,
    };

    let err = engine.run(&mut strategy, &three_bars()).await.unwrap_err();
    assert!(err.to_string().contains("after end"));
}

#[tokio::test]
async fn test_bad_bar_date_rejected() {
    let engine = BacktestEngine::new(test_config("2024-01-01", "2024-01-31"));
    let mut strategy = FlakyStrategy {
        calls: 0,
        fail_on: vec![],
        initialized: false,
    };

    let err = engine
        .run(&mut strategy, &[flat("01/02/2024", 100.0)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Invalid bar date"));
}

#[test]
fn test_load_bars_from_file() {
    let path = std::env::temp_dir().join(format!("bars-{}.json", std::process::id()));
    let bars = three_bars();
    std::fs::write(&path, serde_json::to_string(&bars).unwrap()).unwrap();

    let loaded = load_bars(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, bars);
}

#[test]
fn test_load_bars_missing_file() {
    assert!(load_bars("/nonexistent/bars.json").is_err());
}

#[test]
fn test_config_fail_fast_defaults_off() {
    let config: BacktestConfig = serde_json::from_str(
        r#"{"strategy_name":"mlstrat","symbol":"SPY","start_date":"2020-01-01",
            "end_date":"2023-12-31","initial_capital":"100000"}"#,
    )
    .unwrap();
    assert!(!config.fail_fast);
    assert_eq!(config.initial_capital, dec!(100000));

    let strict: BacktestConfig = serde_json::from_str(
        r#"{"strategy_name":"mlstrat","symbol":"SPY","start_date":"2020-01-01",
            "end_date":"2023-12-31","initial_capital":"100000","fail_fast":true}"#,
    )
    .unwrap();
    assert!(strict.fail_fast);
}
