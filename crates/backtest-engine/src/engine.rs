use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use sentiment_strategy::{IterationOutcome, Strategy};
use std::path::Path;
use std::sync::Arc;

use crate::broker::SimulatedBroker;
use crate::clock::SimClock;
use crate::models::*;

/// Replays daily bars through a strategy.
///
/// Per bar: move the clock to the close, settle exit legs against the bar's
/// range, run one iteration (entries fill at the close), mark equity.
pub struct BacktestEngine {
    config: BacktestConfig,
    broker: Arc<SimulatedBroker>,
    clock: Arc<SimClock>,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        let broker = Arc::new(SimulatedBroker::new(&config.symbol, config.initial_capital));
        let start: DateTime<Utc> = config.start_date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        let clock = Arc::new(SimClock::new(start));
        Self {
            config,
            broker,
            clock,
        }
    }

    /// Broker handle to wire into the strategy
    pub fn broker(&self) -> Arc<SimulatedBroker> {
        Arc::clone(&self.broker)
    }

    /// Clock handle to wire into the strategy
    pub fn clock(&self) -> Arc<SimClock> {
        Arc::clone(&self.clock)
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub async fn run<S: Strategy>(&self, strategy: &mut S, bars: &[HistoricalBar]) -> Result<BacktestResult> {
        if self.config.start_date > self.config.end_date {
            bail!(
                "Backtest start {} is after end {}",
                self.config.start_date,
                self.config.end_date
            );
        }

        let mut in_range = Vec::with_capacity(bars.len());
        for bar in bars {
            let date = bar.trading_date()?;
            if date >= self.config.start_date && date <= self.config.end_date {
                in_range.push((date, bar));
            }
        }
        in_range.sort_by_key(|(date, _)| *date);

        if in_range.is_empty() {
            bail!(
                "No bars for {} between {} and {}",
                self.config.symbol,
                self.config.start_date,
                self.config.end_date
            );
        }

        strategy
            .initialize()
            .await
            .with_context(|| format!("Failed to initialize strategy {}", strategy.name()))?;

        tracing::info!(
            "Backtesting {} on {} over {} bars ({} to {})",
            strategy.name(),
            self.config.symbol,
            in_range.len(),
            self.config.start_date,
            self.config.end_date
        );

        let mut equity_curve = Vec::with_capacity(in_range.len());
        let mut peak = self.config.initial_capital;
        let mut iterations = 0;
        let mut orders_submitted = 0;
        let mut held_iterations = 0;
        let mut failed_iterations = 0;

        for (date, bar) in &in_range {
            self.clock.set_to_close(*date);
            self.broker.advance(bar);

            iterations += 1;
            match strategy.on_iteration().await {
                Ok(IterationOutcome::Traded(_)) => orders_submitted += 1,
                Ok(IterationOutcome::Held(_)) => held_iterations += 1,
                Err(e) if self.config.fail_fast => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("Iteration on {} failed", bar.date)));
                }
                Err(e) => {
                    failed_iterations += 1;
                    tracing::error!("Iteration on {} failed: {:#}", bar.date, anyhow::Error::new(e));
                }
            }

            let equity = self.broker.equity();
            peak = peak.max(equity);
            equity_curve.push(EquityPoint {
                timestamp: bar.date.clone(),
                equity,
                drawdown_percent: drawdown_percent(peak, equity),
            });
        }

        self.broker.liquidate(ExitReason::EndOfBacktest);
        let final_equity = self.broker.cash();
        let trades = self.broker.trades();

        let result = self.summarize(
            final_equity,
            equity_curve,
            trades,
            iterations,
            orders_submitted,
            held_iterations,
            failed_iterations,
        );
        tracing::info!(
            "Backtest complete: {} -> {} ({:.2}%), {} trades, win rate {:.1}%, max drawdown {:.2}%",
            result.initial_capital.round_dp(2),
            result.final_equity.round_dp(2),
            result.total_return_percent,
            result.total_trades,
            result.win_rate,
            result.max_drawdown_percent
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn summarize(
        &self,
        final_equity: Decimal,
        equity_curve: Vec<EquityPoint>,
        trades: Vec<BacktestTrade>,
        iterations: i32,
        orders_submitted: i32,
        held_iterations: i32,
        failed_iterations: i32,
    ) -> BacktestResult {
        let initial = self.config.initial_capital;
        let total_return = final_equity - initial;
        let total_return_percent = if initial > Decimal::ZERO {
            (total_return / initial * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        let winning_trades = trades.iter().filter(|t| t.profit_loss > Decimal::ZERO).count() as i32;
        let losing_trades = trades.iter().filter(|t| t.profit_loss < Decimal::ZERO).count() as i32;
        let total_trades = trades.len() as i32;
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let max_drawdown_percent = equity_curve
            .iter()
            .map(|p| p.drawdown_percent)
            .fold(0.0_f64, f64::max);

        BacktestResult {
            strategy_name: self.config.strategy_name.clone(),
            symbol: self.config.symbol.clone(),
            start_date: self.config.start_date.to_string(),
            end_date: self.config.end_date.to_string(),
            initial_capital: initial,
            final_equity,
            total_return,
            total_return_percent,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            max_drawdown_percent,
            sharpe_ratio: sharpe_ratio(&equity_curve),
            iterations,
            orders_submitted,
            held_iterations,
            failed_iterations,
            equity_curve,
            trades,
        }
    }
}

fn drawdown_percent(peak: Decimal, equity: Decimal) -> f64 {
    if peak > Decimal::ZERO {
        ((peak - equity) / peak * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
    } else {
        0.0
    }
}

/// Annualized Sharpe ratio of daily equity returns (2% risk-free)
fn sharpe_ratio(equity_curve: &[EquityPoint]) -> Option<f64> {
    if equity_curve.len() < 3 {
        return None;
    }
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            let e0 = w[0].equity.to_f64().unwrap_or(1.0);
            let e1 = w[1].equity.to_f64().unwrap_or(1.0);
            (e1 / e0) - 1.0
        })
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    // Sample standard deviation (Bessel's correction: n-1)
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    let rf_daily = 0.02 / 252.0;

    if std_dev > 0.0 {
        Some(((mean - rf_daily) / std_dev) * 252.0_f64.sqrt())
    } else {
        None
    }
}

/// Load a JSON array of [`HistoricalBar`]
pub fn load_bars(path: impl AsRef<Path>) -> Result<Vec<HistoricalBar>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read bars file {}", path.display()))?;
    let bars: Vec<HistoricalBar> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid bars file {}", path.display()))?;

    tracing::info!("Loaded {} bars from {}", bars.len(), path.display());
    Ok(bars)
}
