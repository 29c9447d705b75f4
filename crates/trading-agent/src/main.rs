use std::sync::Arc;
use std::time::Duration;

use alpaca_broker::{AlpacaClient, DailyBar};
use anyhow::{Context, Result};
use backtest_engine::{load_bars, BacktestEngine, BacktestResult, HistoricalBar};
use news_feed::{FileNewsSource, NewsSource};
use sentiment_analysis::{FinBertClient, KeywordScorer, SentimentScorer};
use sentiment_strategy::{IterationOutcome, SentimentTrader, Strategy, SystemClock};
use tokio::signal::unix::SignalKind;
use tokio::time;

mod config;

use config::{AgentConfig, TradingMode};

/// Timeout for a single sentiment-service request
const SENTIMENT_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    // 2. Load configuration (validated once here)
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Mode: {:?}", config.mode);
    tracing::info!("  Symbol: {}", config.symbol);
    tracing::info!("  Cash at risk: {:.0}%", config.cash_at_risk * 100.0);
    tracing::info!(
        "  Sentiment: {}",
        config
            .sentiment_service_url
            .as_deref()
            .unwrap_or("keyword scorer (no service configured)")
    );

    match config.mode {
        TradingMode::Live => run_live(&config).await,
        TradingMode::Backtest => run_backtest(&config).await,
    }
}

/// FinBERT service when configured, otherwise the offline lexicon scorer
fn build_scorer(config: &AgentConfig) -> Result<Box<dyn SentimentScorer>> {
    let scorer: Box<dyn SentimentScorer> = match &config.sentiment_service_url {
        Some(url) => Box::new(
            FinBertClient::new(url.as_str(), SENTIMENT_TIMEOUT)?.with_symbol(config.symbol.as_str()),
        ),
        None => Box::new(KeywordScorer::new()),
    };
    Ok(scorer)
}

async fn run_live(config: &AgentConfig) -> Result<()> {
    tracing::info!("Starting sentiment trader (live loop)");

    let alpaca = Arc::new(AlpacaClient::new(config.alpaca_config()?)?);

    // Safety gate: paper by default, live requires LIVE_TRADING_APPROVED=yes
    if !alpaca.is_paper() {
        if !config.live_trading_approved {
            tracing::error!(
                "ALPACA_BASE_URL points to live trading ({}). \
                 Set LIVE_TRADING_APPROVED=yes to enable, or use \
                 https://paper-api.alpaca.markets for paper.",
                alpaca.base_url()
            );
            std::process::exit(1);
        }
        tracing::warn!("LIVE TRADING MODE: REAL MONEY AT RISK ({})", alpaca.base_url());
    } else {
        tracing::info!("Paper trading mode ({})", alpaca.base_url());
    }

    // Startup connectivity check (also provides account info)
    let account = alpaca
        .get_account()
        .await
        .map_err(|e| anyhow::anyhow!("Alpaca connectivity check failed: {}", e))?;
    tracing::info!(
        "Account: ${} cash, ${} buying power, ${} portfolio value",
        account.cash,
        account.buying_power,
        account.portfolio_value
    );

    let mut trader = SentimentTrader::new(
        config.strategy_config(),
        Arc::clone(&alpaca),
        Arc::clone(&alpaca),
        build_scorer(config)?,
        SystemClock,
    )?;
    trader.initialize().await?;

    tracing::info!(
        "Agent is now running. Iterating every {}s. Press Ctrl+C to stop.",
        config.sleeptime_seconds
    );

    // Main loop with graceful shutdown (SIGINT + SIGTERM)
    let mut interval = time::interval(Duration::from_secs(config.sleeptime_seconds));
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    let mut iterations: u64 = 0;
    let mut failures: u64 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                iterations += 1;
                match trader.on_iteration().await {
                    Ok(IterationOutcome::Traded(report)) => {
                        tracing::info!(
                            "Iteration #{}: {} {} {} submitted (order {}{})",
                            iterations,
                            report.order.side,
                            report.order.quantity,
                            report.order.symbol,
                            report.broker_order_id,
                            if report.flattened { ", after flattening" } else { "" }
                        );
                    }
                    Ok(IterationOutcome::Held(reason)) => {
                        tracing::info!("Iteration #{}: no trade ({})", iterations, reason);
                    }
                    Err(e) => {
                        failures += 1;
                        // Next tick starts over from fresh broker state
                        tracing::error!(
                            "Iteration #{} failed ({} failures so far): {:#}",
                            iterations,
                            failures,
                            anyhow::Error::new(e)
                        );
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                break;
            }
        }
    }

    let state = trader.state();
    tracing::info!(
        "Trading agent shut down after {} iterations ({} failed), last trade: {}",
        iterations,
        failures,
        state.last_trade
    );
    Ok(())
}

async fn run_backtest(config: &AgentConfig) -> Result<()> {
    tracing::info!(
        "Starting backtest of {} from {} to {}",
        config.symbol,
        config.backtest_start,
        config.backtest_end
    );
    if config.backtest_fail_fast {
        tracing::info!("  Fail fast: the first failed iteration aborts the run");
    }

    let alpaca = if config.needs_alpaca() {
        Some(Arc::new(AlpacaClient::new(config.alpaca_config()?)?))
    } else {
        None
    };

    let bars = match (&config.backtest_bars_file, &alpaca) {
        (Some(path), _) => load_bars(path)?,
        (None, Some(alpaca)) => alpaca
            .get_daily_bars(&config.symbol, config.backtest_start, config.backtest_end)
            .await
            .context("Failed to fetch historical bars from Alpaca")?
            .iter()
            .map(to_historical_bar)
            .collect(),
        (None, None) => anyhow::bail!("BACKTEST_BARS_FILE not set and Alpaca is not configured"),
    };

    let news: Box<dyn NewsSource> = match (&config.backtest_news_file, &alpaca) {
        (Some(path), _) => Box::new(FileNewsSource::from_path(path)?),
        (None, Some(alpaca)) => Box::new(Arc::clone(alpaca)),
        (None, None) => anyhow::bail!("BACKTEST_NEWS_FILE not set and Alpaca is not configured"),
    };

    let engine = BacktestEngine::new(config.backtest_config());
    let mut trader = SentimentTrader::new(
        config.strategy_config(),
        engine.broker(),
        news,
        build_scorer(config)?,
        engine.clock(),
    )?;

    let result = engine.run(&mut trader, &bars).await?;
    log_result(&result);

    if let Some(path) = &config.backtest_report_file {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        tracing::info!("Backtest report written to {}", path.display());
    }

    Ok(())
}

fn to_historical_bar(bar: &DailyBar) -> HistoricalBar {
    HistoricalBar {
        date: bar.timestamp.format("%Y-%m-%d").to_string(),
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        volume: bar.volume,
    }
}

fn log_result(result: &BacktestResult) {
    tracing::info!("Backtest: {} on {}", result.strategy_name, result.symbol);
    tracing::info!("  Period: {} to {}", result.start_date, result.end_date);
    tracing::info!(
        "  Equity: ${} -> ${} ({:+.2}%)",
        result.initial_capital.round_dp(2),
        result.final_equity.round_dp(2),
        result.total_return_percent
    );
    tracing::info!(
        "  Trades: {} ({} winning, {} losing, {:.1}% win rate)",
        result.total_trades,
        result.winning_trades,
        result.losing_trades,
        result.win_rate
    );
    tracing::info!("  Max drawdown: {:.2}%", result.max_drawdown_percent);
    if let Some(sharpe) = result.sharpe_ratio {
        tracing::info!("  Sharpe ratio: {:.2}", sharpe);
    }
    tracing::info!(
        "  Iterations: {} ({} orders, {} held, {} failed)",
        result.iterations,
        result.orders_submitted,
        result.held_iterations,
        result.failed_iterations
    );
}
