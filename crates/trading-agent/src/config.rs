use alpaca_broker::{AlpacaConfig, DATA_URL, PAPER_BASE_URL};
use anyhow::{bail, Context, Result};
use backtest_engine::BacktestConfig;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sentiment_strategy::StrategyConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Backtest,
}

impl FromStr for TradingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "backtest" => Ok(Self::Backtest),
            other => bail!("TRADING_MODE must be 'live' or 'backtest', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub mode: TradingMode,

    // Strategy
    pub symbol: String,
    pub cash_at_risk: f64,       // 0.5
    pub sleeptime_seconds: u64,  // 86400 (24h)

    // Alpaca
    #[serde(skip_serializing)]
    pub alpaca_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub alpaca_api_secret: Option<String>,
    pub alpaca_base_url: String,
    pub alpaca_data_url: String,
    pub live_trading_approved: bool,

    // Sentiment service (unset = keyword scorer)
    pub sentiment_service_url: Option<String>,

    // Backtest
    pub backtest_start: NaiveDate,
    pub backtest_end: NaiveDate,
    pub backtest_initial_cash: Decimal,
    pub backtest_bars_file: Option<PathBuf>,
    pub backtest_news_file: Option<PathBuf>,
    pub backtest_report_file: Option<PathBuf>,
    /// Abort on the first failed iteration instead of counting it
    pub backtest_fail_fast: bool,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let first = |keys: &[&str]| keys.iter().find_map(|k| get(*k));

        let config = Self {
            mode: get("TRADING_MODE")
                .unwrap_or_else(|| "backtest".to_string())
                .parse()?,

            symbol: get("SYMBOL")
                .unwrap_or_else(|| "SPY".to_string())
                .to_ascii_uppercase(),
            cash_at_risk: get("CASH_AT_RISK")
                .unwrap_or_else(|| "0.5".to_string())
                .parse()
                .context("CASH_AT_RISK must be a number")?,
            sleeptime_seconds: get("SLEEPTIME_SECS")
                .unwrap_or_else(|| "86400".to_string())
                .parse()
                .context("SLEEPTIME_SECS must be a whole number of seconds")?,

            alpaca_api_key: first(&["ALPACA_API_KEY", "APCA_API_KEY_ID"]),
            alpaca_api_secret: first(&[
                "ALPACA_API_SECRET",
                "ALPACA_SECRET_KEY",
                "APCA_API_SECRET_KEY",
            ]),
            alpaca_base_url: get("ALPACA_BASE_URL").unwrap_or_else(|| PAPER_BASE_URL.to_string()),
            alpaca_data_url: get("ALPACA_DATA_URL").unwrap_or_else(|| DATA_URL.to_string()),
            live_trading_approved: get("LIVE_TRADING_APPROVED")
                .map(|v| v.eq_ignore_ascii_case("yes"))
                .unwrap_or(false),

            sentiment_service_url: get("SENTIMENT_SERVICE_URL"),

            backtest_start: parse_date(get("BACKTEST_START"), "2020-01-01", "BACKTEST_START")?,
            backtest_end: parse_date(get("BACKTEST_END"), "2023-12-31", "BACKTEST_END")?,
            backtest_initial_cash: get("BACKTEST_INITIAL_CASH")
                .unwrap_or_else(|| "100000".to_string())
                .parse()
                .context("BACKTEST_INITIAL_CASH must be a decimal amount")?,
            backtest_bars_file: get("BACKTEST_BARS_FILE").map(PathBuf::from),
            backtest_news_file: get("BACKTEST_NEWS_FILE").map(PathBuf::from),
            backtest_report_file: get("BACKTEST_REPORT_FILE").map(PathBuf::from),
            backtest_fail_fast: parse_flag(get("BACKTEST_FAIL_FAST"), "BACKTEST_FAIL_FAST")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.strategy_config().validate()?;

        if self.sleeptime_seconds == 0 {
            bail!("SLEEPTIME_SECS must be greater than 0");
        }

        if self.needs_alpaca() && (self.alpaca_api_key.is_none() || self.alpaca_api_secret.is_none()) {
            bail!(
                "ALPACA_API_KEY and ALPACA_API_SECRET must be set ({})",
                match self.mode {
                    TradingMode::Live => "live trading",
                    TradingMode::Backtest => "backtest data is fetched from Alpaca",
                }
            );
        }

        if self.mode == TradingMode::Backtest {
            if self.backtest_start > self.backtest_end {
                bail!(
                    "BACKTEST_START ({}) is after BACKTEST_END ({})",
                    self.backtest_start,
                    self.backtest_end
                );
            }
            if self.backtest_initial_cash <= Decimal::ZERO {
                bail!("BACKTEST_INITIAL_CASH must be positive");
            }
        }

        Ok(())
    }

    /// Live runs always talk to Alpaca; backtests only when a data file is missing.
    pub fn needs_alpaca(&self) -> bool {
        match self.mode {
            TradingMode::Live => true,
            TradingMode::Backtest => {
                self.backtest_bars_file.is_none() || self.backtest_news_file.is_none()
            }
        }
    }

    pub fn alpaca_config(&self) -> Result<AlpacaConfig> {
        Ok(AlpacaConfig {
            api_key: self.alpaca_api_key.clone().context("ALPACA_API_KEY not set")?,
            api_secret: self
                .alpaca_api_secret
                .clone()
                .context("ALPACA_API_SECRET not set")?,
            base_url: self.alpaca_base_url.clone(),
            data_url: self.alpaca_data_url.clone(),
        })
    }

    pub fn strategy_config(&self) -> StrategyConfig {
        StrategyConfig {
            symbol: self.symbol.clone(),
            cash_at_risk: self.cash_at_risk,
            ..StrategyConfig::default()
        }
    }

    pub fn backtest_config(&self) -> BacktestConfig {
        BacktestConfig {
            strategy_name: self.strategy_config().name,
            symbol: self.symbol.clone(),
            start_date: self.backtest_start,
            end_date: self.backtest_end,
            initial_capital: self.backtest_initial_cash,
            fail_fast: self.backtest_fail_fast,
        }
    }
}

fn parse_flag(value: Option<String>, key: &str) -> Result<bool> {
    match value.map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("false" | "no" | "0") => Ok(false),
        Some("true" | "yes" | "1") => Ok(true),
        Some(other) => bail!("{} must be true or false, got '{}'", key, other),
    }
}

fn parse_date(value: Option<String>, default: &str, key: &str) -> Result<NaiveDate> {
    let raw = value.unwrap_or_else(|| default.to_string());
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .with_context(|| format!("{} must be YYYY-MM-DD, got '{}'", key, raw))
}
