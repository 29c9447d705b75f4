use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Connection settings for the trading and market-data APIs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlpacaConfig {
    pub api_key: String,
    pub api_secret: String,
    /// Trading API, e.g. https://paper-api.alpaca.markets
    pub base_url: String,
    /// Market data and news API, e.g. https://data.alpaca.markets
    pub data_url: String,
}

pub const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";
pub const DATA_URL: &str = "https://data.alpaca.markets";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub account_number: String,
    pub status: String,
    pub currency: String,
    pub buying_power: String,
    pub cash: String,
    pub portfolio_value: String,
    pub pattern_day_trader: bool,
    pub trading_blocked: bool,
    pub transfers_blocked: bool,
    pub account_blocked: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderClass {
    Simple,
    Bracket,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc, // Good til canceled
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeProfitLeg {
    pub limit_price: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossLeg {
    pub stop_price: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub qty: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub order_class: OrderClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<TakeProfitLeg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<StopLossLeg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: String,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub symbol: String,
    #[serde(rename = "qty")]
    pub quantity: Option<String>,
    #[serde(rename = "filled_qty")]
    pub filled_quantity: Option<String>,
    pub filled_avg_price: Option<String>,
    pub order_type: String,
    #[serde(default)]
    pub order_class: String,
    pub side: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatestTradeResponse {
    pub symbol: String,
    pub trade: Trade,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trade {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "s", default)]
    pub size: u64,
}

/// Daily OHLCV bar from the market-data API
#[derive(Debug, Clone, Deserialize)]
pub struct DailyBar {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "v")]
    pub volume: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BarsResponse {
    #[serde(default)]
    pub bars: Option<Vec<DailyBar>>,
    pub next_page_token: Option<String>,
}

/// One news article. Every field is optional on the wire; articles without a
/// headline are dropped by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct NewsItem {
    pub id: Option<i64>,
    pub headline: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub symbols: Vec<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsResponse {
    #[serde(default)]
    pub news: Vec<NewsItem>,
    pub next_page_token: Option<String>,
}

impl NewsResponse {
    /// Headline strings, skipping articles with no usable headline
    pub fn headlines(self) -> Vec<String> {
        self.news
            .into_iter()
            .filter_map(|item| match item.headline {
                Some(h) if !h.trim().is_empty() => Some(h),
                _ => {
                    tracing::warn!("Skipping news item {:?} without a headline", item.id);
                    None
                }
            })
            .collect()
    }
}
