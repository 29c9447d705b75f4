use crate::models::*;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use broker_trait::{BracketOrderRequest, BrokerClient, BrokerOrder};
use chrono::NaiveDate;
use news_feed::NewsSource;
use reqwest::{header, Client};
use rust_decimal::{Decimal, RoundingStrategy};
use std::time::Duration;

/// Alpaca caps news pages at 50 articles
const NEWS_PAGE_LIMIT: u32 = 50;
const MAX_NEWS_PAGES: usize = 10;
const BARS_PAGE_LIMIT: u32 = 10_000;
/// Polls while canceled exit legs release the position's shares
const CANCEL_SETTLE_ATTEMPTS: usize = 10;
const CANCEL_SETTLE_DELAY: Duration = Duration::from_millis(250);

pub struct AlpacaClient {
    client: Client,
    config: AlpacaConfig,
}

impl AlpacaClient {
    /// Create a new Alpaca client
    pub fn new(config: AlpacaConfig) -> Result<Self> {
        let headers = auth_headers(&config)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T> {
        let response = self.client.get(url).query(query).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to get {}: HTTP {} {}", what, status, error_text));
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Invalid {} response", what))
    }

    /// Get account information
    pub async fn get_account(&self) -> Result<Account> {
        let url = format!("{}/v2/account", self.config.base_url);
        self.get_json(&url, &[], "account").await
    }

    /// Price of the most recent trade
    pub async fn get_latest_trade(&self, symbol: &str) -> Result<Trade> {
        let url = format!("{}/v2/stocks/{}/trades/latest", self.config.data_url, symbol);
        let response: LatestTradeResponse = self.get_json(&url, &[], "latest trade").await?;
        Ok(response.trade)
    }

    /// Submit an order
    pub async fn submit_order(&self, order: OrderRequest) -> Result<Order> {
        let url = format!("{}/v2/orders", self.config.base_url);

        tracing::info!("Submitting order to Alpaca: {:?}", order);

        let response = self.client.post(&url).json(&order).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Alpaca order failed: {}", error_text));
        }

        let order_response = response.json::<Order>().await?;
        tracing::info!("Order submitted successfully: {}", order_response.id);
        Ok(order_response)
    }

    /// Open orders for `symbol`, bracket exit legs listed individually
    pub async fn get_open_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        let url = format!("{}/v2/orders", self.config.base_url);
        let query = [
            ("status", "open".to_string()),
            ("symbols", symbol.to_string()),
            ("nested", "false".to_string()),
            ("limit", "500".to_string()),
        ];
        self.get_json(&url, &query, "open orders").await
    }

    /// Cancel an order
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let url = format!("{}/v2/orders/{}", self.config.base_url, order_id);

        let response = self.client.delete(&url).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to cancel order {}: {}", order_id, error_text));
        }

        tracing::info!("Order {} canceled successfully", order_id);
        Ok(())
    }

    /// Cancel every open order on `symbol` and wait until none are left.
    ///
    /// Open take-profit/stop-loss legs hold the position's shares, so a close
    /// issued while they are live is rejected.
    pub async fn cancel_open_orders(&self, symbol: &str) -> Result<usize> {
        let open = self.get_open_orders(symbol).await?;
        for order in &open {
            self.cancel_order(&order.id).await?;
        }
        if open.is_empty() {
            return Ok(0);
        }

        for _ in 0..CANCEL_SETTLE_ATTEMPTS {
            if self.get_open_orders(symbol).await?.is_empty() {
                tracing::info!("Canceled {} open {} orders", open.len(), symbol);
                return Ok(open.len());
            }
            tokio::time::sleep(CANCEL_SETTLE_DELAY).await;
        }
        Err(anyhow!("Open {} orders still pending cancel", symbol))
    }

    /// Close a position (sell or cover all shares). `None` if there was no position.
    ///
    /// Does not touch open orders; see [`Self::flatten`].
    pub async fn close_position(&self, symbol: &str) -> Result<Option<Order>> {
        let url = format!("{}/v2/positions/{}", self.config.base_url, symbol);

        let response = self.client.delete(&url).send().await?;

        if response.status().as_u16() == 404 {
            tracing::info!("No open {} position to close", symbol);
            return Ok(None);
        }

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to close position: {}", error_text));
        }

        let order = response.json::<Order>().await?;
        tracing::info!("Position {} closed successfully", symbol);
        Ok(Some(order))
    }

    /// Cancel the symbol's open orders, then close the position
    pub async fn flatten(&self, symbol: &str) -> Result<Option<Order>> {
        self.cancel_open_orders(symbol).await?;
        self.close_position(symbol).await
    }

    /// Headlines for `symbol` published between the start of `start` and the
    /// end of `end` (UTC), following pagination.
    pub async fn get_news(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<String>> {
        let url = format!("{}/v1beta1/news", self.config.data_url);
        let mut headlines = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_NEWS_PAGES {
            let mut query = vec![
                ("symbols", symbol.to_string()),
                ("start", format!("{}T00:00:00Z", start.format("%Y-%m-%d"))),
                ("end", format!("{}T23:59:59Z", end.format("%Y-%m-%d"))),
                ("limit", NEWS_PAGE_LIMIT.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }

            let page: NewsResponse = self.get_json(&url, &query, "news").await?;
            page_token = page.next_page_token.clone();
            headlines.extend(page.headlines());

            if page_token.is_none() {
                break;
            }
        }

        Ok(headlines)
    }

    /// Daily bars between two dates, following pagination
    pub async fn get_daily_bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>> {
        let url = format!("{}/v2/stocks/{}/bars", self.config.data_url, symbol);
        let mut bars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeframe", "1Day".to_string()),
                ("start", start.format("%Y-%m-%d").to_string()),
                ("end", end.format("%Y-%m-%d").to_string()),
                ("adjustment", "all".to_string()),
                ("limit", BARS_PAGE_LIMIT.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }

            let page: BarsResponse = self.get_json(&url, &query, "bars").await?;
            bars.extend(page.bars.unwrap_or_default());
            page_token = page.next_page_token;

            if page_token.is_none() {
                break;
            }
        }

        tracing::info!("Fetched {} daily bars for {} ({} to {})", bars.len(), symbol, start, end);
        Ok(bars)
    }

    /// Check if this client is connected to the paper trading environment
    pub fn is_paper(&self) -> bool {
        self.config.base_url.contains("paper-api")
    }

    /// Get the base URL (for logging/diagnostics)
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }
}

fn auth_headers(config: &AlpacaConfig) -> Result<header::HeaderMap> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        "APCA-API-KEY-ID",
        header::HeaderValue::from_str(&config.api_key)
            .context("API key contains invalid header characters")?,
    );
    headers.insert(
        "APCA-API-SECRET-KEY",
        header::HeaderValue::from_str(&config.api_secret)
            .context("Secret key contains invalid header characters")?,
    );
    Ok(headers)
}

/// Round to whole cents, the tick size for stocks above $1
fn to_cents(price: Decimal) -> String {
    price
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .to_string()
}

// ---------------------------------------------------------------------------
// Conversion helpers: unified BrokerClient types <-> Alpaca types
// ---------------------------------------------------------------------------

fn bracket_to_alpaca(order: &BracketOrderRequest) -> OrderRequest {
    let side = match order.side {
        broker_trait::OrderSide::Buy => OrderSide::Buy,
        broker_trait::OrderSide::Sell => OrderSide::Sell,
    };
    OrderRequest {
        symbol: order.symbol.clone(),
        qty: order.quantity.to_string(),
        side,
        order_type: OrderType::Market,
        time_in_force: TimeInForce::Gtc,
        order_class: OrderClass::Bracket,
        take_profit: Some(TakeProfitLeg {
            limit_price: to_cents(order.take_profit_price),
        }),
        stop_loss: Some(StopLossLeg {
            stop_price: to_cents(order.stop_loss_price),
        }),
        client_order_id: None,
    }
}

fn order_to_broker(o: Order) -> BrokerOrder {
    BrokerOrder {
        id: o.id,
        client_order_id: o.client_order_id,
        created_at: o.created_at,
        filled_at: o.filled_at,
        symbol: o.symbol,
        qty: o.quantity,
        filled_qty: o.filled_quantity,
        filled_avg_price: o.filled_avg_price,
        order_type: o.order_type,
        side: o.side,
        status: o.status,
    }
}

#[async_trait]
impl BrokerClient for AlpacaClient {
    async fn get_cash(&self) -> Result<Decimal> {
        let account = self.get_account().await?;
        account
            .cash
            .parse::<Decimal>()
            .with_context(|| format!("Unparseable account cash {:?}", account.cash))
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal> {
        Ok(self.get_latest_trade(symbol).await?.price)
    }

    async fn submit_bracket_order(&self, order: BracketOrderRequest) -> Result<BrokerOrder> {
        self.submit_order(bracket_to_alpaca(&order))
            .await
            .map(order_to_broker)
    }

    async fn close_position(&self, symbol: &str) -> Result<Option<BrokerOrder>> {
        self.flatten(symbol)
            .await
            .map(|o| o.map(order_to_broker))
    }

    fn is_paper(&self) -> bool {
        self.is_paper()
    }

    fn broker_name(&self) -> &str {
        "alpaca"
    }
}

#[async_trait]
impl NewsSource for AlpacaClient {
    async fn get_headlines(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<String>> {
        self.get_news(symbol, start, end).await
    }

    fn source_name(&self) -> &str {
        "alpaca"
    }
}
