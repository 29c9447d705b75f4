use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Unified broker types (broker-agnostic)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// A market entry with attached take-profit and stop-loss exit legs.
///
/// Prices are kept at full precision; adapters round them to the venue's
/// tick size when serializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketOrderRequest {
    pub symbol: String,
    pub quantity: u64,
    pub side: OrderSide,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub id: String,
    pub client_order_id: String,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub symbol: String,
    pub qty: Option<String>,
    pub filled_qty: Option<String>,
    pub filled_avg_price: Option<String>,
    pub order_type: String,
    pub side: String,
    pub status: String,
}

impl BrokerOrder {
    pub fn filled_quantity_decimal(&self) -> Option<Decimal> {
        self.filled_qty.as_ref().and_then(|s| s.parse().ok())
    }
    pub fn filled_avg_price_decimal(&self) -> Option<Decimal> {
        self.filled_avg_price.as_ref().and_then(|s| s.parse().ok())
    }
}

// ---------------------------------------------------------------------------
// Broker trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Cash available for new positions
    async fn get_cash(&self) -> Result<Decimal>;

    /// Most recent tradable price for a symbol
    async fn get_last_price(&self, symbol: &str) -> Result<Decimal>;

    /// Submit a bracket order (market entry + take-profit + stop-loss)
    async fn submit_bracket_order(&self, order: BracketOrderRequest) -> Result<BrokerOrder>;

    /// Flatten any position in `symbol`. `None` when there was nothing to close.
    async fn close_position(&self, symbol: &str) -> Result<Option<BrokerOrder>>;

    /// Whether this is a paper/simulated account
    fn is_paper(&self) -> bool;

    /// Broker name for logging
    fn broker_name(&self) -> &str;
}

#[async_trait]
impl<T: BrokerClient + ?Sized> BrokerClient for Arc<T> {
    async fn get_cash(&self) -> Result<Decimal> {
        (**self).get_cash().await
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal> {
        (**self).get_last_price(symbol).await
    }

    async fn submit_bracket_order(&self, order: BracketOrderRequest) -> Result<BrokerOrder> {
        (**self).submit_bracket_order(order).await
    }

    async fn close_position(&self, symbol: &str) -> Result<Option<BrokerOrder>> {
        (**self).close_position(symbol).await
    }

    fn is_paper(&self) -> bool {
        (**self).is_paper()
    }

    fn broker_name(&self) -> &str {
        (**self).broker_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&OrderSide::Buy).unwrap(), "\"buy\"");
        assert_eq!(serde_json::to_string(&OrderSide::Sell).unwrap(), "\"sell\"");
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.to_string(), "sell");
    }

    #[test]
    fn test_filled_decimals() {
        let order = BrokerOrder {
            id: "1".to_string(),
            client_order_id: "c1".to_string(),
            created_at: Utc::now(),
            filled_at: None,
            symbol: "SPY".to_string(),
            qty: Some("10".to_string()),
            filled_qty: Some("10".to_string()),
            filled_avg_price: Some("412.37".to_string()),
            order_type: "market".to_string(),
            side: "buy".to_string(),
            status: "filled".to_string(),
        };
        assert_eq!(order.filled_quantity_decimal(), Some(dec!(10)));
        assert_eq!(order.filled_avg_price_decimal(), Some(dec!(412.37)));
    }
}
