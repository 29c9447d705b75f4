use broker_trait::{BracketOrderRequest, OrderSide};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentiment_analysis::{Polarity, SentimentSignal};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentiment must be strictly more confident than this to trade
pub const PROBABILITY_THRESHOLD: f64 = 0.999;

// Bracket multipliers on the last price
pub const BUY_TAKE_PROFIT: Decimal = dec!(1.20);
pub const BUY_STOP_LOSS: Decimal = dec!(0.95);
pub const SELL_TAKE_PROFIT: Decimal = dec!(0.80);
pub const SELL_STOP_LOSS: Decimal = dec!(1.05);

/// Side of the last order this strategy submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    #[default]
    None,
    Buy,
    Sell,
}

impl From<OrderSide> for TradeSide {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => TradeSide::Buy,
            OrderSide::Sell => TradeSide::Sell,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::None => write!(f, "none"),
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldReason {
    /// Cash does not exceed the price of one unit
    InsufficientCash,
    /// Sizing rounded to zero units
    ZeroQuantity,
    /// Probability not strictly above the threshold
    BelowThreshold,
    /// Polarity other than positive/negative
    NeutralPolarity,
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            HoldReason::InsufficientCash => "insufficient cash",
            HoldReason::ZeroQuantity => "position size rounds to zero",
            HoldReason::BelowThreshold => "sentiment below threshold",
            HoldReason::NeutralPolarity => "neutral sentiment",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Hold(HoldReason),
    /// Submit a bracket on `side` with nothing to close first
    Open(OrderSide),
    /// Flatten the opposing position, then submit a bracket on `side`
    Flip(OrderSide),
}

/// Inputs to one decision, already fetched and sized
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionInput {
    pub last_trade: TradeSide,
    pub signal: SentimentSignal,
    pub cash: Decimal,
    pub last_price: Decimal,
    pub quantity: u64,
}

/// The decision table. Pure; every input maps to exactly one row.
///
/// Guards run first: cash must exceed one unit's price, then sentiment must
/// be directional and strictly above [`PROBABILITY_THRESHOLD`], then the
/// sized quantity must be positive.
pub fn decide(input: &DecisionInput) -> Decision {
    if input.cash <= input.last_price {
        return Decision::Hold(HoldReason::InsufficientCash);
    }

    let side = match input.signal.polarity {
        Polarity::Positive => OrderSide::Buy,
        Polarity::Negative => OrderSide::Sell,
        Polarity::Neutral => return Decision::Hold(HoldReason::NeutralPolarity),
    };

    if input.signal.probability <= PROBABILITY_THRESHOLD {
        return Decision::Hold(HoldReason::BelowThreshold);
    }

    if input.quantity == 0 {
        return Decision::Hold(HoldReason::ZeroQuantity);
    }

    if input.last_trade == TradeSide::from(side.opposite()) {
        Decision::Flip(side)
    } else {
        Decision::Open(side)
    }
}

/// Bracket order with the fixed take-profit/stop-loss multipliers
pub fn bracket_order(
    symbol: &str,
    side: OrderSide,
    quantity: u64,
    last_price: Decimal,
) -> BracketOrderRequest {
    let (take_profit, stop_loss) = match side {
        OrderSide::Buy => (BUY_TAKE_PROFIT, BUY_STOP_LOSS),
        OrderSide::Sell => (SELL_TAKE_PROFIT, SELL_STOP_LOSS),
    };

    BracketOrderRequest {
        symbol: symbol.to_string(),
        quantity,
        side,
        take_profit_price: last_price * take_profit,
        stop_loss_price: last_price * stop_loss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(last_trade: TradeSide, polarity: Polarity, probability: f64) -> DecisionInput {
        DecisionInput {
            last_trade,
            signal: SentimentSignal::new(probability, polarity),
            cash: dec!(10000),
            last_price: dec!(100),
            quantity: 50,
        }
    }

    #[test]
    fn test_positive_opens_buy() {
        assert_eq!(
            decide(&input(TradeSide::None, Polarity::Positive, 0.9995)),
            Decision::Open(OrderSide::Buy)
        );
        assert_eq!(
            decide(&input(TradeSide::Buy, Polarity::Positive, 0.9995)),
            Decision::Open(OrderSide::Buy)
        );
    }

    #[test]
    fn test_positive_after_sell_flips() {
        assert_eq!(
            decide(&input(TradeSide::Sell, Polarity::Positive, 0.9995)),
            Decision::Flip(OrderSide::Buy)
        );
    }

    #[test]
    fn test_negative_after_buy_flips() {
        assert_eq!(
            decide(&input(TradeSide::Buy, Polarity::Negative, 0.9999)),
            Decision::Flip(OrderSide::Sell)
        );
        assert_eq!(
            decide(&input(TradeSide::Sell, Polarity::Negative, 0.9999)),
            Decision::Open(OrderSide::Sell)
        );
    }

    #[test]
    fn test_threshold_is_strict() {
        assert_eq!(
            decide(&input(TradeSide::None, Polarity::Positive, 0.999)),
            Decision::Hold(HoldReason::BelowThreshold)
        );
        assert_eq!(
            decide(&input(TradeSide::None, Polarity::Negative, 0.999)),
            Decision::Hold(HoldReason::BelowThreshold)
        );
    }

    #[test]
    fn test_cash_guard_beats_sentiment() {
        let mut at_price = input(TradeSide::Buy, Polarity::Negative, 1.0);
        at_price.cash = dec!(100);
        assert_eq!(decide(&at_price), Decision::Hold(HoldReason::InsufficientCash));

        let mut below = input(TradeSide::None, Polarity::Positive, 1.0);
        below.cash = dec!(99.99);
        assert_eq!(decide(&below), Decision::Hold(HoldReason::InsufficientCash));
    }

    #[test]
    fn test_zero_quantity_holds() {
        let mut zero = input(TradeSide::None, Polarity::Positive, 1.0);
        zero.quantity = 0;
        assert_eq!(decide(&zero), Decision::Hold(HoldReason::ZeroQuantity));
    }

    #[test]
    fn test_table_is_closed() {
        let sides = [TradeSide::None, TradeSide::Buy, TradeSide::Sell];
        let polarities = [Polarity::Positive, Polarity::Negative, Polarity::Neutral];
        let probabilities = [0.0, 0.5, 0.999, 0.9991, 1.0];

        for &side in &sides {
            for &polarity in &polarities {
                for &probability in &probabilities {
                    let decision = decide(&input(side, polarity, probability));
                    let confident = probability > PROBABILITY_THRESHOLD;

                    let expected = match (polarity, confident) {
                        (Polarity::Neutral, _) => Decision::Hold(HoldReason::NeutralPolarity),
                        (_, false) => Decision::Hold(HoldReason::BelowThreshold),
                        (Polarity::Positive, true) if side == TradeSide::Sell => {
                            Decision::Flip(OrderSide::Buy)
                        }
                        (Polarity::Positive, true) => Decision::Open(OrderSide::Buy),
                        (Polarity::Negative, true) if side == TradeSide::Buy => {
                            Decision::Flip(OrderSide::Sell)
                        }
                        (Polarity::Negative, true) => Decision::Open(OrderSide::Sell),
                    };
                    assert_eq!(decision, expected, "{side} / {polarity} / {probability}");
                }
            }
        }
    }

    #[test]
    fn test_buy_bracket_prices() {
        let order = bracket_order("SPY", OrderSide::Buy, 50, dec!(100));
        assert_eq!(order.take_profit_price, dec!(120));
        assert_eq!(order.stop_loss_price, dec!(95));
        assert_eq!(order.quantity, 50);
        assert_eq!(order.symbol, "SPY");
    }

    #[test]
    fn test_sell_bracket_prices() {
        let order = bracket_order("SPY", OrderSide::Sell, 7, dec!(412.50));
        assert_eq!(order.take_profit_price, dec!(330.000));
        assert_eq!(order.stop_loss_price, dec!(433.1250));
        assert_eq!(order.side, OrderSide::Sell);
    }
}
