use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use broker_trait::{BracketOrderRequest, BrokerClient, BrokerOrder, OrderSide};
use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::sync::{Mutex, MutexGuard};

use crate::models::{BacktestTrade, ExitReason, HistoricalBar};

/// One filled bracket entry with its live exit legs
#[derive(Debug, Clone)]
struct Lot {
    side: OrderSide,
    shares: Decimal,
    entry_price: Decimal,
    entry_date: String,
    take_profit: Decimal,
    stop_loss: Decimal,
}

#[derive(Debug)]
struct BrokerState {
    cash: Decimal,
    bar: Option<HistoricalBar>,
    lots: Vec<Lot>,
    trades: Vec<BacktestTrade>,
    next_order_id: u64,
}

/// In-memory broker for a single symbol.
///
/// Market entries fill at the current bar's close. Exit legs are checked
/// against each later bar's range; when a bar touches both legs the stop-loss
/// wins. Shorts credit the sale proceeds to cash.
#[derive(Debug)]
pub struct SimulatedBroker {
    symbol: String,
    state: Mutex<BrokerState>,
}

impl SimulatedBroker {
    pub fn new(symbol: impl Into<String>, initial_cash: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            state: Mutex::new(BrokerState {
                cash: initial_cash,
                bar: None,
                lots: Vec::new(),
                trades: Vec::new(),
                next_order_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `bar` the current bar and settle any exit legs it triggers.
    pub fn advance(&self, bar: &HistoricalBar) {
        let mut state = self.lock();
        state.bar = Some(bar.clone());

        let lots = std::mem::take(&mut state.lots);
        for lot in lots {
            match exit_for(&lot, bar) {
                Some((price, reason)) => {
                    let trade = settle(&mut state.cash, &self.symbol, lot, &bar.date, price, reason);
                    tracing::debug!(
                        "{} {:?} exit {} @ {} ({})",
                        trade.symbol,
                        trade.exit_reason,
                        trade.shares,
                        trade.exit_price,
                        trade.profit_loss.round_dp(2)
                    );
                    state.trades.push(trade);
                }
                None => state.lots.push(lot),
            }
        }
    }

    /// Close everything at the current close (end of the replay)
    pub fn liquidate(&self, reason: ExitReason) {
        let mut state = self.lock();
        Self::close_all(&mut state, &self.symbol, reason);
    }

    fn close_all(state: &mut BrokerState, symbol: &str, reason: ExitReason) -> usize {
        let Some(bar) = state.bar.clone() else {
            return 0;
        };
        let lots = std::mem::take(&mut state.lots);
        let closed = lots.len();
        for lot in lots {
            let trade = settle(&mut state.cash, symbol, lot, &bar.date, bar.close, reason);
            state.trades.push(trade);
        }
        closed
    }

    /// Cash plus the marked value of open lots at the current close
    pub fn equity(&self) -> Decimal {
        let state = self.lock();
        let close = state.bar.as_ref().map(|b| b.close).unwrap_or_default();
        state.cash
            + state
                .lots
                .iter()
                .map(|lot| match lot.side {
                    OrderSide::Buy => lot.shares * close,
                    OrderSide::Sell => -lot.shares * close,
                })
                .sum::<Decimal>()
    }

    pub fn cash(&self) -> Decimal {
        self.lock().cash
    }

    pub fn open_lots(&self) -> usize {
        self.lock().lots.len()
    }

    /// Net signed share count (short is negative)
    pub fn net_position(&self) -> Decimal {
        self.lock()
            .lots
            .iter()
            .map(|lot| match lot.side {
                OrderSide::Buy => lot.shares,
                OrderSide::Sell => -lot.shares,
            })
            .sum()
    }

    pub fn trades(&self) -> Vec<BacktestTrade> {
        self.lock().trades.clone()
    }

    fn order_record(state: &mut BrokerState, symbol: &str, side: OrderSide, qty: Decimal, price: Decimal) -> BrokerOrder {
        let id = state.next_order_id;
        state.next_order_id += 1;
        BrokerOrder {
            id: format!("sim-{}", id),
            client_order_id: format!("sim-client-{}", id),
            created_at: Utc::now(),
            filled_at: Some(Utc::now()),
            symbol: symbol.to_string(),
            qty: Some(qty.to_string()),
            filled_qty: Some(qty.to_string()),
            filled_avg_price: Some(price.to_string()),
            order_type: "market".to_string(),
            side: side.to_string(),
            status: "filled".to_string(),
        }
    }
}

/// Exit price and reason if `bar` triggers one of the lot's legs
fn exit_for(lot: &Lot, bar: &HistoricalBar) -> Option<(Decimal, ExitReason)> {
    match lot.side {
        OrderSide::Buy => {
            if bar.low <= lot.stop_loss {
                Some((bar.open.min(lot.stop_loss), ExitReason::StopLoss))
            } else if bar.high >= lot.take_profit {
                Some((bar.open.max(lot.take_profit), ExitReason::TakeProfit))
            } else {
                None
            }
        }
        OrderSide::Sell => {
            if bar.high >= lot.stop_loss {
                Some((bar.open.max(lot.stop_loss), ExitReason::StopLoss))
            } else if bar.low <= lot.take_profit {
                Some((bar.open.min(lot.take_profit), ExitReason::TakeProfit))
            } else {
                None
            }
        }
    }
}

fn settle(
    cash: &mut Decimal,
    symbol: &str,
    lot: Lot,
    date: &str,
    exit_price: Decimal,
    reason: ExitReason,
) -> BacktestTrade {
    // P&L: long = (exit - entry), short = (entry - exit)
    let (profit_loss, direction) = match lot.side {
        OrderSide::Buy => {
            *cash += exit_price * lot.shares;
            ((exit_price - lot.entry_price) * lot.shares, "long")
        }
        OrderSide::Sell => {
            *cash -= exit_price * lot.shares;
            ((lot.entry_price - exit_price) * lot.shares, "short")
        }
    };

    let cost = lot.entry_price * lot.shares;
    let profit_loss_percent = if cost > Decimal::ZERO {
        (profit_loss / cost * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
    } else {
        0.0
    };

    BacktestTrade {
        symbol: symbol.to_string(),
        direction: direction.to_string(),
        holding_period_days: date_diff(&lot.entry_date, date),
        entry_date: lot.entry_date,
        exit_date: date.to_string(),
        entry_price: lot.entry_price,
        exit_price,
        shares: lot.shares,
        profit_loss,
        profit_loss_percent,
        exit_reason: reason,
    }
}

fn date_diff(from: &str, to: &str) -> i64 {
    let parse = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok();
    match (parse(from), parse(to)) {
        (Some(a), Some(b)) => (b - a).num_days(),
        _ => 0,
    }
}

#[async_trait]
impl BrokerClient for SimulatedBroker {
    async fn get_cash(&self) -> Result<Decimal> {
        Ok(self.cash())
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal> {
        if !symbol.eq_ignore_ascii_case(&self.symbol) {
            bail!("No price data for {} (replaying {})", symbol, self.symbol);
        }
        self.lock()
            .bar
            .as_ref()
            .map(|b| b.close)
            .ok_or_else(|| anyhow!("No bar loaded yet for {}", symbol))
    }

    async fn submit_bracket_order(&self, order: BracketOrderRequest) -> Result<BrokerOrder> {
        if !order.symbol.eq_ignore_ascii_case(&self.symbol) {
            bail!("Cannot trade {} in a {} replay", order.symbol, self.symbol);
        }
        if order.quantity == 0 {
            bail!("Order quantity must be positive");
        }

        let mut state = self.lock();
        let bar = state
            .bar
            .clone()
            .ok_or_else(|| anyhow!("No bar loaded yet for {}", order.symbol))?;
        let shares = Decimal::from(order.quantity);
        let notional = shares * bar.close;

        match order.side {
            OrderSide::Buy => {
                if notional > state.cash {
                    bail!(
                        "Insufficient buying power: {} needed, {} available",
                        notional.round_dp(2),
                        state.cash.round_dp(2)
                    );
                }
                state.cash -= notional;
            }
            OrderSide::Sell => state.cash += notional,
        }

        state.lots.push(Lot {
            side: order.side,
            shares,
            entry_price: bar.close,
            entry_date: bar.date.clone(),
            take_profit: order.take_profit_price,
            stop_loss: order.stop_loss_price,
        });

        Ok(Self::order_record(&mut state, &self.symbol, order.side, shares, bar.close))
    }

    async fn close_position(&self, symbol: &str) -> Result<Option<BrokerOrder>> {
        let mut state = self.lock();
        let net: Decimal = state
            .lots
            .iter()
            .map(|lot| match lot.side {
                OrderSide::Buy => lot.shares,
                OrderSide::Sell => -lot.shares,
            })
            .sum();

        if Self::close_all(&mut state, &self.symbol, ExitReason::Flatten) == 0 {
            return Ok(None);
        }

        let close = state.bar.as_ref().map(|b| b.close).unwrap_or_default();
        let side = if net >= Decimal::ZERO { OrderSide::Sell } else { OrderSide::Buy };
        Ok(Some(Self::order_record(&mut state, symbol, side, net.abs(), close)))
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn broker_name(&self) -> &str {
        "simulated"
    }
}
