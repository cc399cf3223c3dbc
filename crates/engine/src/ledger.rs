//! Trade ledger: open/closed trade bookkeeping and running capital

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{TradeEntry, TradeExit, TradeRecord};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Trade already open for {symbol} (entered at {entry_time})")]
    DuplicateTrade {
        symbol: String,
        entry_time: DateTime<Utc>,
    },

    #[error("Invalid {field} for {symbol}: {value}")]
    InvalidEntry {
        symbol: String,
        field: &'static str,
        value: f64,
    },
}

/// Owns every trade record: at most one open trade per symbol, and the
/// closed history in ascending exit-time order.
#[derive(Debug, Clone)]
pub struct TradeLedger {
    initial_capital: Decimal,
    current_capital: Decimal,
    active: HashMap<String, TradeRecord>,
    closed: Vec<TradeRecord>,
}

impl TradeLedger {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            current_capital: initial_capital,
            active: HashMap::new(),
            closed: Vec::new(),
        }
    }

    /// Record a new open trade. Fails if `entry.symbol` already has one;
    /// the ledger is left untouched in that case.
    pub fn open_trade(&mut self, entry: TradeEntry) -> Result<TradeRecord, LedgerError> {
        validate_entry(&entry)?;

        if let Some(existing) = self.active.get(&entry.symbol) {
            return Err(LedgerError::DuplicateTrade {
                symbol: entry.symbol,
                entry_time: existing.entry_time,
            });
        }

        let record = TradeRecord::open(entry);

        info!(
            symbol = %record.symbol,
            price = %record.entry_price,
            size = %record.position_size,
            confidence = record.signal_confidence,
            "Trade opened"
        );

        self.active.insert(record.symbol.clone(), record.clone());
        Ok(record)
    }

    /// Close the open trade on `exit.symbol`.
    ///
    /// An exit with no matching open trade is logged and ignored: the
    /// upstream feed may replay or reorder exit signals.
    pub fn close_trade(&mut self, exit: TradeExit) -> Option<TradeRecord> {
        let Some(mut trade) = self.active.remove(&exit.symbol) else {
            warn!(symbol = %exit.symbol, "No active trade to close, ignoring exit");
            return None;
        };

        if exit.exit_time < trade.entry_time {
            warn!(
                symbol = %trade.symbol,
                entry_time = %trade.entry_time,
                exit_time = %exit.exit_time,
                "Exit time precedes entry time"
            );
        }

        let settled = exit
            .exit_price
            .checked_sub(trade.entry_price)
            .and_then(|price_move| price_move.checked_mul(trade.position_size))
            .and_then(|pnl| Some((pnl, self.current_capital.checked_add(pnl)?)));
        let Some((pnl, capital)) = settled else {
            warn!(
                symbol = %trade.symbol,
                entry_price = %trade.entry_price,
                exit_price = %exit.exit_price,
                size = %trade.position_size,
                "PnL outside decimal range, exit rejected"
            );
            self.active.insert(trade.symbol.clone(), trade);
            return None;
        };

        trade.exit_time = Some(exit.exit_time);
        trade.exit_price = Some(exit.exit_price);
        trade.market_impact = exit.market_impact;
        trade.duration_ms = Some((exit.exit_time - trade.entry_time).num_milliseconds());
        trade.pnl = Some(pnl);

        self.current_capital = capital;

        // Late exits land at their sorted position, after equal exit times
        let idx = self.closed.partition_point(|t| t.exit_time <= trade.exit_time);
        if idx < self.closed.len() {
            debug!(symbol = %trade.symbol, position = idx, "Out-of-order exit inserted");
        }
        self.closed.insert(idx, trade.clone());

        info!(
            symbol = %trade.symbol,
            pnl = %pnl,
            capital = %self.current_capital,
            "Trade closed"
        );

        Some(trade)
    }

    pub fn initial_capital(&self) -> Decimal {
        self.initial_capital
    }

    pub fn current_capital(&self) -> Decimal {
        self.current_capital
    }

    /// Realized PnL over every closed trade
    pub fn total_pnl(&self) -> Decimal {
        self.current_capital.saturating_sub(self.initial_capital)
    }

    /// (current / initial - 1) * 100, saturating at the decimal range
    pub fn total_return_pct(&self) -> Decimal {
        if self.initial_capital.is_zero() {
            return Decimal::ZERO;
        }
        self.current_capital
            .checked_div(self.initial_capital)
            .and_then(|ratio| ratio.checked_sub(Decimal::ONE))
            .and_then(|ratio| ratio.checked_mul(dec!(100)))
            .unwrap_or(if self.current_capital.is_sign_negative() {
                Decimal::MIN
            } else {
                Decimal::MAX
            })
    }

    /// Closed trades, oldest exit first
    pub fn closed_trades(&self) -> &[TradeRecord] {
        &self.closed
    }

    /// The most recent `size` closed trades (fewer if not available)
    pub fn window(&self, size: usize) -> &[TradeRecord] {
        &self.closed[self.closed.len().saturating_sub(size)..]
    }

    pub fn active_trade(&self, symbol: &str) -> Option<&TradeRecord> {
        self.active.get(symbol)
    }

    /// Open trades, sorted by symbol
    pub fn active_trades(&self) -> Vec<TradeRecord> {
        let mut trades: Vec<TradeRecord> = self.active.values().cloned().collect();
        trades.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        trades
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }
}

/// Confidence must lie in [0, 1] and volatility must be non-negative.
/// NaN fails both checks.
fn validate_entry(entry: &TradeEntry) -> Result<(), LedgerError> {
    let invalid = |field, value| LedgerError::InvalidEntry {
        symbol: entry.symbol.clone(),
        field,
        value,
    };

    if !(0.0..=1.0).contains(&entry.signal_confidence) {
        return Err(invalid("signal_confidence", entry.signal_confidence));
    }
    if !(entry.volatility >= 0.0 && entry.volatility.is_finite()) {
        return Err(invalid("volatility", entry.volatility));
    }
    Ok(())
}
