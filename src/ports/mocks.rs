//! In-memory doubles for the exchange and telemetry ports.
//!
//! `MockExchange` keeps simulated balances per chain and settles trades
//! against them, so a trading loop driven by it sees its own fills on the
//! next balance refresh. Failures can be scripted per operation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::exchange::{ExchangeTransport, PriceQuote, TradeReceipt, TradeRequest, TransportError};
use super::telemetry::{TelemetryError, TelemetrySink};
use crate::domain::{AssetBalance, Chain, EquitySnapshot, Token};

/// Operation names used for call recording and scripted failures
pub const OP_HEALTH: &str = "health";
pub const OP_DISCOVER: &str = "discover";
pub const OP_PRICE: &str = "price";
pub const OP_BALANCES: &str = "balances";
pub const OP_TRADE: &str = "trade";

#[derive(Debug, Default)]
struct MockState {
    tokens: HashMap<Chain, Vec<Token>>,
    /// Lowercased address -> upcoming prices; the last one sticks
    prices: HashMap<String, VecDeque<f64>>,
    balances: HashMap<Chain, Vec<AssetBalance>>,
    failures: HashMap<&'static str, VecDeque<TransportError>>,
    calls: Vec<String>,
    trades: Vec<TradeRequest>,
    next_id: u64,
}

impl MockState {
    fn scripted_failure(&mut self, op: &'static str) -> Option<TransportError> {
        self.failures.get_mut(op).and_then(|queue| queue.pop_front())
    }

    fn current_price(&self, address: &str) -> Option<f64> {
        self.prices
            .get(&address.to_ascii_lowercase())
            .and_then(|queue| queue.front().copied())
    }

    fn next_price(&mut self, address: &str) -> Option<f64> {
        let queue = self.prices.get_mut(&address.to_ascii_lowercase())?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        }
    }

    fn symbol_of(&self, chain: Chain, address: &str) -> String {
        self.tokens
            .get(&chain)
            .and_then(|tokens| tokens.iter().find(|t| t.address.eq_ignore_ascii_case(address)))
            .map(|t| t.symbol.clone())
            .or_else(|| {
                self.balances.get(&chain).and_then(|lines| {
                    lines
                        .iter()
                        .find(|l| l.address.eq_ignore_ascii_case(address))
                        .map(|l| l.symbol.clone())
                })
            })
            .unwrap_or_else(|| address.to_string())
    }

    fn balance_mut(&mut self, chain: Chain, address: &str, symbol: &str) -> &mut AssetBalance {
        let lines = self.balances.entry(chain).or_default();
        let index = match lines.iter().position(|l| l.address.eq_ignore_ascii_case(address)) {
            Some(index) => index,
            None => {
                lines.push(AssetBalance {
                    symbol: symbol.to_string(),
                    address: address.to_string(),
                    amount: 0.0,
                    price: None,
                });
                lines.len() - 1
            }
        };
        &mut lines[index]
    }

    fn settle(&mut self, request: &TradeRequest) -> Result<TradeReceipt, TransportError> {
        let chain = request.chain;
        let from_price = self.price_or_par(&request.from_token);
        let to_price = self.price_or_par(&request.to_token);
        if !(request.amount_usd > 0.0) {
            return Err(TransportError::Rejected {
                status: 400,
                body: format!("invalid amount {}", request.amount_usd),
            });
        }
        let from_amount = request.amount_usd / from_price;
        let to_amount = request.amount_usd / to_price;

        let from_symbol = self.symbol_of(chain, &request.from_token);
        let held = self.balance_mut(chain, &request.from_token, &from_symbol).amount;
        if held + 1e-9 < from_amount {
            return Err(TransportError::InsufficientBalance(format!(
                "insufficient {}: have {:.6}, need {:.6}",
                from_symbol, held, from_amount
            )));
        }

        let from_line = self.balance_mut(chain, &request.from_token, &from_symbol);
        from_line.amount = (from_line.amount - from_amount).max(0.0);
        let to_symbol = self.symbol_of(chain, &request.to_token);
        let to_line = self.balance_mut(chain, &request.to_token, &to_symbol);
        to_line.amount += to_amount;

        self.next_id += 1;
        Ok(TradeReceipt {
            id: format!("mock-{}", self.next_id),
            price: Some(to_amount / from_amount),
            from_amount: Some(from_amount),
            to_amount: Some(to_amount),
        })
    }

    /// Unpriced tokens (the cash stable) settle at $1
    fn price_or_par(&self, address: &str) -> f64 {
        self.current_price(address).filter(|p| *p > 0.0).unwrap_or(1.0)
    }
}

/// Deterministic exchange double
#[derive(Debug, Default)]
pub struct MockExchange {
    state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a discoverable token with a constant price
    pub fn with_token(self, token: Token, price: f64) -> Self {
        self.with_price_path(token, vec![price])
    }

    /// Register a discoverable token whose price walks `path`, one step per quote
    pub fn with_price_path(self, token: Token, path: Vec<f64>) -> Self {
        {
            let mut state = self.state();
            state.prices.insert(token.address.to_ascii_lowercase(), path.into());
            state.tokens.entry(token.chain).or_default().push(token);
        }
        self
    }

    /// Seed a chain's cash balance
    pub fn with_cash(self, chain: Chain, symbol: &str, address: &str, amount: f64) -> Self {
        {
            let mut state = self.state();
            let line = state.balance_mut(chain, address, symbol);
            line.amount = amount;
            line.price = Some(1.0);
        }
        self
    }

    /// Seed a chain's holding of an already registered token
    pub fn with_holding(self, chain: Chain, symbol: &str, address: &str, amount: f64) -> Self {
        {
            let mut state = self.state();
            state.balance_mut(chain, address, symbol).amount = amount;
        }
        self
    }

    /// Fail the next call of `op` with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, op: &'static str, error: TransportError) {
        self.state().failures.entry(op).or_default().push_back(error);
    }

    /// Replace the upcoming prices of a token
    pub fn set_price_path(&self, address: &str, path: Vec<f64>) {
        self.state()
            .prices
            .insert(address.to_ascii_lowercase(), path.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| c.starts_with(op)).count()
    }

    pub fn trades(&self) -> Vec<TradeRequest> {
        self.state().trades.clone()
    }

    pub fn balance(&self, chain: Chain, address: &str) -> f64 {
        self.state()
            .balances
            .get(&chain)
            .and_then(|lines| lines.iter().find(|l| l.address.eq_ignore_ascii_case(address)))
            .map(|l| l.amount)
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl ExchangeTransport for MockExchange {
    async fn health(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.calls.push(OP_HEALTH.to_string());
        match state.scripted_failure(OP_HEALTH) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn discover_tokens(&self, chain: Chain) -> Result<Vec<Token>, TransportError> {
        let mut state = self.state();
        state.calls.push(format!("{} {}", OP_DISCOVER, chain));
        if let Some(error) = state.scripted_failure(OP_DISCOVER) {
            return Err(error);
        }
        Ok(state.tokens.get(&chain).cloned().unwrap_or_default())
    }

    async fn get_price(&self, token: &Token) -> Result<PriceQuote, TransportError> {
        let mut state = self.state();
        state.calls.push(format!("{} {} {}", OP_PRICE, token.chain, token.symbol));
        if let Some(error) = state.scripted_failure(OP_PRICE) {
            return Err(error);
        }
        match state.next_price(&token.address) {
            Some(price) => Ok(PriceQuote { price, timestamp: Utc::now() }),
            None => Err(TransportError::Rejected {
                status: 404,
                body: format!("no price for {}", token.address),
            }),
        }
    }

    async fn get_balances(&self, chain: Chain) -> Result<Vec<AssetBalance>, TransportError> {
        let mut state = self.state();
        state.calls.push(format!("{} {}", OP_BALANCES, chain));
        if let Some(error) = state.scripted_failure(OP_BALANCES) {
            return Err(error);
        }
        let lines = state.balances.get(&chain).cloned().unwrap_or_default();
        Ok(lines
            .into_iter()
            .map(|mut line| {
                if line.price.is_none() {
                    line.price = state.current_price(&line.address);
                }
                line
            })
            .collect())
    }

    async fn execute_trade(&self, request: &TradeRequest) -> Result<TradeReceipt, TransportError> {
        let mut state = self.state();
        state.calls.push(format!("{} {} {:.2}", OP_TRADE, request.chain, request.amount_usd));
        if let Some(error) = state.scripted_failure(OP_TRADE) {
            return Err(error);
        }
        let receipt = state.settle(request)?;
        state.trades.push(request.clone());
        Ok(receipt)
    }
}

/// Telemetry sink that keeps rows in memory
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    rows: Mutex<Vec<EquitySnapshot>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<EquitySnapshot> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn record(&self, snapshot: &EquitySnapshot) -> Result<(), TelemetryError> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderSide;

    fn weth() -> Token {
        Token::new("WETH", "0xweth", Chain::Base)
    }

    fn exchange() -> MockExchange {
        MockExchange::new()
            .with_token(weth(), 2000.0)
            .with_cash(Chain::Base, "USDC", "0xusdc", 1000.0)
    }

    fn buy_request(amount: f64) -> TradeRequest {
        let order = crate::domain::Order::new(weth(), OrderSide::Buy, amount, 2000.0);
        TradeRequest::for_order(&order, "0xusdc", "test", 0.5)
    }

    #[tokio::test]
    async fn test_trade_settles_balances() {
        let ex = exchange();
        let receipt = ex.execute_trade(&buy_request(500.0)).await.unwrap();
        assert_eq!(receipt.to_amount, Some(0.25));
        assert_eq!(ex.balance(Chain::Base, "0xusdc"), 500.0);
        assert_eq!(ex.balance(Chain::Base, "0xweth"), 0.25);

        let lines = ex.get_balances(Chain::Base).await.unwrap();
        let weth_line = lines.iter().find(|l| l.symbol == "WETH").unwrap();
        assert_eq!(weth_line.price, Some(2000.0));
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let ex = exchange();
        let result = ex.execute_trade(&buy_request(5000.0)).await;
        assert!(matches!(result, Err(TransportError::InsufficientBalance(_))));
        assert_eq!(ex.balance(Chain::Base, "0xusdc"), 1000.0);
        assert!(ex.trades().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failures_and_price_path() {
        let ex = exchange();
        ex.set_price_path("0xWETH", vec![1.0, 2.0, 3.0]);
        ex.fail_next(OP_PRICE, TransportError::Timeout);

        assert_eq!(ex.get_price(&weth()).await, Err(TransportError::Timeout));
        let prices: Vec<f64> = [
            ex.get_price(&weth()).await.unwrap().price,
            ex.get_price(&weth()).await.unwrap().price,
            ex.get_price(&weth()).await.unwrap().price,
            ex.get_price(&weth()).await.unwrap().price,
        ]
        .to_vec();
        assert_eq!(prices, vec![1.0, 2.0, 3.0, 3.0]);
        assert_eq!(ex.call_count(OP_PRICE), 5);
    }
}
