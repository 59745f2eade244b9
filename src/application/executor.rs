//! Executor
//!
//! Turns target weights into concrete orders for one chain and pushes each
//! through risk review, the slippage guard, and the exchange. A fill is
//! applied to the chain account only after the exchange confirms it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::risk_desk::RiskDesk;
use crate::adapters::api_client::{ApiClient, ApiError};
use crate::domain::{
    asset_key, AccountError, ChainAccount, Order, OrderProposal, OrderSide, RiskDecision, RiskRejection, Token,
};
use crate::strategy::{TargetIntent, TargetWeight};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Largest step taken toward a target in one order
    pub per_trade_base_usd: f64,
    /// Deltas below this are ignored
    pub min_order_usd: f64,
    /// Percent
    pub slippage_tolerance_pct: f64,
    pub forced_trade_usd: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            per_trade_base_usd: 25.0,
            min_order_usd: 1.0,
            slippage_tolerance_pct: 0.5,
            forced_trade_usd: 25.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Slippage on {symbol}: {deviation_pct:.3}% from signal price {signal_price:.6} exceeds {tolerance_pct:.3}%")]
    SlippageExceeded {
        symbol: String,
        signal_price: f64,
        execution_price: f64,
        deviation_pct: f64,
        tolerance_pct: f64,
    },
    #[error("Risk rejected: {0}")]
    RiskRejected(#[from] RiskRejection),
    #[error("Order of ${notional:.2} for {symbol} is below the ${minimum:.2} minimum")]
    BelowMinimum { symbol: String, notional: f64, minimum: f64 },
    #[error("Exchange rejected {order}: {source}")]
    Rejected { order: Box<Order>, source: ApiError },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Fill could not be applied: {0}")]
    Account(#[from] AccountError),
}

impl ExecutionError {
    /// Expected outcomes that only merit a debug line
    pub fn is_routine(&self) -> bool {
        match self {
            ExecutionError::RiskRejected(rejection) => rejection.is_retryable(),
            ExecutionError::BelowMinimum { .. } => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderReason {
    Entry,
    Rebalance,
    Liquidation,
    Forced,
}

impl OrderReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderReason::Entry => "momentum entry",
            OrderReason::Rebalance => "risk-parity rebalance",
            OrderReason::Liquidation => "exit signal",
            OrderReason::Forced => "daily minimum trade",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedOrder {
    pub token: Token,
    pub side: OrderSide,
    pub notional: f64,
    /// Price the decision was made at; the slippage guard compares against it
    pub signal_price: f64,
    pub reason: OrderReason,
}

#[derive(Clone)]
pub struct Executor {
    client: ApiClient,
    desk: RiskDesk,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(client: ApiClient, desk: RiskDesk, config: ExecutorConfig) -> Self {
        Self { client, desk, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Diff targets against the account. Rebalance bars also move held
    /// entry targets toward their weight and trim assets over the cap;
    /// other bars only open new ones.
    pub fn plan(&self, targets: &[TargetWeight], account: &ChainAccount, rebalance: bool) -> Vec<PlannedOrder> {
        let equity = account.equity();
        let step = self.config.per_trade_base_usd;
        let mut orders = Vec::new();

        for target in targets {
            let held = account.exposure(&target.token.symbol);
            let is_held = account.position(&target.token.symbol).is_some();

            let (side, notional, reason) = match target.intent {
                TargetIntent::Liquidate => (OrderSide::Sell, held, OrderReason::Liquidation),
                TargetIntent::Enter if !is_held => {
                    (OrderSide::Buy, (target.weight * equity).min(step), OrderReason::Entry)
                }
                TargetIntent::Enter if rebalance => {
                    let delta = target.weight * equity - held;
                    let side = if delta >= 0.0 { OrderSide::Buy } else { OrderSide::Sell };
                    (side, delta.abs().min(step), OrderReason::Rebalance)
                }
                TargetIntent::Enter => continue,
            };

            if notional < self.config.min_order_usd {
                continue;
            }
            orders.push(PlannedOrder {
                token: target.token.clone(),
                side,
                notional,
                signal_price: target.signal.price,
                reason,
            });
        }
        if rebalance {
            self.plan_cap_trims(account, &mut orders);
        }
        orders
    }

    /// Sell down holdings whose portfolio-wide exposure has drifted above the
    /// per-asset cap, whatever their signal. Each chain trims its share of
    /// the excess in proportion to what it holds.
    fn plan_cap_trims(&self, account: &ChainAccount, orders: &mut Vec<PlannedOrder>) {
        let cap = self.desk.limits().max_exposure_per_asset_pct / 100.0 * self.desk.total_equity();
        if !(cap > 0.0) {
            return;
        }

        for position in account.positions() {
            let aggregate = self.desk.asset_exposure(&position.symbol);
            let held = account.exposure(&position.symbol);
            if aggregate <= cap || !(held > 0.0) {
                continue;
            }
            let trim = ((aggregate - cap) * held / aggregate).min(held);
            if trim < self.config.min_order_usd {
                continue;
            }

            let key = asset_key(&position.symbol);
            let existing = orders.iter().position(|o| o.token.asset_key() == key);
            if let Some(index) = existing {
                let order = &orders[index];
                if order.side == OrderSide::Sell && order.notional >= trim {
                    continue;
                }
                orders.remove(index);
            }
            tracing::info!(
                "{} {} exposure ${:.2} above cap ${:.2}, trimming ${:.2}",
                account.chain,
                position.symbol,
                aggregate,
                cap,
                trim
            );
            orders.push(PlannedOrder {
                token: Token::new(&position.symbol, &position.address, position.chain),
                side: OrderSide::Sell,
                notional: trim,
                signal_price: account.mark_price(&position.symbol).unwrap_or(0.0),
                reason: OrderReason::Rebalance,
            });
        }
    }

    /// Minimal buy used to meet the daily trade minimum
    pub fn plan_forced(&self, token: Token, signal_price: f64) -> PlannedOrder {
        PlannedOrder {
            token,
            side: OrderSide::Buy,
            notional: self.config.forced_trade_usd,
            signal_price,
            reason: OrderReason::Forced,
        }
    }

    /// Review, guard, submit, and apply one order.
    ///
    /// Buys are clamped to the chain's cash and sells to the held notional
    /// before review. Any reservation taken during review is released if the
    /// order does not reach the exchange.
    pub async fn execute(&self, planned: &PlannedOrder, account: &mut ChainAccount) -> Result<Order, ExecutionError> {
        let symbol = &planned.token.symbol;
        let held_notional = account.exposure(symbol);
        let available = match planned.side {
            OrderSide::Buy => account.cash(),
            OrderSide::Sell => held_notional,
        };
        let notional = planned.notional.min(available);
        if notional < self.config.min_order_usd {
            return Err(ExecutionError::BelowMinimum {
                symbol: symbol.clone(),
                notional,
                minimum: self.config.min_order_usd,
            });
        }

        let proposal = OrderProposal {
            chain: account.chain,
            symbol: symbol.clone(),
            side: planned.side,
            notional,
            held_notional,
        };
        let approved = match self.desk.review_and_reserve(&proposal, Utc::now()) {
            RiskDecision::Approved { notional, clamps } => {
                if !clamps.is_empty() {
                    tracing::info!("{} {} clamped: {:?}", account.chain, symbol, clamps);
                }
                notional
            }
            RiskDecision::Rejected(rejection) => return Err(rejection.into()),
        };
        if approved < self.config.min_order_usd {
            self.release(planned, account, approved);
            return Err(ExecutionError::BelowMinimum {
                symbol: symbol.clone(),
                notional: approved,
                minimum: self.config.min_order_usd,
            });
        }

        match self.submit(planned, account, approved).await {
            Ok(order) => Ok(order),
            Err(e) => {
                if !matches!(e, ExecutionError::Account(_)) {
                    self.release(planned, account, approved);
                }
                Err(e)
            }
        }
    }

    async fn submit(&self, planned: &PlannedOrder, account: &mut ChainAccount, notional: f64) -> Result<Order, ExecutionError> {
        let quote = self.client.get_price(&planned.token).await?;
        self.check_slippage(planned, quote.price)?;

        let notional = self.size_at_quote(planned, account, notional, quote.price);
        if notional < self.config.min_order_usd {
            return Err(ExecutionError::BelowMinimum {
                symbol: planned.token.symbol.clone(),
                notional,
                minimum: self.config.min_order_usd,
            });
        }

        let order = Order::new(planned.token.clone(), planned.side, notional, quote.price);
        let filled = match self
            .client
            .place_trade(
                order.clone(),
                &account.cash_address,
                planned.reason.as_str(),
                self.config.slippage_tolerance_pct,
            )
            .await
        {
            Ok(filled) => filled,
            Err(source @ (ApiError::ValidationRejected(_) | ApiError::InsufficientBalance(_))) => {
                let order = order.reject(source.to_string());
                tracing::debug!("REJECTED {} ({})", order, planned.reason.as_str());
                return Err(ExecutionError::Rejected {
                    order: Box::new(order),
                    source,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        // the exchange has executed it; count it even if the local apply fails
        self.desk.record_fill(
            account.chain,
            &planned.token.symbol,
            now,
            planned.reason == OrderReason::Forced,
        );
        account.apply_fill(&filled, now)?;

        tracing::info!("FILLED {} ({})", filled, planned.reason.as_str());
        Ok(filled)
    }

    /// Sells are re-priced at the live quote so they never ask for more
    /// tokens than the account holds. An approved full exit sells the whole
    /// balance at the quote, leaving no dust.
    fn size_at_quote(&self, planned: &PlannedOrder, account: &ChainAccount, notional: f64, price: f64) -> f64 {
        if planned.side == OrderSide::Buy {
            return notional;
        }
        let symbol = &planned.token.symbol;
        let held_value = account.held_quantity(symbol) * price;
        let full_exit = planned.reason == OrderReason::Liquidation
            && notional >= account.exposure(symbol) * (1.0 - 1e-9);
        if full_exit {
            held_value
        } else {
            notional.min(held_value)
        }
    }

    fn check_slippage(&self, planned: &PlannedOrder, execution_price: f64) -> Result<(), ExecutionError> {
        if !(planned.signal_price > 0.0) {
            return Ok(());
        }
        let deviation_pct = (execution_price - planned.signal_price).abs() / planned.signal_price * 100.0;
        if deviation_pct > self.config.slippage_tolerance_pct {
            return Err(ExecutionError::SlippageExceeded {
                symbol: planned.token.symbol.clone(),
                signal_price: planned.signal_price,
                execution_price,
                deviation_pct,
                tolerance_pct: self.config.slippage_tolerance_pct,
            });
        }
        Ok(())
    }

    fn release(&self, planned: &PlannedOrder, account: &ChainAccount, notional: f64) {
        if planned.side == OrderSide::Buy {
            self.desk.release(account.chain, &planned.token.symbol, notional);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use approx::assert_relative_eq;

    use crate::adapters::rate_limiter::{RateBudget, RateLimiter};
    use crate::adapters::retry::RetryPolicy;
    use crate::domain::{AssetBalance, Chain, OrderStatus, RiskLimits, Signal};
    use crate::ports::mocks::{MockExchange, OP_TRADE};
    use crate::ports::TransportError;

    const USDC: &str = "0xusdc";

    fn arb() -> Token {
        Token::new("ARB", "0xarb", Chain::Arbitrum)
    }

    fn gmx() -> Token {
        Token::new("GMX", "0xgmx", Chain::Arbitrum)
    }

    struct Fixture {
        exchange: Arc<MockExchange>,
        desk: RiskDesk,
        executor: Executor,
        account: ChainAccount,
    }

    fn exchange(cash: f64) -> MockExchange {
        MockExchange::new()
            .with_token(arb(), 2.0)
            .with_token(gmx(), 40.0)
            .with_cash(Chain::Arbitrum, "USDC", USDC, cash)
    }

    fn fixture(cash: f64) -> Fixture {
        fixture_on(exchange(cash), cash)
    }

    fn fixture_on(exchange: MockExchange, cash: f64) -> Fixture {
        let exchange = Arc::new(exchange);
        let retry = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            jitter: 0.0,
        };
        let limiter = Arc::new(RateLimiter::new(&RateBudget::default()));
        let client = ApiClient::new(exchange.clone(), limiter, retry);
        let desk = RiskDesk::new(
            RiskLimits {
                cooldown_seconds: 0,
                ..RiskLimits::default()
            },
            Utc::now(),
        );
        let account = ChainAccount::new(Chain::Arbitrum, "USDC", USDC).with_cash(cash);
        desk.publish(Chain::Arbitrum, account.exposure_view());
        let executor = Executor::new(client, desk.clone(), ExecutorConfig::default());
        Fixture {
            exchange,
            desk,
            executor,
            account,
        }
    }

    fn target(token: Token, weight: f64, intent: TargetIntent, price: f64) -> TargetWeight {
        TargetWeight {
            chain: token.chain,
            signal: Signal {
                token: token.clone(),
                momentum: 0.01,
                volatility: 0.02,
                z_score: 1.5,
                price,
                generated_at: Utc::now(),
            },
            token,
            weight,
            intent,
        }
    }

    fn hold(account: &mut ChainAccount, symbol: &str, address: &str, amount: f64, price: f64, cash: f64) {
        account.apply_balances(
            &[
                AssetBalance {
                    symbol: "USDC".into(),
                    address: USDC.into(),
                    amount: cash,
                    price: Some(1.0),
                },
                AssetBalance {
                    symbol: symbol.into(),
                    address: address.into(),
                    amount,
                    price: Some(price),
                },
            ],
            Utc::now(),
        );
    }

    #[test]
    fn test_plan_new_entries_capped_by_base_size() {
        let f = fixture(1_000.0);
        let targets = vec![
            target(arb(), 0.5, TargetIntent::Enter, 2.0),
            target(gmx(), 0.01, TargetIntent::Enter, 40.0),
        ];
        let plan = f.executor.plan(&targets, &f.account, false);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].notional, 25.0);
        assert_eq!(plan[0].reason, OrderReason::Entry);
        assert_relative_eq!(plan[1].notional, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_plan_rebalance_only_on_rebalance_bars() {
        let mut f = fixture(0.0);
        // 100 ARB at $2 = $200 held, $800 cash
        hold(&mut f.account, "ARB", "0xarb", 100.0, 2.0, 800.0);
        let targets = vec![target(arb(), 0.1, TargetIntent::Enter, 2.0)];

        assert!(f.executor.plan(&targets, &f.account, false).is_empty());

        let plan = f.executor.plan(&targets, &f.account, true);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].side, OrderSide::Sell);
        assert_eq!(plan[0].notional, 25.0);
        assert_eq!(plan[0].reason, OrderReason::Rebalance);
    }

    #[test]
    fn test_plan_liquidation_sells_everything() {
        let mut f = fixture(0.0);
        hold(&mut f.account, "ARB", "0xarb", 100.0, 2.0, 800.0);
        let plan = f
            .executor
            .plan(&[target(arb(), 0.0, TargetIntent::Liquidate, 2.0)], &f.account, false);
        assert_eq!(plan[0].side, OrderSide::Sell);
        assert_relative_eq!(plan[0].notional, 200.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rebalance_trims_asset_over_cap() {
        let mut f = fixture(0.0);
        // 100 ARB at $9 = $900 of $3000 equity, 30%
        hold(&mut f.account, "ARB", "0xarb", 100.0, 9.0, 2_100.0);
        f.desk.publish(Chain::Arbitrum, f.account.exposure_view());
        assert!(f.executor.plan(&[], &f.account, true).is_empty());

        // mark rises to $14: $1400 of $3500, 40% against a $1225 cap
        hold(&mut f.account, "ARB", "0xarb", 100.0, 14.0, 2_100.0);
        f.desk.publish(Chain::Arbitrum, f.account.exposure_view());
        assert!(f.executor.plan(&[], &f.account, false).is_empty());

        let plan = f.executor.plan(&[], &f.account, true);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].side, OrderSide::Sell);
        assert_eq!(plan[0].reason, OrderReason::Rebalance);
        assert_relative_eq!(plan[0].notional, 175.0, epsilon = 1e-9);
        assert_relative_eq!(plan[0].signal_price, 14.0, epsilon = 1e-9);

        // an entry target that would add to the asset is replaced by the trim
        let plan = f
            .executor
            .plan(&[target(arb(), 0.5, TargetIntent::Enter, 14.0)], &f.account, true);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].side, OrderSide::Sell);
        assert_relative_eq!(plan[0].notional, 175.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cap_trim_split_across_chains() {
        let mut f = fixture(0.0);
        hold(&mut f.account, "ARB", "0xarb", 100.0, 14.0, 2_100.0);
        f.desk.publish(Chain::Arbitrum, f.account.exposure_view());

        // another chain holds the same asset: $2800 of $7000 is 40%
        let mut other = ChainAccount::new(Chain::Base, "USDC", "0xbase-usdc");
        other.apply_balances(
            &[
                AssetBalance {
                    symbol: "USDC".into(),
                    address: "0xbase-usdc".into(),
                    amount: 2_100.0,
                    price: Some(1.0),
                },
                AssetBalance {
                    symbol: "arb".into(),
                    address: "0xarb-base".into(),
                    amount: 100.0,
                    price: Some(14.0),
                },
            ],
            Utc::now(),
        );
        f.desk.publish(Chain::Base, other.exposure_view());

        // excess is 2800 - 2450 = 350, half of it held here
        let plan = f.executor.plan(&[], &f.account, true);
        assert_eq!(plan.len(), 1);
        assert_relative_eq!(plan[0].notional, 175.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_liquidation_below_mark_sells_whole_balance() {
        let mut f = fixture_on(
            exchange(800.0).with_holding(Chain::Arbitrum, "ARB", "0xarb", 100.0),
            800.0,
        );
        hold(&mut f.account, "ARB", "0xarb", 100.0, 2.0, 800.0);
        f.desk.publish(Chain::Arbitrum, f.account.exposure_view());
        let plan = f
            .executor
            .plan(&[target(arb(), 0.0, TargetIntent::Liquidate, 2.0)], &f.account, false);
        assert_relative_eq!(plan[0].notional, 200.0, epsilon = 1e-9);

        // quote dips 0.25%, inside the slippage tolerance
        f.exchange.set_price_path("0xarb", vec![1.995]);
        let order = f.executor.execute(&plan[0], &mut f.account).await.unwrap();

        assert!(order.is_filled());
        assert_relative_eq!(order.notional, 199.5, epsilon = 1e-9);
        assert!(f.account.position("ARB").is_none());
        assert_relative_eq!(f.account.cash(), 999.5, epsilon = 1e-9);
        assert_relative_eq!(f.exchange.balance(Chain::Arbitrum, "0xarb"), 0.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_liquidation_above_mark_leaves_no_dust() {
        let mut f = fixture_on(
            exchange(800.0).with_holding(Chain::Arbitrum, "ARB", "0xarb", 100.0),
            800.0,
        );
        hold(&mut f.account, "ARB", "0xarb", 100.0, 2.0, 800.0);
        f.desk.publish(Chain::Arbitrum, f.account.exposure_view());
        let plan = f
            .executor
            .plan(&[target(arb(), 0.0, TargetIntent::Liquidate, 2.0)], &f.account, false);

        f.exchange.set_price_path("0xarb", vec![2.008]);
        let order = f.executor.execute(&plan[0], &mut f.account).await.unwrap();

        assert_relative_eq!(order.notional, 200.8, epsilon = 1e-9);
        assert!(f.account.position("ARB").is_none());
        assert_relative_eq!(f.exchange.balance(Chain::Arbitrum, "0xarb"), 0.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_execute_buy_updates_account() {
        let mut f = fixture(1_000.0);
        let planned = f.executor.plan(&[target(arb(), 0.5, TargetIntent::Enter, 2.0)], &f.account, false);

        let order = f.executor.execute(&planned[0], &mut f.account).await.unwrap();
        assert!(order.is_filled());
        assert_relative_eq!(f.account.cash(), 975.0, epsilon = 1e-9);
        assert_relative_eq!(f.account.held_quantity("ARB"), 12.5, epsilon = 1e-9);
        assert_eq!(f.desk.total_trades(), 1);
        assert_eq!(f.exchange.trades()[0].reason, "momentum entry");
    }

    #[tokio::test]
    async fn test_slippage_guard_rejects_and_releases() {
        let mut f = fixture(1_000.0);
        // signal saw $1.90, exchange now quotes $2.00: 5.3% away
        let planned = f.executor.plan(&[target(arb(), 0.5, TargetIntent::Enter, 1.9)], &f.account, false);

        let result = f.executor.execute(&planned[0], &mut f.account).await;
        assert!(matches!(result, Err(ExecutionError::SlippageExceeded { .. })));
        assert_eq!(f.exchange.call_count(OP_TRADE), 0);
        assert_eq!(f.desk.asset_exposure("ARB"), 0.0);
        assert_eq!(f.account.cash(), 1_000.0);
    }

    #[tokio::test]
    async fn test_sell_without_position_is_rejected() {
        let mut f = fixture(1_000.0);
        let planned = PlannedOrder {
            token: arb(),
            side: OrderSide::Sell,
            notional: 50.0,
            signal_price: 2.0,
            reason: OrderReason::Liquidation,
        };
        let result = f.executor.execute(&planned, &mut f.account).await;
        assert!(matches!(result, Err(ExecutionError::BelowMinimum { .. })));
        assert_eq!(f.exchange.call_count(OP_TRADE), 0);
    }

    #[tokio::test]
    async fn test_buy_clamped_to_cash() {
        let mut f = fixture(10.0);
        // a second, well funded chain lifts the portfolio-wide caps above $10
        let other = ChainAccount::new(Chain::Base, "USDC", "0xbase-usdc").with_cash(10_000.0);
        f.desk.publish(Chain::Base, other.exposure_view());

        let planned = f.executor.plan_forced(arb(), 2.0);
        let order = f.executor.execute(&planned, &mut f.account).await.unwrap();
        assert_relative_eq!(order.notional, 10.0, epsilon = 1e-9);
        assert_relative_eq!(f.account.cash(), 0.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_exchange_rejection_releases_reservation() {
        let mut f = fixture(1_000.0);
        f.exchange
            .fail_next(OP_TRADE, TransportError::from_status(400, "token not tradable"));
        let planned = f.executor.plan_forced(gmx(), 40.0);

        let result = f.executor.execute(&planned, &mut f.account).await;
        match result {
            Err(ExecutionError::Rejected { order, source }) => {
                assert!(matches!(source, ApiError::ValidationRejected(_)));
                assert!(order.status.is_terminal());
                assert!(matches!(&order.status, OrderStatus::Rejected(reason) if reason.contains("token not tradable")));
            }
            other => panic!("expected exchange rejection, got {:?}", other),
        }
        assert_eq!(f.desk.asset_exposure("GMX"), 0.0);
        assert_eq!(f.desk.total_trades(), 0);
        assert_eq!(f.account.cash(), 1_000.0);
    }
}
