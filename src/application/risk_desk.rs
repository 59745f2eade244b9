//! Shared risk desk
//!
//! One `RiskManager` plus the cross-chain `ExposureBook`, behind a single
//! synchronous lock. Every method takes the lock for a few map lookups and
//! releases it before returning; nothing here is held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::domain::{
    Chain, ChainExposure, ExposureBook, OrderProposal, OrderSide, RiskDecision, RiskLimits,
    RiskManager, RiskState,
};

#[derive(Debug)]
struct Desk {
    manager: RiskManager,
    book: ExposureBook,
}

#[derive(Debug, Clone)]
pub struct RiskDesk {
    inner: Arc<Mutex<Desk>>,
}

impl RiskDesk {
    pub fn new(limits: RiskLimits, now: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Desk {
                manager: RiskManager::new(limits, now),
                book: ExposureBook::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Desk> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Review a proposal and, for approved buys, reserve the approved
    /// notional in the same critical section.
    pub fn review_and_reserve(&self, proposal: &OrderProposal, now: DateTime<Utc>) -> RiskDecision {
        let mut desk = self.lock();
        let decision = desk.manager.review(proposal, &desk.book, now);
        if let (OrderSide::Buy, Some(notional)) = (proposal.side, decision.approved_notional()) {
            desk.book.reserve(proposal.chain, &proposal.symbol, notional);
        }
        decision
    }

    /// Give back a reservation whose order did not fill
    pub fn release(&self, chain: Chain, symbol: &str, notional: f64) {
        self.lock().book.release(chain, symbol, notional);
    }

    pub fn publish(&self, chain: Chain, view: ChainExposure) {
        self.lock().book.publish(chain, view);
    }

    pub fn record_fill(&self, chain: Chain, symbol: &str, at: DateTime<Utc>, forced: bool) {
        self.lock().manager.record_trade(chain, symbol, at, forced);
    }

    pub fn claim_forced_trade(&self, now: DateTime<Utc>) -> bool {
        self.lock().manager.claim_forced_trade(now)
    }

    pub fn release_forced_trade(&self) {
        self.lock().manager.release_forced_trade();
    }

    pub fn observe_equity(&self, equity: f64, at: DateTime<Utc>) -> RiskState {
        self.lock().manager.observe_equity(equity, at)
    }

    /// Operator-driven clear; the trading loop never calls this
    pub fn reset_halt(&self, current_equity: f64) {
        self.lock().manager.reset_halt(current_equity);
    }

    pub fn state(&self) -> RiskState {
        self.lock().manager.state()
    }

    pub fn total_trades(&self) -> u64 {
        self.lock().manager.total_trades()
    }

    pub fn daily_trades(&self, now: DateTime<Utc>) -> u32 {
        self.lock().manager.daily_trades(now)
    }

    pub fn total_equity(&self) -> f64 {
        self.lock().book.total_equity()
    }

    pub fn asset_exposure(&self, symbol: &str) -> f64 {
        self.lock().book.asset_exposure(symbol)
    }

    pub fn limits(&self) -> RiskLimits {
        self.lock().manager.limits().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    fn view(equity: f64, held: &[(&str, f64)]) -> ChainExposure {
        ChainExposure {
            equity,
            by_asset: held.iter().map(|(k, v)| (k.to_string(), *v)).collect::<HashMap<_, _>>(),
        }
    }

    fn buy(chain: Chain, symbol: &str, notional: f64) -> OrderProposal {
        OrderProposal {
            chain,
            symbol: symbol.into(),
            side: OrderSide::Buy,
            notional,
            held_notional: 0.0,
        }
    }

    fn desk() -> RiskDesk {
        let limits = RiskLimits {
            cooldown_seconds: 0,
            ..RiskLimits::default()
        };
        RiskDesk::new(limits, Utc::now())
    }

    #[test]
    fn test_concurrent_chains_share_asset_cap() {
        let desk = desk();
        desk.publish(Chain::Eth, view(20_000.0, &[("WETH", 6_000.0)]));
        desk.publish(Chain::Base, view(20_000.0, &[]));
        let now = Utc::now();

        // cap 14k, 6k held: 8k of headroom across both chains
        let first = desk.review_and_reserve(&buy(Chain::Base, "WETH", 5_000.0), now);
        assert_eq!(first.approved_notional(), Some(5_000.0));
        let second = desk.review_and_reserve(&buy(Chain::Eth, "weth", 5_000.0), now);
        assert_relative_eq!(second.approved_notional().unwrap(), 3_000.0, epsilon = 1e-9);

        let third = desk.review_and_reserve(&buy(Chain::Base, "WETH", 100.0), now);
        assert!(matches!(third, RiskDecision::Rejected(_)));
        assert_relative_eq!(desk.asset_exposure("WETH"), 14_000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_release_restores_headroom() {
        let desk = desk();
        desk.publish(Chain::Base, view(10_000.0, &[]));
        let now = Utc::now();

        let approved = desk
            .review_and_reserve(&buy(Chain::Base, "ARB", 2_500.0), now)
            .approved_notional()
            .unwrap();
        desk.release(Chain::Base, "ARB", approved);
        assert_eq!(desk.asset_exposure("ARB"), 0.0);
    }

    #[test]
    fn test_sells_do_not_reserve() {
        let desk = desk();
        desk.publish(Chain::Base, view(10_000.0, &[("ARB", 1_000.0)]));
        let sell = OrderProposal {
            side: OrderSide::Sell,
            held_notional: 1_000.0,
            ..buy(Chain::Base, "ARB", 400.0)
        };
        assert_eq!(desk.review_and_reserve(&sell, Utc::now()).approved_notional(), Some(400.0));
        assert_eq!(desk.asset_exposure("ARB"), 1_000.0);
    }

    #[test]
    fn test_halt_observed_through_desk() {
        let desk = desk();
        let now = Utc::now();
        desk.observe_equity(10_000.0, now);
        assert!(desk.observe_equity(8_100.0, now).is_halted());
        assert!(desk.state().is_halted());
        desk.reset_halt(8_100.0);
        assert_eq!(desk.state(), RiskState::Normal);
    }
}
