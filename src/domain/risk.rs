//! Risk Manager
//!
//! Gatekeeper between the allocator and the executor. Two states:
//! `Normal` and `DrawdownHalt`. The halt is entered once aggregate drawdown
//! from the equity peak reaches `max_drawdown_stop` and stays for the rest
//! of the run; only `reset_halt` (operator action) clears it.
//!
//! Every proposal is reviewed in a fixed order:
//! 1. halt and the daily trade cap block buys, sells always pass
//! 2. notional above the single-trade cap is clamped to the cap
//! 3. buys are clamped to the remaining per-asset headroom (skip at zero)
//! 4. an asset still in cooldown is rejected
//!
//! The daily trade counter drives the forced-trade policy: with less than
//! the forcing margin left in the UTC day and fewer than `min_daily_trades`
//! fills, one minimal trade per missing fill is claimed.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::account::ChainExposure;
use super::chain::Chain;
use super::order::OrderSide;
use super::token::asset_key;

/// Smallest notional worth sending
const NOTIONAL_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Max single order as percent of total portfolio equity
    pub max_single_trade_pct: f64,
    /// Max aggregate exposure per asset as percent of total portfolio equity
    pub max_exposure_per_asset_pct: f64,
    /// Drawdown fraction that trips the halt
    pub max_drawdown_stop: f64,
    pub min_daily_trades: u32,
    /// Fills per UTC day after which new buys are refused
    pub max_daily_trades: u32,
    pub cooldown_seconds: u64,
    /// Forced trades fire once less than this is left in the UTC day
    pub forced_trade_margin_minutes: u64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_single_trade_pct: 25.0,
            max_exposure_per_asset_pct: 35.0,
            max_drawdown_stop: 0.18,
            min_daily_trades: 3,
            max_daily_trades: 60,
            cooldown_seconds: 30,
            forced_trade_margin_minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RiskState {
    Normal,
    DrawdownHalt { drawdown: f64, at: DateTime<Utc> },
}

impl RiskState {
    pub fn is_halted(&self) -> bool {
        matches!(self, RiskState::DrawdownHalt { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskRejection {
    #[error("Drawdown halt active ({0:.2}% from peak): new buys blocked")]
    DrawdownHalt(f64),
    #[error("No position in {0} on this chain: sells never open shorts")]
    NoPosition(String),
    #[error("No exposure headroom left for {0}")]
    NoHeadroom(String),
    #[error("Daily trade cap of {0} reached: new buys blocked until UTC midnight")]
    DailyCap(u32),
    #[error("{symbol} in cooldown for another {remaining_secs}s")]
    Cooldown { symbol: String, remaining_secs: i64 },
    #[error("Non-positive notional {0}")]
    NonPositiveNotional(f64),
    #[error("Portfolio equity is not positive")]
    NoEquity,
}

impl RiskRejection {
    /// Whether the same proposal may pass on a later cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RiskRejection::Cooldown { .. } | RiskRejection::NoHeadroom(_) | RiskRejection::DailyCap(_)
        )
    }
}

/// A downward adjustment applied during review
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Clamp {
    HeldNotional { from: f64, to: f64 },
    TradeCap { from: f64, to: f64 },
    AssetCap { from: f64, to: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved { notional: f64, clamps: Vec<Clamp> },
    Rejected(RiskRejection),
}

impl RiskDecision {
    pub fn approved_notional(&self) -> Option<f64> {
        match self {
            RiskDecision::Approved { notional, .. } => Some(*notional),
            RiskDecision::Rejected(_) => None,
        }
    }
}

/// Order intent submitted for review
#[derive(Debug, Clone, PartialEq)]
pub struct OrderProposal {
    pub chain: Chain,
    pub symbol: String,
    pub side: OrderSide,
    pub notional: f64,
    /// Notional currently held in this asset on `chain`
    pub held_notional: f64,
}

/// Cross-chain view of equity and per-asset exposure.
///
/// Chains publish their exposure after every refresh and fill. Approved buys
/// reserve notional until the owning chain publishes again or releases.
#[derive(Debug, Clone, Default)]
pub struct ExposureBook {
    chains: HashMap<Chain, ChainExposure>,
    reserved: HashMap<(Chain, String), f64>,
}

impl ExposureBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a chain's view; clears its reservations
    pub fn publish(&mut self, chain: Chain, view: ChainExposure) {
        self.chains.insert(chain, view);
        self.reserved.retain(|(c, _), _| *c != chain);
    }

    pub fn reserve(&mut self, chain: Chain, symbol: &str, notional: f64) {
        *self.reserved.entry((chain, asset_key(symbol))).or_insert(0.0) += notional;
    }

    pub fn release(&mut self, chain: Chain, symbol: &str, notional: f64) {
        let key = (chain, asset_key(symbol));
        if let Some(held) = self.reserved.get_mut(&key) {
            *held -= notional;
            if *held <= NOTIONAL_EPSILON {
                self.reserved.remove(&key);
            }
        }
    }

    pub fn total_equity(&self) -> f64 {
        self.chains.values().map(|c| c.equity).sum()
    }

    pub fn chain_equity(&self, chain: Chain) -> Option<f64> {
        self.chains.get(&chain).map(|c| c.equity)
    }

    pub fn published_chains(&self) -> usize {
        self.chains.len()
    }

    /// Sum across chains of held plus reserved notional
    pub fn asset_exposure(&self, symbol: &str) -> f64 {
        let key = asset_key(symbol);
        let held: f64 = self
            .chains
            .values()
            .filter_map(|c| c.by_asset.get(&key))
            .sum();
        let reserved: f64 = self
            .reserved
            .iter()
            .filter(|((_, k), _)| *k == key)
            .map(|(_, v)| *v)
            .sum();
        held + reserved
    }
}

/// Fills per UTC day, plus forced trades claimed but not yet filled
#[derive(Debug, Clone, PartialEq)]
pub struct DailyTradeCounter {
    day: NaiveDate,
    executed: u32,
    forced_in_flight: u32,
}

impl DailyTradeCounter {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            day: now.date_naive(),
            executed: 0,
            forced_in_flight: 0,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.executed = 0;
            self.forced_in_flight = 0;
        }
    }

    pub fn executed_on(&self, now: DateTime<Utc>) -> u32 {
        if now.date_naive() == self.day {
            self.executed
        } else {
            0
        }
    }
}

/// Time left until the next UTC midnight
pub fn remaining_in_day(now: DateTime<Utc>) -> Duration {
    let next_midnight = (now.date_naive() + Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc());
    match next_midnight {
        Some(midnight) => midnight - now,
        None => Duration::zero(),
    }
}

#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
    state: RiskState,
    peak_equity: Option<f64>,
    daily: DailyTradeCounter,
    last_trade: HashMap<(Chain, String), DateTime<Utc>>,
    total_trades: u64,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, now: DateTime<Utc>) -> Self {
        Self {
            limits,
            state: RiskState::Normal,
            peak_equity: None,
            daily: DailyTradeCounter::new(now),
            last_trade: HashMap::new(),
            total_trades: 0,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn state(&self) -> RiskState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state.is_halted()
    }

    pub fn peak_equity(&self) -> Option<f64> {
        self.peak_equity
    }

    pub fn total_trades(&self) -> u64 {
        self.total_trades
    }

    pub fn daily_trades(&self, now: DateTime<Utc>) -> u32 {
        self.daily.executed_on(now)
    }

    /// Feed one aggregate equity observation. Returns the state afterwards.
    pub fn observe_equity(&mut self, equity: f64, at: DateTime<Utc>) -> RiskState {
        if !equity.is_finite() {
            return self.state;
        }
        let peak = self.peak_equity.map_or(equity, |p| p.max(equity));
        self.peak_equity = Some(peak);

        if self.state.is_halted() || peak <= 0.0 {
            return self.state;
        }

        let drawdown = (peak - equity) / peak;
        if drawdown >= self.limits.max_drawdown_stop {
            tracing::error!(
                "DRAWDOWN HALT: equity ${:.2} is {:.2}% below peak ${:.2} (stop {:.2}%) - new buys disabled until restart",
                equity,
                drawdown * 100.0,
                peak,
                self.limits.max_drawdown_stop * 100.0
            );
            self.state = RiskState::DrawdownHalt { drawdown, at };
        }
        self.state
    }

    /// Operator-driven clear of the drawdown halt
    pub fn reset_halt(&mut self, current_equity: f64) {
        tracing::warn!("Drawdown halt cleared, peak reset to ${:.2}", current_equity);
        self.state = RiskState::Normal;
        self.peak_equity = Some(current_equity);
    }

    /// Review a proposal against the book. Does not mutate anything.
    pub fn review(&self, proposal: &OrderProposal, book: &ExposureBook, now: DateTime<Utc>) -> RiskDecision {
        let symbol = asset_key(&proposal.symbol);
        let mut notional = proposal.notional;
        let mut clamps = Vec::new();

        if !(notional > NOTIONAL_EPSILON) {
            return RiskDecision::Rejected(RiskRejection::NonPositiveNotional(notional));
        }

        // (a) halt gate and daily cap, and no-short rule for sells
        match proposal.side {
            OrderSide::Buy => {
                if let RiskState::DrawdownHalt { drawdown, .. } = self.state {
                    return RiskDecision::Rejected(RiskRejection::DrawdownHalt(drawdown * 100.0));
                }
                if self.daily.executed_on(now) >= self.limits.max_daily_trades {
                    return RiskDecision::Rejected(RiskRejection::DailyCap(self.limits.max_daily_trades));
                }
            }
            OrderSide::Sell => {
                if !(proposal.held_notional > NOTIONAL_EPSILON) {
                    return RiskDecision::Rejected(RiskRejection::NoPosition(symbol));
                }
                if notional > proposal.held_notional {
                    clamps.push(Clamp::HeldNotional { from: notional, to: proposal.held_notional });
                    notional = proposal.held_notional;
                }
            }
        }

        let equity = book.total_equity();
        if !(equity > 0.0) {
            return RiskDecision::Rejected(RiskRejection::NoEquity);
        }

        // (b) single-trade cap
        let trade_cap = equity * self.limits.max_single_trade_pct / 100.0;
        if notional > trade_cap {
            clamps.push(Clamp::TradeCap { from: notional, to: trade_cap });
            notional = trade_cap;
        }

        // (c) per-asset headroom, buys only
        if proposal.side == OrderSide::Buy {
            let asset_cap = equity * self.limits.max_exposure_per_asset_pct / 100.0;
            let headroom = (asset_cap - book.asset_exposure(&symbol)).max(0.0);
            if headroom <= NOTIONAL_EPSILON {
                return RiskDecision::Rejected(RiskRejection::NoHeadroom(symbol));
            }
            if notional > headroom {
                clamps.push(Clamp::AssetCap { from: notional, to: headroom });
                notional = headroom;
            }
        }

        // (d) cooldown
        if let Some(last) = self.last_trade.get(&(proposal.chain, symbol.clone())) {
            let ready_at = *last + Duration::seconds(self.limits.cooldown_seconds as i64);
            if now < ready_at {
                return RiskDecision::Rejected(RiskRejection::Cooldown {
                    symbol,
                    remaining_secs: (ready_at - now).num_seconds().max(1),
                });
            }
        }

        RiskDecision::Approved { notional, clamps }
    }

    /// Record an executed trade
    pub fn record_trade(&mut self, chain: Chain, symbol: &str, at: DateTime<Utc>, forced: bool) {
        self.daily.roll(at);
        self.daily.executed += 1;
        if forced {
            self.daily.forced_in_flight = self.daily.forced_in_flight.saturating_sub(1);
        }
        self.total_trades += 1;
        self.last_trade.insert((chain, asset_key(symbol)), at);
    }

    /// Whether the forced-trade policy wants another fill right now
    pub fn forced_trade_due(&mut self, now: DateTime<Utc>) -> bool {
        self.daily.roll(now);
        if self.is_halted() {
            return false;
        }
        let pending = self.daily.executed + self.daily.forced_in_flight;
        if pending >= self.limits.min_daily_trades {
            return false;
        }
        remaining_in_day(now) <= Duration::minutes(self.limits.forced_trade_margin_minutes as i64)
    }

    /// Claim one forced trade. Only succeeds while the claimed and executed
    /// count stays below the daily minimum.
    pub fn claim_forced_trade(&mut self, now: DateTime<Utc>) -> bool {
        if !self.forced_trade_due(now) {
            return false;
        }
        self.daily.forced_in_flight += 1;
        true
    }

    /// Give back a claim whose trade did not fill
    pub fn release_forced_trade(&mut self) {
        self.daily.forced_in_flight = self.daily.forced_in_flight.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn late() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap()
    }

    fn manager() -> RiskManager {
        RiskManager::new(RiskLimits::default(), noon())
    }

    fn book(equity: f64, weth_exposure: f64) -> ExposureBook {
        let mut book = ExposureBook::new();
        let mut by_asset = HashMap::new();
        if weth_exposure > 0.0 {
            by_asset.insert("WETH".to_string(), weth_exposure);
        }
        book.publish(Chain::Eth, ChainExposure { equity, by_asset });
        book
    }

    fn buy(notional: f64) -> OrderProposal {
        OrderProposal {
            chain: Chain::Eth,
            symbol: "WETH".into(),
            side: OrderSide::Buy,
            notional,
            held_notional: 0.0,
        }
    }

    fn sell(notional: f64, held: f64) -> OrderProposal {
        OrderProposal {
            side: OrderSide::Sell,
            held_notional: held,
            ..buy(notional)
        }
    }

    #[test]
    fn test_trade_cap_clamps_eleven_to_ten_thousand() {
        let decision = manager().review(&buy(11_000.0), &book(40_000.0, 0.0), noon());
        assert_relative_eq!(decision.approved_notional().unwrap(), 10_000.0);
        assert!(matches!(
            decision,
            RiskDecision::Approved { ref clamps, .. } if matches!(clamps[0], Clamp::TradeCap { .. })
        ));
    }

    #[test]
    fn test_asset_cap_clamps_to_headroom() {
        // 13k of 40k already in WETH (32.5%)
        let decision = manager().review(&buy(2_000.0), &book(40_000.0, 13_000.0), noon());
        assert_relative_eq!(decision.approved_notional().unwrap(), 1_000.0);
    }

    #[test]
    fn test_both_clamps_apply_in_order() {
        // 11k -> 10k by trade cap, then 10k -> 4k by asset headroom
        let decision = manager().review(&buy(11_000.0), &book(40_000.0, 10_000.0), noon());
        match decision {
            RiskDecision::Approved { notional, clamps } => {
                assert_relative_eq!(notional, 4_000.0);
                assert_eq!(clamps.len(), 2);
                assert!(matches!(clamps[0], Clamp::TradeCap { .. }));
                assert!(matches!(clamps[1], Clamp::AssetCap { .. }));
            }
            other => panic!("expected approval, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_headroom_skips() {
        let decision = manager().review(&buy(500.0), &book(40_000.0, 14_000.0), noon());
        assert_eq!(decision, RiskDecision::Rejected(RiskRejection::NoHeadroom("WETH".into())));
    }

    #[test]
    fn test_reservations_count_against_headroom() {
        let mut book = book(40_000.0, 13_000.0);
        book.reserve(Chain::Base, "weth", 600.0);
        let decision = manager().review(&buy(2_000.0), &book, noon());
        assert_relative_eq!(decision.approved_notional().unwrap(), 400.0);

        book.release(Chain::Base, "WETH", 600.0);
        assert_relative_eq!(book.asset_exposure("WETH"), 13_000.0);
    }

    #[test]
    fn test_sell_without_position_rejected() {
        let decision = manager().review(&sell(100.0, 0.0), &book(40_000.0, 0.0), noon());
        assert_eq!(decision, RiskDecision::Rejected(RiskRejection::NoPosition("WETH".into())));
    }

    #[test]
    fn test_sell_clamped_to_held() {
        let decision = manager().review(&sell(5_000.0, 3_000.0), &book(40_000.0, 3_000.0), noon());
        assert_relative_eq!(decision.approved_notional().unwrap(), 3_000.0);
    }

    #[test]
    fn test_sell_ignores_asset_cap() {
        let decision = manager().review(&sell(2_000.0, 20_000.0), &book(40_000.0, 20_000.0), noon());
        assert_relative_eq!(decision.approved_notional().unwrap(), 2_000.0);
    }

    #[test]
    fn test_cooldown_rejects_then_expires() {
        let mut risk = manager();
        let book = book(40_000.0, 0.0);
        risk.record_trade(Chain::Eth, "WETH", noon(), false);

        let decision = risk.review(&buy(100.0), &book, noon() + Duration::seconds(10));
        assert!(matches!(
            decision,
            RiskDecision::Rejected(RiskRejection::Cooldown { remaining_secs: 20, .. })
        ));
        if let RiskDecision::Rejected(reason) = &decision {
            assert!(reason.is_retryable());
        }

        // other chain is not in cooldown
        let other = OrderProposal { chain: Chain::Base, ..buy(100.0) };
        assert!(risk.review(&other, &book, noon()).approved_notional().is_some());

        let later = risk.review(&buy(100.0), &book, noon() + Duration::seconds(31));
        assert!(later.approved_notional().is_some());
    }

    #[test]
    fn test_drawdown_halt_blocks_buys_allows_sells() {
        let mut risk = manager();
        assert_eq!(risk.observe_equity(50_000.0, noon()), RiskState::Normal);
        assert_eq!(risk.observe_equity(42_000.0, noon()), RiskState::Normal); // 16%
        assert!(risk.observe_equity(41_000.0, noon()).is_halted()); // 18%

        let book = book(41_000.0, 5_000.0);
        let buy_decision = risk.review(&buy(100.0), &book, noon());
        assert!(matches!(buy_decision, RiskDecision::Rejected(RiskRejection::DrawdownHalt(_))));
        assert!(risk.review(&sell(100.0, 5_000.0), &book, noon()).approved_notional().is_some());
    }

    #[test]
    fn test_halt_is_sticky_until_reset() {
        let mut risk = manager();
        risk.observe_equity(100.0, noon());
        risk.observe_equity(80.0, noon());
        assert!(risk.is_halted());

        // recovery above the old peak does not clear it
        assert!(risk.observe_equity(120.0, noon()).is_halted());

        risk.reset_halt(120.0);
        assert!(!risk.is_halted());
        assert_eq!(risk.peak_equity(), Some(120.0));
        assert!(risk.review(&buy(10.0), &book(120.0, 0.0), noon()).approved_notional().is_some());
    }

    #[test]
    fn test_forced_trade_only_inside_margin() {
        let mut risk = manager();
        assert!(!risk.forced_trade_due(noon()));
        assert!(risk.forced_trade_due(late()));
    }

    #[test]
    fn test_forced_claims_stop_at_minimum() {
        let mut risk = manager();
        risk.record_trade(Chain::Eth, "WETH", late(), false);

        assert!(risk.claim_forced_trade(late()));
        assert!(risk.claim_forced_trade(late()));
        // 1 executed + 2 in flight = 3
        assert!(!risk.claim_forced_trade(late()));

        // one claim fails and is released, one fills
        risk.release_forced_trade();
        risk.record_trade(Chain::Base, "AERO", late(), true);
        assert_eq!(risk.daily_trades(late()), 2);

        assert!(risk.claim_forced_trade(late()));
        risk.record_trade(Chain::Arbitrum, "ARB", late(), true);
        assert_eq!(risk.daily_trades(late()), 3);
        assert!(!risk.forced_trade_due(late()));
    }

    #[test]
    fn test_forced_trade_never_while_halted() {
        let mut risk = manager();
        risk.observe_equity(100.0, late());
        risk.observe_equity(50.0, late());
        assert!(!risk.forced_trade_due(late()));
        assert!(!risk.claim_forced_trade(late()));
    }

    #[test]
    fn test_daily_cap_blocks_buys_not_sells() {
        let mut rm = RiskManager::new(
            RiskLimits {
                max_daily_trades: 2,
                cooldown_seconds: 0,
                ..RiskLimits::default()
            },
            noon(),
        );
        let b = book(10_000.0, 1_000.0);
        rm.record_trade(Chain::Eth, "ARB", noon(), false);
        assert!(rm.review(&buy(100.0), &b, noon()).approved_notional().is_some());
        rm.record_trade(Chain::Base, "OP", noon(), false);

        let rejection = match rm.review(&buy(100.0), &b, noon()) {
            RiskDecision::Rejected(r) => r,
            other => panic!("expected daily cap, got {:?}", other),
        };
        assert_eq!(rejection, RiskRejection::DailyCap(2));
        assert!(rejection.is_retryable());
        assert_eq!(rm.review(&sell(100.0, 1_000.0), &b, noon()).approved_notional(), Some(100.0));

        // a new UTC day clears the cap
        let tomorrow = noon() + Duration::days(1);
        assert!(rm.review(&buy(100.0), &b, tomorrow).approved_notional().is_some());
    }

    #[test]
    fn test_daily_counter_rolls_at_midnight() {
        let mut risk = manager();
        for _ in 0..3 {
            risk.record_trade(Chain::Eth, "WETH", noon(), false);
        }
        assert_eq!(risk.daily_trades(noon()), 3);
        let next_day = noon() + Duration::days(1);
        assert_eq!(risk.daily_trades(next_day), 0);
        assert_eq!(risk.total_trades(), 3);
    }

    #[test]
    fn test_remaining_in_day() {
        assert_eq!(remaining_in_day(late()), Duration::hours(1));
        assert_eq!(remaining_in_day(noon()), Duration::hours(12));
    }

    #[test]
    fn test_non_positive_notional() {
        let decision = manager().review(&buy(0.0), &book(40_000.0, 0.0), noon());
        assert!(matches!(decision, RiskDecision::Rejected(RiskRejection::NonPositiveNotional(_))));
    }
}
