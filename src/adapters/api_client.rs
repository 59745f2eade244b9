//! Rate-limited, retrying exchange client
//!
//! Every call goes through the same three steps: take a token from the
//! shared limiter for the call's category, hit the transport, classify the
//! outcome. Each retry takes a fresh token.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::rate_limiter::{RateLimitError, RateLimiter};
use super::retry::{run_with_retry, Attempt, RetryError, RetryPolicy};
use crate::domain::{AssetBalance, Chain, Order, OrderSide, Token};
use crate::ports::{ExchangeTransport, PriceQuote, RequestCategory, TradeRequest, TransportError};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    #[error(transparent)]
    RateLimitTimeout(#[from] RateLimitError),
    #[error("Request failed after {attempts} attempts: {last}")]
    RequestFailed { attempts: u32, last: TransportError },
    #[error("Rejected by exchange: {0}")]
    ValidationRejected(String),
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Errors that must stop the process at startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Authentication(_))
    }

    fn from_transport(error: TransportError, attempts: u32) -> Self {
        match error {
            TransportError::Authentication { status, body } => {
                ApiError::Authentication(format!("{} {}", status, body))
            }
            TransportError::InsufficientBalance(body) => ApiError::InsufficientBalance(body),
            TransportError::Rejected { status, body } => {
                ApiError::ValidationRejected(format!("{} {}", status, body))
            }
            TransportError::Decode(msg) => ApiError::InvalidResponse(msg),
            transient => ApiError::RequestFailed {
                attempts,
                last: transient,
            },
        }
    }
}

/// Why one try failed
#[derive(Debug)]
enum Fault {
    RateLimit(RateLimitError),
    Transport(TransportError),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::RateLimit(e) => write!(f, "{}", e),
            Fault::Transport(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn ExchangeTransport>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    acquire_timeout: Duration,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn ExchangeTransport>, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        let acquire_timeout = limiter.default_timeout();
        Self {
            transport,
            limiter,
            retry,
            acquire_timeout,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    async fn call<R, F, Fut>(&self, category: RequestCategory, op: &'static str, request: F) -> Result<R, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        let limiter = &self.limiter;
        let timeout = self.acquire_timeout;
        let request = &request;

        let outcome = run_with_retry(&self.retry, move |_| async move {
            if let Err(e) = limiter.acquire(category, timeout).await {
                return Attempt::Permanent(Fault::RateLimit(e));
            }
            match Attempt::from(request().await) {
                Attempt::Success(value) => Attempt::Success(value),
                Attempt::Transient(e) => Attempt::Transient(Fault::Transport(e)),
                Attempt::Permanent(e) => Attempt::Permanent(Fault::Transport(e)),
            }
        })
        .await;

        outcome.map_err(|error| {
            let api_error = match error {
                RetryError::Permanent(Fault::RateLimit(e)) | RetryError::Exhausted { last: Fault::RateLimit(e), .. } => {
                    ApiError::RateLimitTimeout(e)
                }
                RetryError::Permanent(Fault::Transport(e)) => ApiError::from_transport(e, 1),
                RetryError::Exhausted {
                    attempts,
                    last: Fault::Transport(e),
                } => ApiError::RequestFailed { attempts, last: e },
            };
            tracing::debug!("{} failed: {}", op, api_error);
            api_error
        })
    }

    /// Startup check, counted as a balance check
    pub async fn health(&self) -> Result<(), ApiError> {
        self.call(RequestCategory::BalanceCheck, "health", || self.transport.health())
            .await
    }

    /// Discovery is counted as a price query
    pub async fn discover_tokens(&self, chain: Chain) -> Result<Vec<Token>, ApiError> {
        self.call(RequestCategory::PriceQuery, "discover_tokens", || {
            self.transport.discover_tokens(chain)
        })
        .await
    }

    pub async fn get_price(&self, token: &Token) -> Result<PriceQuote, ApiError> {
        let quote = self
            .call(RequestCategory::PriceQuery, "get_price", || self.transport.get_price(token))
            .await?;
        if !(quote.price > 0.0) || !quote.price.is_finite() {
            return Err(ApiError::InvalidResponse(format!(
                "price {} for {}",
                quote.price, token.symbol
            )));
        }
        Ok(quote)
    }

    pub async fn get_balances(&self, chain: Chain) -> Result<Vec<AssetBalance>, ApiError> {
        self.call(RequestCategory::BalanceCheck, "get_balances", || {
            self.transport.get_balances(chain)
        })
        .await
    }

    /// Submit `order` and return it filled
    pub async fn place_trade(
        &self,
        order: Order,
        cash_address: &str,
        reason: &str,
        slippage_tolerance_pct: f64,
    ) -> Result<Order, ApiError> {
        let request = TradeRequest::for_order(&order, cash_address, reason, slippage_tolerance_pct);
        let receipt = self
            .call(RequestCategory::Trade, "place_trade", || {
                self.transport.execute_trade(&request)
            })
            .await?;

        let quantity = match order.side {
            OrderSide::Buy => receipt.to_amount,
            OrderSide::Sell => receipt.from_amount,
        }
        .filter(|q| *q > 0.0 && q.is_finite());
        let price = match quantity {
            Some(q) => order.notional / q,
            None => order.requested_price,
        };
        Ok(order.fill(price, quantity, Some(receipt.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rate_limiter::RateBudget;
    use crate::ports::mocks::{MockExchange, OP_BALANCES, OP_PRICE, OP_TRADE};

    fn weth() -> Token {
        Token::new("WETH", "0xweth", Chain::Base)
    }

    fn setup(budget: RateBudget) -> (Arc<MockExchange>, ApiClient) {
        let exchange = Arc::new(
            MockExchange::new()
                .with_token(weth(), 2000.0)
                .with_cash(Chain::Base, "USDC", "0xusdc", 1000.0),
        );
        let retry = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            jitter: 0.0,
        };
        let client = ApiClient::new(exchange.clone(), Arc::new(RateLimiter::new(&budget)), retry);
        (exchange, client)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let (exchange, client) = setup(RateBudget::default());
        exchange.fail_next(OP_PRICE, TransportError::Server { status: 503, body: "busy".into() });
        exchange.fail_next(OP_PRICE, TransportError::Timeout);

        let quote = client.get_price(&weth()).await.unwrap();
        assert_eq!(quote.price, 2000.0);
        assert_eq!(exchange.call_count(OP_PRICE), 3);
        // every retry took its own token; backoff refilled a fraction
        let available = client.limiter().available(RequestCategory::PriceQuery);
        assert!((297.0..298.0).contains(&available));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_request_failed() {
        let (exchange, client) = setup(RateBudget::default());
        for _ in 0..3 {
            exchange.fail_next(OP_BALANCES, TransportError::RateLimited);
        }
        let result = client.get_balances(Chain::Base).await;
        assert_eq!(
            result,
            Err(ApiError::RequestFailed {
                attempts: 3,
                last: TransportError::RateLimited
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_timeout_is_distinct() {
        let budget = RateBudget {
            balance_per_min: 1,
            acquire_timeout: Duration::from_millis(100),
            ..RateBudget::default()
        };
        let (exchange, client) = setup(budget);
        tokio_test::assert_ok!(client.get_balances(Chain::Base).await);

        let result = client.get_balances(Chain::Base).await;
        assert!(matches!(result, Err(ApiError::RateLimitTimeout(_))));
        assert_eq!(exchange.call_count(OP_BALANCES), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_not_retried() {
        let (exchange, client) = setup(RateBudget::default());
        exchange.fail_next(OP_TRADE, TransportError::from_status(400, "Insufficient balance"));

        let order = Order::new(weth(), OrderSide::Buy, 100.0, 2000.0);
        let result = client.place_trade(order, "0xusdc", "entry", 0.5).await;
        assert!(matches!(result, Err(ApiError::InsufficientBalance(_))));
        assert_eq!(exchange.call_count(OP_TRADE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_is_fatal() {
        let (exchange, client) = setup(RateBudget::default());
        exchange.fail_next(
            crate::ports::mocks::OP_HEALTH,
            TransportError::Authentication { status: 401, body: "bad key".into() },
        );
        let error = client.health().await.unwrap_err();
        assert!(error.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_place_trade_fills_order() {
        let (exchange, client) = setup(RateBudget::default());
        let order = Order::new(weth(), OrderSide::Buy, 500.0, 1990.0);
        let filled = client.place_trade(order, "0xusdc", "entry", 0.5).await.unwrap();

        assert!(filled.is_filled());
        assert_eq!(filled.filled_quantity, Some(0.25));
        assert_eq!(filled.fill_price, Some(2000.0));
        assert_eq!(filled.exchange_id.as_deref(), Some("mock-1"));
        assert_eq!(exchange.balance(Chain::Base, "0xusdc"), 500.0);
    }
}
