//! HTTP transport for the Recall competition API

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use super::types::{BalancesResponse, DiscoveryResponse, ExecuteTradeBody, ExecuteTradeResponse, PriceResponse};
use crate::domain::{AssetBalance, Chain, Token};
use crate::ports::{ExchangeTransport, PriceQuote, TradeReceipt, TradeRequest, TransportError};

#[derive(Debug, Clone)]
pub struct RecallConfig {
    pub base_url: String,
    pub api_key: String,
    /// Token listing endpoint, relative to `base_url`
    pub discovery_path: String,
    pub timeout: Duration,
}

/// Raw Recall calls: bearer auth, JSON, HTTP status classification
#[derive(Debug, Clone)]
pub struct RecallTransport {
    config: RecallConfig,
    http: Client,
}

impl RecallTransport {
    pub fn new(config: RecallConfig) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.config.api_key)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, TransportError> {
        let response = self.authorized(builder).send().await.map_err(classify_reqwest)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| TransportError::Decode(format!("Failed to parse response: {}", e)))
    }
}

fn classify_reqwest(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if let Some(status) = error.status() {
        TransportError::from_status(status.as_u16(), error.to_string())
    } else {
        TransportError::Network(error.to_string())
    }
}

#[async_trait]
impl ExchangeTransport for RecallTransport {
    async fn health(&self) -> Result<(), TransportError> {
        let response = self
            .authorized(self.http.get(self.url("/api/health")))
            .send()
            .await
            .map_err(classify_reqwest)?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TransportError::Authentication {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
            status => Err(TransportError::from_status(
                status.as_u16(),
                response.text().await.unwrap_or_default(),
            )),
        }
    }

    async fn discover_tokens(&self, chain: Chain) -> Result<Vec<Token>, TransportError> {
        let request = self
            .http
            .get(self.url(&self.config.discovery_path))
            .query(&[("specificChain", chain.as_str())]);
        let listing: DiscoveryResponse = self.send(request).await?;
        Ok(listing.tokens.into_iter().map(|t| t.into_token(chain)).collect())
    }

    async fn get_price(&self, token: &Token) -> Result<PriceQuote, TransportError> {
        let request = self.http.get(self.url("/api/price")).query(&[
            ("token", token.address.as_str()),
            ("chain", token.chain.family()),
            ("specificChain", token.chain.as_str()),
        ]);
        let response: PriceResponse = self.send(request).await?;
        let price = response
            .price()
            .ok_or_else(|| TransportError::Decode(format!("No price for {}", token.symbol)))?;
        Ok(PriceQuote {
            price,
            timestamp: response.timestamp_or(Utc::now()),
        })
    }

    async fn get_balances(&self, chain: Chain) -> Result<Vec<AssetBalance>, TransportError> {
        let response: BalancesResponse = self.send(self.http.get(self.url("/api/agent/balances"))).await?;
        Ok(response.for_chain(chain))
    }

    async fn execute_trade(&self, request: &TradeRequest) -> Result<TradeReceipt, TransportError> {
        let body = ExecuteTradeBody::from(request);
        let builder = self.http.post(self.url("/api/trade/execute")).json(&body);
        let response: ExecuteTradeResponse = self.send(builder).await?;

        if !response.success {
            let reason = response.error.unwrap_or_else(|| "trade not executed".to_string());
            return Err(TransportError::from_status(400, reason));
        }
        let transaction = response
            .transaction
            .ok_or_else(|| TransportError::Decode("Trade succeeded without a transaction".into()))?;

        tracing::debug!("Recall trade {} executed on {}", transaction.id, request.chain);
        Ok(TradeReceipt {
            id: transaction.id,
            price: transaction.price,
            from_amount: transaction.from_amount,
            to_amount: transaction.to_amount,
        })
    }
}
