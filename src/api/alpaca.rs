use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use governor::{Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;

use super::{AccountConfigurations, Brokerage, MarketData};
use crate::error::ApiError;
use crate::models::{
    AccountSnapshot, Bar, OrderHandle, OrderIntent, OrderSide, OrderSizing, OrderStatus, Position,
};

// Alpaca Trading API v2 / Market Data API v2
// Docs: https://docs.alpaca.markets/reference
const LIVE_TRADING_API: &str = "https://api.alpaca.markets";
const PAPER_TRADING_API: &str = "https://paper-api.alpaca.markets";
const MARKET_DATA_API: &str = "https://data.alpaca.markets";
const RATE_LIMIT_RPM: u32 = 200; // Trading API allows 200 requests per minute
const REQUEST_TIMEOUT_SECS: u64 = 30;

type AlpacaRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// API key pair for one Alpaca environment (live or paper)
#[derive(Clone)]
pub struct AlpacaCredentials {
    pub api_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for AlpacaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaCredentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"***")
            .finish()
    }
}

/// Alpaca REST client implementing both the trading and market-data seams.
///
/// Cloneable; all clones share one rate limiter. Requests are throttled but
/// never retried.
#[derive(Clone)]
pub struct AlpacaClient {
    client: Client,
    credentials: AlpacaCredentials,
    trading_base: String,
    data_base: String,
    rate_limiter: Arc<AlpacaRateLimiter>,
}

// ============== Wire Types ==============

#[derive(Debug, Deserialize)]
struct AccountRaw {
    status: String,
    cash: String,
}

#[derive(Debug, Deserialize)]
struct ConfigurationsRaw {
    #[serde(default)]
    fractional_trading: bool,
}

#[derive(Debug, Deserialize)]
struct OrderRaw {
    id: String,
    status: OrderStatus,
}

#[derive(Debug, Deserialize)]
struct PositionRaw {
    symbol: String,
    qty: String,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    // Alpaca sends `null` rather than `[]` when the range has no bars
    #[serde(default)]
    bars: Option<Vec<BarRaw>>,
}

#[derive(Debug, Deserialize)]
struct BarRaw {
    t: DateTime<Utc>,
    c: f64,
}

#[derive(Debug, Deserialize)]
struct CancelAllEntry {
    #[allow(dead_code)]
    id: String,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    symbol: &'a str,
    side: OrderSide,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notional: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    qty: Option<String>,
    client_order_id: String,
}

impl<'a> From<&'a OrderIntent> for OrderRequest<'a> {
    fn from(intent: &'a OrderIntent) -> Self {
        let (notional, qty) = match intent.sizing {
            OrderSizing::Notional(amount) => (Some(format!("{:.2}", amount)), None),
            OrderSizing::Quantity(shares) => (None, Some(format_qty(shares))),
        };

        OrderRequest {
            symbol: &intent.symbol,
            side: intent.side,
            order_type: "market",
            time_in_force: "day",
            notional,
            qty,
            client_order_id: intent.client_order_id.to_string(),
        }
    }
}

/// Alpaca accepts up to 9 decimal places for fractional quantities
fn format_qty(shares: f64) -> String {
    let formatted = format!("{:.9}", shares);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn parse_decimal(raw: &str, what: &'static str) -> Result<f64, ApiError> {
    raw.parse::<f64>().map_err(|e| ApiError::Decode {
        what,
        reason: format!("{:?}: {}", raw, e),
    })
}

impl From<OrderRaw> for OrderHandle {
    fn from(raw: OrderRaw) -> Self {
        OrderHandle {
            id: raw.id,
            status: raw.status,
        }
    }
}

impl TryFrom<PositionRaw> for Position {
    type Error = ApiError;

    fn try_from(raw: PositionRaw) -> Result<Self, Self::Error> {
        Ok(Position {
            qty: parse_decimal(&raw.qty, "position qty")?,
            symbol: raw.symbol,
        })
    }
}

// ============== Implementation ==============

impl AlpacaClient {
    /// Client for the live or paper trading environment
    pub fn new(credentials: AlpacaCredentials, paper: bool) -> Result<Self, ApiError> {
        let trading_base = if paper {
            PAPER_TRADING_API
        } else {
            LIVE_TRADING_API
        };
        Self::with_base_urls(credentials, trading_base, MARKET_DATA_API)
    }

    /// Client against explicit endpoints (local mocks, proxies)
    pub fn with_base_urls(
        credentials: AlpacaCredentials,
        trading_base: impl Into<String>,
        data_base: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            credentials,
            trading_base: trading_base.into().trim_end_matches('/').to_string(),
            data_base: data_base.into().trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    pub fn trading_base(&self) -> &str {
        &self.trading_base
    }

    /// Send an authenticated, rate-limited request. Non-2xx becomes `ApiError::Status`.
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        self.rate_limiter.until_ready().await;

        let response = request
            .header("APCA-API-KEY-ID", &self.credentials.api_key)
            .header("APCA-API-SECRET-KEY", &self.credentials.secret_key)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn read_json<T: DeserializeOwned>(
        response: Response,
        what: &'static str,
    ) -> Result<T, ApiError> {
        response.json::<T>().await.map_err(|e| ApiError::Decode {
            what,
            reason: e.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &'static str) -> Result<T, ApiError> {
        let response = self.send(self.client.get(url)).await?;
        Self::read_json(response, what).await
    }
}

#[async_trait]
impl Brokerage for AlpacaClient {
    async fn get_account(&self) -> Result<AccountSnapshot, ApiError> {
        let url = format!("{}/v2/account", self.trading_base);
        let raw: AccountRaw = self.get_json(&url, "account").await?;
        tracing::debug!("Account information: {:?}", raw);

        Ok(AccountSnapshot {
            cash: parse_decimal(&raw.cash, "account cash")?,
            status: raw.status,
            // Lives on /v2/account/configurations, filled in by the caller
            fractional_trading_enabled: false,
        })
    }

    async fn get_account_configurations(&self) -> Result<AccountConfigurations, ApiError> {
        let url = format!("{}/v2/account/configurations", self.trading_base);
        let raw: ConfigurationsRaw = self.get_json(&url, "account configurations").await?;

        Ok(AccountConfigurations {
            fractional_trading: raw.fractional_trading,
        })
    }

    async fn submit_order(&self, intent: &OrderIntent) -> Result<OrderHandle, ApiError> {
        let url = format!("{}/v2/orders", self.trading_base);
        let body = OrderRequest::from(intent);

        let response = self.send(self.client.post(&url).json(&body)).await?;
        let raw: OrderRaw = Self::read_json(response, "order").await?;

        Ok(raw.into())
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderHandle, ApiError> {
        let url = format!("{}/v2/orders/{}", self.trading_base, order_id);
        let raw: OrderRaw = self.get_json(&url, "order").await?;
        Ok(raw.into())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ApiError> {
        let url = format!("{}/v2/orders/{}", self.trading_base, order_id);
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }

    async fn cancel_all_orders(&self) -> Result<usize, ApiError> {
        let url = format!("{}/v2/orders", self.trading_base);
        let response = self.send(self.client.delete(&url)).await?;
        let cancelled: Vec<CancelAllEntry> = Self::read_json(response, "cancel-all response").await?;
        Ok(cancelled.len())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, ApiError> {
        let url = format!("{}/v2/positions/{}", self.trading_base, symbol);

        match self.get_json::<PositionRaw>(&url, "position").await {
            Ok(raw) => Ok(Some(raw.try_into()?)),
            Err(ApiError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_all_positions(&self) -> Result<Vec<Position>, ApiError> {
        let url = format!("{}/v2/positions", self.trading_base);
        let raw: Vec<PositionRaw> = self.get_json(&url, "positions").await?;
        raw.into_iter().map(Position::try_from).collect()
    }
}

#[async_trait]
impl MarketData for AlpacaClient {
    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bar>, ApiError> {
        let url = format!("{}/v2/stocks/{}/bars", self.data_base, symbol);
        let query = [
            ("timeframe", "1Day".to_string()),
            ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("end", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("limit", limit.to_string()),
        ];

        let response = self.send(self.client.get(&url).query(&query)).await?;
        let raw: BarsResponse = Self::read_json(response, "bars").await?;

        let bars: Vec<Bar> = raw
            .bars
            .unwrap_or_default()
            .into_iter()
            .map(|b| Bar {
                timestamp: b.t,
                close: b.c,
            })
            .collect();

        tracing::debug!(
            "{} of {} daily bars fetched for {} from {} to {}",
            bars.len(),
            limit,
            symbol,
            start,
            end
        );

        Ok(bars)
    }
}
