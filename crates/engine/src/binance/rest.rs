use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use common::{
    Candle, Error, ExchangeClient, Fill, Order, OrderSize, Result, SymbolFilters,
};

const BASE_URL: &str = "https://api.binance.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// REST API client for Binance spot. Used for order placement, account
/// queries and market data.
pub struct BinanceClient {
    api_key: String,
    secret: String,
    http: Client,
}

impl BinanceClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            http,
        })
    }

    /// Client for public market-data endpoints only. Signed calls fail.
    pub fn public() -> Result<Self> {
        Self::new("", "")
    }

    fn sign(&self, query: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, params: &str) -> Result<String> {
        if self.api_key.is_empty() || self.secret.is_empty() {
            return Err(Error::Config(
                "signed Binance endpoint requires API credentials".into(),
            ));
        }
        let ts = Utc::now().timestamp_millis();
        let query = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let signature = self.sign(&query);
        Ok(format!("{query}&signature={signature}"))
    }

    async fn public_get(&self, path: &str, params: &str) -> Result<String> {
        let url = format!("{BASE_URL}{path}?{params}");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Self::read_body(resp).await
    }

    async fn signed_get(&self, path: &str, params: &str) -> Result<String> {
        let query = self.signed_query(params)?;
        let url = format!("{BASE_URL}{path}?{query}");

        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Self::read_body(resp).await
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<String> {
        let body = self.signed_query(params)?;
        let url = format!("{BASE_URL}{path}");

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Self::read_body(resp).await
    }

    async fn read_body(resp: reqwest::Response) -> Result<String> {
        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {text}")));
        }
        Ok(text)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn submit_order(&self, order: &Order) -> Result<Fill> {
        let size_param = match order.size {
            OrderSize::Quote(amount) => format!("quoteOrderQty={}", format_decimal(amount)),
            OrderSize::Base(amount) => format!("quantity={}", format_decimal(amount)),
        };
        let params = format!(
            "symbol={}&side={}&type=MARKET&{size_param}&newClientOrderId={}&newOrderRespType=FULL",
            order.symbol, order.side, order.id
        );

        debug!(symbol = %order.symbol, side = %order.side, id = %order.id, "Submitting order to Binance");
        let body = self.signed_post("/api/v3/order", &params).await?;
        let resp: OrderResponse = serde_json::from_str(&body)?;
        resp.into_fill(order)
    }

    async fn balances(&self) -> Result<HashMap<String, f64>> {
        let body = self.signed_get("/api/v3/account", "omitZeroBalances=true").await?;
        let account: AccountResponse = serde_json::from_str(&body)?;

        Ok(account
            .balances
            .into_iter()
            .map(|b| (b.asset, b.free.parse::<f64>().unwrap_or(0.0)))
            .collect())
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let params = format!("symbol={symbol}&interval={interval}&limit={limit}");
        let body = self.public_get("/api/v3/klines", &params).await?;
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(&body)?;
        rows.iter().map(|row| parse_kline(row)).collect()
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        let body = self
            .public_get("/api/v3/ticker/price", &format!("symbol={symbol}"))
            .await?;
        let ticker: PriceTicker = serde_json::from_str(&body)?;

        ticker
            .price
            .parse::<f64>()
            .map_err(|e| Error::Exchange(e.to_string()))
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let body = self
            .public_get("/api/v3/exchangeInfo", &format!("symbol={symbol}"))
            .await?;
        let info: ExchangeInfo = serde_json::from_str(&body)?;
        let symbol_info = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| Error::Exchange(format!("symbol {symbol} not listed")))?;
        Ok(parse_filters(&symbol_info.filters))
    }
}

/// Render a quantity without exponent or trailing zeros, at most 8 decimals.
fn format_decimal(value: f64) -> String {
    let s = format!("{value:.8}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn parse_kline(row: &[serde_json::Value]) -> Result<Candle> {
    let bad = || Error::Exchange(format!("malformed kline row: {row:?}"));
    let time = |i: usize| -> Result<DateTime<Utc>> {
        row.get(i)
            .and_then(|v| v.as_i64())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(bad)
    };
    let num = |i: usize| -> Result<f64> {
        row.get(i)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(bad)
    };

    Ok(Candle {
        open_time: time(0)?,
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: num(5)?,
        close_time: time(6)?,
    })
}

fn parse_filters(filters: &[serde_json::Value]) -> SymbolFilters {
    let field = |filter_type: &str, key: &str| -> Option<f64> {
        filters
            .iter()
            .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(filter_type))
            .and_then(|f| f.get(key))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
    };

    SymbolFilters {
        step_size: field("LOT_SIZE", "stepSize").unwrap_or(0.0),
        min_qty: field("LOT_SIZE", "minQty").unwrap_or(0.0),
        min_notional: field("NOTIONAL", "minNotional")
            .or_else(|| field("MIN_NOTIONAL", "minNotional"))
            .unwrap_or(0.0),
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    client_order_id: String,
    status: String,
    executed_qty: String,
    cummulative_quote_qty: String,
}

impl OrderResponse {
    fn into_fill(self, order: &Order) -> Result<Fill> {
        let quantity = self.executed_qty.parse::<f64>().unwrap_or(0.0);
        let quote = self.cummulative_quote_qty.parse::<f64>().unwrap_or(0.0);

        if quantity <= 0.0 {
            return Err(Error::Exchange(format!(
                "order {} not filled (status {})",
                self.client_order_id, self.status
            )));
        }

        Ok(Fill {
            order_id: self.client_order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            price: quote / quantity,
            quantity,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Deserialize)]
struct AccountResponse {
    balances: Vec<Balance>,
}

#[derive(Deserialize)]
struct Balance {
    asset: String,
    free: String,
}

#[derive(Deserialize)]
struct PriceTicker {
    price: String,
}

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<serde_json::Value>,
}
