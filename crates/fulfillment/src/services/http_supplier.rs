//! HTTP supplier client.
//!
//! A thin transport shell: every call is paced by the shared
//! [`RateLimiter`], bounded by the client timeout and retried per
//! [`RetryPolicy`]. Response bodies use a `{code, result, message, data}`
//! envelope that is unwrapped here; the `data` part is returned raw.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::{DomainError, FreightItem, FreightQuoter, Money};
use serde_json::{Value, json};

use crate::error::FulfillmentError;
use crate::normalize;
use crate::rate_limit::RateLimiter;
use crate::retry::{CallError, RetryPolicy};
use crate::services::supplier::{ShipmentRequest, SupplierApi};

/// Connection settings for [`HttpSupplierClient`].
#[derive(Debug, Clone)]
pub struct SupplierClientConfig {
    pub base_url: String,
    pub access_token: String,
    pub timeout: Duration,
    pub requests_per_sec: f64,
    pub retry: RetryPolicy,
}

impl Default for SupplierClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_token: String::new(),
            timeout: Duration::from_secs(10),
            requests_per_sec: 1.0,
            retry: RetryPolicy::default(),
        }
    }
}

/// Supplier API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSupplierClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl HttpSupplierClient {
    /// Creates a client with its own rate limiter.
    pub fn new(config: SupplierClientConfig) -> Result<Self, FulfillmentError> {
        let limiter = RateLimiter::new(config.requests_per_sec, 1);
        Self::with_limiter(config, limiter)
    }

    /// Creates a client paced by an existing limiter.
    pub fn with_limiter(
        config: SupplierClientConfig,
        limiter: RateLimiter,
    ) -> Result<Self, FulfillmentError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FulfillmentError::SupplierService(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token,
            limiter,
            retry: config.retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn attempt(
        &self,
        build: &impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Value, CallError> {
        self.limiter.acquire().await;
        let response = build()
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(CallError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status, &body));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| CallError::Permanent(format!("undecodable body: {e}")))?;
        unwrap_envelope(body)
    }

    /// Runs one supplier request under the retry policy.
    ///
    /// A non-idempotent request is only repeated when the supplier provably
    /// never acted on it. A timeout or 5xx ends the call.
    async fn call<F>(
        &self,
        operation: &'static str,
        idempotent: bool,
        build: F,
    ) -> Result<Value, FulfillmentError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let started = Instant::now();
        let build = &build;
        let client = self;

        let result = self
            .retry
            .run(operation, move || async move {
                let result = client.attempt(build).await;
                if idempotent {
                    result
                } else {
                    result.map_err(CallError::for_non_idempotent)
                }
            })
            .await;

        metrics::histogram!("supplier_request_duration_seconds", "operation" => operation)
            .record(started.elapsed().as_secs_f64());

        result.map_err(|e| {
            metrics::counter!("supplier_request_failures_total", "operation" => operation)
                .increment(1);
            FulfillmentError::SupplierService(format!("{operation}: {e}"))
        })
    }
}

/// Unwraps the supplier's response envelope.
///
/// `result: false` or a non-200 `code` is a permanent failure carrying
/// `message`. A body without an envelope is returned as-is.
pub fn unwrap_envelope(body: Value) -> Result<Value, CallError> {
    let has_envelope = body.get("code").is_some() || body.get("result").is_some();
    if !has_envelope {
        return Ok(body);
    }

    let result_ok = body.get("result").and_then(Value::as_bool).unwrap_or(true);
    let code_ok = body
        .get("code")
        .and_then(Value::as_i64)
        .is_none_or(|c| c == 200);
    if !(result_ok && code_ok) {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("supplier reported failure");
        return Err(CallError::Permanent(message.to_string()));
    }

    Ok(match body {
        Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
        other => other,
    })
}

#[async_trait]
impl SupplierApi for HttpSupplierClient {
    #[tracing::instrument(skip(self))]
    async fn get_tracking(&self, supplier_order_number: &str) -> Result<Value, FulfillmentError> {
        let url = self.url("logistic/trackInfo");
        self.call("get_tracking", true, || {
            self.http
                .get(&url)
                .query(&[("orderNumber", supplier_order_number)])
        })
        .await
    }

    #[tracing::instrument(skip(self, request), fields(order_number = %request.order_number))]
    async fn create_order(&self, request: &ShipmentRequest) -> Result<Value, FulfillmentError> {
        let url = self.url("shopping/order/createOrder");
        self.call("create_order", false, || self.http.post(&url).json(request))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn get_product_stock(&self, product_id: &str) -> Result<Option<u32>, FulfillmentError> {
        let url = self.url("product/stock/getInventoryByPid");
        let data = self
            .call("get_product_stock", true, || {
                self.http.get(&url).query(&[("pid", product_id)])
            })
            .await?;
        Ok(normalize::extract_stock(&data))
    }
}

#[async_trait]
impl FreightQuoter for HttpSupplierClient {
    async fn quote(
        &self,
        items: &[FreightItem],
        destination_country: &str,
    ) -> Result<Option<Money>, DomainError> {
        let url = self.url("logistic/freightCalculate");
        let body = json!({
            "endCountryCode": destination_country,
            "products": items
                .iter()
                .map(|i| json!({"vid": i.supplier_variant_id, "quantity": i.quantity}))
                .collect::<Vec<_>>(),
        });
        let data = self
            .call("freight_quote", true, || self.http.post(&url).json(&body))
            .await
            .map_err(|e| DomainError::FreightQuote(e.to_string()))?;
        Ok(normalize::extract_freight(&data))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::services::supplier::ShipmentLine;

    /// Local supplier answering every request after `delay`. Returns its base
    /// URL and the number of requests it has received.
    async fn slow_supplier(delay: Duration) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 16 * 1024];
                    if socket.read(&mut buf).await.unwrap_or(0) == 0 {
                        return;
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    let body = r#"{"code":200,"result":true,"data":{"orderId":"S-1"}}"#;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                         content-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        (format!("http://{addr}"), received)
    }

    fn client(base_url: String) -> HttpSupplierClient {
        HttpSupplierClient::new(SupplierClientConfig {
            base_url,
            access_token: "token".to_string(),
            timeout: Duration::from_millis(200),
            requests_per_sec: 0.0,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(50),
            },
        })
        .unwrap()
    }

    fn shipment() -> ShipmentRequest {
        ShipmentRequest {
            order_number: "ORD-1".to_string(),
            shipping_customer_name: "Ada".to_string(),
            shipping_phone: "555".to_string(),
            shipping_address: "1 Main St".to_string(),
            shipping_address2: None,
            shipping_city: "Springfield".to_string(),
            shipping_province: "IL".to_string(),
            shipping_zip: "62701".to_string(),
            shipping_country_code: "US".to_string(),
            remark: None,
            products: vec![ShipmentLine {
                vid: "V1".to_string(),
                quantity: 1,
            }],
        }
    }

    #[tokio::test]
    async fn test_create_order_is_not_resent_after_timeout() {
        let (base_url, received) = slow_supplier(Duration::from_millis(800)).await;

        let result = client(base_url).create_order(&shipment()).await;

        assert!(matches!(result, Err(FulfillmentError::SupplierService(_))));
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reads_are_retried_after_timeout() {
        let (base_url, received) = slow_supplier(Duration::from_millis(800)).await;

        let result = client(base_url).get_tracking("SUPN-1").await;

        assert!(result.is_err());
        assert_eq!(received.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_create_order_unwraps_envelope_over_http() {
        let (base_url, received) = slow_supplier(Duration::ZERO).await;

        let data = client(base_url).create_order(&shipment()).await.unwrap();

        assert_eq!(data, json!({"orderId": "S-1"}));
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unwrap_envelope_returns_data() {
        let body = json!({
            "code": 200,
            "result": true,
            "message": "Success",
            "data": {"orderId": "S-1"}
        });
        assert_eq!(unwrap_envelope(body).unwrap(), json!({"orderId": "S-1"}));
    }

    #[test]
    fn test_unwrap_envelope_failure_carries_message() {
        let body = json!({
            "code": 1600100,
            "result": false,
            "message": "Invalid vid",
            "data": null
        });
        assert_eq!(
            unwrap_envelope(body),
            Err(CallError::Permanent("Invalid vid".to_string()))
        );
    }

    #[test]
    fn test_body_without_envelope_passes_through() {
        let body = json!([{"trackingNumber": "1Z"}]);
        assert_eq!(unwrap_envelope(body.clone()).unwrap(), body);
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = HttpSupplierClient::new(SupplierClientConfig {
            base_url: "https://supplier.example/api/".to_string(),
            ..SupplierClientConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.url("/logistic/trackInfo"),
            "https://supplier.example/api/logistic/trackInfo"
        );
    }
}
