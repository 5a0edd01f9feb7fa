//! HTTP email API notifier.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::FulfillmentError;
use crate::retry::{CallError, RetryPolicy};
use crate::services::notifier::{NotificationLine, Notifier, OrderConfirmation, ShippingUpdate};

#[derive(Debug, Clone)]
pub struct EmailClientConfig {
    pub base_url: String,
    pub api_key: String,
    /// Sender address, e.g. `Store <orders@example.com>`.
    pub from: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: String,
    text: String,
}

/// Sends transactional email through a JSON API (`POST {base}/emails`).
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
    retry: RetryPolicy,
}

impl HttpNotifier {
    pub fn new(config: EmailClientConfig) -> Result<Self, FulfillmentError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FulfillmentError::NotificationService(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/emails", config.base_url.trim_end_matches('/')),
            api_key: config.api_key,
            from: config.from,
            retry: config.retry,
        })
    }

    async fn send(&self, to: &str, subject: String, text: String) -> Result<(), FulfillmentError> {
        let request = EmailRequest {
            from: &self.from,
            to: [to],
            subject,
            text,
        };
        let request = &request;
        let notifier = self;

        self.retry
            .run("send_email", move || async move {
                let response = notifier
                    .http
                    .post(&notifier.endpoint)
                    .bearer_auth(&notifier.api_key)
                    .json(request)
                    .send()
                    .await
                    .map_err(|e| CallError::from_reqwest(e).for_non_idempotent())?;
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    let body = response.text().await.unwrap_or_default();
                    Err(CallError::from_status(status, &body).for_non_idempotent())
                }
            })
            .await
            .map_err(|e| FulfillmentError::NotificationService(e.to_string()))
    }
}

fn render_lines(items: &[NotificationLine]) -> String {
    items
        .iter()
        .map(|l| format!("  {} x{}  {}", l.product_name, l.quantity, l.total))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plain-text body of the order confirmation.
pub fn render_confirmation(message: &OrderConfirmation) -> String {
    let mut body = format!(
        "Thanks for your order {}!\n\n{}\n\nSubtotal: {}\nShipping: {}\n",
        message.order_number,
        render_lines(&message.items),
        message.subtotal,
        message.shipping_cost,
    );
    if message.discount_amount.is_positive() {
        body.push_str(&format!("Discount: -{}\n", message.discount_amount));
    }
    body.push_str(&format!("Total: {}\n", message.total));

    if let Some(address) = &message.shipping_address {
        body.push_str(&format!("\nShipping to: {}\n", address.one_line()));
    }
    if !message.download_links.is_empty() {
        body.push_str("\nYour downloads:\n");
        for link in &message.download_links {
            body.push_str(&format!("  {}: {}\n", link.product_name, link.url));
        }
    }
    body
}

/// Plain-text body of the shipment notification.
pub fn render_shipping_update(message: &ShippingUpdate) -> String {
    let mut body = format!(
        "Your order {} is on its way.\n\nTracking number: {}\n",
        message.order_number, message.tracking_number
    );
    if let Some(carrier) = &message.carrier {
        body.push_str(&format!("Carrier: {carrier}\n"));
    }
    if let Some(url) = &message.tracking_url {
        body.push_str(&format!("Track it: {url}\n"));
    }
    body.push_str(&format!("\n{}\n", render_lines(&message.items)));
    if let Some(address) = &message.shipping_address {
        body.push_str(&format!("\nShipping to: {}\n", address.one_line()));
    }
    body
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[tracing::instrument(skip_all, fields(order_number = %message.order_number))]
    async fn send_order_confirmation(
        &self,
        message: &OrderConfirmation,
    ) -> Result<(), FulfillmentError> {
        self.send(
            &message.customer_email,
            format!("Order confirmed: {}", message.order_number),
            render_confirmation(message),
        )
        .await
    }

    #[tracing::instrument(skip_all, fields(order_number = %message.order_number))]
    async fn send_shipping_update(&self, message: &ShippingUpdate) -> Result<(), FulfillmentError> {
        self.send(
            &message.customer_email,
            format!("Your order {} has shipped", message.order_number),
            render_shipping_update(message),
        )
        .await
    }
}
