//! DOKU Checkout client.
//!
//! Requests are signed with the "Client-Id / Request-Id / Request-Timestamp /
//! Request-Target / Digest" HMAC-SHA256 scheme; incoming payment
//! notifications carry the same signature and can be verified with
//! [`DokuClient::verify_notification`].

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::gateway::{
    Customer, GatewayError, GatewayOrder, GatewayOrderRequest, GatewayStatus, PaymentGateway,
};

type HmacSha256 = Hmac<Sha256>;

const CHECKOUT_TARGET: &str = "/checkout/v1/payment";
const STATUS_TARGET: &str = "/orders/v1/status";

/// Credentials and endpoints for the DOKU API.
#[derive(Debug, Clone)]
pub struct DokuConfig {
    pub client_id: String,
    pub secret_key: String,
    pub base_url: String,
    /// Where DOKU sends the buyer after paying.
    pub callback_url: Option<String>,
    pub timeout: Duration,
}

/// Signature headers of a request, outgoing or incoming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub client_id: String,
    pub request_id: String,
    pub timestamp: String,
    pub signature: String,
}

/// `base64(sha256(body))`.
pub fn digest(body: &[u8]) -> String {
    BASE64.encode(Sha256::digest(body))
}

fn string_to_sign(
    client_id: &str,
    request_id: &str,
    timestamp: &str,
    target: &str,
    digest: Option<&str>,
) -> String {
    let mut s = format!(
        "Client-Id:{client_id}\nRequest-Id:{request_id}\nRequest-Timestamp:{timestamp}\nRequest-Target:{target}"
    );
    if let Some(digest) = digest {
        s.push_str("\nDigest:");
        s.push_str(digest);
    }
    s
}

fn mac(secret: &str, message: &str) -> Result<HmacSha256, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Signing(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(mac)
}

/// Computes the `Signature` header value, `HMACSHA256=<base64>`.
pub fn signature(
    secret: &str,
    client_id: &str,
    request_id: &str,
    timestamp: &str,
    target: &str,
    digest: Option<&str>,
) -> Result<String, GatewayError> {
    let message = string_to_sign(client_id, request_id, timestamp, target, digest);
    let tag = mac(secret, &message)?.finalize().into_bytes();
    Ok(format!("HMACSHA256={}", BASE64.encode(tag)))
}

#[derive(Serialize)]
struct CheckoutRequest<'a> {
    order: CheckoutOrder<'a>,
    payment: CheckoutPayment<'a>,
    customer: &'a Customer,
}

#[derive(Serialize)]
struct CheckoutOrder<'a> {
    amount: i64,
    invoice_number: &'a str,
    currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

#[derive(Serialize)]
struct CheckoutPayment<'a> {
    payment_due_date: i64,
    payment_method_types: &'a [String],
}

#[derive(Deserialize)]
struct CheckoutEnvelope {
    response: CheckoutResponse,
}

#[derive(Deserialize)]
struct CheckoutResponse {
    order: InvoiceRef,
    #[serde(default)]
    payment: Option<PaymentRef>,
}

#[derive(Deserialize)]
struct InvoiceRef {
    invoice_number: String,
}

#[derive(Deserialize)]
struct PaymentRef {
    url: Option<String>,
    #[serde(default)]
    payment_code: Option<String>,
    #[serde(default)]
    qr_content: Option<String>,
}

#[derive(Deserialize)]
struct StatusEnvelope {
    transaction: TransactionRef,
}

#[derive(Deserialize)]
struct TransactionRef {
    status: String,
}

/// HTTP client for DOKU Checkout.
pub struct DokuClient {
    client: Client,
    config: DokuConfig,
}

impl DokuClient {
    pub fn new(config: DokuConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn sign(&self, target: &str, body: Option<&[u8]>) -> Result<SignedHeaders, GatewayError> {
        let request_id = Uuid::new_v4().to_string();
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let digest = body.map(digest);
        let signature = signature(
            &self.config.secret_key,
            &self.config.client_id,
            &request_id,
            &timestamp,
            target,
            digest.as_deref(),
        )?;
        Ok(SignedHeaders {
            client_id: self.config.client_id.clone(),
            request_id,
            timestamp,
            signature,
        })
    }

    /// Checks the signature DOKU attached to a payment notification.
    ///
    /// `target` is the path the notification was delivered to.
    pub fn verify_notification(&self, headers: &SignedHeaders, target: &str, body: &[u8]) -> bool {
        if headers.client_id != self.config.client_id {
            return false;
        }
        let Some(encoded) = headers.signature.strip_prefix("HMACSHA256=") else {
            return false;
        };
        let Ok(expected) = BASE64.decode(encoded) else {
            return false;
        };
        let message = string_to_sign(
            &headers.client_id,
            &headers.request_id,
            &headers.timestamp,
            target,
            Some(&digest(body)),
        );
        match mac(&self.config.secret_key, &message) {
            Ok(mac) => mac.verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, GatewayError> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), body = %body, "doku request rejected");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

fn with_signature(request: reqwest::RequestBuilder, headers: SignedHeaders) -> reqwest::RequestBuilder {
    request
        .header("Client-Id", headers.client_id)
        .header("Request-Id", headers.request_id)
        .header("Request-Timestamp", headers.timestamp)
        .header("Signature", headers.signature)
}

#[async_trait]
impl PaymentGateway for DokuClient {
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = request.amount))]
    async fn create_order(
        &self,
        request: &GatewayOrderRequest,
    ) -> Result<GatewayOrder, GatewayError> {
        let payload = CheckoutRequest {
            order: CheckoutOrder {
                amount: request.amount,
                invoice_number: &request.order_id,
                currency: &request.currency,
                callback_url: self.config.callback_url.as_deref(),
            },
            payment: CheckoutPayment {
                payment_due_date: request.due_minutes,
                payment_method_types: &request.channel_codes,
            },
            customer: &request.customer,
        };
        // The digest must cover the exact bytes that go on the wire.
        let body = serde_json::to_vec(&payload).map_err(|e| GatewayError::Parse(e.to_string()))?;
        let headers = self.sign(CHECKOUT_TARGET, Some(&body))?;

        let request = self
            .client
            .post(format!("{}{}", self.config.base_url, CHECKOUT_TARGET))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let raw = self.send(with_signature(request, headers)).await?;

        let envelope: CheckoutEnvelope =
            serde_json::from_str(&raw).map_err(|e| GatewayError::Parse(e.to_string()))?;
        let payment = envelope.response.payment;
        debug!("doku checkout opened");
        Ok(GatewayOrder {
            invoice_number: envelope.response.order.invoice_number,
            payment_url: payment.as_ref().and_then(|p| p.url.clone()),
            payment_code: payment.as_ref().and_then(|p| p.payment_code.clone()),
            qr_payload: payment.and_then(|p| p.qr_content),
        })
    }

    #[instrument(skip(self))]
    async fn query_status(&self, invoice_number: &str) -> Result<GatewayStatus, GatewayError> {
        let target = format!("{STATUS_TARGET}/{invoice_number}");
        let headers = self.sign(&target, None)?;
        let request = self
            .client
            .get(format!("{}{}", self.config.base_url, target));
        let raw = self.send(with_signature(request, headers)).await?;

        let envelope: StatusEnvelope =
            serde_json::from_str(&raw).map_err(|e| GatewayError::Parse(e.to_string()))?;
        GatewayStatus::parse(&envelope.transaction.status).ok_or_else(|| {
            GatewayError::Parse(format!("unknown transaction status `{}`", envelope.transaction.status))
        })
    }
}
