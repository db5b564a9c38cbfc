//! The seam between checkout and the payment provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::OrderStatus;

/// Error from payment gateway calls.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),
    #[error("gateway rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("signing error: {0}")]
    Signing(String),
}

/// The buyer as introduced to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// A request to open a payment for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrderRequest {
    pub order_id: String,
    /// The amount to charge, after discounts.
    pub amount: i64,
    pub currency: String,
    pub channel_codes: Vec<String>,
    pub customer: Customer,
    /// How long the gateway should keep the payment open, in minutes.
    pub due_minutes: i64,
}

/// The payment opened by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GatewayOrder {
    pub invoice_number: String,
    pub payment_url: Option<String>,
    pub payment_code: Option<String>,
    pub qr_payload: Option<String>,
}

/// Payment state as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Pending,
    Success,
    Failed,
    Expired,
}

impl GatewayStatus {
    /// Maps the gateway vocabulary (`SUCCESS`, `FAILED`, ...) regardless of case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "paid" | "settlement" => Some(GatewayStatus::Success),
            "failed" | "failure" | "rejected" => Some(GatewayStatus::Failed),
            "expired" | "timeout" => Some(GatewayStatus::Expired),
            "pending" | "waiting" => Some(GatewayStatus::Pending),
            _ => None,
        }
    }

    pub fn order_status(self) -> OrderStatus {
        match self {
            GatewayStatus::Pending => OrderStatus::Pending,
            GatewayStatus::Success => OrderStatus::Success,
            GatewayStatus::Failed => OrderStatus::Failed,
            GatewayStatus::Expired => OrderStatus::Expired,
        }
    }
}

/// Payment notification pushed by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayNotification {
    pub order: NotifiedOrder,
    pub transaction: NotifiedTransaction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifiedOrder {
    pub invoice_number: String,
    #[serde(default)]
    pub amount: Option<Value>,
}

impl NotifiedOrder {
    /// Whether the reported amount, if any, equals `expected`. DOKU sends it
    /// as a JSON number, some relays as a numeric string.
    pub fn amount_matches(&self, expected: i64) -> bool {
        let reported = match &self.amount {
            None | Some(Value::Null) => return true,
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            Some(_) => None,
        };
        reported == Some(expected)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifiedTransaction {
    pub status: String,
}

/// A payment provider able to open payments and report on them.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, request: &GatewayOrderRequest)
    -> Result<GatewayOrder, GatewayError>;

    async fn query_status(&self, invoice_number: &str) -> Result<GatewayStatus, GatewayError>;
}
