use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A game offered in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Game {
    /// The ID of the game.
    pub id: i64,
    /// The URL slug of the game.
    pub slug: String,
    /// The display title of the game.
    pub title: String,
    /// The list price in whole Rupiah.
    pub price: i64,
    /// The free-form category; a "pro" substring makes the game eligible for
    /// event discounts.
    pub category: String,
    /// Whether this game is today's daily deal. Derived per request.
    #[sqlx(skip)]
    pub is_daily_deal: bool,
}

/// A promotional event configured by the admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PromoEvent {
    /// The ID of the event.
    pub id: i64,
    /// The headline shown to buyers; also the discount's event name.
    pub title: String,
    /// Start of the event window, if bounded.
    pub starts_at: Option<DateTime<Utc>>,
    /// End of the event window, if bounded.
    pub ends_at: Option<DateTime<Utc>>,
    /// Whether the admins switched the event on.
    pub is_active: bool,
}

impl PromoEvent {
    /// Returns true if the event is switched on and `now` falls in its window.
    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.starts_at.is_none_or(|start| start <= now)
            && self.ends_at.is_none_or(|end| now <= end)
    }
}

/// Error returned when a stored enum column holds an unknown value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

/// The kind of discount an order was charged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    None,
    Daily,
    Event,
    FlashSale,
}

impl DiscountType {
    pub fn as_str(self) -> &'static str {
        match self {
            DiscountType::None => "none",
            DiscountType::Daily => "daily",
            DiscountType::Event => "event",
            DiscountType::FlashSale => "flash_sale",
        }
    }

    /// Whether this discount counts against the buyer's one-per-day cap.
    pub fn is_claim(self) -> bool {
        self != DiscountType::None
    }
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscountType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DiscountType::None),
            "daily" => Ok(DiscountType::Daily),
            "event" => Ok(DiscountType::Event),
            "flash_sale" => Ok(DiscountType::FlashSale),
            other => Err(UnknownVariant {
                kind: "discount type",
                value: other.to_string(),
            }),
        }
    }
}

/// The settlement state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Waiting,
    Success,
    Failed,
    Expired,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Waiting => "waiting",
            OrderStatus::Success => "success",
            OrderStatus::Failed => "failed",
            OrderStatus::Expired => "expired",
        }
    }

    /// Still awaiting payment; the only states a transition may leave.
    pub fn is_open(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Waiting)
    }

    /// Whether an order in this state still holds its discount claim.
    pub fn holds_claim(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Waiting | OrderStatus::Success
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "waiting" => Ok(OrderStatus::Waiting),
            "success" => Ok(OrderStatus::Success),
            "failed" => Ok(OrderStatus::Failed),
            "expired" => Ok(OrderStatus::Expired),
            other => Err(UnknownVariant {
                kind: "order status",
                value: other.to_string(),
            }),
        }
    }
}

/// A persisted order, one row of the discount ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub game_id: i64,
    /// Business key, `ORDER-<epochMillis>-<userId>`.
    pub order_id: String,
    /// Invoice number known to the gateway.
    pub invoice_number: String,
    /// The amount actually charged.
    pub amount: i64,
    pub original_price: i64,
    pub discount_type: DiscountType,
    /// Business day the discount was claimed on.
    pub discount_day: NaiveDate,
    pub status: OrderStatus,
    pub payment_method: String,
    pub payment_channel: String,
    pub payment_url: Option<String>,
    pub payment_code: Option<String>,
    pub qr_code_url: Option<String>,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// The fields of an order about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: i64,
    pub game_id: i64,
    pub order_id: String,
    pub invoice_number: String,
    pub amount: i64,
    pub original_price: i64,
    pub discount_type: DiscountType,
    pub discount_day: NaiveDate,
    pub status: OrderStatus,
    pub payment_method: String,
    pub payment_channel: String,
    pub payment_url: Option<String>,
    pub payment_code: Option<String>,
    pub qr_code_url: Option<String>,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The authenticated buyer, as vouched for by the upstream proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserContext {
    pub id: i64,
    pub name: String,
    pub email: String,
}
