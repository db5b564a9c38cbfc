//! The discount ledger: persisted orders and the eligibility queries run
//! against them.
//!
//! Checkout runs inside a [`LedgerTx`]. Anything read or written through it
//! is discarded unless [`LedgerTx::commit`] succeeds.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::types::{DiscountType, NewOrder, Order, OrderStatus, UnknownVariant};

/// Order storage.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    /// Whether the user has a paid order for the game.
    async fn has_purchased(&self, user_id: i64, game_id: i64) -> Result<bool>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Order>>;

    async fn find_by_invoice_number(&self, invoice_number: &str) -> Result<Option<Order>>;

    /// Moves an open (pending or waiting) order to `status`.
    ///
    /// Returns the updated order if this call made the transition, `None` if
    /// the order was already settled. A transition into success stamps
    /// `paid_at` with `at`.
    async fn transition(
        &self,
        order_id: &str,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>>;

    /// Marks every open order whose `expired_at` is before `now` as expired.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// One checkout's view of the ledger.
#[async_trait]
pub trait LedgerTx: Send {
    /// Holds the buyer's lock for `day` until the transaction ends, so one
    /// buyer's checkouts of a day run one after another.
    async fn lock_buyer(&mut self, user_id: i64, day: NaiveDate) -> Result<()>;

    /// Whether an order with this business id is already recorded.
    async fn order_exists(&mut self, order_id: &str) -> Result<bool>;

    async fn has_purchased(&mut self, user_id: i64, game_id: i64) -> Result<bool>;

    /// Whether the user holds a live discounted order claimed on `day`.
    async fn has_claimed_discount(&mut self, user_id: i64, day: NaiveDate) -> Result<bool>;

    /// Non-locking read of whether `day`'s flash sale slot is held.
    async fn flash_sale_taken(&mut self, day: NaiveDate) -> Result<bool>;

    /// Locks `day`'s flash sale slot until the transaction ends and reports
    /// whether it is still free.
    async fn claim_flash_sale_slot(&mut self, day: NaiveDate) -> Result<bool>;

    async fn insert_order(&mut self, order: &NewOrder) -> Result<i64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

const ORDER_COLUMNS: &str = "id, user_id, game_id, order_id, invoice_number, amount, original_price, \
     discount_type, discount_day, status, payment_method, payment_channel, payment_url, \
     payment_code, qr_code_url, expired_at, created_at, updated_at, paid_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    game_id: i64,
    order_id: String,
    invoice_number: String,
    amount: i64,
    original_price: i64,
    discount_type: String,
    discount_day: NaiveDate,
    status: String,
    payment_method: String,
    payment_channel: String,
    payment_url: Option<String>,
    payment_code: Option<String>,
    qr_code_url: Option<String>,
    expired_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = UnknownVariant;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            game_id: row.game_id,
            order_id: row.order_id,
            invoice_number: row.invoice_number,
            amount: row.amount,
            original_price: row.original_price,
            discount_type: row.discount_type.parse::<DiscountType>()?,
            discount_day: row.discount_day,
            status: row.status.parse::<OrderStatus>()?,
            payment_method: row.payment_method,
            payment_channel: row.payment_channel,
            payment_url: row.payment_url,
            payment_code: row.payment_code,
            qr_code_url: row.qr_code_url,
            expired_at: row.expired_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            paid_at: row.paid_at,
        })
    }
}

fn into_order(row: Option<OrderRow>) -> Result<Option<Order>> {
    row.map(Order::try_from)
        .transpose()
        .context("corrupt order row")
}

/// Ledger stored in the `transactions` table.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM transactions WHERE {column} = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to look up order by {column}"))?;
        into_order(row)
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await.context("failed to open transaction")?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn has_purchased(&self, user_id: i64, game_id: i64) -> Result<bool> {
        sqlx::query_scalar(HAS_PURCHASED)
            .bind(user_id)
            .bind(game_id)
            .fetch_one(&self.pool)
            .await
            .context("failed to check purchase")
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Order>> {
        self.find_one("order_id", order_id).await
    }

    async fn find_by_invoice_number(&self, invoice_number: &str) -> Result<Option<Order>> {
        self.find_one("invoice_number", invoice_number).await
    }

    async fn transition(
        &self,
        order_id: &str,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        // The status guard makes concurrent deliveries of the same
        // notification race for one row; only the winner sees RETURNING.
        let sql = format!(
            r#"UPDATE transactions
               SET status = $2,
                   paid_at = CASE WHEN $2 = 'success' THEN $3 ELSE paid_at END,
                   updated_at = $3
               WHERE order_id = $1 AND status IN ('pending', 'waiting')
               RETURNING {ORDER_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .bind(status.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .context("failed to update order status")?;
        into_order(row)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(
            r#"UPDATE transactions
               SET status = 'expired', updated_at = $1
               WHERE status IN ('pending', 'waiting') AND expired_at < $1"#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .context("failed to expire overdue orders")?;
        Ok(res.rows_affected())
    }
}

const HAS_PURCHASED: &str = r#"SELECT EXISTS(
    SELECT 1 FROM transactions WHERE user_id = $1 AND game_id = $2 AND status = 'success'
)"#;

const FLASH_SALE_HELD: &str = r#"SELECT EXISTS(
    SELECT 1 FROM transactions
    WHERE discount_type = 'flash_sale'
      AND discount_day = $1
      AND status IN ('pending', 'waiting', 'success')
)"#;

struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_buyer(&mut self, user_id: i64, day: NaiveDate) -> Result<()> {
        sqlx::query(r#"SELECT pg_advisory_xact_lock(hashtextextended($1, 0))"#)
            .bind(format!("buyer:{user_id}:{day}"))
            .execute(&mut *self.tx)
            .await
            .context("failed to lock buyer")?;
        Ok(())
    }

    async fn order_exists(&mut self, order_id: &str) -> Result<bool> {
        sqlx::query_scalar(r#"SELECT EXISTS(SELECT 1 FROM transactions WHERE order_id = $1)"#)
            .bind(order_id)
            .fetch_one(&mut *self.tx)
            .await
            .context("failed to check order id")
    }

    async fn has_purchased(&mut self, user_id: i64, game_id: i64) -> Result<bool> {
        sqlx::query_scalar(HAS_PURCHASED)
            .bind(user_id)
            .bind(game_id)
            .fetch_one(&mut *self.tx)
            .await
            .context("failed to check purchase")
    }

    async fn has_claimed_discount(&mut self, user_id: i64, day: NaiveDate) -> Result<bool> {
        sqlx::query_scalar(
            r#"SELECT EXISTS(
                SELECT 1 FROM transactions
                WHERE user_id = $1
                  AND discount_day = $2
                  AND discount_type IN ('daily', 'event', 'flash_sale')
                  AND status IN ('pending', 'waiting', 'success')
            )"#,
        )
        .bind(user_id)
        .bind(day)
        .fetch_one(&mut *self.tx)
        .await
        .context("failed to check claimed discount")
    }

    async fn flash_sale_taken(&mut self, day: NaiveDate) -> Result<bool> {
        sqlx::query_scalar(FLASH_SALE_HELD)
            .bind(day)
            .fetch_one(&mut *self.tx)
            .await
            .context("failed to check flash sale slot")
    }

    async fn claim_flash_sale_slot(&mut self, day: NaiveDate) -> Result<bool> {
        // One row per day; holding its lock serializes every flash sale
        // candidate of that day until commit or rollback.
        sqlx::query(r#"INSERT INTO flash_sale_slots (day) VALUES ($1) ON CONFLICT (day) DO NOTHING"#)
            .bind(day)
            .execute(&mut *self.tx)
            .await
            .context("failed to create flash sale slot")?;
        sqlx::query(r#"SELECT day FROM flash_sale_slots WHERE day = $1 FOR UPDATE"#)
            .bind(day)
            .fetch_one(&mut *self.tx)
            .await
            .context("failed to lock flash sale slot")?;

        let taken: bool = sqlx::query_scalar(FLASH_SALE_HELD)
            .bind(day)
            .fetch_one(&mut *self.tx)
            .await
            .context("failed to check flash sale slot")?;
        Ok(!taken)
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<i64> {
        sqlx::query_scalar(
            r#"INSERT INTO transactions
                (user_id, game_id, order_id, invoice_number, amount, original_price,
                 discount_type, discount_day, status, payment_method, payment_channel,
                 payment_url, payment_code, qr_code_url, expired_at, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $16)
               RETURNING id"#,
        )
        .bind(order.user_id)
        .bind(order.game_id)
        .bind(&order.order_id)
        .bind(&order.invoice_number)
        .bind(order.amount)
        .bind(order.original_price)
        .bind(order.discount_type.as_str())
        .bind(order.discount_day)
        .bind(order.status.as_str())
        .bind(&order.payment_method)
        .bind(&order.payment_channel)
        .bind(&order.payment_url)
        .bind(&order.payment_code)
        .bind(&order.qr_code_url)
        .bind(order.expired_at)
        .bind(order.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .context("failed to insert order")
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("failed to commit checkout")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.context("failed to roll back checkout")
    }
}
