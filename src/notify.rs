use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use crate::types::Order;

/// Tells the buyer their payment went through.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn payment_succeeded(&self, order: &Order) -> Result<()>;
}

/// Formats whole Rupiah with dot thousands separators, e.g. `Rp 75.000`.
pub fn format_rupiah(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0 { "-" } else { "" };
    format!("{sign}Rp {grouped}")
}

/// Receipt line shown in the buyer's notification feed.
pub fn receipt_message(game_title: &str, order: &Order) -> String {
    format!(
        "Payment successful for {game_title}: {} via {} (order {}).",
        format_rupiah(order.amount),
        order.payment_method,
        order.order_id
    )
}

/// Writes an in-app notification for the buyer and logs the receipt.
#[derive(Clone)]
pub struct PgNotifier {
    pool: PgPool,
}

impl PgNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn payment_succeeded(&self, order: &Order) -> Result<()> {
        let title: Option<String> = sqlx::query_scalar(r#"SELECT title FROM games WHERE id = $1"#)
            .bind(order.game_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load game title")?;
        let title = title.unwrap_or_else(|| format!("game #{}", order.game_id));
        let message = receipt_message(&title, order);

        sqlx::query(
            r#"INSERT INTO notifications (user_id, type, message) VALUES ($1, 'payment', $2)"#,
        )
        .bind(order.user_id)
        .bind(&message)
        .execute(&self.pool)
        .await
        .context("failed to store payment notification")?;

        info!(
            user_id = order.user_id,
            order_id = %order.order_id,
            amount = order.amount,
            "payment receipt issued: {}",
            message
        );
        Ok(())
    }
}
