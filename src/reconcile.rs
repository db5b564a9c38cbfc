//! Settlement: moving stored orders to their final status.
//!
//! Three entry points lead here: gateway notifications, buyers polling their
//! order, and the expiry sweep. All of them go through
//! [`Ledger::transition`], whose status guard makes a repeated success
//! notify the buyer only once.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::error::CheckoutError;
use crate::gateway::{GatewayNotification, GatewayStatus, PaymentGateway};
use crate::ledger::Ledger;
use crate::notify::Notifier;
use crate::types::{Order, OrderStatus, UserContext};

/// Result of applying a gateway notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallbackOutcome {
    pub status: OrderStatus,
    /// False when the notification repeated an already applied state.
    pub changed: bool,
}

pub struct Reconciler {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            gateway,
            notifier,
            clock,
        }
    }

    /// Applies a payment notification pushed by the gateway.
    #[instrument(skip(self, notification), fields(invoice = %notification.order.invoice_number))]
    pub async fn handle_callback(
        &self,
        notification: &GatewayNotification,
    ) -> Result<CallbackOutcome, CheckoutError> {
        let raw = &notification.transaction.status;
        let status = GatewayStatus::parse(raw)
            .ok_or_else(|| CheckoutError::Validation(format!("unknown transaction status `{raw}`")))?
            .order_status();

        let order = self
            .ledger
            .find_by_invoice_number(&notification.order.invoice_number)
            .await?
            .ok_or(CheckoutError::NotFound("order"))?;
        if !notification.order.amount_matches(order.amount) {
            warn!(order_id = %order.order_id, expected = order.amount, "notification amount mismatch");
            return Err(CheckoutError::Validation(format!(
                "notified amount does not match order {}",
                order.order_id
            )));
        }

        if !status.is_open() {
            if let Some(updated) = self.settle(&order, status).await? {
                return Ok(CallbackOutcome {
                    status: updated.status,
                    changed: true,
                });
            }
        }

        // Either a pending echo or a repeat; report what is stored.
        let current = self
            .ledger
            .find_by_order_id(&order.order_id)
            .await?
            .map_or(order.status, |o| o.status);
        debug!(stored = %current, reported = %status, "notification left order unchanged");
        Ok(CallbackOutcome {
            status: current,
            changed: false,
        })
    }

    /// The buyer's view of an order, refreshed from the gateway while the
    /// order is still open. Gateway trouble falls back to the stored status.
    #[instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn order_status(
        &self,
        order_id: &str,
        user: &UserContext,
    ) -> Result<OrderStatus, CheckoutError> {
        let order = self
            .ledger
            .find_by_order_id(order_id)
            .await?
            .ok_or(CheckoutError::NotFound("order"))?;
        if order.user_id != user.id {
            return Err(CheckoutError::Unauthorized);
        }
        if !order.status.is_open() {
            return Ok(order.status);
        }

        let live = match self.gateway.query_status(&order.invoice_number).await {
            Ok(live) => live,
            Err(e) => {
                warn!(order_id, error = %e, "status query failed, using stored status");
                return Ok(order.status);
            }
        };
        if live != GatewayStatus::Success {
            return Ok(order.status);
        }

        match self.settle(&order, OrderStatus::Success).await {
            Ok(Some(updated)) => Ok(updated.status),
            // Someone else settled it in the meantime.
            Ok(None) => Ok(self
                .ledger
                .find_by_order_id(order_id)
                .await
                .ok()
                .flatten()
                .map_or(OrderStatus::Success, |o| o.status)),
            Err(e) => {
                warn!(order_id, error = %e, "failed to record payment, using stored status");
                Ok(order.status)
            }
        }
    }

    /// Expires every open order past its deadline, releasing its discount
    /// claim (and the flash sale slot, if it held it).
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<u64, CheckoutError> {
        let expired = self.ledger.expire_overdue(self.clock.now()).await?;
        if expired > 0 {
            info!(expired, "expired overdue orders");
        }
        Ok(expired)
    }

    async fn settle(
        &self,
        order: &Order,
        status: OrderStatus,
    ) -> Result<Option<Order>, CheckoutError> {
        let Some(updated) = self
            .ledger
            .transition(&order.order_id, status, self.clock.now())
            .await?
        else {
            return Ok(None);
        };
        info!(order_id = %updated.order_id, status = %updated.status, "order settled");

        if updated.status == OrderStatus::Success {
            if let Err(e) = self.notifier.payment_succeeded(&updated).await {
                warn!(order_id = %updated.order_id, error = ?e, "payment notification failed");
            }
        }
        Ok(Some(updated))
    }
}
