//! Checkout: pricing a game for a buyer and opening the payment.
//!
//! [`Checkout::submit`] runs the whole allocation inside one ledger
//! transaction. The flash sale winner check locks the day's slot, so two
//! buyers can never both see "no winner yet". A per-buyer lock does the same
//! for the one-discount-per-day rule. The gateway call happens while those
//! locks are held and any failure rolls everything back.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::catalog::Catalog;
use crate::channels::PaymentMethod;
use crate::clock::Clock;
use crate::discount::{DiscountQuote, calculate_discount, daily_deal_index, undiscounted};
use crate::error::CheckoutError;
use crate::gateway::{Customer, GatewayOrderRequest, PaymentGateway};
use crate::ledger::{Ledger, LedgerTx};
use crate::types::{DiscountType, Game, NewOrder, OrderStatus, PromoEvent, UserContext};

/// Tunables of the checkout flow.
#[derive(Debug, Clone)]
pub struct CheckoutPolicy {
    /// Currency sent to the gateway.
    pub currency: String,
    /// How long an ordinary order stays payable.
    pub order_ttl: Duration,
    /// How long the flash sale winner has to pay before the slot can be
    /// released by the expiry sweep.
    pub flash_sale_window: Duration,
}

impl Default for CheckoutPolicy {
    fn default() -> Self {
        Self {
            currency: "IDR".to_string(),
            order_ttl: Duration::hours(24),
            flash_sale_window: Duration::minutes(15),
        }
    }
}

/// What the buyer would pay if they checked out now.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutPreview {
    pub game: Game,
    pub discount: DiscountQuote,
}

/// A payment opened with the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedPayment {
    pub order_id: String,
    pub redirect_url: Option<String>,
    pub amount: i64,
    pub original_price: i64,
    pub discount_type: DiscountType,
    pub expired_at: DateTime<Utc>,
}

/// The catalog side of a checkout: the game, flagged if it is today's daily
/// deal, and the event running right now.
struct Listing {
    game: Game,
    event: Option<PromoEvent>,
}

/// Whether the flash sale slot is checked with or without taking its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotCheck {
    Peek,
    Lock,
}

pub struct Checkout {
    catalog: Arc<dyn Catalog>,
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    policy: CheckoutPolicy,
}

impl Checkout {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        policy: CheckoutPolicy,
    ) -> Self {
        Self {
            catalog,
            ledger,
            gateway,
            clock,
            policy,
        }
    }

    /// Prices the game for the buyer without reserving anything.
    #[instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn preview(
        &self,
        slug: &str,
        user: &UserContext,
    ) -> Result<CheckoutPreview, CheckoutError> {
        let now = self.clock.now();
        let today = self.clock.today();
        let listing = self.listing(slug, today, now).await?;

        let mut tx = self.ledger.begin().await?;
        let result = async {
            if tx.has_purchased(user.id, listing.game.id).await? {
                return Err(CheckoutError::AlreadyOwned {
                    slug: listing.game.slug.clone(),
                });
            }
            self.quote(tx.as_mut(), &listing, user, today, SlotCheck::Peek)
                .await
        }
        .await;
        release(tx).await;

        Ok(CheckoutPreview {
            discount: result?,
            game: listing.game,
        })
    }

    /// Allocates the price, opens the payment and records the order.
    ///
    /// Either the order row (and any flash sale claim) is committed together
    /// with a successful gateway call, or nothing is.
    #[instrument(skip(self, user), fields(user_id = user.id, method = %method))]
    pub async fn submit(
        &self,
        slug: &str,
        user: &UserContext,
        method: PaymentMethod,
    ) -> Result<SubmittedPayment, CheckoutError> {
        let now = self.clock.now();
        let today = self.clock.today();
        // Catalog reads happen outside the transaction so a checkout never
        // holds a pooled connection while waiting for a second one.
        let listing = self.listing(slug, today, now).await?;

        let mut tx = self.ledger.begin().await?;
        match self
            .submit_in(tx.as_mut(), &listing, user, method, now, today)
            .await
        {
            Ok(payment) => {
                tx.commit().await?;
                info!(
                    order_id = %payment.order_id,
                    discount_type = %payment.discount_type,
                    amount = payment.amount,
                    "checkout committed"
                );
                Ok(payment)
            }
            Err(e) => {
                release(tx).await;
                Err(e)
            }
        }
    }

    async fn submit_in(
        &self,
        tx: &mut dyn LedgerTx,
        listing: &Listing,
        user: &UserContext,
        method: PaymentMethod,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<SubmittedPayment, CheckoutError> {
        let game = &listing.game;
        tx.lock_buyer(user.id, today).await?;
        if tx.has_purchased(user.id, game.id).await? {
            return Err(CheckoutError::AlreadyOwned {
                slug: game.slug.clone(),
            });
        }

        let order_id = format!("ORDER-{}-{}", now.timestamp_millis(), user.id);
        if tx.order_exists(&order_id).await? {
            warn!(order_id = %order_id, "repeated checkout within the same millisecond");
            return Err(CheckoutError::DuplicateCheckout(order_id));
        }

        let quote = self
            .quote(tx, listing, user, today, SlotCheck::Lock)
            .await?;

        let ttl = if quote.discount_type == DiscountType::FlashSale {
            info!(game_id = game.id, "flash sale slot won");
            self.policy.flash_sale_window
        } else {
            self.policy.order_ttl
        };
        let expired_at = now + ttl;
        let channel_codes: Vec<String> = method
            .channel_codes()
            .iter()
            .map(|c| (*c).to_string())
            .collect();

        let request = GatewayOrderRequest {
            order_id: order_id.clone(),
            amount: quote.final_price,
            currency: self.policy.currency.clone(),
            channel_codes,
            customer: Customer {
                id: user.id.to_string(),
                name: user.name.clone(),
                email: user.email.clone(),
            },
            due_minutes: ttl.num_minutes(),
        };
        let opened = self.gateway.create_order(&request).await.map_err(|e| {
            warn!(order_id = %order_id, error = %e, "gateway refused checkout");
            CheckoutError::Gateway(e)
        })?;

        let invoice_number = if opened.invoice_number.is_empty() {
            order_id.clone()
        } else {
            opened.invoice_number
        };
        let order = NewOrder {
            user_id: user.id,
            game_id: game.id,
            order_id: order_id.clone(),
            invoice_number,
            amount: quote.final_price,
            original_price: game.price,
            discount_type: quote.discount_type,
            discount_day: today,
            status: OrderStatus::Waiting,
            payment_method: method.as_str().to_string(),
            payment_channel: request.channel_codes.join(","),
            payment_url: opened.payment_url.clone(),
            payment_code: opened.payment_code,
            qr_code_url: opened.qr_payload,
            expired_at,
            created_at: now,
        };
        tx.insert_order(&order).await?;

        Ok(SubmittedPayment {
            order_id,
            redirect_url: opened.payment_url,
            amount: order.amount,
            original_price: order.original_price,
            discount_type: order.discount_type,
            expired_at,
        })
    }

    async fn listing(
        &self,
        slug: &str,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Listing, CheckoutError> {
        let mut game = self
            .catalog
            .find_by_slug(slug)
            .await?
            .ok_or(CheckoutError::NotFound("game"))?;
        game.is_daily_deal = self.is_daily_deal(&game, today).await?;
        let event = self.catalog.active_event(now).await?;
        Ok(Listing { game, event })
    }

    /// Works out the buyer's price, downgrading a flash sale that another
    /// buyer already holds today.
    async fn quote(
        &self,
        tx: &mut dyn LedgerTx,
        listing: &Listing,
        user: &UserContext,
        today: NaiveDate,
        slot: SlotCheck,
    ) -> Result<DiscountQuote, CheckoutError> {
        let Listing { game, event } = listing;
        // One discounted order per buyer per day.
        if tx.has_claimed_discount(user.id, today).await? {
            return Ok(undiscounted(game.price));
        }

        let quote = calculate_discount(today, game, true, event.as_ref());
        if quote.discount_type != DiscountType::FlashSale {
            return Ok(quote);
        }

        let available = match slot {
            SlotCheck::Peek => !tx.flash_sale_taken(today).await?,
            SlotCheck::Lock => tx.claim_flash_sale_slot(today).await?,
        };
        if available {
            return Ok(quote);
        }
        info!(game_id = game.id, "flash sale already taken today");
        Ok(calculate_discount(today, game, false, event.as_ref()))
    }

    async fn is_daily_deal(&self, game: &Game, today: NaiveDate) -> Result<bool, CheckoutError> {
        let total = self.catalog.count().await?;
        let Some(index) = daily_deal_index(today, total) else {
            return Ok(false);
        };
        let deal = self.catalog.find_by_offset(index).await?;
        Ok(deal.is_some_and(|deal| deal.id == game.id))
    }
}

async fn release(tx: Box<dyn LedgerTx>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = ?e, "checkout rollback failed");
    }
}
