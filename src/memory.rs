//! In-process catalog and ledger.
//!
//! Transactions are serialized behind one async mutex held from `begin` to
//! `commit`/`rollback`, which makes every checkout serializable. Commit
//! re-checks the uniqueness rules the Postgres schema enforces with partial
//! indexes.

use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::catalog::Catalog;
use crate::ledger::{Ledger, LedgerTx};
use crate::types::{DiscountType, Game, NewOrder, Order, OrderStatus, PromoEvent};

#[derive(Default)]
struct State {
    games: Vec<Game>,
    events: Vec<PromoEvent>,
    orders: Vec<Order>,
    next_order_id: i64,
}

impl State {
    fn flash_sale_held(&self, day: NaiveDate) -> bool {
        self.orders.iter().any(|o| {
            o.discount_type == DiscountType::FlashSale
                && o.discount_day == day
                && o.status.holds_claim()
        })
    }

    fn claimed(&self, user_id: i64, day: NaiveDate) -> bool {
        self.orders.iter().any(|o| {
            o.user_id == user_id
                && o.discount_day == day
                && o.discount_type.is_claim()
                && o.status.holds_claim()
        })
    }

    fn purchased(&self, user_id: i64, game_id: i64) -> bool {
        self.orders
            .iter()
            .any(|o| o.user_id == user_id && o.game_id == game_id && o.status == OrderStatus::Success)
    }

    fn check_insert(&self, order: &Order) -> Result<()> {
        if self
            .orders
            .iter()
            .any(|o| o.order_id == order.order_id || o.invoice_number == order.invoice_number)
        {
            bail!("duplicate order id {}", order.order_id);
        }
        if order.status.holds_claim() {
            if order.discount_type == DiscountType::FlashSale && self.flash_sale_held(order.discount_day) {
                bail!("flash sale slot for {} already held", order.discount_day);
            }
            if order.discount_type.is_claim() && self.claimed(order.user_id, order.discount_day) {
                bail!("user {} already claimed a discount on {}", order.user_id, order.discount_day);
            }
        }
        Ok(())
    }
}

/// A catalog and ledger kept in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    gate: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a game; games are ordered by id like the `games` table.
    pub async fn add_game(&self, game: Game) {
        let mut state = self.state.lock().await;
        state.games.push(game);
        state.games.sort_by_key(|g| g.id);
    }

    /// Adds a promotional event. Later events take precedence.
    pub async fn add_event(&self, event: PromoEvent) {
        self.state.lock().await.events.push(event);
    }

    /// A snapshot of every stored order, oldest first.
    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.clone()
    }
}

fn materialize(id: i64, order: &NewOrder) -> Order {
    Order {
        id,
        user_id: order.user_id,
        game_id: order.game_id,
        order_id: order.order_id.clone(),
        invoice_number: order.invoice_number.clone(),
        amount: order.amount,
        original_price: order.original_price,
        discount_type: order.discount_type,
        discount_day: order.discount_day,
        status: order.status,
        payment_method: order.payment_method.clone(),
        payment_channel: order.payment_channel.clone(),
        payment_url: order.payment_url.clone(),
        payment_code: order.payment_code.clone(),
        qr_code_url: order.qr_code_url.clone(),
        expired_at: order.expired_at,
        created_at: order.created_at,
        updated_at: order.created_at,
        paid_at: None,
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Game>> {
        let state = self.state.lock().await;
        Ok(state.games.iter().find(|g| g.slug == slug).cloned())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.state.lock().await.games.len() as u64)
    }

    async fn find_by_offset(&self, offset: u64) -> Result<Option<Game>> {
        let state = self.state.lock().await;
        let game = usize::try_from(offset)
            .ok()
            .and_then(|i| state.games.get(i))
            .cloned();
        Ok(game)
    }

    async fn active_event(&self, now: DateTime<Utc>) -> Result<Option<PromoEvent>> {
        let state = self.state.lock().await;
        Ok(state.events.iter().rev().find(|e| e.is_running(now)).cloned())
    }
}

#[async_trait]
impl Ledger for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let guard = self.gate.clone().lock_owned().await;
        Ok(Box::new(MemoryTx {
            state: self.state.clone(),
            pending: Vec::new(),
            _guard: guard,
        }))
    }

    async fn has_purchased(&self, user_id: i64, game_id: i64) -> Result<bool> {
        Ok(self.state.lock().await.purchased(user_id, game_id))
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.orders.iter().find(|o| o.order_id == order_id).cloned())
    }

    async fn find_by_invoice_number(&self, invoice_number: &str) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .find(|o| o.invoice_number == invoice_number)
            .cloned())
    }

    async fn transition(
        &self,
        order_id: &str,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let mut state = self.state.lock().await;
        let Some(order) = state
            .orders
            .iter_mut()
            .find(|o| o.order_id == order_id && o.status.is_open())
        else {
            return Ok(None);
        };
        order.status = status;
        order.updated_at = at;
        if status == OrderStatus::Success {
            order.paid_at = Some(at);
        }
        Ok(Some(order.clone()))
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for order in state
            .orders
            .iter_mut()
            .filter(|o| o.status.is_open() && o.expired_at < now)
        {
            order.status = OrderStatus::Expired;
            order.updated_at = now;
            expired += 1;
        }
        Ok(expired)
    }
}

struct MemoryTx {
    state: Arc<Mutex<State>>,
    pending: Vec<Order>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_buyer(&mut self, _user_id: i64, _day: NaiveDate) -> Result<()> {
        // The transaction gate already serializes everything.
        Ok(())
    }

    async fn order_exists(&mut self, order_id: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.orders.iter().any(|o| o.order_id == order_id)
            || self.pending.iter().any(|o| o.order_id == order_id))
    }

    async fn has_purchased(&mut self, user_id: i64, game_id: i64) -> Result<bool> {
        Ok(self.state.lock().await.purchased(user_id, game_id))
    }

    async fn has_claimed_discount(&mut self, user_id: i64, day: NaiveDate) -> Result<bool> {
        Ok(self.state.lock().await.claimed(user_id, day))
    }

    async fn flash_sale_taken(&mut self, day: NaiveDate) -> Result<bool> {
        Ok(self.state.lock().await.flash_sale_held(day))
    }

    async fn claim_flash_sale_slot(&mut self, day: NaiveDate) -> Result<bool> {
        Ok(!self.state.lock().await.flash_sale_held(day))
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.next_order_id += 1;
        let id = state.next_order_id;
        self.pending.push(materialize(id, order));
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { state, pending, _guard } = *self;
        let mut state = state.lock().await;
        let before = state.orders.len();
        for order in pending {
            if let Err(e) = state.check_insert(&order) {
                state.orders.truncate(before);
                return Err(e);
            }
            state.orders.push(order);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
