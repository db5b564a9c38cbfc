#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use game_checkout::AppState;
use game_checkout::checkout::{Checkout, CheckoutPolicy};
use game_checkout::clock::{Clock, FixedClock};
use game_checkout::gateway::{
    GatewayError, GatewayNotification, GatewayOrder, GatewayOrderRequest, GatewayStatus,
    NotifiedOrder, NotifiedTransaction, PaymentGateway,
};
use game_checkout::memory::MemoryStore;
use game_checkout::notify::Notifier;
use game_checkout::reconcile::Reconciler;
use game_checkout::types::{Game, Order, PromoEvent, UserContext};

pub fn wib() -> FixedOffset {
    FixedOffset::east_opt(7 * 3600).unwrap()
}

/// An ordinary day: not a double date, not a holiday.
pub fn plain_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
}

pub fn noon(day: NaiveDate) -> FixedClock {
    FixedClock::at_noon(day, wib())
}

pub fn later(clock: &FixedClock, by: chrono::Duration) -> FixedClock {
    FixedClock::new(clock.now() + by, wib())
}

pub fn game(id: i64, slug: &str, price: i64, category: &str) -> Game {
    Game {
        id,
        slug: slug.to_string(),
        title: slug.replace('-', " "),
        price,
        category: category.to_string(),
        is_daily_deal: false,
    }
}

pub fn event(title: &str) -> PromoEvent {
    PromoEvent {
        id: 1,
        title: title.to_string(),
        starts_at: None,
        ends_at: None,
        is_active: true,
    }
}

pub fn user(id: i64) -> UserContext {
    UserContext {
        id,
        name: format!("player{id}"),
        email: format!("player{id}@example.com"),
    }
}

pub const SWEEP_TOKEN: &str = "sweep-secret";

pub fn notification(invoice: &str, status: &str) -> GatewayNotification {
    notification_for_amount(invoice, status, None)
}

pub fn notification_for_amount(
    invoice: &str,
    status: &str,
    amount: Option<serde_json::Value>,
) -> GatewayNotification {
    GatewayNotification {
        order: NotifiedOrder {
            invoice_number: invoice.to_string(),
            amount,
        },
        transaction: NotifiedTransaction {
            status: status.to_string(),
        },
    }
}

/// Scripted payment gateway.
#[derive(Default)]
pub struct FakeGateway {
    created: Mutex<Vec<GatewayOrderRequest>>,
    fail_create: AtomicBool,
    fail_query: AtomicBool,
    live_status: Mutex<Option<GatewayStatus>>,
    latency: Mutex<Duration>,
}

impl FakeGateway {
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_query(&self, fail: bool) {
        self.fail_query.store(fail, Ordering::SeqCst);
    }

    pub fn report(&self, status: GatewayStatus) {
        *self.live_status.lock().unwrap() = Some(status);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn created(&self) -> Vec<GatewayOrderRequest> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(
        &self,
        request: &GatewayOrderRequest,
    ) -> Result<GatewayOrder, GatewayError> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        self.created.lock().unwrap().push(request.clone());
        Ok(GatewayOrder {
            invoice_number: request.order_id.clone(),
            payment_url: Some(format!("https://pay.example/{}", request.order_id)),
            payment_code: None,
            qr_payload: None,
        })
    }

    async fn query_status(&self, _invoice_number: &str) -> Result<GatewayStatus, GatewayError> {
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("connection reset".to_string()));
        }
        Ok(self
            .live_status
            .lock()
            .unwrap()
            .unwrap_or(GatewayStatus::Pending))
    }
}

/// Notifier that counts deliveries.
#[derive(Default)]
pub struct CountingNotifier {
    sent: Mutex<Vec<String>>,
    fail: AtomicBool,
    attempts: AtomicUsize,
}

impl CountingNotifier {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn payment_succeeded(&self, order: &Order) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("smtp unavailable");
        }
        self.sent.lock().unwrap().push(order.order_id.clone());
        Ok(())
    }
}

/// Checkout and reconciler wired to an in-memory store at a fixed instant.
pub struct Harness {
    pub store: MemoryStore,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<CountingNotifier>,
    pub clock: FixedClock,
    pub checkout: Arc<Checkout>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new(clock: FixedClock) -> Self {
        Self::wire(
            MemoryStore::new(),
            Arc::new(FakeGateway::default()),
            Arc::new(CountingNotifier::default()),
            clock,
        )
    }

    /// The same store and collaborators, seen at another instant.
    pub fn at(&self, clock: FixedClock) -> Self {
        Self::wire(
            self.store.clone(),
            self.gateway.clone(),
            self.notifier.clone(),
            clock,
        )
    }

    fn wire(
        store: MemoryStore,
        gateway: Arc<FakeGateway>,
        notifier: Arc<CountingNotifier>,
        clock: FixedClock,
    ) -> Self {
        let shared_clock: Arc<dyn Clock> = Arc::new(clock);
        let checkout = Checkout::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            gateway.clone(),
            shared_clock.clone(),
            CheckoutPolicy::default(),
        );
        let reconciler = Reconciler::new(
            Arc::new(store.clone()),
            gateway.clone(),
            notifier.clone(),
            shared_clock,
        );
        Self {
            store,
            gateway,
            notifier,
            clock,
            checkout: Arc::new(checkout),
            reconciler: Arc::new(reconciler),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn state(&self) -> AppState {
        AppState {
            checkout: self.checkout.clone(),
            reconciler: self.reconciler.clone(),
            notification_verifier: None,
            sweep_token: Some(SWEEP_TOKEN.to_string()),
        }
    }

    pub async fn order(&self, order_id: &str) -> Order {
        self.store
            .orders()
            .await
            .into_iter()
            .find(|o| o.order_id == order_id)
            .unwrap()
    }
}
