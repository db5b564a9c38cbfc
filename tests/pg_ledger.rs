//! Checkout against a real Postgres ledger. `#[sqlx::test]` creates a fresh
//! database per test from `DATABASE_URL` and applies `migrations/`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as Span;
use sqlx::PgPool;
use tokio_test::{assert_err, assert_ok};

use common::{FakeGateway, later, noon, plain_day, user};
use game_checkout::catalog::PgCatalog;
use game_checkout::channels::PaymentMethod;
use game_checkout::checkout::{Checkout, CheckoutPolicy};
use game_checkout::clock::{Clock, FixedClock};
use game_checkout::error::CheckoutError;
use game_checkout::ledger::{Ledger, PgLedger};
use game_checkout::types::{DiscountType, OrderStatus};

async fn seed(pool: &PgPool) {
    sqlx::query(
        r#"INSERT INTO games (id, slug, title, price, category) VALUES
            (1, 'galaxy-raiders', 'Galaxy Raiders', 100000, 'Pro Tier'),
            (2, 'arena-legends', 'Arena Legends', 240000, 'Pro Tier')"#,
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(r#"INSERT INTO events (title) VALUES ('Anniversary Week')"#)
        .execute(pool)
        .await
        .unwrap();
}

fn checkout(pool: &PgPool, gateway: Arc<FakeGateway>, clock: FixedClock) -> Arc<Checkout> {
    let clock: Arc<dyn Clock> = Arc::new(clock);
    Arc::new(Checkout::new(
        Arc::new(PgCatalog::new(pool.clone())),
        Arc::new(PgLedger::new(pool.clone())),
        gateway,
        clock,
        CheckoutPolicy::default(),
    ))
}

fn slow_gateway() -> Arc<FakeGateway> {
    let gateway = Arc::new(FakeGateway::default());
    gateway.set_latency(Duration::from_millis(20));
    gateway
}

async fn stored(pool: &PgPool) -> Vec<(String, String, i64)> {
    sqlx::query_as(r#"SELECT order_id, discount_type, amount FROM transactions ORDER BY order_id"#)
        .fetch_all(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_buyers_get_one_flash_sale(pool: PgPool) {
    seed(&pool).await;
    let gateway = slow_gateway();
    let checkout = checkout(&pool, gateway.clone(), noon(plain_day()));

    let mut handles = Vec::new();
    for id in 1..=12 {
        let checkout = Arc::clone(&checkout);
        handles.push(tokio::spawn(async move {
            checkout
                .submit("galaxy-raiders", &user(id), PaymentMethod::Qris)
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        let payment = assert_ok!(handle.await.unwrap());
        match payment.discount_type {
            DiscountType::FlashSale => winners += 1,
            DiscountType::Event => assert_eq!(payment.amount, 75_000),
            other => panic!("unexpected discount {other}"),
        }
    }
    assert_eq!(winners, 1);

    let rows = stored(&pool).await;
    assert_eq!(rows.len(), 12);
    assert_eq!(rows.iter().filter(|(_, t, _)| t == "flash_sale").count(), 1);
    assert_eq!(gateway.created().len(), 12);
}

#[sqlx::test(migrations = "./migrations")]
async fn buyer_racing_two_checkouts_gets_one_discount(pool: PgPool) {
    seed(&pool).await;
    let gateway = slow_gateway();
    let start = noon(plain_day());
    let first = checkout(&pool, gateway.clone(), start);
    let second = checkout(&pool, gateway.clone(), later(&start, Span::seconds(1)));

    let a = tokio::spawn(async move {
        first
            .submit("galaxy-raiders", &user(7), PaymentMethod::Qris)
            .await
    });
    let b = tokio::spawn(async move {
        second
            .submit("arena-legends", &user(7), PaymentMethod::Qris)
            .await
    });
    let a = assert_ok!(a.await.unwrap());
    let b = assert_ok!(b.await.unwrap());

    let (discounted, full) = if a.discount_type == DiscountType::None {
        (b, a)
    } else {
        (a, b)
    };
    assert_eq!(discounted.discount_type, DiscountType::FlashSale);
    assert_eq!(full.discount_type, DiscountType::None);
    assert_eq!(full.amount, full.original_price);

    // Every payment opened with the gateway is recorded at the same amount.
    let rows = stored(&pool).await;
    assert_eq!(rows.len(), 2);
    let mut opened: Vec<(String, i64)> = gateway
        .created()
        .into_iter()
        .map(|r| (r.order_id, r.amount))
        .collect();
    opened.sort();
    let recorded: Vec<(String, i64)> = rows.into_iter().map(|(id, _, amount)| (id, amount)).collect();
    assert_eq!(opened, recorded);
}

#[sqlx::test(migrations = "./migrations")]
async fn repeated_checkout_in_one_instant_opens_one_payment(pool: PgPool) {
    seed(&pool).await;
    let gateway = Arc::new(FakeGateway::default());
    let checkout = checkout(&pool, gateway.clone(), noon(plain_day()));

    assert_ok!(
        checkout
            .submit("galaxy-raiders", &user(3), PaymentMethod::Qris)
            .await
    );
    let err = assert_err!(
        checkout
            .submit("arena-legends", &user(3), PaymentMethod::Qris)
            .await
    );
    assert!(matches!(err, CheckoutError::DuplicateCheckout(_)));
    assert_eq!(gateway.created().len(), 1);
    assert_eq!(stored(&pool).await.len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn expiry_releases_the_slot_and_transitions_are_one_shot(pool: PgPool) {
    seed(&pool).await;
    let gateway = Arc::new(FakeGateway::default());
    let start = noon(plain_day());
    let winner = assert_ok!(
        checkout(&pool, gateway.clone(), start)
            .submit("galaxy-raiders", &user(1), PaymentMethod::Qris)
            .await
    );
    assert_eq!(winner.discount_type, DiscountType::FlashSale);

    let ledger = PgLedger::new(pool.clone());
    let after = later(&start, Span::minutes(20));
    assert_eq!(assert_ok!(ledger.expire_overdue(after.now()).await), 1);
    assert!(
        assert_ok!(
            ledger
                .transition(&winner.order_id, OrderStatus::Success, after.now())
                .await
        )
        .is_none()
    );

    let next = assert_ok!(
        checkout(&pool, gateway.clone(), after)
            .submit("galaxy-raiders", &user(2), PaymentMethod::Qris)
            .await
    );
    assert_eq!(next.discount_type, DiscountType::FlashSale);

    let paid = assert_ok!(
        ledger
            .transition(&next.order_id, OrderStatus::Success, after.now())
            .await
    );
    assert_eq!(paid.map(|o| o.paid_at), Some(Some(after.now())));
    assert!(
        assert_ok!(
            ledger
                .transition(&next.order_id, OrderStatus::Success, after.now())
                .await
        )
        .is_none()
    );
}
