mod common;

use chrono::Duration as Span;
use tokio_test::{assert_err, assert_ok};

use common::{
    Harness, event, game, later, noon, notification, notification_for_amount, plain_day, user,
};
use game_checkout::channels::PaymentMethod;
use game_checkout::checkout::SubmittedPayment;
use game_checkout::error::CheckoutError;
use game_checkout::gateway::GatewayStatus;
use game_checkout::types::OrderStatus;

async fn with_open_order() -> (Harness, SubmittedPayment) {
    let h = Harness::new(noon(plain_day()));
    h.store.add_game(game(1, "galaxy-raiders", 100_000, "Pro Tier")).await;
    h.store.add_event(event("Anniversary Week")).await;
    let payment = assert_ok!(
        h.checkout
            .submit("galaxy-raiders", &user(1), PaymentMethod::Qris)
            .await
    );
    (h, payment)
}

#[tokio::test]
async fn repeated_success_notification_notifies_once() {
    let (h, payment) = with_open_order().await;
    let paid_at = later(&h.clock, Span::minutes(3));
    let h = h.at(paid_at);

    let first = assert_ok!(
        h.reconciler
            .handle_callback(&notification(&payment.order_id, "SUCCESS"))
            .await
    );
    assert_eq!(first.status, OrderStatus::Success);
    assert!(first.changed);

    let again = assert_ok!(
        h.reconciler
            .handle_callback(&notification(&payment.order_id, "success"))
            .await
    );
    assert_eq!(again.status, OrderStatus::Success);
    assert!(!again.changed);

    assert_eq!(h.notifier.sent(), vec![payment.order_id.clone()]);
    let order = h.order(&payment.order_id).await;
    assert_eq!(order.paid_at, Some(h.now()));
}

#[tokio::test]
async fn settled_orders_never_move_back() {
    let (h, payment) = with_open_order().await;

    let failed = assert_ok!(
        h.reconciler
            .handle_callback(&notification(&payment.order_id, "FAILED"))
            .await
    );
    assert_eq!(failed.status, OrderStatus::Failed);

    let late = assert_ok!(
        h.reconciler
            .handle_callback(&notification(&payment.order_id, "SUCCESS"))
            .await
    );
    assert_eq!(late.status, OrderStatus::Failed);
    assert!(!late.changed);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn pending_notification_changes_nothing() {
    let (h, payment) = with_open_order().await;

    let outcome = assert_ok!(
        h.reconciler
            .handle_callback(&notification(&payment.order_id, "PENDING"))
            .await
    );
    assert_eq!(outcome.status, OrderStatus::Waiting);
    assert!(!outcome.changed);
}

#[tokio::test]
async fn malformed_notifications_are_rejected() {
    let (h, payment) = with_open_order().await;

    let err = assert_err!(
        h.reconciler
            .handle_callback(&notification(&payment.order_id, "REFUNDED"))
            .await
    );
    assert!(matches!(err, CheckoutError::Validation(_)));

    let err = assert_err!(
        h.reconciler
            .handle_callback(&notification("ORDER-0-0", "SUCCESS"))
            .await
    );
    assert!(matches!(err, CheckoutError::NotFound("order")));
}

#[tokio::test]
async fn notified_amount_must_match_the_order() {
    let (h, payment) = with_open_order().await;
    assert_eq!(payment.amount, 1_000);

    let err = assert_err!(
        h.reconciler
            .handle_callback(&notification_for_amount(
                &payment.order_id,
                "SUCCESS",
                Some(serde_json::json!(100_000)),
            ))
            .await
    );
    assert!(matches!(err, CheckoutError::Validation(_)));
    assert_eq!(h.order(&payment.order_id).await.status, OrderStatus::Waiting);
    assert!(h.notifier.sent().is_empty());

    let outcome = assert_ok!(
        h.reconciler
            .handle_callback(&notification_for_amount(
                &payment.order_id,
                "SUCCESS",
                Some(serde_json::json!("1000")),
            ))
            .await
    );
    assert_eq!(outcome.status, OrderStatus::Success);
}

#[tokio::test]
async fn notifier_failure_still_records_payment() {
    let (h, payment) = with_open_order().await;
    h.notifier.fail(true);

    let outcome = assert_ok!(
        h.reconciler
            .handle_callback(&notification(&payment.order_id, "SUCCESS"))
            .await
    );
    assert_eq!(outcome.status, OrderStatus::Success);
    assert_eq!(h.notifier.attempts(), 1);
    assert_eq!(h.order(&payment.order_id).await.status, OrderStatus::Success);
}

#[tokio::test]
async fn polling_settles_a_paid_order() {
    let (h, payment) = with_open_order().await;

    let status = assert_ok!(h.reconciler.order_status(&payment.order_id, &user(1)).await);
    assert_eq!(status, OrderStatus::Waiting);

    h.gateway.report(GatewayStatus::Success);
    let status = assert_ok!(h.reconciler.order_status(&payment.order_id, &user(1)).await);
    assert_eq!(status, OrderStatus::Success);
    let status = assert_ok!(h.reconciler.order_status(&payment.order_id, &user(1)).await);
    assert_eq!(status, OrderStatus::Success);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn polling_falls_back_to_stored_status() {
    let (h, payment) = with_open_order().await;
    h.gateway.fail_query(true);

    let status = assert_ok!(h.reconciler.order_status(&payment.order_id, &user(1)).await);
    assert_eq!(status, OrderStatus::Waiting);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn polling_does_not_settle_failures() {
    let (h, payment) = with_open_order().await;
    h.gateway.report(GatewayStatus::Failed);

    let status = assert_ok!(h.reconciler.order_status(&payment.order_id, &user(1)).await);
    assert_eq!(status, OrderStatus::Waiting);
}

#[tokio::test]
async fn orders_are_private_to_their_buyer() {
    let (h, payment) = with_open_order().await;

    let err = assert_err!(h.reconciler.order_status(&payment.order_id, &user(2)).await);
    assert!(matches!(err, CheckoutError::Unauthorized));
    let err = assert_err!(h.reconciler.order_status("ORDER-0-0", &user(1)).await);
    assert!(matches!(err, CheckoutError::NotFound("order")));
}

#[tokio::test]
async fn sweep_leaves_paid_orders_alone() {
    let (h, payment) = with_open_order().await;
    assert_ok!(
        h.reconciler
            .handle_callback(&notification(&payment.order_id, "SUCCESS"))
            .await
    );

    let tomorrow = h.at(later(&h.clock, Span::days(2)));
    assert_eq!(assert_ok!(tomorrow.reconciler.sweep_expired().await), 0);
    assert_eq!(h.order(&payment.order_id).await.status, OrderStatus::Success);

    // A late expiry notice for a paid order is ignored too.
    let outcome = assert_ok!(
        tomorrow
            .reconciler
            .handle_callback(&notification(&payment.order_id, "EXPIRED"))
            .await
    );
    assert_eq!(outcome.status, OrderStatus::Success);
    assert!(!outcome.changed);
}
