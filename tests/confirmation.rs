//! Payment confirmation: idempotency, expiry checks, cancellation, races.

use std::sync::Arc;

use rust_decimal_macros::dec;

mod common;
use common::*;

async fn card_order(app: &TestApp) -> (Order, String) {
    let product = app.create_product("ebook", "Ebook", dec!(100.00));
    let result = app
        .checkout
        .checkout(request(cart_with(&product, 1), PaymentMethod::Card, None))
        .await
        .unwrap();
    let session_id = result.order.payment_ref.clone().unwrap();
    (result.order, session_id)
}

#[tokio::test]
async fn test_double_card_confirmation_applies_once() {
    let app = TestApp::new();
    let (order, session_id) = card_order(&app).await;

    let first = confirm_card_payment(app.repo.as_ref(), &session_id).unwrap();
    let ConfirmOutcome::Confirmed(confirmed) = first else {
        panic!("first confirmation should win");
    };
    assert_eq!(confirmed.id, order.id);
    assert_eq!(confirmed.status, OrderStatus::Completed);
    assert_eq!(confirmed.payment_status, PaymentStatus::Confirmed);
    assert_eq!(confirmed.confirmation_ref.as_deref(), Some(session_id.as_str()));

    let second = confirm_card_payment(app.repo.as_ref(), &session_id).unwrap();
    let ConfirmOutcome::AlreadyConfirmed(again) = second else {
        panic!("replay should report already confirmed");
    };
    assert_eq!(again.updated_at, confirmed.updated_at);
    assert_eq!(again.totals, confirmed.totals);
}

#[tokio::test]
async fn test_unknown_session_is_order_not_found() {
    let app = TestApp::new();
    let err = confirm_card_payment(app.repo.as_ref(), "cs_missing").unwrap_err();
    assert!(matches!(err, CheckoutError::OrderNotFound));
}

#[tokio::test]
async fn test_cancel_never_touches_confirmed_orders() {
    let app = TestApp::new();
    let (order, session_id) = card_order(&app).await;
    confirm_card_payment(app.repo.as_ref(), &session_id).unwrap();

    assert!(!cancel_pending_order(app.repo.as_ref(), &order.id, None).unwrap());
    let stored = app.repo.get_order(&order.id).unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Completed);
}

#[tokio::test]
async fn test_cancelled_order_cannot_be_confirmed() {
    let app = TestApp::new();
    let (order, session_id) = card_order(&app).await;

    assert!(cancel_pending_order(app.repo.as_ref(), &order.id, None).unwrap());
    let stored = app.repo.get_order(&order.id).unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);
    assert_eq!(stored.payment_status, PaymentStatus::Failed);

    let outcome = confirm_card_payment(app.repo.as_ref(), &session_id).unwrap();
    assert!(matches!(outcome, ConfirmOutcome::NotPending(o) if o.status == OrderStatus::Cancelled));
}

#[test]
fn test_crypto_confirmation_after_expiry_cancels_order() {
    let app_pool = memory_pool();
    let repo = SqliteRepository::new(app_pool);
    let (order, intent) = seed_crypto_order(&repo, dec!(0.00069341), 0, 900);

    let err = confirm_crypto_payment(&repo, &order.id, &intent, "tx1", dec!(0.00069341), 901).unwrap_err();
    assert!(matches!(err, CheckoutError::IntentExpired));

    let stored = repo.get_order(&order.id).unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);
    assert_eq!(stored.payment_status, PaymentStatus::Failed);

    let stored_intent = repo.get_intent(&intent.id).unwrap().unwrap();
    assert_eq!(stored_intent.state, IntentState::Expired);
    assert_eq!(stored_intent.txid, None);
}

#[test]
fn test_crypto_confirmation_exactly_at_expiry_is_expired() {
    let repo = SqliteRepository::new(memory_pool());
    let (order, intent) = seed_crypto_order(&repo, dec!(0.00069341), 0, 900);

    let err = confirm_crypto_payment(&repo, &order.id, &intent, "tx1", dec!(0.00069341), 900).unwrap_err();
    assert!(matches!(err, CheckoutError::IntentExpired));
}

#[test]
fn test_crypto_confirmation_before_expiry_records_settlement() {
    let repo = SqliteRepository::new(memory_pool());
    let (order, intent) = seed_crypto_order(&repo, dec!(0.00069341), 0, 900);

    let outcome = confirm_crypto_payment(&repo, &order.id, &intent, "tx1", dec!(0.0007), 899).unwrap();
    let ConfirmOutcome::Confirmed(confirmed) = outcome else {
        panic!("expected confirmation");
    };
    assert_eq!(confirmed.status, OrderStatus::Completed);
    assert_eq!(confirmed.confirmation_ref.as_deref(), Some("tx1"));

    let stored_intent = repo.get_intent(&intent.id).unwrap().unwrap();
    assert_eq!(stored_intent.state, IntentState::Confirmed);
    assert_eq!(stored_intent.txid.as_deref(), Some("tx1"));
    assert_eq!(stored_intent.received_amount, Some(dec!(0.0007)));

    // Replay after expiry still reports the earlier confirmation
    let replay = confirm_crypto_payment(&repo, &order.id, &intent, "tx1", dec!(0.0007), 5_000).unwrap();
    assert!(matches!(replay, ConfirmOutcome::AlreadyConfirmed(_)));
}

#[test]
fn test_txid_settles_at_most_one_intent() {
    let repo = SqliteRepository::new(memory_pool());
    let (first, first_intent) = seed_crypto_order(&repo, dec!(0.001), 0, 900);
    let (second, second_intent) = seed_crypto_order(&repo, dec!(0.001), 0, 900);

    confirm_crypto_payment(&repo, &first.id, &first_intent, "shared", dec!(0.001), 10).unwrap();
    let err = confirm_crypto_payment(&repo, &second.id, &second_intent, "shared", dec!(0.001), 10)
        .unwrap_err();
    assert!(matches!(err, CheckoutError::PersistenceError(_)));

    // The failed settlement rolled back the order transition too
    let stored = repo.get_order(&second.id).unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
    assert!(repo.claimed_txids(CryptoCurrency::Btc).unwrap().contains("shared"));
}

#[tokio::test]
async fn test_concurrent_confirmations_apply_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let app = TestApp::build(file_pool(&dir), FakeGateway::default(), dec!(0.08));
    let (order, session_id) = card_order(&app).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let repo = Arc::clone(&app.repo);
        let session_id = session_id.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            confirm_card_payment(repo.as_ref(), &session_id).unwrap()
        }));
    }

    let mut confirmed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ConfirmOutcome::Confirmed(_) => confirmed += 1,
            ConfirmOutcome::AlreadyConfirmed(o) => assert_eq!(o.status, OrderStatus::Completed),
            ConfirmOutcome::NotPending(o) => panic!("unexpected state {:?}", o.status),
        }
    }
    assert_eq!(confirmed, 1);

    let stored = app.repo.get_order(&order.id).unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Confirmed);
}
