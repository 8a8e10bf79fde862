//! SQLite repository behaviour.

use rust_decimal_macros::dec;

mod common;
use common::*;

fn new_order(number: &str, payment_ref: Option<&str>) -> NewOrder {
    let mut options = OptionSelection::new();
    options.insert("License".into(), "Extended".into());
    NewOrder {
        order_number: number.into(),
        lines: vec![
            OrderLine {
                product_id: "p1".into(),
                name: "Icon Pack".into(),
                quantity: 2,
                unit_price: dec!(29.99),
                line_total: dec!(59.98),
                options,
            },
            OrderLine {
                product_id: "p2".into(),
                name: "Ebook".into(),
                quantity: 1,
                unit_price: dec!(10.00),
                line_total: dec!(10.00),
                options: OptionSelection::new(),
            },
        ],
        totals: Totals {
            subtotal: dec!(69.98),
            discount: dec!(7.00),
            tax: dec!(5.04),
            total: dec!(68.02),
        },
        coupon_code: Some("SAVE10".into()),
        payment_method: PaymentMethod::Card,
        customer_email: "jane@example.com".into(),
        customer_name: Some("Jane".into()),
        payment_ref: payment_ref.map(String::from),
    }
}

#[test]
fn test_order_round_trip_keeps_lines_and_totals() {
    let repo = SqliteRepository::new(memory_pool());
    let created = repo.create_order(&new_order("ORD-1-AAAA", Some("cs_1"))).unwrap();

    let stored = repo.get_order_by_number("ORD-1-AAAA").unwrap().unwrap();
    assert_eq!(stored.id, created.id);
    assert_eq!(stored.totals, created.totals);
    assert_eq!(stored.totals.total, stored.totals.subtotal - stored.totals.discount + stored.totals.tax);
    assert_eq!(stored.lines.len(), 2);
    assert_eq!(stored.lines[0].name, "Icon Pack");
    assert_eq!(stored.lines[0].options.get("License").map(String::as_str), Some("Extended"));
    assert!(stored.lines[1].options.is_empty());
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(stored.payment_method, PaymentMethod::Card);

    let by_ref = repo.get_order_by_payment_ref("cs_1").unwrap().unwrap();
    assert_eq!(by_ref.id, created.id);
}

#[test]
fn test_duplicate_order_number_rejected() {
    let repo = SqliteRepository::new(memory_pool());
    repo.create_order(&new_order("ORD-1-AAAA", None)).unwrap();
    let err = repo.create_order(&new_order("ORD-1-AAAA", None)).unwrap_err();
    assert!(matches!(err, CheckoutError::PersistenceError(_)));
}

#[test]
fn test_order_and_intent_are_written_together() {
    let pool = memory_pool();
    let repo = SqliteRepository::new(pool.clone());
    let (_, intent) = seed_crypto_order(&repo, dec!(0.001), 0, 900);

    // Reusing the intent id makes the intent insert fail; the order must not survive it
    let mut order = new_order("ORD-2-BBBB", Some(&intent.id));
    order.payment_method = PaymentMethod::Bitcoin;
    let err = repo.create_order_with_intent(&order, &intent).unwrap_err();
    assert!(matches!(err, CheckoutError::PersistenceError(_)));
    assert!(repo.get_order_by_number("ORD-2-BBBB").unwrap().is_none());
    assert_eq!(count_orders(&pool), 1);
}

#[test]
fn test_open_intents_exclude_settled_ones() {
    let repo = SqliteRepository::new(memory_pool());
    let (paid, paid_intent) = seed_crypto_order(&repo, dec!(0.001), 0, 900);
    let (open, _) = seed_crypto_order(&repo, dec!(0.002), 0, 900);
    confirm_crypto_payment(&repo, &paid.id, &paid_intent, "tx1", dec!(0.001), 10).unwrap();

    let listed = repo.list_open_intents().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, open.id);

    repo.mark_intent_verifying(&listed[0].1.id).unwrap();
    let reloaded = repo.get_intent(&listed[0].1.id).unwrap().unwrap();
    assert_eq!(reloaded.state, IntentState::Verifying);
    assert_eq!(repo.list_open_intents().unwrap().len(), 1);
}

#[test]
fn test_webhook_events_recorded_once() {
    let repo = SqliteRepository::new(memory_pool());
    assert!(!repo.webhook_event_seen("stripe", "evt_1").unwrap());
    assert!(repo.record_webhook_event("stripe", "evt_1").unwrap());
    assert!(!repo.record_webhook_event("stripe", "evt_1").unwrap());
    assert!(repo.webhook_event_seen("stripe", "evt_1").unwrap());
    // Same id from another provider is a different event
    assert!(repo.record_webhook_event("other", "evt_1").unwrap());
}

#[test]
fn test_products_with_options() {
    let repo = SqliteRepository::new(memory_pool());
    let product = repo
        .create_product(&CreateProduct {
            slug: "icons".into(),
            name: "Icon Pack".into(),
            description: Some("500 icons".into()),
            price: dec!(19.99),
            variants: vec![CreateProductVariant {
                name: "License".into(),
                value: "Extended".into(),
                price_adjust: dec!(10.00),
            }],
        })
        .unwrap();

    let stored = repo.get_product_by_slug("icons").unwrap().unwrap();
    assert_eq!(stored.id, product.id);
    assert_eq!(stored.variants.len(), 1);

    let mut options = OptionSelection::new();
    options.insert("License".into(), "Extended".into());
    assert_eq!(stored.unit_price(&options), Some(dec!(29.99)));

    assert_eq!(repo.list_products().unwrap().len(), 1);
}

#[test]
fn test_product_validation() {
    let repo = SqliteRepository::new(memory_pool());
    let input = |slug: &str, price| CreateProduct {
        slug: slug.into(),
        name: "Thing".into(),
        description: None,
        price,
        variants: vec![],
    };

    repo.create_product(&input("thing", dec!(5))).unwrap();
    assert!(repo.create_product(&input("thing", dec!(5))).is_err());
    assert!(repo.create_product(&input("negative", dec!(-1))).is_err());
}

fn paid_order(repo: &SqliteRepository, number: &str) -> Order {
    let session = format!("cs_{}", number);
    repo.create_order(&new_order(number, Some(&session))).unwrap();
    let ConfirmOutcome::Confirmed(order) = confirm_card_payment(repo, &session).unwrap() else {
        panic!("fresh order should confirm");
    };
    order
}

#[test]
fn test_list_orders_filters_newest_first() {
    let pool = memory_pool();
    let repo = SqliteRepository::new(pool.clone());
    repo.create_order(&new_order("ORD-1-AAAA", Some("cs_a"))).unwrap();
    paid_order(&repo, "ORD-2-BBBB");
    let (crypto, _) = seed_crypto_order(&repo, dec!(0.001), 0, 900);

    let conn = pool.get().unwrap();
    let all = queries::list_orders(&conn, &OrderFilter::default()).unwrap();
    let numbers: Vec<&str> = all.iter().map(|o| o.order_number.as_str()).collect();
    assert_eq!(numbers.len(), 3);
    assert_eq!(numbers[0], crypto.order_number);
    assert_eq!(numbers[2], "ORD-1-AAAA");
    assert_eq!(all[1].lines.len(), 2);

    let paid = queries::list_orders(
        &conn,
        &OrderFilter {
            payment_status: Some(PaymentStatus::Confirmed),
            ..OrderFilter::default()
        },
    )
    .unwrap();
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].order_number, "ORD-2-BBBB");

    let pending_card = queries::list_orders(
        &conn,
        &OrderFilter {
            status: Some(OrderStatus::Pending),
            payment_method: Some(PaymentMethod::Card),
            ..OrderFilter::default()
        },
    )
    .unwrap();
    assert_eq!(pending_card.len(), 1);
    assert_eq!(pending_card[0].order_number, "ORD-1-AAAA");

    let limited = queries::list_orders(
        &conn,
        &OrderFilter {
            limit: Some(2),
            ..OrderFilter::default()
        },
    )
    .unwrap();
    assert_eq!(limited.len(), 2);
}

#[test]
fn test_fulfilment_moves_paid_orders_forward_only() {
    let pool = memory_pool();
    let repo = SqliteRepository::new(pool.clone());
    let paid = paid_order(&repo, "ORD-1-AAAA");
    let unpaid = repo.create_order(&new_order("ORD-2-BBBB", Some("cs_b"))).unwrap();

    let conn = pool.get().unwrap();
    assert!(!queries::try_start_processing(&conn, &unpaid.id).unwrap());
    assert!(!queries::try_fulfil_order(&conn, &unpaid.id).unwrap());

    assert!(queries::try_start_processing(&conn, &paid.id).unwrap());
    assert!(!queries::try_start_processing(&conn, &paid.id).unwrap());
    assert!(queries::try_fulfil_order(&conn, &paid.id).unwrap());
    assert!(!queries::try_fulfil_order(&conn, &paid.id).unwrap());

    let stored = queries::get_order_by_id(&conn, &paid.id).unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Fulfilled);
    assert_eq!(stored.payment_status, PaymentStatus::Confirmed);
    assert!(stored.is_settled());

    let untouched = queries::get_order_by_id(&conn, &unpaid.id).unwrap().unwrap();
    assert_eq!(untouched.status, OrderStatus::Pending);
}

#[test]
fn test_fulfil_straight_from_completed() {
    let pool = memory_pool();
    let repo = SqliteRepository::new(pool.clone());
    let paid = paid_order(&repo, "ORD-1-AAAA");

    let conn = pool.get().unwrap();
    assert!(queries::try_fulfil_order(&conn, &paid.id).unwrap());
    // Processing only comes before delivery
    assert!(!queries::try_start_processing(&conn, &paid.id).unwrap());
}

#[test]
fn test_refund_only_applies_to_paid_orders() {
    let pool = memory_pool();
    let repo = SqliteRepository::new(pool.clone());
    let paid = paid_order(&repo, "ORD-1-AAAA");
    let pending = repo.create_order(&new_order("ORD-2-BBBB", Some("cs_b"))).unwrap();
    let cancelled = repo.create_order(&new_order("ORD-3-CCCC", Some("cs_c"))).unwrap();
    assert!(cancel_pending_order(&repo, &cancelled.id, None).unwrap());

    {
        let conn = pool.get().unwrap();
        assert!(!queries::try_refund_order(&conn, &pending.id).unwrap());
        assert!(!queries::try_refund_order(&conn, &cancelled.id).unwrap());
        assert!(queries::try_fulfil_order(&conn, &paid.id).unwrap());
        assert!(queries::try_refund_order(&conn, &paid.id).unwrap());
        assert!(!queries::try_refund_order(&conn, &paid.id).unwrap());
    }

    let refunded = repo.get_order(&paid.id).unwrap().unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);

    // A replayed payment confirmation must not resurrect it
    let replay = confirm_card_payment(&repo, "cs_ORD-1-AAAA").unwrap();
    assert!(matches!(replay, ConfirmOutcome::NotPending(o) if o.status == OrderStatus::Refunded));
}

#[test]
fn test_product_activation() {
    let pool = memory_pool();
    let repo = SqliteRepository::new(pool.clone());
    repo.create_product(&CreateProduct {
        slug: "icons".into(),
        name: "Icon Pack".into(),
        description: None,
        price: dec!(19.99),
        variants: vec![],
    })
    .unwrap();

    {
        let conn = pool.get().unwrap();
        assert!(queries::set_product_active(&conn, "icons", false).unwrap());
        assert!(!queries::set_product_active(&conn, "missing", false).unwrap());
        assert_eq!(queries::list_products(&conn, true).unwrap().len(), 1);
    }

    assert!(repo.list_products().unwrap().is_empty());
    assert!(!repo.get_product_by_slug("icons").unwrap().unwrap().active);

    {
        let conn = pool.get().unwrap();
        assert!(queries::set_product_active(&conn, "icons", true).unwrap());
    }
    assert_eq!(repo.list_products().unwrap().len(), 1);
}
