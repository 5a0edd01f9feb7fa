//! Integration tests for the payment → dispatch → tracking pipeline.

use std::sync::Arc;

use chrono::Utc;
use common::OrderId;
use domain::{
    CatalogProduct, Discount, FulfillmentStatus, Money, NotificationKind, Order, OrderComposition,
    OrderItem, PaymentStatus, ProductId,
};
use fulfillment::checkout::generate_order_number;
use fulfillment::payment::{CHECKOUT_COMPLETED, CHECKOUT_EXPIRED, sign};
use fulfillment::{
    AddressPolicy, FulfillmentError, InMemoryNotifier, InMemorySupplier, NotificationRelay,
    PaymentEventProcessor, PaymentOutcome, SupplierDispatcher, TrackingReconciler,
};
use order_store::{InMemoryOrderStore, OrderStore};
use serde_json::{Value, json};

const SECRET: &str = "whsec_integration";

struct TestHarness {
    store: InMemoryOrderStore,
    supplier: InMemorySupplier,
    notifier: InMemoryNotifier,
    processor: PaymentEventProcessor,
    dispatcher: Arc<SupplierDispatcher>,
    relay: Arc<NotificationRelay>,
    reconciler: TrackingReconciler,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_policy(AddressPolicy::Placeholder).await
    }

    async fn with_policy(policy: AddressPolicy) -> Self {
        let store = InMemoryOrderStore::new();
        let supplier = InMemorySupplier::new();
        let notifier = InMemoryNotifier::new();

        store
            .seed_product(
                CatalogProduct::physical("MUG", "Mug", Money::from_cents(1500))
                    .with_weight(400)
                    .with_supplier_variant("VID-MUG"),
            )
            .await;
        store
            .seed_product(CatalogProduct::physical(
                "HANDMADE",
                "Handmade Print",
                Money::from_cents(4000),
            ))
            .await;
        store
            .seed_product(CatalogProduct::digital(
                "EBOOK",
                "Ebook",
                Money::from_cents(1000),
                "files/ebook.pdf",
            ))
            .await;
        store
            .seed_discount(Discount {
                code: "SAVE10".to_string(),
                percent_off: 10,
                active: true,
                usage_count: 0,
                max_uses: None,
            })
            .await;

        let shared_store: Arc<dyn OrderStore> = Arc::new(store.clone());
        let relay = Arc::new(NotificationRelay::new(
            shared_store.clone(),
            Arc::new(notifier.clone()),
            "https://shop.example",
        ));
        let dispatcher = Arc::new(
            SupplierDispatcher::new(shared_store.clone(), Arc::new(supplier.clone()))
                .with_address_policy(policy),
        );
        let processor = PaymentEventProcessor::new(
            shared_store.clone(),
            dispatcher.clone(),
            relay.clone(),
            SECRET,
        );
        let reconciler =
            TrackingReconciler::new(shared_store, Arc::new(supplier.clone()), relay.clone());

        Self {
            store,
            supplier,
            notifier,
            processor,
            dispatcher,
            relay,
            reconciler,
        }
    }

    async fn create_order(&self, lines: &[(&str, u32)]) -> OrderId {
        let mut order = Order::new_pending(generate_order_number(), Utc::now());
        let ids: Vec<ProductId> = lines.iter().map(|(id, _)| ProductId::new(*id)).collect();
        let products = self.store.get_products(&ids).await.unwrap();
        let items: Vec<OrderItem> = lines
            .iter()
            .zip(products)
            .map(|((_, qty), p)| OrderItem::new(order.id, p.id, p.name, *qty, p.price))
            .collect();
        order.subtotal = items.iter().map(OrderItem::total_price).sum();
        order.total = order.subtotal;
        self.store.insert_order(&order, &items).await.unwrap();
        order.id
    }

    async fn order(&self, order_id: OrderId) -> Order {
        self.store.get_order(order_id).await.unwrap().unwrap()
    }

    async fn deliver(&self, event: &Value) -> Result<PaymentOutcome, FulfillmentError> {
        let payload = serde_json::to_vec(event).unwrap();
        let header = sign(&payload, SECRET, Utc::now().timestamp()).unwrap();
        self.processor.handle(&payload, &header).await
    }
}

fn full_address() -> Value {
    json!({
        "name": "Ada Lovelace",
        "phone": "555-0100",
        "address": {
            "line1": "1 Main St",
            "city": "Springfield",
            "state": "IL",
            "postal_code": "62701",
            "country": "US"
        }
    })
}

fn completed_event(order_id: OrderId, shipping: Option<Value>) -> Value {
    let mut session = json!({
        "id": "cs_test",
        "payment_intent": "pi_test",
        "customer_details": {"email": "buyer@example.com"},
        "metadata": {"order_id": order_id.to_string(), "is_all_digital": "false"}
    });
    if let Some(shipping) = shipping {
        session["shipping_details"] = shipping;
    }
    json!({"id": "evt_1", "type": CHECKOUT_COMPLETED, "data": {"object": session}})
}

fn summary(outcome: &PaymentOutcome) -> &fulfillment::payment::CompletionSummary {
    match outcome {
        PaymentOutcome::Completed(s) | PaymentOutcome::AlreadyApplied(s) => s,
        other => panic!("expected a completion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_paid_physical_order_is_dispatched_and_confirmed() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 2)]).await;

    let outcome = h
        .deliver(&completed_event(order_id, Some(full_address())))
        .await
        .unwrap();

    let completion = summary(&outcome);
    assert!(matches!(outcome, PaymentOutcome::Completed(_)));
    assert_eq!(completion.composition, OrderComposition::AllPhysical);
    assert!(completion.confirmation_sent);
    let dispatch = completion.dispatch.as_ref().unwrap();
    assert!(dispatch.success && !dispatch.skipped);

    let order = h.order(order_id).await;
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.fulfillment_status, FulfillmentStatus::Processing);
    assert_eq!(order.supplier_order_id.as_deref(), Some("SUP-0001"));
    assert_eq!(order.supplier_order_number.as_deref(), Some("SUPN-0001"));
    assert!(order.notes.is_none());
    assert!(order.email_sent_at.is_some());

    let placed = h.supplier.created_orders();
    assert_eq!(placed[0].shipping_customer_name, "Ada Lovelace");
    assert_eq!(placed[0].products[0].vid, "VID-MUG");
    assert_eq!(placed[0].products[0].quantity, 2);
}

#[tokio::test]
async fn test_replayed_completion_applies_once() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 1)]).await;
    let mut event = completed_event(order_id, Some(full_address()));
    event["data"]["object"]["metadata"]["discount_code"] = json!("SAVE10");

    h.deliver(&event).await.unwrap();
    let replay = h.deliver(&event).await.unwrap();

    assert!(matches!(replay, PaymentOutcome::AlreadyApplied(_)));
    assert_eq!(h.supplier.create_count(), 1);
    assert_eq!(h.notifier.confirmations().len(), 1);
    assert_eq!(h.store.outbox().await.len(), 1);
    let discount = h.store.get_discount("save10").await.unwrap().unwrap();
    assert_eq!(discount.usage_count, 1);
    assert_eq!(
        summary(&replay).dispatch.as_ref().unwrap().message,
        "already dispatched"
    );
}

#[tokio::test]
async fn test_replay_retries_failed_dispatch() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 1)]).await;
    let event = completed_event(order_id, Some(full_address()));

    h.supplier.set_fail_on_create(true);
    let first = h.deliver(&event).await.unwrap();
    assert!(!summary(&first).dispatch.as_ref().unwrap().success);
    assert!(
        h.order(order_id)
            .await
            .notes
            .unwrap()
            .starts_with("Supplier dispatch failed")
    );

    h.supplier.set_fail_on_create(false);
    let replay = h.deliver(&event).await.unwrap();

    assert!(summary(&replay).dispatch.as_ref().unwrap().success);
    let order = h.order(order_id).await;
    assert!(order.is_dispatched());
    assert!(order.notes.is_none());
}

#[tokio::test]
async fn test_all_digital_order_is_delivered_without_supplier() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("EBOOK", 1)]).await;
    let mut event = completed_event(order_id, None);
    event["data"]["object"]["metadata"]["is_all_digital"] = json!("true");

    let outcome = h.deliver(&event).await.unwrap();

    assert_eq!(summary(&outcome).composition, OrderComposition::AllDigital);
    assert!(summary(&outcome).dispatch.is_none());
    assert_eq!(h.supplier.create_count(), 0);
    assert_eq!(
        h.order(order_id).await.fulfillment_status,
        FulfillmentStatus::Delivered
    );

    let confirmation = &h.notifier.confirmations()[0];
    assert!(confirmation.shipping_address.is_none());
    assert_eq!(
        confirmation.download_links[0].url,
        format!("https://shop.example/downloads/{order_id}/EBOOK")
    );
}

#[tokio::test]
async fn test_catalog_overrides_wrong_digital_claim() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 1)]).await;
    let mut event = completed_event(order_id, Some(full_address()));
    event["data"]["object"]["metadata"]["is_all_digital"] = json!("true");

    let outcome = h.deliver(&event).await.unwrap();

    assert_eq!(summary(&outcome).composition, OrderComposition::AllPhysical);
    assert_eq!(h.supplier.create_count(), 1);
}

#[tokio::test]
async fn test_mixed_order_ships_physical_part_only() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 1), ("EBOOK", 1)]).await;

    let outcome = h
        .deliver(&completed_event(order_id, Some(full_address())))
        .await
        .unwrap();

    assert_eq!(summary(&outcome).composition, OrderComposition::Mixed);
    let order = h.order(order_id).await;
    assert!(order.digital_delivered_at.is_some());
    assert_eq!(order.fulfillment_status, FulfillmentStatus::Processing);
    let placed = h.supplier.created_orders();
    assert_eq!(placed[0].products.len(), 1);
    assert_eq!(placed[0].products[0].vid, "VID-MUG");
    assert_eq!(h.notifier.confirmations()[0].download_links.len(), 1);
}

#[tokio::test]
async fn test_order_without_fulfillable_items_needs_manual_handling() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("HANDMADE", 1)]).await;

    let outcome = h
        .deliver(&completed_event(order_id, Some(full_address())))
        .await
        .unwrap();

    let dispatch = summary(&outcome).dispatch.clone().unwrap();
    assert!(dispatch.success && dispatch.skipped);
    assert_eq!(h.supplier.create_count(), 0);
    let order = h.order(order_id).await;
    assert_eq!(
        order.notes.as_deref(),
        Some("Manual fulfillment required: Handmade Print")
    );
    assert_eq!(order.fulfillment_status, FulfillmentStatus::Processing);
}

#[tokio::test]
async fn test_partial_order_dispatches_fulfillable_subset() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 1), ("HANDMADE", 1)]).await;

    h.deliver(&completed_event(order_id, Some(full_address())))
        .await
        .unwrap();

    let placed = h.supplier.created_orders();
    assert_eq!(placed[0].products.len(), 1);
    let order = h.order(order_id).await;
    assert!(order.is_dispatched());
    assert_eq!(
        order.notes.as_deref(),
        Some("1 item(s) require manual fulfillment: Handmade Print")
    );
}

#[tokio::test]
async fn test_missing_address_fields_use_placeholders() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 1)]).await;
    let shipping = json!({
        "name": "Ada",
        "address": {"line1": "1 Main St", "city": "Lyon", "country": "FR"}
    });

    h.deliver(&completed_event(order_id, Some(shipping)))
        .await
        .unwrap();

    let placed = &h.supplier.created_orders()[0];
    assert_eq!(placed.shipping_phone, "0000000000");
    assert_eq!(placed.shipping_zip, "00000");
    assert_eq!(placed.shipping_country_code, "FR");
    assert_eq!(
        h.order(order_id).await.notes.as_deref(),
        Some("Address placeholders used: phone, province, postal_code")
    );
}

#[tokio::test]
async fn test_hold_policy_keeps_incomplete_address_for_review() {
    let h = TestHarness::with_policy(AddressPolicy::HoldForReview).await;
    let order_id = h.create_order(&[("MUG", 1)]).await;

    let outcome = h.deliver(&completed_event(order_id, None)).await.unwrap();

    let dispatch = summary(&outcome).dispatch.clone().unwrap();
    assert!(!dispatch.success);
    assert_eq!(h.supplier.create_count(), 0);
    let order = h.order(order_id).await;
    assert!(!order.is_dispatched());
    assert!(order.notes.unwrap().starts_with("Held for address review"));
}

#[tokio::test]
async fn test_email_failure_does_not_fail_payment() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 1)]).await;
    h.notifier.set_fail_on_send(true);

    let outcome = h
        .deliver(&completed_event(order_id, Some(full_address())))
        .await
        .unwrap();

    assert!(!summary(&outcome).confirmation_sent);
    let order = h.order(order_id).await;
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert!(order.is_dispatched());
    assert!(order.email_sent_at.is_none());
    assert_eq!(h.store.outbox().await[0].attempts, 1);

    h.notifier.set_fail_on_send(false);
    let report = h.relay.flush(10).await.unwrap();
    assert!(report.delivered(NotificationKind::OrderConfirmation));
    assert!(h.order(order_id).await.email_sent_at.is_some());
}

#[tokio::test]
async fn test_expiry_cancels_pending_order_only() {
    let h = TestHarness::new().await;
    let pending = h.create_order(&[("MUG", 1)]).await;
    let paid = h.create_order(&[("MUG", 1)]).await;
    h.deliver(&completed_event(paid, Some(full_address())))
        .await
        .unwrap();

    let expire = |order_id: OrderId| {
        json!({
            "type": CHECKOUT_EXPIRED,
            "data": {"object": {"metadata": {"order_id": order_id.to_string()}}}
        })
    };

    assert_eq!(
        h.deliver(&expire(pending)).await.unwrap(),
        PaymentOutcome::Expired { order_id: pending }
    );
    assert_eq!(
        h.deliver(&expire(paid)).await.unwrap(),
        PaymentOutcome::ExpiryIgnored { order_id: paid }
    );

    let cancelled = h.order(pending).await;
    assert_eq!(cancelled.payment_status, PaymentStatus::Expired);
    assert_eq!(cancelled.fulfillment_status, FulfillmentStatus::Cancelled);
    assert_eq!(h.order(paid).await.payment_status, PaymentStatus::Paid);

    // A late completion can't resurrect an expired order.
    let late = h
        .deliver(&completed_event(pending, Some(full_address())))
        .await
        .unwrap();
    assert!(matches!(late, PaymentOutcome::CompletionIgnored { .. }));
    assert_eq!(h.supplier.create_count(), 1);
}

#[tokio::test]
async fn test_invalid_signature_changes_nothing() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 1)]).await;
    let payload = serde_json::to_vec(&completed_event(order_id, None)).unwrap();
    let header = sign(&payload, "wrong-secret", Utc::now().timestamp()).unwrap();

    let result = h.processor.handle(&payload, &header).await;

    assert!(matches!(result, Err(FulfillmentError::InvalidSignature(_))));
    assert_eq!(
        h.order(order_id).await.payment_status,
        PaymentStatus::Pending
    );
    assert!(h.store.outbox().await.is_empty());
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let h = TestHarness::new().await;
    let result = h.deliver(&completed_event(OrderId::new(), None)).await;
    assert!(matches!(result, Err(FulfillmentError::OrderNotFound(_))));
}

#[tokio::test]
async fn test_concurrent_dispatch_places_one_supplier_order() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 1)]).await;
    h.supplier.set_fail_on_create(true);
    h.deliver(&completed_event(order_id, Some(full_address())))
        .await
        .unwrap();
    h.supplier.set_fail_on_create(false);

    let (a, b) = tokio::join!(
        h.dispatcher.dispatch(order_id),
        h.dispatcher.dispatch(order_id)
    );

    assert!(a.unwrap().success);
    assert!(b.unwrap().success);
    assert_eq!(h.supplier.create_count(), 1);
}

#[tokio::test]
async fn test_unrecorded_supplier_order_is_not_placed_again() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 1)]).await;
    h.supplier.set_fail_on_create(true);
    h.deliver(&completed_event(order_id, Some(full_address())))
        .await
        .unwrap();
    h.supplier.set_fail_on_create(false);
    h.store.set_fail_on_complete_dispatch(true).await;

    let result = h.dispatcher.dispatch(order_id).await;

    assert!(matches!(result, Err(FulfillmentError::Store(_))));
    assert_eq!(h.supplier.create_count(), 1);
    assert!(!h.order(order_id).await.is_dispatched());

    h.store.set_fail_on_complete_dispatch(false).await;
    let retry = h.dispatcher.dispatch(order_id).await.unwrap();

    assert!(retry.skipped);
    assert_eq!(h.supplier.create_count(), 1);
}

#[tokio::test]
async fn test_reconcile_isolates_failures_and_emails_once() {
    let h = TestHarness::new().await;
    let failing = h.create_order(&[("MUG", 1)]).await;
    let shipping = h.create_order(&[("MUG", 1)]).await;
    for order_id in [failing, shipping] {
        h.deliver(&completed_event(order_id, Some(full_address())))
            .await
            .unwrap();
    }
    let failing_number = h.order(failing).await.supplier_order_number.unwrap();
    let shipping_number = h.order(shipping).await.supplier_order_number.unwrap();
    h.supplier.fail_tracking_for(&failing_number);
    h.supplier.set_tracking(
        &shipping_number,
        json!({"trackingInfoList": [{"trackingNumber": "1Z999", "logisticName": "UPS",
                                     "trackingUrl": "https://track.example/1Z999"}]}),
    );

    let report = h.reconciler.run().await.unwrap();

    assert_eq!(report.checked, 2);
    assert_eq!(report.updated, 1);
    assert_eq!(report.emailed, 1);
    let failing_order_number = h.order(failing).await.order_number;
    let failed = report
        .results
        .iter()
        .find(|r| r.order_number == failing_order_number)
        .unwrap();
    assert!(failed.error.is_some());
    assert_eq!(failed.status, FulfillmentStatus::Processing);

    let shipped = h.order(shipping).await;
    assert_eq!(shipped.fulfillment_status, FulfillmentStatus::Shipped);
    assert_eq!(shipped.tracking_number.as_deref(), Some("1Z999"));
    assert_eq!(shipped.carrier.as_deref(), Some("UPS"));
    assert!(shipped.shipping_email_sent_at.is_some());

    let again = h.reconciler.run().await.unwrap();
    assert_eq!(again.emailed, 0);
    assert_eq!(h.notifier.shipping_updates().len(), 1);
}

#[tokio::test]
async fn test_reconcile_never_regresses_or_blanks_tracking() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 1)]).await;
    h.deliver(&completed_event(order_id, Some(full_address())))
        .await
        .unwrap();
    let number = h.order(order_id).await.supplier_order_number.unwrap();

    h.supplier.set_tracking(
        &number,
        json!([{"trackingNumber": "1Z1", "status": "In transit"}]),
    );
    h.reconciler.run().await.unwrap();

    h.supplier.set_tracking(&number, json!({}));
    let report = h.reconciler.run().await.unwrap();

    assert!(!report.results[0].updated);
    let order = h.order(order_id).await;
    assert_eq!(order.fulfillment_status, FulfillmentStatus::Shipped);
    assert_eq!(order.tracking_number.as_deref(), Some("1Z1"));
}

#[tokio::test]
async fn test_delivered_orders_leave_the_polling_set() {
    let h = TestHarness::new().await;
    let order_id = h.create_order(&[("MUG", 1)]).await;
    h.deliver(&completed_event(order_id, Some(full_address())))
        .await
        .unwrap();
    let number = h.order(order_id).await.supplier_order_number.unwrap();
    h.supplier.set_tracking(
        &number,
        json!({"trackingInfo": [{"trackNumber": "LX1", "deliveryStatus": "DELIVERED"}]}),
    );

    h.reconciler.run().await.unwrap();
    assert_eq!(
        h.order(order_id).await.fulfillment_status,
        FulfillmentStatus::Delivered
    );

    let calls = h.supplier.tracking_calls();
    let report = h.reconciler.run().await.unwrap();
    assert_eq!(report.checked, 0);
    assert_eq!(h.supplier.tracking_calls(), calls);
}
