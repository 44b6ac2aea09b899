//! Invoice lifecycle: creation, finalization, update, cancellation.

mod common;

use billing_engine::models::{InvoiceStatus, PaymentMethod, UpdateInvoiceFields};
use billing_engine::AppError;
use chrono::{Duration, Utc};
use common::{invoice_request, issued_invoice, setup, standard_charge};
use rust_decimal::Decimal;

#[tokio::test]
async fn create_invoice_prices_and_snapshots_customer() {
    let engine = setup().await;

    let invoice = engine
        .ledger
        .create_invoice(
            invoice_request(engine.customer_id),
            standard_charge(engine.customer_id, 1500),
        )
        .await
        .expect("create invoice");

    assert_eq!(invoice.status(), InvoiceStatus::Draft);
    assert_eq!(invoice.subtotal, Decimal::new(2500, 2));
    assert_eq!(invoice.discount, Decimal::new(250, 2));
    assert_eq!(invoice.tax, Decimal::new(191, 2));
    assert_eq!(invoice.total, Decimal::new(2441, 2));
    assert_eq!(invoice.currency, "USD");
    assert_eq!(invoice.version, 1);
    assert_eq!(invoice.created_by, "tester");
    // Nobody has touched the invoice since creation.
    assert!(invoice.updated_by.is_none());

    // Snapshot filled from the directory, not left empty.
    assert_eq!(invoice.customer_name, "Acme Logistics");
    assert_eq!(
        invoice.customer_email.as_deref(),
        Some("billing@acme.example")
    );
    assert_eq!(invoice.billing_city.as_deref(), Some("Mumbai"));

    let trail = engine
        .audit
        .trail(&invoice.invoice_number)
        .await
        .expect("audit trail");
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "invoice_created");
    assert_eq!(trail[0].performed_by, "tester");
}

#[tokio::test]
async fn create_invoice_rejects_unknown_customer_without_name() {
    let engine = setup().await;

    let mut req = invoice_request(uuid::Uuid::new_v4());
    req.customer_name = None;
    let err = engine
        .ledger
        .create_invoice(req, standard_charge(engine.customer_id, 100))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn finalize_moves_draft_to_sent_exactly_once() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;

    assert_eq!(invoice.status(), InvoiceStatus::Sent);
    assert!(invoice.sent_utc.is_some());
    assert_eq!(invoice.version, 2);
    assert_eq!(invoice.updated_by.as_deref(), Some("tester"));

    // Second finalize is an invalid-state error, not a no-op.
    let err = engine
        .ledger
        .finalize_invoice(&invoice.invoice_number, "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let events = engine.notifier.event_names().await;
    assert_eq!(events, vec!["invoice.sent".to_string()]);
}

#[tokio::test]
async fn update_allows_descriptive_fields_while_draft_or_sent() {
    let engine = setup().await;
    let draft = engine
        .ledger
        .create_invoice(
            invoice_request(engine.customer_id),
            standard_charge(engine.customer_id, 1500),
        )
        .await
        .expect("create invoice");

    // Currency change is fine while draft.
    let updated = engine
        .ledger
        .update_invoice(
            &draft.invoice_number,
            UpdateInvoiceFields {
                currency: Some("eur".to_string()),
                description: Some("Amended".to_string()),
                ..Default::default()
            },
            "tester",
        )
        .await
        .expect("update draft");
    assert_eq!(updated.currency, "EUR");
    assert_eq!(updated.description.as_deref(), Some("Amended"));
    assert_eq!(updated.version, 2);

    engine
        .ledger
        .finalize_invoice(&draft.invoice_number, "tester")
        .await
        .expect("finalize");

    // Descriptive fields still editable once sent.
    let updated = engine
        .ledger
        .update_invoice(
            &draft.invoice_number,
            UpdateInvoiceFields {
                due_date: Some(Utc::now().date_naive() + Duration::days(30)),
                ..Default::default()
            },
            "tester",
        )
        .await
        .expect("update sent");
    assert_eq!(updated.status(), InvoiceStatus::Sent);

    // Currency is descriptive and stays editable while sent; the amounts
    // themselves never reprice.
    let updated = engine
        .ledger
        .update_invoice(
            &draft.invoice_number,
            UpdateInvoiceFields {
                currency: Some("GBP".to_string()),
                ..Default::default()
            },
            "tester",
        )
        .await
        .expect("update currency on sent");
    assert_eq!(updated.currency, "GBP");
    assert_eq!(updated.total, draft.total);
}

#[tokio::test]
async fn cancel_allowed_from_draft_and_sent_only_once() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;

    let cancelled = engine
        .ledger
        .cancel_invoice(&invoice.invoice_number, "customer withdrew order", "tester")
        .await
        .expect("cancel");
    assert_eq!(cancelled.status(), InvoiceStatus::Cancelled);
    assert!(cancelled.cancelled_utc.is_some());

    // Repeated cancel fails loudly.
    let err = engine
        .ledger
        .cancel_invoice(&invoice.invoice_number, "again", "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn overdue_listing_returns_past_due_open_invoices() {
    let engine = setup().await;

    let mut req = invoice_request(engine.customer_id);
    req.due_date = Utc::now().date_naive() - Duration::days(3);
    let invoice = engine
        .ledger
        .create_invoice(req, standard_charge(engine.customer_id, 1500))
        .await
        .expect("create");

    // Draft invoices are never overdue.
    let overdue = engine
        .ledger
        .get_overdue_invoices(Utc::now().date_naive())
        .await
        .expect("overdue");
    assert!(overdue.is_empty());

    engine
        .ledger
        .finalize_invoice(&invoice.invoice_number, "tester")
        .await
        .expect("finalize");

    let overdue = engine
        .ledger
        .get_overdue_invoices(Utc::now().date_naive())
        .await
        .expect("overdue");
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].invoice_number, invoice.invoice_number);
}

#[tokio::test]
async fn paid_invoice_rejects_cancellation_and_updates() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;
    engine
        .payments
        .record_manual_payment(
            &invoice.invoice_number,
            invoice.total,
            "USD",
            PaymentMethod::Manual,
            None,
            "tester",
        )
        .await
        .expect("pay in full");

    let err = engine
        .ledger
        .cancel_invoice(&invoice.invoice_number, "too late", "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let err = engine
        .ledger
        .update_invoice(
            &invoice.invoice_number,
            UpdateInvoiceFields {
                description: Some("after the fact".to_string()),
                ..Default::default()
            },
            "tester",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let reloaded = engine
        .ledger
        .get_invoice(&invoice.invoice_number)
        .await
        .expect("reload");
    assert_eq!(reloaded.status(), InvoiceStatus::Paid);
}

#[tokio::test]
async fn partially_paid_invoice_rejects_cancellation() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;
    engine
        .payments
        .record_manual_payment(
            &invoice.invoice_number,
            Decimal::new(1000, 2),
            "USD",
            PaymentMethod::Manual,
            None,
            "tester",
        )
        .await
        .expect("pay part");

    let err = engine
        .ledger
        .cancel_invoice(&invoice.invoice_number, "money already applied", "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let reloaded = engine
        .ledger
        .get_invoice(&invoice.invoice_number)
        .await
        .expect("reload");
    assert_eq!(reloaded.status(), InvoiceStatus::PartiallyPaid);
}

#[tokio::test]
async fn cancelled_invoice_rejects_updates() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;
    engine
        .ledger
        .cancel_invoice(&invoice.invoice_number, "customer withdrew order", "tester")
        .await
        .expect("cancel");

    let err = engine
        .ledger
        .update_invoice(
            &invoice.invoice_number,
            UpdateInvoiceFields {
                description: Some("post-mortem edit".to_string()),
                ..Default::default()
            },
            "tester",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}
