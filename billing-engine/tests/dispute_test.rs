//! Dispute lifecycle and resolution outcomes.

mod common;

use billing_engine::models::{DisputeStatus, PaymentMethod};
use billing_engine::services::{DisputeParty, DisputeResolution};
use billing_engine::AppError;
use chrono::{Duration, Utc};
use common::{invoice_request, issued_invoice, setup, standard_charge};
use rust_decimal::Decimal;

#[tokio::test]
async fn dispute_opens_against_issued_invoices_only() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;

    let dispute = engine
        .disputes
        .open_dispute(
            &invoice.invoice_number,
            "charged for a lost parcel",
            engine.customer_id,
            "tester",
        )
        .await
        .expect("open");
    assert_eq!(dispute.status(), DisputeStatus::UnderReview);
    assert!(dispute.dispute_number.starts_with("DSP-"));
    assert!(dispute.due_date > Utc::now());

    // Draft invoices cannot be disputed.
    let draft = engine
        .ledger
        .create_invoice(
            invoice_request(engine.customer_id),
            standard_charge(engine.customer_id, 1500),
        )
        .await
        .expect("create draft");
    let err = engine
        .disputes
        .open_dispute(&draft.invoice_number, "reason", engine.customer_id, "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    // Unknown invoice.
    let err = engine
        .disputes
        .open_dispute("INV-MISSING", "reason", engine.customer_id, "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn response_request_moves_out_of_review_once() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;
    let dispute = engine
        .disputes
        .open_dispute(
            &invoice.invoice_number,
            "duplicate charge",
            engine.customer_id,
            "tester",
        )
        .await
        .expect("open");

    let dispute = engine
        .disputes
        .request_response(dispute.dispute_id, DisputeParty::Customer, "tester")
        .await
        .expect("request response");
    assert_eq!(dispute.status(), DisputeStatus::AwaitingCustomerResponse);

    let err = engine
        .disputes
        .request_response(dispute.dispute_id, DisputeParty::Internal, "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn merchant_favor_resolution_is_terminal() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;
    let dispute = engine
        .disputes
        .open_dispute(
            &invoice.invoice_number,
            "disagrees with duty",
            engine.customer_id,
            "tester",
        )
        .await
        .expect("open");

    let dispute = engine
        .disputes
        .resolve_dispute(
            dispute.dispute_id,
            DisputeResolution::MerchantFavor {
                note: "duty applied correctly".to_string(),
            },
            "reviewer",
        )
        .await
        .expect("resolve");
    assert_eq!(dispute.status(), DisputeStatus::ResolvedMerchantFavor);
    assert!(dispute.resolved_utc.is_some());

    let err = engine
        .disputes
        .resolve_dispute(
            dispute.dispute_id,
            DisputeResolution::Close {
                note: "again".to_string(),
            },
            "reviewer",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn customer_favor_credit_grows_the_balance() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;

    assert_eq!(
        engine
            .disputes
            .credit_balance(engine.customer_id)
            .await
            .expect("balance"),
        Decimal::ZERO
    );

    let dispute = engine
        .disputes
        .open_dispute(
            &invoice.invoice_number,
            "parcel damaged",
            engine.customer_id,
            "tester",
        )
        .await
        .expect("open");
    let dispute = engine
        .disputes
        .resolve_dispute(
            dispute.dispute_id,
            DisputeResolution::CustomerFavorCredit {
                amount: Decimal::new(500, 2),
                note: "goodwill credit".to_string(),
            },
            "reviewer",
        )
        .await
        .expect("resolve");
    assert_eq!(dispute.status(), DisputeStatus::ResolvedCustomerFavor);
    assert_eq!(dispute.resolution_amount, Some(Decimal::new(500, 2)));

    assert_eq!(
        engine
            .disputes
            .credit_balance(engine.customer_id)
            .await
            .expect("balance"),
        Decimal::new(500, 2)
    );

    // A second credit accumulates on the same balance.
    let second = engine
        .disputes
        .open_dispute(
            &invoice.invoice_number,
            "parcel late",
            engine.customer_id,
            "tester",
        )
        .await
        .expect("open second");
    engine
        .disputes
        .resolve_dispute(
            second.dispute_id,
            DisputeResolution::CustomerFavorCredit {
                amount: Decimal::new(250, 2),
                note: "late delivery credit".to_string(),
            },
            "reviewer",
        )
        .await
        .expect("resolve second");
    assert_eq!(
        engine
            .disputes
            .credit_balance(engine.customer_id)
            .await
            .expect("balance"),
        Decimal::new(750, 2)
    );

    let trail = engine
        .audit
        .trail(&dispute.dispute_number)
        .await
        .expect("trail");
    let actions: Vec<&str> = trail.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions,
        vec!["dispute_opened", "dispute_resolved_customer_favor"]
    );
}

#[tokio::test]
async fn customer_favor_refund_goes_through_the_payment_processor() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;
    let (_, payment) = engine
        .payments
        .record_manual_payment(
            &invoice.invoice_number,
            invoice.total,
            "USD",
            PaymentMethod::CreditCard,
            None,
            "tester",
        )
        .await
        .expect("pay");

    let dispute = engine
        .disputes
        .open_dispute(
            &invoice.invoice_number,
            "overcharged",
            engine.customer_id,
            "tester",
        )
        .await
        .expect("open");
    let dispute = engine
        .disputes
        .resolve_dispute(
            dispute.dispute_id,
            DisputeResolution::CustomerFavorRefund {
                payment_id: payment.payment_id,
                amount: Decimal::new(441, 2),
                note: "partial refund".to_string(),
            },
            "reviewer",
        )
        .await
        .expect("resolve");
    assert_eq!(dispute.status(), DisputeStatus::ResolvedCustomerFavor);

    let payments = engine
        .payments
        .list_payments(&invoice.invoice_number)
        .await
        .expect("list");
    let refund = payments
        .iter()
        .find(|p| p.is_refund())
        .expect("refund row exists");
    assert_eq!(refund.amount, Decimal::new(441, 2));
    assert_eq!(refund.original_payment_id, Some(payment.payment_id));
}

#[tokio::test]
async fn overdue_disputes_surface_for_review() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;
    let dispute = engine
        .disputes
        .open_dispute(
            &invoice.invoice_number,
            "no response yet",
            engine.customer_id,
            "tester",
        )
        .await
        .expect("open");

    // Not due yet.
    let due = engine
        .disputes
        .find_disputes_due_for_review(Utc::now())
        .await
        .expect("due now");
    assert!(due.is_empty());

    // Past the review window.
    let due = engine
        .disputes
        .find_disputes_due_for_review(Utc::now() + Duration::days(8))
        .await
        .expect("due later");
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].dispute_id, dispute.dispute_id);

    // Resolved disputes drop out even when overdue.
    engine
        .disputes
        .resolve_dispute(
            dispute.dispute_id,
            DisputeResolution::Close {
                note: "withdrawn".to_string(),
            },
            "reviewer",
        )
        .await
        .expect("close");
    let due = engine
        .disputes
        .find_disputes_due_for_review(Utc::now() + Duration::days(8))
        .await
        .expect("due after close");
    assert!(due.is_empty());
}

#[tokio::test]
async fn failed_store_write_leaves_refund_and_dispute_unresolved() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;
    let (_, payment) = engine
        .payments
        .record_manual_payment(
            &invoice.invoice_number,
            invoice.total,
            "USD",
            PaymentMethod::CreditCard,
            None,
            "tester",
        )
        .await
        .expect("pay");
    let dispute = engine
        .disputes
        .open_dispute(
            &invoice.invoice_number,
            "overcharged",
            engine.customer_id,
            "tester",
        )
        .await
        .expect("open");

    engine.store.fail_next_audit().await;
    let err = engine
        .disputes
        .resolve_dispute(
            dispute.dispute_id,
            DisputeResolution::CustomerFavorRefund {
                payment_id: payment.payment_id,
                amount: Decimal::new(441, 2),
                note: "partial refund".to_string(),
            },
            "reviewer",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AuditPersistence(_)));

    // Neither side committed: the dispute is still open and no refund row
    // was written, so a retry cannot double-pay.
    let reloaded = engine
        .disputes
        .get_dispute(dispute.dispute_id)
        .await
        .expect("reload");
    assert_eq!(reloaded.status(), DisputeStatus::UnderReview);
    let payments = engine
        .payments
        .list_payments(&invoice.invoice_number)
        .await
        .expect("list");
    assert!(payments.iter().all(|p| !p.is_refund()));

    engine
        .disputes
        .resolve_dispute(
            dispute.dispute_id,
            DisputeResolution::CustomerFavorRefund {
                payment_id: payment.payment_id,
                amount: Decimal::new(441, 2),
                note: "partial refund".to_string(),
            },
            "reviewer",
        )
        .await
        .expect("retry");
    let refunds = engine
        .payments
        .list_payments(&invoice.invoice_number)
        .await
        .expect("list")
        .into_iter()
        .filter(|p| p.is_refund())
        .count();
    assert_eq!(refunds, 1);
}

#[tokio::test]
async fn concurrent_credit_resolutions_both_land_on_the_balance() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;

    let first = engine
        .disputes
        .open_dispute(
            &invoice.invoice_number,
            "parcel damaged",
            engine.customer_id,
            "tester",
        )
        .await
        .expect("open first");
    let second = engine
        .disputes
        .open_dispute(
            &invoice.invoice_number,
            "parcel late",
            engine.customer_id,
            "tester",
        )
        .await
        .expect("open second");

    let (a, b) = tokio::join!(
        engine.disputes.resolve_dispute(
            first.dispute_id,
            DisputeResolution::CustomerFavorCredit {
                amount: Decimal::new(300, 2),
                note: "damage credit".to_string(),
            },
            "reviewer",
        ),
        engine.disputes.resolve_dispute(
            second.dispute_id,
            DisputeResolution::CustomerFavorCredit {
                amount: Decimal::new(200, 2),
                note: "late delivery credit".to_string(),
            },
            "reviewer",
        ),
    );
    a.expect("first resolution");
    b.expect("second resolution");

    // The store applies deltas, so neither credit overwrites the other.
    assert_eq!(
        engine
            .disputes
            .credit_balance(engine.customer_id)
            .await
            .expect("balance"),
        Decimal::new(500, 2)
    );
}

#[tokio::test]
async fn credit_in_a_different_currency_is_rejected() {
    let engine = setup().await;
    let invoice = issued_invoice(&engine).await;

    // Establish a USD balance.
    let dispute = engine
        .disputes
        .open_dispute(
            &invoice.invoice_number,
            "parcel damaged",
            engine.customer_id,
            "tester",
        )
        .await
        .expect("open");
    engine
        .disputes
        .resolve_dispute(
            dispute.dispute_id,
            DisputeResolution::CustomerFavorCredit {
                amount: Decimal::new(500, 2),
                note: "goodwill credit".to_string(),
            },
            "reviewer",
        )
        .await
        .expect("resolve");

    // A credit from a EUR invoice cannot land on the USD balance.
    let mut req = invoice_request(engine.customer_id);
    req.currency = "EUR".to_string();
    let eur_invoice = engine
        .ledger
        .create_invoice(req, standard_charge(engine.customer_id, 1500))
        .await
        .expect("create eur invoice");
    engine
        .ledger
        .finalize_invoice(&eur_invoice.invoice_number, "tester")
        .await
        .expect("finalize");
    let eur_dispute = engine
        .disputes
        .open_dispute(
            &eur_invoice.invoice_number,
            "wrong rate",
            engine.customer_id,
            "tester",
        )
        .await
        .expect("open eur dispute");

    let err = engine
        .disputes
        .resolve_dispute(
            eur_dispute.dispute_id,
            DisputeResolution::CustomerFavorCredit {
                amount: Decimal::new(100, 2),
                note: "rate correction".to_string(),
            },
            "reviewer",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Balance and dispute are untouched.
    assert_eq!(
        engine
            .disputes
            .credit_balance(engine.customer_id)
            .await
            .expect("balance"),
        Decimal::new(500, 2)
    );
    let reloaded = engine
        .disputes
        .get_dispute(eur_dispute.dispute_id)
        .await
        .expect("reload");
    assert_eq!(reloaded.status(), DisputeStatus::UnderReview);
}
