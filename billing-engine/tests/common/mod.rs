//! Shared test harness: in-memory store, mock gateway, recording notifier.

#![allow(dead_code)]

use async_trait::async_trait;
use billing_engine::directory::{CustomerDirectory, CustomerProfile, StaticDirectory};
use billing_engine::gateway::{GatewayCharge, PaymentGateway};
use billing_engine::models::{
    BillingInterval, ChargeRequest, CreateInvoiceRequest, InvoiceType, PricingTier, ServiceType,
    Subscription, SubscriptionStatus,
};
use billing_engine::notify::NotificationSender;
use billing_engine::services::{
    AuditRecorder, DisputeManager, InvoiceLedger, PaymentProcessor, PricingEngine,
    SubscriptionBiller,
};
use billing_engine::store::{BillingStore, MemoryStore};
use billing_engine::{AppError, BillingConfig};
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Gateway double: succeeds with a fixed transaction id unless told to fail.
#[derive(Default)]
pub struct MockGateway {
    fail: AtomicBool,
    pub charges: Mutex<Vec<Decimal>>,
}

impl MockGateway {
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn charge(
        &self,
        _invoice_number: &str,
        amount: Decimal,
        _currency: &str,
    ) -> Result<GatewayCharge, AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Gateway(anyhow::anyhow!("card declined")));
        }
        self.charges.lock().await.push(amount);
        Ok(GatewayCharge {
            transaction_id: format!("txn-{}", Uuid::new_v4()),
        })
    }
}

/// Notifier double that records every emitted event.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingNotifier {
    pub async fn event_names(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn notify(&self, event: &str, payload: serde_json::Value) -> Result<(), AppError> {
        self.events.lock().await.push((event.to_string(), payload));
        Ok(())
    }
}

pub struct TestEngine {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub pricing: PricingEngine,
    pub ledger: InvoiceLedger,
    pub payments: PaymentProcessor,
    pub disputes: DisputeManager,
    pub audit: AuditRecorder,
    pub biller: SubscriptionBiller,
    pub customer_id: Uuid,
}

pub async fn setup() -> TestEngine {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(MockGateway::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let config = BillingConfig::default();
    let customer_id = Uuid::new_v4();

    let directory = Arc::new(StaticDirectory::new(vec![CustomerProfile {
        customer_id,
        name: "Acme Logistics".to_string(),
        email: "billing@acme.example".to_string(),
        billing_line1: "1 Depot Road".to_string(),
        billing_city: "Mumbai".to_string(),
        billing_postal_code: "400001".to_string(),
        billing_country: "IN".to_string(),
    }]));

    seed_tiers(store.as_ref()).await;

    let store_dyn: Arc<dyn BillingStore> = store.clone();
    let directory_dyn: Arc<dyn CustomerDirectory> = directory;
    let notifier_dyn: Arc<dyn NotificationSender> = notifier.clone();
    let gateway_dyn: Arc<dyn PaymentGateway> = gateway.clone();

    let pricing = PricingEngine::new(store_dyn.clone(), config.clone());
    let ledger = InvoiceLedger::new(
        store_dyn.clone(),
        pricing.clone(),
        directory_dyn,
        notifier_dyn,
    );
    let payments = PaymentProcessor::new(
        store_dyn.clone(),
        ledger.clone(),
        gateway_dyn,
        config.clone(),
    );
    let disputes = DisputeManager::new(
        store_dyn.clone(),
        ledger.clone(),
        payments.clone(),
        config.clone(),
    );
    let audit = AuditRecorder::new(store_dyn.clone());
    let biller = SubscriptionBiller::new(store_dyn, pricing.clone(), ledger.clone(), config);

    TestEngine {
        store,
        gateway,
        notifier,
        pricing,
        ledger,
        payments,
        disputes,
        audit,
        biller,
        customer_id,
    }
}

/// Two tiers: `[0, 999]` at 0% and `[1000, inf)` at 10%, both active since
/// 2024-01-01.
pub async fn seed_tiers(store: &dyn BillingStore) {
    let effective_from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let now = Utc::now();
    store
        .insert_tier(&PricingTier {
            name: "basic".to_string(),
            min_monthly_volume: 0,
            max_monthly_volume: Some(999),
            active: true,
            effective_from,
            effective_until: None,
            discount_percent: Decimal::ZERO,
            created_utc: now,
        })
        .await
        .expect("seed basic tier");
    store
        .insert_tier(&PricingTier {
            name: "volume".to_string(),
            min_monthly_volume: 1000,
            max_monthly_volume: None,
            active: true,
            effective_from,
            effective_until: None,
            discount_percent: Decimal::new(10, 0),
            created_utc: now,
        })
        .await
        .expect("seed volume tier");
}

/// A 10 kg domestic standard shipment. With the volume tier (10% discount)
/// and the default 8.5% tax this prices to subtotal 25.00, discount 2.50,
/// tax 1.91, total 24.41.
pub fn standard_charge(customer_id: Uuid, monthly_volume: i64) -> ChargeRequest {
    ChargeRequest {
        service_type: ServiceType::Standard,
        weight_kg: Decimal::new(10, 0),
        length_cm: Decimal::new(30, 0),
        width_cm: Decimal::new(20, 0),
        height_cm: Decimal::new(10, 0),
        origin: "IN".to_string(),
        destination: "IN".to_string(),
        declared_value: Decimal::new(10000, 2),
        customer_id,
        monthly_volume,
    }
}

pub fn invoice_request(customer_id: Uuid) -> CreateInvoiceRequest {
    CreateInvoiceRequest {
        customer_id,
        customer_name: None,
        customer_email: None,
        billing_line1: None,
        billing_city: None,
        billing_postal_code: None,
        billing_country: None,
        description: Some("Shipment charges".to_string()),
        currency: "USD".to_string(),
        due_date: Utc::now().date_naive() + Duration::days(14),
        invoice_type: InvoiceType::Shipment,
        shipment_id: Some(Uuid::new_v4()),
        subscription_id: None,
        performed_by: "tester".to_string(),
    }
}

pub fn monthly_subscription(customer_id: Uuid, next_billing_date: NaiveDate) -> Subscription {
    let now = Utc::now();
    Subscription {
        subscription_id: Uuid::new_v4(),
        customer_id,
        customer_name: "Acme Logistics".to_string(),
        customer_email: Some("billing@acme.example".to_string()),
        status: SubscriptionStatus::Active.as_str().to_string(),
        billing_interval: BillingInterval::Monthly.as_str().to_string(),
        base_amount: Decimal::new(4000, 2),
        monthly_volume: 1500,
        currency: "USD".to_string(),
        start_date: next_billing_date,
        end_date: None,
        next_billing_date,
        created_utc: now,
        updated_utc: now,
    }
}

/// Create and finalize an invoice priced at 24.41 USD for the harness
/// customer.
pub async fn issued_invoice(engine: &TestEngine) -> billing_engine::models::Invoice {
    let draft = engine
        .ledger
        .create_invoice(
            invoice_request(engine.customer_id),
            standard_charge(engine.customer_id, 1500),
        )
        .await
        .expect("create invoice");
    engine
        .ledger
        .finalize_invoice(&draft.invoice_number, "tester")
        .await
        .expect("finalize invoice")
}
