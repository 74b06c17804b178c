use actix_web::test::TestRequest;
use actix_web::{test, web, App};
use chrono::Utc;
use std::sync::Arc;

use site_entitlements::api;
use site_entitlements::db::PgEntitlementStore;
use site_entitlements::models::{EntitlementStatus, NewTransaction, PaymentSource};
use site_entitlements::store::{EntitlementStore, MemoryEntitlementStore};
use site_entitlements::tiers::Tier;
use site_entitlements::AppState;

mod support;

fn notify(uri: &str, body: String) -> TestRequest {
    TestRequest::post()
        .uri(uri)
        .insert_header(("Content-Type", "application/x-www-form-urlencoded"))
        .set_payload(body)
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .configure(api::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn complete_payment_upgrades_tier_and_records_ledger() {
    let store = Arc::new(MemoryEntitlementStore::new());
    let app = app!(support::memory_state(store.clone()));

    let body = support::signed_body(&support::complete_notification("u-1", "pro", "1089250"));
    let resp = test::call_service(&app, notify("/webhook/payfast", body).to_request()).await;
    assert!(resp.status().is_success());
    assert_eq!(test::read_body(resp).await, "SUCCESS");

    let record = store.load("u-1").await.unwrap().expect("record created");
    assert_eq!(record.tier, Tier::Pro);
    assert_eq!(record.status, EntitlementStatus::Active);
    assert_eq!(record.payment_token.as_deref(), Some("1089250"));
    assert!(record.next_billing_date.is_some());
    assert!(record.updated_at >= record.created_at);

    let ledger = store.list_transactions("u-1").await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].gateway_payment_id, "1089250");
    assert_eq!(ledger[0].amount_gross.as_deref(), Some("199.00"));
    assert_eq!(ledger[0].source, PaymentSource::Webhook);
}

#[actix_web::test]
async fn redelivery_is_acknowledged_without_second_write() {
    let store = Arc::new(MemoryEntitlementStore::new());
    let app = app!(support::memory_state(store.clone()));
    let fields = support::complete_notification("u-2", "business", "2000001");

    let resp = test::call_service(&app, notify("/webhook/payfast", support::signed_body(&fields)).to_request()).await;
    assert!(resp.status().is_success());
    let first = store.load("u-2").await.unwrap().unwrap();

    let resp = test::call_service(&app, notify("/webhook/payfast", support::signed_body(&fields)).to_request()).await;
    assert!(resp.status().is_success());
    assert_eq!(test::read_body(resp).await, "SUCCESS");

    let second = store.load("u-2").await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(store.list_transactions("u-2").await.unwrap().len(), 1);
}

#[actix_web::test]
async fn alias_route_reconciles_the_same_way() {
    let store = Arc::new(MemoryEntitlementStore::new());
    let app = app!(support::memory_state(store.clone()));

    let body = support::signed_body(&support::complete_notification("u-3", "starter", "3000001"));
    let resp = test::call_service(&app, notify("/api/payfast/notify", body).to_request()).await;
    assert!(resp.status().is_success());

    let record = store.load("u-3").await.unwrap().unwrap();
    assert_eq!(record.tier, Tier::Starter);
}

#[actix_web::test]
async fn cancelled_payment_is_acknowledged_and_ignored() {
    let store = Arc::new(MemoryEntitlementStore::new());
    let app = app!(support::memory_state(store.clone()));

    let mut fields = support::complete_notification("u-4", "premium", "4000001");
    support::set_field(&mut fields, "payment_status", "CANCELLED");
    let resp = test::call_service(&app, notify("/webhook/payfast", support::signed_body(&fields)).to_request()).await;
    assert!(resp.status().is_success());

    assert!(store.load("u-4").await.unwrap().is_none());
    assert!(store.list_transactions("u-4").await.unwrap().is_empty());
}

#[actix_web::test]
async fn tampered_notification_is_rejected_without_writes() {
    let store = Arc::new(MemoryEntitlementStore::new());
    let app = app!(support::memory_state(store.clone()));

    let body = support::signed_body(&support::complete_notification("u-5", "starter", "5000001"))
        .replace("custom_str2=starter", "custom_str2=premium");
    let resp = test::call_service(&app, notify("/webhook/payfast", body).to_request()).await;
    assert_eq!(resp.status().as_u16(), 400);

    assert!(store.load("u-5").await.unwrap().is_none());
}

#[actix_web::test]
async fn malformed_body_is_rejected() {
    let store = Arc::new(MemoryEntitlementStore::new());
    let app = app!(support::memory_state(store.clone()));

    let resp = test::call_service(&app, notify("/webhook/payfast", "payment_status".to_string()).to_request()).await;
    assert_eq!(resp.status().as_u16(), 400);

    let resp = test::call_service(&app, notify("/webhook/payfast", String::new()).to_request()).await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[actix_web::test]
async fn unknown_tier_and_foreign_merchant_are_acknowledged_without_writes() {
    let store = Arc::new(MemoryEntitlementStore::new());
    let app = app!(support::memory_state(store.clone()));

    let mut fields = support::complete_notification("u-6", "gold", "6000001");
    let resp = test::call_service(&app, notify("/webhook/payfast", support::signed_body(&fields)).to_request()).await;
    assert!(resp.status().is_success());

    support::set_field(&mut fields, "custom_str2", "pro");
    support::set_field(&mut fields, "merchant_id", "99999999");
    let resp = test::call_service(&app, notify("/webhook/payfast", support::signed_body(&fields)).to_request()).await;
    assert!(resp.status().is_success());

    assert!(store.load("u-6").await.unwrap().is_none());
    assert!(store.find_transaction("6000001").await.unwrap().is_none());
}

#[actix_web::test]
async fn unavailable_store_asks_for_redelivery() {
    let store = Arc::new(MemoryEntitlementStore::new());
    let app = app!(support::memory_state(store.clone()));
    store.set_unavailable(true);

    let body = support::signed_body(&support::complete_notification("u-7", "pro", "7000001"));
    let resp = test::call_service(&app, notify("/webhook/payfast", body.clone()).to_request()).await;
    assert_eq!(resp.status().as_u16(), 503);

    store.set_unavailable(false);
    let resp = test::call_service(&app, notify("/webhook/payfast", body).to_request()).await;
    assert!(resp.status().is_success());
    assert_eq!(store.load("u-7").await.unwrap().unwrap().tier, Tier::Pro);
}

#[actix_web::test]
async fn denied_server_write_is_a_failure_for_the_gateway() {
    let shared = Arc::new(MemoryEntitlementStore::new());
    let app = app!(support::denied_server_state(shared.clone()));

    let body = support::signed_body(&support::complete_notification("u-8", "pro", "8000001"));
    let resp = test::call_service(&app, notify("/webhook/payfast", body).to_request()).await;
    assert_eq!(resp.status().as_u16(), 500);
    assert!(shared.load("u-8").await.unwrap().is_none());
}

#[actix_web::test]
async fn write_that_does_not_stick_is_still_acknowledged() {
    let shared = Arc::new(MemoryEntitlementStore::new());
    let app = app!(support::tier_dropping_state(shared.clone()));

    let body = support::signed_body(&support::complete_notification("u-9", "pro", "8500001"));
    let resp = test::call_service(&app, notify("/webhook/payfast", body).to_request()).await;
    assert!(resp.status().is_success());
    assert_eq!(test::read_body(resp).await, "SUCCESS");

    let record = shared.load("u-9").await.unwrap().expect("record created");
    assert_eq!(record.tier, Tier::Free);
    assert_eq!(shared.list_transactions("u-9").await.unwrap().len(), 1);
}

#[actix_web::test]
async fn postgres_store_deduplicates_redelivery() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let store: Arc<dyn EntitlementStore> = Arc::new(PgEntitlementStore::new(test_db.pool.clone()));
    let state = AppState::new(&support::test_config(None), store.clone(), store.clone());
    let app = app!(state);

    let fields = support::complete_notification("pg-user", "pro", "9000001");
    for _ in 0..2 {
        let resp = test::call_service(&app, notify("/webhook/payfast", support::signed_body(&fields)).to_request()).await;
        assert!(resp.status().is_success());
    }

    let record = store.load("pg-user").await.unwrap().expect("record");
    assert_eq!(record.tier, Tier::Pro);
    assert_eq!(record.status, EntitlementStatus::Active);

    let ledger = store.list_transactions("pg-user").await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount_gross.as_deref(), Some("199.00"));
    assert_eq!(ledger[0].amount_fee.as_deref(), Some("-4.58"));

    let tx = NewTransaction {
        user_id: "pg-user".to_string(),
        tier: Tier::Business,
        gateway_payment_id: "9000002".to_string(),
        merchant_payment_id: None,
        amount_gross: Some("399.00".to_string()),
        amount_fee: None,
        amount_net: None,
        status: "COMPLETE".to_string(),
        name_first: None,
        name_last: None,
        email_address: None,
        source: PaymentSource::Manual,
        created_at: Utc::now(),
    };
    assert!(store.append_transaction(&tx).await.unwrap());
    assert!(!store.append_transaction(&tx).await.unwrap());
    assert_eq!(store.list_transactions("pg-user").await.unwrap().len(), 2);
}
