//! HTTP tests against the in-memory backend

use actix_web::{http::StatusCode, test as actix_test, web, App};
use ledger_core::{IdempotencyConfig, MemoryStore};
use serde_json::{json, Value};
use uuid::Uuid;
use wallet_api::{configure_app, AppEnvironment, AppState};

fn test_state() -> web::Data<AppState<MemoryStore>> {
    web::Data::new(
        AppState::new(
            MemoryStore::default(),
            IdempotencyConfig::default(),
            AppEnvironment::Development,
        )
        .unwrap(),
    )
}

macro_rules! test_app {
    () => {
        test_app!(test_state())
    };
    ($state:expr) => {{
        let state = $state;
        actix_test::init_service(App::new().configure(move |cfg| configure_app(cfg, state, "v1")))
            .await
    }};
}

macro_rules! post {
    ($app:expr, $uri:expr, $body:expr) => {{
        let request = actix_test::TestRequest::post()
            .uri($uri)
            .set_json($body)
            .to_request();
        actix_test::call_service($app, request).await
    }};
    ($app:expr, $uri:expr, $body:expr, key = $key:expr) => {{
        let request = actix_test::TestRequest::post()
            .uri($uri)
            .insert_header(("Idempotency-Key", $key))
            .set_json($body)
            .to_request();
        actix_test::call_service($app, request).await
    }};
}

macro_rules! get {
    ($app:expr, $uri:expr) => {{
        let request = actix_test::TestRequest::get().uri($uri).to_request();
        actix_test::call_service($app, request).await
    }};
}

macro_rules! create_wallet {
    ($app:expr, $name:expr) => {{
        let response = post!($app, "/api/v1/users", json!({ "name": $name }));
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = actix_test::read_body_json(response).await;
        body["wallet"]["id"].as_str().unwrap().to_string()
    }};
}

#[actix_web::test]
async fn create_and_fetch_user() {
    let app = test_app!();

    let response = post!(&app, "/api/v1/users", json!({ "name": "  Alice " }));
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = actix_test::read_body_json(response).await;
    assert_eq!(created["name"], "Alice");
    assert_eq!(created["wallet"]["balance"], "0.00");
    assert_eq!(created["wallet"]["user_id"], created["id"]);

    let uri = format!("/api/v1/users/{}", created["id"].as_str().unwrap());
    let response = get!(&app, &uri);
    assert_eq!(response.status(), StatusCode::OK);
    let fetched: Value = actix_test::read_body_json(response).await;
    assert_eq!(fetched, created);
}

#[actix_web::test]
async fn empty_name_is_invalid_input() {
    let app = test_app!();
    let response = post!(&app, "/api/v1/users", json!({ "name": "   " }));
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[actix_web::test]
async fn unknown_user_is_not_found() {
    let app = test_app!();
    let response = get!(&app, &format!("/api/v1/users/{}", Uuid::now_v7()));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["code"], "USER_NOT_FOUND");
}

#[actix_web::test]
async fn deposit_withdraw_and_history() {
    let app = test_app!();
    let wallet = create_wallet!(&app, "Bob");

    let response = post!(
        &app,
        &format!("/api/v1/wallets/{}/deposit", wallet),
        json!({ "amount": "100.50" })
    );
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["balance"], "100.50");

    // Numeric amounts are accepted too
    let response = post!(
        &app,
        &format!("/api/v1/wallets/{}/withdraw", wallet),
        json!({ "amount": 0.5 })
    );
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["balance"], "100.00");

    let response = get!(&app, &format!("/api/v1/wallets/{}/balance", wallet));
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["balance"], "100.00");

    let response = get!(&app, &format!("/api/v1/wallets/{}/transactions", wallet));
    assert_eq!(response.status(), StatusCode::OK);
    let history: Value = actix_test::read_body_json(response).await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["type"], "withdraw");
    assert_eq!(history[1]["type"], "deposit");
}

#[actix_web::test]
async fn rejected_amounts_and_overdraft() {
    let app = test_app!();
    let wallet = create_wallet!(&app, "Carol");
    let deposit_uri = format!("/api/v1/wallets/{}/deposit", wallet);

    for amount in [json!("0"), json!("-5.00"), json!("1.005"), json!("abc")] {
        let response = post!(&app, &deposit_uri, json!({ "amount": amount }));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = actix_test::read_body_json(response).await;
        assert_eq!(body["code"], "INVALID_AMOUNT");
    }

    let response = post!(
        &app,
        &format!("/api/v1/wallets/{}/withdraw", wallet),
        json!({ "amount": "1.00" })
    );
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["code"], "INSUFFICIENT_FUNDS");

    let response = get!(&app, &format!("/api/v1/wallets/{}/transactions", wallet));
    let history: Value = actix_test::read_body_json(response).await;
    assert!(history.as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn large_amounts_are_exact_or_rejected() {
    let app = test_app!();
    let wallet = create_wallet!(&app, "Mallory");
    let deposit_uri = format!("/api/v1/wallets/{}/deposit", wallet);

    let raw_deposit = |payload: &'static str| {
        actix_test::TestRequest::post()
            .uri(&deposit_uri)
            .insert_header(("Content-Type", "application/json"))
            .set_payload(payload)
            .to_request()
    };

    // Seventeen significant digits survive as a bare JSON number
    let response = actix_test::call_service(&app, raw_deposit(r#"{"amount": 9999999999999.99}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["balance"], "9999999999999.99");

    // Over the cap, not rounded into something else
    for payload in [
        r#"{"amount": 12345678901234567.89}"#,
        r#"{"amount": "79228162514264337593543950335"}"#,
        r#"{"amount": 0.01}"#,
    ] {
        let response = actix_test::call_service(&app, raw_deposit(payload)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = actix_test::read_body_json(response).await;
        assert_eq!(body["code"], "INVALID_AMOUNT");
    }

    let response = get!(&app, &format!("/api/v1/wallets/{}/balance", wallet));
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["balance"], "9999999999999.99");

    let response = get!(&app, &format!("/api/v1/wallets/{}/transactions", wallet));
    let history: Value = actix_test::read_body_json(response).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn transfer_between_wallets() {
    let app = test_app!();
    let from = create_wallet!(&app, "Dave");
    let to = create_wallet!(&app, "Erin");

    post!(
        &app,
        &format!("/api/v1/wallets/{}/deposit", from),
        json!({ "amount": "50.00" })
    );

    let transfer_uri = format!("/api/v1/wallets/{}/transfer", from);
    let response = post!(
        &app,
        &transfer_uri,
        json!({ "to_wallet_id": to, "amount": "20.00", "description": "rent" })
    );
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["message"], "Transfer completed successfully");

    let response = get!(&app, &format!("/api/v1/wallets/{}/balance", to));
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["balance"], "20.00");

    let response = get!(&app, &format!("/api/v1/wallets/{}/transactions", to));
    let history: Value = actix_test::read_body_json(response).await;
    assert_eq!(history[0]["type"], "transfer_in");
    assert_eq!(history[0]["description"], "rent");

    let response = post!(
        &app,
        &transfer_uri,
        json!({ "to_wallet_id": from, "amount": "1.00" })
    );
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["code"], "SAME_WALLET_TRANSFER");

    let response = post!(
        &app,
        &transfer_uri,
        json!({ "to_wallet_id": Uuid::now_v7(), "amount": "1.00" })
    );
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["code"], "WALLET_NOT_FOUND");
}

#[actix_web::test]
async fn malformed_requests_are_invalid_input() {
    let app = test_app!();

    let response = post!(
        &app,
        "/api/v1/wallets/not-a-uuid/deposit",
        json!({ "amount": "1.00" })
    );
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["code"], "INVALID_INPUT");

    let wallet = create_wallet!(&app, "Frank");
    let request = actix_test::TestRequest::post()
        .uri(&format!("/api/v1/wallets/{}/deposit", wallet))
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{\"amount\":")
        .to_request();
    let response = actix_test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["code"], "INVALID_INPUT");

    let response = get!(&app, "/api/v1/wallets/123/balance");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn idempotent_deposit_applies_once() {
    let app = test_app!();
    let wallet = create_wallet!(&app, "Grace");
    let uri = format!("/api/v1/wallets/{}/deposit", wallet);

    let first = post!(&app, &uri, json!({ "amount": "10.00" }), key = "retry-1");
    assert_eq!(first.status(), StatusCode::OK);
    assert!(first.headers().get("Idempotent-Replayed").is_none());
    let first_body = actix_test::read_body(first).await;

    let second = post!(&app, &uri, json!({ "amount": "10.00" }), key = "retry-1");
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("Idempotent-Replayed").unwrap(), "true");
    let second_body = actix_test::read_body(second).await;
    assert_eq!(first_body, second_body);

    let response = get!(&app, &format!("/api/v1/wallets/{}/balance", wallet));
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["balance"], "10.00");

    let response = get!(&app, &format!("/api/v1/wallets/{}/transactions", wallet));
    let history: Value = actix_test::read_body_json(response).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn idempotent_user_creation_replays_same_user() {
    let app = test_app!();

    let first = post!(&app, "/api/v1/users", json!({ "name": "Oscar" }), key = "signup-1");
    assert_eq!(first.status(), StatusCode::CREATED);
    assert!(first.headers().get("Idempotent-Replayed").is_none());
    let first_body = actix_test::read_body(first).await;

    let second = post!(&app, "/api/v1/users", json!({ "name": "Oscar" }), key = "signup-1");
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(second.headers().get("Idempotent-Replayed").unwrap(), "true");
    let second_body = actix_test::read_body(second).await;
    assert_eq!(first_body, second_body);

    let created: Value = serde_json::from_slice(&first_body).unwrap();
    let user_id = created["id"].as_str().unwrap();
    let response = get!(&app, &format!("/api/v1/users/{}", user_id));
    let fetched: Value = actix_test::read_body_json(response).await;
    assert_eq!(fetched["wallet"]["id"], created["wallet"]["id"]);

    // A new key creates a second, distinct user
    let third = post!(&app, "/api/v1/users", json!({ "name": "Oscar" }), key = "signup-2");
    assert_eq!(third.status(), StatusCode::CREATED);
    let third: Value = actix_test::read_body_json(third).await;
    assert_ne!(third["id"], created["id"]);
    assert_ne!(third["wallet"]["id"], created["wallet"]["id"]);
}

#[actix_web::test]
async fn reused_key_with_different_body_is_a_new_operation() {
    let app = test_app!();
    let wallet = create_wallet!(&app, "Heidi");
    let uri = format!("/api/v1/wallets/{}/deposit", wallet);

    post!(&app, &uri, json!({ "amount": "10.00" }), key = "same-key");
    let response = post!(&app, &uri, json!({ "amount": "5.00" }), key = "same-key");
    assert!(response.headers().get("Idempotent-Replayed").is_none());

    let response = get!(&app, &format!("/api/v1/wallets/{}/balance", wallet));
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["balance"], "15.00");
}

#[actix_web::test]
async fn failed_request_with_key_can_be_retried() {
    let app = test_app!();
    let wallet = create_wallet!(&app, "Ivan");
    let withdraw_uri = format!("/api/v1/wallets/{}/withdraw", wallet);

    let response = post!(&app, &withdraw_uri, json!({ "amount": "5.00" }), key = "w-1");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    post!(
        &app,
        &format!("/api/v1/wallets/{}/deposit", wallet),
        json!({ "amount": "5.00" })
    );

    let response = post!(&app, &withdraw_uri, json!({ "amount": "5.00" }), key = "w-1");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("Idempotent-Replayed").is_none());
}

#[actix_web::test]
async fn invalid_idempotency_key_rejected() {
    let app = test_app!();
    let wallet = create_wallet!(&app, "Judy");

    let response = post!(
        &app,
        &format!("/api/v1/wallets/{}/deposit", wallet),
        json!({ "amount": "1.00" }),
        key = ""
    );
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["code"], "INVALID_INPUT");

    let response = get!(&app, &format!("/api/v1/wallets/{}/balance", wallet));
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["balance"], "0.00");
}

#[actix_web::test]
async fn health_and_metrics() {
    let app = test_app!();

    for uri in ["/health", "/api/v1/health"] {
        let response = get!(&app, uri);
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = actix_test::read_body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["checks"]["store"]["status"], "healthy");
        assert_eq!(body["environment"], "development");
    }

    let wallet = create_wallet!(&app, "Ken");
    post!(
        &app,
        &format!("/api/v1/wallets/{}/deposit", wallet),
        json!({ "amount": "1.00" })
    );

    let response = get!(&app, "/metrics");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; version=0.0.4"
    );
    let body = actix_test::read_body(response).await;
    let text = std::str::from_utf8(&body).unwrap();
    assert!(text.contains("ledger_operations_total"));
}
