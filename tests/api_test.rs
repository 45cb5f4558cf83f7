use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use ticketbari_core::adapters::MemoryStore;
use ticketbari_core::config::CoreSettings;
use ticketbari_core::domain::Role;
use ticketbari_core::gateway::webhook::{sign_payload, SIGNATURE_HEADER};
use ticketbari_core::gateway::MockGateway;
use ticketbari_core::middleware::auth::Claims;
use ticketbari_core::middleware::IdentityVerifier;
use ticketbari_core::ports::UserRepository;
use ticketbari_core::{create_app, AppState, Repositories};

const JWT_SECRET: &str = "integration-test-secret";
const WEBHOOK_SECRET: &str = "whsec_integration";

struct TestApp {
    router: Router,
    store: MemoryStore,
    gateway: MockGateway,
}

fn test_app() -> TestApp {
    test_app_with_webhook(Some(WEBHOOK_SECRET))
}

fn test_app_with_webhook(webhook_secret: Option<&str>) -> TestApp {
    let store = MemoryStore::new();
    let gateway = MockGateway::new();
    let state = AppState::new(
        Repositories::memory(store.clone()),
        Arc::new(gateway.clone()),
        IdentityVerifier::hs256(JWT_SECRET),
        CoreSettings::default(),
    )
    .with_webhook_secret(webhook_secret.map(str::to_string));

    TestApp {
        router: create_app(state),
        store,
        gateway,
    }
}

fn token_expiring_in(sub: &str, seconds: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + seconds;
    let claims = Claims {
        sub: sub.to_string(),
        email: Some(format!("{}@example.com", sub)),
        email_verified: true,
        name: None,
        picture: None,
        exp: exp as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn token(sub: &str) -> String {
    token_expiring_in(sub, 3600)
}

async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", bearer));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn register(app: &TestApp, sub: &str, role: Role) -> String {
    let bearer = token(sub);
    let (status, _) = send(app, Method::POST, "/users", Some(&bearer), None).await;
    assert_eq!(status, StatusCode::OK);
    if role != Role::Consumer {
        app.store.set_role(sub, role).await.unwrap();
    }
    bearer
}

struct Actors {
    admin: String,
    vendor: String,
    consumer: String,
}

async fn actors(app: &TestApp) -> Actors {
    Actors {
        admin: register(app, "admin", Role::Admin).await,
        vendor: register(app, "vendor", Role::Vendor).await,
        consumer: register(app, "rider", Role::Consumer).await,
    }
}

fn ticket_body(seats: i32) -> Value {
    json!({
        "title": "Dhaka to Chattogram Express",
        "type": "bus",
        "from": "Dhaka",
        "to": "Chattogram",
        "departureDate": "2099-01-15",
        "departureTime": "08:30",
        "price": "800",
        "totalSeats": seats,
        "features": ["AC", "WiFi"]
    })
}

async fn approved_ticket(app: &TestApp, actors: &Actors, seats: i32) -> String {
    let (status, ticket) = send(
        app,
        Method::POST,
        "/tickets",
        Some(&actors.vendor),
        Some(ticket_body(seats)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = ticket["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        app,
        Method::PUT,
        &format!("/tickets/{}", id),
        Some(&actors.admin),
        Some(json!({ "status": "approved" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    id
}

async fn book(app: &TestApp, consumer: &str, ticket_id: &str, seats: i32) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/bookings",
        Some(consumer),
        Some(json!({ "ticketId": ticket_id, "numberOfSeats": seats })),
    )
    .await
}

async fn accepted_booking(app: &TestApp, actors: &Actors, ticket_id: &str, seats: i32) -> String {
    let (status, booking) = book(app, &actors.consumer, ticket_id, seats).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = booking["id"].as_str().unwrap().to_string();

    let (status, booking) = send(
        app,
        Method::PUT,
        &format!("/bookings/{}", id),
        Some(&actors.vendor),
        Some(json!({ "status": "accepted" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booking["status"], "accepted");
    id
}

async fn available_seats(app: &TestApp, bearer: &str, ticket_id: &str) -> i64 {
    let (status, ticket) = send(
        app,
        Method::GET,
        &format!("/tickets/{}", ticket_id),
        Some(bearer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    ticket["availableSeats"].as_i64().unwrap()
}

#[tokio::test]
async fn test_full_booking_and_settlement_flow() {
    let app = test_app();
    let actors = actors(&app).await;

    let (status, ticket) = send(
        &app,
        Method::POST,
        "/tickets",
        Some(&actors.vendor),
        Some(ticket_body(40)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ticket["status"], "pending");
    assert_eq!(ticket["availableSeats"], 40);
    let ticket_id = ticket["id"].as_str().unwrap().to_string();

    // Pending tickets are not listed publicly.
    let (_, listed) = send(&app, Method::GET, "/tickets", None, None).await;
    assert_eq!(listed.as_array().unwrap().len(), 0);

    let (status, approved) = send(
        &app,
        Method::PUT,
        &format!("/tickets/{}", ticket_id),
        Some(&actors.admin),
        Some(json!({ "status": "approved" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved");

    let (_, listed) = send(&app, Method::GET, "/tickets?type=bus&from=dhaka", None, None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let booking_id = accepted_booking(&app, &actors, &ticket_id, 2).await;
    assert_eq!(available_seats(&app, &actors.consumer, &ticket_id).await, 38);

    let (status, intent) = send(
        &app,
        Method::POST,
        "/payments/create-payment-intent",
        Some(&actors.consumer),
        Some(json!({ "bookingId": booking_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(intent["clientSecret"].as_str().is_some());
    let intent_id = intent["paymentIntentId"].as_str().unwrap().to_string();
    assert_eq!(app.gateway.intent(&intent_id).unwrap().amount, 160_000);

    app.gateway.complete_payment(&intent_id);

    let confirm = json!({ "paymentIntentId": intent_id, "bookingId": booking_id });
    let (status, confirmed) = send(
        &app,
        Method::POST,
        "/payments/confirm-payment",
        Some(&actors.consumer),
        Some(confirm.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["success"], true);
    assert_eq!(confirmed["booking"]["status"], "paid");
    assert_eq!(confirmed["booking"]["paymentId"], intent_id.as_str());

    // Confirming again is a no-op success and does not hit the gateway.
    let retrieves = app.gateway.retrieve_calls();
    let (status, again) = send(
        &app,
        Method::POST,
        "/payments/confirm-payment",
        Some(&actors.consumer),
        Some(confirm),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["booking"]["status"], "paid");
    assert_eq!(app.gateway.retrieve_calls(), retrieves);

    let (status, history) = send(
        &app,
        Method::GET,
        "/payments/history/rider@example.com",
        Some(&actors.consumer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["id"], intent_id.as_str());

    let (status, revenue) = send(&app, Method::GET, "/bookings/revenue", Some(&actors.vendor), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revenue["seatsSold"], 2);
    assert_eq!(revenue["paidBookings"], 1);
}

#[tokio::test]
async fn test_paying_unaccepted_booking_is_rejected() {
    let app = test_app();
    let actors = actors(&app).await;
    let ticket_id = approved_ticket(&app, &actors, 10).await;

    let (_, booking) = book(&app, &actors.consumer, &ticket_id, 1).await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/payments/create-payment-intent",
        Some(&actors.consumer),
        Some(json!({ "bookingId": booking["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");
    assert_eq!(app.gateway.create_calls(), 0);
}

#[tokio::test]
async fn test_confirm_requires_succeeded_intent() {
    let app = test_app();
    let actors = actors(&app).await;
    let ticket_id = approved_ticket(&app, &actors, 10).await;
    let booking_id = accepted_booking(&app, &actors, &ticket_id, 1).await;

    let (_, intent) = send(
        &app,
        Method::POST,
        "/payments/create-payment-intent",
        Some(&actors.consumer),
        Some(json!({ "bookingId": booking_id })),
    )
    .await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/payments/confirm-payment",
        Some(&actors.consumer),
        Some(json!({ "paymentIntentId": intent["paymentIntentId"], "bookingId": booking_id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "PAYMENT_NOT_COMPLETED");

    let (_, booking) = send(
        &app,
        Method::GET,
        &format!("/bookings/{}", booking_id),
        Some(&actors.consumer),
        None,
    )
    .await;
    assert_eq!(booking["status"], "accepted");
}

#[tokio::test]
async fn test_insufficient_seats_conflict() {
    let app = test_app();
    let actors = actors(&app).await;
    let ticket_id = approved_ticket(&app, &actors, 3).await;

    let (status, body) = book(&app, &actors.consumer, &ticket_id, 4).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVENTORY_CONFLICT");
    assert_eq!(available_seats(&app, &actors.consumer, &ticket_id).await, 3);
}

#[tokio::test]
async fn test_concurrent_requests_for_last_seat() {
    let app = test_app();
    let actors = actors(&app).await;
    let ticket_id = approved_ticket(&app, &actors, 1).await;

    let (first, second) = tokio::join!(
        book(&app, &actors.consumer, &ticket_id, 1),
        book(&app, &actors.consumer, &ticket_id, 1)
    );
    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::CONFLICT]);
    assert_eq!(available_seats(&app, &actors.consumer, &ticket_id).await, 0);
}

#[tokio::test]
async fn test_vendor_rejection_restores_seats() {
    let app = test_app();
    let actors = actors(&app).await;
    let ticket_id = approved_ticket(&app, &actors, 10).await;

    let (_, booking) = book(&app, &actors.consumer, &ticket_id, 4).await;
    let booking_id = booking["id"].as_str().unwrap().to_string();
    assert_eq!(available_seats(&app, &actors.consumer, &ticket_id).await, 6);

    let (status, rejected) = send(
        &app,
        Method::PUT,
        &format!("/bookings/{}", booking_id),
        Some(&actors.vendor),
        Some(json!({ "status": "rejected", "reason": "bus under maintenance" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(available_seats(&app, &actors.consumer, &ticket_id).await, 10);

    // Rejected is terminal.
    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/bookings/{}", booking_id),
        Some(&actors.vendor),
        Some(json!({ "status": "accepted" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_consumer_cancellation_restores_seats() {
    let app = test_app();
    let actors = actors(&app).await;
    let ticket_id = approved_ticket(&app, &actors, 5).await;
    let booking_id = accepted_booking(&app, &actors, &ticket_id, 2).await;

    let (status, cancelled) = send(
        &app,
        Method::DELETE,
        &format!("/bookings/{}", booking_id),
        Some(&actors.consumer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(available_seats(&app, &actors.consumer, &ticket_id).await, 5);
}

#[tokio::test]
async fn test_ticket_rejection_requires_reason() {
    let app = test_app();
    let actors = actors(&app).await;
    let (_, ticket) = send(
        &app,
        Method::POST,
        "/tickets",
        Some(&actors.vendor),
        Some(ticket_body(10)),
    )
    .await;
    let uri = format!("/tickets/{}", ticket["id"].as_str().unwrap());

    let (status, body) = send(
        &app,
        Method::PUT,
        &uri,
        Some(&actors.admin),
        Some(json!({ "status": "rejected", "rejectionReason": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, rejected) = send(
        &app,
        Method::PUT,
        &uri,
        Some(&actors.admin),
        Some(json!({ "status": "rejected", "rejectionReason": "blurry route photo" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["rejectionReason"], "blurry route photo");
}

#[tokio::test]
async fn test_flagged_vendor_tickets_are_hidden() {
    let app = test_app();
    let actors = actors(&app).await;
    let ticket_id = approved_ticket(&app, &actors, 10).await;

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/tickets/{}", ticket_id),
        Some(&actors.admin),
        Some(json!({ "isAdvertised": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, flagged) = send(
        &app,
        Method::PUT,
        "/users/vendor",
        Some(&actors.admin),
        Some(json!({ "isFraud": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(flagged["isFraud"], true);

    let (_, listed) = send(&app, Method::GET, "/tickets", Some(&actors.consumer), None).await;
    assert!(listed.as_array().unwrap().is_empty());
    let (_, advertised) = send(&app, Method::GET, "/tickets/advertised", None, None).await;
    assert!(advertised.as_array().unwrap().is_empty());

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/tickets/{}", ticket_id),
        Some(&actors.consumer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = book(&app, &actors.consumer, &ticket_id, 1).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = send(
        &app,
        Method::POST,
        "/tickets",
        Some(&actors.vendor),
        Some(ticket_body(5)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The owner and admins still see it.
    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/tickets/{}", ticket_id),
        Some(&actors.vendor),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_advertising_cap() {
    let app = test_app();
    let actors = actors(&app).await;
    let cap = CoreSettings::default().max_advertised_tickets;

    let mut ids = Vec::new();
    for _ in 0..=cap {
        ids.push(approved_ticket(&app, &actors, 5).await);
    }

    for id in ids.iter().take(cap as usize) {
        let (status, ticket) = send(
            &app,
            Method::PUT,
            &format!("/tickets/{}", id),
            Some(&actors.admin),
            Some(json!({ "isAdvertised": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ticket["isAdvertised"], true);
    }

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/tickets/{}", ids[cap as usize]),
        Some(&actors.admin),
        Some(json!({ "isAdvertised": true })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ADVERTISING_CAP_REACHED");

    let (_, advertised) = send(&app, Method::GET, "/tickets/advertised", None, None).await;
    assert_eq!(advertised.as_array().unwrap().len(), cap as usize);
}

#[tokio::test]
async fn test_authentication_failures() {
    let app = test_app();
    actors(&app).await;

    let (status, body) = send(&app, Method::GET, "/bookings/mine", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");

    let expired = token_expiring_in("rider", -3600);
    let (status, body) = send(&app, Method::GET, "/bookings/mine", Some(&expired), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "TOKEN_EXPIRED");

    let (status, body) = send(&app, Method::GET, "/tickets", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");

    // Verified but never registered.
    let stranger = token("stranger");
    let (status, _) = send(&app, Method::GET, "/bookings/mine", Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_role_checks() {
    let app = test_app();
    let actors = actors(&app).await;
    let ticket_id = approved_ticket(&app, &actors, 10).await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/tickets",
        Some(&actors.consumer),
        Some(ticket_body(10)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = book(&app, &actors.vendor, &ticket_id, 1).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, Method::GET, "/users", Some(&actors.vendor), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        Method::GET,
        "/payments/history/vendor@example.com",
        Some(&actors.consumer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, me) = send(&app, Method::GET, "/users/me", Some(&actors.vendor), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["role"], "vendor");
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let app = test_app();
    let actors = actors(&app).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/bookings",
        Some(&actors.consumer),
        Some(json!({ "ticketId": "not-a-uuid" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

async fn deliver_webhook(app: &TestApp, payload: &Value, signature: Option<String>) -> (StatusCode, Value) {
    let body = payload.to_string();
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/payments/webhook")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    let response = app
        .router
        .clone()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_webhook_settles_booking() {
    let app = test_app();
    let actors = actors(&app).await;
    let ticket_id = approved_ticket(&app, &actors, 10).await;
    let booking_id = accepted_booking(&app, &actors, &ticket_id, 1).await;

    let (_, created) = send(
        &app,
        Method::POST,
        "/payments/create-payment-intent",
        Some(&actors.consumer),
        Some(json!({ "bookingId": booking_id })),
    )
    .await;
    let intent_id = created["paymentIntentId"].as_str().unwrap().to_string();
    app.gateway.complete_payment(&intent_id);
    let intent = app.gateway.intent(&intent_id).unwrap();

    let payload = json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": { "object": intent }
    });

    let (status, _) = deliver_webhook(&app, &payload, Some("t=1,v1=deadbeef".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = deliver_webhook(&app, &payload, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let signature = sign_payload(
        WEBHOOK_SECRET,
        payload.to_string().as_bytes(),
        chrono::Utc::now().timestamp(),
    )
    .unwrap();
    let (status, body) = deliver_webhook(&app, &payload, Some(signature.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bookingId"], booking_id.as_str());

    let (_, booking) = send(
        &app,
        Method::GET,
        &format!("/bookings/{}", booking_id),
        Some(&actors.consumer),
        None,
    )
    .await;
    assert_eq!(booking["status"], "paid");

    // Redelivery is acknowledged without changing anything.
    let (status, _) = deliver_webhook(&app, &payload, Some(signature)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_disabled_without_secret() {
    let app = test_app_with_webhook(None);
    let payload = json!({ "id": "evt_1", "type": "payment_intent.succeeded" });
    let (status, _) = deliver_webhook(&app, &payload, Some("t=1,v1=00".to_string())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}
