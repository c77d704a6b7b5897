use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use orderflow::api::rest::router;
use orderflow::auth::Principal;
use orderflow::config::Config;
use orderflow::state::AppState;

const ADMIN_TOKEN: &str = "test-admin";

fn test_config() -> Config {
    Config {
        http_port: 0,
        log_level: "info".to_string(),
        admin_token: ADMIN_TOKEN.to_string(),
    }
}

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(&test_config()));
    (router(state.clone()), state)
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }

    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn checkout_body(kitchen_id: Uuid) -> Value {
    json!({
        "customer": {
            "name": "Ada",
            "phone": "+49100000000",
            "email": "ada@example.com",
            "address": "1 Test Lane"
        },
        "items": [
            { "id": Uuid::new_v4(), "name": "Bowl", "unit_price": 900, "quantity": 2 },
            { "id": Uuid::new_v4(), "name": "Tea", "unit_price": 250, "quantity": 1 }
        ],
        "kitchen_id": kitchen_id,
        "delivery_fee": 300,
        "discount": 100
    })
}

async fn checkout(app: &axum::Router, kitchen_id: Uuid) -> Value {
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/orders",
            None,
            Some(checkout_body(kitchen_id)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

/// Onboards an agent through the admin API and flips it available with
/// its own token. Returns (agent_id, token).
async fn onboard_agent(app: &axum::Router, name: &str) -> (String, String) {
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/admin/agents",
            Some(ADMIN_TOKEN),
            Some(json!({ "name": name, "phone": "+49100000001", "rating": 4.6 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let agent_id = body["agent"]["id"].as_str().unwrap().to_string();
    let token = body["token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request(
            "PATCH",
            "/delivery/status",
            Some(&token),
            Some(json!({ "status": "available" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    (agent_id, token)
}

async fn mint_kitchen_token(app: &axum::Router, kitchen_id: Uuid) -> String {
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/admin/kitchens/{kitchen_id}/token"),
            Some(ADMIN_TOKEN),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["token"].as_str().unwrap().to_string()
}

/// Drives an order to "prepared" through payment confirmation and the
/// kitchen endpoints; returns (order_id, kitchen_token).
async fn prepared_order(app: &axum::Router, kitchen_id: Uuid) -> (String, String) {
    let order = checkout(app, kitchen_id).await;
    let order_id = order["id"].as_str().unwrap().to_string();
    let kitchen_token = mint_kitchen_token(app, kitchen_id).await;

    for (uri, token) in [
        (format!("/admin/orders/{order_id}/confirm-payment"), ADMIN_TOKEN),
        (format!("/partner/orders/{order_id}/accept"), kitchen_token.as_str()),
        (format!("/partner/orders/{order_id}/ready"), kitchen_token.as_str()),
    ] {
        let response = app
            .clone()
            .oneshot(request("POST", &uri, Some(token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "step {uri} failed");
    }

    (order_id, kitchen_token)
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state) = setup();
    let response = app.oneshot(request("GET", "/health", None, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["orders"], 0);
    assert_eq!(body["agents"], 0);
    assert_eq!(body["connections"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();

    // Drive one transition so the counter family has a sample to export.
    let order = checkout(&app, Uuid::new_v4()).await;
    let order_id = order["id"].as_str().unwrap();
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/admin/orders/{order_id}/confirm-payment"),
            Some(ADMIN_TOKEN),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(request("GET", "/metrics", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("order_transitions_total"));
}

#[tokio::test]
async fn checkout_returns_pending_order() {
    let (app, _state) = setup();
    let order = checkout(&app, Uuid::new_v4()).await;

    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "pending");
    assert_eq!(order["subtotal"], 2050);
    assert_eq!(order["total"], 2250);
    assert!(order.get("assignment").is_none());
}

#[tokio::test]
async fn checkout_without_items_returns_400() {
    let (app, _state) = setup();
    let mut body = checkout_body(Uuid::new_v4());
    body["items"] = json!([]);

    let response = app
        .oneshot(request("POST", "/orders", None, Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_order_requires_entitlement() {
    let (app, _state) = setup();
    let kitchen_id = Uuid::new_v4();
    let order = checkout(&app, kitchen_id).await;
    let order_id = order["id"].as_str().unwrap();

    // No token at all.
    let response = app
        .clone()
        .oneshot(request("GET", &format!("/orders/{order_id}"), None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A foreign kitchen is authenticated but not entitled.
    let foreign = mint_kitchen_token(&app, Uuid::new_v4()).await;
    let response = app
        .clone()
        .oneshot(request("GET", &format!("/orders/{order_id}"), Some(&foreign), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The owning kitchen sees it.
    let own = mint_kitchen_token(&app, kitchen_id).await;
    let response = app
        .oneshot(request("GET", &format!("/orders/{order_id}"), Some(&own), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_reject_non_admin_tokens() {
    let (app, _state) = setup();
    let kitchen_token = mint_kitchen_token(&app, Uuid::new_v4()).await;

    let response = app
        .clone()
        .oneshot(request("GET", "/admin/orders", Some(&kitchen_token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(request("GET", "/admin/orders", Some("bogus"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn end_to_end_order_flow() {
    let (app, _state) = setup();
    let kitchen_id = Uuid::new_v4();
    let (agent_id, agent_token) = onboard_agent(&app, "Riya").await;

    let order = checkout(&app, kitchen_id).await;
    let order_id = order["id"].as_str().unwrap().to_string();
    let kitchen_token = mint_kitchen_token(&app, kitchen_id).await;

    let steps: Vec<(String, &str, &str)> = vec![
        (
            format!("/admin/orders/{order_id}/confirm-payment"),
            ADMIN_TOKEN,
            "confirmed",
        ),
        (
            format!("/partner/orders/{order_id}/accept"),
            kitchen_token.as_str(),
            "preparing",
        ),
        (
            format!("/partner/orders/{order_id}/ready"),
            kitchen_token.as_str(),
            "prepared",
        ),
        (
            format!("/delivery/orders/{order_id}/claim"),
            agent_token.as_str(),
            "assigned",
        ),
        (
            format!("/delivery/orders/{order_id}/accept"),
            agent_token.as_str(),
            "accepted_by_delivery",
        ),
        (
            format!("/delivery/orders/{order_id}/pickup"),
            agent_token.as_str(),
            "out_for_delivery",
        ),
        (
            format!("/delivery/orders/{order_id}/deliver"),
            agent_token.as_str(),
            "delivered",
        ),
    ];

    for (uri, token, expected_status) in steps {
        let response = app
            .clone()
            .oneshot(request("POST", &uri, Some(token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "step {uri} failed");
        let body = body_json(response).await;
        assert_eq!(body["status"], expected_status, "after {uri}");
    }

    // The confirmed payment stuck and the timestamps landed.
    let response = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/orders/{order_id}"),
            Some(ADMIN_TOKEN),
            None,
        ))
        .await
        .unwrap();
    let order = body_json(response).await;
    assert_eq!(order["payment_status"], "confirmed");
    assert_eq!(order["assignment"]["agent_id"], agent_id);
    assert!(order["picked_up_at"].is_string());
    assert!(order["delivered_at"].is_string());

    // A refetch of the agent's own orders still shows the delivered one.
    let response = app
        .clone()
        .oneshot(request("GET", "/delivery/orders", Some(&agent_token), None))
        .await
        .unwrap();
    let mine = body_json(response).await;
    assert!(
        mine.as_array()
            .unwrap()
            .iter()
            .any(|candidate| candidate["id"] == order_id.as_str())
    );

    // The agent is free again and got credit for the drop.
    let response = app
        .oneshot(request("GET", "/admin/agents", Some(ADMIN_TOKEN), None))
        .await
        .unwrap();
    let agents = body_json(response).await;
    let agent = agents
        .as_array()
        .unwrap()
        .iter()
        .find(|candidate| candidate["id"] == agent_id.as_str())
        .unwrap();
    assert_eq!(agent["status"], "available");
    assert_eq!(agent["total_deliveries"], 1);
}

#[tokio::test]
async fn pickup_on_pending_order_is_refused_without_mutation() {
    let (app, _state) = setup();
    let order = checkout(&app, Uuid::new_v4()).await;
    let order_id = order["id"].as_str().unwrap().to_string();
    let (_agent_id, agent_token) = onboard_agent(&app, "Riya").await;

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/delivery/orders/{order_id}/pickup"),
            Some(&agent_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(request(
            "GET",
            &format!("/orders/{order_id}"),
            Some(ADMIN_TOKEN),
            None,
        ))
        .await
        .unwrap();
    let after = body_json(response).await;
    assert_eq!(after, order);
}

#[tokio::test]
async fn concurrent_claims_yield_one_winner_and_one_conflict() {
    let (app, _state) = setup();
    let kitchen_id = Uuid::new_v4();
    let (order_id, _kitchen_token) = prepared_order(&app, kitchen_id).await;
    let (first_id, first_token) = onboard_agent(&app, "Riya").await;
    let (second_id, second_token) = onboard_agent(&app, "Tomas").await;

    let claim_uri = format!("/delivery/orders/{order_id}/claim");
    let (a, b) = tokio::join!(
        app.clone()
            .oneshot(request("POST", &claim_uri, Some(&first_token), None)),
        app.clone()
            .oneshot(request("POST", &claim_uri, Some(&second_token), None)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let statuses = [a.status(), b.status()];
    assert!(statuses.contains(&StatusCode::OK), "no claim succeeded");
    assert!(
        statuses.contains(&StatusCode::CONFLICT),
        "no claim was refused"
    );

    let winner_id = if a.status() == StatusCode::OK {
        &first_id
    } else {
        &second_id
    };

    let response = app
        .oneshot(request(
            "GET",
            &format!("/orders/{order_id}"),
            Some(ADMIN_TOKEN),
            None,
        ))
        .await
        .unwrap();
    let order = body_json(response).await;
    assert_eq!(order["status"], "assigned");
    assert_eq!(order["assignment"]["agent_id"], winner_id.as_str());
}

#[tokio::test]
async fn rejected_assignment_returns_to_the_claimable_pool() {
    let (app, _state) = setup();
    let kitchen_id = Uuid::new_v4();
    let (order_id, _kitchen_token) = prepared_order(&app, kitchen_id).await;
    let (_first_id, first_token) = onboard_agent(&app, "Riya").await;
    let (second_id, second_token) = onboard_agent(&app, "Tomas").await;

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/delivery/orders/{order_id}/claim"),
            Some(&first_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/delivery/orders/{order_id}/reject"),
            Some(&first_token),
            Some(json!({ "reason": "vehicle broke down" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let order = body_json(response).await;
    assert_eq!(order["status"], "prepared");
    assert!(order.get("assignment").is_none());

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/delivery/orders/available",
            Some(&second_token),
            None,
        ))
        .await
        .unwrap();
    let available = body_json(response).await;
    assert!(
        available
            .as_array()
            .unwrap()
            .iter()
            .any(|candidate| candidate["id"] == order_id.as_str())
    );

    let response = app
        .oneshot(request(
            "POST",
            &format!("/delivery/orders/{order_id}/claim"),
            Some(&second_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let order = body_json(response).await;
    assert_eq!(order["assignment"]["agent_id"], second_id.as_str());
}

#[tokio::test]
async fn kitchen_cannot_mutate_a_foreign_order() {
    let (app, _state) = setup();
    let order = checkout(&app, Uuid::new_v4()).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/admin/orders/{order_id}/confirm-payment"),
            Some(ADMIN_TOKEN),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let foreign_token = mint_kitchen_token(&app, Uuid::new_v4()).await;
    let response = app
        .oneshot(request(
            "POST",
            &format!("/partner/orders/{order_id}/accept"),
            Some(&foreign_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn events_fan_out_only_to_entitled_channels() {
    let (app, state) = setup();
    let kitchen_id = Uuid::new_v4();

    let (_admin_channel, mut admin_rx) = state.registry.register(Principal::Admin);
    let (_own_channel, mut own_rx) = state.registry.register(Principal::Kitchen { kitchen_id });
    let (_foreign_channel, mut foreign_rx) = state.registry.register(Principal::Kitchen {
        kitchen_id: Uuid::new_v4(),
    });

    let order = checkout(&app, kitchen_id).await;
    let order_id = order["id"].as_str().unwrap();

    let admin_event: Value = serde_json::from_str(&admin_rx.try_recv().unwrap()).unwrap();
    assert_eq!(admin_event["event_type"], "order_created");
    assert_eq!(admin_event["order"]["id"], order_id);

    let own_event: Value = serde_json::from_str(&own_rx.try_recv().unwrap()).unwrap();
    assert_eq!(own_event["order"]["kitchen_id"], kitchen_id.to_string());

    assert!(foreign_rx.try_recv().is_err());
}

#[tokio::test]
async fn agent_channel_receives_events_only_while_assigned() {
    let (app, state) = setup();
    let kitchen_id = Uuid::new_v4();
    let (agent_id, agent_token) = onboard_agent(&app, "Riya").await;
    let agent_uuid = Uuid::parse_str(&agent_id).unwrap();

    let (_channel, mut agent_rx) = state.registry.register(Principal::Agent {
        agent_id: agent_uuid,
    });

    let (order_id, _kitchen_token) = prepared_order(&app, kitchen_id).await;
    // Nothing so far concerns this agent.
    assert!(agent_rx.try_recv().is_err());

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/delivery/orders/{order_id}/claim"),
            Some(&agent_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let event: Value = serde_json::from_str(&agent_rx.try_recv().unwrap()).unwrap();
    assert_eq!(event["event_type"], "order_updated");
    assert_eq!(event["order"]["status"], "assigned");
    assert_eq!(event["order"]["assignment"]["agent_id"], agent_id.as_str());
}

#[tokio::test]
async fn deleted_order_is_gone() {
    let (app, _state) = setup();
    let order = checkout(&app, Uuid::new_v4()).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request(
            "DELETE",
            &format!("/admin/orders/{order_id}"),
            Some(ADMIN_TOKEN),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request(
            "GET",
            &format!("/orders/{order_id}"),
            Some(ADMIN_TOKEN),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
