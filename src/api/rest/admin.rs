use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Principal;
use crate::engine::workflow::NewAgent;
use crate::error::AppError;
use crate::models::agent::DeliveryAgent;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;
use crate::store::OrderFilter;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/orders", get(list_orders))
        .route("/admin/orders/:id", delete(delete_order))
        .route("/admin/orders/:id/confirm-payment", post(confirm_payment))
        .route("/admin/orders/:id/approve", post(approve))
        .route("/admin/orders/:id/reject", post(reject))
        .route("/admin/orders/:id/assign", post(assign))
        .route("/admin/orders/:id/payment", post(record_payment))
        .route("/admin/agents", post(create_agent).get(list_agents))
        .route("/admin/agents/:id/active", patch(set_agent_active))
        .route("/admin/kitchens/:id/token", post(mint_kitchen_token))
}

#[derive(Deserialize)]
struct ListOrdersQuery {
    status: Option<OrderStatus>,
}

#[derive(Deserialize)]
struct RejectRequest {
    reason: String,
}

#[derive(Deserialize)]
struct AssignRequest {
    agent_id: Uuid,
}

#[derive(Deserialize)]
struct SetActiveRequest {
    is_active: bool,
}

/// Agent onboarding response: the record plus the channel credential the
/// auth collaborator minted for it.
#[derive(Serialize)]
struct OnboardedAgent {
    agent: DeliveryAgent,
    token: String,
}

#[derive(Serialize)]
struct MintedToken {
    token: String,
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    principal.require_admin()?;

    let filter = OrderFilter {
        status_any_of: query.status.map(|status| vec![status]),
        ..OrderFilter::default()
    };
    let orders = state.orders.list(&filter).await?;
    Ok(Json(orders))
}

async fn delete_order(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    principal.require_admin()?;
    let order = state.workflow.delete_order(id).await?;
    Ok(Json(order))
}

async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    principal.require_admin()?;
    let order = state.workflow.confirm_payment(id).await?;
    Ok(Json(order))
}

async fn approve(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    principal.require_admin()?;
    let order = state.workflow.approve(id).await?;
    Ok(Json(order))
}

async fn reject(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<Order>, AppError> {
    principal.require_admin()?;
    let order = state.workflow.admin_reject(id, &payload.reason).await?;
    Ok(Json(order))
}

async fn assign(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Order>, AppError> {
    principal.require_admin()?;
    let order = state.workflow.assign(id, payload.agent_id).await?;
    Ok(Json(order))
}

async fn record_payment(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    principal.require_admin()?;
    let order = state.workflow.record_payment(id).await?;
    Ok(Json(order))
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<NewAgent>,
) -> Result<Json<OnboardedAgent>, AppError> {
    principal.require_admin()?;

    let agent = state.workflow.register_agent(payload).await?;
    let token = state
        .auth
        .issue(Principal::Agent { agent_id: agent.id })
        .await?;

    Ok(Json(OnboardedAgent { agent, token }))
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<DeliveryAgent>>, AppError> {
    principal.require_admin()?;
    let agents = state.agents.list().await?;
    Ok(Json(agents))
}

async fn set_agent_active(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<Json<DeliveryAgent>, AppError> {
    principal.require_admin()?;
    let agent = state.workflow.set_agent_active(id, payload.is_active).await?;
    Ok(Json(agent))
}

async fn mint_kitchen_token(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<MintedToken>, AppError> {
    principal.require_admin()?;
    let token = state
        .auth
        .issue(Principal::Kitchen { kitchen_id: id })
        .await?;
    Ok(Json(MintedToken { token }))
}
