use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::AppError;
use crate::models::agent::{AgentStatus, DeliveryAgent};
use crate::models::order::Order;
use crate::state::AppState;
use crate::store::OrderFilter;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/delivery/orders", get(list_my_orders))
        .route("/delivery/orders/available", get(list_available_orders))
        .route("/delivery/orders/:id/claim", post(claim))
        .route("/delivery/orders/:id/accept", post(accept_assignment))
        .route("/delivery/orders/:id/reject", post(reject_assignment))
        .route("/delivery/orders/:id/pickup", post(mark_picked_up))
        .route("/delivery/orders/:id/deliver", post(mark_delivered))
        .route("/delivery/status", patch(set_availability))
}

#[derive(Deserialize)]
struct RejectRequest {
    reason: String,
}

#[derive(Deserialize)]
struct AvailabilityRequest {
    status: AgentStatus,
}

/// Full-state refetch for a reconnecting agent: everything currently
/// assigned to the caller.
async fn list_my_orders(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<Order>>, AppError> {
    let agent_id = principal.require_agent()?;
    let filter = OrderFilter {
        assigned_agent: Some(agent_id),
        ..OrderFilter::default()
    };
    let orders = state.orders.list(&filter).await?;
    Ok(Json(orders))
}

/// The pool every idle agent polls: ready at the kitchen and unclaimed.
async fn list_available_orders(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<Order>>, AppError> {
    principal.require_agent()?;
    let orders = state
        .orders
        .list(&OrderFilter::available_for_claim())
        .await?;
    Ok(Json(orders))
}

async fn claim(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let agent_id = principal.require_agent()?;
    let order = state.workflow.claim(id, agent_id).await?;
    Ok(Json(order))
}

async fn accept_assignment(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let agent_id = principal.require_agent()?;
    let order = state.workflow.agent_accept(id, agent_id).await?;
    Ok(Json(order))
}

async fn reject_assignment(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<Order>, AppError> {
    let agent_id = principal.require_agent()?;
    let order = state
        .workflow
        .agent_reject(id, agent_id, &payload.reason)
        .await?;
    Ok(Json(order))
}

async fn mark_picked_up(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let agent_id = principal.require_agent()?;
    let order = state.workflow.pickup(id, agent_id).await?;
    Ok(Json(order))
}

async fn mark_delivered(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let agent_id = principal.require_agent()?;
    let order = state.workflow.deliver(id, agent_id).await?;
    Ok(Json(order))
}

async fn set_availability(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<AvailabilityRequest>,
) -> Result<Json<DeliveryAgent>, AppError> {
    let agent_id = principal.require_agent()?;
    let agent = state
        .workflow
        .set_agent_availability(agent_id, payload.status)
        .await?;
    Ok(Json(agent))
}
