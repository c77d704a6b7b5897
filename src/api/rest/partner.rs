use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::AppError;
use crate::models::order::Order;
use crate::state::AppState;
use crate::store::OrderFilter;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/partner/orders", get(list_orders))
        .route("/partner/orders/:id/accept", post(accept_order))
        .route("/partner/orders/:id/reject", post(reject_order))
        .route("/partner/orders/:id/ready", post(mark_prepared))
}

#[derive(Deserialize)]
struct RejectRequest {
    reason: String,
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<Order>>, AppError> {
    let kitchen_id = principal.require_kitchen()?;
    let orders = state
        .orders
        .list(&OrderFilter::for_kitchen(kitchen_id))
        .await?;
    Ok(Json(orders))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let kitchen_id = principal.require_kitchen()?;
    let order = state.workflow.kitchen_accept(id, kitchen_id).await?;
    Ok(Json(order))
}

async fn reject_order(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<Order>, AppError> {
    let kitchen_id = principal.require_kitchen()?;
    let order = state
        .workflow
        .kitchen_reject(id, kitchen_id, &payload.reason)
        .await?;
    Ok(Json(order))
}

async fn mark_prepared(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let kitchen_id = principal.require_kitchen()?;
    let order = state.workflow.kitchen_ready(id, kitchen_id).await?;
    Ok(Json(order))
}
