use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::auth::Principal;
use crate::engine::workflow::NewOrder;
use crate::error::AppError;
use crate::models::order::Order;
use crate::realtime::router::entitled;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
}

/// Checkout. Customer identity is vouched for upstream; the engine only
/// records the snapshot and opens the workflow at pending/pending.
async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewOrder>,
) -> Result<Json<Order>, AppError> {
    let order = state.workflow.create_order(payload).await?;
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state.orders.get(id).await?;
    if !entitled(&principal, &order) {
        return Err(AppError::Forbidden(format!(
            "not entitled to view order {id}"
        )));
    }
    Ok(Json(order))
}
