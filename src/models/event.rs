use serde::{Deserialize, Serialize};

use crate::models::order::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventType {
    OrderCreated,
    OrderUpdated,
}

/// The payload pushed to every live channel entitled to see the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub event_type: OrderEventType,
    pub order: Order,
}
