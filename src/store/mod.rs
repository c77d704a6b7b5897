pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::agent::{AgentStatus, DeliveryAgent};
use crate::models::order::{AssignmentInfo, Order, OrderStatus, PaymentStatus};

/// Result of a conditional update. `Applied` carries the row after the
/// patch; `Rejected` carries the row as it was when the precondition
/// failed, so the caller can classify the refusal.
#[derive(Debug, Clone)]
pub enum UpdateOutcome<T> {
    Applied(T),
    Rejected(T),
}

/// Expected prior state for an order write. Every status-changing write
/// goes through one of these, which is what linearizes concurrent
/// mutators on the same order.
#[derive(Debug, Clone, Default)]
pub struct OrderPrecondition {
    /// Current status must be one of these; empty accepts any status.
    pub status_any_of: Vec<OrderStatus>,
    /// No agent may currently be assigned.
    pub unassigned: bool,
    /// The currently assigned agent must be exactly this one.
    pub assigned_agent: Option<Uuid>,
}

impl OrderPrecondition {
    pub fn status_in(statuses: &[OrderStatus]) -> Self {
        Self {
            status_any_of: statuses.to_vec(),
            ..Self::default()
        }
    }

    pub fn and_unassigned(mut self) -> Self {
        self.unassigned = true;
        self
    }

    pub fn and_assigned_to(mut self, agent_id: Uuid) -> Self {
        self.assigned_agent = Some(agent_id);
        self
    }

    pub fn holds_for(&self, order: &Order) -> bool {
        if !self.status_any_of.is_empty() && !self.status_any_of.contains(&order.status) {
            return false;
        }
        if self.unassigned && order.assignment.is_some() {
            return false;
        }
        if let Some(agent_id) = self.assigned_agent {
            if order.assigned_agent_id() != Some(agent_id) {
                return false;
            }
        }
        true
    }
}

/// Field-level patch applied under the row lock once the precondition
/// holds. Double-`Option` fields distinguish "leave alone" from "clear".
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub assignment: Option<Option<AssignmentInfo>>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<Option<DateTime<Utc>>>,
}

impl OrderPatch {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(payment_status) = self.payment_status {
            order.payment_status = payment_status;
        }
        if let Some(assignment) = &self.assignment {
            order.assignment = assignment.clone();
        }
        if let Some(approved_by) = &self.approved_by {
            order.approved_by = Some(approved_by.clone());
        }
        if let Some(approved_at) = self.approved_at {
            order.approved_at = Some(approved_at);
        }
        if let Some(rejected_by) = &self.rejected_by {
            order.rejected_by = Some(rejected_by.clone());
        }
        if let Some(rejection_reason) = &self.rejection_reason {
            order.rejection_reason = Some(rejection_reason.clone());
        }
        if let Some(picked_up_at) = self.picked_up_at {
            order.picked_up_at = Some(picked_up_at);
        }
        if let Some(delivered_at) = self.delivered_at {
            order.delivered_at = delivered_at;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status_any_of: Option<Vec<OrderStatus>>,
    pub kitchen_id: Option<Uuid>,
    pub assigned_agent: Option<Uuid>,
    pub unassigned_only: bool,
}

impl OrderFilter {
    /// Orders a delivery agent may claim: ready at the kitchen side and
    /// not yet taken by anyone.
    pub fn available_for_claim() -> Self {
        Self {
            status_any_of: Some(vec![OrderStatus::Preparing, OrderStatus::Prepared]),
            unassigned_only: true,
            ..Self::default()
        }
    }

    pub fn for_kitchen(kitchen_id: Uuid) -> Self {
        Self {
            kitchen_id: Some(kitchen_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        if let Some(statuses) = &self.status_any_of {
            if !statuses.contains(&order.status) {
                return false;
            }
        }
        if let Some(kitchen_id) = self.kitchen_id {
            if order.kitchen_id != kitchen_id {
                return false;
            }
        }
        if let Some(agent_id) = self.assigned_agent {
            if order.assigned_agent_id() != Some(agent_id) {
                return false;
            }
        }
        if self.unassigned_only && order.assignment.is_some() {
            return false;
        }
        true
    }
}

/// Durable order record boundary. The conditional update is the engine's
/// linearization primitive: check and patch must be atomic per row.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: Order) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Order, AppError>;

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, AppError>;

    async fn update_if(
        &self,
        id: Uuid,
        check: &OrderPrecondition,
        patch: OrderPatch,
    ) -> Result<UpdateOutcome<Order>, AppError>;

    /// Administrative removal, outside the normal lifecycle.
    async fn remove(&self, id: Uuid) -> Result<Order, AppError>;
}

#[derive(Debug, Clone, Default)]
pub struct AgentPrecondition {
    pub status: Option<AgentStatus>,
    pub require_active: bool,
}

impl AgentPrecondition {
    pub fn available_and_active() -> Self {
        Self {
            status: Some(AgentStatus::Available),
            require_active: true,
        }
    }

    pub fn holds_for(&self, agent: &DeliveryAgent) -> bool {
        if let Some(status) = self.status {
            if agent.status != status {
                return false;
            }
        }
        if self.require_active && !agent.is_active {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub status: Option<AgentStatus>,
    pub is_active: Option<bool>,
    pub increment_deliveries: bool,
}

impl AgentPatch {
    pub fn status(status: AgentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply(&self, agent: &mut DeliveryAgent) {
        if let Some(status) = self.status {
            agent.status = status;
        }
        if let Some(is_active) = self.is_active {
            agent.is_active = is_active;
        }
        if self.increment_deliveries {
            agent.total_deliveries += 1;
        }
        agent.updated_at = Utc::now();
    }
}

/// Delivery agent directory: availability tracking with the same
/// conditional-update discipline as the order store.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn insert(&self, agent: DeliveryAgent) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<DeliveryAgent, AppError>;

    async fn list(&self) -> Result<Vec<DeliveryAgent>, AppError>;

    async fn update_if(
        &self,
        id: Uuid,
        check: &AgentPrecondition,
        patch: AgentPatch,
    ) -> Result<UpdateOutcome<DeliveryAgent>, AppError>;
}
