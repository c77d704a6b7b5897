use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::store::OrderPrecondition;

/// Status-changing triggers and their allowed source states. Keeping the
/// table in one place means every handler enforces the same source-set
/// rule through the store's conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ConfirmPayment,
    AdminReject,
    KitchenAccept,
    KitchenReject,
    KitchenReady,
    Assign,
    AgentAccept,
    AgentReject,
    Pickup,
    Deliver,
}

impl Trigger {
    pub fn sources(&self) -> &'static [OrderStatus] {
        match self {
            Trigger::ConfirmPayment => &[OrderStatus::Pending],
            Trigger::AdminReject => &[OrderStatus::Pending, OrderStatus::Confirmed],
            Trigger::KitchenAccept => &[OrderStatus::Confirmed],
            Trigger::KitchenReject => &[OrderStatus::Confirmed],
            Trigger::KitchenReady => &[OrderStatus::Preparing],
            Trigger::Assign => &[
                OrderStatus::Confirmed,
                OrderStatus::Preparing,
                OrderStatus::Prepared,
            ],
            Trigger::AgentAccept => &[OrderStatus::Assigned, OrderStatus::Prepared],
            Trigger::AgentReject => &[OrderStatus::Assigned, OrderStatus::AcceptedByDelivery],
            Trigger::Pickup => &[OrderStatus::AcceptedByDelivery],
            Trigger::Deliver => &[OrderStatus::OutForDelivery],
        }
    }

    pub fn target(&self) -> OrderStatus {
        match self {
            Trigger::ConfirmPayment => OrderStatus::Confirmed,
            Trigger::AdminReject => OrderStatus::Rejected,
            Trigger::KitchenAccept => OrderStatus::Preparing,
            Trigger::KitchenReject => OrderStatus::Rejected,
            Trigger::KitchenReady => OrderStatus::Prepared,
            Trigger::Assign => OrderStatus::Assigned,
            Trigger::AgentAccept => OrderStatus::AcceptedByDelivery,
            // Rejecting an assignment puts the order back in the claimable
            // pool.
            Trigger::AgentReject => OrderStatus::Prepared,
            Trigger::Pickup => OrderStatus::OutForDelivery,
            Trigger::Deliver => OrderStatus::Delivered,
        }
    }

    /// Base precondition for this trigger; callers add the assignment
    /// guard where the trigger demands caller identity.
    pub fn precondition(&self) -> OrderPrecondition {
        let check = OrderPrecondition::status_in(self.sources());
        match self {
            Trigger::Assign => check.and_unassigned(),
            _ => check,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::ConfirmPayment => "confirm_payment",
            Trigger::AdminReject => "admin_reject",
            Trigger::KitchenAccept => "kitchen_accept",
            Trigger::KitchenReject => "kitchen_reject",
            Trigger::KitchenReady => "kitchen_ready",
            Trigger::Assign => "assign",
            Trigger::AgentAccept => "agent_accept",
            Trigger::AgentReject => "agent_reject",
            Trigger::Pickup => "pickup",
            Trigger::Deliver => "deliver",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turns a refused conditional write into the error the caller should
/// see: wrong status is an illegal transition (the race loser's case
/// included), a failed assignment guard is an authorization failure.
pub fn classify_refusal(trigger: Trigger, check: &OrderPrecondition, current: &Order) -> AppError {
    if !check.status_any_of.is_empty() && !check.status_any_of.contains(&current.status) {
        return AppError::illegal(
            format!("cannot {trigger} order {}", current.id),
            current.status,
        );
    }
    if check.unassigned && current.assignment.is_some() {
        return AppError::illegal(
            format!("order {} is already assigned", current.id),
            current.status,
        );
    }
    if let Some(agent_id) = check.assigned_agent {
        if current.assigned_agent_id() != Some(agent_id) {
            return AppError::Forbidden(format!(
                "agent {agent_id} is not assigned to order {}",
                current.id
            ));
        }
    }
    AppError::illegal(
        format!("cannot {trigger} order {}", current.id),
        current.status,
    )
}
