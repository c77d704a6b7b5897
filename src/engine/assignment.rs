use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::transitions::{Trigger, classify_refusal};
use crate::error::AppError;
use crate::models::agent::AgentStatus;
use crate::models::order::{AssignmentInfo, Order, OrderStatus};
use crate::observability::metrics::Metrics;
use crate::store::{
    AgentDirectory, AgentPatch, AgentPrecondition, OrderPatch, OrderPrecondition, OrderStore,
    UpdateOutcome,
};

/// Serializes delivery assignment. Admin `assign` and agent `claim` both
/// resolve to `acquire`; `release` and `complete` are the other paired
/// order+agent writes. The store offers single-row conditional updates
/// only, so each pair compensates the first write when the second fails.
#[derive(Clone)]
pub struct AssignmentCoordinator {
    orders: Arc<dyn OrderStore>,
    agents: Arc<dyn AgentDirectory>,
    metrics: Metrics,
}

impl AssignmentCoordinator {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        agents: Arc<dyn AgentDirectory>,
        metrics: Metrics,
    ) -> Self {
        Self {
            orders,
            agents,
            metrics,
        }
    }

    /// Atomically takes an unassigned, eligible order for the agent.
    /// Exactly one of N concurrent callers succeeds; the rest get an
    /// explicit rejection so their view can refresh.
    ///
    /// The agent's available→busy flip comes first: it is conditional on
    /// the agent being active and available, which both fails fast for
    /// ineligible agents and guarantees an agent holds at most one live
    /// order. The flip is undone when the order write is refused.
    pub async fn acquire(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
        entry_point: &'static str,
    ) -> Result<Order, AppError> {
        let agent = match self
            .agents
            .update_if(
                agent_id,
                &AgentPrecondition::available_and_active(),
                AgentPatch::status(AgentStatus::Busy),
            )
            .await?
        {
            UpdateOutcome::Applied(agent) => agent,
            UpdateOutcome::Rejected(agent) => {
                let reason = if !agent.is_active {
                    format!("agent {agent_id} is deactivated")
                } else {
                    format!("agent {agent_id} is {} and cannot take an order", agent.status)
                };
                return Err(AppError::IllegalTransition(reason));
            }
        };

        let check = Trigger::Assign.precondition();
        let patch = OrderPatch {
            status: Some(OrderStatus::Assigned),
            assignment: Some(Some(AssignmentInfo {
                agent_id,
                agent_name: agent.name.clone(),
                agent_phone: agent.phone.clone(),
                assigned_at: Utc::now(),
            })),
            ..OrderPatch::default()
        };

        let result = self.orders.update_if(order_id, &check, patch).await;
        let current = match result {
            Ok(UpdateOutcome::Applied(order)) => {
                info!(order_id = %order_id, agent_id = %agent_id, entry_point, "order assigned");
                return Ok(order);
            }
            Ok(UpdateOutcome::Rejected(current)) => current,
            Err(err) => {
                self.revert_agent_to_available(agent_id).await;
                return Err(err);
            }
        };

        // Lost the race or the order is not in an assignable state: undo
        // the busy flip before reporting the refusal.
        self.revert_agent_to_available(agent_id).await;
        self.metrics
            .assignment_conflicts_total
            .with_label_values(&[entry_point])
            .inc();

        Err(classify_refusal(Trigger::Assign, &check, &current))
    }

    /// Backs agent rejection of an assignment: the order returns to the
    /// claimable pool, then the agent becomes available again.
    pub async fn release(&self, order_id: Uuid, agent_id: Uuid) -> Result<Order, AppError> {
        let before = self.orders.get(order_id).await?;

        let check = Trigger::AgentReject.precondition().and_assigned_to(agent_id);
        let patch = OrderPatch {
            status: Some(OrderStatus::Prepared),
            assignment: Some(None),
            ..OrderPatch::default()
        };

        let order = match self.orders.update_if(order_id, &check, patch).await? {
            UpdateOutcome::Applied(order) => order,
            UpdateOutcome::Rejected(current) => {
                return Err(classify_refusal(Trigger::AgentReject, &check, &current));
            }
        };

        if let Err(err) = self
            .agents
            .update_if(
                agent_id,
                &AgentPrecondition::default(),
                AgentPatch::status(AgentStatus::Available),
            )
            .await
        {
            self.restore_assignment(&before, agent_id).await;
            return Err(err);
        }

        info!(order_id = %order_id, agent_id = %agent_id, "assignment released");
        Ok(order)
    }

    /// Backs delivery completion: the order is stamped delivered, then
    /// the agent is freed and credited.
    pub async fn complete(&self, order_id: Uuid, agent_id: Uuid) -> Result<Order, AppError> {
        let check = Trigger::Deliver.precondition().and_assigned_to(agent_id);
        let patch = OrderPatch {
            status: Some(OrderStatus::Delivered),
            delivered_at: Some(Some(Utc::now())),
            ..OrderPatch::default()
        };

        let order = match self.orders.update_if(order_id, &check, patch).await? {
            UpdateOutcome::Applied(order) => order,
            UpdateOutcome::Rejected(current) => {
                return Err(classify_refusal(Trigger::Deliver, &check, &current));
            }
        };

        let credit = AgentPatch {
            status: Some(AgentStatus::Available),
            increment_deliveries: true,
            ..AgentPatch::default()
        };
        if let Err(err) = self
            .agents
            .update_if(agent_id, &AgentPrecondition::default(), credit)
            .await
        {
            // Undo the delivered stamp so the pair is never half applied;
            // the caller retries the whole trigger.
            let undo = OrderPatch {
                status: Some(OrderStatus::OutForDelivery),
                delivered_at: Some(None),
                ..OrderPatch::default()
            };
            let undo_check = OrderPrecondition::status_in(&[OrderStatus::Delivered])
                .and_assigned_to(agent_id);
            if let Err(undo_err) = self.orders.update_if(order_id, &undo_check, undo).await {
                error!(
                    order_id = %order_id,
                    agent_id = %agent_id,
                    error = %undo_err,
                    "failed to undo delivered stamp after agent write failure"
                );
            }
            return Err(err);
        }

        info!(order_id = %order_id, agent_id = %agent_id, "order delivered");
        Ok(order)
    }

    async fn revert_agent_to_available(&self, agent_id: Uuid) {
        let revert = self
            .agents
            .update_if(
                agent_id,
                &AgentPrecondition {
                    status: Some(AgentStatus::Busy),
                    require_active: false,
                },
                AgentPatch::status(AgentStatus::Available),
            )
            .await;

        if let Err(err) = revert {
            error!(agent_id = %agent_id, error = %err, "failed to revert agent to available");
        }
    }

    /// Puts a released order back the way it was when the paired agent
    /// write failed. Conditional on nobody having re-claimed it since.
    async fn restore_assignment(&self, before: &Order, agent_id: Uuid) {
        let check = OrderPrecondition::status_in(&[OrderStatus::Prepared]).and_unassigned();
        let patch = OrderPatch {
            status: Some(before.status),
            assignment: Some(before.assignment.clone()),
            ..OrderPatch::default()
        };

        match self.orders.update_if(before.id, &check, patch).await {
            Ok(UpdateOutcome::Applied(_)) => {}
            Ok(UpdateOutcome::Rejected(_)) => {
                error!(order_id = %before.id, agent_id = %agent_id, "order re-claimed before compensation");
            }
            Err(err) => {
                error!(order_id = %before.id, error = %err, "failed to restore assignment");
            }
        }
    }
}
