use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::assignment::AssignmentCoordinator;
use crate::engine::transitions::{Trigger, classify_refusal};
use crate::error::AppError;
use crate::models::agent::{AgentStatus, DeliveryAgent};
use crate::models::event::OrderEventType;
use crate::models::order::{CustomerInfo, LineItem, Order, OrderStatus, PaymentStatus};
use crate::observability::metrics::Metrics;
use crate::realtime::router::EventRouter;
use crate::store::{
    AgentDirectory, AgentPatch, AgentPrecondition, OrderPatch, OrderPrecondition, OrderStore,
    UpdateOutcome,
};

#[derive(Debug, Deserialize)]
pub struct NewOrder {
    pub customer: CustomerInfo,
    pub items: Vec<LineItem>,
    pub kitchen_id: Uuid,
    #[serde(default)]
    pub delivery_fee: i64,
    #[serde(default)]
    pub discount: i64,
}

#[derive(Debug, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub rating: f64,
}

/// Executes every order mutation: validates the trigger against the
/// transition table, runs the conditional store write, and fans the
/// committed snapshot out. Nothing else writes order or agent rows.
#[derive(Clone)]
pub struct OrderWorkflow {
    orders: Arc<dyn OrderStore>,
    agents: Arc<dyn AgentDirectory>,
    coordinator: AssignmentCoordinator,
    router: EventRouter,
    metrics: Metrics,
}

impl OrderWorkflow {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        agents: Arc<dyn AgentDirectory>,
        router: EventRouter,
        metrics: Metrics,
    ) -> Self {
        let coordinator =
            AssignmentCoordinator::new(orders.clone(), agents.clone(), metrics.clone());
        Self {
            orders,
            agents,
            coordinator,
            router,
            metrics,
        }
    }

    /// Checkout: the one place an order comes into existence.
    pub async fn create_order(&self, new: NewOrder) -> Result<Order, AppError> {
        if new.customer.name.trim().is_empty()
            || new.customer.phone.trim().is_empty()
            || new.customer.address.trim().is_empty()
        {
            return Err(AppError::Validation(
                "customer name, phone and address are required".to_string(),
            ));
        }
        if new.items.is_empty() {
            return Err(AppError::Validation("order has no items".to_string()));
        }
        for item in &new.items {
            if item.name.trim().is_empty() || item.quantity == 0 || item.unit_price < 0 {
                return Err(AppError::Validation(format!(
                    "invalid line item {}",
                    item.id
                )));
            }
        }
        if new.delivery_fee < 0 || new.discount < 0 {
            return Err(AppError::Validation(
                "delivery fee and discount cannot be negative".to_string(),
            ));
        }

        let subtotal: i64 = new.items.iter().map(LineItem::line_total).sum();
        let total = subtotal + new.delivery_fee - new.discount;
        if total < 0 {
            return Err(AppError::Validation(
                "discount exceeds order value".to_string(),
            ));
        }

        let order = Order {
            id: Uuid::new_v4(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            customer: new.customer,
            items: new.items,
            subtotal,
            delivery_fee: new.delivery_fee,
            discount: new.discount,
            total,
            kitchen_id: new.kitchen_id,
            assignment: None,
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejection_reason: None,
            picked_up_at: None,
            delivered_at: None,
        };

        self.orders.insert(order.clone()).await?;
        info!(order_id = %order.id, kitchen_id = %order.kitchen_id, total = order.total, "order created");
        self.router.publish(OrderEventType::OrderCreated, &order);
        Ok(order)
    }

    /// Records what the payment rail reported without advancing the
    /// status; only payment confirmation moves the order forward.
    pub async fn record_payment(&self, order_id: Uuid) -> Result<Order, AppError> {
        let check = OrderPrecondition::status_in(&[OrderStatus::Pending]);
        let patch = OrderPatch {
            payment_status: Some(PaymentStatus::Paid),
            ..OrderPatch::default()
        };

        match self.orders.update_if(order_id, &check, patch).await? {
            UpdateOutcome::Applied(order) => {
                info!(order_id = %order_id, "payment recorded");
                self.router.publish(OrderEventType::OrderUpdated, &order);
                Ok(order)
            }
            UpdateOutcome::Rejected(current) => Err(AppError::illegal(
                format!("payment can only be recorded on a pending order {order_id}"),
                current.status,
            )),
        }
    }

    pub async fn confirm_payment(&self, order_id: Uuid) -> Result<Order, AppError> {
        let patch = OrderPatch {
            status: Some(OrderStatus::Confirmed),
            payment_status: Some(PaymentStatus::Confirmed),
            ..OrderPatch::default()
        };
        self.run_trigger(order_id, Trigger::ConfirmPayment, None, patch)
            .await
    }

    /// Admin approval rides the same pending→confirmed gate as payment
    /// confirmation and additionally stamps who approved.
    pub async fn approve(&self, order_id: Uuid) -> Result<Order, AppError> {
        let patch = OrderPatch {
            status: Some(OrderStatus::Confirmed),
            payment_status: Some(PaymentStatus::Confirmed),
            approved_by: Some("admin".to_string()),
            approved_at: Some(Utc::now()),
            ..OrderPatch::default()
        };
        self.run_trigger(order_id, Trigger::ConfirmPayment, None, patch)
            .await
    }

    pub async fn admin_reject(&self, order_id: Uuid, reason: &str) -> Result<Order, AppError> {
        let reason = require_reason(reason)?;
        let patch = OrderPatch {
            status: Some(OrderStatus::Rejected),
            rejected_by: Some("admin".to_string()),
            rejection_reason: Some(reason),
            ..OrderPatch::default()
        };
        self.run_trigger(order_id, Trigger::AdminReject, None, patch)
            .await
    }

    pub async fn kitchen_accept(&self, order_id: Uuid, kitchen_id: Uuid) -> Result<Order, AppError> {
        self.check_kitchen_owns(order_id, kitchen_id).await?;
        let patch = OrderPatch::status(OrderStatus::Preparing);
        self.run_trigger(order_id, Trigger::KitchenAccept, None, patch)
            .await
    }

    pub async fn kitchen_reject(
        &self,
        order_id: Uuid,
        kitchen_id: Uuid,
        reason: &str,
    ) -> Result<Order, AppError> {
        let reason = require_reason(reason)?;
        self.check_kitchen_owns(order_id, kitchen_id).await?;
        let patch = OrderPatch {
            status: Some(OrderStatus::Rejected),
            rejected_by: Some(kitchen_id.to_string()),
            rejection_reason: Some(reason),
            ..OrderPatch::default()
        };
        self.run_trigger(order_id, Trigger::KitchenReject, None, patch)
            .await
    }

    pub async fn kitchen_ready(&self, order_id: Uuid, kitchen_id: Uuid) -> Result<Order, AppError> {
        self.check_kitchen_owns(order_id, kitchen_id).await?;
        let patch = OrderPatch::status(OrderStatus::Prepared);
        self.run_trigger(order_id, Trigger::KitchenReady, None, patch)
            .await
    }

    /// Admin-directed assignment.
    pub async fn assign(&self, order_id: Uuid, agent_id: Uuid) -> Result<Order, AppError> {
        self.acquire(order_id, agent_id, "assign").await
    }

    /// Agent self-service claim; caller identity is the agent.
    pub async fn claim(&self, order_id: Uuid, agent_id: Uuid) -> Result<Order, AppError> {
        self.acquire(order_id, agent_id, "claim").await
    }

    async fn acquire(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
        entry_point: &'static str,
    ) -> Result<Order, AppError> {
        match self.coordinator.acquire(order_id, agent_id, entry_point).await {
            Ok(order) => {
                self.metrics.transition(Trigger::Assign.as_str(), "applied");
                self.router.publish(OrderEventType::OrderUpdated, &order);
                Ok(order)
            }
            Err(err) => {
                self.metrics.transition(Trigger::Assign.as_str(), "rejected");
                Err(err)
            }
        }
    }

    pub async fn agent_accept(&self, order_id: Uuid, agent_id: Uuid) -> Result<Order, AppError> {
        let patch = OrderPatch::status(OrderStatus::AcceptedByDelivery);
        self.run_trigger(order_id, Trigger::AgentAccept, Some(agent_id), patch)
            .await
    }

    pub async fn agent_reject(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
        reason: &str,
    ) -> Result<Order, AppError> {
        let reason = require_reason(reason)?;
        match self.coordinator.release(order_id, agent_id).await {
            Ok(order) => {
                self.metrics
                    .transition(Trigger::AgentReject.as_str(), "applied");
                info!(order_id = %order_id, agent_id = %agent_id, reason = %reason, "assignment rejected by agent");
                self.router.publish(OrderEventType::OrderUpdated, &order);
                Ok(order)
            }
            Err(err) => {
                self.metrics
                    .transition(Trigger::AgentReject.as_str(), "rejected");
                Err(err)
            }
        }
    }

    pub async fn pickup(&self, order_id: Uuid, agent_id: Uuid) -> Result<Order, AppError> {
        let patch = OrderPatch {
            status: Some(OrderStatus::OutForDelivery),
            picked_up_at: Some(Utc::now()),
            ..OrderPatch::default()
        };
        self.run_trigger(order_id, Trigger::Pickup, Some(agent_id), patch)
            .await
    }

    pub async fn deliver(&self, order_id: Uuid, agent_id: Uuid) -> Result<Order, AppError> {
        match self.coordinator.complete(order_id, agent_id).await {
            Ok(order) => {
                self.metrics.transition(Trigger::Deliver.as_str(), "applied");
                self.router.publish(OrderEventType::OrderUpdated, &order);
                Ok(order)
            }
            Err(err) => {
                self.metrics.transition(Trigger::Deliver.as_str(), "rejected");
                Err(err)
            }
        }
    }

    /// Maintenance removal, outside the normal lifecycle.
    pub async fn delete_order(&self, order_id: Uuid) -> Result<Order, AppError> {
        let order = self.orders.remove(order_id).await?;
        info!(order_id = %order_id, "order deleted");
        Ok(order)
    }

    pub async fn register_agent(&self, new: NewAgent) -> Result<DeliveryAgent, AppError> {
        if new.name.trim().is_empty() || new.phone.trim().is_empty() {
            return Err(AppError::Validation(
                "agent name and phone are required".to_string(),
            ));
        }

        let now = Utc::now();
        let agent = DeliveryAgent {
            id: Uuid::new_v4(),
            name: new.name,
            phone: new.phone,
            status: AgentStatus::Offline,
            is_active: true,
            total_deliveries: 0,
            rating: new.rating.clamp(0.0, 5.0),
            created_at: now,
            updated_at: now,
        };

        self.agents.insert(agent.clone()).await?;
        info!(agent_id = %agent.id, "agent registered");
        Ok(agent)
    }

    pub async fn set_agent_active(
        &self,
        agent_id: Uuid,
        is_active: bool,
    ) -> Result<DeliveryAgent, AppError> {
        let patch = AgentPatch {
            is_active: Some(is_active),
            ..AgentPatch::default()
        };
        // The empty precondition always holds.
        let (UpdateOutcome::Applied(agent) | UpdateOutcome::Rejected(agent)) = self
            .agents
            .update_if(agent_id, &AgentPrecondition::default(), patch)
            .await?;

        info!(agent_id = %agent_id, is_active, "agent active flag updated");
        Ok(agent)
    }

    /// Agent-driven availability toggle. `busy` belongs to the
    /// coordinator and cannot be set or left by hand.
    pub async fn set_agent_availability(
        &self,
        agent_id: Uuid,
        wanted: AgentStatus,
    ) -> Result<DeliveryAgent, AppError> {
        if wanted == AgentStatus::Busy {
            return Err(AppError::Validation(
                "busy is set by assignment, not by the agent".to_string(),
            ));
        }

        let current = self.agents.get(agent_id).await?;
        if current.status == AgentStatus::Busy {
            return Err(AppError::IllegalTransition(format!(
                "agent {agent_id} has an active delivery"
            )));
        }

        let check = AgentPrecondition {
            status: Some(current.status),
            require_active: false,
        };
        match self
            .agents
            .update_if(agent_id, &check, AgentPatch::status(wanted))
            .await?
        {
            UpdateOutcome::Applied(agent) => {
                info!(agent_id = %agent_id, status = %wanted, "agent availability updated");
                Ok(agent)
            }
            UpdateOutcome::Rejected(agent) => Err(AppError::IllegalTransition(format!(
                "agent {agent_id} changed state concurrently (now {})",
                agent.status
            ))),
        }
    }

    async fn check_kitchen_owns(&self, order_id: Uuid, kitchen_id: Uuid) -> Result<(), AppError> {
        let order = self.orders.get(order_id).await?;
        if order.kitchen_id != kitchen_id {
            return Err(AppError::Forbidden(format!(
                "order {order_id} belongs to another kitchen"
            )));
        }
        Ok(())
    }

    /// Single-write triggers: conditional update keyed on the trigger's
    /// source set (plus the caller guard for agent triggers), then
    /// fan-out of the committed snapshot.
    async fn run_trigger(
        &self,
        order_id: Uuid,
        trigger: Trigger,
        acting_agent: Option<Uuid>,
        patch: OrderPatch,
    ) -> Result<Order, AppError> {
        let mut check = trigger.precondition();
        if let Some(agent_id) = acting_agent {
            check = check.and_assigned_to(agent_id);
        }

        match self.orders.update_if(order_id, &check, patch).await? {
            UpdateOutcome::Applied(order) => {
                self.metrics.transition(trigger.as_str(), "applied");
                info!(order_id = %order_id, trigger = %trigger, status = %order.status, "order transitioned");
                self.router.publish(OrderEventType::OrderUpdated, &order);
                Ok(order)
            }
            UpdateOutcome::Rejected(current) => {
                self.metrics.transition(trigger.as_str(), "rejected");
                Err(classify_refusal(trigger, &check, &current))
            }
        }
    }
}

fn require_reason(reason: &str) -> Result<String, AppError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("a reason is required".to_string()));
    }
    Ok(trimmed.to_string())
}
