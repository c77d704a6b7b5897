use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::agent::DeliveryAgent;
use crate::models::order::Order;
use crate::store::{
    AgentDirectory, AgentPatch, AgentPrecondition, OrderFilter, OrderPatch, OrderPrecondition,
    OrderStore, UpdateOutcome,
};

/// In-process reference implementation of both persistence contracts.
/// Conditional updates check and patch while holding the row's map entry,
/// which makes each row's writes linearizable.
#[derive(Default)]
pub struct InMemoryStore {
    orders: DashMap<Uuid, Order>,
    agents: DashMap<Uuid, DeliveryAgent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert(&self, order: Order) -> Result<(), AppError> {
        self.orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Order, AppError> {
        self.orders
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, AppError> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        orders.sort_by_key(|order| order.created_at);
        Ok(orders)
    }

    async fn update_if(
        &self,
        id: Uuid,
        check: &OrderPrecondition,
        patch: OrderPatch,
    ) -> Result<UpdateOutcome<Order>, AppError> {
        let mut entry = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

        if !check.holds_for(entry.value()) {
            return Ok(UpdateOutcome::Rejected(entry.value().clone()));
        }

        patch.apply(entry.value_mut());
        Ok(UpdateOutcome::Applied(entry.value().clone()))
    }

    async fn remove(&self, id: Uuid) -> Result<Order, AppError> {
        self.orders
            .remove(&id)
            .map(|(_, order)| order)
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
    }
}

#[async_trait]
impl AgentDirectory for InMemoryStore {
    async fn insert(&self, agent: DeliveryAgent) -> Result<(), AppError> {
        self.agents.insert(agent.id, agent);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<DeliveryAgent, AppError> {
        self.agents
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("agent {id} not found")))
    }

    async fn list(&self) -> Result<Vec<DeliveryAgent>, AppError> {
        let mut agents: Vec<DeliveryAgent> = self
            .agents
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        agents.sort_by_key(|agent| agent.created_at);
        Ok(agents)
    }

    async fn update_if(
        &self,
        id: Uuid,
        check: &AgentPrecondition,
        patch: AgentPatch,
    ) -> Result<UpdateOutcome<DeliveryAgent>, AppError> {
        let mut entry = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("agent {id} not found")))?;

        if !check.holds_for(entry.value()) {
            return Ok(UpdateOutcome::Rejected(entry.value().clone()));
        }

        patch.apply(entry.value_mut());
        Ok(UpdateOutcome::Applied(entry.value().clone()))
    }
}
