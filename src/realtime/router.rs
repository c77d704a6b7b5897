use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::auth::Principal;
use crate::models::event::{OrderEvent, OrderEventType};
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::realtime::registry::ConnectionRegistry;

/// Whether a channel with this scope may observe this order. Admin sees
/// everything; a kitchen sees its own orders; an agent sees an order only
/// while assigned to it.
pub fn entitled(scope: &Principal, order: &Order) -> bool {
    match scope {
        Principal::Admin => true,
        Principal::Kitchen { kitchen_id } => order.kitchen_id == *kitchen_id,
        Principal::Agent { agent_id } => order.assigned_agent_id() == Some(*agent_id),
    }
}

/// Computes the addressee set for a committed mutation and delivers the
/// snapshot fire-and-forget. Failures never reach the mutation caller:
/// a closed channel is evicted and the client refetches on reconnect.
#[derive(Clone)]
pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
    metrics: Metrics,
}

impl EventRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Metrics) -> Self {
        Self { registry, metrics }
    }

    pub fn publish(&self, event_type: OrderEventType, order: &Order) {
        let event = OrderEvent {
            event_type,
            order: order.clone(),
        };
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, order_id = %order.id, "failed to serialize order event");
                return;
            }
        };

        let mut dead: Vec<Uuid> = Vec::new();
        for entry in self.registry.channels.iter() {
            let channel = entry.value();
            if !entitled(&channel.scope, order) {
                continue;
            }

            if channel.outbox.send(payload.clone()).is_ok() {
                self.metrics
                    .events_total
                    .with_label_values(&["delivered"])
                    .inc();
            } else {
                dead.push(*entry.key());
            }
        }

        for id in dead {
            if let Some(scope) = self.registry.deregister(id) {
                warn!(channel_id = %id, role = scope.role_label(), "evicting closed channel");
                self.metrics
                    .live_connections
                    .with_label_values(&[scope.role_label()])
                    .dec();
                self.metrics
                    .events_total
                    .with_label_values(&["evicted"])
                    .inc();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::order::{
        AssignmentInfo, CustomerInfo, LineItem, OrderStatus, PaymentStatus,
    };

    fn order(kitchen_id: Uuid, agent_id: Option<Uuid>) -> Order {
        Order {
            id: Uuid::new_v4(),
            status: if agent_id.is_some() {
                OrderStatus::Assigned
            } else {
                OrderStatus::Confirmed
            },
            payment_status: PaymentStatus::Confirmed,
            customer: CustomerInfo {
                name: "Ada".to_string(),
                phone: "+49100000000".to_string(),
                email: None,
                address: "1 Test Lane".to_string(),
            },
            items: vec![LineItem {
                id: Uuid::new_v4(),
                name: "Bowl".to_string(),
                unit_price: 900,
                quantity: 1,
            }],
            subtotal: 900,
            delivery_fee: 200,
            discount: 0,
            total: 1100,
            kitchen_id,
            assignment: agent_id.map(|agent_id| AssignmentInfo {
                agent_id,
                agent_name: "Riya".to_string(),
                agent_phone: "+49100000001".to_string(),
                assigned_at: Utc::now(),
            }),
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejection_reason: None,
            picked_up_at: None,
            delivered_at: None,
        }
    }

    #[test]
    fn admin_sees_every_order() {
        let subject = order(Uuid::new_v4(), None);
        assert!(entitled(&Principal::Admin, &subject));
    }

    #[test]
    fn kitchen_only_sees_its_own_orders() {
        let kitchen_id = Uuid::new_v4();
        let subject = order(kitchen_id, None);

        assert!(entitled(&Principal::Kitchen { kitchen_id }, &subject));
        assert!(!entitled(
            &Principal::Kitchen {
                kitchen_id: Uuid::new_v4()
            },
            &subject
        ));
    }

    #[test]
    fn agent_sees_an_order_only_while_assigned() {
        let agent_id = Uuid::new_v4();
        let unassigned = order(Uuid::new_v4(), None);
        let assigned = order(Uuid::new_v4(), Some(agent_id));

        assert!(!entitled(&Principal::Agent { agent_id }, &unassigned));
        assert!(entitled(&Principal::Agent { agent_id }, &assigned));
        assert!(!entitled(
            &Principal::Agent {
                agent_id: Uuid::new_v4()
            },
            &assigned
        ));
    }

    #[tokio::test]
    async fn publish_reaches_only_entitled_channels() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = EventRouter::new(registry.clone(), Metrics::new());

        let kitchen_id = Uuid::new_v4();
        let (_admin_id, mut admin_rx) = registry.register(Principal::Admin);
        let (_own_id, mut own_kitchen_rx) = registry.register(Principal::Kitchen { kitchen_id });
        let (_other_id, mut other_kitchen_rx) = registry.register(Principal::Kitchen {
            kitchen_id: Uuid::new_v4(),
        });

        router.publish(OrderEventType::OrderCreated, &order(kitchen_id, None));

        assert!(admin_rx.try_recv().is_ok());
        assert!(own_kitchen_rx.try_recv().is_ok());
        assert!(other_kitchen_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_is_evicted_on_publish() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = EventRouter::new(registry.clone(), Metrics::new());

        let (_id, rx) = registry.register(Principal::Admin);
        drop(rx);
        assert_eq!(registry.len(), 1);

        router.publish(OrderEventType::OrderUpdated, &order(Uuid::new_v4(), None));

        assert!(registry.is_empty());
    }
}
