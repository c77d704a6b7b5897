use std::sync::Arc;

use crate::auth::{Authenticator, StaticAuth};
use crate::config::Config;
use crate::engine::workflow::OrderWorkflow;
use crate::observability::metrics::Metrics;
use crate::realtime::registry::ConnectionRegistry;
use crate::realtime::router::EventRouter;
use crate::store::memory::InMemoryStore;
use crate::store::{AgentDirectory, OrderStore};

pub struct AppState {
    pub workflow: OrderWorkflow,
    pub orders: Arc<dyn OrderStore>,
    pub agents: Arc<dyn AgentDirectory>,
    pub auth: Arc<dyn Authenticator>,
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let orders: Arc<dyn OrderStore> = store.clone();
        let agents: Arc<dyn AgentDirectory> = store;

        let metrics = Metrics::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let router = EventRouter::new(registry.clone(), metrics.clone());
        let workflow = OrderWorkflow::new(orders.clone(), agents.clone(), router, metrics.clone());
        let auth = Arc::new(StaticAuth::with_admin_token(&config.admin_token));

        Self {
            workflow,
            orders,
            agents,
            auth,
            registry,
            metrics,
        }
    }
}
