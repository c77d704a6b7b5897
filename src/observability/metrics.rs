use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub assignment_conflicts_total: IntCounterVec,
    pub live_connections: IntGaugeVec,
    pub events_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "order_transitions_total",
                "Order state machine triggers by outcome",
            ),
            &["trigger", "outcome"],
        )
        .expect("valid order_transitions_total metric");

        let assignment_conflicts_total = IntCounterVec::new(
            Opts::new(
                "assignment_conflicts_total",
                "Assignment attempts refused because the order was already taken or ineligible",
            ),
            &["entry_point"],
        )
        .expect("valid assignment_conflicts_total metric");

        let live_connections = IntGaugeVec::new(
            Opts::new("live_connections", "Registered realtime channels by role"),
            &["role"],
        )
        .expect("valid live_connections metric");

        let events_total = IntCounterVec::new(
            Opts::new(
                "realtime_events_total",
                "Fan-out deliveries and evictions of broken channels",
            ),
            &["result"],
        )
        .expect("valid realtime_events_total metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(assignment_conflicts_total.clone()))
            .expect("register assignment_conflicts_total");
        registry
            .register(Box::new(live_connections.clone()))
            .expect("register live_connections");
        registry
            .register(Box::new(events_total.clone()))
            .expect("register realtime_events_total");

        Self {
            registry,
            transitions_total,
            assignment_conflicts_total,
            live_connections,
            events_total,
        }
    }

    pub fn transition(&self, trigger: &str, outcome: &str) {
        self.transitions_total
            .with_label_values(&[trigger, outcome])
            .inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
