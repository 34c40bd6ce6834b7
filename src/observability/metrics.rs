use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub sweep_items_total: IntCounterVec,
    pub sweep_duration_seconds: HistogramVec,
    pub notifications_pending: IntGauge,
    pub deliveries_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "transitions_total",
                "Assignment state transitions by transition and outcome",
            ),
            &["transition", "outcome"],
        )
        .expect("valid transitions_total metric");

        let sweep_items_total = IntCounterVec::new(
            Opts::new("sweep_items_total", "Items handled by periodic sweeps"),
            &["sweep", "outcome"],
        )
        .expect("valid sweep_items_total metric");

        let sweep_duration_seconds = HistogramVec::new(
            HistogramOpts::new("sweep_duration_seconds", "Duration of one sweep run in seconds"),
            &["sweep"],
        )
        .expect("valid sweep_duration_seconds metric");

        let notifications_pending = IntGauge::new(
            "notifications_pending",
            "Unprocessed notification queue items seen by the last drain",
        )
        .expect("valid notifications_pending metric");

        let deliveries_total = IntCounterVec::new(
            Opts::new("deliveries_total", "Email delivery attempts by outcome"),
            &["outcome"],
        )
        .expect("valid deliveries_total metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(sweep_items_total.clone()))
            .expect("register sweep_items_total");
        registry
            .register(Box::new(sweep_duration_seconds.clone()))
            .expect("register sweep_duration_seconds");
        registry
            .register(Box::new(notifications_pending.clone()))
            .expect("register notifications_pending");
        registry
            .register(Box::new(deliveries_total.clone()))
            .expect("register deliveries_total");

        Self {
            registry,
            transitions_total,
            sweep_items_total,
            sweep_duration_seconds,
            notifications_pending,
            deliveries_total,
        }
    }

    pub fn record_transition(&self, transition: &str, outcome: &str) {
        self.transitions_total
            .with_label_values(&[transition, outcome])
            .inc();
    }

    pub fn record_sweep_items(&self, sweep: &str, outcome: &str, count: usize) {
        self.sweep_items_total
            .with_label_values(&[sweep, outcome])
            .inc_by(count as u64);
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
