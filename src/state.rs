use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::config::Policy;
use crate::mail::Mailer;
use crate::models::assignment::{Assignment, AssignmentChange, AssignmentEvent};
use crate::observability::metrics::Metrics;
use crate::store::Datastore;

/// Request-scoped handles shared by the HTTP layer and the sweeps. Holds no
/// assignment state of its own; everything lives in the datastore.
pub struct AppState {
    pub store: Arc<dyn Datastore>,
    pub mailer: Arc<dyn Mailer>,
    pub policy: Policy,
    pub assignment_events_tx: broadcast::Sender<AssignmentEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Datastore>,
        mailer: Arc<dyn Mailer>,
        policy: Policy,
        event_buffer_size: usize,
    ) -> Self {
        let (assignment_events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            store,
            mailer,
            policy,
            assignment_events_tx,
            metrics: Metrics::new(),
        }
    }

    pub fn publish(&self, change: AssignmentChange, assignment: &Assignment) {
        let _ = self.assignment_events_tx.send(AssignmentEvent {
            change,
            assignment: assignment.clone(),
            at: Utc::now(),
        });
    }
}
