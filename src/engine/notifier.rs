//! Drains the assignment outbox into captain and operator emails.
//!
//! Delivery is at-least-once. An item is marked processed only after every
//! recipient accepted its message; any failure defers the whole item with a
//! growing backoff, and younger items keep flowing past it in the meantime.

use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::queue::retry_delay;
use crate::error::AppError;
use crate::mail::MailError;
use crate::mail::templates::{self, AssignmentContext, Message};
use crate::models::queue::AssignmentQueueItem;
use crate::state::AppState;

const SWEEP: &str = "notifications";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    /// Items left for a later drain after a delivery, lookup or store failure.
    pub failed: usize,
    /// Items another drain claimed first.
    pub skipped: usize,
}

enum Delivery {
    Sent(usize),
    /// The lead moved on since the item was queued; nothing to tell anyone.
    Superseded,
}

pub async fn drain_batch(
    state: &AppState,
    batch_size: usize,
    now: DateTime<Utc>,
) -> Result<DrainReport, AppError> {
    let stale_before = now - state.policy.queue_claim_ttl;
    let items = state
        .store
        .due_queue_items(batch_size, now, stale_before)
        .await?;
    let mut report = DrainReport::default();

    for item in items {
        match state.store.claim_queue_item(item.id, now, stale_before).await {
            Ok(true) => {}
            Ok(false) => {
                report.skipped += 1;
                continue;
            }
            Err(err) => {
                report.failed += 1;
                warn!(queue_item_id = %item.id, error = %err, "queue item claim failed");
                continue;
            }
        }

        match deliver(state, &item).await {
            Ok(delivery) => match state.store.mark_queue_processed(item.id, now).await {
                Ok(true) => {
                    report.processed += 1;
                    match delivery {
                        Delivery::Sent(sent) => {
                            debug!(queue_item_id = %item.id, sent, "queue item processed")
                        }
                        Delivery::Superseded => {
                            debug!(queue_item_id = %item.id, "lead changed hands; queue item dropped")
                        }
                    }
                }
                Ok(false) => report.skipped += 1,
                // The claim stays until it goes stale, then the item is resent.
                Err(err) => {
                    report.failed += 1;
                    warn!(queue_item_id = %item.id, error = %err, "delivered but not marked processed");
                }
            },
            Err(err) => {
                report.failed += 1;
                let retry_at = now + retry_delay(&state.policy, item.attempts);
                warn!(
                    queue_item_id = %item.id,
                    attempts = item.attempts.saturating_add(1),
                    retry_at = %retry_at,
                    error = %err,
                    "queue item deferred"
                );
                if let Err(defer_err) = state.store.defer_queue_item(item.id, retry_at).await {
                    warn!(queue_item_id = %item.id, error = %defer_err, "failed to defer queue item");
                }
            }
        }
    }

    match state.store.unprocessed_queue_len().await {
        Ok(pending) => state.metrics.notifications_pending.set(pending as i64),
        Err(err) => warn!(error = %err, "pending queue length unavailable"),
    }
    Ok(report)
}

/// Sends every message for the item.
async fn deliver(state: &AppState, item: &AssignmentQueueItem) -> Result<Delivery, AppError> {
    let store = &state.store;
    let still_lead = store
        .active_lead(item.journey_id, item.vehicle_id)
        .await?
        .is_some_and(|lead| lead.staff_id == item.staff_id);
    if !still_lead {
        return Ok(Delivery::Superseded);
    }

    let journey = store
        .journey(item.journey_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("journey {} not found", item.journey_id)))?;
    let vehicle = store
        .vehicle(item.vehicle_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("vehicle {} not found", item.vehicle_id)))?;
    let staff = store
        .staff(item.staff_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("staff {} not found", item.staff_id)))?;
    let operator = store.operator(journey.operator_id).await?.ok_or_else(|| {
        AppError::NotFound(format!("operator {} not found", journey.operator_id))
    })?;

    let ctx = AssignmentContext {
        journey: &journey,
        vehicle: &vehicle,
        staff: &staff,
        operator: &operator,
    };

    let mut outgoing: Vec<(String, Message)> = Vec::with_capacity(2);
    if let Some(to) = item
        .recipient_email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
    {
        outgoing.push((to.to_string(), templates::captain_assigned(&ctx)));
    }
    if let Some(to) = operator.contact_email() {
        outgoing.push((to.to_string(), templates::operator_assigned(&ctx)));
    }

    if outgoing.is_empty() {
        warn!(queue_item_id = %item.id, "no recipients resolved; nothing to send");
        return Ok(Delivery::Sent(0));
    }

    let attempts = outgoing.iter().map(|(to, message)| send_one(state, to, message));
    let results = join_all(attempts).await;

    let total = results.len();
    let failures: Vec<String> = results
        .into_iter()
        .filter_map(|result| result.err().map(|err| err.to_string()))
        .collect();

    if failures.is_empty() {
        Ok(Delivery::Sent(total))
    } else {
        Err(AppError::Internal(format!(
            "{} of {total} deliveries failed: {}",
            failures.len(),
            failures.join("; ")
        )))
    }
}

async fn send_one(state: &AppState, to: &str, message: &Message) -> Result<(), MailError> {
    let sent = tokio::time::timeout(
        state.policy.mail_timeout,
        state.mailer.send(to, &message.subject, &message.html),
    )
    .await
    .unwrap_or_else(|_| Err(MailError::Timeout { to: to.to_string() }));

    let outcome = match &sent {
        Ok(()) => "ok",
        Err(MailError::Timeout { .. }) => "timeout",
        Err(_) => "error",
    };
    state.metrics.deliveries_total.with_label_values(&[outcome]).inc();
    sent
}

/// Entry point for the scheduler and the HTTP trigger.
pub async fn run(state: &AppState, batch_size: Option<usize>) -> Result<DrainReport, AppError> {
    let batch_size = batch_size.unwrap_or(state.policy.queue_batch_size).max(1);
    let start = Instant::now();
    let result = drain_batch(state, batch_size, Utc::now()).await;
    state
        .metrics
        .sweep_duration_seconds
        .with_label_values(&[SWEEP])
        .observe(start.elapsed().as_secs_f64());

    match &result {
        Ok(report) => {
            state.metrics.record_sweep_items(SWEEP, "processed", report.processed);
            state.metrics.record_sweep_items(SWEEP, "failed", report.failed);
            state.metrics.record_sweep_items(SWEEP, "skipped", report.skipped);
            if report.processed + report.failed + report.skipped > 0 {
                info!(
                    processed = report.processed,
                    failed = report.failed,
                    skipped = report.skipped,
                    "notification drain finished"
                );
            }
        }
        Err(err) => warn!(error = %err, "notification drain aborted"),
    }
    result
}
