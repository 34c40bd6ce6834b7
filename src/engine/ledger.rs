use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::FairUseWindow;
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::ledger::FairUseLedgerEntry;
use crate::store::Datastore;

/// Confirmed assignments held by `staff_id` inside the operator's window.
pub async fn recent_load(
    store: &dyn Datastore,
    operator_id: Uuid,
    staff_id: Uuid,
    window: FairUseWindow,
    now: DateTime<Utc>,
) -> Result<u32, AppError> {
    let loads = recent_loads(store, operator_id, window, now).await?;
    Ok(loads.get(&staff_id).copied().unwrap_or(0))
}

/// [`recent_load`] for every staff member of the operator in one read.
pub async fn recent_loads(
    store: &dyn Datastore,
    operator_id: Uuid,
    window: FairUseWindow,
    now: DateTime<Utc>,
) -> Result<HashMap<Uuid, u32>, AppError> {
    let entries = store.operator_ledger(operator_id).await?;
    Ok(tally(&entries, window, now))
}

pub fn tally(
    entries: &[FairUseLedgerEntry],
    window: FairUseWindow,
    now: DateTime<Utc>,
) -> HashMap<Uuid, u32> {
    let mut confirmed: Vec<&FairUseLedgerEntry> = entries.iter().filter(|e| e.confirmed).collect();

    let counted: Vec<&FairUseLedgerEntry> = match window {
        FairUseWindow::Days(days) => {
            // A window reaching past the representable range has no lower bound.
            let since = Duration::try_days(i64::from(days)).and_then(|d| now.checked_sub_signed(d));
            confirmed
                .into_iter()
                .filter(|e| since.is_none_or(|since| e.recorded_at >= since) && e.recorded_at <= now)
                .collect()
        }
        FairUseWindow::LastAssignments(n) => {
            confirmed.retain(|e| e.recorded_at <= now);
            confirmed.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then(b.id.cmp(&a.id)));
            confirmed.truncate(n as usize);
            confirmed
        }
    };

    let mut loads = HashMap::new();
    for entry in counted {
        *loads.entry(entry.staff_id).or_insert(0u32) += 1;
    }
    loads
}

/// The ledger row a confirmation of `assignment` writes.
pub fn confirmation_entry(
    operator_id: Uuid,
    assignment: &Assignment,
    now: DateTime<Utc>,
) -> FairUseLedgerEntry {
    FairUseLedgerEntry {
        id: Uuid::new_v4(),
        operator_id,
        staff_id: assignment.staff_id,
        vehicle_id: assignment.vehicle_id,
        journey_id: assignment.journey_id,
        confirmed: true,
        recorded_at: now,
    }
}

/// Clears the confirmed flag after a confirmed assignment is taken away.
pub async fn revoke_confirmation(store: &dyn Datastore, assignment: &Assignment) -> Result<(), AppError> {
    let Some(entry) = store
        .ledger_entry_for(assignment.journey_id, assignment.vehicle_id, assignment.staff_id)
        .await?
    else {
        return Ok(());
    };

    if entry.confirmed {
        store.set_ledger_confirmed(entry.id, false).await?;
        debug!(entry_id = %entry.id, staff_id = %entry.staff_id, "ledger confirmation revoked");
    }
    Ok(())
}
