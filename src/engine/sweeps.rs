use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::config::SweepSchedule;
use crate::engine::{auto_assign, auto_release, notifier};
use crate::state::AppState;

/// Starts one ticker per sweep. Each run is stateless, so a slow run simply
/// delays that sweep's next tick.
pub fn spawn_sweeps(state: Arc<AppState>, schedule: &SweepSchedule) -> Vec<JoinHandle<()>> {
    if !schedule.enabled {
        info!("periodic sweeps disabled");
        return Vec::new();
    }

    let mut handles = Vec::new();
    handles.extend(spawn_every(
        "auto_assign",
        schedule.auto_assign_every,
        state.clone(),
        |state| async move {
            let _ = auto_assign::run(&state, None).await;
        },
    ));
    handles.extend(spawn_every(
        "auto_release",
        schedule.auto_release_every,
        state.clone(),
        |state| async move {
            let _ = auto_release::run(&state).await;
        },
    ));
    handles.extend(spawn_every(
        "notifications",
        schedule.notify_every,
        state,
        |state| async move {
            let _ = notifier::run(&state, None).await;
        },
    ));
    handles
}

fn spawn_every<F, Fut>(
    name: &'static str,
    period: Duration,
    state: Arc<AppState>,
    sweep: F,
) -> Option<JoinHandle<()>>
where
    F: Fn(Arc<AppState>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if period.is_zero() {
        warn!(sweep = name, "zero interval; sweep not scheduled");
        return None;
    }

    info!(sweep = name, every_secs = period.as_secs(), "sweep scheduled");
    Some(tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            sweep(state.clone()).await;
        }
    }))
}
