//! Cron scheduler.
//!
//! One tick per minute, leader-only. With a cluster the loop blocks on the
//! `cron-scheduler` lock before ticking and re-checks leadership on every
//! tick; a departed leader simply stops ticking and the next peer picks
//! up. Without a cluster the scheduler runs locally.

pub mod cron;

use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde_json::json;

use crate::domain::RunSource;
use crate::workflow::spawn_run;
use crate::AppState;
use cron::CronExpression;

/// Name of the cluster lock gating the tick loop.
pub const SCHEDULER_LOCK: &str = "cron-scheduler";

/// Run the scheduler until the process exits.
pub async fn run(state: AppState) {
    if let Some(ref cluster) = state.cluster {
        cluster.acquire_lock(SCHEDULER_LOCK).await;
    }
    tracing::info!("cron scheduler started");

    loop {
        tokio::time::sleep(until_next_minute()).await;

        if let Some(ref cluster) = state.cluster {
            if !cluster.is_leader() {
                tracing::info!("lost scheduler leadership, waiting to reacquire");
                cluster.acquire_lock(SCHEDULER_LOCK).await;
                continue;
            }
        }

        tick(&state, Local::now()).await;
    }
}

/// Evaluate every enabled cron trigger against the current minute and
/// dispatch matching workflows.
pub async fn tick(state: &AppState, now: DateTime<Local>) {
    let triggers = match state.store.list_enabled_cron_triggers().await {
        Ok(triggers) => triggers,
        Err(err) => {
            tracing::error!(error = %err, "failed to list cron triggers");
            return;
        }
    };

    for trigger in triggers {
        let Some(schedule) = trigger.schedule() else {
            tracing::warn!(trigger_id = %trigger.id, "cron trigger has no schedule");
            continue;
        };
        let expression = match CronExpression::parse(schedule) {
            Ok(expression) => expression,
            Err(err) => {
                tracing::warn!(
                    trigger_id = %trigger.id,
                    schedule = %schedule,
                    error = %err,
                    "invalid cron schedule"
                );
                continue;
            }
        };
        if !expression.matches(&now) {
            continue;
        }

        let workflow = match state.store.get_workflow(&trigger.workflow_id).await {
            Ok(Some(workflow)) if workflow.enabled => workflow,
            Ok(_) => {
                tracing::warn!(
                    trigger_id = %trigger.id,
                    workflow_id = %trigger.workflow_id,
                    "cron trigger points at a missing or disabled workflow"
                );
                continue;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to load workflow for cron trigger");
                continue;
            }
        };

        let input = json!({
            "trigger_type": "cron",
            "trigger_id": trigger.id,
            "triggered_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "schedule": schedule,
        });

        let (run_id, _) = spawn_run(state, &workflow, input, RunSource::Cron, false);
        tracing::info!(
            trigger_id = %trigger.id,
            workflow_id = %workflow.id,
            run_id = %run_id,
            "cron trigger fired"
        );
    }
}

/// Sleep duration to the next minute boundary.
fn until_next_minute() -> std::time::Duration {
    let into_minute = (Utc::now().timestamp().rem_euclid(60)) as u64;
    std::time::Duration::from_secs(60 - into_minute)
}
