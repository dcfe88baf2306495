//! Expiry sweep for jobs stuck in `running`.
//!
//! A dispatched workflow that never calls back would otherwise leave its job
//! running forever. The sweep fails such jobs through the same guarded
//! terminal update the callback uses, so a late callback racing the sweep
//! still cannot double-apply.

use crate::config::AppState;
use crate::job::events::JobEvent;
use crate::job::model::{Job, JobOutcome};

const SWEEP_INTERVAL_SECONDS: u64 = 30;

pub const TIMEOUT_MESSAGE: &str = "timed out waiting for the worker callback";

// Task that periodically fails running jobs that outlived the timeout
async fn job_timeout_checker(app_state: AppState) {
    let interval = tokio::time::Duration::from_secs(SWEEP_INTERVAL_SECONDS);
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        interval_timer.tick().await;

        if let Err(e) = sweep(&app_state).await {
            tracing::error!("Job expiry sweep failed: {e}");
        }
    }
}

async fn sweep(app_state: &AppState) -> eyre::Result<usize> {
    let timeout_seconds = app_state.config.job.timeout_seconds;
    let conn = &mut app_state.pool.get().await?;

    let expired_jobs = Job::find_expired(conn, timeout_seconds).await?;
    let mut failed = 0;

    for job in expired_jobs {
        let outcome = JobOutcome::Failed {
            error_message: TIMEOUT_MESSAGE.to_string(),
        };
        match Job::apply_outcome(conn, job.id, &outcome).await {
            Ok(Some(updated)) => {
                tracing::warn!(job_id = %job.id, "Expired job failed by watchdog");
                app_state.job_events.publish(JobEvent::from(&updated)).await;
                failed += 1;
            }
            // A callback landed between the scan and the update.
            Ok(None) => {}
            Err(e) => {
                tracing::error!(job_id = %job.id, "Failed to expire job: {e}");
            }
        }
    }

    Ok(failed)
}

// Start the job timeout checker task with the AppState
pub fn start_job_timeout_checker(app_state: AppState) {
    tokio::spawn(async move {
        job_timeout_checker(app_state).await;
    });
}
