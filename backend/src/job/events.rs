//! In-process job status change fan-out.
//!
//! Per-job broadcast channels feed the WebSocket event stream. Publishers are
//! the submission handler, the dispatch task, the completion callback and the
//! watchdog; subscribers are read-only and cannot affect the state machine.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::job::model::{Job, JobStatus};

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, serde::Serialize, ToSchema)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub branch_name: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_url: Option<String>,
    pub error_message: Option<String>,
}

impl From<&Job> for JobEvent {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            branch_name: job.branch_name.clone(),
            pr_number: job.pr_number,
            pr_url: job.pr_url.clone(),
            error_message: job.error_message.clone(),
        }
    }
}

// Shared state mapping job ids to their status-change channels
#[derive(Clone)]
pub struct JobEvents {
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<JobEvent>>>>,
}

impl JobEvents {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe to a job's status changes, creating the channel on first use.
    pub async fn subscribe(&self, job_id: Uuid) -> broadcast::Receiver<JobEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish a status change. A terminal event also drops the channel; no
    /// further events can follow it.
    pub async fn publish(&self, event: JobEvent) {
        let mut channels = self.channels.write().await;
        let terminal = event.status.is_terminal();
        if let Some(tx) = channels.get(&event.job_id) {
            // Send errors just mean nobody is subscribed right now.
            let _ = tx.send(event.clone());
        }
        if terminal {
            channels.remove(&event.job_id);
        }
    }
}

impl Default for JobEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(job_id: Uuid, status: JobStatus) -> JobEvent {
        JobEvent {
            job_id,
            status,
            branch_name: None,
            pr_number: None,
            pr_url: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let events = JobEvents::new();
        let job_id = Uuid::now_v7();
        let mut rx = events.subscribe(job_id).await;

        events.publish(event(job_id, JobStatus::Running)).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.job_id, job_id);
        assert_eq!(received.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let events = JobEvents::new();
        events.publish(event(Uuid::now_v7(), JobStatus::Running)).await;
    }

    #[tokio::test]
    async fn test_terminal_event_drops_channel() {
        let events = JobEvents::new();
        let job_id = Uuid::now_v7();
        let mut rx = events.subscribe(job_id).await;

        events
            .publish(event(job_id, JobStatus::Completed))
            .await;

        let received = rx.recv().await.unwrap();
        assert!(received.status.is_terminal());
        assert!(!events.channels.read().await.contains_key(&job_id));
    }
}
