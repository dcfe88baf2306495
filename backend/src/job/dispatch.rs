//! Workflow dispatch against the worker repository.
//!
//! The dispatch call is the only side effect between a job going `pending`
//! and `running`. Every failure funnels into the same terminal-update path
//! the completion callback uses, so there is exactly one place a job can be
//! marked failed.

use async_trait::async_trait;
use octocrab::Octocrab;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::{AppState, Worker};
use crate::installation::model::Credential;
use crate::job::events::JobEvent;
use crate::job::model::{Job, JobOutcome};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no active credential is configured for this installation")]
    CredentialMissing,
    #[error("the stored credential could not be decrypted")]
    CredentialUnreadable,
    #[error("the worker repository has no dispatchable workflow")]
    WorkflowNotFound,
    #[error("the worker repository rejected the dispatch")]
    Forbidden,
    #[error("the worker workflow rejected the dispatch inputs")]
    InvalidInputs,
    #[error("workflow dispatch failed: {0}")]
    Upstream(String),
    #[error("internal error during dispatch: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            DispatchError::CredentialMissing
            | DispatchError::CredentialUnreadable
            | DispatchError::Forbidden => Some("configure_token"),
            DispatchError::WorkflowNotFound | DispatchError::InvalidInputs => {
                Some("check_worker_repo")
            }
            DispatchError::Upstream(_) | DispatchError::Internal(_) => None,
        }
    }
}

/// Map a GitHub status code to the user-facing error category. 404, 403 and
/// 422 are distinct conditions a user can act on; everything else is an
/// opaque upstream failure.
fn classify_status(status: u16, message: String) -> DispatchError {
    match status {
        404 => DispatchError::WorkflowNotFound,
        403 => DispatchError::Forbidden,
        422 => DispatchError::InvalidInputs,
        _ => DispatchError::Upstream(message),
    }
}

fn map_octocrab_error(err: octocrab::Error) -> DispatchError {
    match &err {
        octocrab::Error::GitHub { source, .. } => {
            classify_status(source.status_code.as_u16(), source.message.clone())
        }
        _ => DispatchError::Upstream(err.to_string()),
    }
}

/// Everything the worker workflow needs to reproduce and fix the problem.
pub struct DispatchRequest {
    pub job_id: Uuid,
    pub target_repo: String,
    pub problem_statement: String,
    pub installation_id: i64,
    pub api_key: Zeroizing<String>,
    pub complexity: Option<String>,
    pub branch_name: Option<String>,
}

impl DispatchRequest {
    /// Workflow dispatch inputs are string-valued by contract.
    fn inputs(&self) -> serde_json::Value {
        let mut inputs = serde_json::json!({
            "job_id": self.job_id.to_string(),
            "target_repo": self.target_repo,
            "problem_statement": self.problem_statement,
            "installation_id": self.installation_id.to_string(),
            "api_key": self.api_key.as_str(),
        });
        if let Some(complexity) = &self.complexity {
            inputs["complexity"] = serde_json::Value::String(complexity.clone());
        }
        if let Some(branch_name) = &self.branch_name {
            inputs["branch_name"] = serde_json::Value::String(branch_name.clone());
        }
        inputs
    }
}

#[async_trait]
pub trait WorkflowDispatcher: Send + Sync {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<(), DispatchError>;
}

/// Production dispatcher: a `workflow_dispatch` call against the configured
/// worker repository. Success is GitHub's 204 with no body.
pub struct ActionsDispatcher {
    client: Octocrab,
    owner: String,
    repo: String,
    workflow_file: String,
    git_ref: String,
}

impl ActionsDispatcher {
    pub fn new(client: Octocrab, worker: &Worker) -> Self {
        Self {
            client,
            owner: worker.owner.clone(),
            repo: worker.repo.clone(),
            workflow_file: worker.workflow_file.clone(),
            git_ref: worker.git_ref.clone(),
        }
    }
}

#[async_trait]
impl WorkflowDispatcher for ActionsDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<(), DispatchError> {
        self.client
            .actions()
            .create_workflow_dispatch(
                &self.owner,
                &self.repo,
                &self.workflow_file,
                &self.git_ref,
            )
            .inputs(request.inputs())
            .send()
            .await
            .map_err(map_octocrab_error)
    }
}

async fn try_dispatch(app_state: &AppState, job: &Job) -> Result<(), DispatchError> {
    let conn = &mut app_state
        .pool
        .get()
        .await
        .map_err(|e| DispatchError::Internal(e.to_string()))?;

    let credential = Credential::get_for_installation(conn, job.installation_id)
        .await
        .map_err(|e| DispatchError::Internal(e.to_string()))?
        .filter(Credential::is_active)
        .ok_or(DispatchError::CredentialMissing)?;

    let master_key = app_state
        .master_key()
        .map_err(|e| DispatchError::Internal(e.to_string()))?;
    let api_key = credential
        .decrypt_token(master_key)
        .map_err(|_| DispatchError::CredentialUnreadable)?;

    let request = DispatchRequest {
        job_id: job.id,
        target_repo: job.repo_full_name.clone(),
        problem_statement: job.effective_statement().to_string(),
        installation_id: job.installation_id,
        api_key,
        complexity: job.complexity.clone(),
        branch_name: job.branch_name.clone(),
    };

    app_state.dispatcher.dispatch(&request).await
}

/// Dispatch a pending job and record the result.
///
/// On success the job moves to `running`; on failure it is failed through
/// the same guarded terminal update the callback handler uses. The error is
/// returned so callers reporting back to an originating thread (the webhook
/// relay) can describe what went wrong.
pub async fn dispatch_job(app_state: AppState, job: Job) -> Result<(), DispatchError> {
    let result = try_dispatch(&app_state, &job).await;

    let conn = &mut app_state
        .pool
        .get()
        .await
        .map_err(|e| DispatchError::Internal(e.to_string()))?;

    match result {
        Ok(()) => {
            if let Some(running) = Job::mark_running(conn, job.id)
                .await
                .map_err(|e| DispatchError::Internal(e.to_string()))?
            {
                app_state.job_events.publish(JobEvent::from(&running)).await;
                tracing::info!(job_id = %job.id, "Dispatched worker workflow");
            }
            Ok(())
        }
        Err(err) => {
            tracing::warn!(job_id = %job.id, error = %err, "Workflow dispatch failed");

            if matches!(err, DispatchError::Forbidden) {
                // The worker could not act with this credential; count it
                // against the stored token.
                if let Err(e) = Credential::record_failure(conn, job.installation_id).await {
                    tracing::error!(job_id = %job.id, "Failed to record credential failure: {e}");
                }
            }

            let outcome = JobOutcome::Failed {
                error_message: err.user_message(),
            };
            match Job::apply_outcome(conn, job.id, &outcome).await {
                Ok(Some(failed)) => {
                    app_state.job_events.publish(JobEvent::from(&failed)).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(job_id = %job.id, "Failed to mark job failed: {e}");
                }
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert!(matches!(
            classify_status(404, String::new()),
            DispatchError::WorkflowNotFound
        ));
        assert!(matches!(
            classify_status(403, String::new()),
            DispatchError::Forbidden
        ));
        assert!(matches!(
            classify_status(422, String::new()),
            DispatchError::InvalidInputs
        ));
        assert!(matches!(
            classify_status(500, "boom".to_string()),
            DispatchError::Upstream(_)
        ));
    }

    #[test]
    fn test_remediations() {
        assert_eq!(
            DispatchError::CredentialMissing.remediation(),
            Some("configure_token")
        );
        assert_eq!(DispatchError::Forbidden.remediation(), Some("configure_token"));
        assert_eq!(
            DispatchError::WorkflowNotFound.remediation(),
            Some("check_worker_repo")
        );
        assert_eq!(DispatchError::Upstream("x".into()).remediation(), None);
    }

    #[test]
    fn test_inputs_are_string_valued() {
        let request = DispatchRequest {
            job_id: Uuid::now_v7(),
            target_repo: "a/b".to_string(),
            problem_statement: "Fix null pointer in UserService".to_string(),
            installation_id: 42,
            api_key: Zeroizing::new("sk-ant-api03-abc".to_string()),
            complexity: Some("simple".to_string()),
            branch_name: None,
        };
        let inputs = request.inputs();
        assert!(inputs["installation_id"].is_string());
        assert_eq!(inputs["installation_id"], "42");
        assert!(inputs["job_id"].is_string());
        assert_eq!(inputs["complexity"], "simple");
        assert!(inputs.get("branch_name").is_none());
    }
}
