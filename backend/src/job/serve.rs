use crate::auth::{AuthedAccount, Caller, CallbackAuth};
use crate::classifier;
use crate::config::AppState;
use crate::error::{ApiError, Result};
use crate::installation::model::{Credential, Installation};
use axum::{
    Json,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::Response,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use uuid::Uuid;

use super::dispatch::dispatch_job;
use super::events::JobEvent;
use super::model::{Job, JobOutcome, NewJob, validate_problem_statement};

#[derive(Deserialize, ToSchema)]
pub struct SubmitJobRequest {
    pub installation_id: i64,
    /// GitHub repository id, when the caller knows it.
    #[serde(default)]
    pub repo_id: i64,
    pub repository_full_name: String,
    pub problem_statement: String,
}

/// Reject submission unless the installation has a usable credential. The
/// two conditions get distinct errors; both point at the same remediation.
pub(crate) async fn ensure_active_credential(
    conn: &mut diesel_async::AsyncPgConnection,
    installation_id: i64,
) -> std::result::Result<(), ApiError> {
    let credential = Credential::get_for_installation(conn, installation_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::CredentialMissing)?;
    if !credential.is_active() {
        return Err(ApiError::CredentialInactive);
    }
    Ok(())
}

/// Validate, classify and insert a `pending` job. Shared by the submission
/// endpoint and the webhook relay; dispatch is the caller's business.
pub async fn create_job(
    app_state: &AppState,
    account_id: Option<Uuid>,
    installation_id: i64,
    repo_id: i64,
    repo_full_name: &str,
    problem_statement: &str,
) -> std::result::Result<Job, ApiError> {
    validate_problem_statement(problem_statement)?;

    let conn = &mut app_state
        .pool
        .get()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    ensure_active_credential(conn, installation_id).await?;

    let classification = classifier::classify(problem_statement);
    let job = Job::create(
        conn,
        NewJob {
            account_id,
            installation_id,
            repo_id,
            repo_full_name,
            problem_statement,
        },
        &classification,
    )
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    app_state.job_events.publish(JobEvent::from(&job)).await;
    Ok(job)
}

/// Submit a fix job
///
/// Creates the job in `pending` and returns immediately; the workflow
/// dispatch runs in the background and moves the job to `running` or `failed`
/// on its own.
#[utoipa::path(
    post,
    path = "/",
    request_body = SubmitJobRequest,
    responses(
        (status = 201, description = "Job created", body = Job),
        (status = 400, description = "Problem statement failed validation"),
        (status = 403, description = "Installation belongs to another account"),
        (status = 404, description = "Installation not found"),
        (status = 422, description = "No active credential for the installation")
    )
)]
#[tracing::instrument(skip_all, fields(installation_id = request.installation_id))]
async fn submit_job(
    caller: Caller,
    State(app_state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<Job>)> {
    let account_id = {
        let conn = &mut app_state.pool.get().await?;
        match &caller {
            Caller::Account(account) => {
                Installation::claim_or_verify(conn, request.installation_id, account.id).await?;
                Some(account.id)
            }
            Caller::Service => {
                let installation = Installation::find(conn, request.installation_id)
                    .await?
                    .ok_or(ApiError::NotFound("installation"))?;
                installation.account_id
            }
        }
    };

    let job = create_job(
        &app_state,
        account_id,
        request.installation_id,
        request.repo_id,
        &request.repository_full_name,
        &request.problem_statement,
    )
    .await?;

    tokio::spawn(dispatch_job(app_state.clone(), job.clone()));

    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Completed,
    Failed,
}

#[derive(Deserialize, ToSchema)]
pub struct CallbackRequest {
    pub job_id: Uuid,
    pub status: CallbackStatus,
    pub pr_url: Option<String>,
    pub pr_number: Option<i64>,
    pub branch_name: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct CallbackResponse {
    /// False when the job already reached a terminal state; the stored
    /// outcome is left untouched in that case.
    pub applied: bool,
}

/// Worker completion callback
///
/// Authenticated with the shared callback secret. Applying the same terminal
/// update twice is harmless; a second, contradictory callback is a no-op.
#[utoipa::path(
    post,
    path = "/callback",
    request_body = CallbackRequest,
    responses(
        (status = 200, description = "Callback processed", body = CallbackResponse),
        (status = 401, description = "Missing or wrong callback secret"),
        (status = 404, description = "Unknown job id")
    )
)]
#[tracing::instrument(skip_all, fields(job_id = %request.job_id))]
async fn job_callback(
    _auth: CallbackAuth,
    State(app_state): State<AppState>,
    Json(request): Json<CallbackRequest>,
) -> Result<Json<CallbackResponse>> {
    let conn = &mut app_state.pool.get().await?;

    Job::find(conn, request.job_id)
        .await?
        .ok_or(ApiError::NotFound("job"))?;

    let outcome = match request.status {
        CallbackStatus::Completed => JobOutcome::Completed {
            branch_name: request.branch_name,
            pr_number: request.pr_number,
            pr_url: request.pr_url,
        },
        CallbackStatus::Failed => JobOutcome::Failed {
            error_message: request
                .error_message
                .unwrap_or_else(|| "worker reported failure".to_string()),
        },
    };

    let updated = Job::apply_outcome(conn, request.job_id, &outcome).await?;
    let applied = updated.is_some();
    if let Some(job) = updated {
        app_state.job_events.publish(JobEvent::from(&job)).await;
    } else {
        tracing::warn!(job_id = %request.job_id, "Callback for a job that is already terminal");
    }

    Ok(Json(CallbackResponse { applied }))
}

/// Get details for a specific job
#[utoipa::path(
    get,
    path = "/{id}",
    params(("id" = uuid::Uuid, Path, description = "The unique identifier of the job")),
    responses(
        (status = 200, description = "Job found", body = Job),
        (status = 404, description = "Job not found")
    )
)]
#[tracing::instrument(skip_all, fields(job_id = %id))]
async fn get_job(
    caller: Caller,
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>> {
    let conn = &mut app_state.pool.get().await?;
    let job = Job::find(conn, id).await?.ok_or(ApiError::NotFound("job"))?;

    if let Caller::Account(account) = &caller {
        if job.account_id != Some(account.id) {
            return Err(ApiError::Forbidden("job belongs to another account".to_string()).into());
        }
    }

    Ok(Json(job))
}

/// List the caller's jobs, newest first
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Jobs owned by the caller", body = Vec<Job>))
)]
#[tracing::instrument(skip_all)]
async fn list_jobs(
    account: AuthedAccount,
    State(app_state): State<AppState>,
) -> Result<Json<Vec<Job>>> {
    let conn = &mut app_state.pool.get().await?;
    let jobs = Job::list_for_account(conn, account.id).await?;
    Ok(Json(jobs))
}

#[derive(Deserialize, ToSchema, Default)]
pub struct RegenerateRequest {
    /// Revised problem statement; the original is kept when absent.
    #[serde(default)]
    pub edited_statement: Option<String>,
}

/// Regenerate a finished job
///
/// Starts a fresh cycle that reuses the original branch name. The terminal
/// row is never mutated.
#[utoipa::path(
    post,
    path = "/{id}/regenerate",
    params(("id" = uuid::Uuid, Path, description = "The unique identifier of the job")),
    request_body = RegenerateRequest,
    responses(
        (status = 201, description = "Regeneration started", body = Job),
        (status = 400, description = "Job is not in a terminal state"),
        (status = 404, description = "Job not found")
    )
)]
#[tracing::instrument(skip_all, fields(job_id = %id))]
async fn regenerate_job(
    account: AuthedAccount,
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RegenerateRequest>,
) -> Result<(StatusCode, Json<Job>)> {
    let conn = &mut app_state.pool.get().await?;
    let job = Job::find(conn, id).await?.ok_or(ApiError::NotFound("job"))?;

    if job.account_id != Some(account.id) {
        return Err(ApiError::Forbidden("job belongs to another account".to_string()).into());
    }
    if !job.status.is_terminal() {
        return Err(ApiError::Validation(
            "only completed or failed jobs can be regenerated".to_string(),
        )
        .into());
    }
    if let Some(edited) = &request.edited_statement {
        validate_problem_statement(edited)?;
    }

    ensure_active_credential(conn, job.installation_id).await?;

    let statement = request
        .edited_statement
        .as_deref()
        .unwrap_or_else(|| job.effective_statement());
    let classification = classifier::classify(statement);

    let regenerated = job
        .regenerate(conn, request.edited_statement.as_deref(), &classification)
        .await?;

    app_state
        .job_events
        .publish(JobEvent::from(&regenerated))
        .await;
    tokio::spawn(dispatch_job(app_state.clone(), regenerated.clone()));

    Ok((StatusCode::CREATED, Json(regenerated)))
}

/// Subscribe to a job's status changes
///
/// Sends the current state as a `JobEvent`, then pushes every status change
/// until a terminal event. Read-only; clients that prefer polling can use
/// `GET /{id}` instead.
#[utoipa::path(
    get,
    path = "/{id}/events",
    params(("id" = uuid::Uuid, Path, description = "The unique identifier of the job")),
    responses(
        (status = 101, description = "Switching to WebSocket"),
        (status = 404, description = "Job not found")
    )
)]
#[tracing::instrument(skip_all, fields(job_id = %id))]
async fn job_events(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let conn = &mut app_state.pool.get().await?;
    Job::find(conn, id).await?.ok_or(ApiError::NotFound("job"))?;

    Ok(ws.on_upgrade(move |socket| stream_job_events(socket, app_state, id)))
}

async fn stream_job_events(mut socket: WebSocket, app_state: AppState, job_id: Uuid) {
    // Subscribe before the snapshot so a transition between the two is not
    // lost.
    let mut rx = app_state.job_events.subscribe(job_id).await;

    let snapshot = {
        let mut conn = match app_state.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("Failed to get connection for event stream: {e}");
                return;
            }
        };
        match Job::find(&mut conn, job_id).await {
            Ok(Some(job)) => JobEvent::from(&job),
            _ => return,
        }
    };

    if send_event(&mut socket, &snapshot).await.is_err() {
        return;
    }
    if snapshot.status.is_terminal() {
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let terminal = event.status.is_terminal();
                        if send_event(&mut socket, &event).await.is_err() || terminal {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &JobEvent) -> std::result::Result<(), axum::Error> {
    let payload = serde_json::to_string(event).map_err(axum::Error::new)?;
    socket.send(Message::Text(payload.into())).await
}

pub fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(submit_job, list_jobs))
        .routes(routes!(job_callback))
        .routes(routes!(get_job))
        .routes(routes!(regenerate_job))
        .routes(routes!(job_events))
}
