use crate::auth::AuthedAccount;
use crate::config::AppState;
use crate::error::{ApiError, Result};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::model::{AccountType, Credential, CredentialKind, CredentialStatus, Installation};

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Installations owned by the caller", body = Vec<Installation>))
)]
#[tracing::instrument(skip_all)]
async fn list_installations(
    account: AuthedAccount,
    State(app_state): State<AppState>,
) -> Result<Json<Vec<Installation>>> {
    let conn = &mut app_state.pool.get().await?;
    let installations = Installation::list_for_account(conn, account.id).await?;
    Ok(Json(installations))
}

/// Capture an installation after the GitHub post-install redirect.
///
/// Fetches the installation metadata from GitHub, records it, and claims it
/// for the calling account.
#[utoipa::path(
    post,
    path = "/{id}/capture",
    params(("id" = i64, Path, description = "The GitHub App installation id")),
    responses(
        (status = 200, description = "Installation captured", body = Installation),
        (status = 403, description = "Installation belongs to another account"),
        (status = 404, description = "No such installation on GitHub")
    )
)]
#[tracing::instrument(skip_all, fields(installation_id = id))]
async fn capture_installation(
    account: AuthedAccount,
    State(app_state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Installation>> {
    let remote: octocrab::models::Installation = app_state
        .github
        .get(format!("/app/installations/{id}"), None::<&()>)
        .await
        .map_err(|_| ApiError::NotFound("installation"))?;

    let account_type = remote
        .account
        .r#type
        .parse()
        .unwrap_or(AccountType::User);

    let conn = &mut app_state.pool.get().await?;
    Installation::upsert(conn, id, &remote.account.login, account_type).await?;
    let installation = Installation::claim_or_verify(conn, id, account.id).await?;

    Ok(Json(installation))
}

#[derive(Deserialize, ToSchema)]
pub struct SaveCredentialRequest {
    /// The plaintext secret; stored encrypted, never logged.
    pub token: String,
    pub kind: CredentialKind,
}

/// Credential metadata exposed to clients. The plaintext is never readable
/// through the API; the prefix is informational only.
#[derive(Serialize, ToSchema)]
pub struct CredentialStatusResponse {
    pub installation_id: i64,
    pub display_prefix: String,
    pub kind: CredentialKind,
    pub status: CredentialStatus,
    pub failed_attempts: i32,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Credential> for CredentialStatusResponse {
    fn from(credential: Credential) -> Self {
        Self {
            installation_id: credential.installation_id,
            display_prefix: credential.display_prefix,
            kind: credential.kind,
            status: credential.status,
            failed_attempts: credential.failed_attempts,
            updated_at: credential.updated_at,
        }
    }
}

/// Save the credential for an installation, replacing any previous one.
#[utoipa::path(
    put,
    path = "/{id}/credential",
    params(("id" = i64, Path, description = "The GitHub App installation id")),
    request_body = SaveCredentialRequest,
    responses(
        (status = 200, description = "Credential stored", body = CredentialStatusResponse),
        (status = 400, description = "Token failed validation"),
        (status = 403, description = "Installation belongs to another account")
    )
)]
#[tracing::instrument(skip_all, fields(installation_id = id))]
async fn save_credential(
    account: AuthedAccount,
    State(app_state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<SaveCredentialRequest>,
) -> Result<Json<CredentialStatusResponse>> {
    if request.token.trim().is_empty() {
        return Err(ApiError::Validation("token must not be empty".to_string()).into());
    }

    let conn = &mut app_state.pool.get().await?;
    Installation::claim_or_verify(conn, id, account.id).await?;

    let master_key = app_state.master_key()?;
    let credential = Credential::save(conn, id, request.kind, &request.token, master_key).await?;

    Ok(Json(credential.into()))
}

#[utoipa::path(
    get,
    path = "/{id}/credential",
    params(("id" = i64, Path, description = "The GitHub App installation id")),
    responses(
        (status = 200, description = "Credential status", body = CredentialStatusResponse),
        (status = 404, description = "No credential configured")
    )
)]
#[tracing::instrument(skip_all, fields(installation_id = id))]
async fn get_credential(
    account: AuthedAccount,
    State(app_state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CredentialStatusResponse>> {
    let conn = &mut app_state.pool.get().await?;
    Installation::claim_or_verify(conn, id, account.id).await?;

    let credential = Credential::get_for_installation(conn, id)
        .await?
        .ok_or(ApiError::NotFound("credential"))?;

    Ok(Json(credential.into()))
}

pub fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_installations))
        .routes(routes!(capture_installation))
        .routes(routes!(save_credential, get_credential))
}
