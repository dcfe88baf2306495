use crate::auth::AuthedAccount;
use crate::config::AppState;
use crate::error::Result;
use axum::{Json, extract::State};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::model::Account;

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Account found", body = Account),
        (status = 401, description = "Not authenticated")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_account(
    account: AuthedAccount,
    State(_state): State<AppState>,
) -> Result<Json<Account>> {
    Ok(Json(account.0))
}

pub fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(get_account))
}
