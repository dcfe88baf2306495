//! Request authentication.
//!
//! API callers authenticate with a bearer token resolved to an `accounts` row
//! by SHA-256 digest. Service-to-service callers present the static
//! `X-Service-Secret` header instead, and the worker completion callback is
//! authenticated with its own `X-Callback-Secret` header.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use sha2::{Digest, Sha256};

use crate::account::model::Account;
use crate::config::AppState;
use crate::error::ApiError;
use crate::schema::accounts;

pub const SERVICE_SECRET_HEADER: &str = "x-service-secret";
pub const CALLBACK_SECRET_HEADER: &str = "x-callback-secret";

/// Hex SHA-256 digest of an API token. Only digests are persisted.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Compare a presented secret against the configured one. Comparing digests
/// keeps the comparison independent of where the inputs first differ.
fn secrets_match(presented: &str, configured: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(configured.as_bytes())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// An authenticated account, resolved from the bearer token.
#[derive(Debug)]
pub struct AuthedAccount(pub Account);

impl std::ops::Deref for AuthedAccount {
    type Target = Account;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

async fn resolve_account(app_state: &AppState, token: &str) -> Result<Account, ApiError> {
    let conn = &mut app_state
        .pool
        .get()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let digest = token_digest(token);
    let account: Option<Account> = accounts::table
        .filter(accounts::api_token_digest.eq(&digest))
        .select(Account::as_select())
        .first(conn)
        .await
        .optional()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    account.ok_or(ApiError::Unauthorized)
}

impl<S> FromRequestParts<S> for AuthedAccount
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let app_state = AppState::from_ref(state);
            let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
            let account = resolve_account(&app_state, token).await?;
            Ok(AuthedAccount(account))
        }
    }
}

/// A caller that is either a user account or the trusted service identity.
#[derive(Debug)]
pub enum Caller {
    Account(Account),
    Service,
}

impl Caller {
    pub fn account_id(&self) -> Option<uuid::Uuid> {
        match self {
            Caller::Account(account) => Some(account.id),
            Caller::Service => None,
        }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let app_state = AppState::from_ref(state);

            if let Some(presented) = parts
                .headers
                .get(SERVICE_SECRET_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                let configured = app_state
                    .secrets
                    .service_api_secret
                    .as_deref()
                    .ok_or(ApiError::Unauthorized)?;
                if secrets_match(presented, configured) {
                    return Ok(Caller::Service);
                }
                return Err(ApiError::Unauthorized);
            }

            let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
            let account = resolve_account(&app_state, token).await?;
            Ok(Caller::Account(account))
        }
    }
}

/// Proof that the request carried the shared callback secret. The worker
/// completion callback is rejected outright without it.
#[derive(Debug)]
pub struct CallbackAuth;

impl<S> FromRequestParts<S> for CallbackAuth
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let app_state = AppState::from_ref(state);
            let configured = app_state
                .secrets
                .callback_secret
                .as_deref()
                .ok_or(ApiError::Unauthorized)?;
            let presented = parts
                .headers
                .get(CALLBACK_SECRET_HEADER)
                .and_then(|v| v.to_str().ok())
                .ok_or(ApiError::Unauthorized)?;

            if secrets_match(presented, configured) {
                Ok(CallbackAuth)
            } else {
                Err(ApiError::Unauthorized)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_digest_is_stable_hex() {
        let digest = token_digest("pp_live_abcdef");
        assert_eq!(digest, token_digest("pp_live_abcdef"));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("shared-secret", "shared-secret"));
        assert!(!secrets_match("shared-secret", "shared-secreT"));
        assert!(!secrets_match("", "shared-secret"));
    }
}
