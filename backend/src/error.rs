use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = Report> = color_eyre::Result<T, E>;
pub struct Report(color_eyre::Report);

impl std::fmt::Debug for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<E> From<E> for Report
where
    E: Into<color_eyre::Report>,
{
    #[track_caller]
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for Report {
    fn into_response(self) -> Response {
        let err = self.0;
        let err_string = format!("{err:?}");
        tracing::error!("{err_string}");

        if let Some(err) = err.downcast_ref::<ApiError>() {
            return err.response();
        }

        if let Some(diesel::result::Error::NotFound) = err.downcast_ref::<diesel::result::Error>() {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: "not_found".to_string(),
                    message: "resource not found".to_string(),
                    remediation: None,
                }),
            )
                .into_response();
        }

        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: "internal".to_string(),
                message: "internal server error".to_string(),
                remediation: None,
            }),
        )
            .into_response()
    }
}

/// Error taxonomy surfaced to API callers. Authentication, ownership and
/// validation failures are never retried server-side; the caller has to
/// re-initiate the request after fixing the reported condition.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("no credential is configured for this installation")]
    CredentialMissing,
    #[error("the credential for this installation is no longer active")]
    CredentialInactive,
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::CredentialMissing | ApiError::CredentialInactive => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::Validation(_) => "validation",
            ApiError::NotFound(_) => "not_found",
            ApiError::CredentialMissing => "credential_missing",
            ApiError::CredentialInactive => "credential_inactive",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            ApiError::CredentialMissing | ApiError::CredentialInactive => Some("configure_token"),
            _ => None,
        }
    }

    fn response(&self) -> Response {
        (
            self.status(),
            Json(ErrorBody {
                error: self.code().to_string(),
                message: self.to_string(),
                remediation: self.remediation().map(str::to_string),
            }),
        )
            .into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.response()
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_errors_carry_remediation() {
        assert_eq!(ApiError::CredentialMissing.remediation(), Some("configure_token"));
        assert_eq!(ApiError::CredentialInactive.remediation(), Some("configure_token"));
        assert_eq!(ApiError::Unauthorized.remediation(), None);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Forbidden("installation belongs to another account".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Validation("too short".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotFound("job").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::CredentialMissing.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
