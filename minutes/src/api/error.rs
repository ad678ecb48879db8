//! Failures of the job API, each with a fixed status and a stable `code`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::error::Error;
use crate::jobs::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed JSON or a submission that fails validation.
    #[error("{0}")]
    InvalidSubmission(String),

    #[error("job '{0}' not found")]
    JobNotFound(String),

    #[error("job '{id}' is {status}, report not ready")]
    ReportNotReady { id: String, status: JobStatus },

    /// The job succeeded but its report file is gone.
    #[error("report of job '{0}' is missing")]
    ReportMissing(String),

    /// Anything else; details go to the log, not the client.
    #[error("internal error")]
    Internal(#[source] Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidSubmission(_) => StatusCode::BAD_REQUEST,
            Self::JobNotFound(_) | Self::ReportMissing(_) => StatusCode::NOT_FOUND,
            Self::ReportNotReady { .. } => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSubmission(_) => "INVALID_SUBMISSION",
            Self::JobNotFound(_) => "JOB_NOT_FOUND",
            Self::ReportNotReady { .. } => "REPORT_NOT_READY",
            Self::ReportMissing(_) => "REPORT_MISSING",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(source) = &self {
            error!(error = %source, "Job API request failed");
        }
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) | Error::Input(msg) => Self::InvalidSubmission(msg),
            Error::NotFound { entity_type, id } if entity_type == "Job" => Self::JobNotFound(id),
            other => Self::Internal(other),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Error::validation("segments is required"), StatusCode::BAD_REQUEST, "INVALID_SUBMISSION")]
    #[case(Error::not_found("Job", "job_1"), StatusCode::NOT_FOUND, "JOB_NOT_FOUND")]
    #[case(Error::not_found("Report", "r"), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")]
    #[case(Error::Other("disk full".into()), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")]
    fn test_domain_error_mapping(#[case] err: Error, #[case] status: StatusCode, #[case] code: &str) {
        let api: ApiError = err.into();
        assert_eq!(api.status(), status);
        assert_eq!(api.code(), code);
    }

    #[test]
    fn test_messages_hide_internal_details() {
        let not_ready = ApiError::ReportNotReady {
            id: "job_1".to_string(),
            status: JobStatus::Running,
        };
        assert_eq!(not_ready.to_string(), "job 'job_1' is running, report not ready");
        assert_eq!(not_ready.status(), StatusCode::CONFLICT);

        let internal: ApiError = Error::Other("secret path /srv/x".into()).into();
        assert_eq!(internal.to_string(), "internal error");
    }

    #[tokio::test]
    async fn test_response_body() {
        let response = ApiError::JobNotFound("job_9".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], "JOB_NOT_FOUND");
        assert_eq!(body["message"], "job 'job_9' not found");
    }
}
