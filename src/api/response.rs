//! Reply bodies for the status API.
//!
//! Success: `{ "data": T, "meta": { "served_at", "version" } }`.
//! Failure: `{ "error": { "code", "message" }, "meta": { ... } }`, where
//! `code` is a stable machine-readable name for the remediation condition
//! (`NO_SAMPLES`, `PATCH_NOT_APPLIED`, `INTERNAL`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::coordinator::CoordinatorError;
use crate::monitor::MonitorError;
use crate::patches::ApplyError;

#[derive(Debug, Serialize)]
struct Meta {
    served_at: DateTime<Utc>,
    version: &'static str,
}

impl Meta {
    fn now() -> Self {
        Self {
            served_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Successful reply wrapping `T` as `data`.
#[derive(Debug)]
pub struct Reply<T>(pub T);

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Body<T> {
            data: T,
            meta: Meta,
        }
        Json(Body {
            data: self.0,
            meta: Meta::now(),
        })
        .into_response()
    }
}

pub type ApiResult<T> = Result<Reply<T>, ApiError>;

/// Conditions a handler can report instead of data.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The monitor has nothing to report yet.
    #[error("No health samples recorded yet")]
    NoSamples,

    #[error("Patch {0} is not applied")]
    PatchNotApplied(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoSamples => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::PatchNotApplied(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NoSamples => "NO_SAMPLES",
            ApiError::PatchNotApplied(_) => "PATCH_NOT_APPLIED",
            ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        match e {
            MonitorError::NoSamples => ApiError::NoSamples,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ApplyError> for ApiError {
    fn from(e: ApplyError) -> Self {
        match e {
            ApplyError::NotApplied(id) => ApiError::PatchNotApplied(id),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::Monitor(m) => m.into(),
            CoordinatorError::Apply(a) => a.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Detail<'a> {
            code: &'a str,
            message: String,
        }
        #[derive(Serialize)]
        struct Body<'a> {
            error: Detail<'a>,
            meta: Meta,
        }

        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "API request failed");
        }
        let body = Body {
            error: Detail {
                code: self.code(),
                message: self.to_string(),
            },
            meta: Meta::now(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_reply_wraps_data_with_meta() {
        let resp = Reply(serde_json::json!({"rolled_back": true})).into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["data"]["rolled_back"], true);
        assert_eq!(v["meta"]["version"], env!("CARGO_PKG_VERSION"));
        assert!(v["meta"]["served_at"].is_string());
    }

    #[test]
    fn test_domain_errors_map_to_codes() {
        let e = ApiError::from(CoordinatorError::Monitor(MonitorError::NoSamples));
        assert_eq!((e.status(), e.code()), (StatusCode::SERVICE_UNAVAILABLE, "NO_SAMPLES"));

        let e = ApiError::from(CoordinatorError::Apply(ApplyError::NotApplied("bug-3-null_check".into())));
        assert_eq!((e.status(), e.code()), (StatusCode::NOT_FOUND, "PATCH_NOT_APPLIED"));
        assert_eq!(e.to_string(), "Patch bug-3-null_check is not applied");
    }

    #[tokio::test]
    async fn test_error_body_carries_code_and_message() {
        let resp = ApiError::PatchNotApplied("bug-1-retry".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let v = body_json(resp).await;
        assert_eq!(v["error"]["code"], "PATCH_NOT_APPLIED");
        assert_eq!(v["error"]["message"], "Patch bug-1-retry is not applied");
    }
}
