//! Route handlers.
//!
//! Request bodies on the template routes are the raw template bytes. The
//! workflows are synchronous, so every handler hops onto the blocking pool.

use super::AppState;
use crate::models::{DeviceId, UserId};
use crate::{Error, ErrorCategory};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

/// A workflow error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.category() {
            ErrorCategory::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCategory::Unauthorized => StatusCode::FORBIDDEN,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Backend details stay in the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, kind = self.0.kind(), "Request failed");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(json!({ "error": message, "kind": self.0.kind() })),
        )
            .into_response()
    }
}

type ApiResult = std::result::Result<Json<Value>, ApiError>;

async fn blocking<T, F>(f: F) -> std::result::Result<T, ApiError>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(Error::operation("spawn_blocking", e)))?
        .map_err(ApiError)
}

/// Query of the enroll route.
#[derive(Debug, Default, Deserialize)]
pub struct EnrollQuery {
    user_id: Option<String>,
}

/// Query of the attendance routes.
#[derive(Debug, Default, Deserialize)]
pub struct AttendanceQuery {
    #[serde(alias = "mesin_id")]
    device_id: Option<String>,
    code: Option<String>,
}

/// Identifier sent either as a JSON string or a JSON number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FlexibleId {
    /// `"17"`
    Text(String),
    /// `17`
    Number(i64),
}

impl FlexibleId {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

/// Body of the enroll-mode route.
#[derive(Debug, Deserialize)]
pub struct EnrollModeRequest {
    #[serde(alias = "id_user")]
    user_id: FlexibleId,
    #[serde(alias = "id_mesin")]
    device_id: FlexibleId,
}

fn required(value: Option<String>, name: &str) -> crate::Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Validation(format!("{name} is required")))
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// `POST /enroll`: stores the template vector without linking a user.
pub async fn register(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let services = state.services;
    let receipt = blocking(move || {
        let scheme = services.active_scheme();
        services.enrollment().register(&body, scheme)
    })
    .await?;
    Ok(Json(json!({
        "message": "Fingerprint enrolled",
        "id": receipt.template_id,
        "scheme": receipt.scheme,
    })))
}

/// `POST /search`: identifies a template without recording attendance.
pub async fn search(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let services = state.services;
    let hit = blocking(move || {
        let scheme = services.active_scheme();
        services.attendance().identify(&body, scheme)
    })
    .await?;
    Ok(Json(json!({
        "message": "Fingerprint found",
        "fingerprint_id": hit.template_id,
        "score": hit.distance,
        "scheme": hit.scheme,
    })))
}

/// `POST /api/{version}/enroll?user_id=`
pub async fn enroll(
    State(state): State<AppState>,
    Path(version): Path<String>,
    Query(query): Query<EnrollQuery>,
    body: Bytes,
) -> ApiResult {
    let services = state.services;
    let receipt = blocking(move || {
        let scheme = services.scheme_for(&version)?;
        let user_id = UserId::parse(&required(query.user_id, "user_id")?)?;
        services.enrollment().enroll(&user_id, &body, scheme)
    })
    .await?;
    Ok(Json(json!({
        "message": "Fingerprint enrolled",
        "id": receipt.template_id,
        "user_id": receipt.user_id,
        "scheme": receipt.scheme,
    })))
}

/// `POST /api/{version}/attendance?device_id=` (also served as `/absent`).
pub async fn attend(
    State(state): State<AppState>,
    Path(version): Path<String>,
    Query(query): Query<AttendanceQuery>,
    body: Bytes,
) -> ApiResult {
    let services = state.services;
    let receipt = blocking(move || {
        let scheme = services.scheme_for(&version)?;
        let device_id = DeviceId::parse(&required(query.device_id, "device_id")?)?;
        services.attendance().attend(&device_id, &body, scheme)
    })
    .await?;
    Ok(Json(json!({
        "message": "Fingerprint found and attendance recorded",
        "fingerprint_id": receipt.event.template_id(),
        "user_id": receipt.event.user_id,
        "fullname": receipt.full_name,
        "score": receipt.distance,
        "event_id": receipt.event.event_id,
    })))
}

/// `POST /api/{version}/attendance/qr?device_id=&code=`
pub async fn attend_by_code(
    State(state): State<AppState>,
    Path(version): Path<String>,
    Query(query): Query<AttendanceQuery>,
) -> ApiResult {
    let services = state.services;
    let receipt = blocking(move || {
        services.scheme_for(&version)?;
        let device_id = DeviceId::parse(&required(query.device_id, "device_id")?)?;
        let code = required(query.code, "code")?;
        services.attendance().attend_by_code(&device_id, &code)
    })
    .await?;
    Ok(Json(json!({
        "message": "Attendance recorded",
        "user_id": receipt.event.user_id,
        "fullname": receipt.full_name,
        "event_id": receipt.event.event_id,
    })))
}

/// `POST /api/{version}/enroll-mode`
pub async fn enroll_mode(
    State(state): State<AppState>,
    Path(version): Path<String>,
    body: Bytes,
) -> ApiResult {
    let request: EnrollModeRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError(Error::Validation(format!("invalid request body: {e}"))))?;
    let services = state.services;
    let receipt = blocking(move || {
        services.scheme_for(&version)?;
        let user_id = UserId::parse(&request.user_id.into_string())?;
        let device_id = DeviceId::parse(&request.device_id.into_string())?;
        services.devices().request_enroll_mode(&user_id, &device_id)
    })
    .await?;
    Ok(Json(json!({
        "message": "Enroll request sent",
        "topic": receipt.topic,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::Validation("x".to_string()), StatusCode::BAD_REQUEST),
            (
                Error::NoMatch {
                    scheme: crate::SchemeId::Normalized16,
                },
                StatusCode::NOT_FOUND,
            ),
            (
                Error::IdentityResolution("x".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (Error::Unauthorized("x".to_string()), StatusCode::FORBIDDEN),
            (
                Error::store("knn_query", "refused"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_enroll_mode_accepts_numeric_ids() {
        let request: EnrollModeRequest =
            serde_json::from_str(r#"{"id_user": 17, "id_mesin": 3}"#).unwrap();
        assert_eq!(request.user_id.into_string(), "17");
        assert_eq!(request.device_id.into_string(), "3");

        let request: EnrollModeRequest =
            serde_json::from_str(r#"{"user_id": "u-1", "device_id": "gate"}"#).unwrap();
        assert_eq!(request.device_id.into_string(), "gate");
    }
}
