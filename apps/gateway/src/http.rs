use std::sync::Arc;

use axum::{
    Router, debug_handler,
    extract::{Extension, Json, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use boost_core::{DispatchError, DispatchRequest, SessionSummary};
use boost_dispatch::Dispatcher;
use boost_history::HistoryRecord;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::rate::SubmitLimitLayer;

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Dispatcher,
}

/// Body of `POST /api/submit`. Numbers may arrive as JSON numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub cookie: Value,
    pub url: String,
    pub amount: NumberField,
    pub interval: NumberField,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumberField {
    Number(f64),
    Text(String),
}

impl NumberField {
    fn as_f64(&self) -> Option<f64> {
        match self {
            NumberField::Number(n) => Some(*n),
            NumberField::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_count(&self) -> Option<u32> {
        let n = self.as_f64()?;
        (n.is_finite() && n.fract() == 0.0 && n >= 0.0 && n <= f64::from(u32::MAX))
            .then_some(n as u32)
    }
}

impl SubmitRequest {
    fn into_dispatch(self) -> Result<DispatchRequest, DispatchError> {
        let credential = match self.cookie {
            Value::String(raw) => raw,
            bundle @ Value::Array(_) => bundle.to_string(),
            _ => {
                return Err(DispatchError::InvalidCredentialFormat(
                    "cookie must be a string or an array of entries".into(),
                ));
            }
        };
        let requested_count = self.amount.as_count().ok_or_else(|| {
            DispatchError::InvalidRequest("amount must be a whole number".into())
        })?;
        let interval_secs = self
            .interval
            .as_f64()
            .ok_or_else(|| DispatchError::InvalidRequest("interval must be a number".into()))?;
        Ok(DispatchRequest {
            credential,
            target: self.url,
            requested_count,
            interval_secs,
            session_id: self.session_id,
        })
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub session_id: String,
    pub status: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

type ApiFailure = (StatusCode, Json<ApiError>);

pub fn status_for(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::InvalidCredentialFormat(_) | DispatchError::InvalidRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        DispatchError::TokenExtractionFailed { .. } => StatusCode::BAD_GATEWAY,
        DispatchError::DuplicateSessionId(_) => StatusCode::CONFLICT,
        DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(err: DispatchError) -> ApiFailure {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, code = err.code(), "request failed");
    }
    (
        status,
        Json(ApiError {
            error: err.to_string(),
            code: err.code().into(),
        }),
    )
}

pub fn build_router(state: Arc<GatewayState>, submit_cap: u32, submit_refill: u32) -> Router {
    Router::new()
        .route(
            "/api/submit",
            post(submit).layer(SubmitLimitLayer::new(submit_cap, submit_refill)),
        )
        .route("/total", get(active_sessions))
        .route("/api/history", get(history))
        .route("/api/sessions/{id}/stop", post(stop_session))
        .route("/healthz", get(healthz))
        .layer(Extension(state))
}

#[debug_handler]
async fn submit(
    Extension(state): Extension<Arc<GatewayState>>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse>), ApiFailure> {
    let Json(payload) = payload.map_err(|rejection| {
        failure(DispatchError::InvalidRequest(format!(
            "missing or malformed parameters: {}",
            rejection.body_text()
        )))
    })?;
    let request = payload.into_dispatch().map_err(failure)?;

    match state.dispatcher.start(request).await {
        Ok(handle) => {
            counter!("gateway_submissions_total", "result" => "accepted").increment(1);
            info!(session_id = handle.session_id(), "submission accepted");
            Ok((
                StatusCode::ACCEPTED,
                Json(ApiResponse {
                    session_id: handle.session_id().to_string(),
                    status: "accepted".into(),
                }),
            ))
        }
        Err(err) => {
            counter!("gateway_submissions_total", "result" => err.code()).increment(1);
            Err(failure(err))
        }
    }
}

async fn active_sessions(
    Extension(state): Extension<Arc<GatewayState>>,
) -> Json<Vec<SessionSummary>> {
    Json(state.dispatcher.active_sessions())
}

async fn history(
    Extension(state): Extension<Arc<GatewayState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<HistoryRecord>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(state.dispatcher.history(limit))
}

async fn stop_session(
    Extension(state): Extension<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ApiResponse>), ApiFailure> {
    state.dispatcher.stop(&id).map_err(failure)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse {
            session_id: id,
            status: "stopping".into(),
        }),
    ))
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_http_statuses() {
        assert_eq!(
            status_for(&DispatchError::InvalidCredentialFormat("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&DispatchError::TokenExtractionFailed {
                attempts: 3,
                reason: "x".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&DispatchError::DuplicateSessionId("a".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&DispatchError::NotFound("a".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn numbers_accept_strings() {
        let body = r#"{"cookie":"sid=1","url":"https://x.test/p","amount":"5","interval":1.5}"#;
        let req: SubmitRequest = serde_json::from_str(body).unwrap();
        let dispatch = req.into_dispatch().unwrap();
        assert_eq!(dispatch.requested_count, 5);
        assert_eq!(dispatch.interval_secs, 1.5);
        assert_eq!(dispatch.credential, "sid=1");
    }

    #[test]
    fn fractional_amount_is_rejected() {
        let body = r#"{"cookie":"sid=1","url":"https://x.test/p","amount":2.5,"interval":1}"#;
        let req: SubmitRequest = serde_json::from_str(body).unwrap();
        assert!(matches!(
            req.into_dispatch(),
            Err(DispatchError::InvalidRequest(_))
        ));
    }

    #[test]
    fn array_cookie_is_forwarded_as_json() {
        let body = r#"{"cookie":[{"key":"sid","value":"1"}],"url":"https://x.test/p","amount":1,"interval":1}"#;
        let req: SubmitRequest = serde_json::from_str(body).unwrap();
        let dispatch = req.into_dispatch().unwrap();
        assert_eq!(dispatch.credential, r#"[{"key":"sid","value":"1"}]"#);
    }
}
