use axum::{
    body::Body,
    extract::{MatchedPath, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::assistant::CommandInterpreter;
use crate::auth::AuthBroker;
use crate::error::Error;
use crate::gateway::{DriveGateway, FileField};
use crate::metrics::METRICS;

pub const NEXT_PAGE_TOKEN_HEADER: &str = "x-next-page-token";

/// HTTP server state
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<AuthBroker>,
    pub gateway: Arc<DriveGateway>,
    pub assistant: Option<Arc<CommandInterpreter>>,
    pub page_size: u32,
}

/// Failure rendered to the client as a status code and plain-text body
#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    BadRequest(String),
    Disabled(&'static str),
    Upstream(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Core(err)
    }
}

pub(crate) fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::MissingAuthorizationCode | Error::StateMismatch => StatusCode::BAD_REQUEST,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Core(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    error!("Request failed: {}", err);
                }
                (status, err.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Disabled(what) => (StatusCode::NOT_FOUND, format!("{} is not enabled", what)),
            ApiError::Upstream(message) => (StatusCode::BAD_GATEWAY, message),
        };
        (status, message).into_response()
    }
}

/// Counts every routed request by route template and status
pub async fn track_requests(matched: Option<MatchedPath>, req: Request, next: Next) -> Response {
    let route = matched
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(req).await;
    METRICS
        .http_requests_total
        .with_label_values(&[route.as_str(), response.status().as_str()])
        .inc();
    response
}

/// GET /
pub async fn home_handler() -> &'static str {
    "Welcome to Google Drive Analyzer. Use this tool to manage and analyze your Drive files."
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "authenticated": state.broker.session().is_authenticated(),
        "auth_state": state.broker.state(),
    }))
}

/// GET /metrics (Prometheus format)
pub async fn metrics_handler() -> Result<String, ApiError> {
    METRICS
        .render()
        .map_err(|e| ApiError::Core(Error::provider(None, format!("metrics encoding failed: {}", e))))
}

#[derive(Debug, Deserialize)]
pub struct AuthParams {
    /// Space- or comma-separated scopes; configured scopes when absent
    pub scope: Option<String>,
}

/// GET /auth - 302 to the provider consent page
pub async fn auth_handler(
    State(state): State<AppState>,
    Query(params): Query<AuthParams>,
) -> Result<Response, ApiError> {
    let scopes: Vec<String> = params
        .scope
        .as_deref()
        .unwrap_or_default()
        .split([' ', ','])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let request = state.broker.begin_authorization(&scopes);
    info!(scopes = ?request.scopes, "Redirecting to consent page");

    let location = HeaderValue::from_str(request.url.as_str())
        .map_err(|e| ApiError::Core(Error::InvalidConfig(format!("consent URL: {}", e))))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// GET /callback?code=...&state=...
pub async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<&'static str, ApiError> {
    if let Some(reason) = &params.error {
        warn!("Provider returned authorization error: {}", reason);
    }

    state
        .broker
        .complete_authorization(params.code.as_deref(), params.state.as_deref())
        .await?;

    Ok("Authorization successful! You can now browse your files at /files.")
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page_size: Option<u32>,
    pub page_token: Option<String>,
    /// Comma-separated metadata fields, e.g. `id,name,webViewLink`
    pub fields: Option<String>,
}

fn parse_fields(raw: Option<&str>) -> Result<Vec<FileField>, ApiError> {
    let Some(raw) = raw else {
        return Ok(FileField::ALL.to_vec());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            FileField::parse(name)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown metadata field: {}", name)))
        })
        .collect()
}

/// GET /files - JSON array of file metadata; continuation in `X-Next-Page-Token`
pub async fn files_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let fields = parse_fields(params.fields.as_deref())?;
    let page_size = match params.page_size {
        Some(0) => return Err(ApiError::BadRequest("page_size must be positive".to_string())),
        Some(n) => n,
        None => state.page_size,
    };

    let page = state
        .gateway
        .list_files(page_size, &fields, params.page_token.as_deref())
        .await?;

    let mut headers = HeaderMap::new();
    if let Some(token) = page.next_page_token.as_deref() {
        if let Ok(value) = HeaderValue::from_str(token) {
            headers.insert(NEXT_PAGE_TOKEN_HEADER, value);
        }
    }

    Ok((headers, Json(page.files)).into_response())
}

/// GET /files/:file_id
pub async fn file_metadata_handler(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    let metadata = state.gateway.get_file_metadata(&file_id).await?;
    Ok(Json(metadata).into_response())
}

/// `attachment` disposition with an ASCII fallback name and an RFC 5987
/// `filename*` when the real name needs it
pub(crate) fn content_disposition(name: &str, file_id: &str) -> String {
    let name = if name.trim().is_empty() { file_id } else { name };
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    if fallback == name {
        format!("attachment; filename=\"{}\"", fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(name)
        )
    }
}

/// GET /download/:file_id - headers from metadata, then the streamed content.
/// Docs/Sheets/Slides have no content to stream and are rejected up front.
pub async fn download_handler(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    let metadata = state.gateway.get_file_metadata(&file_id).await?;
    if metadata.is_google_native() {
        return Err(ApiError::BadRequest(format!(
            "{} is a Google Workspace document ({}) with no binary content to download",
            metadata.display_name(),
            metadata.mime_type.as_deref().unwrap_or_default()
        )));
    }
    let download = state.gateway.download_file(&file_id).await?;

    let content_type = metadata
        .mime_type
        .as_deref()
        .and_then(|m| HeaderValue::from_str(m).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&content_disposition(metadata.display_name(), &file_id))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(download),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// POST /command - experimental natural-language forwarding
pub async fn command_handler(
    State(state): State<AppState>,
    Json(payload): Json<CommandRequest>,
) -> Result<Json<Value>, ApiError> {
    let assistant = state.assistant.as_ref().ok_or(ApiError::Disabled("Command assistant"))?;

    if payload.command.trim().is_empty() {
        return Err(ApiError::BadRequest("command is empty".to_string()));
    }

    let interpretation = assistant.interpret(&payload.command).await.map_err(|e| {
        error!("Command assistant error: {:#}", e);
        ApiError::Upstream(format!("{:#}", e))
    })?;

    Ok(Json(json!({ "interpretation": interpretation })))
}
