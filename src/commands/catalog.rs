use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::error::RelayError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LoadServicesRequest {
    #[serde(default)]
    pub url: String,
}

/// Envelope returned to the page: `data` on success, `message` on failure.
#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CatalogResponse {
    fn ok(data: Value) -> (StatusCode, Json<Self>) {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                message: None,
            }),
        )
    }

    fn err(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success: false,
                data: None,
                message: Some(message.into()),
            }),
        )
    }
}

/// Why a catalog fetch was refused.
#[derive(Debug)]
pub enum CatalogError {
    /// The request or the fetched document is unusable (400).
    Invalid(String),
    /// The fetch itself failed (500).
    Upstream(RelayError),
}

impl CatalogError {
    fn status(&self) -> StatusCode {
        match self {
            CatalogError::Invalid(_) => StatusCode::BAD_REQUEST,
            CatalogError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            CatalogError::Invalid(message) => message.clone(),
            CatalogError::Upstream(e) => e.to_string(),
        }
    }
}

/// `POST /api/load-services`: fetch a service catalog on behalf of the page.
/// An unreadable body is answered with the same envelope as other failures.
pub async fn load_services(
    State(state): State<AppState>,
    payload: Result<Json<LoadServicesRequest>, JsonRejection>,
) -> (StatusCode, Json<CatalogResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!("Rejected catalog request: {}", rejection.body_text());
            return CatalogResponse::err(
                StatusCode::BAD_REQUEST,
                format!("Invalid request: {}", rejection.body_text()),
            );
        }
    };

    match fetch_catalog(&state.http, &request.url).await {
        Ok(data) => CatalogResponse::ok(data),
        Err(e) => {
            tracing::warn!("Catalog fetch from {:?} failed: {}", request.url, e.message());
            CatalogResponse::err(e.status(), e.message())
        }
    }
}

/// Trim and check that the URL is absolute http(s).
pub fn validate_url(url: &str) -> Result<&str, CatalogError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(CatalogError::Invalid("URL must not be empty".to_string()));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(CatalogError::Invalid("URL must start with http:// or https://".to_string()));
    }
    Ok(url)
}

/// Accept only a JSON object that carries a `services` field.
pub fn validate_catalog(body: &str) -> Result<Value, CatalogError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|_| CatalogError::Invalid("Response is not valid JSON".to_string()))?;
    match value.as_object() {
        Some(object) if object.contains_key("services") => Ok(value),
        _ => Err(CatalogError::Invalid(
            "Invalid catalog: missing services field".to_string(),
        )),
    }
}

async fn fetch_catalog(client: &reqwest::Client, url: &str) -> Result<Value, CatalogError> {
    let url = validate_url(url)?;

    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| CatalogError::Upstream(classify_fetch_error(&e)))?;

    let body = response
        .text()
        .await
        .map_err(|e| CatalogError::Upstream(classify_fetch_error(&e)))?;

    validate_catalog(&body)
}

fn classify_fetch_error(e: &reqwest::Error) -> RelayError {
    if e.is_timeout() {
        RelayError::NetworkTimeout(format!(
            "request timed out: {}. Check that the URL is reachable",
            e
        ))
    } else if e.is_connect() {
        RelayError::Upstream(format!(
            "connection failed: {}. Check that the URL is reachable",
            e
        ))
    } else {
        RelayError::Upstream(format!("request failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::extract::{FromRequest, Request};

    #[test]
    fn test_validate_url() {
        assert_eq!(validate_url("  https://example.com/a.json ").unwrap(), "https://example.com/a.json");
        assert!(validate_url("http://10.0.0.1/services.json").is_ok());

        let err = validate_url("   ").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(validate_url("ftp://example.com/x").is_err());
        assert!(validate_url("example.com/x").is_err());
    }

    #[test]
    fn test_validate_catalog() {
        let value = validate_catalog(r#"{"services": [{"name": "jellyfin"}]}"#).unwrap();
        assert_eq!(value["services"][0]["name"], "jellyfin");

        let err = validate_catalog("<html>").unwrap_err();
        assert!(err.message().contains("not valid JSON"));

        let err = validate_catalog(r#"{"items": []}"#).unwrap_err();
        assert!(err.message().contains("services"));
        assert!(validate_catalog(r#"["services"]"#).is_err());
    }

    #[test]
    fn test_upstream_errors_are_server_errors() {
        let err = CatalogError::Upstream(RelayError::Upstream("boom".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_response_envelope() {
        let (status, Json(body)) = CatalogResponse::err(StatusCode::BAD_REQUEST, "bad");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"success": false, "message": "bad"})
        );
    }

    async fn rejection(content_type: &str, body: &'static str) -> JsonRejection {
        let request = Request::builder()
            .header("content-type", content_type)
            .body(Body::from(body))
            .unwrap();
        Json::<LoadServicesRequest>::from_request(request, &())
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_unreadable_body_uses_envelope() {
        let state = AppState::new(Config::default()).unwrap();

        for payload in [
            rejection("application/json", "{not json").await,
            rejection("text/plain", r#"{"url": "https://example.com"}"#).await,
        ] {
            let (status, Json(body)) = load_services(State(state.clone()), Err(payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(!body.success);
            assert!(body.data.is_none());
            assert!(body.message.unwrap().starts_with("Invalid request"));
        }
    }

    #[tokio::test]
    async fn test_blank_url_rejected_before_fetch() {
        let state = AppState::new(Config::default()).unwrap();
        let request = LoadServicesRequest { url: "  ".to_string() };
        let (status, Json(body)) = load_services(State(state), Ok(Json(request))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.message.as_deref(), Some("URL must not be empty"));
    }
}
