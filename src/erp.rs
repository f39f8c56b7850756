//! # ERP Client
//!
//! Pushes catalog items to the ERP. The [`ErpClient`] trait is the seam the
//! dispatcher depends on; [`RestletErpClient`] talks to a RESTlet endpoint
//! over HTTPS with a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ErpConfig;
use crate::error::SyncError;
use crate::models::{catalog_item, types::SyncFields};

const USER_AGENT: &str = concat!("opms-sync/", env!("CARGO_PKG_VERSION"));
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ErpError {
    #[error("ERP client is not configured: {0}")]
    NotConfigured(String),

    #[error("Rate limited by ERP. Retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("ERP server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("ERP rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("ERP authentication failed ({status})")]
    Unauthorized { status: u16 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected ERP response: {0}")]
    InvalidResponse(String),
}

impl From<ErpError> for SyncError {
    fn from(error: ErpError) -> Self {
        match error {
            ErpError::RateLimited { retry_after } => {
                SyncError::transient_after(Some(retry_after), error.to_string())
            }
            ErpError::Server { .. } | ErpError::Network(_) => SyncError::transient(error.to_string()),
            ErpError::Rejected { .. } | ErpError::Unauthorized { .. } => {
                SyncError::permanent(error.to_string())
            }
            ErpError::NotConfigured(_) | ErpError::InvalidResponse(_) => {
                SyncError::unexpected(error.to_string())
            }
        }
    }
}

/// One item push.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErpPushRequest {
    pub item_id: i64,
    pub product_id: i64,
    pub item_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netsuite_item_id: Option<String>,
    pub fields: SyncFields,
}

impl ErpPushRequest {
    pub fn for_item(item: &catalog_item::Model, netsuite_item_id: Option<String>) -> Self {
        Self {
            item_id: item.id,
            product_id: item.product_id,
            item_code: item.code.clone(),
            netsuite_item_id,
            fields: item_fields(item),
        }
    }
}

/// Identifiers the ERP matches items on. Field mapping beyond these is owned
/// by the RESTlet.
pub fn item_fields(item: &catalog_item::Model) -> SyncFields {
    let mut fields = SyncFields::default();
    fields.insert("itemid", item.code.as_str());
    fields.insert("externalid", format!("OPMS-{}", item.id));
    fields.insert("custitem_opms_item_id", item.id);
    fields.insert("custitem_opms_product_id", item.product_id);
    fields
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErpPushResult {
    /// ERP internal id of the item
    pub external_id: String,
    pub response: JsonValue,
}

#[async_trait]
pub trait ErpClient: Send + Sync {
    async fn push_item(&self, request: &ErpPushRequest) -> Result<ErpPushResult, ErpError>;
}

#[derive(Debug, Deserialize)]
struct RestletResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default, alias = "internalId")]
    id: Option<JsonValue>,
    #[serde(default)]
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

/// `ErpClient` backed by a RESTlet endpoint.
#[derive(Debug, Clone)]
pub struct RestletErpClient {
    client: reqwest::Client,
    endpoint: url::Url,
    api_token: Option<String>,
}

impl RestletErpClient {
    pub fn new(config: &ErpConfig) -> Result<Self, ErpError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| ErpError::NotConfigured("OPMS_ERP_BASE_URL is not set".to_string()))?;
        let endpoint = url::Url::parse(base_url)
            .map_err(|err| ErpError::NotConfigured(format!("invalid ERP base url: {}", err)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_token: config.api_token.clone(),
        })
    }

    fn retry_after(response: &reqwest::Response) -> u64 {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
    }
}

#[async_trait]
impl ErpClient for RestletErpClient {
    async fn push_item(&self, request: &ErpPushRequest) -> Result<ErpPushResult, ErpError> {
        let mut builder = self.client.post(self.endpoint.clone()).json(request);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = Self::retry_after(&response);
            warn!(retry_after, item_code = %request.item_code, "ERP rate limit hit");
            return Err(ErpError::RateLimited { retry_after });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ErpError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), item_code = %request.item_code, "ERP server error");
            return Err(ErpError::Server {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ErpError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|err| ErpError::InvalidResponse(err.to_string()))?;
        let parsed: RestletResponse = serde_json::from_value(body.clone())
            .map_err(|err| ErpError::InvalidResponse(err.to_string()))?;

        if !parsed.success {
            return Err(ErpError::Rejected {
                status: status.as_u16(),
                message: parsed
                    .error
                    .unwrap_or_else(|| "push reported failure".to_string()),
            });
        }

        let external_id = match parsed.id {
            Some(JsonValue::String(id)) => id,
            Some(JsonValue::Number(id)) => id.to_string(),
            _ => {
                return Err(ErpError::InvalidResponse(
                    "response carries no item id".to_string(),
                ));
            }
        };

        debug!(item_code = %request.item_code, external_id = %external_id, "Item pushed to ERP");

        Ok(ErpPushResult {
            external_id,
            response: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> RestletErpClient {
        RestletErpClient::new(&ErpConfig {
            base_url: Some(format!("{}/restlet", server.uri())),
            api_token: Some("erp-token".to_string()),
            timeout_ms: 2_000,
            dry_run: false,
        })
        .unwrap()
    }

    fn request() -> ErpPushRequest {
        ErpPushRequest::for_item(
            &catalog_item::Model {
                id: 7,
                product_id: 70,
                code: "opmsAPI01".to_string(),
                archived: false,
            },
            None,
        )
    }

    #[test]
    fn item_fields_carry_identifiers() {
        let fields = request().fields;
        assert_eq!(fields.0["itemid"], json!("opmsAPI01"));
        assert_eq!(fields.0["externalid"], json!("OPMS-7"));
        assert_eq!(fields.len(), 4);
    }

    #[test]
    fn missing_base_url_is_not_configured() {
        let err = RestletErpClient::new(&ErpConfig::default()).unwrap_err();
        assert!(matches!(err, ErpError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn push_returns_external_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/restlet"))
            .and(header("authorization", "Bearer erp-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "id": 4411})))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server).push_item(&request()).await.unwrap();
        assert_eq!(result.external_id, "4411");
    }

    #[tokio::test]
    async fn rate_limit_is_transient_with_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .mount(&server)
            .await;

        let err = client_for(&server).push_item(&request()).await.unwrap_err();
        let sync_err = SyncError::from(err);
        assert!(sync_err.is_retryable());
        assert_eq!(sync_err.retry_after_secs(), Some(120));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client_for(&server).push_item(&request()).await.unwrap_err();
        assert!(matches!(err, ErpError::Server { status: 503, .. }));
        assert!(SyncError::from(err).is_retryable());
    }

    #[tokio::test]
    async fn client_errors_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad field"))
            .mount(&server)
            .await;

        let err = client_for(&server).push_item(&request()).await.unwrap_err();
        let sync_err = SyncError::from(err);
        assert!(!sync_err.is_retryable());
        assert_eq!(sync_err.code(), "permanent_error");
    }

    #[tokio::test]
    async fn reported_failure_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "error": "duplicate itemid"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).push_item(&request()).await.unwrap_err();
        match err {
            ErpError::Rejected { message, .. } => assert_eq!(message, "duplicate itemid"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
