//! HTTP client for the CRM records API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sync_core::RetryConfig;

use crate::error::CrmError;
use crate::types::{
    AssociationInput, AssociationResponse, BatchRequest, BatchResponse, CreateInput,
    PropertyDefinition, PropertyOption, RecordPage, SearchRequest, UpdateInput, MAX_BATCH_SIZE,
};

pub const DEFAULT_CRM_BASE_URL: &str = "https://api.hubapi.com";

/// Write and read access to the CRM.
///
/// Batch calls take at most [`MAX_BATCH_SIZE`] inputs; chunking is the
/// caller's job. A whole-request rejection is returned as
/// [`CrmError::Rejected`], per-item failures come back in the response.
#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn create_batch(
        &self,
        object_type: &str,
        inputs: Vec<CreateInput>,
    ) -> Result<BatchResponse, CrmError>;

    async fn update_batch(
        &self,
        object_type: &str,
        inputs: Vec<UpdateInput>,
    ) -> Result<BatchResponse, CrmError>;

    async fn create_associations(
        &self,
        from_object_type: &str,
        to_object_type: &str,
        inputs: Vec<AssociationInput>,
    ) -> Result<AssociationResponse, CrmError>;

    async fn read_property(
        &self,
        object_type: &str,
        property: &str,
    ) -> Result<PropertyDefinition, CrmError>;

    /// Append `option` to an enumerated property, keeping existing options.
    async fn add_property_option(
        &self,
        object_type: &str,
        property: &str,
        option: PropertyOption,
    ) -> Result<PropertyDefinition, CrmError>;

    async fn search(
        &self,
        object_type: &str,
        request: &SearchRequest,
    ) -> Result<RecordPage, CrmError>;

    /// One page of all records of `object_type`.
    async fn list_page(
        &self,
        object_type: &str,
        properties: &[String],
        after: Option<&str>,
    ) -> Result<RecordPage, CrmError>;
}

/// Connection settings for [`CrmClient`].
#[derive(Debug, Clone)]
pub struct CrmConfig {
    pub base_url: String,
    pub token: String,
    pub retry: RetryConfig,
}

impl CrmConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            retry: RetryConfig::default(),
        }
    }
}

/// Error body the CRM sends with 4xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    category: Option<String>,
}

/// reqwest-backed [`CrmApi`] using bearer-token auth.
pub struct CrmClient {
    http: Client,
    config: CrmConfig,
}

impl CrmClient {
    pub fn new(config: CrmConfig) -> Result<Self, CrmError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CrmError::Transport {
                url: config.base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<T, CrmError> {
        let url = self.url(path);
        let (status, text) = self.send_with_retry(method, &url, query, body).await?;

        if !status.is_success() {
            let (message, category) = match serde_json::from_str::<ApiErrorBody>(&text) {
                Ok(parsed) if !parsed.message.is_empty() => (parsed.message, parsed.category),
                _ => (text, None),
            };
            return Err(CrmError::Rejected {
                status: status.as_u16(),
                category,
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| CrmError::Decode {
            url,
            message: e.to_string(),
        })
    }

    async fn send_with_retry(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<(StatusCode, String), CrmError> {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut request = self
                .http
                .request(method.clone(), url)
                .bearer_auth(&self.config.token);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(json_body) = body {
                request = request.json(json_body);
            }

            tracing::debug!(url = %url, method = %method, attempt = attempt, "Sending CRM request");

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if retry.should_retry(status.as_u16()) && attempt <= retry.max_retries {
                        let backoff = retry.backoff(attempt);
                        tracing::warn!(
                            url = %url,
                            status = %status,
                            attempt = attempt,
                            wait_ms = backoff.as_millis(),
                            "Transient CRM error, retrying with backoff"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    let text = resp.text().await.map_err(|e| CrmError::Transport {
                        url: url.to_string(),
                        message: e.to_string(),
                    })?;
                    return Ok((status, text));
                }
                Err(e) => {
                    if attempt <= retry.max_retries {
                        let backoff = retry.backoff(attempt);
                        tracing::warn!(
                            url = %url,
                            error = %e,
                            attempt = attempt,
                            wait_ms = backoff.as_millis(),
                            "CRM request failed, retrying with backoff"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(CrmError::Transport {
                        url: url.to_string(),
                        message: format!("failed after {attempt} attempts: {e}"),
                    });
                }
            }
        }
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, CrmError> {
    serde_json::to_value(value).map_err(|e| CrmError::Decode {
        url: String::new(),
        message: format!("failed to encode request: {e}"),
    })
}

fn check_batch_size(len: usize) -> Result<(), CrmError> {
    if len > MAX_BATCH_SIZE {
        return Err(CrmError::Rejected {
            status: 400,
            category: Some("VALIDATION_ERROR".to_string()),
            message: format!("batch of {len} inputs exceeds the limit of {MAX_BATCH_SIZE}"),
        });
    }
    Ok(())
}

#[async_trait]
impl CrmApi for CrmClient {
    async fn create_batch(
        &self,
        object_type: &str,
        inputs: Vec<CreateInput>,
    ) -> Result<BatchResponse, CrmError> {
        check_batch_size(inputs.len())?;
        let body = to_body(&BatchRequest { inputs })?;
        self.request(
            Method::POST,
            &format!("crm/v3/objects/{object_type}/batch/create"),
            &[],
            Some(&body),
        )
        .await
    }

    async fn update_batch(
        &self,
        object_type: &str,
        inputs: Vec<UpdateInput>,
    ) -> Result<BatchResponse, CrmError> {
        check_batch_size(inputs.len())?;
        let body = to_body(&BatchRequest { inputs })?;
        self.request(
            Method::POST,
            &format!("crm/v3/objects/{object_type}/batch/update"),
            &[],
            Some(&body),
        )
        .await
    }

    async fn create_associations(
        &self,
        from_object_type: &str,
        to_object_type: &str,
        inputs: Vec<AssociationInput>,
    ) -> Result<AssociationResponse, CrmError> {
        check_batch_size(inputs.len())?;
        let body = to_body(&BatchRequest { inputs })?;
        self.request(
            Method::POST,
            &format!("crm/v3/associations/{from_object_type}/{to_object_type}/batch/create"),
            &[],
            Some(&body),
        )
        .await
    }

    async fn read_property(
        &self,
        object_type: &str,
        property: &str,
    ) -> Result<PropertyDefinition, CrmError> {
        self.request(
            Method::GET,
            &format!("crm/v3/properties/{object_type}/{property}"),
            &[],
            None,
        )
        .await
    }

    async fn add_property_option(
        &self,
        object_type: &str,
        property: &str,
        option: PropertyOption,
    ) -> Result<PropertyDefinition, CrmError> {
        let mut definition = self.read_property(object_type, property).await?;
        if definition.options.iter().any(|o| o.value == option.value) {
            return Ok(definition);
        }
        definition.options.push(option);

        let body = to_body(&serde_json::json!({ "options": definition.options }))?;
        self.request(
            Method::PATCH,
            &format!("crm/v3/properties/{object_type}/{property}"),
            &[],
            Some(&body),
        )
        .await
    }

    async fn search(
        &self,
        object_type: &str,
        request: &SearchRequest,
    ) -> Result<RecordPage, CrmError> {
        let body = to_body(request)?;
        self.request(
            Method::POST,
            &format!("crm/v3/objects/{object_type}/search"),
            &[],
            Some(&body),
        )
        .await
    }

    async fn list_page(
        &self,
        object_type: &str,
        properties: &[String],
        after: Option<&str>,
    ) -> Result<RecordPage, CrmError> {
        let mut query = vec![
            ("limit", MAX_BATCH_SIZE.to_string()),
            ("archived", "false".to_string()),
            ("properties", properties.join(",")),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        self.request(
            Method::GET,
            &format!("crm/v3/objects/{object_type}"),
            &query,
            None,
        )
        .await
    }
}
