//! HTTP client for the LMS API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sync_core::RetryConfig;
use tokio::sync::Mutex;

use crate::error::LmsError;
use crate::types::{CourseDetail, RawCourse, RawUser, TimelineEvent, UserDetail};

/// Timeline event type recorded when a learner answers an assignment unit.
pub const ASSIGNMENT_ANSWERED_EVENT: &str = "unitprogress_assignment_answered";

/// Pause the LMS rate limit asks for between consecutive requests.
pub const DEFAULT_REQUEST_PAUSE: Duration = Duration::from_millis(360);

/// Read access to the upstream LMS.
///
/// Lookups of a single course or user return `Ok(None)` when the LMS reports
/// that the record does not exist.
#[async_trait]
pub trait LmsApi: Send + Sync {
    async fn list_users(&self) -> Result<Vec<RawUser>, LmsError>;

    async fn list_courses(&self) -> Result<Vec<RawCourse>, LmsError>;

    async fn get_course(&self, course_id: i64) -> Result<Option<CourseDetail>, LmsError>;

    async fn get_user(&self, user_id: i64) -> Result<Option<UserDetail>, LmsError>;

    /// Users who answered the assignment unit `unit_id`.
    async fn assignment_answers(&self, unit_id: i64) -> Result<Vec<TimelineEvent>, LmsError>;
}

/// Connection settings for [`LmsClient`].
#[derive(Debug, Clone)]
pub struct LmsConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_pause: Duration,
    pub retry: RetryConfig,
}

impl LmsConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            request_pause: DEFAULT_REQUEST_PAUSE,
            retry: RetryConfig::default(),
        }
    }
}

/// reqwest-backed [`LmsApi`].
///
/// Requests are serialized and spaced by at least `request_pause`.
pub struct LmsClient {
    http: Client,
    config: LmsConfig,
    last_request: Mutex<Option<Instant>>,
}

impl LmsClient {
    pub fn new(config: LmsConfig) -> Result<Self, LmsError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LmsError::Transport {
                url: config.base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            config,
            last_request: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// GET `path` and decode it, `Ok(None)` when the LMS says the record
    /// does not exist.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, LmsError> {
        let url = self.url(path);
        let (status, body) = self.send_with_retry(&url).await?;

        let value: Value = serde_json::from_str(&body).map_err(|e| LmsError::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if status == StatusCode::NOT_FOUND || message.contains("does not exist") {
                tracing::debug!(url = %url, "No results from LMS request");
                return Ok(None);
            }
            return Err(LmsError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        if !status.is_success() {
            return Err(LmsError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| LmsError::Decode {
                url,
                message: e.to_string(),
            })
    }

    async fn send_with_retry(&self, url: &str) -> Result<(StatusCode, String), LmsError> {
        let retry = &self.config.retry;
        let mut last_request = self.last_request.lock().await;
        let mut attempt = 0;

        loop {
            attempt += 1;

            if let Some(previous) = *last_request {
                let elapsed = previous.elapsed();
                if elapsed < self.config.request_pause {
                    tokio::time::sleep(self.config.request_pause - elapsed).await;
                }
            }

            tracing::debug!(url = %url, attempt = attempt, "Sending LMS request");
            let response = self
                .http
                .get(url)
                .basic_auth(&self.config.api_key, Some(""))
                .send()
                .await;
            *last_request = Some(Instant::now());

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if retry.should_retry(status.as_u16()) && attempt <= retry.max_retries {
                        let backoff = retry.backoff(attempt);
                        tracing::warn!(
                            url = %url,
                            status = %status,
                            attempt = attempt,
                            wait_ms = backoff.as_millis(),
                            "Transient LMS error, retrying with backoff"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    let body = resp.text().await.map_err(|e| LmsError::Transport {
                        url: url.to_string(),
                        message: e.to_string(),
                    })?;
                    return Ok((status, body));
                }
                Err(e) => {
                    if attempt <= retry.max_retries {
                        let backoff = retry.backoff(attempt);
                        tracing::warn!(
                            url = %url,
                            error = %e,
                            attempt = attempt,
                            wait_ms = backoff.as_millis(),
                            "LMS request failed, retrying with backoff"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(LmsError::Transport {
                        url: url.to_string(),
                        message: format!("failed after {attempt} attempts: {e}"),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl LmsApi for LmsClient {
    async fn list_users(&self) -> Result<Vec<RawUser>, LmsError> {
        Ok(self.get_json("api/v1/users").await?.unwrap_or_default())
    }

    async fn list_courses(&self) -> Result<Vec<RawCourse>, LmsError> {
        Ok(self.get_json("api/v1/courses").await?.unwrap_or_default())
    }

    async fn get_course(&self, course_id: i64) -> Result<Option<CourseDetail>, LmsError> {
        self.get_json(&format!("api/v1/courses/id:{course_id}"))
            .await
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<UserDetail>, LmsError> {
        self.get_json(&format!("api/v1/users/id:{user_id}")).await
    }

    async fn assignment_answers(&self, unit_id: i64) -> Result<Vec<TimelineEvent>, LmsError> {
        let path =
            format!("api/v1/gettimeline/event_type:{ASSIGNMENT_ANSWERED_EVENT},unit_id:{unit_id}");
        Ok(self.get_json(&path).await?.unwrap_or_default())
    }
}
