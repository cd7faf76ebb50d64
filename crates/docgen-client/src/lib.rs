//! Document-generation API client.
//!
//! Certificates are produced from a document template in four steps:
//! create the document with recipient tokens, wait for it to leave the
//! upload state, mark it completed, and open a shareable session whose id
//! forms the public certificate URL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sync_core::RetryConfig;

pub const DEFAULT_DOCUMENT_BASE_URL: &str = "https://api.pandadoc.com";
pub const DEFAULT_SHARE_BASE_URL: &str = "https://app.pandadoc.com";

/// Document status code for "completed".
const STATUS_COMPLETED: u8 = 2;

/// Errors returned by the document client.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("document request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("document API returned status {status} for {url}: {body}")]
    Rejected {
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode document response from {url}: {message}")]
    Decode { url: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub name: String,
    pub value: String,
}

/// Body of a create-document-from-template request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub name: String,
    pub template_uuid: String,
    pub folder_uuid: String,
    pub recipients: Vec<Recipient>,
    pub tokens: Vec<Token>,
}

/// Who a certificate is issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSubject {
    pub first_name: String,
    pub last_name: String,
    pub course_name: String,
    pub issued_on: NaiveDate,
}

impl CertificateSubject {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Template a certificate document is generated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTemplate {
    pub template_id: String,
    pub folder_id: String,
    /// Placeholder recipient the template requires
    pub recipient_email: String,
}

impl DocumentTemplate {
    /// Request for a certificate document for `subject`.
    pub fn certificate_request(&self, subject: &CertificateSubject) -> DocumentRequest {
        DocumentRequest {
            name: format!("{} - {} Certificate", subject.course_name, subject.full_name()),
            template_uuid: self.template_id.clone(),
            folder_uuid: self.folder_id.clone(),
            recipients: vec![Recipient {
                email: self.recipient_email.clone(),
            }],
            tokens: vec![
                Token {
                    name: "Student FName Student LName".to_string(),
                    value: subject.full_name(),
                },
                Token {
                    name: "Course Name".to_string(),
                    value: subject.course_name.clone(),
                },
                Token {
                    name: "Date Issued".to_string(),
                    value: subject.issued_on.format("%Y-%m-%d").to_string(),
                },
            ],
        }
    }
}

/// Connection settings for [`DocumentClient`].
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    pub base_url: String,
    pub share_base_url: String,
    pub api_key: String,
    pub template: DocumentTemplate,
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

/// The certificate-document operations the issuance run needs.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Create a document from the template, returning its id.
    async fn create_document(&self, request: &DocumentRequest) -> Result<String, DocumentError>;

    async fn mark_completed(&self, document_id: &str) -> Result<(), DocumentError>;

    /// Open a silent shareable session, returning the session id.
    async fn create_session(&self, document_id: &str) -> Result<String, DocumentError>;

    /// Public URL of a shared session.
    fn share_url(&self, session_id: &str) -> String;
}

/// reqwest-backed [`DocumentApi`].
pub struct DocumentClient {
    http: Client,
    config: DocumentConfig,
}

impl DocumentClient {
    pub fn new(config: DocumentConfig) -> Result<Self, DocumentError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| DocumentError::Transport {
                url: config.base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: &Value,
        expected: StatusCode,
    ) -> Result<String, DocumentError> {
        let url = self.url(path);
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .http
                .request(method.clone(), &url)
                .header("Authorization", format!("API-Key {}", self.config.api_key))
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if retry.should_retry(status.as_u16()) && attempt <= retry.max_retries {
                        let backoff = retry.backoff(attempt);
                        tracing::warn!(
                            url = %url,
                            status = %status,
                            attempt = attempt,
                            wait_ms = backoff.as_millis(),
                            "Transient document API error, retrying with backoff"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    let text = resp.text().await.map_err(|e| DocumentError::Transport {
                        url: url.clone(),
                        message: e.to_string(),
                    })?;
                    if status != expected {
                        tracing::warn!(url = %url, status = %status, body = %text, "Document API request failed");
                        return Err(DocumentError::Rejected {
                            url,
                            status: status.as_u16(),
                            body: text,
                        });
                    }
                    tracing::debug!(url = %url, status = %status, "Document API request succeeded");
                    return Ok(text);
                }
                Err(e) => {
                    if attempt <= retry.max_retries {
                        let backoff = retry.backoff(attempt);
                        tracing::warn!(
                            url = %url,
                            error = %e,
                            attempt = attempt,
                            wait_ms = backoff.as_millis(),
                            "Document API request failed, retrying with backoff"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(DocumentError::Transport {
                        url,
                        message: format!("failed after {attempt} attempts: {e}"),
                    });
                }
            }
        }
    }

    fn decode_id(&self, path: &str, text: &str) -> Result<String, DocumentError> {
        serde_json::from_str::<IdResponse>(text)
            .map(|r| r.id)
            .map_err(|e| DocumentError::Decode {
                url: self.url(path),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl DocumentApi for DocumentClient {
    async fn create_document(&self, request: &DocumentRequest) -> Result<String, DocumentError> {
        let path = "public/v1/documents";
        let body = serde_json::to_value(request).map_err(|e| DocumentError::Decode {
            url: self.url(path),
            message: e.to_string(),
        })?;
        let text = self
            .send(Method::POST, path, &body, StatusCode::CREATED)
            .await?;
        self.decode_id(path, &text)
    }

    async fn mark_completed(&self, document_id: &str) -> Result<(), DocumentError> {
        let path = format!("public/v1/documents/{document_id}/status/");
        self.send(
            Method::PATCH,
            &path,
            &json!({ "status": STATUS_COMPLETED }),
            StatusCode::NO_CONTENT,
        )
        .await?;
        Ok(())
    }

    async fn create_session(&self, document_id: &str) -> Result<String, DocumentError> {
        let path = format!("public/v1/documents/{document_id}/session");
        let body = json!({
            "silent": "true",
            "recipient": self.config.template.recipient_email,
        });
        let text = self
            .send(Method::POST, &path, &body, StatusCode::CREATED)
            .await?;
        self.decode_id(&path, &text)
    }

    fn share_url(&self, session_id: &str) -> String {
        format!(
            "{}/s/{session_id}",
            self.config.share_base_url.trim_end_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> DocumentTemplate {
        DocumentTemplate {
            template_id: "tmpl".to_string(),
            folder_id: "fold".to_string(),
            recipient_email: "certs@example.com".to_string(),
        }
    }

    fn config() -> DocumentConfig {
        DocumentConfig {
            base_url: DEFAULT_DOCUMENT_BASE_URL.to_string(),
            share_base_url: DEFAULT_SHARE_BASE_URL.to_string(),
            api_key: "k".to_string(),
            template: template(),
            retry: RetryConfig::disabled(),
        }
    }

    #[test]
    fn test_certificate_request_tokens() {
        let subject = CertificateSubject {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            course_name: "Data Basics".to_string(),
            issued_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        };
        let request = template().certificate_request(&subject);

        assert_eq!(request.name, "Data Basics - Ada Lovelace Certificate");
        assert_eq!(request.template_uuid, "tmpl");
        assert_eq!(request.recipients[0].email, "certs@example.com");
        assert_eq!(request.tokens[0].value, "Ada Lovelace");
        assert_eq!(request.tokens[2].value, "2024-03-01");
    }

    #[test]
    fn test_share_url() {
        let client = DocumentClient::new(config()).unwrap();
        assert_eq!(client.share_url("abc"), "https://app.pandadoc.com/s/abc");
    }
}
