use async_trait::async_trait;
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue},
};
use serde_json::json;
use thiserror::Error;

use crate::config::Secret;

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("mailer initialization failed: {0}")]
    Initialization(String),

    #[error("mail request failed: {0}")]
    Request(String),

    #[error("mail API returned {status}: {message}")]
    Api { status: u16, message: String },
}

/// Outbound notification seam. Confirmation emails are best-effort, so
/// callers must treat a send failure as non-fatal.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailerError>;
}

/// Sends mail through an HTTP mail API with a bearer key.
pub struct HttpMailer {
    client: Client,
    api_url: String,
    from: String,
}

impl HttpMailer {
    pub fn new(api_url: String, api_key: &Secret, from: String) -> Result<Self, MailerError> {
        let mut headers = HeaderMap::with_capacity(2);
        let val = HeaderValue::from_str(&format!("Bearer {}", api_key.reveal()))
            .map_err(|e| MailerError::Initialization(e.to_string()))?;
        headers.insert("Authorization", val);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| MailerError::Initialization(e.to_string()))?;
        Ok(Self {
            client,
            api_url,
            from,
        })
    }
}

#[async_trait]
impl NotificationSender for HttpMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailerError> {
        let body = json!({
            "from": self.from,
            "to": [to],
            "subject": subject,
            "html": html_body,
        });
        let response = self
            .client
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MailerError::Request(e.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .map_err(|e| MailerError::Request(e.to_string()))?;
        Err(MailerError::Api { status, message })
    }
}

/// Stand-in when no mail API is configured. Logs the would-be send so the
/// flow stays observable in development.
pub struct NoopMailer;

#[async_trait]
impl NotificationSender for NoopMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), MailerError> {
        tracing::info!(to = %to, subject = %subject, "mail API not configured, skipping send");
        Ok(())
    }
}
