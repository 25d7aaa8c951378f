//! Transactional email via the Resend HTTP API

use reqwest::Client;
use serde::Serialize;

use crate::config::Config;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("email delivery is not configured (missing RESEND_API_KEY)")]
    NotConfigured,
    #[error("email request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("email provider rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// A plain-text message
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

#[derive(Clone)]
pub struct EmailService {
    http: Client,
    api_key: Option<String>,
    from: String,
    endpoint: String,
}

impl EmailService {
    pub fn new(http: Client, api_key: Option<String>, from: &str) -> Self {
        Self {
            http,
            api_key: api_key.filter(|k| !k.is_empty()),
            from: from.to_string(),
            endpoint: RESEND_API_URL.to_string(),
        }
    }

    pub fn from_config(http: Client, config: &Config) -> Self {
        Self::new(http, Some(config.resend_api_key.clone()), &config.email_from)
    }

    /// Point the service at a different endpoint (tests)
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let api_key = self.api_key.as_deref().ok_or(EmailError::NotConfigured)?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&ResendRequest {
                from: &self.from,
                to: [&message.to],
                subject: &message.subject,
                text: &message.text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, "Resend rejected email");
            return Err(EmailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(to = %message.to, subject = %message.subject, "Email sent");
        Ok(())
    }
}
