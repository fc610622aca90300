use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::MailConfig;
use crate::identity::OtpDelivery;

/// Port for sending OTP emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_otp(&self, to_email: &str, to_name: &str, otp: &str) -> Result<()>;
}

#[derive(Serialize)]
struct TemplateParams<'a> {
    to_email: &'a str,
    to_name: &'a str,
    otp: &'a str,
}

#[derive(Serialize)]
struct TemplateRequest<'a> {
    service_id: &'a str,
    template_id: &'a str,
    user_id: &'a str,
    template_params: TemplateParams<'a>,
}

/// Template based HTTP mail API (EmailJS request shape).
pub struct HttpMailer {
    client: reqwest::Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_otp(&self, to_email: &str, to_name: &str, otp: &str) -> Result<()> {
        let body = TemplateRequest {
            service_id: &self.config.service_id,
            template_id: &self.config.template_id,
            user_id: &self.config.public_key,
            template_params: TemplateParams {
                to_email,
                to_name,
                otp,
            },
        };
        self.client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .context("mail endpoint unreachable")?
            .error_for_status()
            .context("mail endpoint rejected the request")?;
        tracing::info!(to = to_email, "otp mail sent");
        Ok(())
    }
}

/// Development mailer that only logs the code.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_otp(&self, to_email: &str, to_name: &str, otp: &str) -> Result<()> {
        tracing::info!(to = to_email, name = to_name, otp, "mail not configured, logging otp");
        Ok(())
    }
}

/// Keeps every delivery in memory; optionally refuses to send.
#[derive(Debug, Default, Clone)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<OtpDelivery>>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OtpDelivery> {
        self.sent.lock().clone()
    }

    /// Most recent code mailed to `email`.
    pub fn last_otp(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|d| d.email.eq_ignore_ascii_case(email))
            .map(|d| d.otp.clone())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_otp(&self, to_email: &str, to_name: &str, otp: &str) -> Result<()> {
        if self.fail {
            anyhow::bail!("mail delivery disabled");
        }
        self.sent.lock().push(OtpDelivery {
            email: to_email.to_string(),
            name: to_name.to_string(),
            otp: otp.to_string(),
        });
        Ok(())
    }
}
