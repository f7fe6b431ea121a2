//! Outbound mail transport.
//!
//! [`SmtpMailer`] opens a fresh STARTTLS session for every message; nothing
//! is pooled between recipients.
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::compose::Artifact;
use crate::config;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Authentication, connection or server-side rejection.
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("recipient rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: &str, artifact: &Artifact) -> Result<(), TransportError>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    host: String,
    port: u16,
    credentials: Credentials,
    from: Mailbox,
    timeout: Duration,
}

impl std::fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl SmtpMailer {
    pub fn from_config(smtp: &config::Smtp) -> Result<Self, TransportError> {
        Ok(Self {
            host: smtp.host.clone(),
            port: smtp.port,
            credentials: Credentials::new(smtp.username.clone(), smtp.password.clone()),
            from: smtp.from.parse()?,
            timeout: Duration::from_secs(smtp.timeout_secs),
        })
    }

    pub fn build_message(&self, to: &str, artifact: &Artifact) -> Result<Message, TransportError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject(artifact.subject.clone())
            .multipart(artifact.body.clone())?;
        Ok(message)
    }
}

#[async_trait]
impl Transport for SmtpMailer {
    async fn send(&self, to: &str, artifact: &Artifact) -> Result<(), TransportError> {
        let message = self.build_message(to, artifact)?;
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)?
            .port(self.port)
            .credentials(self.credentials.clone())
            .timeout(Some(self.timeout))
            .build();
        let response = mailer.send(message).await?;
        if !response.is_positive() {
            return Err(TransportError::Rejected(response.code().to_string()));
        }
        debug!(to, code = %response.code(), "smtp accepted message");
        Ok(())
    }
}
