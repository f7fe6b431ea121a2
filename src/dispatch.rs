//! Per-recipient dispatch: derive, persist code, compose, send, mark sent.
//!
//! Every failure is contained here and reported as [`DispatchOutcome::Failed`].
//! A failure after the code is persisted leaves the row coded but not sent;
//! bulk selection skips such rows and `resend` (or `single`) picks them up.
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::code;
use crate::compose::{ArtifactComposer, ComposeError};
use crate::db::{RecipientStore, StoreError};
use crate::mailer::{Transport, TransportError};
use crate::model::{FailureKind, Recipient, TicketCode};
use crate::render::RenderError;
use crate::ticket::ImageError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("render: {0}")]
    Render(#[from] RenderError),
    #[error("image: {0}")]
    Image(#[from] ImageError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("worker aborted: {0}")]
    Worker(String),
}

impl From<ComposeError> for DispatchError {
    fn from(err: ComposeError) -> Self {
        match err {
            ComposeError::Render(e) => DispatchError::Render(e),
            ComposeError::Image(e) => DispatchError::Image(e),
        }
    }
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::Store(_) => FailureKind::Store,
            DispatchError::Render(_) => FailureKind::Render,
            DispatchError::Image(_) => FailureKind::Image,
            DispatchError::Transport(_) => FailureKind::Transport,
            DispatchError::Worker(_) => FailureKind::Worker,
        }
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Sent { code: TicketCode },
    Failed(DispatchError),
}

#[derive(Debug)]
pub struct DispatchReport {
    pub email: String,
    pub outcome: DispatchOutcome,
}

impl DispatchReport {
    pub fn is_sent(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::Sent { .. })
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn RecipientStore>,
    composer: Arc<ArtifactComposer>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn RecipientStore>,
        composer: Arc<ArtifactComposer>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            composer,
            transport,
        }
    }

    /// Run the full pipeline for one recipient. Never fails; errors become
    /// the `Failed` outcome.
    #[instrument(skip_all, fields(email = %recipient.email))]
    pub async fn dispatch(&self, recipient: Recipient) -> DispatchReport {
        let email = recipient.email.clone();
        let code = code::derive(&email);
        let outcome = match self.deliver(recipient, &code).await {
            Ok(()) => {
                info!(email = %email, code = %code, "mail sent");
                DispatchOutcome::Sent { code }
            }
            Err(err) => {
                warn!(email = %email, kind = err.kind().as_str(), reason = %err, "dispatch failed");
                DispatchOutcome::Failed(err)
            }
        };
        DispatchReport { email, outcome }
    }

    async fn deliver(&self, recipient: Recipient, code: &TicketCode) -> Result<(), DispatchError> {
        self.store.set_code(&recipient.email, code).await?;

        let composer = Arc::clone(&self.composer);
        let ticket_code = code.clone();
        let email = recipient.email.clone();
        let artifact = tokio::task::spawn_blocking(move || composer.compose(&recipient, &ticket_code))
            .await
            .map_err(|err| DispatchError::Worker(err.to_string()))??;

        self.transport.send(&email, &artifact).await?;
        self.store.mark_sent(&email).await?;
        Ok(())
    }

    /// Dispatch to one named recipient, inserting the row when the email is
    /// not in the table yet. An existing row is re-sent with its stored fields.
    /// Mapped columns that are still NULL render as empty strings.
    pub async fn dispatch_individual(&self, name: &str, email: &str) -> DispatchReport {
        match self.ensure_row(name, email).await {
            Ok(mut recipient) => {
                self.composer.fill_missing_fields(&mut recipient);
                self.dispatch(recipient).await
            }
            Err(err) => {
                warn!(email, reason = %err, "individual dispatch failed");
                DispatchReport {
                    email: email.to_string(),
                    outcome: DispatchOutcome::Failed(err.into()),
                }
            }
        }
    }

    async fn ensure_row(&self, name: &str, email: &str) -> Result<Recipient, StoreError> {
        if let Some(existing) = self.store.find_by_email(email).await? {
            info!(email, "recipient already present, re-sending");
            return Ok(existing);
        }
        self.store
            .insert_new(name, email, &code::derive(email))
            .await?;
        self.store
            .find_by_email(email)
            .await?
            .ok_or_else(|| StoreError::NotFound(email.to_string()))
    }
}
