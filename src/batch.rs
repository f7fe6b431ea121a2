//! Batch coordinator: snapshot the selection, fan out over a bounded pool of
//! dispatch tasks, fan the outcomes back in.
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use crate::db::{RecipientStore, StoreError};
use crate::dispatch::{DispatchError, DispatchOutcome, DispatchReport, Dispatcher};
use crate::model::{BatchSummary, Recipient};

pub const DEFAULT_CONCURRENCY: usize = 5;

/// Completion counter shared with observers while a batch runs.
#[derive(Debug, Default)]
pub struct Progress {
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl Progress {
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    fn start(&self, total: usize) {
        self.completed.store(0, Ordering::Release);
        self.total.store(total, Ordering::Release);
    }

    fn complete_one(&self) -> usize {
        self.completed.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Which rows a run picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Rows without a ticket code.
    Unprocessed,
    /// Rows with a code whose status never reached the sent marker.
    Stranded,
}

pub struct BatchCoordinator {
    store: Arc<dyn RecipientStore>,
    dispatcher: Arc<Dispatcher>,
    concurrency: usize,
    progress: Arc<Progress>,
}

impl BatchCoordinator {
    pub fn new(store: Arc<dyn RecipientStore>, dispatcher: Dispatcher, concurrency: usize) -> Self {
        Self {
            store,
            dispatcher: Arc::new(dispatcher),
            concurrency: concurrency.max(1),
            progress: Arc::new(Progress::default()),
        }
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// Dispatch every unprocessed recipient, then close the store.
    pub async fn run(&self) -> Result<BatchSummary, StoreError> {
        self.run_selection(Selection::Unprocessed).await
    }

    pub async fn run_selection(&self, selection: Selection) -> Result<BatchSummary, StoreError> {
        let recipients = match selection {
            Selection::Unprocessed => self.store.select_unprocessed().await,
            Selection::Stranded => self.store.select_stranded().await,
        };
        let recipients = match recipients {
            Ok(recipients) => recipients,
            Err(err) => {
                self.store.close().await;
                return Err(err);
            }
        };
        info!(?selection, total = recipients.len(), concurrency = self.concurrency, "batch started");

        let summary = self.dispatch_all(recipients).await;
        self.store.close().await;
        info!(
            sent = summary.sent.len(),
            failed = summary.failed.len(),
            "batch finished"
        );
        Ok(summary)
    }

    async fn dispatch_all(&self, recipients: Vec<Recipient>) -> BatchSummary {
        let total = recipients.len();
        self.progress.start(total);
        let mut summary = BatchSummary::new(total);

        let mut reports = stream::iter(recipients)
            .map(|recipient| {
                let dispatcher = Arc::clone(&self.dispatcher);
                let email = recipient.email.clone();
                async move {
                    let task = tokio::spawn(async move { dispatcher.dispatch(recipient).await });
                    match task.await {
                        Ok(report) => report,
                        Err(err) => {
                            error!(email = %email, ?err, "dispatch task aborted");
                            DispatchReport {
                                email,
                                outcome: DispatchOutcome::Failed(DispatchError::Worker(
                                    err.to_string(),
                                )),
                            }
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some(report) = reports.next().await {
            let completed = self.progress.complete_one();
            info!(completed, total, email = %report.email, "progress");
            match report.outcome {
                DispatchOutcome::Sent { code } => summary.record_sent(report.email, &code),
                DispatchOutcome::Failed(err) => {
                    summary.record_failed(report.email, err.kind(), err.to_string())
                }
            }
        }

        summary.finish();
        summary
    }
}
