//! Recipient store: the table that records which tickets went out.
//!
//! - `model`: the configured table layout.
//! - `repo`: SQL-only functions over a [`Pool`].
//!
//! [`RecipientStore`] is the seam the dispatch pipeline talks to;
//! [`SqliteStore`] backs it with `repo`.

pub mod model;
pub mod repo;

pub use model::TableLayout;
pub use repo::*;

use crate::model::{Recipient, TicketCode};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("no recipient row for {0}")]
    NotFound(String),
}

/// Durable recipient state. Every write is committed before it returns.
#[async_trait]
pub trait RecipientStore: Send + Sync {
    async fn select_unprocessed(&self) -> Result<Vec<Recipient>, StoreError>;

    async fn select_stranded(&self) -> Result<Vec<Recipient>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Recipient>, StoreError>;

    async fn all_emails(&self) -> Result<Vec<String>, StoreError>;

    async fn set_code(&self, email: &str, code: &TicketCode) -> Result<(), StoreError>;

    async fn mark_sent(&self, email: &str) -> Result<(), StoreError>;

    async fn insert_new(&self, name: &str, email: &str, code: &TicketCode) -> Result<(), StoreError>;

    /// Release connections once a run is over.
    async fn close(&self);
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
    layout: Arc<TableLayout>,
}

impl SqliteStore {
    pub fn new(pool: Pool, layout: TableLayout) -> Self {
        Self {
            pool,
            layout: Arc::new(layout),
        }
    }
}

#[async_trait]
impl RecipientStore for SqliteStore {
    async fn select_unprocessed(&self) -> Result<Vec<Recipient>, StoreError> {
        repo::select_unprocessed(&self.pool, &self.layout).await
    }

    async fn select_stranded(&self) -> Result<Vec<Recipient>, StoreError> {
        repo::select_stranded(&self.pool, &self.layout).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Recipient>, StoreError> {
        repo::find_by_email(&self.pool, &self.layout, email).await
    }

    async fn all_emails(&self) -> Result<Vec<String>, StoreError> {
        repo::all_emails(&self.pool, &self.layout).await
    }

    async fn set_code(&self, email: &str, code: &TicketCode) -> Result<(), StoreError> {
        repo::set_code(&self.pool, &self.layout, email, code).await
    }

    async fn mark_sent(&self, email: &str) -> Result<(), StoreError> {
        repo::mark_sent(&self.pool, &self.layout, email).await
    }

    async fn insert_new(&self, name: &str, email: &str, code: &TicketCode) -> Result<(), StoreError> {
        repo::insert_new(&self.pool, &self.layout, name, email, code).await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
