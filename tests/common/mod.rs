#![allow(dead_code)]

use anyhow::Result;
use image::{Rgba, RgbaImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use ticket_dispatch::compose::{Artifact, ArtifactComposer, ComposeSettings};
use ticket_dispatch::config;
use ticket_dispatch::db::{self, Pool, RecipientStore, SqliteStore, StoreError, TableLayout};
use ticket_dispatch::mailer::{Transport, TransportError};
use ticket_dispatch::model::{Recipient, TicketCode};
use ticket_dispatch::render::TemplateRenderer;
use tokio::sync::Mutex;

pub const FULL_TEMPLATE: &str =
    "<p>Hi {{ recipient_name }}, txn {{ recipient_txn_id }}</p><img src=\"cid:ticket\">";
pub const NAME_TEMPLATE: &str = "<p>Hi {{ recipient_name }}</p><img src=\"cid:ticket\">";
pub const SHIPPED_TEMPLATE: &str = include_str!("../../templates/ticket.html");

pub struct TestDb {
    pub dir: TempDir,
    pub url: String,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("tickets.db").display());
        let pool = db::init_pool(&url, 1).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        pool.close().await;
        Self { dir, url }
    }

    pub async fn pool(&self) -> Pool {
        db::init_pool(&self.url, 5).await.unwrap()
    }

    pub async fn store(&self) -> SqliteStore {
        SqliteStore::new(self.pool().await, layout())
    }

    pub async fn seed(&self, rows: &[(&str, &str, Option<&str>)]) {
        let pool = self.pool().await;
        for (name, email, txn) in rows {
            sqlx::query("INSERT INTO recipients (name, email, txn_id) VALUES (?, ?, ?)")
                .bind(name)
                .bind(email)
                .bind(txn)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;
    }

    /// (email, ticket_code, status) for every row, ordered by email.
    pub async fn rows(&self) -> Vec<(String, Option<String>, Option<String>)> {
        let pool = self.pool().await;
        let rows = sqlx::query_as("SELECT email, ticket_code, status FROM recipients ORDER BY email")
            .fetch_all(&pool)
            .await
            .unwrap();
        pool.close().await;
        rows
    }
}

pub fn layout() -> TableLayout {
    let cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
    TableLayout::from_config(&cfg.store, &cfg.message)
}

pub fn composer(template: &str) -> Arc<ArtifactComposer> {
    let renderer = TemplateRenderer::from_source("ticket.html", template.to_string()).unwrap();
    Arc::new(ArtifactComposer::new(
        renderer,
        RgbaImage::from_pixel(600, 1400, Rgba([240, 200, 220, 255])),
        ComposeSettings {
            subject: "Your ticket".into(),
            mapped_fields: layout().fields.keys().cloned().collect(),
            trim_prefix: Default::default(),
            attachment_prefix: "Ticket".into(),
            attachments: Vec::new(),
            archive_dir: None,
        },
    ))
}

#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    reject: HashSet<String>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl RecordingTransport {
    pub fn rejecting(emails: &[&str]) -> Self {
        Self {
            reject: emails.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// (recipient, ticket attachment filename) per accepted message.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, to: &str, artifact: &Artifact) -> Result<(), TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.reject.contains(to) {
            return Err(TransportError::Rejected(format!("550 mailbox unavailable: {to}")));
        }
        self.sent
            .lock()
            .await
            .push((to.to_string(), artifact.ticket_filename.clone()));
        Ok(())
    }
}

/// Store wrapper that fails selected operations.
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub fail_select: bool,
    pub fail_mark_sent: HashSet<String>,
}

impl FlakyStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            fail_select: false,
            fail_mark_sent: HashSet::new(),
        }
    }
}

#[async_trait::async_trait]
impl RecipientStore for FlakyStore {
    async fn select_unprocessed(&self) -> Result<Vec<Recipient>, StoreError> {
        if self.fail_select {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.select_unprocessed().await
    }

    async fn select_stranded(&self) -> Result<Vec<Recipient>, StoreError> {
        self.inner.select_stranded().await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Recipient>, StoreError> {
        self.inner.find_by_email(email).await
    }

    async fn all_emails(&self) -> Result<Vec<String>, StoreError> {
        self.inner.all_emails().await
    }

    async fn set_code(&self, email: &str, code: &TicketCode) -> Result<(), StoreError> {
        self.inner.set_code(email, code).await
    }

    async fn mark_sent(&self, email: &str) -> Result<(), StoreError> {
        if self.fail_mark_sent.contains(email) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.mark_sent(email).await
    }

    async fn insert_new(&self, name: &str, email: &str, code: &TicketCode) -> Result<(), StoreError> {
        self.inner.insert_new(name, email, code).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

pub fn ten_recipients() -> Vec<(String, String, Option<String>)> {
    (0..10)
        .map(|i| {
            let txn = if i == 6 { None } else { Some(format!("TXN-{i:03}")) };
            (format!("Guest {i}"), format!("guest{i}@example.com"), txn)
        })
        .collect()
}

pub async fn seed_owned(db: &TestDb, rows: &[(String, String, Option<String>)]) -> Result<()> {
    let borrowed: Vec<(&str, &str, Option<&str>)> = rows
        .iter()
        .map(|(n, e, t)| (n.as_str(), e.as_str(), t.as_deref()))
        .collect();
    db.seed(&borrowed).await;
    Ok(())
}
