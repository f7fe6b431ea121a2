use super::model::TableLayout;
use super::StoreError;
use crate::model::{Recipient, TicketCode};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<Pool, StoreError> {
    let normalized = prepare_sqlite_url(database_url);
    let in_memory = normalized.contains(":memory:");
    let mut options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(10));
    if !in_memory {
        // WAL lets readers proceed while a worker commits.
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { max_connections })
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and ensure its parent
/// directory exists. Other URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn recipient_from_row(layout: &TableLayout, row: &SqliteRow) -> Result<Recipient, StoreError> {
    let mut fields = BTreeMap::new();
    for var in layout.fields.keys() {
        let alias = format!("f_{var}");
        if let Some(value) = row.try_get::<Option<String>, _>(alias.as_str())? {
            fields.insert(var.clone(), value);
        }
    }
    Ok(Recipient {
        name: row
            .try_get::<Option<String>, _>("r_name")?
            .unwrap_or_default(),
        email: row.try_get("r_email")?,
        fields,
        ticket_code: row.try_get("r_code")?,
        status: row.try_get("r_status")?,
    })
}

/// Recipients whose ticket code has never been set.
#[instrument(skip_all)]
pub async fn select_unprocessed(pool: &Pool, layout: &TableLayout) -> Result<Vec<Recipient>, StoreError> {
    let sql = layout.select_sql(&format!("{} IS NULL", layout.code));
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter()
        .map(|row| recipient_from_row(layout, row))
        .collect()
}

/// Recipients with a ticket code whose status never reached the sent marker.
#[instrument(skip_all)]
pub async fn select_stranded(pool: &Pool, layout: &TableLayout) -> Result<Vec<Recipient>, StoreError> {
    let sql = layout.select_sql(&format!(
        "{code} IS NOT NULL AND ({status} IS NULL OR {status} <> ?)",
        code = layout.code,
        status = layout.status,
    ));
    let rows = sqlx::query(&sql)
        .bind(&layout.sent_marker)
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| recipient_from_row(layout, row))
        .collect()
}

#[instrument(skip_all)]
pub async fn find_by_email(
    pool: &Pool,
    layout: &TableLayout,
    email: &str,
) -> Result<Option<Recipient>, StoreError> {
    let sql = layout.select_sql(&format!("{} = ? LIMIT 1", layout.email));
    let row = sqlx::query(&sql).bind(email).fetch_optional(pool).await?;
    row.map(|row| recipient_from_row(layout, &row)).transpose()
}

#[instrument(skip_all)]
pub async fn all_emails(pool: &Pool, layout: &TableLayout) -> Result<Vec<String>, StoreError> {
    let sql = format!(
        "SELECT {email} FROM {table} WHERE {email} IS NOT NULL",
        email = layout.email,
        table = layout.table,
    );
    let emails = sqlx::query_scalar::<_, String>(&sql).fetch_all(pool).await?;
    Ok(emails)
}

/// Update a single column for one recipient in its own transaction.
async fn update_column(
    pool: &Pool,
    layout: &TableLayout,
    column: &str,
    value: &str,
    email: &str,
) -> Result<(), StoreError> {
    let sql = format!(
        "UPDATE {} SET {} = ? WHERE {} = ?",
        layout.table, column, layout.email
    );
    let mut tx = pool.begin().await?;
    let result = sqlx::query(&sql)
        .bind(value)
        .bind(email)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(email.to_string()));
    }
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_code(
    pool: &Pool,
    layout: &TableLayout,
    email: &str,
    code: &TicketCode,
) -> Result<(), StoreError> {
    update_column(pool, layout, &layout.code, code.as_str(), email).await
}

#[instrument(skip_all)]
pub async fn mark_sent(pool: &Pool, layout: &TableLayout, email: &str) -> Result<(), StoreError> {
    update_column(pool, layout, &layout.status, &layout.sent_marker, email).await
}

#[instrument(skip_all)]
pub async fn insert_new(
    pool: &Pool,
    layout: &TableLayout,
    name: &str,
    email: &str,
    code: &TicketCode,
) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO {} ({}, {}, {}) VALUES (?, ?, ?)",
        layout.table, layout.name, layout.email, layout.code
    );
    let mut tx = pool.begin().await?;
    sqlx::query(&sql)
        .bind(name)
        .bind(email)
        .bind(code.as_str())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}
