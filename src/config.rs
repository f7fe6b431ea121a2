//! Configuration loader and validator for the ticket dispatcher.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub store: Store,
    pub smtp: Smtp,
    pub message: Message,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    /// Number of recipients dispatched in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Append-only log file mirroring the console output.
    #[serde(default)]
    pub log_file: Option<String>,
}

/// Recipient table settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Store {
    pub database_url: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub columns: Columns,
    /// Value written to the status column once a ticket is delivered.
    #[serde(default = "default_sent_marker")]
    pub sent_marker: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Create the default `recipients` table on start.
    #[serde(default)]
    pub migrate: bool,
}

/// Column names of the recipient table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Columns {
    pub name: String,
    pub email: String,
    pub code: String,
    pub status: String,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            name: "name".into(),
            email: "email".into(),
            code: "ticket_code".into(),
            status: "status".into(),
        }
    }
}

/// Outbound SMTP relay settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Smtp {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// RFC 5322 "From" mailbox, e.g. `Events <events@example.com>`.
    pub from: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Message composition settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    /// HTML template path.
    pub template: String,
    /// Ticket background image the QR code is pasted onto.
    pub background: String,
    /// Template variable -> table column.
    pub fields: BTreeMap<String, String>,
    /// Template variable -> number of leading characters dropped from its
    /// value before rendering.
    #[serde(default)]
    pub trim_prefix: BTreeMap<String, usize>,
    #[serde(default = "default_attachment_prefix")]
    pub attachment_prefix: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// When set, every composed ticket is also written here as `{code}.png`.
    #[serde(default)]
    pub archive_dir: Option<String>,
}

/// Static file attached to every message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub path: String,
    pub filename: String,
    pub content_type: String,
}

fn default_concurrency() -> usize {
    5
}

fn default_table() -> String {
    "recipients".into()
}

fn default_sent_marker() -> String {
    "Mail Sent".into()
}

fn default_max_connections() -> u32 {
    5
}

fn default_smtp_port() -> u16 {
    587
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_attachment_prefix() -> String {
    "Ticket".into()
}

impl Config {
    /// Ensure directories the run writes into exist.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if let Some(dir) = self.message.archive_dir.as_deref() {
            if !dir.trim().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        if let Some(parent) = self.app.log_file.as_deref().and_then(|p| Path::new(p).parent()) {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Apply `DATABASE_URL`, `SMTP_USERNAME` and `SMTP_PASSWORD` overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            self.store.database_url = url;
        }
        if let Some(user) = lookup("SMTP_USERNAME").filter(|v| !v.trim().is_empty()) {
            self.smtp.username = user;
        }
        if let Some(password) = lookup("SMTP_PASSWORD") {
            self.smtp.password = password;
        }
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.app
            .log_file
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
    }
}

/// Load configuration from a YAML file, apply environment overrides and
/// validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

fn require(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    Ok(())
}

fn require_identifier(value: &str, field: &str) -> Result<(), ConfigError> {
    if !IDENTIFIER.is_match(value) {
        return Err(ConfigError::Invalid(format!(
            "{field} must be a plain SQL identifier, got '{value}'"
        )));
    }
    Ok(())
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.concurrency == 0 {
        return Err(ConfigError::Invalid("app.concurrency must be > 0".into()));
    }

    require(&cfg.store.database_url, "store.database_url")?;
    if cfg.store.max_connections == 0 {
        return Err(ConfigError::Invalid("store.max_connections must be > 0".into()));
    }
    require(&cfg.store.sent_marker, "store.sent_marker")?;
    require_identifier(&cfg.store.table, "store.table")?;
    let columns = &cfg.store.columns;
    require_identifier(&columns.name, "store.columns.name")?;
    require_identifier(&columns.email, "store.columns.email")?;
    require_identifier(&columns.code, "store.columns.code")?;
    require_identifier(&columns.status, "store.columns.status")?;

    require(&cfg.smtp.host, "smtp.host")?;
    require(&cfg.smtp.username, "smtp.username")?;
    require(&cfg.smtp.from, "smtp.from")?;
    if cfg.smtp.port == 0 {
        return Err(ConfigError::Invalid("smtp.port must be > 0".into()));
    }

    require(&cfg.message.subject, "message.subject")?;
    require(&cfg.message.template, "message.template")?;
    require(&cfg.message.background, "message.background")?;
    if cfg.message.fields.is_empty() {
        return Err(ConfigError::Invalid("message.fields must map at least one variable".into()));
    }
    for (var, column) in &cfg.message.fields {
        require_identifier(var, "message.fields key")?;
        require_identifier(column, &format!("message.fields.{var}"))?;
    }
    for var in cfg.message.trim_prefix.keys() {
        if !cfg.message.fields.contains_key(var) {
            return Err(ConfigError::Invalid(format!(
                "message.trim_prefix.{var} is not a mapped field"
            )));
        }
    }
    for attachment in &cfg.message.attachments {
        require(&attachment.path, "message.attachments[].path")?;
        require(&attachment.filename, "message.attachments[].filename")?;
        require(&attachment.content_type, "message.attachments[].content_type")?;
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  concurrency: 5
  log_file: "./data/dispatch.log"

store:
  database_url: "sqlite://./data/tickets.db"
  table: "recipients"
  columns:
    name: "name"
    email: "email"
    code: "ticket_code"
    status: "status"
  sent_marker: "Mail Sent"
  max_connections: 5
  migrate: true

smtp:
  host: "smtp.example.com"
  port: 587
  username: "events@example.com"
  password: "CHANGE_ME"
  from: "Events <events@example.com>"
  timeout_secs: 30

message:
  subject: "Your ticket"
  template: "./templates/ticket.html"
  background: "./assets/ticket_template.png"
  fields:
    recipient_name: "name"
    recipient_email: "email"
    recipient_txn_id: "txn_id"
  trim_prefix:
    recipient_txn_id: 11
  attachment_prefix: "Ticket"
  attachments:
    - path: "./assets/guidelines.pdf"
      filename: "Guidelines.pdf"
      content_type: "application/pdf"
"#
}
