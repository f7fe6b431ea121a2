use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Short alphabetic ticket identifier derived from a recipient's email.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketCode(String);

impl TicketCode {
    pub(crate) fn new(code: String) -> Self {
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TicketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the recipient table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
    /// Template variable -> value. Variables whose column is NULL are absent.
    pub fields: BTreeMap<String, String>,
    pub ticket_code: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Store,
    Render,
    Image,
    Transport,
    Worker,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Store => "store",
            FailureKind::Render => "render",
            FailureKind::Image => "image",
            FailureKind::Transport => "transport",
            FailureKind::Worker => "worker",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedRecipient {
    pub email: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Aggregate result of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: usize,
    /// email -> ticket code
    pub sent: BTreeMap<String, String>,
    pub failed: Vec<FailedRecipient>,
}

impl BatchSummary {
    pub fn new(total: usize) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            total,
            sent: BTreeMap::new(),
            failed: Vec::new(),
        }
    }

    pub fn record_sent(&mut self, email: String, code: &TicketCode) {
        self.sent.insert(email, code.to_string());
    }

    pub fn record_failed(&mut self, email: String, kind: FailureKind, reason: String) {
        self.failed.push(FailedRecipient {
            email,
            kind,
            reason,
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn outcomes(&self) -> usize {
        self.sent.len() + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_both_outcomes() {
        let mut summary = BatchSummary::new(2);
        summary.record_sent("a@example.com".into(), &TicketCode::new("abcdef".into()));
        summary.record_failed("b@example.com".into(), FailureKind::Transport, "refused".into());
        summary.finish();
        assert_eq!(summary.outcomes(), 2);
        assert_eq!(summary.sent.get("a@example.com").unwrap(), "abcdef");
        assert!(summary.finished_at.is_some());
    }

    #[test]
    fn summary_serializes_kind_in_snake_case() {
        let mut summary = BatchSummary::new(1);
        summary.record_failed("b@example.com".into(), FailureKind::Render, "missing".into());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["failed"][0]["kind"], "render");
    }
}
