//! Table layout used to build recipient queries.
//!
//! Identifiers are validated by `config::load` before a layout is built, so
//! repositories interpolate them into SQL verbatim.

use crate::config;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub table: String,
    pub name: String,
    pub email: String,
    pub code: String,
    pub status: String,
    pub sent_marker: String,
    /// Template variable -> column.
    pub fields: BTreeMap<String, String>,
}

impl TableLayout {
    pub fn from_config(store: &config::Store, message: &config::Message) -> Self {
        Self {
            table: store.table.clone(),
            name: store.columns.name.clone(),
            email: store.columns.email.clone(),
            code: store.columns.code.clone(),
            status: store.columns.status.clone(),
            sent_marker: store.sent_marker.clone(),
            fields: message.fields.clone(),
        }
    }

    /// `SELECT` over every recipient column, filtered by `predicate`.
    pub(crate) fn select_sql(&self, predicate: &str) -> String {
        let mut columns = vec![
            format!("CAST({} AS TEXT) AS r_name", self.name),
            format!("CAST({} AS TEXT) AS r_email", self.email),
            format!("CAST({} AS TEXT) AS r_code", self.code),
            format!("CAST({} AS TEXT) AS r_status", self.status),
        ];
        for (var, column) in &self.fields {
            columns.push(format!("CAST({column} AS TEXT) AS f_{var}"));
        }
        format!(
            "SELECT {} FROM {} WHERE {}",
            columns.join(", "),
            self.table,
            predicate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_sql_aliases_fields() {
        let cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
        let layout = TableLayout::from_config(&cfg.store, &cfg.message);
        let sql = layout.select_sql("ticket_code IS NULL");
        assert!(sql.starts_with("SELECT CAST(name AS TEXT) AS r_name"));
        assert!(sql.contains("CAST(txn_id AS TEXT) AS f_recipient_txn_id"));
        assert!(sql.ends_with("FROM recipients WHERE ticket_code IS NULL"));
    }
}
