//! Idempotent, concurrent ticket mailer.
//!
//! Recipients without a ticket code are read from a SQL table, each gets a
//! deterministic code and a QR ticket by mail, and the outcome is written
//! back so a re-run never mails the same row twice.

pub mod batch;
pub mod code;
pub mod compose;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod mailer;
pub mod model;
pub mod render;
pub mod ticket;
