//! Ticket code derivation.
//!
//! A code is the SHA-256 of the whitespace-free email, reduced to its letters,
//! rotated three places within the alphabet and cut to [`CODE_LEN`]
//! characters. The same email always yields the same code, so a ticket that
//! was already shared stays valid when a recipient is dispatched again.
use crate::model::TicketCode;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

pub const CODE_LEN: usize = 6;
const ROTATION: u8 = 3;

/// Derive the ticket code for `identity`. Total over any input, including "".
pub fn derive(identity: &str) -> TicketCode {
    let normalized = normalize(identity);
    let mut digest = hex_digest(normalized.as_bytes());
    let mut code = String::with_capacity(CODE_LEN);
    loop {
        let missing = CODE_LEN - code.len();
        code.extend(
            digest
                .chars()
                .filter(|c| !c.is_ascii_digit())
                .map(rotate)
                .take(missing),
        );
        if code.len() == CODE_LEN {
            return TicketCode::new(code);
        }
        // A digest with fewer than six letters keeps drawing from its own hash.
        digest = hex_digest(digest.as_bytes());
    }
}

fn normalize(identity: &str) -> String {
    identity.chars().filter(|c| !c.is_whitespace()).collect()
}

fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn rotate(c: char) -> char {
    match c {
        'a'..='z' => (b'a' + (c as u8 - b'a' + ROTATION) % 26) as char,
        'A'..='Z' => (b'A' + (c as u8 - b'A' + ROTATION) % 26) as char,
        other => other,
    }
}

/// Codes shared by more than one distinct email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub code: TicketCode,
    pub emails: Vec<String>,
}

/// Group `emails` by derived code and return every code claimed by two or
/// more distinct (whitespace-normalized) addresses.
pub fn find_collisions<'a>(emails: impl IntoIterator<Item = &'a str>) -> Vec<Collision> {
    let mut by_code: BTreeMap<TicketCode, BTreeSet<String>> = BTreeMap::new();
    for email in emails {
        by_code
            .entry(derive(email))
            .or_default()
            .insert(normalize(email));
    }
    by_code
        .into_iter()
        .filter(|(_, emails)| emails.len() > 1)
        .map(|(code, emails)| Collision {
            code,
            emails: emails.into_iter().collect(),
        })
        .collect()
}
