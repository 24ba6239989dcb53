//! Backup payload records.
//!
//! The JSON form uses camelCase field names with the top-level keys in the
//! order `notes`, `passwords`, `cards`. Timestamps are epoch milliseconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A free-text note.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl fmt::Debug for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Note")
            .field("id", &self.id)
            .field("title", &"[REDACTED]")
            .field("content", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// A saved website login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct PasswordEntry {
    pub id: i64,
    pub site: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub notes: String,
}

impl fmt::Debug for PasswordEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordEntry")
            .field("id", &self.id)
            .field("site", &self.site)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// A payment card.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: i64,
    pub card_name: String,
    pub holder_name: String,
    pub number: String,
    pub expiry: String,
    pub cvv: String,
}

impl Card {
    /// Last four digits of the card number.
    pub fn last_four(&self) -> &str {
        let start = self
            .number
            .char_indices()
            .rev()
            .nth(3)
            .map(|(i, _)| i)
            .unwrap_or(0);
        &self.number[start..]
    }
}

impl fmt::Debug for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Card")
            .field("id", &self.id)
            .field("card_name", &self.card_name)
            .field("number", &format_args!("****{}", self.last_four()))
            .field("cvv", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Record counts, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadCounts {
    pub notes: usize,
    pub passwords: usize,
    pub cards: usize,
}

impl fmt::Display for PayloadCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} notes, {} passwords, {} cards",
            self.notes, self.passwords, self.cards
        )
    }
}

/// Everything that goes into one backup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPayload {
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub passwords: Vec<PasswordEntry>,
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl BackupPayload {
    /// Whether the payload holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.passwords.is_empty() && self.cards.is_empty()
    }

    /// Number of records of each kind.
    pub fn counts(&self) -> PayloadCounts {
        PayloadCounts {
            notes: self.notes.len(),
            passwords: self.passwords.len(),
            cards: self.cards.len(),
        }
    }

    /// Merge a restored payload into this one.
    ///
    /// Records are matched by id; an incoming record replaces the existing
    /// one with the same id. Unmatched records are appended in order.
    pub fn merge(&mut self, incoming: BackupPayload) {
        let BackupPayload {
            notes,
            passwords,
            cards,
        } = incoming;

        merge_by_id(&mut self.notes, notes, |n| n.id);
        merge_by_id(&mut self.passwords, passwords, |p| p.id);
        merge_by_id(&mut self.cards, cards, |c| c.id);
    }
}

fn merge_by_id<T>(existing: &mut Vec<T>, incoming: Vec<T>, id: fn(&T) -> i64) {
    for record in incoming {
        match existing.iter_mut().find(|r| id(r) == id(&record)) {
            Some(slot) => *slot = record,
            None => existing.push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: i64, title: &str) -> Note {
        Note {
            id,
            title: title.to_string(),
            content: "body".to_string(),
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_000,
        }
    }

    fn card() -> Card {
        Card {
            id: 1,
            card_name: "Travel".to_string(),
            holder_name: "A. Holder".to_string(),
            number: "4111111111111111".to_string(),
            expiry: "12/29".to_string(),
            cvv: "123".to_string(),
        }
    }

    #[test]
    fn test_empty_payload_json() {
        let json = serde_json::to_string(&BackupPayload::default()).unwrap();
        assert_eq!(json, r#"{"notes":[],"passwords":[],"cards":[]}"#);
        assert!(BackupPayload::default().is_empty());
    }

    #[test]
    fn test_camel_case_fields() {
        let payload = BackupPayload {
            notes: vec![note(7, "groceries")],
            passwords: vec![],
            cards: vec![card()],
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""createdAt":1700000000000"#));
        assert!(json.contains(r#""updatedAt":1700000000000"#));
        assert!(json.contains(r#""cardName":"Travel""#));
        assert!(json.contains(r#""holderName":"A. Holder""#));

        let parsed: BackupPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let parsed: BackupPayload = serde_json::from_str(r#"{"notes":[]}"#).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", card());
        assert!(!debug.contains("4111111111111111"));
        assert!(!debug.contains("123\""));
        assert!(debug.contains("****1111"));

        let entry = PasswordEntry {
            id: 1,
            site: "example.com".to_string(),
            username: "user".to_string(),
            password: "hunter2".to_string(),
            notes: String::new(),
        };
        assert!(!format!("{:?}", entry).contains("hunter2"));
    }

    #[test]
    fn test_last_four_short_number() {
        let mut short = card();
        short.number = "42".to_string();
        assert_eq!(short.last_four(), "42");
    }

    #[test]
    fn test_merge_incoming_wins() {
        let mut current = BackupPayload {
            notes: vec![note(1, "old"), note(2, "kept")],
            ..BackupPayload::default()
        };
        let restored = BackupPayload {
            notes: vec![note(1, "new"), note(3, "added")],
            cards: vec![card()],
            ..BackupPayload::default()
        };

        current.merge(restored);

        let titles: Vec<&str> = current.notes.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "kept", "added"]);
        assert_eq!(
            current.counts(),
            PayloadCounts {
                notes: 3,
                passwords: 0,
                cards: 1
            }
        );
        assert_eq!(current.counts().to_string(), "3 notes, 0 passwords, 1 cards");
    }
}
