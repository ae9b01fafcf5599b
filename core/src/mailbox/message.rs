/*
 * message.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Fermoposta, a secure mail server.
 *
 * Fermoposta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Fermoposta is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Fermoposta.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Message metadata, the status bitset, and light header summaries read
//! from stored blobs. Full entity decoding belongs to the header module of
//! the protocol tier; the scan here only splits lines and picks fields.

use chrono::{DateTime, Utc};

/// Message status bits. The set partitions into system flags (read-only to
/// users) and user flags; `TAGGED` is maintained automatically from the tag
/// list and is system-owned.
pub mod status {
    pub const RECENT: u64 = 1;
    pub const SEEN: u64 = 2;
    pub const ANSWERED: u64 = 4;
    pub const FLAGGED: u64 = 8;
    pub const DELETED: u64 = 16;
    pub const DRAFT: u64 = 32;
    pub const SECURE: u64 = 64;
    pub const APPENDED: u64 = 128;
    pub const HIDDEN: u64 = 256;
    pub const ENCRYPTED: u64 = 512;
    pub const TAGGED: u64 = 1024;

    pub const USER_FLAGS: u64 = SEEN | ANSWERED | FLAGGED | DELETED | DRAFT;
    pub const SYSTEM_FLAGS: u64 = RECENT | SECURE | APPENDED | HIDDEN | ENCRYPTED | TAGGED;

    /// Flag names on the wire, one per bit.
    pub const NAMES: &[(&str, u64)] = &[
        ("recent", RECENT),
        ("seen", SEEN),
        ("answered", ANSWERED),
        ("flagged", FLAGGED),
        ("deleted", DELETED),
        ("draft", DRAFT),
        ("secure", SECURE),
        ("appended", APPENDED),
        ("hidden", HIDDEN),
        ("encrypted", ENCRYPTED),
        ("tagged", TAGGED),
    ];

    /// Resolve a wire name to its bit.
    pub fn bit_for(name: &str) -> Option<u64> {
        NAMES.iter().find(|(n, _)| *n == name).map(|(_, b)| *b)
    }

    /// Names of all set bits.
    pub fn names_for(bits: u64) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(_, b)| bits & b != 0)
            .map(|(n, _)| *n)
            .collect()
    }
}

/// A stored message. The body lives in the blob store under
/// `(user, message_id, server)`; this record carries only what list and
/// flag operations need.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: u64,
    pub folder_id: u64,
    /// Storage node holding the blob.
    pub server: String,
    pub status: u64,
    pub size: u64,
    pub signature_id: u64,
    pub signature_key: u64,
    pub created_utc: DateTime<Utc>,
    /// False marks logical deletion: the row survives until expunge.
    pub visible: bool,
    pub tags: Vec<String>,
}

impl Message {
    /// Recompute the tagged bit from the tag list.
    pub fn sync_tagged_bit(&mut self) {
        if self.tags.is_empty() {
            self.status &= !status::TAGGED;
        } else {
            self.status |= status::TAGGED;
        }
    }
}

/// Fields picked out of a stored blob for list views.
#[derive(Debug, Clone, Default)]
pub struct HeaderSummary {
    pub from: String,
    pub to: String,
    /// Delivered-To, when the delivering MTA recorded it.
    pub addressed_to: String,
    pub reply_to: String,
    pub return_path: String,
    pub subject: String,
    pub date: String,
    pub snippet: String,
}

const SNIPPET_LIMIT: usize = 128;

/// Scan the header block of a raw message and pick the summary fields,
/// plus a short plain-text snippet from the start of the body. Unfolds
/// continuation lines; does not decode encoded words.
pub fn parse_summary(raw: &[u8]) -> HeaderSummary {
    let mut summary = HeaderSummary::default();
    let text = String::from_utf8_lossy(raw);

    let (header, body) = match text.find("\r\n\r\n") {
        Some(pos) => (&text[..pos], &text[pos + 4..]),
        None => match text.find("\n\n") {
            Some(pos) => (&text[..pos], &text[pos + 2..]),
            None => (&text[..], ""),
        },
    };

    let mut unfolded: Vec<String> = Vec::new();
    for line in header.lines() {
        if (line.starts_with(' ') || line.starts_with('\t')) && !unfolded.is_empty() {
            let last = unfolded.len() - 1;
            unfolded[last].push(' ');
            unfolded[last].push_str(line.trim_start());
        } else {
            unfolded.push(line.to_string());
        }
    }

    for line in &unfolded {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "from" => summary.from = value.to_string(),
            "to" => summary.to = value.to_string(),
            "delivered-to" => summary.addressed_to = value.to_string(),
            "reply-to" => summary.reply_to = value.to_string(),
            "return-path" => summary.return_path = value.to_string(),
            "subject" => summary.subject = value.to_string(),
            "date" => summary.date = value.to_string(),
            _ => {}
        }
    }

    let mut snippet = String::new();
    for c in body.chars() {
        if snippet.len() >= SNIPPET_LIMIT {
            break;
        }
        if c == '\r' || c == '\n' {
            if !snippet.ends_with(' ') && !snippet.is_empty() {
                snippet.push(' ');
            }
        } else {
            snippet.push(c);
        }
    }
    summary.snippet = snippet.trim().to_string();

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bit_partition() {
        assert_eq!(status::USER_FLAGS & status::SYSTEM_FLAGS, 0);
        assert_eq!(status::bit_for("seen"), Some(status::SEEN));
        assert_eq!(status::bit_for("tagged"), Some(status::TAGGED));
        assert_eq!(status::bit_for("bogus"), None);
        assert_eq!(
            status::names_for(status::SEEN | status::FLAGGED),
            vec!["seen", "flagged"]
        );
    }

    #[test]
    fn tagged_bit_follows_tags() {
        let mut m = Message {
            message_id: 1,
            folder_id: 1,
            server: String::from("local"),
            status: 0,
            size: 0,
            signature_id: 0,
            signature_key: 0,
            created_utc: Utc::now(),
            visible: true,
            tags: vec![String::from("work")],
        };
        m.sync_tagged_bit();
        assert_ne!(m.status & status::TAGGED, 0);
        m.tags.clear();
        m.sync_tagged_bit();
        assert_eq!(m.status & status::TAGGED, 0);
    }

    #[test]
    fn summary_picks_fields_and_unfolds() {
        let raw = b"From: Alice <alice@example.com>\r\n\
To: bob@example.com\r\n\
Subject: a very\r\n long subject\r\n\
Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n\
Reply-To: alice+replies@example.com\r\n\
\r\n\
Body starts here\r\nand continues.\r\n";
        let s = parse_summary(raw);
        assert_eq!(s.from, "Alice <alice@example.com>");
        assert_eq!(s.subject, "a very long subject");
        assert_eq!(s.reply_to, "alice+replies@example.com");
        assert!(s.snippet.starts_with("Body starts here"));
    }

    #[test]
    fn summary_of_headerless_blob() {
        let s = parse_summary(b"no blank line at all");
        assert_eq!(s.subject, "");
        assert_eq!(s.snippet, "");
    }
}
