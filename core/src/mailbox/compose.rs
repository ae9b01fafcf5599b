/*
 * compose.rs
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

//! Compositions: in-progress outbound messages and their uploaded
//! attachments, plus the RFC 822/MIME assembly handed to the relay.
//! Compositions live only in session memory and are destroyed on send or
//! session end.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;

use super::MailboxError;
use std::collections::BTreeMap;

/// An uploaded file attached to a composition. `file_data` stays empty
/// until the multipart upload for the `(compose, attachment)` pair lands.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub attachment_id: u64,
    pub filename: String,
    pub file_data: Option<Bytes>,
}

/// An in-progress outbound message.
#[derive(Debug, Clone)]
pub struct Composition {
    pub compose_id: u64,
    pub attachments: BTreeMap<u64, Attachment>,
    /// Allocation counter for attachment ids.
    attached: u64,
}

impl Composition {
    pub fn new(compose_id: u64) -> Self {
        Self { compose_id, attachments: BTreeMap::new(), attached: 0 }
    }

    /// Register a new attachment slot. The id counter is checked against
    /// live attachments before being accepted.
    pub fn attach_add(&mut self, filename: impl Into<String>) -> u64 {
        loop {
            self.attached += 1;
            if !self.attachments.contains_key(&self.attached) {
                break;
            }
        }
        let id = self.attached;
        self.attachments.insert(
            id,
            Attachment { attachment_id: id, filename: filename.into(), file_data: None },
        );
        id
    }

    pub fn attach_remove(&mut self, attachment_id: u64) -> Result<(), MailboxError> {
        self.attachments
            .remove(&attachment_id)
            .map(|_| ())
            .ok_or_else(|| MailboxError::NotFound(String::from("attachment")))
    }

    /// Accept the upload for one attachment. Exactly one upload per slot;
    /// a second upload is rejected.
    pub fn attach_upload(&mut self, attachment_id: u64, data: Bytes) -> Result<(), MailboxError> {
        let attachment = self
            .attachments
            .get_mut(&attachment_id)
            .ok_or_else(|| MailboxError::NotFound(String::from("attachment")))?;
        if attachment.file_data.is_some() {
            return Err(MailboxError::AlreadyUploaded);
        }
        attachment.file_data = Some(data);
        Ok(())
    }
}

/// Structured send request collected from the portal call.
#[derive(Debug, Clone, Default)]
pub struct SendPayload {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    /// 1 = highest .. 5 = lowest; 3 when unspecified.
    pub priority: u32,
    pub body_plain: String,
    pub body_html: String,
}

/// Assemble the RFC 822/MIME wire form of a composition. Attachments
/// without uploaded data are skipped.
pub fn build_rfc822(payload: &SendPayload, attachments: &BTreeMap<u64, Attachment>) -> Vec<u8> {
    let mut out = Vec::new();

    append_header(&mut out, "From", &payload.from);
    if !payload.to.is_empty() {
        append_header(&mut out, "To", &payload.to.join(", "));
    }
    if !payload.cc.is_empty() {
        append_header(&mut out, "Cc", &payload.cc.join(", "));
    }
    if !payload.subject.is_empty() {
        append_header(&mut out, "Subject", &payload.subject);
    }
    append_header(&mut out, "Date", &Utc::now().to_rfc2822());
    if payload.priority != 0 && payload.priority != 3 {
        append_header(&mut out, "X-Priority", &payload.priority.to_string());
    }
    append_header(&mut out, "MIME-Version", "1.0");

    let uploaded: Vec<&Attachment> = attachments
        .values()
        .filter(|a| a.file_data.is_some())
        .collect();
    let has_html = !payload.body_html.is_empty();
    let has_plain = !payload.body_plain.is_empty();

    if uploaded.is_empty() {
        append_body(&mut out, payload, has_plain, has_html);
    } else {
        let boundary = boundary_token("mixed");
        append_header(
            &mut out,
            "Content-Type",
            &format!("multipart/mixed; boundary=\"{}\"", boundary),
        );
        out.extend_from_slice(b"\r\n--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"\r\n");
        append_body(&mut out, payload, has_plain, has_html);
        for attachment in uploaded {
            out.extend_from_slice(b"\r\n--");
            out.extend_from_slice(boundary.as_bytes());
            out.extend_from_slice(b"\r\n");
            append_attachment(&mut out, attachment);
        }
        out.extend_from_slice(b"\r\n--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"--\r\n");
    }

    out
}

fn boundary_token(kind: &str) -> String {
    let mut noise = [0u8; 8];
    // Best effort; the pid/time fallback keeps boundaries unique enough.
    if getrandom::getrandom(&mut noise).is_err() {
        let t = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        noise.copy_from_slice(&t.to_le_bytes());
    }
    format!(
        "_{}_{}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        kind,
        std::process::id(),
        noise[0], noise[1], noise[2], noise[3], noise[4], noise[5], noise[6], noise[7]
    )
}

fn append_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn append_body(out: &mut Vec<u8>, payload: &SendPayload, has_plain: bool, has_html: bool) {
    if has_plain && has_html {
        let boundary = boundary_token("alt");
        append_header(
            out,
            "Content-Type",
            &format!("multipart/alternative; boundary=\"{}\"", boundary),
        );
        out.extend_from_slice(b"\r\n--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"\r\n");
        append_header(out, "Content-Type", "text/plain; charset=utf-8");
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(payload.body_plain.as_bytes());
        out.extend_from_slice(b"\r\n--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"\r\n");
        append_header(out, "Content-Type", "text/html; charset=utf-8");
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(payload.body_html.as_bytes());
        out.extend_from_slice(b"\r\n--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"--\r\n");
    } else if has_html {
        append_header(out, "Content-Type", "text/html; charset=utf-8");
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(payload.body_html.as_bytes());
        out.extend_from_slice(b"\r\n");
    } else {
        append_header(out, "Content-Type", "text/plain; charset=utf-8");
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(payload.body_plain.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

fn append_attachment(out: &mut Vec<u8>, attachment: &Attachment) {
    append_header(out, "Content-Type", "application/octet-stream");
    append_header(
        out,
        "Content-Disposition",
        &format!(
            "attachment; filename=\"{}\"",
            attachment.filename.replace('\\', "\\\\").replace('"', "\\\"")
        ),
    );
    append_header(out, "Content-Transfer-Encoding", "base64");
    out.extend_from_slice(b"\r\n");
    let data = attachment.file_data.as_deref().unwrap_or(&[]);
    let encoded = BASE64.encode(data);
    for chunk in encoded.as_bytes().chunks(76) {
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_lifecycle() {
        let mut c = Composition::new(7);
        let a = c.attach_add("report.pdf");
        let b = c.attach_add("notes.txt");
        assert_ne!(a, b);

        c.attach_upload(a, Bytes::from_static(b"pdf bytes")).unwrap();
        assert!(matches!(
            c.attach_upload(a, Bytes::from_static(b"again")),
            Err(MailboxError::AlreadyUploaded)
        ));
        assert!(matches!(
            c.attach_upload(99, Bytes::new()),
            Err(MailboxError::NotFound(_))
        ));

        c.attach_remove(b).unwrap();
        assert!(c.attach_remove(b).is_err());
        assert_eq!(c.attachments.len(), 1);
    }

    #[test]
    fn attachment_ids_never_collide() {
        let mut c = Composition::new(1);
        let first = c.attach_add("one");
        // Force the counter into collision with a live id.
        c.attached = first - 1;
        let second = c.attach_add("two");
        assert_ne!(first, second);
    }

    #[test]
    fn mime_plain_only() {
        let payload = SendPayload {
            from: String::from("a@example.com"),
            to: vec![String::from("b@example.com")],
            subject: String::from("hello"),
            priority: 3,
            body_plain: String::from("plain body"),
            ..SendPayload::default()
        };
        let mime = build_rfc822(&payload, &BTreeMap::new());
        let text = String::from_utf8(mime).unwrap();
        assert!(text.contains("From: a@example.com\r\n"));
        assert!(text.contains("Subject: hello\r\n"));
        assert!(text.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(text.contains("plain body"));
        assert!(!text.contains("multipart/mixed"));
        assert!(!text.contains("X-Priority"));
    }

    #[test]
    fn mime_with_attachment_and_alternative() {
        let payload = SendPayload {
            from: String::from("a@example.com"),
            to: vec![String::from("b@example.com")],
            subject: String::from("both"),
            priority: 1,
            body_plain: String::from("text"),
            body_html: String::from("<p>html</p>"),
            ..SendPayload::default()
        };
        let mut c = Composition::new(1);
        let id = c.attach_add("blob.bin");
        c.attach_upload(id, Bytes::from_static(&[0u8, 1, 2, 255])).unwrap();

        let text = String::from_utf8(build_rfc822(&payload, &c.attachments)).unwrap();
        assert!(text.contains("multipart/mixed"));
        assert!(text.contains("multipart/alternative"));
        assert!(text.contains("X-Priority: 1\r\n"));
        assert!(text.contains("Content-Disposition: attachment; filename=\"blob.bin\"\r\n"));
        assert!(text.contains("Content-Transfer-Encoding: base64\r\n"));
        assert!(text.trim_end().ends_with("--"));
    }
}
