/*
 * messages.rs
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

//! messages.list / load / copy / move / remove / flag / tag / tags and
//! search. Mutations run through the portal's transaction template;
//! messages.remove is the documented exception (abort-on-first-error,
//! each removal independently durable).

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::mailbox::{parse_summary, status, BatchAction, Mailbox, Message};
use crate::portal::endpoint::Portal;
use crate::portal::error::PortalError;
use crate::portal::request::Params;
use crate::session::{ObjectClass, Session};

const LOAD_SECTIONS: &[&str] = &[
    "meta",
    "source",
    "security",
    "server",
    "header",
    "body",
    "attachments",
    "info",
];

fn require_message<'a>(
    mailbox: &'a Mailbox,
    message_id: u64,
) -> Result<&'a Message, PortalError> {
    mailbox
        .messages
        .get(&message_id)
        .filter(|m| m.visible)
        .ok_or_else(|| PortalError::InvalidReference(String::from("message")))
}

fn require_batch(
    mailbox: &Mailbox,
    folder_id: u64,
    ids: &[u64],
) -> Result<(), PortalError> {
    if !mailbox.folders.contains_key(&folder_id) {
        return Err(PortalError::InvalidReference(String::from("folder")));
    }
    for id in ids {
        match mailbox.messages.get(id) {
            Some(m) if m.folder_id == folder_id => {}
            _ => return Err(PortalError::InvalidReference(String::from("message"))),
        }
    }
    Ok(())
}

fn summary_entry(portal: &Portal, user_id: u64, message: &Message) -> Value {
    let summary = match portal.blobs.get(user_id, message.message_id, &message.server) {
        Ok(raw) => parse_summary(&raw),
        Err(e) => {
            warn!(
                message = message.message_id,
                error = %e,
                "message blob unavailable for listing"
            );
            Default::default()
        }
    };
    json!({
        "messageID": message.message_id,
        "folderID": message.folder_id,
        "from": summary.from,
        "to": summary.to,
        "addressedTo": summary.addressed_to,
        "replyTo": summary.reply_to,
        "returnPath": summary.return_path,
        "subject": summary.subject,
        "date": summary.date,
        "utc": message.created_utc.timestamp(),
        "tags": message.tags,
        "snippet": summary.snippet,
        "size": message.size,
        "flags": status::names_for(message.status),
    })
}

pub(crate) fn list(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let folder_id = params.u64("folderID")?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Folders)?;
    portal.refresh(&user, ObjectClass::Messages)?;

    let mailbox = user.read();
    if !mailbox.folders.contains_key(&folder_id) {
        return Err(PortalError::InvalidReference(String::from("folder")));
    }
    let entries: Vec<Value> = mailbox
        .messages_in(folder_id)
        .into_iter()
        .map(|m| summary_entry(portal, user.user_id, m))
        .collect();
    Ok(Value::Array(entries))
}

pub(crate) fn load(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let message_id = params.u64("messageID")?;
    let sections = params.str_array("section")?;
    params.finish()?;

    if sections.is_empty() {
        return Err(PortalError::InvalidRequest(String::from(
            "section list is empty",
        )));
    }
    for section in &sections {
        if !LOAD_SECTIONS.contains(&section.as_str()) {
            return Err(PortalError::InvalidKeyword(section.clone()));
        }
    }

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Messages)?;

    let (message, raw) = {
        let mailbox = user.read();
        let message = require_message(&mailbox, message_id)?.clone();
        let raw = portal
            .blobs
            .get(user.user_id, message.message_id, &message.server)?;
        (message, raw)
    };

    // Sealed storage: recover the plaintext before sectioning. A failure
    // here is fatal for the request and yields no message data.
    let raw: Vec<u8> = if message.status & status::ENCRYPTED != 0 {
        portal.open_sealed(session, &raw)?
    } else {
        raw.to_vec()
    };

    let text = String::from_utf8_lossy(&raw);
    let (header, body) = match text.find("\r\n\r\n") {
        Some(pos) => (&text[..pos], &text[pos + 4..]),
        None => match text.find("\n\n") {
            Some(pos) => (&text[..pos], &text[pos + 2..]),
            None => (&text[..], ""),
        },
    };

    let mut result = Map::new();
    for section in &sections {
        match section.as_str() {
            "meta" => {
                result.insert(
                    String::from("meta"),
                    json!({
                        "messageID": message.message_id,
                        "folderID": message.folder_id,
                        "size": message.size,
                        "utc": message.created_utc.timestamp(),
                        "flags": status::names_for(message.status),
                        "tags": message.tags,
                    }),
                );
            }
            "source" => {
                result.insert(String::from("source"), Value::from(text.to_string()));
            }
            "security" => {
                result.insert(
                    String::from("security"),
                    json!({
                        "signatureID": message.signature_id,
                        "signatureKey": message.signature_key,
                    }),
                );
            }
            "server" => {
                result.insert(String::from("server"), json!({ "node": message.server }));
            }
            "header" => {
                result.insert(String::from("header"), Value::from(header.to_string()));
            }
            "body" => {
                result.insert(String::from("body"), Value::from(body.to_string()));
            }
            "attachments" => {
                let names: Vec<String> = text
                    .lines()
                    .filter_map(|line| {
                        let lower = line.to_ascii_lowercase();
                        if !lower.starts_with("content-disposition:") || !lower.contains("attachment")
                        {
                            return None;
                        }
                        line.split("filename=")
                            .nth(1)
                            .map(|f| f.trim().trim_matches('"').to_string())
                    })
                    .collect();
                result.insert(String::from("attachments"), json!(names));
            }
            "info" => {
                result.insert(
                    String::from("info"),
                    json!({
                        "created": message.created_utc.to_rfc3339(),
                        "visible": message.visible,
                    }),
                );
            }
            _ => unreachable!(),
        }
    }
    Ok(Value::Object(result))
}

pub(crate) fn copy(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let source = params.u64("sourceFolderID")?;
    let target = params.u64("targetFolderID")?;
    let ids = params.u64_array("messageIDs")?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Messages)?;
    let blobs = Arc::clone(&portal.blobs);

    let mapping = portal.mutate(&user, ObjectClass::Messages, |mailbox, tx| {
        mailbox
            .message_copy(tx, blobs.as_ref(), source, target, &ids)
            .map_err(Into::into)
    })?;
    let pairs: Vec<Value> = mapping
        .iter()
        .map(|(old, new)| json!([old, new]))
        .collect();
    Ok(json!({ "copied": mapping.len(), "messageIDs": pairs }))
}

pub(crate) fn mv(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let source = params.u64("sourceFolderID")?;
    let target = params.u64("targetFolderID")?;
    let ids = params.u64_array("messageIDs")?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Messages)?;

    portal.mutate(&user, ObjectClass::Messages, |mailbox, tx| {
        mailbox.message_move(tx, source, target, &ids).map_err(Into::into)
    })?;
    Ok(json!({ "moved": ids.len() }))
}

pub(crate) fn remove(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let folder_id = params.u64("folderID")?;
    let ids = params.u64_array("messageIDs")?;
    params.finish()?;

    if ids.is_empty() {
        return Err(PortalError::IllegalCombination(String::from(
            "no messages given",
        )));
    }

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Messages)?;

    // Abort-on-first-error; each removal commits on its own, so earlier
    // removals stay removed when a later one fails.
    let mut removed = 0usize;
    let outcome = {
        let mut mailbox = user.write();
        require_batch(&mailbox, folder_id, &ids).and_then(|()| {
            for &id in &ids {
                mailbox
                    .message_remove(portal.db.as_ref(), portal.blobs.as_ref(), folder_id, &[id])
                    .map_err(PortalError::from)?;
                removed += 1;
            }
            Ok(())
        })
    };

    if removed > 0 {
        if let Err(e) = user.bump_serial(portal.cache.as_ref(), ObjectClass::Messages) {
            warn!(user = user.user_id, error = %e, "serial bump failed after removal");
        }
    }
    outcome?;
    Ok(json!({ "removed": removed }))
}

fn flag_bits(names: &[String]) -> Result<u64, PortalError> {
    let mut bits = 0;
    for name in names {
        bits |= status::bit_for(name)
            .ok_or_else(|| PortalError::InvalidKeyword(name.clone()))?;
    }
    Ok(bits)
}

pub(crate) fn flag(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let action = BatchAction::parse(params.str("action")?)?;
    let flags = params.opt_str_array("flags")?;
    let ids = params.u64_array("messageIDs")?;
    let folder_id = params.u64("folderID")?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Messages)?;

    if action == BatchAction::List {
        if flags.is_some() {
            return Err(PortalError::InvalidParams(String::from(
                "list takes no flags",
            )));
        }
        let mailbox = user.read();
        require_batch(&mailbox, folder_id, &ids)?;
        let mut listing = Map::new();
        for &id in &ids {
            if let Some(message) = mailbox.messages.get(&id) {
                listing.insert(id.to_string(), json!(status::names_for(message.status)));
            }
        }
        return Ok(Value::Object(listing));
    }

    let bits = flag_bits(&flags.ok_or_else(|| {
        PortalError::InvalidParams(String::from("flags is required"))
    })?)?;

    portal.mutate(&user, ObjectClass::Messages, |mailbox, tx| {
        mailbox
            .message_flag(tx, action, folder_id, &ids, bits)
            .map_err(Into::into)
            .map(|_| ())
    })?;
    Ok(json!({ "updated": ids.len() }))
}

pub(crate) fn tag(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let action = BatchAction::parse(params.str("action")?)?;
    let tags = params.opt_str_array("tags")?;
    let ids = params.u64_array("messageIDs")?;
    let folder_id = params.u64("folderID")?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Messages)?;

    if action == BatchAction::List {
        if tags.is_some() {
            return Err(PortalError::InvalidParams(String::from(
                "list takes no tags",
            )));
        }
        let mailbox = user.read();
        require_batch(&mailbox, folder_id, &ids)?;
        let mut listing = Map::new();
        for &id in &ids {
            if let Some(message) = mailbox.messages.get(&id) {
                listing.insert(id.to_string(), json!(message.tags));
            }
        }
        return Ok(Value::Object(listing));
    }

    // replace with no tags is a clear; add/remove require at least one.
    let tags = tags.unwrap_or_default();

    portal.mutate(&user, ObjectClass::Messages, |mailbox, tx| {
        mailbox
            .message_tag(tx, action, folder_id, &ids, &tags)
            .map_err(Into::into)
            .map(|_| ())
    })?;
    Ok(json!({ "updated": ids.len() }))
}

pub(crate) fn tags(
    portal: &Portal,
    session: &Arc<Session>,
    params: Params,
) -> Result<Value, PortalError> {
    params.none()?;
    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Messages)?;
    let mailbox = user.read();
    Ok(json!(mailbox.tags_union()))
}

pub(crate) fn search(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let query = params.str("query")?.to_ascii_lowercase();
    let folder_id = params.opt_u64("folderID")?;
    params.finish()?;

    if query.is_empty() {
        return Err(PortalError::InvalidParams(String::from("query is empty")));
    }

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Messages)?;

    let mailbox = user.read();
    if let Some(folder) = folder_id {
        if !mailbox.folders.contains_key(&folder) {
            return Err(PortalError::InvalidReference(String::from("folder")));
        }
    }

    let mut hits = Vec::new();
    for message in mailbox.messages.values() {
        if !message.visible {
            continue;
        }
        if folder_id.is_some_and(|f| message.folder_id != f) {
            continue;
        }
        let raw = match portal
            .blobs
            .get(user.user_id, message.message_id, &message.server)
        {
            Ok(raw) => raw,
            Err(_) => continue,
        };
        let summary = parse_summary(&raw);
        let haystack = format!("{} {} {}", summary.subject, summary.from, summary.to)
            .to_ascii_lowercase();
        if haystack.contains(&query) {
            hits.push(json!({
                "messageID": message.message_id,
                "folderID": message.folder_id,
                "subject": summary.subject,
            }));
        }
    }
    Ok(Value::Array(hits))
}
