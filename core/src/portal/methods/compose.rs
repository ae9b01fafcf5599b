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

//! messages.compose / messages.send and the attachments.* lifecycle.
//! Outbound mail never touches serials; a sent composition is destroyed.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::mailbox::{build_rfc822, SendPayload};
use crate::portal::endpoint::Portal;
use crate::portal::error::PortalError;
use crate::portal::request::Params;
use crate::session::Session;

pub(crate) fn compose(
    _portal: &Portal,
    session: &Arc<Session>,
    params: Params,
) -> Result<Value, PortalError> {
    params.none()?;
    Ok(json!({ "composeID": session.compose_create() }))
}

pub(crate) fn attachments_add(
    _portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let compose_id = params.u64("composeID")?;
    let filename = params.str("filename")?.to_string();
    params.finish()?;

    if filename.is_empty() {
        return Err(PortalError::InvalidParams(String::from(
            "filename is empty",
        )));
    }

    let mut compositions = session.compositions();
    let composition = compositions
        .get_mut(&compose_id)
        .ok_or_else(|| PortalError::InvalidReference(String::from("composition")))?;
    Ok(json!({ "attachmentID": composition.attach_add(filename) }))
}

pub(crate) fn attachments_remove(
    _portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let compose_id = params.u64("composeID")?;
    let attachment_id = params.u64("attachmentID")?;
    params.finish()?;

    let mut compositions = session.compositions();
    let composition = compositions
        .get_mut(&compose_id)
        .ok_or_else(|| PortalError::InvalidReference(String::from("composition")))?;
    composition.attach_remove(attachment_id)?;
    Ok(json!({ "attachments.remove": "success" }))
}

/// Reserved in the method table; upload progress travels on the multipart
/// surface, not JSON-RPC.
pub(crate) fn attachments_progress(
    _portal: &Portal,
    _session: &Arc<Session>,
    _params: Params,
) -> Result<Value, PortalError> {
    Err(PortalError::InvalidParams(String::from(
        "attachments.progress is reserved",
    )))
}

pub(crate) fn send(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let compose_id = params.u64("composeID")?;
    let from = params.str("from")?.to_string();
    let to = params.str_array("to")?;
    let cc = params.opt_str_array("cc")?.unwrap_or_default();
    let bcc = params.opt_str_array("bcc")?.unwrap_or_default();
    let subject = params.opt_str("subject")?.unwrap_or_default().to_string();
    let priority = params.opt_u64("priority")?.unwrap_or(3);
    let manifest = params.u64_array("attachments")?;
    let body = params.object("body")?;
    params.finish()?;

    for key in body.keys() {
        if key != "text" && key != "html" {
            return Err(PortalError::InvalidParams(format!(
                "unexpected body key: {}",
                key
            )));
        }
    }
    let body_plain = body
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let body_html = body
        .get("html")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if from.is_empty() || to.is_empty() {
        return Err(PortalError::IllegalCombination(String::from(
            "a sender and at least one recipient are required",
        )));
    }
    if !(1..=5).contains(&priority) {
        return Err(PortalError::InvalidParams(String::from(
            "priority must be between 1 and 5",
        )));
    }

    let mime = {
        let compositions = session.compositions();
        let composition = compositions
            .get(&compose_id)
            .ok_or_else(|| PortalError::InvalidReference(String::from("composition")))?;

        // The manifest must name uploaded attachments; unuploaded slots
        // cannot be sent.
        let mut selected = BTreeMap::new();
        for id in &manifest {
            let attachment = composition
                .attachments
                .get(id)
                .ok_or_else(|| PortalError::InvalidReference(String::from("attachment")))?;
            if attachment.file_data.is_none() {
                return Err(PortalError::IllegalCombination(String::from(
                    "attachment has no uploaded data",
                )));
            }
            selected.insert(*id, attachment.clone());
        }

        let payload = SendPayload {
            from: from.clone(),
            to: to.clone(),
            cc: cc.clone(),
            bcc: bcc.clone(),
            subject,
            priority: priority as u32,
            body_plain,
            body_html,
        };
        build_rfc822(&payload, &selected)
    };

    let mut recipients = to;
    recipients.extend(cc);
    recipients.extend(bcc);
    portal.relay.submit(&from, &recipients, &mime)?;

    // Relay accepted: the composition is spent.
    session.compose_remove(compose_id);
    Ok(json!({ "send": "success" }))
}
