/*
 * contacts.rs
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

//! contacts.add / edit / list / load / move / copy / remove. Detail
//! fields ride as free-form string pairs beside the fixed keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::portal::endpoint::Portal;
use crate::portal::error::PortalError;
use crate::portal::request::Params;
use crate::session::{ObjectClass, Session};

/// Free-form detail pairs: every remaining key must be a string value.
fn detail_map(params: &mut Params) -> Result<BTreeMap<String, String>, PortalError> {
    let mut details = BTreeMap::new();
    for (key, value) in params.rest() {
        match value {
            Value::String(s) => {
                details.insert(key, s);
            }
            _ => {
                return Err(PortalError::InvalidParams(format!(
                    "{} must be a string",
                    key
                )))
            }
        }
    }
    Ok(details)
}

pub(crate) fn add(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let folder_id = params.u64("folderID")?;
    let name = params.str("name")?.to_string();
    let details = detail_map(&mut params)?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Contacts)?;

    let contact_id = portal.mutate(&user, ObjectClass::Contacts, |mailbox, tx| {
        mailbox
            .contact_add(tx, folder_id, &name, details)
            .map_err(Into::into)
    })?;
    Ok(json!({ "contactID": contact_id }))
}

pub(crate) fn edit(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let folder_id = params.u64("folderID")?;
    let contact_id = params.u64("contactID")?;
    let name = params.opt_str("name")?.map(str::to_string);
    let details = detail_map(&mut params)?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Contacts)?;

    let details = if details.is_empty() { None } else { Some(details) };
    portal.mutate(&user, ObjectClass::Contacts, |mailbox, tx| {
        mailbox
            .contact_edit(tx, folder_id, contact_id, name.as_deref(), details)
            .map_err(Into::into)
    })?;
    Ok(json!({ "contacts.edit": "success" }))
}

pub(crate) fn list(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let folder_id = params.u64("folderID")?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Contacts)?;

    let mailbox = user.read();
    let cf = mailbox
        .contacts
        .get(&folder_id)
        .ok_or_else(|| PortalError::InvalidReference(String::from("contact folder")))?;
    let entries: Vec<Value> = cf
        .records
        .values()
        .map(|c| {
            json!({
                "contactID": c.contact_id,
                "folderID": c.folder_id,
                "name": c.name,
            })
        })
        .collect();
    Ok(Value::Array(entries))
}

pub(crate) fn load(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let folder_id = params.u64("folderID")?;
    let contact_id = params.u64("contactID")?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Contacts)?;

    let mailbox = user.read();
    let cf = mailbox
        .contacts
        .get(&folder_id)
        .ok_or_else(|| PortalError::InvalidReference(String::from("contact folder")))?;
    let contact = cf
        .records
        .get(&contact_id)
        .ok_or_else(|| PortalError::InvalidReference(String::from("contact")))?;

    let mut details = Map::new();
    for (key, value) in &contact.details {
        details.insert(key.clone(), Value::from(value.clone()));
    }
    Ok(json!({
        "contactID": contact.contact_id,
        "folderID": contact.folder_id,
        "name": contact.name,
        "details": details,
    }))
}

pub(crate) fn mv(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let contact_id = params.u64("contactID")?;
    let source = params.u64("sourceFolderID")?;
    let target = params.u64("targetFolderID")?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Contacts)?;

    portal.mutate(&user, ObjectClass::Contacts, |mailbox, tx| {
        mailbox
            .contact_move(tx, contact_id, source, target)
            .map_err(Into::into)
    })?;
    Ok(json!({ "contacts.move": "success" }))
}

pub(crate) fn copy(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let contact_id = params.u64("contactID")?;
    let source = params.u64("sourceFolderID")?;
    let target = params.u64("targetFolderID")?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Contacts)?;

    let new_id = portal.mutate(&user, ObjectClass::Contacts, |mailbox, tx| {
        mailbox
            .contact_copy(tx, contact_id, source, target)
            .map_err(Into::into)
    })?;
    Ok(json!({ "contactID": new_id }))
}

pub(crate) fn remove(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let folder_id = params.u64("folderID")?;
    let contact_id = params.u64("contactID")?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Contacts)?;

    portal.mutate(&user, ObjectClass::Contacts, |mailbox, tx| {
        mailbox
            .contact_remove(tx, folder_id, contact_id)
            .map_err(Into::into)
    })?;
    Ok(json!({ "contacts.remove": "success" }))
}
