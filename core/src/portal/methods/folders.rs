/*
 * folders.rs
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

//! folders.add / list / remove / rename / tags.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::mailbox::unescape_quotes;
use crate::portal::endpoint::Portal;
use crate::portal::error::PortalError;
use crate::portal::request::Params;
use crate::session::Session;
use crate::storage::FolderContext;

use super::{context_class, parse_context};

pub(crate) fn add(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let context = parse_context(params.str("context")?)?;
    let name = params.str("name")?.to_string();
    let parent = params.opt_u64("parentID")?;
    params.finish()?;

    let user = portal.require_user(session)?;
    let class = context_class(context);
    portal.refresh(&user, class)?;
    let limits = portal.config.folders;

    let path = match parent {
        Some(parent_id) => {
            let mailbox = user.read();
            let base = mailbox
                .folder_full_name(context, parent_id)
                .ok_or_else(|| PortalError::InvalidReference(String::from("folder")))?;
            format!("{}.{}", base, name)
        }
        None => name,
    };

    let folder_id = portal.mutate(&user, class, |mailbox, tx| {
        mailbox
            .folder_create(tx, context, &path, &limits)
            .map_err(Into::into)
    })?;
    Ok(json!({ "folderID": folder_id }))
}

pub(crate) fn list(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let context = parse_context(params.str("context")?)?;
    params.finish()?;

    let user = portal.require_user(session)?;
    portal.refresh(&user, context_class(context))?;

    let mailbox = user.read();
    let context_name = match context {
        FolderContext::Mail => "mail",
        FolderContext::Contacts => "contacts",
    };
    let entries: Vec<Value> = mailbox
        .folder_list(context)
        .into_iter()
        .map(|(folder_id, path, row)| {
            json!({
                "context": context_name,
                "folderID": folder_id,
                "parentID": row.parent_id,
                "order": row.order,
                "name": unescape_quotes(&path),
            })
        })
        .collect();
    Ok(Value::Array(entries))
}

pub(crate) fn remove(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let context = parse_context(params.str("context")?)?;
    let folder_id = params.u64("folderID")?;
    params.finish()?;

    let user = portal.require_user(session)?;
    let class = context_class(context);
    portal.refresh(&user, class)?;
    let blobs = Arc::clone(&portal.blobs);

    portal.mutate(&user, class, |mailbox, tx| {
        mailbox
            .folder_remove(tx, blobs.as_ref(), context, folder_id)
            .map_err(Into::into)
    })?;
    Ok(json!({ "folders.remove": "success" }))
}

pub(crate) fn rename(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let context = parse_context(params.str("context")?)?;
    let folder_id = params.u64("folderID")?;
    let name = params.str("name")?.to_string();
    params.finish()?;

    let user = portal.require_user(session)?;
    let class = context_class(context);
    portal.refresh(&user, class)?;
    let limits = portal.config.folders;

    portal.mutate(&user, class, |mailbox, tx| {
        mailbox
            .folder_rename(tx, context, folder_id, &name, &limits)
            .map_err(Into::into)
    })?;
    Ok(json!({ "folders.rename": "success" }))
}

pub(crate) fn tags(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let context = parse_context(params.str("context")?)?;
    let folder_id = params.u64("folderID")?;
    params.finish()?;

    let user = portal.require_user(session)?;

    // Tag statistics only exist for the mail context.
    if context == FolderContext::Contacts {
        return Ok(Value::Object(Map::new()));
    }

    portal.refresh(&user, crate::session::ObjectClass::Messages)?;
    let mailbox = user.read();
    let histogram = mailbox.folder_tag_histogram(folder_id)?;
    let mut object = Map::new();
    for (tag, count) in histogram {
        object.insert(tag, Value::from(count));
    }
    Ok(Value::Object(object))
}
