/*
 * misc.rs
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

//! Aliases, alerts, config, settings, meta/debug, and the anonymous
//! utility endpoints.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};

use zeroize::Zeroizing;

use crate::crypto::{self, Cryptex};
use crate::portal::endpoint::Portal;
use crate::portal::error::PortalError;
use crate::portal::request::Params;
use crate::session::{ObjectClass, Session};

pub(crate) fn aliases(
    portal: &Portal,
    session: &Arc<Session>,
    params: Params,
) -> Result<Value, PortalError> {
    params.none()?;
    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Aliases)?;
    let mailbox = user.read();
    let entries: Vec<Value> = mailbox
        .aliases
        .values()
        .map(|a| {
            json!({
                "aliasID": a.alias_id,
                "address": a.address,
                "display": a.display,
                "selected": a.selected,
                "utc": a.created_utc.timestamp(),
            })
        })
        .collect();
    Ok(Value::Array(entries))
}

pub(crate) fn alert_list(
    portal: &Portal,
    session: &Arc<Session>,
    params: Params,
) -> Result<Value, PortalError> {
    params.none()?;
    let user = portal.require_user(session)?;
    let entries: Vec<Value> = portal
        .db
        .alerts(user.user_id)?
        .into_iter()
        .filter(|a| !a.acknowledged())
        .map(|a| {
            json!({
                "alertID": a.alert_id,
                "type": a.kind,
                "message": a.message,
                "utc": a.created_utc.timestamp(),
            })
        })
        .collect();
    Ok(Value::Array(entries))
}

/// Transactional acknowledge: either every id lands or none do, so two
/// sessions never disagree about which alerts are outstanding.
pub(crate) fn alert_acknowledge(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let ids = params.u64_array("alertIDs")?;
    params.finish()?;

    if ids.is_empty() {
        return Err(PortalError::IllegalCombination(String::from(
            "no alerts given",
        )));
    }

    let user = portal.require_user(session)?;
    let now = Utc::now();
    let mut tx = portal.db.begin()?;
    for &id in &ids {
        tx.acknowledge_alert(user.user_id, id, now)?;
    }
    tx.commit().map_err(|e| match e {
        crate::storage::StorageError::NotFound => {
            PortalError::InvalidReference(String::from("alert"))
        }
        other => other.into(),
    })?;
    Ok(json!({ "alert.acknowledge": "success" }))
}

pub(crate) fn config_load(
    portal: &Portal,
    session: &Arc<Session>,
    params: Params,
) -> Result<Value, PortalError> {
    params.none()?;
    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Config)?;
    let mailbox = user.read();
    let mut object = Map::new();
    for (key, entry) in &mailbox.config {
        let mut flags = Vec::new();
        if entry.is_critical() {
            flags.push("critical");
        }
        object.insert(
            key.clone(),
            json!({ "value": entry.value, "flags": flags }),
        );
    }
    Ok(Value::Object(object))
}

pub(crate) fn config_edit(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let mut edits: Vec<(String, Option<String>)> = Vec::new();
    for (key, value) in params.rest() {
        match value {
            Value::String(s) => edits.push((key, Some(s))),
            Value::Null => edits.push((key, None)),
            _ => {
                return Err(PortalError::InvalidParams(format!(
                    "{} must be a string or null",
                    key
                )))
            }
        }
    }
    params.finish()?;

    if edits.is_empty() {
        return Err(PortalError::InvalidParams(String::from("no edits given")));
    }

    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Config)?;

    portal.mutate(&user, ObjectClass::Config, |mailbox, tx| {
        mailbox.config_edit(tx, &edits).map_err(Into::into)
    })?;
    Ok(json!({ "config.edit": "success" }))
}

pub(crate) fn settings_identity(
    portal: &Portal,
    session: &Arc<Session>,
    params: Params,
) -> Result<Value, PortalError> {
    params.none()?;
    let user = portal.require_user(session)?;
    portal.refresh(&user, ObjectClass::Aliases)?;
    let mailbox = user.read();
    let selected = mailbox
        .aliases
        .values()
        .find(|a| a.selected)
        .map(|a| a.address.clone());
    Ok(json!({
        "username": user.username,
        "address": selected,
        "aliases": mailbox.aliases.len(),
        "secure": user.record().secure,
    }))
}

pub(crate) fn settings_changepass(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let old_password = params.str("oldPassword")?.to_string();
    let new_password = params.str("newPassword")?.to_string();
    params.finish()?;

    if new_password.len() < 8 {
        return Err(PortalError::ConstraintViolation(String::from(
            "new password is too short",
        )));
    }

    let user = portal.require_user(session)?;
    let record = user.record().clone();
    if !crate::auth::verify(&record.username, &old_password, &record.verification_token) {
        return Err(PortalError::AuthFailed);
    }

    let new_token = crate::auth::verification_token(&record.username, &new_password);
    let new_master = crate::auth::master_keypair(&record.username, &new_password)?;

    // Re-seal the storage keypair under the new master key.
    let resealed = match (&record.storage_public, &record.storage_private_sealed) {
        (Some(public), Some(sealed)) => {
            let old_master = crate::auth::master_keypair(&record.username, &old_password)?;
            let old_hex = crypto::export_private_hex(old_master.secret());
            let scalar = Zeroizing::new(crypto::decrypt_with(
                portal.config.crypto,
                &old_hex,
                &Cryptex::parse(sealed)?,
            )?);
            let resealed = crypto::encrypt_with(
                portal.config.crypto,
                &crypto::export_public_hex(new_master.public()),
                scalar.as_slice(),
            )?;
            Some((public.clone(), resealed.into_bytes()))
        }
        _ => None,
    };

    let mut tx = portal.db.begin()?;
    tx.update_user_token(user.user_id, &new_token)?;
    if let Some((public, sealed)) = &resealed {
        tx.update_user_storage_key(user.user_id, public, sealed)?;
    }
    tx.commit()?;

    {
        let mut rec = user.record();
        rec.verification_token = new_token;
        if let Some((_, sealed)) = resealed {
            rec.storage_private_sealed = Some(sealed);
        }
    }
    session.set_master_secret(crypto::export_private_bytes(new_master.secret()));
    Ok(json!({ "changepass": "success" }))
}

pub(crate) fn meta(
    portal: &Portal,
    session: &Arc<Session>,
    params: Params,
) -> Result<Value, PortalError> {
    params.none()?;
    let user = portal.require_user(session)?;
    let mut serials = Map::new();
    for class in ObjectClass::ALL {
        serials.insert(class.as_str().to_string(), Value::from(user.serial(class)));
    }
    Ok(json!({
        "userID": user.user_id,
        "username": user.username,
        "serials": serials,
    }))
}

pub(crate) fn debug(
    portal: &Portal,
    session: &Arc<Session>,
    params: Params,
) -> Result<Value, PortalError> {
    params.none()?;
    let _ = portal.require_user(session)?;
    let mut users = Map::new();
    for (protocol, count) in portal.users.stats() {
        users.insert(protocol.to_string(), Value::from(count));
    }
    Ok(json!({
        "sessions": portal.sessions.count(),
        "users": users,
        "violations": session.violations(),
    }))
}

// ============================================================
// Anonymous utility endpoints
// ============================================================

pub(crate) fn ad(
    _portal: &Portal,
    _session: &Arc<Session>,
    params: Params,
) -> Result<Value, PortalError> {
    params.none()?;
    Ok(json!({ "ad": { "enabled": false } }))
}

pub(crate) fn cookies(
    _portal: &Portal,
    session: &Arc<Session>,
    params: Params,
) -> Result<Value, PortalError> {
    params.none()?;
    let state = if session.token.is_empty() { "disabled" } else { "enabled" };
    Ok(json!({ "cookies": state }))
}

pub(crate) fn scrape(
    portal: &Portal,
    _session: &Arc<Session>,
    params: Params,
) -> Result<Value, PortalError> {
    params.none()?;
    let mut queue = portal
        .scrape_queue
        .lock()
        .unwrap_or_else(|p| p.into_inner());
    let drained: Vec<String> = queue.drain(..).collect();
    Ok(json!({ "addresses": drained }))
}

pub(crate) fn scrape_add(
    portal: &Portal,
    _session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let address = params.str("address")?.to_string();
    params.finish()?;

    if address.is_empty() || !address.contains('@') {
        return Err(PortalError::InvalidParams(String::from(
            "address must be a mail address",
        )));
    }
    portal
        .scrape_queue
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .push(address);
    Ok(json!({ "scrape.add": "success" }))
}
