/*
 * auth.rs
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

//! auth and logout. Failed logins count against a date + /24 cache key;
//! past the limit the subnet is refused before any credential check, and
//! the refusal never reveals whether the username exists. Locked accounts
//! answer positively with `auth == "locked"` so clients stop retrying.

use std::net::IpAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::portal::endpoint::Portal;
use crate::portal::error::PortalError;
use crate::portal::request::Params;
use crate::session::{Protocol, Session, UserState};
use crate::storage::AccountLock;

fn subnet_tag(client: Option<IpAddr>) -> String {
    match client {
        Some(IpAddr::V4(v4)) => {
            let o = v4.octets();
            format!("{}.{}.{}", o[0], o[1], o[2])
        }
        Some(IpAddr::V6(v6)) => {
            let s = v6.segments();
            format!("{:x}:{:x}:{:x}", s[0], s[1], s[2])
        }
        None => String::from("local"),
    }
}

fn throttle_key(session: &Session) -> String {
    format!(
        "portal:auth:failures:{}:{}",
        chrono::Utc::now().format("%Y%m%d"),
        subnet_tag(session.client)
    )
}

pub(crate) fn auth(
    portal: &Portal,
    session: &Arc<Session>,
    mut params: Params,
) -> Result<Value, PortalError> {
    let username = params.str("username")?.to_string();
    let password = params.str("password")?.to_string();
    params.finish()?;

    if session.is_authenticated() {
        return Err(PortalError::IllegalCombination(String::from(
            "session is already authenticated",
        )));
    }

    let key = throttle_key(session);
    let failures = portal.cache.get(&key)?.unwrap_or(0);
    if failures >= portal.config.auth_failure_limit {
        warn!(subnet = %subnet_tag(session.client), failures, "auth attempts throttled");
        return Err(PortalError::AuthThrottled);
    }

    let record = portal.db.user_by_username(&username)?;
    let verified = record
        .as_ref()
        .map(|r| crate::auth::verify(&username, &password, &r.verification_token))
        .unwrap_or(false);
    let Some(record) = record.filter(|_| verified) else {
        let _ = portal
            .cache
            .increment(&key, Some(portal.config.auth_failure_window));
        info!(subnet = %subnet_tag(session.client), "authentication failed");
        return Err(PortalError::AuthFailed);
    };

    if record.lock != AccountLock::None {
        return Ok(json!({ "auth": "locked", "lock": record.lock.as_str() }));
    }

    let db = Arc::clone(&portal.db);
    let cache = Arc::clone(&portal.cache);
    let loaded_record = record.clone();
    let user = portal.users.acquire(record.user_id, Protocol::Web, move || {
        UserState::load(db.as_ref(), cache.as_ref(), loaded_record).map(Arc::new)
    })?;

    // Hold the master scalar for sealed-storage work this session.
    let master = crate::auth::master_keypair(&username, &password)?;
    session.set_master_secret(crate::crypto::export_private_bytes(master.secret()));
    session.authenticate(user, Protocol::Web);

    Ok(json!({ "auth": "success", "session": session.token }))
}

pub(crate) fn logout(
    portal: &Portal,
    session: &Arc<Session>,
    params: Params,
) -> Result<Value, PortalError> {
    params.none()?;
    if let Some((user, protocol)) = session.terminate() {
        let user_id = user.user_id;
        drop(user);
        portal.users.release(user_id, protocol);
    }
    portal.sessions.close(&session.token);
    Ok(json!({ "logout": "success" }))
}
