/*
 * endpoint.rs
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

//! The portal endpoint: the POST hook protocol front ends call with a
//! JSON-RPC body. Dispatch binary-searches a table sorted by method name
//! length then bytes; every request is validated (session, arity, strict
//! schema) before its handler runs. Mutations follow one template: collect
//! inputs, take the writer lock, snapshot the touched state, mutate memory,
//! write the database, and on any failure restore both sides.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde_json::Value;
use tracing::{error, warn};

use crate::config::CoreConfig;
use crate::mailbox::Mailbox;
use crate::session::{ObjectClass, Session, SessionRegistry, UserRegistry, UserState};
use crate::storage::{BlobStore, CacheStore, DataStore, MailRelay, Transaction};

use super::error::PortalError;
use super::methods;
use super::request::{self, Params};

/// Content type of every portal response.
pub const CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Reply handed back to the front end.
#[derive(Debug)]
pub struct PortalResponse {
    pub body: String,
    /// Set once the connection has spent its violation budget; the front
    /// end closes after writing the body.
    pub terminate: bool,
}

type Handler = fn(&Portal, &Arc<Session>, Params) -> Result<Value, PortalError>;

pub(crate) struct MethodEntry {
    pub name: &'static str,
    /// Callable without an authenticated session.
    pub anonymous: bool,
    pub takes_params: bool,
    pub handler: Handler,
}

/// Dispatch table, sorted by (length, bytes) of the method name.
static METHODS: &[MethodEntry] = &[
    MethodEntry { name: "ad", anonymous: true, takes_params: false, handler: methods::misc::ad },
    MethodEntry { name: "auth", anonymous: true, takes_params: true, handler: methods::auth::auth },
    MethodEntry { name: "meta", anonymous: false, takes_params: false, handler: methods::misc::meta },
    MethodEntry { name: "debug", anonymous: false, takes_params: false, handler: methods::misc::debug },
    MethodEntry { name: "logout", anonymous: false, takes_params: false, handler: methods::auth::logout },
    MethodEntry { name: "scrape", anonymous: true, takes_params: false, handler: methods::misc::scrape },
    MethodEntry { name: "search", anonymous: false, takes_params: true, handler: methods::messages::search },
    MethodEntry { name: "aliases", anonymous: false, takes_params: false, handler: methods::misc::aliases },
    MethodEntry { name: "cookies", anonymous: true, takes_params: false, handler: methods::misc::cookies },
    MethodEntry { name: "alert.list", anonymous: false, takes_params: false, handler: methods::misc::alert_list },
    MethodEntry { name: "scrape.add", anonymous: true, takes_params: true, handler: methods::misc::scrape_add },
    MethodEntry { name: "config.edit", anonymous: false, takes_params: true, handler: methods::misc::config_edit },
    MethodEntry { name: "config.load", anonymous: false, takes_params: false, handler: methods::misc::config_load },
    MethodEntry { name: "folders.add", anonymous: false, takes_params: true, handler: methods::folders::add },
    MethodEntry { name: "contacts.add", anonymous: false, takes_params: true, handler: methods::contacts::add },
    MethodEntry { name: "folders.list", anonymous: false, takes_params: true, handler: methods::folders::list },
    MethodEntry { name: "folders.tags", anonymous: false, takes_params: true, handler: methods::folders::tags },
    MethodEntry { name: "messages.tag", anonymous: false, takes_params: true, handler: methods::messages::tag },
    MethodEntry { name: "contacts.copy", anonymous: false, takes_params: true, handler: methods::contacts::copy },
    MethodEntry { name: "contacts.edit", anonymous: false, takes_params: true, handler: methods::contacts::edit },
    MethodEntry { name: "contacts.list", anonymous: false, takes_params: true, handler: methods::contacts::list },
    MethodEntry { name: "contacts.load", anonymous: false, takes_params: true, handler: methods::contacts::load },
    MethodEntry { name: "contacts.move", anonymous: false, takes_params: true, handler: methods::contacts::mv },
    MethodEntry { name: "messages.copy", anonymous: false, takes_params: true, handler: methods::messages::copy },
    MethodEntry { name: "messages.flag", anonymous: false, takes_params: true, handler: methods::messages::flag },
    MethodEntry { name: "messages.list", anonymous: false, takes_params: true, handler: methods::messages::list },
    MethodEntry { name: "messages.load", anonymous: false, takes_params: true, handler: methods::messages::load },
    MethodEntry { name: "messages.move", anonymous: false, takes_params: true, handler: methods::messages::mv },
    MethodEntry { name: "messages.send", anonymous: false, takes_params: true, handler: methods::compose::send },
    MethodEntry { name: "messages.tags", anonymous: false, takes_params: false, handler: methods::messages::tags },
    MethodEntry { name: "folders.remove", anonymous: false, takes_params: true, handler: methods::folders::remove },
    MethodEntry { name: "folders.rename", anonymous: false, takes_params: true, handler: methods::folders::rename },
    MethodEntry { name: "attachments.add", anonymous: false, takes_params: true, handler: methods::compose::attachments_add },
    MethodEntry { name: "contacts.remove", anonymous: false, takes_params: true, handler: methods::contacts::remove },
    MethodEntry { name: "messages.remove", anonymous: false, takes_params: true, handler: methods::messages::remove },
    MethodEntry { name: "messages.compose", anonymous: false, takes_params: false, handler: methods::compose::compose },
    MethodEntry { name: "alert.acknowledge", anonymous: false, takes_params: true, handler: methods::misc::alert_acknowledge },
    MethodEntry { name: "settings.identity", anonymous: false, takes_params: false, handler: methods::misc::settings_identity },
    MethodEntry { name: "attachments.remove", anonymous: false, takes_params: true, handler: methods::compose::attachments_remove },
    MethodEntry { name: "settings.changepass", anonymous: false, takes_params: true, handler: methods::misc::settings_changepass },
    MethodEntry { name: "attachments.progress", anonymous: false, takes_params: true, handler: methods::compose::attachments_progress },
];

fn method_key(name: &str) -> (usize, &[u8]) {
    (name.len(), name.as_bytes())
}

fn find_method(name: &str) -> Option<(usize, &'static MethodEntry)> {
    METHODS
        .binary_search_by(|entry| method_key(entry.name).cmp(&method_key(name)))
        .ok()
        .map(|ordinal| (ordinal, &METHODS[ordinal]))
}

/// Snapshot of the mutable mailbox collections, restored when a mutation
/// fails after memory was touched.
struct MailboxSnapshot {
    folders: std::collections::BTreeMap<u64, crate::mailbox::Folder>,
    contacts: std::collections::BTreeMap<u64, crate::mailbox::ContactFolder>,
    messages: std::collections::BTreeMap<u64, crate::mailbox::Message>,
    config: std::collections::BTreeMap<String, crate::mailbox::ConfigEntry>,
}

impl MailboxSnapshot {
    fn take(mailbox: &Mailbox) -> Self {
        Self {
            folders: mailbox.folders.clone(),
            contacts: mailbox.contacts.clone(),
            messages: mailbox.messages.clone(),
            config: mailbox.config.clone(),
        }
    }

    fn restore(self, mailbox: &mut Mailbox) {
        mailbox.folders = self.folders;
        mailbox.contacts = self.contacts;
        mailbox.messages = self.messages;
        mailbox.config = self.config;
    }
}

/// The portal control plane.
pub struct Portal {
    pub(crate) config: CoreConfig,
    pub(crate) db: Arc<dyn DataStore>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) cache: Arc<dyn CacheStore>,
    pub(crate) relay: Arc<dyn MailRelay>,
    pub(crate) sessions: SessionRegistry,
    pub(crate) users: UserRegistry,
    pub(crate) scrape_queue: Mutex<Vec<String>>,
}

impl Portal {
    pub fn new(
        config: CoreConfig,
        db: Arc<dyn DataStore>,
        blobs: Arc<dyn BlobStore>,
        cache: Arc<dyn CacheStore>,
        relay: Arc<dyn MailRelay>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            db,
            blobs,
            cache,
            relay,
            sessions: SessionRegistry::new(),
            users: UserRegistry::new(),
            scrape_queue: Mutex::new(Vec::new()),
        })
    }

    /// Front-end hook: a connection was accepted.
    pub fn open_session(&self, client: Option<IpAddr>) -> Arc<Session> {
        self.sessions.open(client)
    }

    /// Front-end hook: the connection is gone. Releases the user binding
    /// and forgets the session.
    pub fn close_session(&self, session: &Arc<Session>) {
        if let Some((user, protocol)) = session.terminate() {
            let user_id = user.user_id;
            drop(user);
            self.users.release(user_id, protocol);
        }
        self.sessions.close(&session.token);
    }

    /// Front-end hook: one JSON-RPC request body.
    pub fn handle(&self, session: &Arc<Session>, body: &[u8]) -> PortalResponse {
        let (reply, violation) = self.dispatch(session, body);
        if violation {
            session.record_violation();
        }
        PortalResponse {
            body: reply,
            terminate: session.violations() >= self.config.violation_limit,
        }
    }

    fn dispatch(&self, session: &Arc<Session>, body: &[u8]) -> (String, bool) {
        let request = match request::parse(body) {
            Ok(request) => request,
            Err(e) => {
                return (
                    request::failure(&Value::Null, e.wire_code(0), &e.to_string()),
                    e.counts_violation(),
                )
            }
        };

        let Some((ordinal, entry)) = find_method(&request.method) else {
            let e = PortalError::MethodNotFound;
            warn!(method = %request.method, "unknown portal method");
            return (
                request::failure(&request.id, e.wire_code(0), &e.to_string()),
                true,
            );
        };

        if !entry.anonymous && !session.is_authenticated() {
            let e = PortalError::PermissionDenied;
            return (
                request::failure(&request.id, e.wire_code(ordinal), &e.to_string()),
                true,
            );
        }

        let params = match Params::new(request.params.as_ref()) {
            Ok(params) => params,
            Err(e) => {
                return (
                    request::failure(&request.id, e.wire_code(ordinal), &e.to_string()),
                    e.counts_violation(),
                )
            }
        };
        if !entry.takes_params && !params.is_empty() {
            let e = PortalError::InvalidParams(String::from("method takes no parameters"));
            return (
                request::failure(&request.id, e.wire_code(ordinal), &e.to_string()),
                true,
            );
        }

        match (entry.handler)(self, session, params) {
            Ok(result) => (request::success(&request.id, result), false),
            Err(e) => {
                if matches!(e, PortalError::Internal(_)) {
                    error!(method = entry.name, error = %e, "portal method failed");
                }
                (
                    request::failure(&request.id, e.wire_code(ordinal), &e.to_string()),
                    e.counts_violation(),
                )
            }
        }
    }

    /// Multipart upload surface: exactly one body per
    /// `(composition, attachment)` pair.
    pub fn upload_attachment(
        &self,
        session: &Arc<Session>,
        compose_id: u64,
        attachment_id: u64,
        data: Bytes,
    ) -> Result<(), PortalError> {
        if !session.is_authenticated() {
            return Err(PortalError::PermissionDenied);
        }
        let mut compositions = session.compositions();
        let composition = compositions
            .get_mut(&compose_id)
            .ok_or_else(|| PortalError::InvalidReference(String::from("composition")))?;
        composition.attach_upload(attachment_id, data)?;
        Ok(())
    }

    // ============================================================
    // Sealed storage
    // ============================================================

    /// Turn secure storage on for the session's user: generate the storage
    /// keypair and seal its private half under the credential-derived
    /// master key. Called by the settings front end with the password in
    /// hand; the password never rides a JSON-RPC body twice.
    pub fn enable_secure_storage(
        &self,
        session: &Arc<Session>,
        password: &str,
    ) -> Result<(), PortalError> {
        let user = self.require_user(session)?;
        let record = user.record().clone();
        if !crate::auth::verify(&record.username, password, &record.verification_token) {
            return Err(PortalError::AuthFailed);
        }
        if record.storage_public.is_some() {
            return Err(PortalError::IllegalCombination(String::from(
                "secure storage is already enabled",
            )));
        }

        let storage = crate::crypto::generate()?;
        let master = crate::auth::master_keypair(&record.username, password)?;
        let sealed = crate::crypto::encrypt_with(
            self.config.crypto,
            &crate::crypto::export_public_hex(master.public()),
            crate::crypto::export_private_bytes(storage.secret()).as_slice(),
        )?;
        let public_hex = crate::crypto::export_public_hex(storage.public());

        let mut tx = self.db.begin()?;
        tx.update_user_storage_key(user.user_id, &public_hex, sealed.as_bytes())?;
        tx.commit()?;

        {
            let mut rec = user.record();
            rec.secure = true;
            rec.storage_public = Some(public_hex);
            rec.storage_private_sealed = Some(sealed.as_bytes().to_vec());
        }
        session.set_master_secret(crate::crypto::export_private_bytes(master.secret()));
        Ok(())
    }

    /// Inbound path: seal a message body for a secure-storage user. The
    /// delivery tier calls this before writing the blob and sets the
    /// encrypted status bit on the row.
    pub fn seal_message(&self, user_id: u64, data: &[u8]) -> Result<Vec<u8>, PortalError> {
        let record = self
            .db
            .user_by_id(user_id)?
            .ok_or_else(|| PortalError::InvalidReference(String::from("user")))?;
        let Some(public) = record.storage_public else {
            return Err(PortalError::IllegalCombination(String::from(
                "secure storage is not enabled",
            )));
        };
        let sealed = crate::crypto::encrypt_with(self.config.crypto, &public, data)?;
        Ok(sealed.into_bytes())
    }

    /// Open a sealed blob with the session's master secret: unseal the
    /// storage private key, then the payload. Fatal for the request on any
    /// failure; no plaintext escapes.
    pub fn open_sealed(
        &self,
        session: &Arc<Session>,
        data: &[u8],
    ) -> Result<Vec<u8>, PortalError> {
        let user = self.require_user(session)?;
        let master = session
            .master_secret()
            .ok_or(PortalError::PermissionDenied)?;
        let sealed_private = user
            .record()
            .storage_private_sealed
            .clone()
            .ok_or_else(|| {
                PortalError::IllegalCombination(String::from("secure storage is not enabled"))
            })?;

        let master_hex =
            zeroize::Zeroizing::new(crate::crypto::bytes_to_hex(master.as_slice()));
        let scalar = zeroize::Zeroizing::new(crate::crypto::decrypt_with(
            self.config.crypto,
            &master_hex,
            &crate::crypto::Cryptex::parse(&sealed_private)?,
        )?);
        let storage_hex = zeroize::Zeroizing::new(crate::crypto::bytes_to_hex(scalar.as_slice()));
        let payload = crate::crypto::decrypt_with(
            self.config.crypto,
            &storage_hex,
            &crate::crypto::Cryptex::parse(data)?,
        )?;
        Ok(payload)
    }

    // ============================================================
    // Shared method plumbing
    // ============================================================

    pub(crate) fn require_user(&self, session: &Arc<Session>) -> Result<Arc<UserState>, PortalError> {
        session.user().ok_or(PortalError::PermissionDenied)
    }

    /// Refresh one object class when the serial shows another process
    /// changed it; readers call this before returning data.
    pub(crate) fn refresh(&self, user: &UserState, class: ObjectClass) -> Result<(), PortalError> {
        user.refresh_if_stale(self.db.as_ref(), self.cache.as_ref(), class)?;
        Ok(())
    }

    /// The mutation template: transaction, writer lock, snapshot, memory
    /// mutation, database writes, then commit and exactly one serial bump.
    /// Any failure restores the snapshot and rolls the transaction back.
    pub(crate) fn mutate<R>(
        &self,
        user: &UserState,
        class: ObjectClass,
        op: impl FnOnce(&mut Mailbox, &mut dyn Transaction) -> Result<R, PortalError>,
    ) -> Result<R, PortalError> {
        let mut tx = self.db.begin()?;
        let mut mailbox = user.write();
        let snapshot = MailboxSnapshot::take(&mailbox);

        match op(&mut mailbox, tx.as_mut()) {
            Ok(result) => match tx.commit() {
                Ok(()) => {
                    drop(mailbox);
                    // The change is durable either way; a failed bump only
                    // delays peers until their next refresh.
                    if let Err(e) = user.bump_serial(self.cache.as_ref(), class) {
                        error!(user = user.user_id, error = %e, "serial bump failed");
                    }
                    Ok(result)
                }
                Err(e) => {
                    snapshot.restore(&mut mailbox);
                    Err(e.into())
                }
            },
            Err(e) => {
                snapshot.restore(&mut mailbox);
                drop(mailbox);
                tx.rollback();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_for_binary_search() {
        for pair in METHODS.windows(2) {
            assert!(
                method_key(pair[0].name) < method_key(pair[1].name),
                "{} must sort before {}",
                pair[0].name,
                pair[1].name
            );
        }
    }

    #[test]
    fn every_method_resolves_to_itself() {
        for (index, entry) in METHODS.iter().enumerate() {
            let (ordinal, found) = find_method(entry.name).unwrap();
            assert_eq!(ordinal, index);
            assert_eq!(found.name, entry.name);
        }
        assert!(find_method("no.such.method").is_none());
    }

    #[test]
    fn anonymous_allow_list_is_exact() {
        let anonymous: Vec<&str> = METHODS
            .iter()
            .filter(|e| e.anonymous)
            .map(|e| e.name)
            .collect();
        assert_eq!(anonymous, vec!["ad", "auth", "scrape", "cookies", "scrape.add"]);
    }
}
