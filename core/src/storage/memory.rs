/*
 * memory.rs
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

//! Process-local collaborator implementations. Transactions buffer their
//! writes and apply them to a copied table set at commit, so a failed
//! multi-row change leaves the store untouched, the same contract the SQL
//! tier provides.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::mailbox::{Alert, Alias, ConfigEntry, Contact, Folder, Message};

use super::{
    AccountLock, BlobStore, CacheStore, DataStore, FolderContext, MailRelay, StorageError,
    Transaction, UserRecord,
};

#[derive(Default, Clone)]
struct Tables {
    users: BTreeMap<u64, UserRecord>,
    folders: BTreeMap<u64, (u64, FolderContext, Folder)>,
    messages: BTreeMap<u64, (u64, Message)>,
    aliases: BTreeMap<u64, (u64, Alias)>,
    contacts: BTreeMap<u64, (u64, Contact)>,
    config: BTreeMap<(u64, String), ConfigEntry>,
    alerts: BTreeMap<u64, (u64, Alert)>,
}

/// In-memory SQL tier.
pub struct MemoryStore {
    next_id: AtomicU64,
    tables: Mutex<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), tables: Mutex::new(Tables::default()) }
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a user with an Inbox; returns the user id.
    pub fn seed_user(&self, username: &str, verification_token: &str) -> u64 {
        let user_id = self.allocate();
        let inbox_id = self.allocate();
        let mut tables = self.lock();
        tables.users.insert(
            user_id,
            UserRecord {
                user_id,
                username: username.to_string(),
                verification_token: verification_token.to_string(),
                secure: false,
                require_tls: false,
                lock: AccountLock::None,
                quota: 0,
                storage_public: None,
                storage_private_sealed: None,
            },
        );
        tables.folders.insert(
            inbox_id,
            (
                user_id,
                FolderContext::Mail,
                Folder { folder_id: inbox_id, parent_id: 0, order: 0, name: String::from("Inbox") },
            ),
        );
        user_id
    }

    pub fn set_user_lock(&self, user_id: u64, lock: AccountLock) {
        if let Some(user) = self.lock().users.get_mut(&user_id) {
            user.lock = lock;
        }
    }

    pub fn seed_folder(
        &self,
        user_id: u64,
        context: FolderContext,
        parent_id: u64,
        order: u32,
        name: &str,
    ) -> u64 {
        let folder_id = self.allocate();
        self.lock().folders.insert(
            folder_id,
            (
                user_id,
                context,
                Folder { folder_id, parent_id, order, name: name.to_string() },
            ),
        );
        folder_id
    }

    pub fn seed_message(&self, user_id: u64, mut message: Message) -> u64 {
        let message_id = self.allocate();
        message.message_id = message_id;
        self.lock().messages.insert(message_id, (user_id, message));
        message_id
    }

    pub fn seed_alias(&self, user_id: u64, address: &str, display: &str, selected: bool) -> u64 {
        let alias_id = self.allocate();
        self.lock().aliases.insert(
            alias_id,
            (
                user_id,
                Alias {
                    alias_id,
                    address: address.to_string(),
                    display: display.to_string(),
                    selected,
                    created_utc: Utc::now(),
                },
            ),
        );
        alias_id
    }

    pub fn seed_contact(&self, user_id: u64, contact: Contact) -> u64 {
        let contact_id = self.allocate();
        let mut contact = contact;
        contact.contact_id = contact_id;
        self.lock().contacts.insert(contact_id, (user_id, contact));
        contact_id
    }

    pub fn seed_config(&self, user_id: u64, key: &str, entry: ConfigEntry) {
        self.lock().config.insert((user_id, key.to_string()), entry);
    }

    pub fn seed_alert(&self, user_id: u64, kind: &str, message: &str) -> u64 {
        let alert_id = self.allocate();
        self.lock()
            .alerts
            .insert(alert_id, (user_id, Alert::new(alert_id, kind, message)));
        alert_id
    }
}

impl DataStore for MemoryStore {
    fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>, StorageError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    fn user_by_id(&self, user_id: u64) -> Result<Option<UserRecord>, StorageError> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    fn folders(&self, user_id: u64, context: FolderContext) -> Result<Vec<Folder>, StorageError> {
        Ok(self
            .lock()
            .folders
            .values()
            .filter(|(uid, ctx, _)| *uid == user_id && *ctx == context)
            .map(|(_, _, f)| f.clone())
            .collect())
    }

    fn messages(&self, user_id: u64) -> Result<Vec<Message>, StorageError> {
        Ok(self
            .lock()
            .messages
            .values()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, m)| m.clone())
            .collect())
    }

    fn aliases(&self, user_id: u64) -> Result<Vec<Alias>, StorageError> {
        Ok(self
            .lock()
            .aliases
            .values()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, a)| a.clone())
            .collect())
    }

    fn contacts(&self, user_id: u64) -> Result<Vec<Contact>, StorageError> {
        Ok(self
            .lock()
            .contacts
            .values()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, c)| c.clone())
            .collect())
    }

    fn config(&self, user_id: u64) -> Result<Vec<(String, ConfigEntry)>, StorageError> {
        Ok(self
            .lock()
            .config
            .iter()
            .filter(|((uid, _), _)| *uid == user_id)
            .map(|((_, key), entry)| (key.clone(), entry.clone()))
            .collect())
    }

    fn alerts(&self, user_id: u64) -> Result<Vec<Alert>, StorageError> {
        Ok(self
            .lock()
            .alerts
            .values()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, a)| a.clone())
            .collect())
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StorageError> {
        Ok(Box::new(MemoryTransaction { store: self, ops: Vec::new() }))
    }
}

enum Op {
    UserToken { user_id: u64, token: String },
    UserStorageKey { user_id: u64, public_hex: String, sealed: Vec<u8> },
    FolderInsert { user_id: u64, context: FolderContext, folder: Folder },
    FolderUpdate { user_id: u64, folder_id: u64, name: String, parent_id: u64, order: u32 },
    FolderDelete { user_id: u64, folder_id: u64 },
    MessageInsert { user_id: u64, message: Message },
    MessageFolder { user_id: u64, message_id: u64, folder_id: u64 },
    MessageStatus { user_id: u64, message_id: u64, status: u64 },
    MessageTags { user_id: u64, message_id: u64, tags: Vec<String> },
    MessageDelete { user_id: u64, message_id: u64 },
    ContactInsert { user_id: u64, contact: Contact },
    ContactUpdate { user_id: u64, contact: Contact },
    ContactDelete { user_id: u64, contact_id: u64 },
    ConfigSet { user_id: u64, key: String, entry: ConfigEntry },
    ConfigDelete { user_id: u64, key: String },
    AlertAck { user_id: u64, alert_id: u64, when: DateTime<Utc> },
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    ops: Vec<Op>,
}

fn apply(tables: &mut Tables, op: &Op) -> Result<(), StorageError> {
    match op {
        Op::UserToken { user_id, token } => {
            let user = tables.users.get_mut(user_id).ok_or(StorageError::NotFound)?;
            user.verification_token = token.clone();
        }
        Op::UserStorageKey { user_id, public_hex, sealed } => {
            let user = tables.users.get_mut(user_id).ok_or(StorageError::NotFound)?;
            user.secure = true;
            user.storage_public = Some(public_hex.clone());
            user.storage_private_sealed = Some(sealed.clone());
        }
        Op::FolderInsert { user_id, context, folder } => {
            tables
                .folders
                .insert(folder.folder_id, (*user_id, *context, folder.clone()));
        }
        Op::FolderUpdate { user_id, folder_id, name, parent_id, order } => {
            let (uid, _, folder) =
                tables.folders.get_mut(folder_id).ok_or(StorageError::NotFound)?;
            if uid != user_id {
                return Err(StorageError::NotFound);
            }
            folder.name = name.clone();
            folder.parent_id = *parent_id;
            folder.order = *order;
        }
        Op::FolderDelete { user_id, folder_id } => {
            match tables.folders.get(folder_id) {
                Some((uid, _, _)) if uid == user_id => {
                    tables.folders.remove(folder_id);
                }
                _ => return Err(StorageError::NotFound),
            }
        }
        Op::MessageInsert { user_id, message } => {
            tables
                .messages
                .insert(message.message_id, (*user_id, message.clone()));
        }
        Op::MessageFolder { user_id, message_id, folder_id } => {
            let (uid, message) =
                tables.messages.get_mut(message_id).ok_or(StorageError::NotFound)?;
            if uid != user_id {
                return Err(StorageError::NotFound);
            }
            message.folder_id = *folder_id;
        }
        Op::MessageStatus { user_id, message_id, status } => {
            let (uid, message) =
                tables.messages.get_mut(message_id).ok_or(StorageError::NotFound)?;
            if uid != user_id {
                return Err(StorageError::NotFound);
            }
            message.status = *status;
        }
        Op::MessageTags { user_id, message_id, tags } => {
            let (uid, message) =
                tables.messages.get_mut(message_id).ok_or(StorageError::NotFound)?;
            if uid != user_id {
                return Err(StorageError::NotFound);
            }
            message.tags = tags.clone();
        }
        Op::MessageDelete { user_id, message_id } => {
            match tables.messages.get(message_id) {
                Some((uid, _)) if uid == user_id => {
                    tables.messages.remove(message_id);
                }
                _ => return Err(StorageError::NotFound),
            }
        }
        Op::ContactInsert { user_id, contact } => {
            tables
                .contacts
                .insert(contact.contact_id, (*user_id, contact.clone()));
        }
        Op::ContactUpdate { user_id, contact } => {
            let (uid, row) = tables
                .contacts
                .get_mut(&contact.contact_id)
                .ok_or(StorageError::NotFound)?;
            if uid != user_id {
                return Err(StorageError::NotFound);
            }
            *row = contact.clone();
        }
        Op::ContactDelete { user_id, contact_id } => {
            match tables.contacts.get(contact_id) {
                Some((uid, _)) if uid == user_id => {
                    tables.contacts.remove(contact_id);
                }
                _ => return Err(StorageError::NotFound),
            }
        }
        Op::ConfigSet { user_id, key, entry } => {
            tables.config.insert((*user_id, key.clone()), entry.clone());
        }
        Op::ConfigDelete { user_id, key } => {
            tables
                .config
                .remove(&(*user_id, key.clone()))
                .ok_or(StorageError::NotFound)?;
        }
        Op::AlertAck { user_id, alert_id, when } => {
            let (uid, alert) = tables.alerts.get_mut(alert_id).ok_or(StorageError::NotFound)?;
            if uid != user_id || alert.acknowledged_utc.is_some() {
                return Err(StorageError::NotFound);
            }
            alert.acknowledged_utc = Some(*when);
        }
    }
    Ok(())
}

impl Transaction for MemoryTransaction<'_> {
    fn update_user_token(&mut self, user_id: u64, token: &str) -> Result<(), StorageError> {
        self.ops.push(Op::UserToken { user_id, token: token.to_string() });
        Ok(())
    }

    fn update_user_storage_key(
        &mut self,
        user_id: u64,
        public_hex: &str,
        sealed_private: &[u8],
    ) -> Result<(), StorageError> {
        self.ops.push(Op::UserStorageKey {
            user_id,
            public_hex: public_hex.to_string(),
            sealed: sealed_private.to_vec(),
        });
        Ok(())
    }

    fn insert_folder(
        &mut self,
        user_id: u64,
        context: FolderContext,
        name: &str,
        parent_id: u64,
        order: u32,
    ) -> Result<u64, StorageError> {
        let folder_id = self.store.allocate();
        self.ops.push(Op::FolderInsert {
            user_id,
            context,
            folder: Folder { folder_id, parent_id, order, name: name.to_string() },
        });
        Ok(folder_id)
    }

    fn update_folder(
        &mut self,
        user_id: u64,
        folder_id: u64,
        name: &str,
        parent_id: u64,
        order: u32,
    ) -> Result<(), StorageError> {
        self.ops.push(Op::FolderUpdate {
            user_id,
            folder_id,
            name: name.to_string(),
            parent_id,
            order,
        });
        Ok(())
    }

    fn delete_folder(&mut self, user_id: u64, folder_id: u64) -> Result<(), StorageError> {
        self.ops.push(Op::FolderDelete { user_id, folder_id });
        Ok(())
    }

    fn insert_message(&mut self, user_id: u64, message: &Message) -> Result<u64, StorageError> {
        let message_id = self.store.allocate();
        let mut message = message.clone();
        message.message_id = message_id;
        self.ops.push(Op::MessageInsert { user_id, message });
        Ok(message_id)
    }

    fn update_message_folder(
        &mut self,
        user_id: u64,
        message_id: u64,
        folder_id: u64,
    ) -> Result<(), StorageError> {
        self.ops.push(Op::MessageFolder { user_id, message_id, folder_id });
        Ok(())
    }

    fn update_message_status(
        &mut self,
        user_id: u64,
        message_id: u64,
        status: u64,
    ) -> Result<(), StorageError> {
        self.ops.push(Op::MessageStatus { user_id, message_id, status });
        Ok(())
    }

    fn set_message_tags(
        &mut self,
        user_id: u64,
        message_id: u64,
        tags: &[String],
    ) -> Result<(), StorageError> {
        self.ops.push(Op::MessageTags { user_id, message_id, tags: tags.to_vec() });
        Ok(())
    }

    fn delete_message(&mut self, user_id: u64, message_id: u64) -> Result<(), StorageError> {
        self.ops.push(Op::MessageDelete { user_id, message_id });
        Ok(())
    }

    fn insert_contact(&mut self, user_id: u64, contact: &Contact) -> Result<u64, StorageError> {
        let contact_id = self.store.allocate();
        let mut contact = contact.clone();
        contact.contact_id = contact_id;
        self.ops.push(Op::ContactInsert { user_id, contact });
        Ok(contact_id)
    }

    fn update_contact(&mut self, user_id: u64, contact: &Contact) -> Result<(), StorageError> {
        self.ops.push(Op::ContactUpdate { user_id, contact: contact.clone() });
        Ok(())
    }

    fn delete_contact(&mut self, user_id: u64, contact_id: u64) -> Result<(), StorageError> {
        self.ops.push(Op::ContactDelete { user_id, contact_id });
        Ok(())
    }

    fn set_config(
        &mut self,
        user_id: u64,
        key: &str,
        entry: &ConfigEntry,
    ) -> Result<(), StorageError> {
        self.ops.push(Op::ConfigSet { user_id, key: key.to_string(), entry: entry.clone() });
        Ok(())
    }

    fn delete_config(&mut self, user_id: u64, key: &str) -> Result<(), StorageError> {
        self.ops.push(Op::ConfigDelete { user_id, key: key.to_string() });
        Ok(())
    }

    fn acknowledge_alert(
        &mut self,
        user_id: u64,
        alert_id: u64,
        when: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.ops.push(Op::AlertAck { user_id, alert_id, when });
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut tables = self.store.lock();
        // Stage against a copy; swap only when every op lands.
        let mut staged = tables.clone();
        for op in &self.ops {
            apply(&mut staged, op)?;
        }
        *tables = staged;
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryBlobs {
    blobs: Mutex<HashMap<(u64, u64, String), Bytes>>,
}

impl MemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobs {
    fn get(&self, user_id: u64, message_id: u64, server: &str) -> Result<Bytes, StorageError> {
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(user_id, message_id, server.to_string()))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn put(
        &self,
        user_id: u64,
        message_id: u64,
        server: &str,
        data: Bytes,
    ) -> Result<(), StorageError> {
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert((user_id, message_id, server.to_string()), data);
        Ok(())
    }

    fn delete(&self, user_id: u64, message_id: u64, server: &str) -> Result<(), StorageError> {
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&(user_id, message_id, server.to_string()))
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }
}

/// In-memory cache with per-key expiry.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (u64, Option<Instant>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(entries: &mut HashMap<String, (u64, Option<Instant>)>, key: &str) {
        if let Some((_, Some(deadline))) = entries.get(key) {
            if *deadline <= Instant::now() {
                entries.remove(key);
            }
        }
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Self::prune(&mut entries, key);
        Ok(entries.get(key).map(|(v, _)| *v))
    }

    fn set(&self, key: &str, value: u64, ttl: Option<Duration>) -> Result<(), StorageError> {
        let deadline = ttl.map(|d| Instant::now() + d);
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), (value, deadline));
        Ok(())
    }

    fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<u64, StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Self::prune(&mut entries, key);
        match entries.get_mut(key) {
            Some((value, _)) => {
                *value += 1;
                Ok(*value)
            }
            None => {
                // Window measured from the first hit.
                let deadline = ttl.map(|d| Instant::now() + d);
                entries.insert(key.to_string(), (1, deadline));
                Ok(1)
            }
        }
    }
}

/// Relay that records submissions instead of speaking SMTP.
#[derive(Default)]
pub struct MemoryRelay {
    submissions: Mutex<Vec<(String, Vec<String>, Vec<u8>)>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> Vec<(String, Vec<String>, Vec<u8>)> {
        self.submissions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl MailRelay for MemoryRelay {
    fn submit(&self, mail_from: &str, rcpt_to: &[String], data: &[u8]) -> Result<(), StorageError> {
        self.submissions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((mail_from.to_string(), rcpt_to.to_vec(), data.to_vec()));
        Ok(())
    }
}
