/*
 * mod.rs
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

//! External collaborators behind traits: the SQL tier, the blob store, the
//! distributed cache, and the outbound relay. The core assumes only these
//! typed surfaces; query text, pooling, and wire protocols live elsewhere.
//! [`memory`] provides process-local implementations used by tests.

mod memory;

pub use memory::{MemoryBlobs, MemoryCache, MemoryRelay, MemoryStore};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use crate::mailbox::{Alert, Alias, ConfigEntry, Contact, Folder, Message};

/// Errors surfaced by any collaborator.
#[derive(Debug)]
pub enum StorageError {
    /// The referenced row or blob does not exist.
    NotFound,
    /// Transient or permanent backend failure; the portal maps this to an
    /// internal error the client may retry.
    Backend(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound => write!(f, "not found"),
            StorageError::Backend(m) => write!(f, "{}", m),
        }
    }
}

impl std::error::Error for StorageError {}

/// Folder trees exist per context; the portal exposes mail and contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FolderContext {
    Mail,
    Contacts,
}

/// Account lock state carried on the user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountLock {
    None,
    Admin,
    Inactivity,
    Abuse,
    User,
}

impl AccountLock {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountLock::None => "none",
            AccountLock::Admin => "admin",
            AccountLock::Inactivity => "inactivity",
            AccountLock::Abuse => "abuse",
            AccountLock::User => "user",
        }
    }
}

/// One user row.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: u64,
    pub username: String,
    /// PBKDF2 verification token, hex.
    pub verification_token: String,
    /// Inbound mail is sealed with the storage keypair when set.
    pub secure: bool,
    pub require_tls: bool,
    pub lock: AccountLock,
    pub quota: u64,
    /// Compressed public point, hex.
    pub storage_public: Option<String>,
    /// Private scalar sealed in a cryptex, wire bytes.
    pub storage_private_sealed: Option<Vec<u8>>,
}

/// Typed SQL surface. Reads come straight off the store; writes go through
/// a [`Transaction`] so multi-row changes commit or roll back as a unit.
pub trait DataStore: Send + Sync {
    fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>, StorageError>;
    fn user_by_id(&self, user_id: u64) -> Result<Option<UserRecord>, StorageError>;

    fn folders(&self, user_id: u64, context: FolderContext) -> Result<Vec<Folder>, StorageError>;
    fn messages(&self, user_id: u64) -> Result<Vec<Message>, StorageError>;
    fn aliases(&self, user_id: u64) -> Result<Vec<Alias>, StorageError>;
    fn contacts(&self, user_id: u64) -> Result<Vec<Contact>, StorageError>;
    fn config(&self, user_id: u64) -> Result<Vec<(String, ConfigEntry)>, StorageError>;
    fn alerts(&self, user_id: u64) -> Result<Vec<Alert>, StorageError>;

    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StorageError>;
}

/// One open transaction. Dropping without commit rolls back.
pub trait Transaction: Send {
    fn update_user_token(&mut self, user_id: u64, token: &str) -> Result<(), StorageError>;
    fn update_user_storage_key(
        &mut self,
        user_id: u64,
        public_hex: &str,
        sealed_private: &[u8],
    ) -> Result<(), StorageError>;

    /// Insert a folder row; returns the new folder id.
    fn insert_folder(
        &mut self,
        user_id: u64,
        context: FolderContext,
        name: &str,
        parent_id: u64,
        order: u32,
    ) -> Result<u64, StorageError>;
    fn update_folder(
        &mut self,
        user_id: u64,
        folder_id: u64,
        name: &str,
        parent_id: u64,
        order: u32,
    ) -> Result<(), StorageError>;
    fn delete_folder(&mut self, user_id: u64, folder_id: u64) -> Result<(), StorageError>;

    /// Insert a message row; returns the new message id.
    fn insert_message(&mut self, user_id: u64, message: &Message) -> Result<u64, StorageError>;
    fn update_message_folder(
        &mut self,
        user_id: u64,
        message_id: u64,
        folder_id: u64,
    ) -> Result<(), StorageError>;
    fn update_message_status(
        &mut self,
        user_id: u64,
        message_id: u64,
        status: u64,
    ) -> Result<(), StorageError>;
    fn set_message_tags(
        &mut self,
        user_id: u64,
        message_id: u64,
        tags: &[String],
    ) -> Result<(), StorageError>;
    fn delete_message(&mut self, user_id: u64, message_id: u64) -> Result<(), StorageError>;

    /// Insert a contact row; returns the new contact id.
    fn insert_contact(&mut self, user_id: u64, contact: &Contact) -> Result<u64, StorageError>;
    fn update_contact(&mut self, user_id: u64, contact: &Contact) -> Result<(), StorageError>;
    fn delete_contact(&mut self, user_id: u64, contact_id: u64) -> Result<(), StorageError>;

    fn set_config(&mut self, user_id: u64, key: &str, entry: &ConfigEntry)
        -> Result<(), StorageError>;
    fn delete_config(&mut self, user_id: u64, key: &str) -> Result<(), StorageError>;

    fn acknowledge_alert(
        &mut self,
        user_id: u64,
        alert_id: u64,
        when: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    fn commit(self: Box<Self>) -> Result<(), StorageError>;
    fn rollback(self: Box<Self>);
}

/// Byte-addressed blob surface of the message store ("tank").
pub trait BlobStore: Send + Sync {
    fn get(&self, user_id: u64, message_id: u64, server: &str) -> Result<Bytes, StorageError>;
    fn put(
        &self,
        user_id: u64,
        message_id: u64,
        server: &str,
        data: Bytes,
    ) -> Result<(), StorageError>;
    fn delete(&self, user_id: u64, message_id: u64, server: &str) -> Result<(), StorageError>;
}

/// Distributed cache surface: serial numbers and abuse counters.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<u64>, StorageError>;
    fn set(&self, key: &str, value: u64, ttl: Option<Duration>) -> Result<(), StorageError>;
    /// Atomic increment; missing keys start from zero. Returns the new value.
    fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<u64, StorageError>;
}

/// Outbound SMTP relay handoff.
pub trait MailRelay: Send + Sync {
    fn submit(&self, mail_from: &str, rcpt_to: &[String], data: &[u8]) -> Result<(), StorageError>;
}
