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

//! Mailbox state: the in-memory per-user aggregate (folders, messages,
//! aliases, contacts, compositions, alerts) and the operations over it.
//! Persistence goes through the [`crate::storage`] collaborators; the
//! aggregate itself never blocks on I/O while a lock is held.

mod alert;
mod alias;
mod compose;
mod contact;
mod folder;
mod message;
mod state;

pub use alert::Alert;
pub use alias::Alias;
pub use compose::{build_rfc822, Attachment, Composition, SendPayload};
pub use contact::{Contact, ContactFolder};
pub use folder::{
    escaped_display, matches as folder_matches, unescape_quotes, Folder, FolderLimits,
    FolderStatus,
};
pub use message::{parse_summary, status, HeaderSummary, Message};
pub use state::{BatchAction, Mailbox};

use crate::storage::StorageError;
use std::fmt;

/// Per-user configuration entry. Critical entries cannot be deleted through
/// the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub value: String,
    pub flags: u64,
}

impl ConfigEntry {
    pub const CRITICAL: u64 = 1;

    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), flags: 0 }
    }

    pub fn critical(value: impl Into<String>) -> Self {
        Self { value: value.into(), flags: Self::CRITICAL }
    }

    pub fn is_critical(&self) -> bool {
        self.flags & Self::CRITICAL != 0
    }
}

/// Errors from mailbox operations. The portal maps these onto its wire
/// taxonomy; deeper code never sees JSON-RPC codes.
#[derive(Debug)]
pub enum MailboxError {
    /// Folder name failed validation (empty, leading dot, control bytes,
    /// consecutive dots, multiple trailing dots).
    InvalidName(String),
    /// The top-level Inbox is reserved.
    Reserved,
    /// The full folder path already names a folder.
    Exists,
    /// Folder depth exceeds the recursion limit.
    DepthExceeded,
    /// A path segment exceeds the per-segment byte limit after unescaping.
    SegmentTooLong,
    /// A referenced folder/message/contact/composition/attachment is absent.
    NotFound(String),
    /// Rename would make a folder an ancestor of itself.
    SelfAncestor,
    /// Source and target must differ, an id list must be non-empty, etc.
    IllegalCombination(String),
    /// The flag bits intersect the system-reserved partition.
    SystemFlag,
    /// Unknown flag or tag action keyword.
    UnknownKeyword(String),
    /// Contact name already present in the target folder (case-sensitive).
    DuplicateName(String),
    /// The attachment already has uploaded data.
    AlreadyUploaded,
    Storage(StorageError),
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxError::InvalidName(m) => write!(f, "invalid folder name: {}", m),
            MailboxError::Reserved => write!(f, "the Inbox folder is reserved"),
            MailboxError::Exists => write!(f, "folder already exists"),
            MailboxError::DepthExceeded => write!(f, "folder depth limit exceeded"),
            MailboxError::SegmentTooLong => write!(f, "folder name segment too long"),
            MailboxError::NotFound(m) => write!(f, "{} not found", m),
            MailboxError::SelfAncestor => write!(f, "a folder cannot become its own ancestor"),
            MailboxError::IllegalCombination(m) => write!(f, "{}", m),
            MailboxError::SystemFlag => write!(f, "system flags cannot be changed"),
            MailboxError::UnknownKeyword(m) => write!(f, "unknown keyword: {}", m),
            MailboxError::DuplicateName(m) => write!(f, "name already in use: {}", m),
            MailboxError::AlreadyUploaded => write!(f, "attachment data already uploaded"),
            MailboxError::Storage(e) => write!(f, "storage failure: {}", e),
        }
    }
}

impl std::error::Error for MailboxError {}

impl From<StorageError> for MailboxError {
    fn from(e: StorageError) -> Self {
        MailboxError::Storage(e)
    }
}
