/*
 * state.rs
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

//! The per-user aggregate and its operations. All methods are pure memory
//! plus collaborator calls passed in by the caller; the session tier owns
//! locking and the portal owns the transaction/snapshot protocol around
//! mutations. Message operations scan the index rather than maintaining
//! per-folder secondary indices; messages are paged to disk, so the scans
//! stay short.

use std::collections::BTreeMap;

use crate::storage::{BlobStore, DataStore, FolderContext, StorageError, Transaction};

use super::contact::{Contact, ContactFolder};
use super::folder::{self, Folder, FolderLimits, FolderStatus};
use super::message::{status, Message};
use super::{Alias, ConfigEntry, MailboxError};

/// Batch actions shared by the flag and tag operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Add,
    Remove,
    Replace,
    List,
}

impl BatchAction {
    pub fn parse(keyword: &str) -> Result<Self, MailboxError> {
        match keyword {
            "add" => Ok(BatchAction::Add),
            "remove" => Ok(BatchAction::Remove),
            "replace" => Ok(BatchAction::Replace),
            "list" => Ok(BatchAction::List),
            other => Err(MailboxError::UnknownKeyword(other.to_string())),
        }
    }
}

/// The in-memory mailbox: indexed state for one user.
pub struct Mailbox {
    pub user_id: u64,
    pub folders: BTreeMap<u64, Folder>,
    pub contacts: BTreeMap<u64, ContactFolder>,
    pub messages: BTreeMap<u64, Message>,
    pub aliases: BTreeMap<u64, Alias>,
    pub config: BTreeMap<String, ConfigEntry>,
}

impl Mailbox {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            folders: BTreeMap::new(),
            contacts: BTreeMap::new(),
            messages: BTreeMap::new(),
            aliases: BTreeMap::new(),
            config: BTreeMap::new(),
        }
    }

    /// Load the full aggregate from the SQL tier.
    pub fn load(db: &dyn DataStore, user_id: u64) -> Result<Self, StorageError> {
        let mut mailbox = Self::new(user_id);
        mailbox.reload_folders(db)?;
        mailbox.reload_messages(db)?;
        mailbox.reload_contacts(db)?;
        mailbox.reload_aliases(db)?;
        mailbox.reload_config(db)?;
        Ok(mailbox)
    }

    pub fn reload_folders(&mut self, db: &dyn DataStore) -> Result<(), StorageError> {
        self.folders = db
            .folders(self.user_id, FolderContext::Mail)?
            .into_iter()
            .map(|f| (f.folder_id, f))
            .collect();
        Ok(())
    }

    pub fn reload_messages(&mut self, db: &dyn DataStore) -> Result<(), StorageError> {
        self.messages = db
            .messages(self.user_id)?
            .into_iter()
            .map(|m| (m.message_id, m))
            .collect();
        Ok(())
    }

    pub fn reload_contacts(&mut self, db: &dyn DataStore) -> Result<(), StorageError> {
        let mut folders: BTreeMap<u64, ContactFolder> = db
            .folders(self.user_id, FolderContext::Contacts)?
            .into_iter()
            .map(|f| (f.folder_id, ContactFolder::new(f)))
            .collect();
        for contact in db.contacts(self.user_id)? {
            if let Some(cf) = folders.get_mut(&contact.folder_id) {
                cf.records.insert(contact.contact_id, contact);
            }
        }
        self.contacts = folders;
        Ok(())
    }

    pub fn reload_aliases(&mut self, db: &dyn DataStore) -> Result<(), StorageError> {
        self.aliases = db
            .aliases(self.user_id)?
            .into_iter()
            .map(|a| (a.alias_id, a))
            .collect();
        Ok(())
    }

    pub fn reload_config(&mut self, db: &dyn DataStore) -> Result<(), StorageError> {
        self.config = db.config(self.user_id)?.into_iter().collect();
        Ok(())
    }

    // ============================================================
    // Folder views
    // ============================================================

    fn contact_folder_view(&self) -> BTreeMap<u64, Folder> {
        self.contacts
            .iter()
            .map(|(id, cf)| (*id, cf.folder.clone()))
            .collect()
    }

    /// Synchronize the contact index after tree mutations on a view map:
    /// pick up new folders, apply field changes, drop deleted ones.
    fn sync_contact_folders(&mut self, view: BTreeMap<u64, Folder>) {
        self.contacts.retain(|id, _| view.contains_key(id));
        for (id, f) in view {
            match self.contacts.get_mut(&id) {
                Some(cf) => cf.folder = f,
                None => {
                    self.contacts.insert(id, ContactFolder::new(f));
                }
            }
        }
    }

    pub fn folder_full_name(&self, context: FolderContext, folder_id: u64) -> Option<String> {
        match context {
            FolderContext::Mail => self
                .folders
                .get(&folder_id)
                .map(|f| folder::full_name(&self.folders, f)),
            FolderContext::Contacts => {
                let view = self.contact_folder_view();
                view.get(&folder_id).map(|f| folder::full_name(&view, f))
            }
        }
    }

    /// All folders of a context as (id, full path, row) sorted by parent
    /// then order.
    pub fn folder_list(&self, context: FolderContext) -> Vec<(u64, String, Folder)> {
        let view = match context {
            FolderContext::Mail => self.folders.clone(),
            FolderContext::Contacts => self.contact_folder_view(),
        };
        let mut list: Vec<(u64, String, Folder)> = view
            .values()
            .map(|f| (f.folder_id, folder::full_name(&view, f), f.clone()))
            .collect();
        list.sort_by(|a, b| {
            (a.2.parent_id, a.2.order, a.0).cmp(&(b.2.parent_id, b.2.order, b.0))
        });
        list
    }

    /// Narrow a context's folders to those matching a LIST-style pattern.
    /// The reference and mailbox pattern are combined with the hierarchy
    /// delimiter when both are non-empty.
    pub fn folder_narrow(
        &self,
        context: FolderContext,
        reference: &str,
        pattern: &str,
    ) -> Vec<(u64, String)> {
        let compare = if !reference.is_empty() && !pattern.is_empty() {
            format!("{}.{}", reference, pattern)
        } else if pattern.is_empty() {
            reference.to_string()
        } else {
            pattern.to_string()
        };
        self.folder_list(context)
            .into_iter()
            .filter(|(_, path, _)| folder::matches(path, &compare))
            .map(|(id, path, _)| (id, path))
            .collect()
    }

    // ============================================================
    // Folder CRUD
    // ============================================================

    pub fn folder_create(
        &mut self,
        tx: &mut dyn Transaction,
        context: FolderContext,
        path: &str,
        limits: &FolderLimits,
    ) -> Result<u64, MailboxError> {
        match context {
            FolderContext::Mail => {
                folder::create(tx, &mut self.folders, self.user_id, context, path, limits)
            }
            FolderContext::Contacts => {
                let mut view = self.contact_folder_view();
                let id = folder::create(tx, &mut view, self.user_id, context, path, limits)?;
                self.sync_contact_folders(view);
                Ok(id)
            }
        }
    }

    pub fn folder_rename(
        &mut self,
        tx: &mut dyn Transaction,
        context: FolderContext,
        folder_id: u64,
        rename_to: &str,
        limits: &FolderLimits,
    ) -> Result<(), MailboxError> {
        match context {
            FolderContext::Mail => folder::rename(
                tx,
                &mut self.folders,
                self.user_id,
                context,
                folder_id,
                rename_to,
                limits,
            ),
            FolderContext::Contacts => {
                let mut view = self.contact_folder_view();
                folder::rename(tx, &mut view, self.user_id, context, folder_id, rename_to, limits)?;
                self.sync_contact_folders(view);
                Ok(())
            }
        }
    }

    /// Remove a folder. Child messages (or contact records) are deleted
    /// first in all cases; the folder row goes only when it has no child
    /// folders. The Inbox is protected.
    pub fn folder_remove(
        &mut self,
        tx: &mut dyn Transaction,
        blobs: &dyn BlobStore,
        context: FolderContext,
        folder_id: u64,
    ) -> Result<(), MailboxError> {
        match context {
            FolderContext::Mail => {
                let path = self
                    .folder_full_name(context, folder_id)
                    .ok_or_else(|| MailboxError::NotFound(String::from("folder")))?;
                if path.eq_ignore_ascii_case("Inbox") {
                    return Err(MailboxError::Reserved);
                }

                let doomed: Vec<u64> = self
                    .messages
                    .values()
                    .filter(|m| m.folder_id == folder_id)
                    .map(|m| m.message_id)
                    .collect();
                for message_id in doomed {
                    let server = match self.messages.get(&message_id) {
                        Some(m) => m.server.clone(),
                        None => continue,
                    };
                    blobs.delete(self.user_id, message_id, &server)?;
                    tx.delete_message(self.user_id, message_id)?;
                    self.messages.remove(&message_id);
                }

                if !folder::has_children(&self.folders, folder_id) {
                    tx.delete_folder(self.user_id, folder_id)?;
                    self.folders.remove(&folder_id);
                }
                Ok(())
            }
            FolderContext::Contacts => {
                let cf = self
                    .contacts
                    .get(&folder_id)
                    .ok_or_else(|| MailboxError::NotFound(String::from("folder")))?;
                let record_ids: Vec<u64> = cf.records.keys().copied().collect();
                for contact_id in record_ids {
                    tx.delete_contact(self.user_id, contact_id)?;
                }
                if let Some(cf) = self.contacts.get_mut(&folder_id) {
                    cf.records.clear();
                }

                let view = self.contact_folder_view();
                if !folder::has_children(&view, folder_id) {
                    tx.delete_folder(self.user_id, folder_id)?;
                    self.contacts.remove(&folder_id);
                }
                Ok(())
            }
        }
    }

    // ============================================================
    // Folder statistics
    // ============================================================

    /// Message/recent/unseen counts plus first-unseen ordinal and uidnext.
    pub fn folder_status(&self, folder_id: u64) -> Result<FolderStatus, MailboxError> {
        if !self.folders.contains_key(&folder_id) {
            return Err(MailboxError::NotFound(String::from("folder")));
        }
        let mut st = FolderStatus { folder_id, ..FolderStatus::default() };
        for message in self.messages.values() {
            if message.folder_id == folder_id {
                st.messages += 1;
                if message.status & status::RECENT != 0 {
                    st.recent += 1;
                }
                if message.status & status::SEEN == 0 {
                    st.unseen += 1;
                    if st.first == 0 {
                        st.first = st.messages;
                    }
                }
            }
            if message.message_id > st.uidnext {
                st.uidnext = message.message_id;
            }
        }
        st.uidnext += 1;
        Ok(st)
    }

    /// Tag histogram restricted to one folder.
    pub fn folder_tag_histogram(&self, folder_id: u64) -> Result<BTreeMap<String, u64>, MailboxError> {
        if !self.folders.contains_key(&folder_id) {
            return Err(MailboxError::NotFound(String::from("folder")));
        }
        let mut histogram = BTreeMap::new();
        for message in self.messages.values() {
            if message.folder_id != folder_id {
                continue;
            }
            for tag in &message.tags {
                *histogram.entry(tag.clone()).or_insert(0u64) += 1;
            }
        }
        Ok(histogram)
    }

    /// Union of every tag on the account.
    pub fn tags_union(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for message in self.messages.values() {
            for tag in &message.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }
        tags.sort();
        tags
    }

    // ============================================================
    // Message operations
    // ============================================================

    pub fn messages_in(&self, folder_id: u64) -> Vec<&Message> {
        self.messages
            .values()
            .filter(|m| m.folder_id == folder_id && m.visible)
            .collect()
    }

    fn require_folder(&self, folder_id: u64) -> Result<(), MailboxError> {
        if self.folders.contains_key(&folder_id) {
            Ok(())
        } else {
            Err(MailboxError::NotFound(String::from("folder")))
        }
    }

    fn require_messages_in(
        &self,
        folder_id: u64,
        ids: &[u64],
    ) -> Result<(), MailboxError> {
        for id in ids {
            match self.messages.get(id) {
                Some(m) if m.folder_id == folder_id => {}
                _ => return Err(MailboxError::NotFound(String::from("message"))),
            }
        }
        Ok(())
    }

    /// Duplicate messages into another folder: blob copy plus new row per
    /// id. On any failure the blobs already copied are removed again; the
    /// caller rolls back the transaction and restores the index snapshot.
    pub fn message_copy(
        &mut self,
        tx: &mut dyn Transaction,
        blobs: &dyn BlobStore,
        source: u64,
        target: u64,
        ids: &[u64],
    ) -> Result<Vec<(u64, u64)>, MailboxError> {
        if source == target {
            return Err(MailboxError::IllegalCombination(String::from(
                "source and target folders must differ",
            )));
        }
        if ids.is_empty() {
            return Err(MailboxError::IllegalCombination(String::from(
                "no messages given",
            )));
        }
        self.require_folder(source)?;
        self.require_folder(target)?;
        self.require_messages_in(source, ids)?;

        let mut mapping: Vec<(u64, u64)> = Vec::with_capacity(ids.len());
        let mut copied_blobs: Vec<(u64, String)> = Vec::new();
        let result = (|| -> Result<(), MailboxError> {
            for &id in ids {
                let original = match self.messages.get(&id) {
                    Some(m) => m.clone(),
                    None => return Err(MailboxError::NotFound(String::from("message"))),
                };
                let mut duplicate = original.clone();
                duplicate.folder_id = target;
                let new_id = tx.insert_message(self.user_id, &duplicate)?;
                duplicate.message_id = new_id;

                let data = blobs.get(self.user_id, id, &original.server)?;
                blobs.put(self.user_id, new_id, &original.server, data)?;
                copied_blobs.push((new_id, original.server.clone()));

                self.messages.insert(new_id, duplicate);
                mapping.push((id, new_id));
            }
            Ok(())
        })();

        if let Err(e) = result {
            // Unwind the blob copies; row rollback is the caller's.
            for (new_id, server) in copied_blobs {
                let _ = blobs.delete(self.user_id, new_id, &server);
            }
            return Err(e);
        }

        Ok(mapping)
    }

    /// Move messages between folders: index update plus row update per id.
    pub fn message_move(
        &mut self,
        tx: &mut dyn Transaction,
        source: u64,
        target: u64,
        ids: &[u64],
    ) -> Result<(), MailboxError> {
        if source == target {
            return Err(MailboxError::IllegalCombination(String::from(
                "source and target folders must differ",
            )));
        }
        if ids.is_empty() {
            return Err(MailboxError::IllegalCombination(String::from(
                "no messages given",
            )));
        }
        self.require_folder(source)?;
        self.require_folder(target)?;
        self.require_messages_in(source, ids)?;

        for &id in ids {
            tx.update_message_folder(self.user_id, id, target)?;
            if let Some(message) = self.messages.get_mut(&id) {
                message.folder_id = target;
            }
        }
        Ok(())
    }

    /// Flag batch operation. Mutating actions require non-empty bits that
    /// avoid the system partition; `list` returns the set flag names per
    /// message.
    pub fn message_flag(
        &mut self,
        tx: &mut dyn Transaction,
        action: BatchAction,
        folder_id: u64,
        ids: &[u64],
        bits: u64,
    ) -> Result<Option<BTreeMap<u64, Vec<&'static str>>>, MailboxError> {
        if ids.is_empty() {
            return Err(MailboxError::IllegalCombination(String::from(
                "no messages given",
            )));
        }
        self.require_folder(folder_id)?;
        self.require_messages_in(folder_id, ids)?;

        if action == BatchAction::List {
            let mut listing = BTreeMap::new();
            for &id in ids {
                if let Some(message) = self.messages.get(&id) {
                    listing.insert(id, status::names_for(message.status));
                }
            }
            return Ok(Some(listing));
        }

        if bits == 0 {
            return Err(MailboxError::IllegalCombination(String::from(
                "no flags given",
            )));
        }
        if bits & status::SYSTEM_FLAGS != 0 {
            return Err(MailboxError::SystemFlag);
        }

        for &id in ids {
            let message = self
                .messages
                .get_mut(&id)
                .ok_or_else(|| MailboxError::NotFound(String::from("message")))?;
            let updated = match action {
                BatchAction::Add => message.status | bits,
                BatchAction::Remove => message.status & !bits,
                BatchAction::Replace => (message.status & !status::USER_FLAGS) | bits,
                BatchAction::List => unreachable!(),
            };
            tx.update_message_status(self.user_id, id, updated)?;
            message.status = updated;
        }
        Ok(None)
    }

    /// Tag batch operation. The tagged status bit tracks tag presence.
    pub fn message_tag(
        &mut self,
        tx: &mut dyn Transaction,
        action: BatchAction,
        folder_id: u64,
        ids: &[u64],
        tags: &[String],
    ) -> Result<Option<BTreeMap<u64, Vec<String>>>, MailboxError> {
        if ids.is_empty() {
            return Err(MailboxError::IllegalCombination(String::from(
                "no messages given",
            )));
        }
        self.require_folder(folder_id)?;
        self.require_messages_in(folder_id, ids)?;

        if action == BatchAction::List {
            let mut listing = BTreeMap::new();
            for &id in ids {
                if let Some(message) = self.messages.get(&id) {
                    listing.insert(id, message.tags.clone());
                }
            }
            return Ok(Some(listing));
        }

        if tags.is_empty() && action != BatchAction::Replace {
            return Err(MailboxError::IllegalCombination(String::from(
                "no tags given",
            )));
        }

        for &id in ids {
            let message = self
                .messages
                .get_mut(&id)
                .ok_or_else(|| MailboxError::NotFound(String::from("message")))?;
            match action {
                BatchAction::Add => {
                    for tag in tags {
                        if !message.tags.contains(tag) {
                            message.tags.push(tag.clone());
                        }
                    }
                }
                BatchAction::Remove => {
                    message.tags.retain(|t| !tags.contains(t));
                }
                BatchAction::Replace => {
                    message.tags = tags.to_vec();
                }
                BatchAction::List => unreachable!(),
            }
            let previous = message.status;
            message.sync_tagged_bit();
            tx.set_message_tags(self.user_id, id, &message.tags)?;
            if message.status != previous {
                tx.update_message_status(self.user_id, id, message.status)?;
            }
        }
        Ok(None)
    }

    /// Remove messages: blob unlink plus row delete per id. Policy is
    /// abort-on-first-error; removals already performed stay removed, each
    /// being independently durable.
    pub fn message_remove(
        &mut self,
        db: &dyn DataStore,
        blobs: &dyn BlobStore,
        folder_id: u64,
        ids: &[u64],
    ) -> Result<(), MailboxError> {
        if ids.is_empty() {
            return Err(MailboxError::IllegalCombination(String::from(
                "no messages given",
            )));
        }
        self.require_folder(folder_id)?;
        self.require_messages_in(folder_id, ids)?;

        for &id in ids {
            let server = match self.messages.get(&id) {
                Some(m) => m.server.clone(),
                None => return Err(MailboxError::NotFound(String::from("message"))),
            };
            blobs.delete(self.user_id, id, &server)?;
            let mut tx = db.begin()?;
            tx.delete_message(self.user_id, id)?;
            tx.commit()?;
            self.messages.remove(&id);
        }
        Ok(())
    }

    // ============================================================
    // Contacts
    // ============================================================

    fn require_contact_folder(&self, folder_id: u64) -> Result<&ContactFolder, MailboxError> {
        self.contacts
            .get(&folder_id)
            .ok_or_else(|| MailboxError::NotFound(String::from("contact folder")))
    }

    pub fn contact_add(
        &mut self,
        tx: &mut dyn Transaction,
        folder_id: u64,
        name: &str,
        details: BTreeMap<String, String>,
    ) -> Result<u64, MailboxError> {
        let cf = self.require_contact_folder(folder_id)?;
        if cf.by_name(name).is_some() {
            return Err(MailboxError::DuplicateName(name.to_string()));
        }
        let contact = Contact {
            contact_id: 0,
            folder_id,
            name: name.to_string(),
            details,
        };
        let contact_id = tx.insert_contact(self.user_id, &contact)?;
        let mut contact = contact;
        contact.contact_id = contact_id;
        if let Some(cf) = self.contacts.get_mut(&folder_id) {
            cf.records.insert(contact_id, contact);
        }
        Ok(contact_id)
    }

    pub fn contact_edit(
        &mut self,
        tx: &mut dyn Transaction,
        folder_id: u64,
        contact_id: u64,
        name: Option<&str>,
        details: Option<BTreeMap<String, String>>,
    ) -> Result<(), MailboxError> {
        let cf = self.require_contact_folder(folder_id)?;
        let current = cf
            .records
            .get(&contact_id)
            .ok_or_else(|| MailboxError::NotFound(String::from("contact")))?;

        if let Some(new_name) = name {
            if new_name != current.name && cf.by_name(new_name).is_some() {
                return Err(MailboxError::DuplicateName(new_name.to_string()));
            }
        }

        let mut updated = current.clone();
        if let Some(new_name) = name {
            updated.name = new_name.to_string();
        }
        if let Some(new_details) = details {
            updated.details = new_details;
        }
        tx.update_contact(self.user_id, &updated)?;
        if let Some(cf) = self.contacts.get_mut(&folder_id) {
            cf.records.insert(contact_id, updated);
        }
        Ok(())
    }

    pub fn contact_move(
        &mut self,
        tx: &mut dyn Transaction,
        contact_id: u64,
        source: u64,
        target: u64,
    ) -> Result<(), MailboxError> {
        if source == target {
            return Err(MailboxError::IllegalCombination(String::from(
                "source and target folders must differ",
            )));
        }
        self.require_contact_folder(target)?;
        let cf = self.require_contact_folder(source)?;
        let contact = cf
            .records
            .get(&contact_id)
            .ok_or_else(|| MailboxError::NotFound(String::from("contact")))?
            .clone();
        if self.contacts[&target].by_name(&contact.name).is_some() {
            return Err(MailboxError::DuplicateName(contact.name));
        }

        let mut moved = contact;
        moved.folder_id = target;
        tx.update_contact(self.user_id, &moved)?;
        if let Some(cf) = self.contacts.get_mut(&source) {
            cf.records.remove(&contact_id);
        }
        if let Some(cf) = self.contacts.get_mut(&target) {
            cf.records.insert(contact_id, moved);
        }
        Ok(())
    }

    /// Copy a contact. A same-folder copy takes the name
    /// `"Copy of " + name`; a cross-folder copy keeps the name but must
    /// not collide in the target.
    pub fn contact_copy(
        &mut self,
        tx: &mut dyn Transaction,
        contact_id: u64,
        source: u64,
        target: u64,
    ) -> Result<u64, MailboxError> {
        self.require_contact_folder(target)?;
        let cf = self.require_contact_folder(source)?;
        let original = cf
            .records
            .get(&contact_id)
            .ok_or_else(|| MailboxError::NotFound(String::from("contact")))?
            .clone();

        let name = if source == target {
            format!("Copy of {}", original.name)
        } else {
            original.name.clone()
        };
        if self.contacts[&target].by_name(&name).is_some() {
            return Err(MailboxError::DuplicateName(name));
        }

        let duplicate = Contact {
            contact_id: 0,
            folder_id: target,
            name,
            details: original.details,
        };
        let new_id = tx.insert_contact(self.user_id, &duplicate)?;
        let mut duplicate = duplicate;
        duplicate.contact_id = new_id;
        if let Some(cf) = self.contacts.get_mut(&target) {
            cf.records.insert(new_id, duplicate);
        }
        Ok(new_id)
    }

    pub fn contact_remove(
        &mut self,
        tx: &mut dyn Transaction,
        folder_id: u64,
        contact_id: u64,
    ) -> Result<(), MailboxError> {
        let cf = self.require_contact_folder(folder_id)?;
        if !cf.records.contains_key(&contact_id) {
            return Err(MailboxError::NotFound(String::from("contact")));
        }
        tx.delete_contact(self.user_id, contact_id)?;
        if let Some(cf) = self.contacts.get_mut(&folder_id) {
            cf.records.remove(&contact_id);
        }
        Ok(())
    }

    // ============================================================
    // Config
    // ============================================================

    /// Apply a batch of config edits; a None value deletes the key.
    /// Critical entries cannot be deleted.
    pub fn config_edit(
        &mut self,
        tx: &mut dyn Transaction,
        edits: &[(String, Option<String>)],
    ) -> Result<(), MailboxError> {
        for (key, value) in edits {
            match value {
                Some(v) => {
                    let flags = self.config.get(key).map_or(0, |e| e.flags);
                    let entry = ConfigEntry { value: v.clone(), flags };
                    tx.set_config(self.user_id, key, &entry)?;
                    self.config.insert(key.clone(), entry);
                }
                None => {
                    match self.config.get(key) {
                        Some(entry) if entry.is_critical() => {
                            return Err(MailboxError::IllegalCombination(format!(
                                "config key {} cannot be deleted",
                                key
                            )));
                        }
                        Some(_) => {
                            tx.delete_config(self.user_id, key)?;
                            self.config.remove(key);
                        }
                        None => {
                            return Err(MailboxError::NotFound(String::from("config key")));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::Utc;

    fn message(folder_id: u64, status_bits: u64) -> Message {
        Message {
            message_id: 0,
            folder_id,
            server: String::from("local"),
            status: status_bits,
            size: 10,
            signature_id: 0,
            signature_key: 0,
            created_utc: Utc::now(),
            visible: true,
            tags: Vec::new(),
        }
    }

    fn loaded(store: &MemoryStore, user: u64) -> Mailbox {
        Mailbox::load(store, user).unwrap()
    }

    #[test]
    fn folder_create_builds_missing_parents() {
        let store = MemoryStore::new();
        let user = store.seed_user("u", "t");
        let mut mailbox = loaded(&store, user);

        let mut tx = store.begin().unwrap();
        let id = mailbox
            .folder_create(&mut *tx, FolderContext::Mail, "a.b.c", &FolderLimits::default())
            .unwrap();
        tx.commit().unwrap();

        assert_eq!(mailbox.folder_full_name(FolderContext::Mail, id).unwrap(), "a.b.c");
        assert_eq!(mailbox.folders.len(), 4); // Inbox + a + a.b + a.b.c
        // Reload from the store and compare.
        let fresh = loaded(&store, user);
        assert_eq!(fresh.folders.len(), 4);
    }

    #[test]
    fn folder_create_rejects_top_level_inbox_but_allows_nested() {
        let store = MemoryStore::new();
        let user = store.seed_user("u", "t");
        let mut mailbox = loaded(&store, user);
        let limits = FolderLimits::default();

        let mut tx = store.begin().unwrap();
        assert!(matches!(
            mailbox.folder_create(&mut *tx, FolderContext::Mail, "INBOX", &limits),
            Err(MailboxError::Reserved)
        ));
        assert!(matches!(
            mailbox.folder_create(&mut *tx, FolderContext::Mail, "Inbox.child", &limits),
            Err(MailboxError::Reserved)
        ));
        let projects = mailbox
            .folder_create(&mut *tx, FolderContext::Mail, "Projects", &limits)
            .unwrap();
        // Inbox as a subfolder is allowed; only the top level is reserved.
        let nested = mailbox
            .folder_create(&mut *tx, FolderContext::Mail, "Projects.Inbox", &limits)
            .unwrap();
        tx.commit().unwrap();
        assert_ne!(projects, nested);
        assert_eq!(
            mailbox.folder_full_name(FolderContext::Mail, nested).unwrap(),
            "Projects.Inbox"
        );
    }

    #[test]
    fn folder_rename_roundtrip_restores_identity() {
        let store = MemoryStore::new();
        let user = store.seed_user("u", "t");
        let mut mailbox = loaded(&store, user);
        let limits = FolderLimits::default();

        let mut tx = store.begin().unwrap();
        let id = mailbox
            .folder_create(&mut *tx, FolderContext::Mail, "Projects", &limits)
            .unwrap();
        let child = mailbox
            .folder_create(&mut *tx, FolderContext::Mail, "Projects.alpha", &limits)
            .unwrap();
        mailbox
            .folder_rename(&mut *tx, FolderContext::Mail, id, "Work", &limits)
            .unwrap();
        assert_eq!(
            mailbox.folder_full_name(FolderContext::Mail, child).unwrap(),
            "Work.alpha"
        );
        mailbox
            .folder_rename(&mut *tx, FolderContext::Mail, id, "Projects", &limits)
            .unwrap();
        tx.commit().unwrap();

        let row = &mailbox.folders[&id];
        assert_eq!(row.name, "Projects");
        assert_eq!(row.parent_id, 0);
        assert_eq!(
            mailbox.folder_full_name(FolderContext::Mail, child).unwrap(),
            "Projects.alpha"
        );
    }

    #[test]
    fn folder_rename_refuses_descendant_parent() {
        let store = MemoryStore::new();
        let user = store.seed_user("u", "t");
        let mut mailbox = loaded(&store, user);
        let limits = FolderLimits::default();

        let mut tx = store.begin().unwrap();
        let top = mailbox
            .folder_create(&mut *tx, FolderContext::Mail, "a", &limits)
            .unwrap();
        mailbox
            .folder_create(&mut *tx, FolderContext::Mail, "a.b", &limits)
            .unwrap();
        assert!(matches!(
            mailbox.folder_rename(&mut *tx, FolderContext::Mail, top, "a.b.c", &limits),
            Err(MailboxError::SelfAncestor)
        ));
    }

    #[test]
    fn folder_remove_keeps_parents_with_children() {
        let store = MemoryStore::new();
        let blobs = crate::storage::MemoryBlobs::new();
        let user = store.seed_user("u", "t");
        let mut mailbox = loaded(&store, user);
        let limits = FolderLimits::default();

        let mut tx = store.begin().unwrap();
        let parent = mailbox
            .folder_create(&mut *tx, FolderContext::Mail, "keep", &limits)
            .unwrap();
        let child = mailbox
            .folder_create(&mut *tx, FolderContext::Mail, "keep.child", &limits)
            .unwrap();
        tx.commit().unwrap();

        let msg = store.seed_message(user, message(parent, 0));
        blobs
            .put(user, msg, "local", bytes::Bytes::from_static(b"raw"))
            .unwrap();
        mailbox.reload_messages(&store).unwrap();

        // Parent has a child folder: messages go, the folder stays.
        let mut tx = store.begin().unwrap();
        mailbox
            .folder_remove(&mut *tx, &blobs, FolderContext::Mail, parent)
            .unwrap();
        tx.commit().unwrap();
        assert!(mailbox.folders.contains_key(&parent));
        assert!(mailbox.messages.is_empty());

        // Childless folder goes entirely.
        let mut tx = store.begin().unwrap();
        mailbox
            .folder_remove(&mut *tx, &blobs, FolderContext::Mail, child)
            .unwrap();
        tx.commit().unwrap();
        assert!(!mailbox.folders.contains_key(&child));
    }

    #[test]
    fn folder_narrow_applies_pattern() {
        let store = MemoryStore::new();
        let user = store.seed_user("u", "t");
        let mut mailbox = loaded(&store, user);
        let limits = FolderLimits::default();

        let mut tx = store.begin().unwrap();
        mailbox
            .folder_create(&mut *tx, FolderContext::Mail, "Projects.alpha", &limits)
            .unwrap();
        mailbox
            .folder_create(&mut *tx, FolderContext::Mail, "Tasks", &limits)
            .unwrap();
        tx.commit().unwrap();

        let all = mailbox.folder_narrow(FolderContext::Mail, "", "*");
        assert_eq!(all.len(), mailbox.folders.len());

        let top: Vec<String> = mailbox
            .folder_narrow(FolderContext::Mail, "", "%")
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        assert!(top.contains(&String::from("Inbox")));
        assert!(top.contains(&String::from("Projects")));
        assert!(top.contains(&String::from("Tasks")));
        assert!(!top.contains(&String::from("Projects.alpha")));

        let narrowed = mailbox.folder_narrow(FolderContext::Mail, "Projects", "%");
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].1, "Projects.alpha");
    }

    #[test]
    fn folder_status_counts() {
        let store = MemoryStore::new();
        let user = store.seed_user("u", "t");
        let inbox = store.folders(user, FolderContext::Mail).unwrap()[0].folder_id;
        store.seed_message(user, message(inbox, status::RECENT));
        store.seed_message(user, message(inbox, status::SEEN));
        let last = store.seed_message(user, message(inbox, 0));
        let mailbox = loaded(&store, user);

        let st = mailbox.folder_status(inbox).unwrap();
        assert_eq!(st.messages, 3);
        assert_eq!(st.recent, 1);
        assert_eq!(st.unseen, 2);
        assert_eq!(st.first, 1);
        assert_eq!(st.uidnext, last + 1);
        assert!(mailbox.folder_status(inbox + 999).is_err());
    }

    #[test]
    fn flag_batch_semantics() {
        let store = MemoryStore::new();
        let user = store.seed_user("u", "t");
        let inbox = store.folders(user, FolderContext::Mail).unwrap()[0].folder_id;
        let a = store.seed_message(user, message(inbox, status::RECENT));
        let b = store.seed_message(user, message(inbox, 0));
        let mut mailbox = loaded(&store, user);

        let mut tx = store.begin().unwrap();
        mailbox
            .message_flag(&mut *tx, BatchAction::Add, inbox, &[a, b], status::SEEN | status::FLAGGED)
            .unwrap();
        assert_eq!(mailbox.messages[&a].status & status::SEEN, status::SEEN);
        assert_eq!(mailbox.messages[&a].status & status::RECENT, status::RECENT);

        mailbox
            .message_flag(&mut *tx, BatchAction::Remove, inbox, &[a], status::FLAGGED)
            .unwrap();
        assert_eq!(mailbox.messages[&a].status & status::FLAGGED, 0);

        mailbox
            .message_flag(&mut *tx, BatchAction::Replace, inbox, &[a], status::DRAFT)
            .unwrap();
        // System bits survive a replace; user bits are rewritten.
        assert_eq!(mailbox.messages[&a].status & status::RECENT, status::RECENT);
        assert_eq!(mailbox.messages[&a].status & status::USER_FLAGS, status::DRAFT);

        let listing = mailbox
            .message_flag(&mut *tx, BatchAction::List, inbox, &[a], 0)
            .unwrap()
            .unwrap();
        assert!(listing[&a].contains(&"draft"));

        assert!(matches!(
            mailbox.message_flag(&mut *tx, BatchAction::Add, inbox, &[a], status::RECENT),
            Err(MailboxError::SystemFlag)
        ));
        assert!(matches!(
            mailbox.message_flag(&mut *tx, BatchAction::Add, inbox, &[a], 0),
            Err(MailboxError::IllegalCombination(_))
        ));
        tx.commit().unwrap();
    }

    #[test]
    fn tag_batch_maintains_tagged_bit() {
        let store = MemoryStore::new();
        let user = store.seed_user("u", "t");
        let inbox = store.folders(user, FolderContext::Mail).unwrap()[0].folder_id;
        let m = store.seed_message(user, message(inbox, 0));
        let mut mailbox = loaded(&store, user);

        let mut tx = store.begin().unwrap();
        mailbox
            .message_tag(
                &mut *tx,
                BatchAction::Add,
                inbox,
                &[m],
                &[String::from("work"), String::from("urgent")],
            )
            .unwrap();
        assert_ne!(mailbox.messages[&m].status & status::TAGGED, 0);

        mailbox
            .message_tag(&mut *tx, BatchAction::Replace, inbox, &[m], &[])
            .unwrap();
        assert!(mailbox.messages[&m].tags.is_empty());
        assert_eq!(mailbox.messages[&m].status & status::TAGGED, 0);

        assert!(matches!(
            mailbox.message_tag(&mut *tx, BatchAction::Add, inbox, &[m], &[]),
            Err(MailboxError::IllegalCombination(_))
        ));
        tx.commit().unwrap();
    }

    #[test]
    fn copy_rolls_back_blobs_on_failure() {
        let store = MemoryStore::new();
        let blobs = crate::storage::MemoryBlobs::new();
        let user = store.seed_user("u", "t");
        let inbox = store.folders(user, FolderContext::Mail).unwrap()[0].folder_id;
        let dst = store.seed_folder(user, FolderContext::Mail, 0, 1, "archive");
        let good = store.seed_message(user, message(inbox, 0));
        let broken = store.seed_message(user, message(inbox, 0));
        blobs
            .put(user, good, "local", bytes::Bytes::from_static(b"ok"))
            .unwrap();
        // No blob for `broken`: the second copy fails.
        let mut mailbox = loaded(&store, user);

        let snapshot = mailbox.messages.clone();
        let mut tx = store.begin().unwrap();
        let result = mailbox.message_copy(&mut *tx, &blobs, inbox, dst, &[good, broken]);
        assert!(result.is_err());
        tx.rollback();
        mailbox.messages = snapshot;

        // The first blob copy was unwound and no rows committed.
        assert_eq!(store.messages(user).unwrap().len(), 2);
        assert_eq!(mailbox.messages.len(), 2);
    }

    #[test]
    fn contact_rules() {
        let store = MemoryStore::new();
        let user = store.seed_user("u", "t");
        let mut mailbox = loaded(&store, user);
        let limits = FolderLimits::default();

        let mut tx = store.begin().unwrap();
        let book = mailbox
            .folder_create(&mut *tx, FolderContext::Contacts, "People", &limits)
            .unwrap();
        let alice = mailbox
            .contact_add(&mut *tx, book, "Alice", BTreeMap::new())
            .unwrap();
        assert!(matches!(
            mailbox.contact_add(&mut *tx, book, "Alice", BTreeMap::new()),
            Err(MailboxError::DuplicateName(_))
        ));
        // Case-sensitive uniqueness.
        mailbox.contact_add(&mut *tx, book, "alice", BTreeMap::new()).unwrap();

        let copy = mailbox.contact_copy(&mut *tx, alice, book, book).unwrap();
        assert_eq!(
            mailbox.contacts[&book].records[&copy].name,
            "Copy of Alice"
        );
        tx.commit().unwrap();
    }
}
