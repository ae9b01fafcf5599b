/*
 * user.rs
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

//! The shared per-user instance: the mailbox aggregate behind a
//! reader-writer lock, the user row, and the serial protocol that keeps
//! instances in other processes honest. Mutating operations take the
//! writer lock with their inputs already collected; nothing suspends on
//! I/O while the lock is held.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::mailbox::{ContactFolder, Mailbox};
use crate::storage::{CacheStore, DataStore, FolderContext, StorageError, UserRecord};

use super::serials::{serial_get, serial_increment, ObjectClass, Serials};

pub struct UserState {
    pub user_id: u64,
    pub username: String,
    record: Mutex<UserRecord>,
    mailbox: RwLock<Mailbox>,
    serials: Mutex<Serials>,
    /// Set when another process advanced a serial under us; the next read
    /// refreshes even if the counters have since converged.
    refresh_queued: AtomicBool,
}

impl UserState {
    /// Load the aggregate and snapshot the authoritative serials.
    pub fn load(
        db: &dyn DataStore,
        cache: &dyn CacheStore,
        record: UserRecord,
    ) -> Result<Self, StorageError> {
        let mailbox = Mailbox::load(db, record.user_id)?;
        let serials = Serials::from_cache(cache, record.user_id)?;
        Ok(Self {
            user_id: record.user_id,
            username: record.username.clone(),
            record: Mutex::new(record),
            mailbox: RwLock::new(mailbox),
            serials: Mutex::new(serials),
            refresh_queued: AtomicBool::new(false),
        })
    }

    pub fn record(&self) -> MutexGuard<'_, UserRecord> {
        self.record.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Mailbox> {
        self.mailbox.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Mailbox> {
        self.mailbox.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn serial(&self, class: ObjectClass) -> u64 {
        self.serials
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(class)
    }

    /// Advance the serial for a mutated class. When the local snapshot
    /// matches the authoritative value the increment is adopted locally
    /// too; when it lags, another process changed the class first, so the
    /// increment lands externally and a refresh is queued here.
    pub fn bump_serial(
        &self,
        cache: &dyn CacheStore,
        class: ObjectClass,
    ) -> Result<u64, StorageError> {
        let mut serials = self.serials.lock().unwrap_or_else(|p| p.into_inner());
        let local = serials.get(class);
        let external = serial_get(cache, self.user_id, class)?;
        let updated = serial_increment(cache, self.user_id, class)?;
        if local == external {
            serials.set(class, updated);
        } else {
            debug!(
                user = self.user_id,
                class = class.as_str(),
                local,
                external,
                "serial advanced elsewhere; queueing refresh"
            );
            self.refresh_queued.store(true, Ordering::SeqCst);
        }
        Ok(updated)
    }

    /// Refetch one class from the SQL tier when the local serial lags the
    /// authoritative one (or a refresh was queued). The rows are fetched
    /// before the writer lock is taken; nothing suspends while it is
    /// held. Returns true when a reload happened.
    pub fn refresh_if_stale(
        &self,
        db: &dyn DataStore,
        cache: &dyn CacheStore,
        class: ObjectClass,
    ) -> Result<bool, StorageError> {
        let external = serial_get(cache, self.user_id, class)?;
        let local = self.serial(class);
        let queued = self.refresh_queued.swap(false, Ordering::SeqCst);
        if local >= external && !queued {
            return Ok(false);
        }

        match class {
            ObjectClass::Messages => {
                let rows: BTreeMap<_, _> = db
                    .messages(self.user_id)?
                    .into_iter()
                    .map(|m| (m.message_id, m))
                    .collect();
                self.write().messages = rows;
            }
            ObjectClass::Folders => {
                let rows: BTreeMap<_, _> = db
                    .folders(self.user_id, FolderContext::Mail)?
                    .into_iter()
                    .map(|f| (f.folder_id, f))
                    .collect();
                self.write().folders = rows;
            }
            ObjectClass::Contacts => {
                let mut rows: BTreeMap<u64, ContactFolder> = db
                    .folders(self.user_id, FolderContext::Contacts)?
                    .into_iter()
                    .map(|f| (f.folder_id, ContactFolder::new(f)))
                    .collect();
                for contact in db.contacts(self.user_id)? {
                    if let Some(cf) = rows.get_mut(&contact.folder_id) {
                        cf.records.insert(contact.contact_id, contact);
                    }
                }
                self.write().contacts = rows;
            }
            ObjectClass::Aliases => {
                let rows: BTreeMap<_, _> = db
                    .aliases(self.user_id)?
                    .into_iter()
                    .map(|a| (a.alias_id, a))
                    .collect();
                self.write().aliases = rows;
            }
            ObjectClass::Config => {
                let rows: BTreeMap<_, _> = db.config(self.user_id)?.into_iter().collect();
                self.write().config = rows;
            }
        }
        self.serials
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .set(class, external);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryCache, MemoryStore};

    fn state(store: &MemoryStore, cache: &MemoryCache, user: u64) -> UserState {
        let record = store.user_by_id(user).unwrap().unwrap();
        UserState::load(store, cache, record).unwrap()
    }

    #[test]
    fn bump_adopts_when_in_sync() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let user = store.seed_user("u", "t");
        let st = state(&store, &cache, user);

        assert_eq!(st.serial(ObjectClass::Folders), 0);
        st.bump_serial(&cache, ObjectClass::Folders).unwrap();
        assert_eq!(st.serial(ObjectClass::Folders), 1);
        assert_eq!(serial_get(&cache, user, ObjectClass::Folders).unwrap(), 1);
    }

    #[test]
    fn bump_queues_refresh_when_lagging() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let user = store.seed_user("u", "t");
        let st = state(&store, &cache, user);

        // Another process advances the class.
        serial_increment(&cache, user, ObjectClass::Folders).unwrap();
        st.bump_serial(&cache, ObjectClass::Folders).unwrap();
        // Local snapshot did not adopt: the instance is marked stale.
        assert_eq!(st.serial(ObjectClass::Folders), 0);
        assert!(st
            .refresh_if_stale(&store, &cache, ObjectClass::Folders)
            .unwrap());
        assert_eq!(st.serial(ObjectClass::Folders), 2);
        assert!(!st
            .refresh_if_stale(&store, &cache, ObjectClass::Folders)
            .unwrap());
    }

    #[test]
    fn stale_reader_refetches() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let user = store.seed_user("u", "t");
        let st = state(&store, &cache, user);

        // A second process inserts a folder and bumps the serial.
        store.seed_folder(user, crate::storage::FolderContext::Mail, 0, 1, "outside");
        serial_increment(&cache, user, ObjectClass::Folders).unwrap();

        assert_eq!(st.read().folders.len(), 1);
        assert!(st
            .refresh_if_stale(&store, &cache, ObjectClass::Folders)
            .unwrap());
        assert_eq!(st.read().folders.len(), 2);
    }
}
