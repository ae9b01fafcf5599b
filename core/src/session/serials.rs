/*
 * serials.rs
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

//! Serial numbers: monotone per-user per-object-class counters held in the
//! distributed cache. A session whose local serial lags the authoritative
//! value knows another process changed that class and must refetch before
//! returning data.

use std::collections::HashMap;

use crate::storage::{CacheStore, StorageError};

/// Object classes tracked by serial numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Messages,
    Folders,
    Contacts,
    Aliases,
    Config,
}

impl ObjectClass {
    pub const ALL: [ObjectClass; 5] = [
        ObjectClass::Messages,
        ObjectClass::Folders,
        ObjectClass::Contacts,
        ObjectClass::Aliases,
        ObjectClass::Config,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Messages => "messages",
            ObjectClass::Folders => "folders",
            ObjectClass::Contacts => "contacts",
            ObjectClass::Aliases => "aliases",
            ObjectClass::Config => "config",
        }
    }
}

fn cache_key(user_id: u64, class: ObjectClass) -> String {
    format!("serial:{}:{}", user_id, class.as_str())
}

/// Authoritative serial for one class; absent keys read as zero.
pub fn serial_get(
    cache: &dyn CacheStore,
    user_id: u64,
    class: ObjectClass,
) -> Result<u64, StorageError> {
    Ok(cache.get(&cache_key(user_id, class))?.unwrap_or(0))
}

/// Advance the authoritative serial; returns the new value.
pub fn serial_increment(
    cache: &dyn CacheStore,
    user_id: u64,
    class: ObjectClass,
) -> Result<u64, StorageError> {
    cache.increment(&cache_key(user_id, class), None)
}

/// A local serial snapshot held by a user instance or session.
#[derive(Debug, Clone, Default)]
pub struct Serials {
    values: HashMap<ObjectClass, u64>,
}

impl Serials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every class from the authoritative store.
    pub fn from_cache(cache: &dyn CacheStore, user_id: u64) -> Result<Self, StorageError> {
        let mut serials = Self::new();
        for class in ObjectClass::ALL {
            serials.set(class, serial_get(cache, user_id, class)?);
        }
        Ok(serials)
    }

    pub fn get(&self, class: ObjectClass) -> u64 {
        self.values.get(&class).copied().unwrap_or(0)
    }

    pub fn set(&mut self, class: ObjectClass, value: u64) {
        self.values.insert(class, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCache;

    #[test]
    fn serials_are_monotone_per_class() {
        let cache = MemoryCache::new();
        assert_eq!(serial_get(&cache, 7, ObjectClass::Messages).unwrap(), 0);
        assert_eq!(serial_increment(&cache, 7, ObjectClass::Messages).unwrap(), 1);
        assert_eq!(serial_increment(&cache, 7, ObjectClass::Messages).unwrap(), 2);
        // Other classes and users are independent.
        assert_eq!(serial_get(&cache, 7, ObjectClass::Folders).unwrap(), 0);
        assert_eq!(serial_get(&cache, 8, ObjectClass::Messages).unwrap(), 0);
    }

    #[test]
    fn snapshot_tracks_cache() {
        let cache = MemoryCache::new();
        serial_increment(&cache, 1, ObjectClass::Config).unwrap();
        let snapshot = Serials::from_cache(&cache, 1).unwrap();
        assert_eq!(snapshot.get(ObjectClass::Config), 1);
        assert_eq!(snapshot.get(ObjectClass::Messages), 0);
    }
}
