/*
 * contact.rs
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

//! Contacts: free-form detail records grouped into contact folders.
//! Contact names are unique (case-sensitive) within their folder.

use std::collections::BTreeMap;

use super::folder::Folder;

#[derive(Debug, Clone)]
pub struct Contact {
    pub contact_id: u64,
    pub folder_id: u64,
    pub name: String,
    pub details: BTreeMap<String, String>,
}

/// A contact folder and its records.
#[derive(Debug, Clone)]
pub struct ContactFolder {
    pub folder: Folder,
    pub records: BTreeMap<u64, Contact>,
}

impl ContactFolder {
    pub fn new(folder: Folder) -> Self {
        Self { folder, records: BTreeMap::new() }
    }

    /// Case-sensitive name lookup within this folder.
    pub fn by_name(&self, name: &str) -> Option<&Contact> {
        self.records.values().find(|c| c.name == name)
    }
}
