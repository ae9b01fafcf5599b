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

//! Portal method handlers, grouped by surface.

pub(crate) mod auth;
pub(crate) mod compose;
pub(crate) mod contacts;
pub(crate) mod folders;
pub(crate) mod messages;
pub(crate) mod misc;

use crate::portal::error::PortalError;
use crate::storage::FolderContext;

/// The folder context keyword shared by the folders.* methods.
pub(crate) fn parse_context(keyword: &str) -> Result<FolderContext, PortalError> {
    match keyword {
        "mail" => Ok(FolderContext::Mail),
        "contacts" => Ok(FolderContext::Contacts),
        other => Err(PortalError::InvalidKeyword(other.to_string())),
    }
}

/// Serial class a folder-context mutation belongs to: contact folders
/// travel with the contacts class so one refresh restores both the tree
/// and its records.
pub(crate) fn context_class(context: FolderContext) -> crate::session::ObjectClass {
    match context {
        FolderContext::Mail => crate::session::ObjectClass::Folders,
        FolderContext::Contacts => crate::session::ObjectClass::Contacts,
    }
}
