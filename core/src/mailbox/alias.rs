/*
 * alias.rs
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

//! Mail aliases. Read-only through the portal; at most one alias carries
//! the selected mark.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct Alias {
    pub alias_id: u64,
    pub address: String,
    pub display: String,
    pub selected: bool,
    pub created_utc: DateTime<Utc>,
}
