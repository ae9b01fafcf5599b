/*
 * config.rs
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

//! Core runtime configuration, built at startup and threaded through the
//! portal and session tiers. There is no global state; every knob lives
//! here.

use crate::crypto::CryptoPolicy;
use crate::mailbox::FolderLimits;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub folders: FolderLimits,
    /// Failed auth attempts from one /24 within the window before the
    /// subnet is refused outright.
    pub auth_failure_limit: u64,
    pub auth_failure_window: Duration,
    /// Malformed or rejected requests tolerated before the front end is
    /// told to drop the connection.
    pub violation_limit: u32,
    pub db_timeout: Duration,
    pub cache_timeout: Duration,
    pub crypto: CryptoPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            folders: FolderLimits::default(),
            auth_failure_limit: 16,
            auth_failure_window: Duration::from_secs(24 * 60 * 60),
            violation_limit: 8,
            db_timeout: Duration::from_secs(30),
            cache_timeout: Duration::from_secs(5),
            crypto: CryptoPolicy::default(),
        }
    }
}
