/*
 * alert.rs
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

//! User alerts: notices surfaced at login until acknowledged.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct Alert {
    pub alert_id: u64,
    /// Free-form kind, e.g. "warning", "notice", "billing".
    pub kind: String,
    pub message: String,
    pub created_utc: DateTime<Utc>,
    pub acknowledged_utc: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(alert_id: u64, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            alert_id,
            kind: kind.into(),
            message: message.into(),
            created_utc: Utc::now(),
            acknowledged_utc: None,
        }
    }

    pub fn acknowledged(&self) -> bool {
        self.acknowledged_utc.is_some()
    }
}
