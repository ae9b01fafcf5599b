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

//! Sessions and the process-wide user cache: reference-counted user
//! instances keyed by `(user id, protocol)`, serial numbers for
//! cross-process change detection, and the per-connection session records
//! protocol front ends hold.

mod registry;
mod serials;
mod user;

pub use registry::{
    AcquireError, Protocol, Session, SessionPhase, SessionRegistry, UserRegistry,
};
pub use serials::{serial_get, serial_increment, ObjectClass, Serials};
pub use user::UserState;
