/*
 * lib.rs
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

//! Fermoposta core: ECIES storage encryption, concurrency-safe per-user
//! mailbox state, and the JSON-RPC portal control plane.
//!
//! Protocol front ends (SMTP/IMAP/POP/HTTP) live outside this crate; they
//! authenticate connections, join a user state through [`session`], and feed
//! portal requests through [`portal::Portal::handle`]. Persistence, blob
//! storage, the distributed cache, and outbound relay are collaborator
//! traits in [`storage`].

pub mod auth;
pub mod config;
pub mod crypto;
pub mod mailbox;
pub mod portal;
pub mod session;
pub mod storage;

pub use config::CoreConfig;
pub use portal::Portal;
