/*
 * registry.rs
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

//! The session table and the reference-counted user instance registry.
//! Instances are keyed by `(user id, protocol)`: an IMAP session and a web
//! session for the same account hold independent instances and synchronize
//! only through serial numbers and the SQL tier. The last-drop/new-acquire
//! race is closed by an Active/Evicting phase flipped under the registry
//! lock; acquires against an evicting instance fail with `RetryLater`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::crypto::{bytes_to_hex, SecureBuffer};
use crate::mailbox::Composition;
use crate::storage::StorageError;

use super::user::UserState;

/// Protocols that hold user instances. Instances never cross protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Web,
    Imap,
    Pop,
    Smtp,
    Dmtp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Web => "web",
            Protocol::Imap => "imap",
            Protocol::Pop => "pop",
            Protocol::Smtp => "smtp",
            Protocol::Dmtp => "dmtp",
        }
    }
}

/// Errors from instance acquisition.
#[derive(Debug)]
pub enum AcquireError {
    /// The instance is mid-eviction; try again shortly.
    RetryLater,
    Storage(StorageError),
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireError::RetryLater => write!(f, "user instance is being evicted; retry"),
            AcquireError::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AcquireError {}

impl From<StorageError> for AcquireError {
    fn from(e: StorageError) -> Self {
        AcquireError::Storage(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Evicting,
}

struct Instance {
    user: Arc<UserState>,
    refs: u32,
    phase: Phase,
}

/// Process-wide user instance table.
#[derive(Default)]
pub struct UserRegistry {
    inner: Mutex<HashMap<(u64, Protocol), Instance>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(u64, Protocol), Instance>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Join or create the instance for `(user_id, protocol)`. The loader
    /// runs outside the registry lock (it does database work); when two
    /// sessions race, one load is discarded and both share the winner.
    pub fn acquire<F>(
        &self,
        user_id: u64,
        protocol: Protocol,
        load: F,
    ) -> Result<Arc<UserState>, AcquireError>
    where
        F: FnOnce() -> Result<Arc<UserState>, StorageError>,
    {
        let key = (user_id, protocol);
        {
            let mut map = self.lock();
            if let Some(instance) = map.get_mut(&key) {
                if instance.phase == Phase::Evicting {
                    return Err(AcquireError::RetryLater);
                }
                instance.refs += 1;
                return Ok(Arc::clone(&instance.user));
            }
        }

        let loaded = load()?;

        let mut map = self.lock();
        match map.get_mut(&key) {
            Some(instance) => {
                if instance.phase == Phase::Evicting {
                    return Err(AcquireError::RetryLater);
                }
                instance.refs += 1;
                Ok(Arc::clone(&instance.user))
            }
            None => {
                map.insert(key, Instance { user: Arc::clone(&loaded), refs: 1, phase: Phase::Active });
                debug!(user = user_id, protocol = protocol.as_str(), "user instance created");
                Ok(loaded)
            }
        }
    }

    /// Drop one reference. At zero the instance flips to Evicting under
    /// the lock, tears down outside it, and is then removed; a concurrent
    /// acquire in that window sees `RetryLater`.
    pub fn release(&self, user_id: u64, protocol: Protocol) {
        let key = (user_id, protocol);
        {
            let mut map = self.lock();
            let Some(instance) = map.get_mut(&key) else {
                return;
            };
            instance.refs = instance.refs.saturating_sub(1);
            if instance.refs > 0 {
                return;
            }
            instance.phase = Phase::Evicting;
        }

        // Teardown happens outside the registry lock. The aggregate has no
        // dirty state to flush; writes are already durable.
        debug!(user = user_id, protocol = protocol.as_str(), "user instance evicted");

        let mut map = self.lock();
        if let Some(instance) = map.get(&key) {
            if instance.phase == Phase::Evicting && instance.refs == 0 {
                map.remove(&key);
            }
        }
    }

    /// Request eviction regardless of refcount: new acquires are refused
    /// and the instance is removed when the last reference drains.
    pub fn evict(&self, user_id: u64, protocol: Protocol) {
        let mut map = self.lock();
        let Some(instance) = map.get_mut(&(user_id, protocol)) else {
            return;
        };
        instance.phase = Phase::Evicting;
        if instance.refs == 0 {
            map.remove(&(user_id, protocol));
        }
    }

    /// Instance counts per protocol, for the debug surface.
    pub fn stats(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for (_, protocol) in self.lock().keys() {
            *counts.entry(protocol.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

// ============================================================
// Sessions
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Neutral,
    Authenticated,
    Terminated,
}

/// One protocol connection's session record.
pub struct Session {
    pub token: String,
    pub client: Option<IpAddr>,
    phase: Mutex<SessionPhase>,
    user: Mutex<Option<(Arc<UserState>, Protocol)>>,
    compositions: Mutex<BTreeMap<u64, Composition>>,
    composed: AtomicU64,
    violations: AtomicU32,
    /// Master private scalar derived at login; unlocks the storage
    /// keypair while the session lives. Wiped with the buffer on drop.
    master: Mutex<Option<SecureBuffer>>,
}

impl Session {
    fn new(token: String, client: Option<IpAddr>) -> Self {
        Self {
            token,
            client,
            phase: Mutex::new(SessionPhase::Neutral),
            user: Mutex::new(None),
            compositions: Mutex::new(BTreeMap::new()),
            composed: AtomicU64::new(0),
            violations: AtomicU32::new(0),
            master: Mutex::new(None),
        }
    }

    pub fn set_master_secret(&self, secret: SecureBuffer) {
        *self.master.lock().unwrap_or_else(|p| p.into_inner()) = Some(secret);
    }

    pub fn master_secret(&self) -> Option<SecureBuffer> {
        self.master
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase() == SessionPhase::Authenticated
    }

    /// Bind an acquired user instance and mark the session authenticated.
    pub fn authenticate(&self, user: Arc<UserState>, protocol: Protocol) {
        *self.user.lock().unwrap_or_else(|p| p.into_inner()) = Some((user, protocol));
        *self.phase.lock().unwrap_or_else(|p| p.into_inner()) = SessionPhase::Authenticated;
    }

    /// Terminate: drop compositions and the master secret, release the
    /// user binding, and return it so the caller can decrement the
    /// registry.
    pub fn terminate(&self) -> Option<(Arc<UserState>, Protocol)> {
        self.compositions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        *self.master.lock().unwrap_or_else(|p| p.into_inner()) = None;
        *self.phase.lock().unwrap_or_else(|p| p.into_inner()) = SessionPhase::Terminated;
        self.user.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    pub fn user(&self) -> Option<Arc<UserState>> {
        self.user
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|(u, _)| Arc::clone(u))
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.user
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|(_, p)| *p)
    }

    pub fn violations(&self) -> u32 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Count a malformed or rejected request; returns the running total.
    pub fn record_violation(&self) -> u32 {
        self.violations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Allocate a composition. The counter is tested against live
    /// compositions so a wrapped or stale value never collides.
    pub fn compose_create(&self) -> u64 {
        let mut compositions = self.compositions.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            let id = self.composed.fetch_add(1, Ordering::Relaxed) + 1;
            if !compositions.contains_key(&id) {
                compositions.insert(id, Composition::new(id));
                return id;
            }
        }
    }

    pub fn compositions(&self) -> MutexGuard<'_, BTreeMap<u64, Composition>> {
        self.compositions.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn compose_remove(&self, compose_id: u64) -> Option<Composition> {
        self.compositions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&compose_id)
    }
}

/// Process-wide session table keyed by token.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session with a fresh random token.
    pub fn open(&self, client: Option<IpAddr>) -> Arc<Session> {
        let mut noise = [0u8; 16];
        // The token only needs uniqueness within the table; on RNG failure
        // fall back to the counter the map length provides.
        let token = if getrandom::getrandom(&mut noise).is_ok() {
            bytes_to_hex(&noise)
        } else {
            format!("session-{}", self.count() + 1)
        };
        let session = Arc::new(Session::new(token.clone(), client));
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(token, Arc::clone(&session));
        session
    }

    pub fn get(&self, token: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(token)
            .cloned()
    }

    pub fn close(&self, token: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(token)
    }

    pub fn count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DataStore, MemoryCache, MemoryStore};

    fn load_state(store: &MemoryStore, cache: &MemoryCache, user: u64) -> Arc<UserState> {
        let record = store.user_by_id(user).unwrap().unwrap();
        Arc::new(UserState::load(store, cache, record).unwrap())
    }

    #[test]
    fn same_protocol_shares_instance() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let user = store.seed_user("u", "t");
        let registry = UserRegistry::new();

        let a = registry
            .acquire(user, Protocol::Web, || Ok(load_state(&store, &cache, user)))
            .unwrap();
        let b = registry
            .acquire(user, Protocol::Web, || panic!("must reuse the live instance"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        registry.release(user, Protocol::Web);
        // Still referenced by `a`.
        let c = registry
            .acquire(user, Protocol::Web, || panic!("still live"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn cross_protocol_instances_are_independent() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let user = store.seed_user("u", "t");
        let registry = UserRegistry::new();

        let web = registry
            .acquire(user, Protocol::Web, || Ok(load_state(&store, &cache, user)))
            .unwrap();
        let imap = registry
            .acquire(user, Protocol::Imap, || Ok(load_state(&store, &cache, user)))
            .unwrap();
        assert!(!Arc::ptr_eq(&web, &imap));
        assert_eq!(registry.stats().len(), 2);
    }

    #[test]
    fn last_release_evicts() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let user = store.seed_user("u", "t");
        let registry = UserRegistry::new();

        let a = registry
            .acquire(user, Protocol::Web, || Ok(load_state(&store, &cache, user)))
            .unwrap();
        registry.release(user, Protocol::Web);
        drop(a);
        assert!(registry.stats().is_empty());

        // A new acquire after eviction loads a fresh instance.
        let b = registry
            .acquire(user, Protocol::Web, || Ok(load_state(&store, &cache, user)))
            .unwrap();
        assert_eq!(b.user_id, user);
    }

    #[test]
    fn evicting_instance_refuses_acquires() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let user = store.seed_user("u", "t");
        let registry = UserRegistry::new();

        registry
            .acquire(user, Protocol::Web, || Ok(load_state(&store, &cache, user)))
            .unwrap();
        registry.evict(user, Protocol::Web);
        assert!(matches!(
            registry.acquire(user, Protocol::Web, || panic!("must not load")),
            Err(AcquireError::RetryLater)
        ));
        registry.release(user, Protocol::Web);
        assert!(registry.stats().is_empty());
    }

    #[test]
    fn session_lifecycle() {
        let sessions = SessionRegistry::new();
        let session = sessions.open(None);
        assert_eq!(session.phase(), SessionPhase::Neutral);
        assert!(sessions.get(&session.token).is_some());

        let a = session.compose_create();
        let b = session.compose_create();
        assert_ne!(a, b);

        assert_eq!(session.record_violation(), 1);
        assert_eq!(session.record_violation(), 2);

        session.terminate();
        assert_eq!(session.phase(), SessionPhase::Terminated);
        assert!(session.compositions().is_empty());
        sessions.close(&session.token);
        assert!(sessions.get(&session.token).is_none());
    }
}
