/*
 * error.rs
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

//! The portal error taxonomy and its mapping onto JSON-RPC codes. Deep
//! code returns typed errors; only this module knows wire numbers.
//! Envelope-level violations use the reserved JSON-RPC codes; application
//! errors compose the method ordinal into the high bits so a client can
//! tell method from symptom.

use std::fmt;

use crate::crypto::CryptoError;
use crate::mailbox::MailboxError;
use crate::session::AcquireError;
use crate::storage::{AccountLock, StorageError};

#[derive(Debug)]
pub enum PortalError {
    /// Body was not valid JSON.
    ParseFailure(String),
    /// Envelope malformed: wrong version, missing method or id.
    InvalidRequest(String),
    MethodNotFound,
    /// Schema violation: unexpected keys, wrong types, wrong arity.
    InvalidParams(String),
    /// A referenced object is absent or not owned by the session's user.
    InvalidReference(String),
    /// Unknown enum value in an otherwise well-shaped parameter.
    InvalidKeyword(String),
    /// Source equals target, empty batch, and similar contradictions.
    IllegalCombination(String),
    SystemFlagForbidden,
    /// Name too long, exists, reserved, depth exceeded, self-ancestor.
    ConstraintViolation(String),
    AuthFailed,
    AuthThrottled,
    AccountLocked(AccountLock),
    /// Authenticated method called without a session.
    PermissionDenied,
    Crypto(CryptoError),
    Internal(String),
}

/// Symptom codes carried in the low bits of application error codes.
const SYMPTOM_REFERENCE: i64 = 1;
const SYMPTOM_KEYWORD: i64 = 2;
const SYMPTOM_COMBINATION: i64 = 3;
const SYMPTOM_SYSTEM_FLAG: i64 = 4;
const SYMPTOM_CONSTRAINT: i64 = 5;
const SYMPTOM_AUTH: i64 = 6;
const SYMPTOM_THROTTLED: i64 = 7;
const SYMPTOM_LOCKED: i64 = 8;
const SYMPTOM_PERMISSION: i64 = 9;
const SYMPTOM_CRYPTO: i64 = 10;
const SYMPTOM_INTERNAL: i64 = 11;

impl PortalError {
    /// Wire code. `ordinal` is the method's position in the dispatch
    /// table; envelope violations ignore it and use the reserved range.
    pub fn wire_code(&self, ordinal: usize) -> i64 {
        let method_bits = ((ordinal as i64) + 1) << 16;
        match self {
            PortalError::ParseFailure(_) => -32700,
            PortalError::InvalidRequest(_) => -32600,
            PortalError::MethodNotFound => -32601,
            PortalError::InvalidParams(_) => -32602,
            PortalError::Internal(_) => -32603,
            PortalError::InvalidReference(_) => method_bits | SYMPTOM_REFERENCE,
            PortalError::InvalidKeyword(_) => method_bits | SYMPTOM_KEYWORD,
            PortalError::IllegalCombination(_) => method_bits | SYMPTOM_COMBINATION,
            PortalError::SystemFlagForbidden => method_bits | SYMPTOM_SYSTEM_FLAG,
            PortalError::ConstraintViolation(_) => method_bits | SYMPTOM_CONSTRAINT,
            PortalError::AuthFailed => method_bits | SYMPTOM_AUTH,
            PortalError::AuthThrottled => method_bits | SYMPTOM_THROTTLED,
            PortalError::AccountLocked(_) => method_bits | SYMPTOM_LOCKED,
            PortalError::PermissionDenied => method_bits | SYMPTOM_PERMISSION,
            PortalError::Crypto(_) => method_bits | SYMPTOM_CRYPTO,
        }
    }

    /// Whether this failure counts against the connection's violation
    /// budget.
    pub fn counts_violation(&self) -> bool {
        matches!(
            self,
            PortalError::ParseFailure(_)
                | PortalError::InvalidRequest(_)
                | PortalError::MethodNotFound
                | PortalError::InvalidParams(_)
                | PortalError::InvalidKeyword(_)
                | PortalError::PermissionDenied
        )
    }
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortalError::ParseFailure(m) => write!(f, "parse error: {}", m),
            PortalError::InvalidRequest(m) => write!(f, "invalid request: {}", m),
            PortalError::MethodNotFound => write!(f, "method not found"),
            PortalError::InvalidParams(m) => write!(f, "invalid parameters: {}", m),
            PortalError::InvalidReference(m) => write!(f, "invalid reference: {}", m),
            PortalError::InvalidKeyword(m) => write!(f, "invalid keyword: {}", m),
            PortalError::IllegalCombination(m) => write!(f, "{}", m),
            PortalError::SystemFlagForbidden => write!(f, "system flags cannot be changed"),
            PortalError::ConstraintViolation(m) => write!(f, "{}", m),
            PortalError::AuthFailed => write!(f, "authentication failed"),
            PortalError::AuthThrottled => write!(f, "too many failed logins; try again later"),
            PortalError::AccountLocked(lock) => write!(f, "account locked ({})", lock.as_str()),
            PortalError::PermissionDenied => write!(f, "session is not authenticated"),
            PortalError::Crypto(e) => write!(f, "cryptographic failure: {}", e),
            PortalError::Internal(m) => write!(f, "internal error: {}", m),
        }
    }
}

impl std::error::Error for PortalError {}

impl From<MailboxError> for PortalError {
    fn from(e: MailboxError) -> Self {
        match e {
            MailboxError::InvalidName(m) => PortalError::ConstraintViolation(m),
            MailboxError::Reserved => {
                PortalError::ConstraintViolation(String::from("the Inbox folder is reserved"))
            }
            MailboxError::Exists => {
                PortalError::ConstraintViolation(String::from("folder already exists"))
            }
            MailboxError::DepthExceeded => {
                PortalError::ConstraintViolation(String::from("folder depth limit exceeded"))
            }
            MailboxError::SegmentTooLong => {
                PortalError::ConstraintViolation(String::from("folder name segment too long"))
            }
            MailboxError::NotFound(m) => PortalError::InvalidReference(m),
            MailboxError::SelfAncestor => PortalError::ConstraintViolation(String::from(
                "a folder cannot become its own ancestor",
            )),
            MailboxError::IllegalCombination(m) => PortalError::IllegalCombination(m),
            MailboxError::SystemFlag => PortalError::SystemFlagForbidden,
            MailboxError::UnknownKeyword(m) => PortalError::InvalidKeyword(m),
            MailboxError::DuplicateName(m) => {
                PortalError::ConstraintViolation(format!("name already in use: {}", m))
            }
            MailboxError::AlreadyUploaded => {
                PortalError::IllegalCombination(String::from("attachment data already uploaded"))
            }
            MailboxError::Storage(e) => e.into(),
        }
    }
}

impl From<StorageError> for PortalError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => {
                PortalError::InvalidReference(String::from("stored object"))
            }
            StorageError::Backend(m) => PortalError::Internal(m),
        }
    }
}

impl From<CryptoError> for PortalError {
    fn from(e: CryptoError) -> Self {
        PortalError::Crypto(e)
    }
}

impl From<AcquireError> for PortalError {
    fn from(e: AcquireError) -> Self {
        match e {
            AcquireError::RetryLater => {
                PortalError::Internal(String::from("user instance busy; retry"))
            }
            AcquireError::Storage(e) => e.into(),
        }
    }
}
