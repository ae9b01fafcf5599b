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

//! ECIES storage encryption: the cryptex container, the P-521 key codec,
//! and the hybrid encrypt/decrypt codec.

mod cryptex;
mod ecies;
mod keys;
mod secure;

pub use cryptex::Cryptex;
pub use ecies::{decrypt, decrypt_with, encrypt, encrypt_with, CryptoPolicy};
pub use keys::{
    export_private_bytes, export_private_hex, export_public_hex, export_public_octets, generate,
    import_private_bytes, import_private_hex, import_public_hex, import_public_octets, Keypair,
};
pub use secure::{bytes_to_hex, hex_to_bytes, SecureBuffer};

use std::fmt;

/// Errors from the crypto subsystem.
#[derive(Debug)]
pub enum CryptoError {
    /// Container header malformed or region lengths inconsistent with the buffer.
    InvalidContainer(String),
    /// Key data could not be decoded (bad hex, bad length, bad SEC1 prefix).
    InvalidKeyFormat(String),
    /// Decoded key failed curve validation (point off curve, scalar out of range).
    InvalidKey(String),
    /// HMAC verification failed; the ciphertext was modified or the key is wrong.
    AuthenticationFailed,
    /// Input rejected before any cryptographic work (e.g. empty plaintext).
    InvalidInput(String),
    /// Cipher or digest machinery failed; fatal for the operation.
    Internal(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidContainer(m) => write!(f, "invalid container: {}", m),
            CryptoError::InvalidKeyFormat(m) => write!(f, "invalid key format: {}", m),
            CryptoError::InvalidKey(m) => write!(f, "invalid key: {}", m),
            CryptoError::AuthenticationFailed => write!(f, "authentication code mismatch"),
            CryptoError::InvalidInput(m) => write!(f, "invalid input: {}", m),
            CryptoError::Internal(m) => write!(f, "crypto failure: {}", m),
        }
    }
}

impl std::error::Error for CryptoError {}
