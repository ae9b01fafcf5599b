/*
 * auth.rs
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

//! Credential derivation: the stored verification token and the master key
//! that seals the storage keypair. Both come from PBKDF2-HMAC-SHA-512 over
//! the password with username-scoped salt domains, so neither can be
//! recomputed without the password and tokens never collide across
//! accounts sharing a password.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;

use crate::crypto::{bytes_to_hex, import_private_bytes, CryptoError, Keypair, SecureBuffer};

/// PBKDF2 iteration count for both derivations.
pub const PBKDF_ROUNDS: u32 = 4096;

/// Verification token length in bytes (hex doubles it on the wire).
pub const TOKEN_LEN: usize = 64;

/// Scalar width of the master keypair derivation.
const MASTER_LEN: usize = 66;

/// Derive the stored verification token for a credential pair.
pub fn verification_token(username: &str, password: &str) -> String {
    let salt = format!("verify:{}", username);
    let mut out = [0u8; TOKEN_LEN];
    pbkdf2_hmac::<Sha512>(password.as_bytes(), salt.as_bytes(), PBKDF_ROUNDS, &mut out);
    bytes_to_hex(&out)
}

/// Constant-length compare of a presented password against a stored token.
pub fn verify(username: &str, password: &str, stored_token: &str) -> bool {
    let derived = verification_token(username, password);
    if derived.len() != stored_token.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in derived.bytes().zip(stored_token.bytes()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// Derive the master keypair used to seal the storage keypair's private
/// half. Deterministic per credential pair; the counter suffix skips the
/// rare derivations that fall outside the scalar range.
pub fn master_keypair(username: &str, password: &str) -> Result<Keypair, CryptoError> {
    for counter in 0u8..=255 {
        let salt = format!("master:{}:{}", username, counter);
        let mut out = SecureBuffer::zeroed(MASTER_LEN);
        pbkdf2_hmac::<Sha512>(
            password.as_bytes(),
            salt.as_bytes(),
            PBKDF_ROUNDS,
            out.as_mut_slice(),
        );
        // Clamp under the field's top bit so the scalar is almost surely
        // in range; retry with the next counter otherwise.
        out.as_mut_slice()[0] &= 0x01;
        if let Ok(secret) = import_private_bytes(out.as_slice()) {
            return Ok(Keypair::from_secret(secret));
        }
    }
    Err(CryptoError::Internal(String::from(
        "master key derivation exhausted its counter",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::export_public_hex;

    #[test]
    fn token_is_stable_and_salted() {
        let a = verification_token("alice", "hunter2");
        let b = verification_token("alice", "hunter2");
        let c = verification_token("bob", "hunter2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), TOKEN_LEN * 2);
    }

    #[test]
    fn verify_accepts_and_rejects() {
        let token = verification_token("alice", "hunter2");
        assert!(verify("alice", "hunter2", &token));
        assert!(!verify("alice", "wrong", &token));
        assert!(!verify("bob", "hunter2", &token));
        assert!(!verify("alice", "hunter2", "deadbeef"));
    }

    #[test]
    fn master_keypair_is_deterministic() {
        let a = master_keypair("alice", "hunter2").unwrap();
        let b = master_keypair("alice", "hunter2").unwrap();
        let c = master_keypair("alice", "other").unwrap();
        assert_eq!(export_public_hex(a.public()), export_public_hex(b.public()));
        assert_ne!(export_public_hex(a.public()), export_public_hex(c.public()));
    }
}
