/*
 * ecies.rs
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

//! ECIES hybrid codec: ECDH on P-521 + SHA-512 key derivation +
//! AES-256-CBC + HMAC-SHA-512 over the ciphertext.
//!
//! Two properties of the container format are nonstandard and kept for
//! compatibility with existing stored mail:
//!
//! - The CBC initialization vector is all zeroes. Every message is sealed
//!   under a fresh ephemeral key, so identical plaintexts still produce
//!   unrelated ciphertexts, but the construction is not textbook.
//!   [`CryptoPolicy::randomize_iv`] switches to a random IV carried in the
//!   first body block, at the cost of format incompatibility.
//! - The MAC authenticates the ciphertext, not the plaintext. Kept as-is;
//!   changing it would silently fork the on-disk format.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use p521::ecdh::diffie_hellman;
use p521::{PublicKey, SecretKey};
use sha2::{Digest, Sha512};
use zeroize::{Zeroize, Zeroizing};

use super::cryptex::Cryptex;
use super::keys;
use super::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha512 = Hmac<Sha512>;

/// Symmetric cipher key length (AES-256).
pub const CIPHER_KEY_LEN: usize = 32;

/// Symmetric cipher block length (AES).
pub const CIPHER_BLOCK_LEN: usize = 16;

/// MAC output length (HMAC-SHA-512).
pub const MAC_LEN: usize = 64;

/// Envelope key material produced by the KDF (SHA-512 digest).
pub const ENVELOPE_LEN: usize = 64;

/// Upper bound on a single sealed payload.
pub const PLAINTEXT_LIMIT: usize = 1 << 30;

// The KDF must yield a cipher key and a MAC key from one digest.
const _: () = assert!(2 * CIPHER_KEY_LEN <= ENVELOPE_LEN);

/// Codec policy. The default reproduces the storage format exactly.
#[derive(Debug, Clone, Copy)]
pub struct CryptoPolicy {
    /// Use a random IV carried in the first body block instead of the
    /// all-zero IV. Containers written this way cannot be read by peers
    /// using the default policy.
    pub randomize_iv: bool,
}

impl Default for CryptoPolicy {
    fn default() -> Self {
        Self { randomize_iv: false }
    }
}

// ============================================================
// Key derivation
// ============================================================

/// Derive the envelope key: SHA-512 over the raw ECDH shared x-coordinate.
/// The first `CIPHER_KEY_LEN` bytes key the cipher, the next
/// `CIPHER_KEY_LEN` key the MAC.
fn derive_envelope(secret: &SecretKey, public: &PublicKey) -> Zeroizing<[u8; ENVELOPE_LEN]> {
    let shared = diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let digest = Sha512::digest(shared.raw_secret_bytes());
    let mut envelope = Zeroizing::new([0u8; ENVELOPE_LEN]);
    envelope.copy_from_slice(&digest);
    envelope
}

fn mac_body(envelope: &[u8; ENVELOPE_LEN], body: &[u8]) -> Result<[u8; MAC_LEN], CryptoError> {
    let mut mac = HmacSha512::new_from_slice(&envelope[CIPHER_KEY_LEN..2 * CIPHER_KEY_LEN])
        .map_err(|_| CryptoError::Internal(String::from("mac key rejected")))?;
    mac.update(body);
    let out = mac.finalize().into_bytes();
    let mut tag = [0u8; MAC_LEN];
    tag.copy_from_slice(&out);
    Ok(tag)
}

// ============================================================
// Encrypt
// ============================================================

/// Seal `plaintext` for the holder of `recipient_public_hex` using the
/// default policy.
pub fn encrypt(recipient_public_hex: &str, plaintext: &[u8]) -> Result<Cryptex, CryptoError> {
    encrypt_with(CryptoPolicy::default(), recipient_public_hex, plaintext)
}

/// Seal `plaintext` under an explicit policy.
pub fn encrypt_with(
    policy: CryptoPolicy,
    recipient_public_hex: &str,
    plaintext: &[u8],
) -> Result<Cryptex, CryptoError> {
    if plaintext.is_empty() {
        return Err(CryptoError::InvalidInput(String::from("empty plaintext")));
    }
    if plaintext.len() > PLAINTEXT_LIMIT {
        return Err(CryptoError::InvalidInput(format!(
            "payload of {} bytes exceeds the sealing limit",
            plaintext.len()
        )));
    }

    let recipient = keys::import_public_hex(recipient_public_hex)?;

    // Fresh ephemeral keypair for this payload only.
    let ephemeral = keys::generate()?;
    let envelope = derive_envelope(ephemeral.secret(), &recipient);

    let padded_len = plaintext.len().div_ceil(CIPHER_BLOCK_LEN) * CIPHER_BLOCK_LEN;
    let iv_len = if policy.randomize_iv { CIPHER_BLOCK_LEN } else { 0 };
    let mut cryptex = Cryptex::alloc(
        keys::POINT_LEN as u64,
        MAC_LEN as u64,
        plaintext.len() as u64,
        (iv_len + padded_len) as u64,
    )?;

    cryptex
        .key_mut()
        .copy_from_slice(&keys::export_public_octets(ephemeral.public()));

    let mut iv = [0u8; CIPHER_BLOCK_LEN];
    if policy.randomize_iv {
        getrandom::getrandom(&mut iv)
            .map_err(|e| CryptoError::Internal(format!("rng failure: {}", e)))?;
        cryptex.body_mut()[..CIPHER_BLOCK_LEN].copy_from_slice(&iv);
    }

    // The final partial block, if any, is zero-extended: the region is
    // already zeroed and the true length travels in the orig field.
    let cipher = Aes256CbcEnc::new_from_slices(&envelope[..CIPHER_KEY_LEN], &iv)
        .map_err(|_| CryptoError::Internal(String::from("cipher key rejected")))?;
    let body = &mut cryptex.body_mut()[iv_len..];
    body[..plaintext.len()].copy_from_slice(plaintext);
    let produced = cipher
        .encrypt_padded_mut::<NoPadding>(body, padded_len)
        .map_err(|_| CryptoError::Internal(String::from("block cipher rejected the buffer")))?
        .len();
    if produced != padded_len {
        return Err(CryptoError::Internal(format!(
            "cipher produced {} of {} body bytes",
            produced, padded_len
        )));
    }

    let tag = mac_body(&envelope, cryptex.body())?;
    cryptex.mac_mut().copy_from_slice(&tag);

    Ok(cryptex)
}

// ============================================================
// Decrypt
// ============================================================

/// Open a container with the holder's private key using the default policy.
pub fn decrypt(recipient_private_hex: &str, cryptex: &Cryptex) -> Result<Vec<u8>, CryptoError> {
    decrypt_with(CryptoPolicy::default(), recipient_private_hex, cryptex)
}

/// Open a container under an explicit policy. The MAC is verified before
/// any decryption; on mismatch no plaintext bytes are produced.
pub fn decrypt_with(
    policy: CryptoPolicy,
    recipient_private_hex: &str,
    cryptex: &Cryptex,
) -> Result<Vec<u8>, CryptoError> {
    if cryptex.key_len() != keys::POINT_LEN as u64 || cryptex.mac_len() != MAC_LEN as u64 {
        return Err(CryptoError::InvalidContainer(format!(
            "unexpected region sizes (key {}, mac {})",
            cryptex.key_len(),
            cryptex.mac_len()
        )));
    }
    let iv_len = if policy.randomize_iv { CIPHER_BLOCK_LEN } else { 0 };
    let body_len = cryptex.body_len() as usize;
    if body_len < iv_len
        || (body_len - iv_len) % CIPHER_BLOCK_LEN != 0
        || cryptex.orig_len() as usize > body_len - iv_len
    {
        return Err(CryptoError::InvalidContainer(String::from(
            "body length is not a padded block count",
        )));
    }

    let secret = keys::import_private_hex(recipient_private_hex)?;
    let ephemeral = keys::import_public_octets(cryptex.key())?;
    let envelope = derive_envelope(&secret, &ephemeral);

    // Authenticate before touching the cipher.
    let mut mac = HmacSha512::new_from_slice(&envelope[CIPHER_KEY_LEN..2 * CIPHER_KEY_LEN])
        .map_err(|_| CryptoError::Internal(String::from("mac key rejected")))?;
    mac.update(cryptex.body());
    if mac.verify_slice(cryptex.mac()).is_err() {
        return Err(CryptoError::AuthenticationFailed);
    }

    let mut iv = [0u8; CIPHER_BLOCK_LEN];
    if policy.randomize_iv {
        iv.copy_from_slice(&cryptex.body()[..CIPHER_BLOCK_LEN]);
    }

    let cipher = Aes256CbcDec::new_from_slices(&envelope[..CIPHER_KEY_LEN], &iv)
        .map_err(|_| CryptoError::Internal(String::from("cipher key rejected")))?;
    let mut buf = cryptex.body()[iv_len..].to_vec();
    let expected = buf.len();
    let consumed = match cipher.decrypt_padded_mut::<NoPadding>(&mut buf) {
        Ok(plain) => plain.len(),
        Err(_) => {
            buf.zeroize();
            return Err(CryptoError::Internal(String::from(
                "block cipher rejected the body",
            )));
        }
    };
    if consumed != expected {
        buf.zeroize();
        return Err(CryptoError::Internal(format!(
            "cipher consumed {} of {} body bytes",
            consumed, expected
        )));
    }

    buf.truncate(cryptex.orig_len() as usize);
    Ok(buf)
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{export_private_hex, export_public_hex, generate, POINT_LEN};

    fn keypair_hex() -> (String, String) {
        let kp = generate().unwrap();
        (
            export_private_hex(kp.secret()),
            export_public_hex(kp.public()),
        )
    }

    #[test]
    fn roundtrip_assorted_lengths() {
        let (private_hex, public_hex) = keypair_hex();
        for len in [1usize, 15, 16, 17, 64, 100, 4096] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let sealed = encrypt(&public_hex, &plaintext).unwrap();
            assert_eq!(sealed.orig_len(), len as u64);
            assert_eq!(sealed.body_len() as usize, len.div_ceil(16) * 16);
            let opened = decrypt(&private_hex, &sealed).unwrap();
            assert_eq!(opened, plaintext);
        }
    }

    #[test]
    fn large_payload_size_formula() {
        let (private_hex, public_hex) = keypair_hex();
        let plaintext = vec![0x5a; 1 << 20];
        let sealed = encrypt(&public_hex, &plaintext).unwrap();
        assert_eq!(
            sealed.total_len() as usize,
            32 + POINT_LEN + MAC_LEN + plaintext.len().div_ceil(16) * 16
        );
        assert_eq!(decrypt(&private_hex, &sealed).unwrap(), plaintext);
    }

    #[test]
    fn fresh_ephemeral_key_per_call() {
        let (_, public_hex) = keypair_hex();
        let a = encrypt(&public_hex, b"same plaintext").unwrap();
        let b = encrypt(&public_hex, b"same plaintext").unwrap();
        assert_ne!(a.key(), b.key());
        assert_ne!(a.body(), b.body());
    }

    #[test]
    fn tampered_body_or_mac_fails_authentication() {
        let (private_hex, public_hex) = keypair_hex();
        let sealed = encrypt(&public_hex, b"an honest message").unwrap();

        for offset in 0..sealed.body_len() as usize {
            if offset % 7 != 0 {
                continue;
            }
            let mut bytes = sealed.as_bytes().to_vec();
            let pos = 32 + POINT_LEN + MAC_LEN + offset;
            bytes[pos] ^= 0x01;
            let reparsed = Cryptex::parse(&bytes).unwrap();
            assert!(matches!(
                decrypt(&private_hex, &reparsed),
                Err(CryptoError::AuthenticationFailed)
            ));
        }

        // First mac byte, i.e. offset header + key_len.
        let mut bytes = sealed.as_bytes().to_vec();
        bytes[32 + POINT_LEN] ^= 0x80;
        let reparsed = Cryptex::parse(&bytes).unwrap();
        assert!(matches!(
            decrypt(&private_hex, &reparsed),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn wrong_private_key_fails_authentication() {
        let (_, public_hex) = keypair_hex();
        let (other_private, _) = keypair_hex();
        let sealed = encrypt(&public_hex, b"not for you").unwrap();
        assert!(matches!(
            decrypt(&other_private, &sealed),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn empty_plaintext_rejected() {
        let (_, public_hex) = keypair_hex();
        assert!(matches!(
            encrypt(&public_hex, b""),
            Err(CryptoError::InvalidInput(_))
        ));
    }

    #[test]
    fn wire_roundtrip() {
        let (private_hex, public_hex) = keypair_hex();
        let sealed = encrypt(&public_hex, b"across the wire").unwrap();
        let wire = sealed.into_bytes();
        let parsed = Cryptex::parse(&wire).unwrap();
        assert_eq!(decrypt(&private_hex, &parsed).unwrap(), b"across the wire");
    }

    #[test]
    fn randomized_iv_policy_roundtrips_but_is_incompatible() {
        let policy = CryptoPolicy { randomize_iv: true };
        let (private_hex, public_hex) = keypair_hex();
        let sealed = encrypt_with(policy, &public_hex, b"fresh iv").unwrap();
        assert_eq!(sealed.body_len() as usize, 16 + 16);
        assert_eq!(
            decrypt_with(policy, &private_hex, &sealed).unwrap(),
            b"fresh iv"
        );
        // A default-policy reader authenticates (same body bytes) but the
        // zero-IV decryption of the leading IV block yields garbage.
        assert_ne!(decrypt(&private_hex, &sealed).unwrap(), b"fresh iv");
    }
}
