/*
 * keys.rs
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

//! Elliptic-curve key codec on the fixed storage curve (NIST P-521).
//! Public keys travel as compressed SEC1 points (67 octets) in hex or raw
//! octets; private keys as big-endian scalar hex. Import performs full
//! validation: points must lie on the curve, scalars must be in [1, n-1].

use p521::elliptic_curve::sec1::ToEncodedPoint;
use p521::{FieldBytes, PublicKey, SecretKey};

use super::secure::{bytes_to_hex, hex_to_bytes, SecureBuffer};
use super::CryptoError;

/// Curve name, fixed module-wide. The container format pins the compressed
/// point size (67) and scalar size (66), so this cannot vary per message.
pub const CURVE_NAME: &str = "secp521r1";

/// Big-endian scalar / field element size in bytes.
pub const FIELD_LEN: usize = 66;

/// Compressed SEC1 point size in bytes (tag + x coordinate).
pub const POINT_LEN: usize = FIELD_LEN + 1;

/// An EC keypair on the storage curve.
pub struct Keypair {
    secret: SecretKey,
    public: PublicKey,
}

impl Keypair {
    /// Build a keypair from an existing secret scalar.
    pub fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }
}

/// Generate a random keypair.
pub fn generate() -> Result<Keypair, CryptoError> {
    let secret = SecretKey::random(&mut rand::rngs::OsRng);
    let public = secret.public_key();
    Ok(Keypair { secret, public })
}

/// Import a public key from raw SEC1 octets (compressed or uncompressed).
pub fn import_public_octets(octets: &[u8]) -> Result<PublicKey, CryptoError> {
    match octets.first() {
        Some(0x02) | Some(0x03) if octets.len() == POINT_LEN => {}
        Some(0x04) if octets.len() == 2 * FIELD_LEN + 1 => {}
        _ => {
            return Err(CryptoError::InvalidKeyFormat(format!(
                "not a SEC1 point encoding ({} bytes)",
                octets.len()
            )))
        }
    }
    PublicKey::from_sec1_bytes(octets)
        .map_err(|_| CryptoError::InvalidKey(String::from("point is not on the curve")))
}

/// Import a public key from a hex-encoded SEC1 point.
pub fn import_public_hex(hex: &str) -> Result<PublicKey, CryptoError> {
    let octets = hex_to_bytes(hex.trim())?;
    import_public_octets(&octets)
}

/// Import a private key from a hex-encoded big-endian scalar. Odd-length and
/// short encodings (leading zeros trimmed by other exporters) are accepted.
pub fn import_private_hex(hex: &str) -> Result<SecretKey, CryptoError> {
    let trimmed = hex.trim();
    let padded;
    let even = if trimmed.len() % 2 == 0 {
        trimmed
    } else {
        padded = format!("0{}", trimmed);
        &padded
    };
    let bytes = hex_to_bytes(even)?;
    import_private_bytes(&bytes)
}

/// Import a private key from big-endian scalar bytes (at most 66).
pub fn import_private_bytes(bytes: &[u8]) -> Result<SecretKey, CryptoError> {
    // Trim leading zeros, then left-pad to the full field width.
    let mut significant = bytes;
    while significant.first() == Some(&0) {
        significant = &significant[1..];
    }
    if significant.is_empty() {
        return Err(CryptoError::InvalidKey(String::from("scalar is zero")));
    }
    if significant.len() > FIELD_LEN {
        return Err(CryptoError::InvalidKeyFormat(format!(
            "scalar is {} bytes, curve field is {}",
            significant.len(),
            FIELD_LEN
        )));
    }
    let mut fb = FieldBytes::default();
    fb[FIELD_LEN - significant.len()..].copy_from_slice(significant);
    SecretKey::from_bytes(&fb)
        .map_err(|_| CryptoError::InvalidKey(String::from("scalar out of range")))
}

/// Export the public half as compressed SEC1 octets.
pub fn export_public_octets(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(true).as_bytes().to_vec()
}

/// Export the public half as compressed SEC1 hex.
pub fn export_public_hex(key: &PublicKey) -> String {
    bytes_to_hex(&export_public_octets(key))
}

/// Export the private scalar as full-width big-endian bytes, in a buffer
/// that is wiped on drop.
pub fn export_private_bytes(key: &SecretKey) -> SecureBuffer {
    SecureBuffer::new(key.to_bytes().to_vec())
}

/// Export the private scalar as full-width hex. The caller owns the string
/// and is responsible for its lifetime; prefer [`export_private_bytes`]
/// where the value is held for longer than a call.
pub fn export_private_hex(key: &SecretKey) -> String {
    bytes_to_hex(export_private_bytes(key).as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_export_sizes() {
        let kp = generate().unwrap();
        let octets = export_public_octets(kp.public());
        assert_eq!(octets.len(), POINT_LEN);
        assert!(octets[0] == 0x02 || octets[0] == 0x03);
        assert_eq!(export_public_hex(kp.public()).len(), POINT_LEN * 2);
        assert_eq!(export_private_bytes(kp.secret()).len(), FIELD_LEN);
    }

    #[test]
    fn public_roundtrip_hex_and_octets() {
        let kp = generate().unwrap();
        let hex = export_public_hex(kp.public());
        let back = import_public_hex(&hex).unwrap();
        assert_eq!(export_public_hex(&back), hex);

        let octets = export_public_octets(kp.public());
        let back = import_public_octets(&octets).unwrap();
        assert_eq!(export_public_octets(&back), octets);
    }

    #[test]
    fn private_roundtrip_tolerates_trimmed_hex() {
        let kp = generate().unwrap();
        let hex = export_private_hex(kp.secret());
        let trimmed = hex.trim_start_matches('0');
        let back = import_private_hex(trimmed).unwrap();
        assert_eq!(export_private_hex(&back), hex);
        // The reimported key derives the same public point.
        assert_eq!(
            export_public_hex(&back.public_key()),
            export_public_hex(kp.public())
        );
    }

    #[test]
    fn import_rejects_garbage() {
        assert!(matches!(
            import_public_hex("zzzz"),
            Err(CryptoError::InvalidKeyFormat(_))
        ));
        assert!(matches!(
            import_public_octets(&[0x05; POINT_LEN]),
            Err(CryptoError::InvalidKeyFormat(_))
        ));
        // Right shape, but x is not on the curve.
        let mut bogus = vec![0x02];
        bogus.extend_from_slice(&[0xff; FIELD_LEN]);
        assert!(matches!(
            import_public_octets(&bogus),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(matches!(
            import_private_hex("00"),
            Err(CryptoError::InvalidKey(_))
        ));
    }
}
