/*
 * secure.rs
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

//! Buffers for key material (zeroed on drop) and the hex codec shared by
//! the key import/export paths.

use zeroize::Zeroize;

use super::CryptoError;

/// Heap buffer for sensitive bytes: envelope keys, private scalars, derived
/// secrets. The contents are wiped when the buffer is dropped.
pub struct SecureBuffer(Vec<u8>);

impl SecureBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn zeroed(len: usize) -> Self {
        Self(vec![0u8; len])
    }

    /// Fill a fresh buffer from the system RNG.
    pub fn random(len: usize) -> Result<Self, CryptoError> {
        let mut data = vec![0u8; len];
        getrandom::getrandom(&mut data)
            .map_err(|e| CryptoError::Internal(format!("rng failure: {}", e)))?;
        Ok(Self(data))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl AsRef<[u8]> for SecureBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Clone for SecureBuffer {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureBuffer({} bytes)", self.0.len())
    }
}

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push(HEX[(b >> 4) as usize] as char);
        s.push(HEX[(b & 0x0f) as usize] as char);
    }
    s
}

pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, CryptoError> {
    if hex.len() % 2 != 0 {
        return Err(CryptoError::InvalidKeyFormat(String::from(
            "hex string must have even length",
        )));
    }
    let chars: Vec<char> = hex.chars().collect();
    let mut bytes = Vec::with_capacity(chars.len() / 2);
    let mut i = 0;
    while i < chars.len() {
        let high = hex_char_val(chars[i])
            .ok_or_else(|| CryptoError::InvalidKeyFormat(format!("invalid hex char: {}", chars[i])))?;
        let low = hex_char_val(chars[i + 1])
            .ok_or_else(|| CryptoError::InvalidKeyFormat(format!("invalid hex char: {}", chars[i + 1])))?;
        bytes.push((high << 4) | low);
        i += 2;
    }
    Ok(bytes)
}

fn hex_char_val(c: char) -> Option<u8> {
    match c {
        '0'..='9' => Some(c as u8 - b'0'),
        'a'..='f' => Some(c as u8 - b'a' + 10),
        'A'..='F' => Some(c as u8 - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let hex = "00ff10a5deadbeef";
        let bytes = hex_to_bytes(hex).unwrap();
        assert_eq!(bytes, vec![0x00, 0xff, 0x10, 0xa5, 0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(bytes_to_hex(&bytes), hex);
    }

    #[test]
    fn hex_rejects_odd_and_junk() {
        assert!(hex_to_bytes("abc").is_err());
        assert!(hex_to_bytes("zz").is_err());
        assert_eq!(hex_to_bytes("AB").unwrap(), vec![0xab]);
    }

    #[test]
    fn random_fills() {
        let a = SecureBuffer::random(32).unwrap();
        let b = SecureBuffer::random(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a.as_slice(), b.as_slice());
    }
}
