/*
 * cryptex.rs
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

//! The cryptex container: the authenticated envelope the ECIES codec reads
//! and writes. Wire/disk layout is a packed little-endian header of four
//! u64 lengths `{key, mac, orig, body}` followed immediately by the key,
//! mac, and body regions. Total size = 32 + key + mac + body; there is no
//! version byte (the algorithm suite is fixed policy in `ecies`).

use super::CryptoError;

/// Header size: four packed little-endian u64 length fields.
pub const HEADER_LEN: usize = 32;

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut field = [0u8; 8];
    field.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(field)
}

/// An owned cryptex buffer holding the full wire image.
pub struct Cryptex {
    buf: Vec<u8>,
}

impl Cryptex {
    /// Allocate a container with the header filled in and all regions zeroed.
    pub fn alloc(key_len: u64, mac_len: u64, orig_len: u64, body_len: u64) -> Result<Self, CryptoError> {
        let total = (HEADER_LEN as u64)
            .checked_add(key_len)
            .and_then(|t| t.checked_add(mac_len))
            .and_then(|t| t.checked_add(body_len))
            .ok_or_else(|| CryptoError::InvalidContainer(String::from("length overflow")))?;
        let total: usize = total
            .try_into()
            .map_err(|_| CryptoError::InvalidContainer(String::from("container too large")))?;
        let mut buf = vec![0u8; total];
        buf[0..8].copy_from_slice(&key_len.to_le_bytes());
        buf[8..16].copy_from_slice(&mac_len.to_le_bytes());
        buf[16..24].copy_from_slice(&orig_len.to_le_bytes());
        buf[24..32].copy_from_slice(&body_len.to_le_bytes());
        Ok(Self { buf })
    }

    /// Parse a wire image. The field sums must match the delivered byte count
    /// exactly; trailing bytes are rejected.
    pub fn parse(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < HEADER_LEN {
            return Err(CryptoError::InvalidContainer(format!(
                "{} bytes is shorter than the header",
                bytes.len()
            )));
        }
        let key_len = read_u64(bytes, 0);
        let mac_len = read_u64(bytes, 8);
        let orig_len = read_u64(bytes, 16);
        let body_len = read_u64(bytes, 24);
        let total = (HEADER_LEN as u64)
            .checked_add(key_len)
            .and_then(|t| t.checked_add(mac_len))
            .and_then(|t| t.checked_add(body_len))
            .ok_or_else(|| CryptoError::InvalidContainer(String::from("length overflow")))?;
        if total != bytes.len() as u64 {
            return Err(CryptoError::InvalidContainer(format!(
                "header says {} bytes, buffer holds {}",
                total,
                bytes.len()
            )));
        }
        if orig_len > body_len {
            return Err(CryptoError::InvalidContainer(String::from(
                "original length exceeds body length",
            )));
        }
        Ok(Self { buf: bytes.to_vec() })
    }

    pub fn key_len(&self) -> u64 {
        read_u64(&self.buf, 0)
    }

    pub fn mac_len(&self) -> u64 {
        read_u64(&self.buf, 8)
    }

    pub fn orig_len(&self) -> u64 {
        read_u64(&self.buf, 16)
    }

    pub fn body_len(&self) -> u64 {
        read_u64(&self.buf, 24)
    }

    pub fn total_len(&self) -> u64 {
        self.buf.len() as u64
    }

    fn key_range(&self) -> std::ops::Range<usize> {
        let start = HEADER_LEN;
        start..start + self.key_len() as usize
    }

    fn mac_range(&self) -> std::ops::Range<usize> {
        let start = HEADER_LEN + self.key_len() as usize;
        start..start + self.mac_len() as usize
    }

    fn body_range(&self) -> std::ops::Range<usize> {
        let start = HEADER_LEN + (self.key_len() + self.mac_len()) as usize;
        start..start + self.body_len() as usize
    }

    pub fn key(&self) -> &[u8] {
        &self.buf[self.key_range()]
    }

    pub fn key_mut(&mut self) -> &mut [u8] {
        let r = self.key_range();
        &mut self.buf[r]
    }

    pub fn mac(&self) -> &[u8] {
        &self.buf[self.mac_range()]
    }

    pub fn mac_mut(&mut self) -> &mut [u8] {
        let r = self.mac_range();
        &mut self.buf[r]
    }

    pub fn body(&self) -> &[u8] {
        &self.buf[self.body_range()]
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        let r = self.body_range();
        &mut self.buf[r]
    }

    /// The exact wire form; total_len() is the only byte count the codec emits.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
