// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! XMODEM block codec: framing, checksum and CRC16

use std::fmt;
use crate::protocol::*;

/// Per-block verification scheme, chosen by the receiver's handshake byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    Checksum,
    Crc16,
}

impl VerifyMode {
    /// Number of verify bytes trailing the data region
    pub fn trailer_len(self) -> usize {
        match self {
            VerifyMode::Checksum => 1,
            VerifyMode::Crc16 => 2,
        }
    }

    /// Total size of a framed block in this mode (132 or 133)
    pub fn packet_len(self) -> usize {
        HEADER_SIZE + BLOCK_SIZE + self.trailer_len()
    }

    /// Byte a receiver sends to ask for this mode
    pub fn handshake_byte(self) -> u8 {
        match self {
            VerifyMode::Checksum => NAK,
            VerifyMode::Crc16 => CRC_REQUEST,
        }
    }

    /// Verify value of a data region in this mode, widened to u16
    pub fn compute(self, data: &[u8]) -> u16 {
        match self {
            VerifyMode::Checksum => checksum(data) as u16,
            VerifyMode::Crc16 => crc16(data),
        }
    }
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyMode::Checksum => write!(f, "Checksum"),
            VerifyMode::Crc16 => write!(f, "CRC"),
        }
    }
}

/// Sum of all bytes, mod 256
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// CRC-16/XMODEM: poly 0x1021, init 0, MSB first, no reflection, no final xor
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Frame one block: `[SOH][n][!n][128 data bytes][checksum | crc_hi crc_lo]`.
///
/// `chunk` may be shorter than a block; the remainder is padded with
/// [`FILLER`]. Bytes beyond the first 128 are ignored.
pub fn build_packet(block_number: u8, chunk: &[u8], mode: VerifyMode) -> Vec<u8> {
    let mut packet = Vec::with_capacity(mode.packet_len());
    packet.push(SOH);
    packet.push(block_number);
    packet.push(!block_number);

    let take = chunk.len().min(BLOCK_SIZE);
    packet.extend_from_slice(&chunk[..take]);
    packet.resize(HEADER_SIZE + BLOCK_SIZE, FILLER);

    let data = &packet[HEADER_SIZE..HEADER_SIZE + BLOCK_SIZE];
    match mode {
        VerifyMode::Checksum => {
            let sum = checksum(data);
            packet.push(sum);
        }
        VerifyMode::Crc16 => {
            let crc = crc16(data);
            packet.extend_from_slice(&crc.to_be_bytes());
        }
    }

    packet
}

/// A block number and its inverse must sum to 0xFF
pub fn validate_header(block_number: u8, inverse: u8) -> bool {
    block_number.wrapping_add(inverse) == 0xFF
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_block() {
        let zeros = [0u8; BLOCK_SIZE];
        assert_eq!(checksum(&zeros), 0);
        assert_eq!(crc16(&zeros), 0);
    }

    #[test]
    fn test_crc16_known_vector() {
        // CRC-16/XMODEM check value
        assert_eq!(crc16(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_checksum_wraps() {
        let block = [0xFFu8; BLOCK_SIZE];
        assert_eq!(checksum(&block), 0x80);
        assert_eq!(checksum(&block), checksum(&block));

        // 128 * 0x41 = 0x2080
        let block = [b'A'; BLOCK_SIZE];
        assert_eq!(checksum(&block), 0x80);
    }

    #[test]
    fn test_build_checksum_packet() {
        let packet = build_packet(1, &[b'A'; BLOCK_SIZE], VerifyMode::Checksum);
        assert_eq!(packet.len(), 132);
        assert_eq!(&packet[..3], &[SOH, 0x01, 0xFE]);
        assert!(packet[3..131].iter().all(|&b| b == b'A'));
        assert_eq!(packet[131], 0x80);
    }

    #[test]
    fn test_build_crc_packet_pads_short_chunk() {
        let packet = build_packet(7, b"hello", VerifyMode::Crc16);
        assert_eq!(packet.len(), 133);
        assert_eq!(&packet[..3], &[SOH, 7, 0xF8]);
        assert_eq!(&packet[3..8], b"hello");
        assert!(packet[8..131].iter().all(|&b| b == FILLER));

        let crc = crc16(&packet[3..131]);
        assert_eq!(packet[131], (crc >> 8) as u8);
        assert_eq!(packet[132], (crc & 0xFF) as u8);
    }

    #[test]
    fn test_build_packet_wrapped_block_numbers() {
        let packet = build_packet(0xFF, &[], VerifyMode::Checksum);
        assert_eq!(&packet[1..3], &[0xFF, 0x00]);

        let packet = build_packet(0x00, &[], VerifyMode::Checksum);
        assert_eq!(&packet[1..3], &[0x00, 0xFF]);
        assert!(packet[3..131].iter().all(|&b| b == FILLER));
    }

    #[test]
    fn test_validate_header() {
        for b in 0..=255u8 {
            assert!(validate_header(b, 255 - b), "block {} should be valid", b);
            for inverse in 0..=255u8 {
                if inverse != 255 - b {
                    assert!(!validate_header(b, inverse));
                }
            }
        }
    }

    #[test]
    fn test_mode_lengths() {
        assert_eq!(VerifyMode::Checksum.packet_len(), 132);
        assert_eq!(VerifyMode::Crc16.packet_len(), 133);
        assert_eq!(VerifyMode::Checksum.handshake_byte(), NAK);
        assert_eq!(VerifyMode::Crc16.handshake_byte(), CRC_REQUEST);
    }
}
