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

//! XMODEM protocol constants

/// Start of header - begins a 128-byte data block
pub const SOH: u8 = 0x01;

/// End of transmission - sender has no more blocks
pub const EOT: u8 = 0x04;

/// Acknowledge - block (or EOT) accepted
pub const ACK: u8 = 0x06;

/// Negative acknowledge - resend the block, or request checksum mode during handshake
pub const NAK: u8 = 0x15;

/// Cancel - abort the transfer
pub const CAN: u8 = 0x18;

/// Receiver requests CRC16 mode
pub const CRC_REQUEST: u8 = b'C';

/// Pads the last block of a file out to a full block
pub const FILLER: u8 = 0x1A;

/// Payload bytes carried by every block
pub const BLOCK_SIZE: usize = 128;

/// SOH + block number + inverse block number
pub const HEADER_SIZE: usize = 3;

/// CRC16 generator polynomial (CCITT)
pub const CRC16_POLY: u16 = 0x1021;
