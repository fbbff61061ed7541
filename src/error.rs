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

//! Error types for XMODEM transfers.

use std::time::Duration;
use thiserror::Error;
use crate::packet::VerifyMode;

#[derive(Debug, Error)]
pub enum XmodemError {
    /// No handshake byte arrived from the receiver.
    #[error("Handshake timed out. Ensure receiver is ready.")]
    HandshakeTimeout,

    /// The receiver opened with something other than `C` or `NAK`.
    #[error("Unexpected initial byte: 0x{0:02X}")]
    HandshakeUnexpectedByte(u8),

    /// The same block went unacknowledged too many times.
    #[error("Too many retries on block {block}. Transfer failed.")]
    BlockRetriesExhausted { block: u8 },

    /// Header inconsistent with the expected block and not a duplicate.
    #[error("Block number mismatch: expected {expected}, got {got}")]
    BlockSequenceError { expected: u8, got: u8 },

    /// Recomputed checksum/CRC disagrees with the received one.
    #[error("{mode} mismatch on block {block}: expected 0x{expected:04X}, got 0x{received:04X}")]
    VerifyMismatch {
        block: u8,
        mode: VerifyMode,
        expected: u16,
        received: u16,
    },

    #[error("Link write failed: {0}")]
    LinkWriteFailure(#[from] std::io::Error),

    #[error("Transfer cancelled by user")]
    UserCancelled,

    /// A single byte wait expired.
    #[error("Timeout waiting for response ({0:?})")]
    Timeout(Duration),

    /// A second wait was issued while one was still pending.
    #[error("A byte wait is already pending on this buffer")]
    WaiterBusy,

    #[error("A transfer is already in progress")]
    SessionBusy,

    #[error("Failed to save received data: {0}")]
    Storage(std::io::Error),
}

impl XmodemError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, XmodemError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, XmodemError>;
