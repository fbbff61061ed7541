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

//! Transfer tunables

use std::time::Duration;
use crate::rate_limit::RateLimitConfig;

/// Per-wait timeouts. There is no overall transfer deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Sender waiting for the receiver's `C`/`NAK`
    pub handshake: Duration,
    /// Sender waiting for `ACK`/`NAK` after a block or EOT
    pub response: Duration,
    /// Receiver waiting for `SOH`/`EOT`
    pub receive: Duration,
    /// Receiver reading the bytes of a block once `SOH` has arrived
    pub byte: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            handshake: Duration::from_millis(10_000),
            response: Duration::from_millis(1_000),
            receive: Duration::from_millis(3_000),
            byte: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Starting rate limit; the sender may escalate it during a transfer
    pub rate_limit: RateLimitConfig,
    pub timeouts: Timeouts,
    /// Attempts per block (sender) or handshake retries (receiver)
    pub max_retries: u32,
    /// Pause after each acknowledged block
    pub ack_grace: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            rate_limit: RateLimitConfig::default(),
            timeouts: Timeouts::default(),
            max_retries: 10,
            ack_grace: Duration::from_millis(20),
        }
    }
}

/// Cancel sequence: one `CAN` per interval, up to this many
pub const CANCEL_ATTEMPTS: u32 = 30;
pub const CANCEL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest single wait before a running transfer re-checks its cancel token
pub const CANCEL_POLL: Duration = Duration::from_millis(50);
