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

//! User-initiated cancel: repeat CAN until the far end says anything

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use crate::config::{CANCEL_ATTEMPTS, CANCEL_INTERVAL};
use crate::error::Result;
use crate::protocol::CAN;
use crate::rate_limit::Pacer;
use crate::serial::Link;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOutcome {
    /// Some byte came back while the sequence was running
    pub responded: bool,
    /// Number of CAN bytes written
    pub sent: u32,
}

/// Claims `link` for the duration and writes one CAN per interval, at most
/// [`CANCEL_ATTEMPTS`] times, stopping as soon as any inbound byte is seen.
pub fn send_cancel(link: &Link, pacer: &dyn Pacer) -> Result<CancelOutcome> {
    let responded = Arc::new(AtomicBool::new(false));
    let flag = responded.clone();
    let _claim = link.claim(Box::new(move |chunk| {
        if !chunk.is_empty() {
            flag.store(true, Ordering::SeqCst);
        }
    }));

    let mut sent = 0;
    for _ in 0..CANCEL_ATTEMPTS {
        if responded.load(Ordering::SeqCst) {
            break;
        }
        link.write(&[CAN])?;
        sent += 1;
        pacer.pause(CANCEL_INTERVAL);
    }

    let responded = responded.load(Ordering::SeqCst);
    debug!("Cancel sequence finished: {} CAN sent, responded: {}", sent, responded);
    Ok(CancelOutcome { responded, sent })
}
