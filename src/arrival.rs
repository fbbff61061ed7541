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

//! Byte arrival buffer
//!
//! While a transfer is running the link's inbound stream is redirected here,
//! and the protocol pulls bytes one at a time with [`ByteArrivalBuffer::wait_for_byte`].
//! The reader thread is the only producer and the transfer the only consumer;
//! a single wait may be outstanding at any time.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use crate::error::{Result, XmodemError};
use crate::serial::{Link, LinkClaim};

#[derive(Default)]
struct Slot {
    queue: VecDeque<u8>,
    waiting: bool,
}

#[derive(Clone, Default)]
pub struct ByteArrivalBuffer {
    shared: Arc<(Mutex<Slot>, Condvar)>,
}

impl ByteArrivalBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.shared.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append bytes in arrival order and wake the waiter, if any.
    pub fn push(&self, bytes: &[u8]) {
        let mut slot = self.slot();
        slot.queue.extend(bytes.iter().copied());
        if slot.waiting {
            self.shared.1.notify_one();
        }
    }

    /// Next byte, or [`XmodemError::Timeout`] if none arrives within `timeout`.
    pub fn wait_for_byte(&self, timeout: Duration) -> Result<u8> {
        let mut slot = self.slot();
        if let Some(byte) = slot.queue.pop_front() {
            return Ok(byte);
        }
        if slot.waiting {
            return Err(XmodemError::WaiterBusy);
        }

        slot.waiting = true;
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                slot.waiting = false;
                return Err(XmodemError::Timeout(timeout));
            }

            let (guard, _) = self
                .shared
                .1
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;

            if let Some(byte) = slot.queue.pop_front() {
                slot.waiting = false;
                return Ok(byte);
            }
        }
    }

    pub fn clear(&self) {
        self.slot().queue.clear();
    }

    pub fn len(&self) -> usize {
        self.slot().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim `link` so its inbound bytes land in this buffer. Dropping the
    /// returned guard restores default logging and empties the buffer.
    pub fn attach(&self, link: &Link) -> ArrivalClaim {
        self.clear();
        let sink = self.clone();
        let claim = link.claim(Box::new(move |chunk| sink.push(chunk)));
        ArrivalClaim {
            claim: Some(claim),
            buffer: self.clone(),
        }
    }
}

pub struct ArrivalClaim {
    claim: Option<LinkClaim>,
    buffer: ByteArrivalBuffer,
}

impl Drop for ArrivalClaim {
    fn drop(&mut self) {
        // Release the link before clearing so no late chunk slips in
        drop(self.claim.take());
        self.buffer.clear();
    }
}
