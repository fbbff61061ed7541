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

//! Rate-limited chunked writes for receivers without flow control

use std::time::Duration;
#[cfg(test)]
use std::sync::{Arc, Mutex, PoisonError};

/// Chunking applied to every buffer written through [`send_with_rate_limit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub chunk_size: usize,
    pub delay_ms: u64,
}

impl RateLimitConfig {
    /// Fallback after a NAK or missing ACK: 4-byte writes, 100 ms apart
    pub const DEGRADED: RateLimitConfig = RateLimitConfig {
        enabled: true,
        chunk_size: 4,
        delay_ms: 100,
    };

    /// Chunk size to hand to the transport; 0 means "write it all at once"
    pub fn effective_chunk_size(&self) -> usize {
        if self.enabled { self.chunk_size } else { 0 }
    }

    pub fn delay(&self) -> Duration {
        if self.enabled { Duration::from_millis(self.delay_ms) } else { Duration::ZERO }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            enabled: false,
            chunk_size: 64,
            delay_ms: 10,
        }
    }
}

// ============================================================================
// Pacing
// ============================================================================

/// Source of every deliberate pause in a transfer
pub trait Pacer: Send + Sync {
    fn pause(&self, duration: Duration);
}

/// Sleeps the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Records pauses instead of sleeping
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct RecordingPacer {
    pauses: Arc<Mutex<Vec<Duration>>>,
}

#[cfg(test)]
impl RecordingPacer {
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
impl Pacer for RecordingPacer {
    fn pause(&self, duration: Duration) {
        self.pauses.lock().unwrap_or_else(PoisonError::into_inner).push(duration);
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Write `data` in chunks of at most `chunk_size` bytes, pausing `delay`
/// between chunks. A `chunk_size` of 0 disables chunking. `on_progress`
/// receives `(bytes_sent, total)` after every successful write.
///
/// The first failed write is returned as-is and the remaining chunks are
/// dropped.
pub fn send_with_rate_limit<W, E>(
    mut write: W,
    data: &[u8],
    chunk_size: usize,
    delay: Duration,
    pacer: &dyn Pacer,
    mut on_progress: Option<&mut dyn FnMut(usize, usize)>,
) -> Result<(), E>
where
    W: FnMut(&[u8]) -> Result<(), E>,
{
    let total = data.len();

    if chunk_size == 0 {
        write(data)?;
        if let Some(report) = on_progress.as_deref_mut() {
            report(total, total);
        }
        return Ok(());
    }

    let mut offset = 0;
    for chunk in data.chunks(chunk_size) {
        write(chunk)?;
        offset += chunk.len();
        if let Some(report) = on_progress.as_deref_mut() {
            report(offset, total);
        }

        if offset < total {
            pacer.pause(delay);
        }
    }

    Ok(())
}
