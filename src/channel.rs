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

use std::sync::Arc;
use std::time::{Duration, Instant};
use crate::arrival::ByteArrivalBuffer;
use crate::config::CANCEL_POLL;
use crate::error::{Result, XmodemError};
use crate::rate_limit::{send_with_rate_limit, Pacer, RateLimitConfig};
use crate::serial::Link;
use crate::status::{CancelToken, TransferStatus};

/// Everything a running state machine talks through: the link for writes,
/// the claimed arrival buffer for reads, the pacer for delays, the status
/// line for the caller and the token that aborts a pending read.
#[derive(Clone)]
pub struct Channel {
    pub link: Link,
    pub buffer: ByteArrivalBuffer,
    pub pacer: Arc<dyn Pacer>,
    pub status: TransferStatus,
    pub cancel: CancelToken,
}

impl Channel {
    pub fn new(link: Link, pacer: Arc<dyn Pacer>, status: TransferStatus) -> Self {
        Channel {
            link,
            buffer: ByteArrivalBuffer::new(),
            pacer,
            status,
            cancel: CancelToken::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        self.link.write(bytes)?;
        Ok(())
    }

    /// Write through the rate limiter using `rate`
    pub fn send_paced(&self, bytes: &[u8], rate: &RateLimitConfig) -> Result<()> {
        send_with_rate_limit(
            |chunk| self.link.write(chunk),
            bytes,
            rate.effective_chunk_size(),
            rate.delay(),
            self.pacer.as_ref(),
            None,
        )?;
        Ok(())
    }

    /// Wait up to `timeout` for the next byte. The wait is split into
    /// `CANCEL_POLL` slices and fails with `UserCancelled` as soon as the
    /// cancel token is set.
    pub fn recv(&self, timeout: Duration) -> Result<u8> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.cancel.is_cancelled() {
                return Err(XmodemError::UserCancelled);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.buffer.wait_for_byte(remaining.min(CANCEL_POLL)) {
                Err(e) if e.is_timeout() => {
                    if remaining <= CANCEL_POLL {
                        return Err(XmodemError::Timeout(timeout));
                    }
                }
                other => return other,
            }
        }
    }

    pub fn pause(&self, duration: Duration) {
        self.pacer.pause(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use crate::rate_limit::RecordingPacer;
    use crate::serial::MockSerialPort;

    fn channel() -> Channel {
        let (link, _log) = MockSerialPort::silent();
        Channel::new(link, Arc::new(RecordingPacer::default()), TransferStatus::default())
    }

    #[test]
    fn test_recv_times_out_with_full_duration() {
        let channel = channel();
        let started = Instant::now();
        match channel.recv(Duration::from_millis(120)) {
            Err(XmodemError::Timeout(waited)) => assert_eq!(waited, Duration::from_millis(120)),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_recv_gets_byte_after_several_slices() {
        let channel = channel();
        let producer = channel.buffer.clone();
        let handle = thread::spawn(move || {
            thread::sleep(CANCEL_POLL * 3);
            producer.push(&[0x06]);
        });

        assert_eq!(channel.recv(Duration::from_secs(5)).unwrap(), 0x06);
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_interrupts_long_recv() {
        let channel = channel();
        let cancel = channel.cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            cancel.cancel();
        });

        let started = Instant::now();
        assert!(matches!(
            channel.recv(Duration::from_secs(10)),
            Err(XmodemError::UserCancelled)
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }
}
