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

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};
use tracing::{debug, error, info};
use crate::format::{DisplayMode, to_hex};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Write half of a serial connection. Reads arrive separately through [`Inbound`].
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
}

// ============================================================================
// Inbound Delivery
// ============================================================================

/// Consumer of inbound chunks while a session has claimed the link
pub type DataHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Routes every chunk read from the link either to the installed data
/// handler or, when none is installed, to the log.
#[derive(Clone, Default)]
pub struct Inbound {
    handler: Arc<Mutex<Option<DataHandler>>>,
    display: DisplayMode,
}

impl Inbound {
    pub fn new(display: DisplayMode) -> Self {
        Inbound {
            handler: Arc::new(Mutex::new(None)),
            display,
        }
    }

    /// Install (`Some`) or remove (`None`) the handler. Removing it restores logging.
    pub fn set_data_handler(&self, handler: Option<DataHandler>) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    pub fn is_claimed(&self) -> bool {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn deliver(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let mut slot = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_mut() {
            Some(handler) => handler(chunk),
            None => info!("RX {}", self.display.render(chunk)),
        }
    }
}

// ============================================================================
// Link
// ============================================================================

/// Shared handle to a serial connection: the write half plus the inbound router.
#[derive(Clone)]
pub struct Link {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    inbound: Inbound,
}

impl Link {
    pub fn new(port: Box<dyn SerialPort>, inbound: Inbound) -> Self {
        Link {
            port: Arc::new(Mutex::new(port)),
            inbound,
        }
    }

    pub fn inbound(&self) -> &Inbound {
        &self.inbound
    }

    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut port = self.port.lock().unwrap_or_else(PoisonError::into_inner);
        port.write_all(bytes)?;
        debug!("TX {}", to_hex(bytes));
        Ok(())
    }

    /// Redirect inbound traffic to `handler` until the returned guard is dropped.
    pub fn claim(&self, handler: DataHandler) -> LinkClaim {
        self.inbound.set_data_handler(Some(handler));
        LinkClaim {
            inbound: self.inbound.clone(),
        }
    }
}

/// Exclusive claim on a link's inbound stream; default logging resumes on drop.
pub struct LinkClaim {
    inbound: Inbound,
}

impl Drop for LinkClaim {
    fn drop(&mut self) {
        self.inbound.set_data_handler(None);
    }
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }

    /// Independent handle on the same device for the reader thread
    pub fn reader(&self) -> Result<Box<dyn SerialPortTrait>, serialport::Error> {
        self.port.try_clone()
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }
}

/// Read the port until it fails, pushing every chunk into `inbound`.
pub fn spawn_reader(mut port: Box<dyn SerialPortTrait>, inbound: Inbound) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("serial-reader".into())
        .spawn(move || {
            let mut buf = [0u8; 256];
            loop {
                match port.read(&mut buf) {
                    Ok(0) => {
                        info!("Serial port closed");
                        break;
                    }
                    Ok(n) => inbound.deliver(&buf[..n]),
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                    Err(e) => {
                        error!("Read error: {}", e);
                        break;
                    }
                }
            }
        })
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

/// Far end of a mock link: sees every write, returns the bytes it answers with
#[cfg(test)]
pub type FarEnd = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// Every write issued on a mock link, in order
#[cfg(test)]
#[derive(Clone, Default)]
pub struct WriteLog(Arc<Mutex<Vec<Vec<u8>>>>);

#[cfg(test)]
impl WriteLog {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.writes().concat()
    }

    fn push(&self, buf: &[u8]) {
        self.0.lock().unwrap().push(buf.to_vec());
    }
}

#[cfg(test)]
pub struct MockSerialPort {
    // Where the far end's answers are delivered
    peer: Inbound,
    far_end: FarEnd,
    write_log: WriteLog,
    // Number of writes that succeed before the port starts failing
    fail_after: Option<usize>,
}

#[cfg(test)]
impl MockSerialPort {
    /// Port whose far end answers each write with the next scripted reply
    pub fn scripted(replies: Vec<Vec<u8>>) -> (Link, WriteLog) {
        Self::with_far_end(Self::replies_per_write(replies), None)
    }

    pub fn silent() -> (Link, WriteLog) {
        Self::with_far_end(Box::new(|_| Vec::new()), None)
    }

    pub fn failing(fail_after: usize) -> (Link, WriteLog) {
        Self::with_far_end(Box::new(|_| Vec::new()), Some(fail_after))
    }

    pub fn with_far_end(far_end: FarEnd, fail_after: Option<usize>) -> (Link, WriteLog) {
        let inbound = Inbound::default();
        let write_log = WriteLog::default();
        let port = MockSerialPort {
            peer: inbound.clone(),
            far_end,
            write_log: write_log.clone(),
            fail_after,
        };
        (Link::new(Box::new(port), inbound), write_log)
    }

    /// Two links wired back to back: whatever one writes, the other reads.
    pub fn pair() -> (Link, Link) {
        let inbound_a = Inbound::default();
        let inbound_b = Inbound::default();
        let port_a = MockSerialPort {
            peer: inbound_b.clone(),
            far_end: Box::new(|b| b.to_vec()),
            write_log: WriteLog::default(),
            fail_after: None,
        };
        let port_b = MockSerialPort {
            peer: inbound_a.clone(),
            far_end: Box::new(|b| b.to_vec()),
            write_log: WriteLog::default(),
            fail_after: None,
        };
        (
            Link::new(Box::new(port_a), inbound_a),
            Link::new(Box::new(port_b), inbound_b),
        )
    }

    pub fn replies_per_write(replies: Vec<Vec<u8>>) -> FarEnd {
        let mut replies = std::collections::VecDeque::from(replies);
        Box::new(move |_| replies.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if let Some(remaining) = self.fail_after.as_mut() {
            if *remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Mock write failure"));
            }
            *remaining -= 1;
        }

        self.write_log.push(buf);
        let reply = (self.far_end)(buf);
        self.peer.deliver(&reply);
        Ok(())
    }
}

/// Frame-aware stand-in for an XMODEM receiver: collects written bytes into
/// whole packets (or single EOT/CAN bytes) and answers each with the next
/// scripted control byte. Frames listed in `silent` get no answer.
#[cfg(test)]
pub struct ScriptedReceiver {
    packet_len: usize,
    replies: std::collections::VecDeque<u8>,
    silent: Vec<usize>,
    pending: Vec<u8>,
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[cfg(test)]
impl ScriptedReceiver {
    pub fn new(mode: crate::packet::VerifyMode, replies: Vec<u8>) -> Self {
        ScriptedReceiver {
            packet_len: mode.packet_len(),
            replies: replies.into(),
            silent: Vec::new(),
            pending: Vec::new(),
            frames: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Leave the `frame`-th frame (0-based) unanswered
    pub fn silent_on(mut self, frame: usize) -> Self {
        self.silent.push(frame);
        self
    }

    pub fn frames(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.frames.clone()
    }

    fn accept(&mut self, frame: Vec<u8>) -> Option<u8> {
        let mut frames = self.frames.lock().unwrap();
        let index = frames.len();
        frames.push(frame);
        if self.silent.contains(&index) {
            None
        } else {
            self.replies.pop_front()
        }
    }

    pub fn into_far_end(mut self) -> FarEnd {
        use crate::protocol::{CAN, EOT};

        Box::new(move |bytes| {
            let mut out = Vec::new();
            for &b in bytes {
                if self.pending.is_empty() && (b == EOT || b == CAN) {
                    out.extend(self.accept(vec![b]));
                    continue;
                }
                self.pending.push(b);
                if self.pending.len() == self.packet_len {
                    let frame = std::mem::take(&mut self.pending);
                    out.extend(self.accept(frame));
                }
            }
            out
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
