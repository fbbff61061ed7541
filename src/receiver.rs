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

use std::marker::PhantomData;
use tracing::{debug, warn};
use crate::channel::Channel;
use crate::config::TransferConfig;
use crate::error::{Result, XmodemError};
use crate::packet::{validate_header, VerifyMode};
use crate::protocol::*;
use crate::status::CancelToken;

// ============================================================================
// States
// ============================================================================

pub struct SendHandshake;
pub struct AwaitSohOrEot;
pub struct ReadHeader;
pub struct ReadData;
pub struct ReadVerify;
pub struct Validate;

// ============================================================================
// FSM Structure
// ============================================================================

/// Accepted blocks, concatenated. Includes the sender's trailing filler since
/// XMODEM does not carry the original length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPayload {
    pub data: Vec<u8>,
    pub blocks: u32,
}

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    channel: Channel,
    config: TransferConfig,
    mode: VerifyMode,
    expected_block: u8,
    received: Vec<u8>,
    blocks: u32,
    block_number: u8,
    inverse: u8,
    block_buffer: [u8; BLOCK_SIZE],
    received_verify: u16,
    handshake_retries: u32,
    first_block_received: bool,
}

// ============================================================================
// Trait
// ============================================================================

pub enum ReceiverStep {
    Continue(Box<dyn ReceiverState>),
    Complete(ReceivedPayload),
}

pub trait ReceiverState: Send {
    fn step(self: Box<Self>) -> Result<ReceiverStep>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        debug!("receiver: {} -> {}", state_name::<S>(), state_name::<T>());
        Box::new(ReceiverFsm {
            state: PhantomData,
            channel: self.channel,
            config: self.config,
            mode: self.mode,
            expected_block: self.expected_block,
            received: self.received,
            blocks: self.blocks,
            block_number: self.block_number,
            inverse: self.inverse,
            block_buffer: self.block_buffer,
            received_verify: self.received_verify,
            handshake_retries: self.handshake_retries,
            first_block_received: self.first_block_received,
        })
    }

    fn await_next(self) -> ReceiverStep {
        ReceiverStep::Continue(self.transition::<AwaitSohOrEot>())
    }

    /// A wait failed. Before the first block this re-sends the handshake,
    /// afterwards the transfer is lost.
    fn read_failed(mut self, e: XmodemError) -> Result<ReceiverStep> {
        warn!("Receive loop error: {} (in state: {})", e, state_name::<S>());

        if self.first_block_received || matches!(e, XmodemError::UserCancelled) {
            return Err(e);
        }
        if self.handshake_retries >= self.config.max_retries {
            return Err(if e.is_timeout() { XmodemError::HandshakeTimeout } else { e });
        }

        self.handshake_retries += 1;
        self.channel.status.set_message("Retrying handshake...");
        self.channel.send(&[self.mode.handshake_byte()])?;
        Ok(self.await_next())
    }
}

fn state_name<S>() -> &'static str {
    let type_name = std::any::type_name::<S>();
    type_name.split("::").last().unwrap_or(type_name)
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<SendHandshake> {
    fn step(self: Box<Self>) -> Result<ReceiverStep> {
        let fsm = *self;
        fsm.channel.send(&[fsm.mode.handshake_byte()])?;
        debug!("Sent: handshake 0x{:02X}", fsm.mode.handshake_byte());
        Ok(fsm.await_next())
    }
}

impl ReceiverState for ReceiverFsm<AwaitSohOrEot> {
    fn step(self: Box<Self>) -> Result<ReceiverStep> {
        let fsm = *self;

        match fsm.channel.recv(fsm.config.timeouts.receive) {
            Ok(SOH) => Ok(ReceiverStep::Continue(fsm.transition::<ReadHeader>())),
            Ok(EOT) => {
                debug!("Received: EOT");
                fsm.channel.send(&[ACK])?;
                fsm.channel.status.set_progress(100);
                Ok(ReceiverStep::Complete(ReceivedPayload {
                    data: fsm.received,
                    blocks: fsm.blocks,
                }))
            }
            Ok(other) => {
                // Line noise, not worth a NAK
                debug!("Ignored unexpected byte: 0x{:02X}", other);
                Ok(ReceiverStep::Continue(Box::new(fsm)))
            }
            Err(e) => fsm.read_failed(e),
        }
    }
}

impl ReceiverState for ReceiverFsm<ReadHeader> {
    fn step(self: Box<Self>) -> Result<ReceiverStep> {
        let mut fsm = *self;

        let block_number = match fsm.channel.recv(fsm.config.timeouts.byte) {
            Ok(byte) => byte,
            Err(e) => return fsm.read_failed(e),
        };
        let inverse = match fsm.channel.recv(fsm.config.timeouts.byte) {
            Ok(byte) => byte,
            Err(e) => return fsm.read_failed(e),
        };
        fsm.block_number = block_number;
        fsm.inverse = inverse;

        Ok(ReceiverStep::Continue(fsm.transition::<ReadData>()))
    }
}

impl ReceiverState for ReceiverFsm<ReadData> {
    fn step(self: Box<Self>) -> Result<ReceiverStep> {
        let mut fsm = *self;

        for i in 0..BLOCK_SIZE {
            match fsm.channel.recv(fsm.config.timeouts.byte) {
                Ok(byte) => fsm.block_buffer[i] = byte,
                Err(e) => return fsm.read_failed(e),
            }
        }

        Ok(ReceiverStep::Continue(fsm.transition::<ReadVerify>()))
    }
}

impl ReceiverState for ReceiverFsm<ReadVerify> {
    fn step(self: Box<Self>) -> Result<ReceiverStep> {
        let mut fsm = *self;

        let mut value: u16 = 0;
        for _ in 0..fsm.mode.trailer_len() {
            match fsm.channel.recv(fsm.config.timeouts.byte) {
                Ok(byte) => value = (value << 8) | byte as u16,
                Err(e) => return fsm.read_failed(e),
            }
        }
        fsm.received_verify = value;

        Ok(ReceiverStep::Continue(fsm.transition::<Validate>()))
    }
}

impl ReceiverState for ReceiverFsm<Validate> {
    fn step(self: Box<Self>) -> Result<ReceiverStep> {
        let mut fsm = *self;

        if fsm.block_number != fsm.expected_block || !validate_header(fsm.block_number, fsm.inverse) {
            if fsm.block_number == fsm.expected_block.wrapping_sub(1) {
                debug!("Duplicate block {}, acknowledging", fsm.block_number);
                fsm.channel.send(&[ACK])?;
                return Ok(fsm.await_next());
            }

            warn!("Block number mismatch: expected {}, got {}", fsm.expected_block, fsm.block_number);
            fsm.channel.send(&[CAN])?;
            return Err(XmodemError::BlockSequenceError {
                expected: fsm.expected_block,
                got: fsm.block_number,
            });
        }

        let computed = fsm.mode.compute(&fsm.block_buffer);
        if computed != fsm.received_verify {
            let mismatch = XmodemError::VerifyMismatch {
                block: fsm.block_number,
                mode: fsm.mode,
                expected: computed,
                received: fsm.received_verify,
            };
            warn!("{}", mismatch);
            fsm.channel.send(&[NAK])?;
            return Ok(fsm.await_next());
        }

        fsm.received.extend_from_slice(&fsm.block_buffer);
        fsm.expected_block = fsm.expected_block.wrapping_add(1);
        fsm.blocks += 1;
        fsm.first_block_received = true;
        fsm.channel.send(&[ACK])?;
        fsm.channel.status.set_message(format!("Received block {}...", fsm.block_number));

        Ok(fsm.await_next())
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl ReceiverFsm<SendHandshake> {
    /// Always asks for CRC16; there is no fallback to checksum mode.
    /// `channel.buffer` must already be attached to `channel.link`.
    pub fn new(channel: Channel, config: TransferConfig) -> Box<dyn ReceiverState> {
        Box::new(ReceiverFsm {
            state: PhantomData::<SendHandshake>,
            channel,
            config,
            mode: VerifyMode::Crc16,
            expected_block: 1,
            received: Vec::new(),
            blocks: 0,
            block_number: 0,
            inverse: 0,
            block_buffer: [0; BLOCK_SIZE],
            received_verify: 0,
            handshake_retries: 0,
            first_block_received: false,
        })
    }
}

/// Drive a receiver to completion, checking `cancel` between steps.
pub fn run(mut state: Box<dyn ReceiverState>, cancel: &CancelToken) -> Result<ReceivedPayload> {
    loop {
        if cancel.is_cancelled() {
            return Err(XmodemError::UserCancelled);
        }
        match state.step()? {
            ReceiverStep::Continue(next) => state = next,
            ReceiverStep::Complete(payload) => return Ok(payload),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use crate::arrival::ArrivalClaim;
    use crate::packet::build_packet;
    use crate::rate_limit::RecordingPacer;
    use crate::serial::{MockSerialPort, WriteLog};
    use crate::status::TransferStatus;

    fn receiver(replies: Vec<Vec<u8>>) -> (Channel, WriteLog, ArrivalClaim) {
        let (link, log) = MockSerialPort::scripted(replies);
        let channel = Channel::new(link, Arc::new(RecordingPacer::default()), TransferStatus::default());
        let claim = channel.buffer.attach(&channel.link);
        (channel, log, claim)
    }

    fn fast_config() -> TransferConfig {
        let mut config = TransferConfig::default();
        config.timeouts.receive = Duration::from_millis(20);
        config.timeouts.byte = Duration::from_millis(20);
        config
    }

    fn crc_packet(block: u8, data: &[u8]) -> Vec<u8> {
        build_packet(block, data, VerifyMode::Crc16)
    }

    fn padded(data: &[u8]) -> Vec<u8> {
        let mut block = data.to_vec();
        block.resize(BLOCK_SIZE, FILLER);
        block
    }

    #[test]
    fn test_receiver_full_transfer() {
        let (channel, log, _claim) = receiver(vec![
            crc_packet(1, b"Test data"),
            vec![EOT],
        ]);

        let fsm = ReceiverFsm::new(channel, fast_config());
        let payload = run(fsm, &CancelToken::default()).expect("transfer should complete");

        assert_eq!(payload.blocks, 1);
        assert_eq!(payload.data, padded(b"Test data"));
        assert_eq!(log.bytes(), vec![CRC_REQUEST, ACK, ACK]);
    }

    #[test]
    fn test_receiver_multiple_blocks() {
        let content: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
        let (channel, log, _claim) = receiver(vec![
            crc_packet(1, &content[0..128]),
            crc_packet(2, &content[128..256]),
            crc_packet(3, &content[256..300]),
            vec![EOT],
        ]);

        let payload = run(ReceiverFsm::new(channel, fast_config()), &CancelToken::default()).unwrap();

        assert_eq!(payload.blocks, 3);
        assert_eq!(payload.data.len(), 384);
        assert_eq!(&payload.data[..300], &content[..]);
        assert!(payload.data[300..].iter().all(|&b| b == FILLER));
        assert_eq!(log.bytes(), vec![CRC_REQUEST, ACK, ACK, ACK, ACK]);
    }

    #[test]
    fn test_receiver_crc_mismatch_naks() {
        let good = crc_packet(1, b"payload");
        let mut bad = good.clone();
        bad[10] ^= 0xFF;

        let (channel, log, _claim) = receiver(vec![bad, good, vec![EOT]]);
        let payload = run(ReceiverFsm::new(channel, fast_config()), &CancelToken::default()).unwrap();

        assert_eq!(payload.data, padded(b"payload"));
        assert_eq!(log.bytes(), vec![CRC_REQUEST, NAK, ACK, ACK]);
    }

    #[test]
    fn test_receiver_duplicate_block_acked_not_stored() {
        let first = crc_packet(1, b"once");
        let (channel, log, _claim) = receiver(vec![first.clone(), first, vec![EOT]]);

        let payload = run(ReceiverFsm::new(channel, fast_config()), &CancelToken::default()).unwrap();

        assert_eq!(payload.blocks, 1);
        assert_eq!(payload.data, padded(b"once"));
        assert_eq!(log.bytes(), vec![CRC_REQUEST, ACK, ACK, ACK]);
    }

    #[test]
    fn test_receiver_out_of_sequence_cancels() {
        let (channel, log, _claim) = receiver(vec![
            crc_packet(1, b"one"),
            crc_packet(3, b"three"),
        ]);

        match run(ReceiverFsm::new(channel, fast_config()), &CancelToken::default()) {
            Err(XmodemError::BlockSequenceError { expected, got }) => {
                assert_eq!(expected, 2);
                assert_eq!(got, 3);
            }
            other => panic!("expected sequence error, got {:?}", other),
        }
        assert_eq!(log.bytes(), vec![CRC_REQUEST, ACK, CAN]);
    }

    #[test]
    fn test_receiver_bad_inverse_cancels() {
        let mut packet = crc_packet(1, b"one");
        packet[2] = 0x00;
        let (channel, log, _claim) = receiver(vec![packet]);

        assert!(matches!(
            run(ReceiverFsm::new(channel, fast_config()), &CancelToken::default()),
            Err(XmodemError::BlockSequenceError { expected: 1, got: 1 })
        ));
        assert_eq!(log.bytes(), vec![CRC_REQUEST, CAN]);
    }

    #[test]
    fn test_receiver_ignores_noise() {
        let mut noisy = vec![0xFF, 0x00, b'x'];
        noisy.extend(crc_packet(1, b"clean"));
        let (channel, log, _claim) = receiver(vec![noisy, vec![0x55, EOT]]);

        let payload = run(ReceiverFsm::new(channel, fast_config()), &CancelToken::default()).unwrap();
        assert_eq!(payload.data, padded(b"clean"));
        assert_eq!(log.bytes(), vec![CRC_REQUEST, ACK, ACK]);
    }

    #[test]
    fn test_receiver_handshake_retry() {
        let (channel, log, _claim) = receiver(vec![
            vec![],
            crc_packet(1, b"late"),
            vec![EOT],
        ]);

        let payload = run(ReceiverFsm::new(channel, fast_config()), &CancelToken::default()).unwrap();
        assert_eq!(payload.data, padded(b"late"));
        assert_eq!(log.bytes(), vec![CRC_REQUEST, CRC_REQUEST, ACK, ACK]);
    }

    #[test]
    fn test_receiver_partial_block_before_first_accept_retries() {
        let packet = crc_packet(1, b"retry");
        let (channel, log, _claim) = receiver(vec![
            packet[..50].to_vec(),
            packet.clone(),
            vec![EOT],
        ]);

        let payload = run(ReceiverFsm::new(channel, fast_config()), &CancelToken::default()).unwrap();
        assert_eq!(payload.data, padded(b"retry"));
        assert_eq!(log.bytes(), vec![CRC_REQUEST, CRC_REQUEST, ACK, ACK]);
    }

    #[test]
    fn test_receiver_handshake_exhausted() {
        let (channel, log, _claim) = receiver(vec![]);
        let mut config = fast_config();
        config.timeouts.receive = Duration::from_millis(5);

        assert!(matches!(
            run(ReceiverFsm::new(channel, config), &CancelToken::default()),
            Err(XmodemError::HandshakeTimeout)
        ));
        assert_eq!(log.bytes(), vec![CRC_REQUEST; 11]);
    }

    #[test]
    fn test_receiver_timeout_after_first_block_is_fatal() {
        let (channel, log, _claim) = receiver(vec![crc_packet(1, b"only")]);

        assert!(matches!(
            run(ReceiverFsm::new(channel, fast_config()), &CancelToken::default()),
            Err(XmodemError::Timeout(_))
        ));
        assert_eq!(log.bytes(), vec![CRC_REQUEST, ACK]);
    }

    #[test]
    fn test_receiver_cancel_during_wait_is_not_retried() {
        let (channel, log, _claim) = receiver(vec![]);
        let mut config = fast_config();
        config.timeouts.receive = Duration::from_secs(10);

        let cancel = channel.cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        assert!(matches!(
            run(ReceiverFsm::new(channel, config), &CancelToken::default()),
            Err(XmodemError::UserCancelled)
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(log.bytes(), vec![CRC_REQUEST]);
        handle.join().unwrap();
    }
}
