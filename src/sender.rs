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
use crate::packet::{build_packet, VerifyMode};
use crate::protocol::*;
use crate::rate_limit::RateLimitConfig;
use crate::status::CancelToken;

// ============================================================================
// States
// ============================================================================

pub struct AwaitHandshake;
pub struct SendingBlock;
pub struct AwaitAck;
pub struct SendEot;
pub struct AwaitEotAck;

// ============================================================================
// FSM Structure
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub blocks: u32,
    pub bytes: usize,
    pub verify: VerifyMode,
    /// Rate limit in effect when the transfer finished (escalated on trouble)
    pub rate_limit: RateLimitConfig,
}

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    channel: Channel,
    config: TransferConfig,
    rate_limit: RateLimitConfig,
    data: Vec<u8>,
    offset: usize,
    block_number: u8,
    blocks_sent: u32,
    mode: VerifyMode,
    retries: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub enum SenderStep {
    Continue(Box<dyn SenderState>),
    Complete(UploadReport),
}

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<SenderStep>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        debug!("sender: {} -> {}", state_name::<S>(), state_name::<T>());
        Box::new(SenderFsm {
            state: PhantomData,
            channel: self.channel,
            config: self.config,
            rate_limit: self.rate_limit,
            data: self.data,
            offset: self.offset,
            block_number: self.block_number,
            blocks_sent: self.blocks_sent,
            mode: self.mode,
            retries: self.retries,
        })
    }

    /// Next block if any payload is left, otherwise end of transmission
    fn advance(self) -> SenderStep {
        if self.offset < self.data.len() {
            SenderStep::Continue(self.transition::<SendingBlock>())
        } else {
            SenderStep::Continue(self.transition::<SendEot>())
        }
    }

    fn complete(self) -> SenderStep {
        self.channel.status.set_progress(100);
        SenderStep::Complete(UploadReport {
            blocks: self.blocks_sent,
            bytes: self.data.len(),
            verify: self.mode,
            rate_limit: self.rate_limit,
        })
    }
}

fn state_name<S>() -> &'static str {
    let type_name = std::any::type_name::<S>();
    type_name.split("::").last().unwrap_or(type_name)
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<AwaitHandshake> {
    fn step(self: Box<Self>) -> Result<SenderStep> {
        let mut fsm = *self;

        match fsm.channel.recv(fsm.config.timeouts.handshake) {
            Ok(CRC_REQUEST) => {
                fsm.mode = VerifyMode::Crc16;
                fsm.channel.status.set_message("Receiver requested CRC. Sending...");
            }
            Ok(NAK) => {
                fsm.mode = VerifyMode::Checksum;
                fsm.channel.status.set_message("Receiver requested Checksum. Sending...");
            }
            Ok(other) => return Err(XmodemError::HandshakeUnexpectedByte(other)),
            Err(e) if e.is_timeout() => return Err(XmodemError::HandshakeTimeout),
            Err(e) => return Err(e),
        }

        Ok(fsm.advance())
    }
}

impl SenderState for SenderFsm<SendingBlock> {
    fn step(self: Box<Self>) -> Result<SenderStep> {
        let fsm = *self;

        let end = (fsm.offset + BLOCK_SIZE).min(fsm.data.len());
        let packet = build_packet(fsm.block_number, &fsm.data[fsm.offset..end], fsm.mode);
        fsm.channel.send_paced(&packet, &fsm.rate_limit)?;
        debug!("Sent block {} (attempt {})", fsm.block_number, fsm.retries + 1);

        Ok(SenderStep::Continue(fsm.transition::<AwaitAck>()))
    }
}

impl SenderState for SenderFsm<AwaitAck> {
    fn step(self: Box<Self>) -> Result<SenderStep> {
        let mut fsm = *self;

        match fsm.channel.recv(fsm.config.timeouts.response) {
            Ok(ACK) => {
                debug!("Received: ACK for block {}", fsm.block_number);
                fsm.offset += BLOCK_SIZE;
                fsm.block_number = fsm.block_number.wrapping_add(1);
                fsm.blocks_sent += 1;
                fsm.retries = 0;

                let percent = (fsm.offset as f64 / fsm.data.len() as f64 * 100.0).round();
                fsm.channel.status.set_progress(percent.min(100.0) as u8);
                fsm.channel.status.set_message(format!("Sending block {}...", fsm.block_number));
                fsm.channel.pause(fsm.config.ack_grace);

                Ok(fsm.advance())
            }
            Ok(NAK) => {
                fsm.retries += 1;
                fsm.channel.status.set_message(format!("NAK received. Retrying block {}...", fsm.block_number));
                fsm.escalate("NAK received");
                fsm.retry()
            }
            Ok(CRC_REQUEST) => {
                warn!("Receiver re-sent 'C' during block {}", fsm.block_number);
                fsm.retries += 1;
                fsm.retry()
            }
            Ok(other) => {
                warn!("Unexpected response 0x{:02X} to block {}", other, fsm.block_number);
                fsm.retries += 1;
                fsm.escalate("Unexpected response");
                fsm.retry()
            }
            Err(e) if e.is_timeout() => {
                fsm.retries += 1;
                fsm.channel.status.set_message(format!("Timeout. Retrying block {}...", fsm.block_number));
                fsm.escalate("Timeout");
                fsm.retry()
            }
            Err(e) => Err(e),
        }
    }
}

impl SenderFsm<AwaitAck> {
    /// Drop to the degraded rate limit for the rest of the transfer
    fn escalate(&mut self, reason: &str) {
        if self.rate_limit != RateLimitConfig::DEGRADED {
            self.rate_limit = RateLimitConfig::DEGRADED;
            self.channel.status.set_message(format!(
                "{}. Retrying block {} with rate limit...",
                reason, self.block_number
            ));
        }
    }

    fn retry(self) -> Result<SenderStep> {
        if self.retries >= self.config.max_retries {
            return Err(XmodemError::BlockRetriesExhausted { block: self.block_number });
        }
        Ok(SenderStep::Continue(self.transition::<SendingBlock>()))
    }
}

impl SenderState for SenderFsm<SendEot> {
    fn step(self: Box<Self>) -> Result<SenderStep> {
        let fsm = *self;
        fsm.channel.send(&[EOT])?;
        debug!("Sent: EOT");
        Ok(SenderStep::Continue(fsm.transition::<AwaitEotAck>()))
    }
}

impl SenderState for SenderFsm<AwaitEotAck> {
    fn step(self: Box<Self>) -> Result<SenderStep> {
        let fsm = *self;

        match fsm.channel.recv(fsm.config.timeouts.response) {
            Ok(ACK) => debug!("Received: ACK for EOT"),
            Ok(_) => {
                // Best-effort close: one more EOT, no second wait
                fsm.channel.send(&[EOT])?;
                debug!("EOT not acknowledged, sent EOT again");
            }
            Err(e) if e.is_timeout() => {
                fsm.channel.send(&[EOT])?;
                debug!("EOT timed out, sent EOT again");
            }
            Err(e) => return Err(e),
        }

        Ok(fsm.complete())
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl SenderFsm<AwaitHandshake> {
    /// `channel.buffer` must already be attached to `channel.link`.
    pub fn new(channel: Channel, data: Vec<u8>, config: TransferConfig) -> Box<dyn SenderState> {
        Box::new(SenderFsm {
            state: PhantomData::<AwaitHandshake>,
            channel,
            rate_limit: config.rate_limit,
            config,
            data,
            offset: 0,
            block_number: 1,
            blocks_sent: 0,
            mode: VerifyMode::Checksum,
            retries: 0,
        })
    }
}

/// Drive a sender to completion, checking `cancel` between steps.
pub fn run(mut state: Box<dyn SenderState>, cancel: &CancelToken) -> Result<UploadReport> {
    loop {
        if cancel.is_cancelled() {
            return Err(XmodemError::UserCancelled);
        }
        match state.step()? {
            SenderStep::Continue(next) => state = next,
            SenderStep::Complete(report) => return Ok(report),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
