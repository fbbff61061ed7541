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

//! XMODEM (checksum and CRC16) file transfer over a half-duplex serial link.
//!
//! A [`session::Session`] owns the lifecycle of one transfer at a time. While
//! a transfer runs, the link's inbound stream is claimed by a
//! [`arrival::ByteArrivalBuffer`] and the typestate machines in [`sender`] and
//! [`receiver`] pull bytes from it, building and checking blocks with
//! [`packet`] and writing through the chunking transport in [`rate_limit`].
//! Outside a transfer every received chunk is logged.

pub mod arrival;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod packet;
pub mod protocol;
pub mod rate_limit;
pub mod receiver;
pub mod sender;
pub mod serial;
pub mod session;
pub mod status;
pub mod storage;

pub use error::{Result, XmodemError};
