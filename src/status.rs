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

//! Status line, progress and cancellation shared between a running transfer and its caller

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub message: String,
    /// Percent of the payload acknowledged, 0..=100
    pub progress: u8,
    pub transferring: bool,
}

#[derive(Clone, Default)]
pub struct TransferStatus {
    inner: Arc<Mutex<StatusSnapshot>>,
}

impl TransferStatus {
    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.lock().message = message;
    }

    pub fn set_progress(&self, percent: u8) {
        self.lock().progress = percent.min(100);
    }

    pub fn set_transferring(&self, transferring: bool) {
        self.lock().transferring = transferring;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().clone()
    }
}

/// Cooperative abort request, checked between protocol steps and while
/// waiting for a byte
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    requested: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}
