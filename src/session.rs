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

//! Transfer lifecycle on one link: at most one upload, download, raw send or
//! cancel sequence at a time. Uploads and downloads hold the link's inbound
//! stream for their whole duration.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use crate::cancel::{send_cancel, CancelOutcome};
use crate::channel::Channel;
use crate::config::TransferConfig;
use crate::error::{Result, XmodemError};
use crate::rate_limit::{send_with_rate_limit, Pacer, ThreadPacer};
use crate::receiver::{self, ReceiverFsm};
use crate::sender::{self, SenderFsm, UploadReport};
use crate::serial::Link;
use crate::status::{CancelToken, StatusSnapshot, TransferStatus};
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub blocks: u32,
    pub bytes: usize,
    pub saved_to: PathBuf,
}

pub struct Session {
    link: Link,
    config: TransferConfig,
    pacer: Arc<dyn Pacer>,
    status: TransferStatus,
    cancel: CancelToken,
    active: Arc<AtomicBool>,
}

/// Marks the session busy; cleared on every exit path
struct ActiveGuard {
    active: Arc<AtomicBool>,
    status: TransferStatus,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.status.set_transferring(false);
        self.active.store(false, Ordering::SeqCst);
    }
}

impl Session {
    pub fn new(link: Link, config: TransferConfig) -> Self {
        Session {
            link,
            config,
            pacer: Arc::new(ThreadPacer),
            status: TransferStatus::default(),
            cancel: CancelToken::default(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Handle for watching status from another thread
    pub fn status_handle(&self) -> TransferStatus {
        self.status.clone()
    }

    /// Handle for aborting the running upload or download. Pending reads
    /// notice it within `CANCEL_POLL`; a write in progress finishes first.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_transferring(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<ActiveGuard> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(XmodemError::SessionBusy);
        }

        self.cancel.reset();
        self.status.set_transferring(true);
        self.status.set_progress(0);
        Ok(ActiveGuard {
            active: self.active.clone(),
            status: self.status.clone(),
        })
    }

    fn channel(&self) -> Channel {
        Channel::new(self.link.clone(), self.pacer.clone(), self.status.clone())
            .with_cancel(self.cancel.clone())
    }

    /// Surface a failure on the status line before handing it back
    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.status.set_message(format!("Error: {}", e));
        }
        result
    }

    /// Send `data` to a receiver that is (or soon will be) waiting on the link.
    pub fn upload(&self, data: Vec<u8>) -> Result<UploadReport> {
        let _active = self.begin()?;
        self.status.set_message("Waiting for receiver (C)...");

        let channel = self.channel();
        let _claim = channel.buffer.attach(&self.link);
        let result = sender::run(SenderFsm::new(channel, data, self.config), &self.cancel);

        if let Ok(report) = &result {
            if report.rate_limit != self.config.rate_limit {
                info!(
                    "Link needed rate limiting: {} byte chunks, {} ms apart",
                    report.rate_limit.chunk_size,
                    report.rate_limit.delay_ms
                );
            }
            self.status.set_message("Transfer Complete!");
        }
        self.report(result)
    }

    /// Receive one file and hand it to `storage`.
    pub fn download(&self, storage: &mut dyn Storage) -> Result<DownloadReport> {
        let _active = self.begin()?;
        self.status.set_message("Ready to receive. Waiting for sender...");

        let channel = self.channel();
        let claim = channel.buffer.attach(&self.link);
        let received = receiver::run(ReceiverFsm::new(channel, self.config), &self.cancel);
        // Saving does not need the link
        drop(claim);

        let result = received.and_then(|payload| {
            let saved_to = storage.save(&payload.data).map_err(XmodemError::Storage)?;
            Ok(DownloadReport {
                blocks: payload.blocks,
                bytes: payload.data.len(),
                saved_to,
            })
        });

        if let Ok(report) = &result {
            self.status.set_message(format!("Download Complete! Saved to {}", report.saved_to.display()));
        }
        self.report(result)
    }

    /// Write `data` unframed, chunked by the configured rate limit.
    /// `on_progress` sees `(bytes_sent, total)` after every write. Inbound
    /// traffic keeps going to the log.
    pub fn send_raw(&self, data: &[u8], on_progress: &mut dyn FnMut(usize, usize)) -> Result<usize> {
        let _active = self.begin()?;
        if data.is_empty() {
            return Ok(0);
        }
        self.status.set_message(format!("Sending {} bytes...", data.len()));

        let rate = self.config.rate_limit;
        let status = &self.status;
        let result = send_with_rate_limit(
            |chunk| self.link.write(chunk),
            data,
            rate.effective_chunk_size(),
            rate.delay(),
            self.pacer.as_ref(),
            Some(&mut |sent: usize, total: usize| {
                status.set_progress((sent * 100 / total) as u8);
                on_progress(sent, total);
            }),
        )
        .map(|()| data.len())
        .map_err(XmodemError::from);

        if result.is_ok() {
            self.status.set_message(format!("Sent {} bytes", data.len()));
        }
        self.report(result)
    }

    /// Ask the far end to abort whatever it is doing.
    pub fn cancel_sequence(&self) -> Result<CancelOutcome> {
        let _active = self.begin()?;
        self.status.set_message("Sending Cancel sequence...");

        let result = send_cancel(&self.link, self.pacer.as_ref());
        if let Ok(outcome) = &result {
            if outcome.responded {
                self.status.set_message("Remote responded. Cancel sequence stopped.");
            } else {
                self.status.set_message("No response to Cancel sequence.");
            }
        }
        self.report(result)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::thread;
    use std::time::Duration;
    use crate::logging;
    use crate::protocol::FILLER;
    use crate::rate_limit::RecordingPacer;
    use crate::serial::MockSerialPort;

    #[derive(Default)]
    struct MemoryStorage {
        saved: Vec<u8>,
    }

    impl Storage for MemoryStorage {
        fn save(&mut self, data: &[u8]) -> io::Result<PathBuf> {
            self.saved = data.to_vec();
            Ok(PathBuf::from("memory"))
        }
    }

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn save(&mut self, _data: &[u8]) -> io::Result<PathBuf> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }
    }

    fn e2e_config() -> TransferConfig {
        let mut config = TransferConfig::default();
        config.timeouts.handshake = Duration::from_secs(5);
        config.timeouts.receive = Duration::from_millis(200);
        config.timeouts.byte = Duration::from_millis(500);
        config
    }

    #[test]
    fn test_end_to_end_crc_transfer() {
        logging::init_for_tests();
        let (sender_link, receiver_link) = MockSerialPort::pair();
        let content: Vec<u8> = (0..300).map(|i| (i * 7 % 256) as u8).collect();

        let sender = Session::new(sender_link, e2e_config());
        let upload = {
            let content = content.clone();
            thread::spawn(move || sender.upload(content))
        };

        // Give the sender time to claim its end before the first 'C'
        thread::sleep(Duration::from_millis(50));
        let receiver = Session::new(receiver_link, e2e_config());
        let mut storage = MemoryStorage::default();
        let download = receiver.download(&mut storage).expect("download should complete");

        let upload = upload.join().unwrap().expect("upload should complete");
        assert_eq!(upload.blocks, 3);
        assert_eq!(download.blocks, 3);
        assert_eq!(download.bytes, 384);

        assert_eq!(storage.saved.len(), 384);
        assert_eq!(&storage.saved[..300], &content[..]);
        assert!(storage.saved[300..].iter().all(|&b| b == FILLER));

        let status = receiver.status();
        assert!(status.message.starts_with("Download Complete!"));
        assert!(!status.transferring);
    }

    #[test]
    fn test_end_to_end_with_rate_limit() {
        let (sender_link, receiver_link) = MockSerialPort::pair();
        let content = b"rate limited payload".to_vec();

        let mut config = e2e_config();
        config.rate_limit.enabled = true;
        config.rate_limit.chunk_size = 16;
        config.rate_limit.delay_ms = 1;

        let sender = Session::new(sender_link, config);
        let upload = {
            let content = content.clone();
            thread::spawn(move || sender.upload(content))
        };

        thread::sleep(Duration::from_millis(50));
        let receiver = Session::new(receiver_link, e2e_config());
        let mut storage = MemoryStorage::default();
        receiver.download(&mut storage).unwrap();

        let upload = upload.join().unwrap().unwrap();
        assert_eq!(upload.rate_limit, config.rate_limit);
        assert_eq!(&storage.saved[..content.len()], &content[..]);
    }

    #[test]
    fn test_upload_failure_sets_status_and_releases_link() {
        let (link, _log) = MockSerialPort::silent();
        let mut config = TransferConfig::default();
        config.timeouts.handshake = Duration::from_millis(20);

        let session = Session::new(link.clone(), config);
        assert!(matches!(session.upload(vec![1, 2, 3]), Err(XmodemError::HandshakeTimeout)));

        let status = session.status();
        assert_eq!(status.message, "Error: Handshake timed out. Ensure receiver is ready.");
        assert!(!status.transferring);
        assert!(!session.is_transferring());
        assert!(!link.inbound().is_claimed());
    }

    #[test]
    fn test_storage_failure_is_reported() {
        let (sender_link, receiver_link) = MockSerialPort::pair();
        let sender = Session::new(sender_link, e2e_config());
        let upload = thread::spawn(move || sender.upload(b"x".to_vec()));

        thread::sleep(Duration::from_millis(50));
        let receiver = Session::new(receiver_link, e2e_config());
        assert!(matches!(
            receiver.download(&mut FailingStorage),
            Err(XmodemError::Storage(_))
        ));
        assert!(upload.join().unwrap().is_ok());
    }

    #[test]
    fn test_second_transfer_rejected_while_busy() {
        let (link, _log) = MockSerialPort::silent();
        let mut config = TransferConfig::default();
        config.timeouts.handshake = Duration::from_millis(500);

        let session = Arc::new(Session::new(link, config));
        let running = {
            let session = session.clone();
            thread::spawn(move || session.upload(vec![0; 10]))
        };

        thread::sleep(Duration::from_millis(100));
        assert!(session.is_transferring());
        assert!(matches!(session.cancel_sequence(), Err(XmodemError::SessionBusy)));
        assert!(matches!(
            session.download(&mut MemoryStorage::default()),
            Err(XmodemError::SessionBusy)
        ));

        assert!(running.join().unwrap().is_err());
        assert!(!session.is_transferring());
    }

    #[test]
    fn test_cancel_sequence_status() {
        let (link, log) = MockSerialPort::silent();
        let pacer = RecordingPacer::default();
        let session = Session::new(link, TransferConfig::default()).with_pacer(Arc::new(pacer.clone()));

        let outcome = session.cancel_sequence().unwrap();
        assert!(!outcome.responded);
        assert_eq!(log.writes().len(), 30);
        assert_eq!(pacer.pauses().len(), 30);
        assert_eq!(session.status().message, "No response to Cancel sequence.");
    }

    #[test]
    fn test_cancel_token_aborts_pending_download() {
        let (link, _log) = MockSerialPort::silent();
        let mut config = TransferConfig::default();
        config.timeouts.receive = Duration::from_secs(10);

        let session = Session::new(link.clone(), config);
        let cancel = session.cancel_token();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        assert!(matches!(
            session.download(&mut MemoryStorage::default()),
            Err(XmodemError::UserCancelled)
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!session.is_transferring());
        assert!(!link.inbound().is_claimed());
        handle.join().unwrap();
    }

    #[test]
    fn test_send_raw_uses_rate_limit_and_reports_progress() {
        let (link, log) = MockSerialPort::silent();
        let pacer = RecordingPacer::default();
        let mut config = TransferConfig::default();
        config.rate_limit.enabled = true;
        config.rate_limit.chunk_size = 10;
        config.rate_limit.delay_ms = 5;
        let session = Session::new(link.clone(), config).with_pacer(Arc::new(pacer.clone()));

        let data: Vec<u8> = (0..25).collect();
        let mut progress = Vec::new();
        let sent = session
            .send_raw(&data, &mut |sent: usize, total: usize| progress.push((sent, total)))
            .unwrap();

        assert_eq!(sent, 25);
        assert_eq!(log.writes().iter().map(Vec::len).collect::<Vec<_>>(), vec![10, 10, 5]);
        assert_eq!(log.bytes(), data);
        assert_eq!(progress, vec![(10, 25), (20, 25), (25, 25)]);
        assert_eq!(pacer.pauses(), vec![Duration::from_millis(5); 2]);

        let status = session.status();
        assert_eq!(status.progress, 100);
        assert_eq!(status.message, "Sent 25 bytes");
        assert!(!status.transferring);
        // Raw sends leave inbound traffic to the log
        assert!(!link.inbound().is_claimed());
    }

    #[test]
    fn test_send_raw_without_rate_limit_is_one_write() {
        let (link, log) = MockSerialPort::silent();
        let session = Session::new(link, TransferConfig::default());

        let mut calls = 0;
        session.send_raw(b"AT\r\n", &mut |_: usize, _: usize| calls += 1).unwrap();
        assert_eq!(log.writes(), vec![b"AT\r\n".to_vec()]);
        assert_eq!(calls, 1);

        assert_eq!(session.send_raw(&[], &mut |_: usize, _: usize| calls += 1).unwrap(), 0);
        assert_eq!(log.writes().len(), 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_send_raw_write_failure() {
        let (link, _log) = MockSerialPort::failing(1);
        let mut config = TransferConfig::default();
        config.rate_limit.enabled = true;
        config.rate_limit.chunk_size = 4;
        let session = Session::new(link, config).with_pacer(Arc::new(RecordingPacer::default()));

        assert!(matches!(
            session.send_raw(&[0u8; 16], &mut |_: usize, _: usize| {}),
            Err(XmodemError::LinkWriteFailure(_))
        ));
        assert!(session.status().message.starts_with("Error:"));
        assert!(!session.is_transferring());
    }
}
