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

//! Persistence of a completed download

use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::warn;

/// Name used when no target was given or the target could not be written
pub const FALLBACK_FILENAME: &str = "received_file.bin";

pub trait Storage {
    /// Persist `data`, returning where it ended up
    fn save(&mut self, data: &[u8]) -> io::Result<PathBuf>;
}

/// Writes to `target` if given; otherwise, or if that fails, to
/// [`FALLBACK_FILENAME`] inside `fallback_dir`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    target: Option<PathBuf>,
    fallback_dir: PathBuf,
}

impl FileStorage {
    pub fn new(target: Option<PathBuf>, fallback_dir: impl Into<PathBuf>) -> Self {
        FileStorage {
            target,
            fallback_dir: fallback_dir.into(),
        }
    }

    fn fallback_path(&self) -> PathBuf {
        self.fallback_dir.join(FALLBACK_FILENAME)
    }
}

impl Storage for FileStorage {
    fn save(&mut self, data: &[u8]) -> io::Result<PathBuf> {
        if let Some(target) = &self.target {
            match fs::write(target, data) {
                Ok(()) => return Ok(target.clone()),
                Err(e) => warn!("Could not write {}: {}, falling back to {}", target.display(), e, FALLBACK_FILENAME),
            }
        }

        let path = self.fallback_path();
        fs::write(&path, data)?;
        Ok(path)
    }
}
