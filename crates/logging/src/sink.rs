//! Append-only file sink with a single numbered backup. When the file
//! grows past the configured size it is rotated to `<path>.1`, replacing
//! any previous backup.

use crate::logger::LogEntry;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

pub struct FileSink {
    path: PathBuf,
    max_bytes: u64,
    pretty: bool,
    file: Option<File>,
    written: u64,
}

impl FileSink {
    pub fn new(path: PathBuf, max_bytes: u64, pretty: bool) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes: max_bytes.max(1),
            pretty,
            file: Some(file),
            written,
        })
    }

    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn write_batch(&mut self, entries: &[LogEntry]) -> io::Result<()> {
        for entry in entries {
            let line = if self.pretty {
                entry.format_pretty()
            } else {
                serde_json::to_string(entry)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            };
            let file = self
                .file
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "sink closed"))?;
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
            self.written += line.len() as u64 + 1;
            if self.written > self.max_bytes {
                self.rotate()?;
            }
        }
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file = None;
        let backup = PathBuf::from(format!("{}.1", self.path.display()));
        // The previous backup, if any, is discarded by the rename.
        std::fs::rename(&self.path, &backup)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.file = Some(file);
        self.written = 0;
        Ok(())
    }
}
