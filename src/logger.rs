use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Server-side transfer events. Every method defaults to a no-op.
pub trait Logger: Send + Sync {
    fn listening(&self, _addr: &str) {}
    fn accepted(&self, _peer: &str) {}
    fn receiving(&self, _peer: &str, _name: &str, _size: u64) {}
    fn chunk(&self, _peer: &str, _len: usize) {}
    fn received(&self, _peer: &str, _path: &Path, _bytes: u64, _chunks: u64, _seconds: f64) {}
    fn error(&self, _context: &str, _peer: &str, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: Mutex::new(open_append(path.as_ref())?),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn listening(&self, addr: &str) {
        self.line(&format!("LISTEN addr={}", addr));
    }
    fn accepted(&self, peer: &str) {
        self.line(&format!("ACCEPT peer={}", peer));
    }
    fn receiving(&self, peer: &str, name: &str, size: u64) {
        self.line(&format!("START peer={} name={} size={}", peer, name, size));
    }
    fn received(&self, peer: &str, path: &Path, bytes: u64, chunks: u64, seconds: f64) {
        self.line(&format!(
            "DONE peer={} path={} bytes={} chunks={} seconds={:.3}",
            peer,
            path.display(),
            bytes,
            chunks,
            seconds
        ));
    }
    fn error(&self, context: &str, peer: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} peer={} msg={}", context, peer, msg));
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Failed,
}

/// One line of a JSONL transfer log
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransferLogEntry {
    pub timestamp: String,
    pub peer: String,
    pub path: Option<PathBuf>,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub chunks: u64,
    pub error: Option<String>,
}

/// Appends one JSON object per finished (or failed) transfer
pub struct JsonlLogger {
    file: Mutex<File>,
}

impl JsonlLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = open_append(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn add_entry(&self, entry: &TransferLogEntry) -> Result<()> {
        let mut f = self.file.lock();
        serde_json::to_writer(&mut *f, entry)?;
        f.write_all(b"\n")?;
        f.flush()?;
        Ok(())
    }
}

impl Logger for JsonlLogger {
    fn received(&self, peer: &str, path: &Path, bytes: u64, chunks: u64, _seconds: f64) {
        let _ = self.add_entry(&TransferLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            peer: peer.to_string(),
            path: Some(path.to_path_buf()),
            status: TransferStatus::Completed,
            bytes_transferred: bytes,
            chunks,
            error: None,
        });
    }
    fn error(&self, context: &str, peer: &str, msg: &str) {
        let _ = self.add_entry(&TransferLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            peer: peer.to_string(),
            path: None,
            status: TransferStatus::Failed,
            bytes_transferred: 0,
            chunks: 0,
            error: Some(format!("{}: {}", context, msg)),
        });
    }
}
