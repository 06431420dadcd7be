//! Client side of one transfer: connect, send metadata, stream the payload

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::framing::send_exact;
use crate::net::{sendfile_to_stream, tune_socket};
use crate::progress::TransferProgress;
use crate::size_field::send_size;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub path: PathBuf,
    /// Server's name capacity; names this long or longer are refused locally
    pub max_name_len: usize,
    pub progress: bool,
}

#[derive(Clone, Debug)]
pub struct SendSummary {
    pub name: String,
    pub bytes: u64,
    pub seconds: f64,
}

/// Name placed on the wire: the last component of the local path.
/// `max_name_len` must match the server's `--max-name-len`.
pub fn wire_name(path: &Path, max_name_len: usize) -> Result<String> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("path has no file name: {}", path.display()))?;
    let name = name
        .to_str()
        .ok_or_else(|| anyhow!("file name is not valid UTF-8: {}", path.display()))?;
    if name.len() >= max_name_len {
        // The server rejects these; fail before connecting
        anyhow::bail!(
            "file name too long: {} bytes (max: {})",
            name.len(),
            max_name_len.saturating_sub(1)
        );
    }
    Ok(name.to_string())
}

/// Send metadata (name length, name, size) in wire order
pub fn send_header<W: std::io::Write + ?Sized>(w: &mut W, name: &str, size: u64) -> Result<()> {
    send_size(w, name.len() as u64).context("send file name length")?;
    send_exact(w, name.as_bytes()).context("send file name")?;
    send_size(w, size).context("send file size")?;
    Ok(())
}

pub fn send_file(config: &ClientConfig) -> Result<SendSummary> {
    let start = Instant::now();
    let name = wire_name(&config.path, config.max_name_len)?;

    let addr = format!("{}:{}", config.host, config.port);
    let mut stream = TcpStream::connect(&addr).with_context(|| format!("connect {}", addr))?;
    tune_socket(&stream);

    let size = std::fs::metadata(&config.path)
        .with_context(|| format!("stat {}", config.path.display()))?
        .len();

    send_header(&mut stream, &name, size)?;

    let file = File::open(&config.path)
        .with_context(|| format!("open {}", config.path.display()))?;

    let progress = TransferProgress::new(&name, size, config.progress);
    sendfile_to_stream(&file, &stream, size, &mut |n| progress.advance(n))
        .with_context(|| format!("send payload to {}", addr))?;
    let sent = progress.position();
    progress.finish();

    // Both handles close on drop; the peer sees EOF after the last byte
    drop(file);
    drop(stream);

    Ok(SendSummary {
        name,
        bytes: sent,
        seconds: start.elapsed().as_secs_f64(),
    })
}
