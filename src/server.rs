//! Server side: accept loop and the per-connection receive session
//!
//! Connections are handled one at a time unless `concurrent` is set. A failed
//! transfer only ends its own connection; the accept loop keeps going.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::framing::{is_premature_close, recv_exact};
use crate::logger::Logger;
use crate::net::{bind_listener, tune_socket};
use crate::protocol::{
    ACCEPT_BACKOFF_MAX_MS, ACCEPT_BACKOFF_MIN_MS, LISTEN_BACKLOG, MAX_FILE_CHUNK_SIZE,
    MAX_FILE_NAME_SIZE,
};
use crate::protocol_core::{check_name_len, resolve_destination};
use crate::size_field::recv_size;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: Ipv4Addr,
    pub port: u16,
    /// Directory received files are written into
    pub root: PathBuf,
    pub chunk_size: usize,
    pub max_name_len: usize,
    pub concurrent: bool,
}

impl ServerConfig {
    pub fn new(port: u16, root: impl Into<PathBuf>) -> Self {
        Self {
            bind: Ipv4Addr::UNSPECIFIED,
            port,
            root: root.into(),
            chunk_size: MAX_FILE_CHUNK_SIZE,
            max_name_len: MAX_FILE_NAME_SIZE,
            concurrent: false,
        }
    }
}

/// Outcome of one completed receive
#[derive(Clone, Debug)]
pub struct ReceivedFile {
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub chunks: u64,
}

/// Metadata that precedes the payload
#[derive(Clone, Debug)]
pub struct Header {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Receive the name length, name, and file size.
/// The declared name length is checked before any name bytes are read.
pub fn recv_header<R: Read + ?Sized>(stream: &mut R, config: &ServerConfig) -> Result<Header> {
    let name_len = recv_size(stream).context("recv file name length")?;
    let name_len = check_name_len(name_len, config.max_name_len)?;

    let mut name = vec![0u8; name_len];
    recv_exact(stream, &mut name).context("recv file name")?;
    let path = resolve_destination(&config.root, &name)?;

    let size = recv_size(stream).context("recv file size")?;
    Ok(Header {
        name: String::from_utf8_lossy(&name).into_owned(),
        path,
        size,
    })
}

/// Read exactly `header.size` payload bytes in chunks of at most `chunk_size`.
///
/// Payload is staged in a temporary file next to the destination and renamed
/// over it after the last byte arrives, so a broken transfer leaves nothing behind.
/// A new file gets the usual umask-derived mode; an existing one keeps its mode.
/// Returns the number of chunks read.
pub fn recv_payload<R: Read + ?Sized>(
    stream: &mut R,
    header: &Header,
    chunk_size: usize,
    on_chunk: &mut dyn FnMut(usize),
) -> Result<u64> {
    let path = &header.path;
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    // Plain OpenOptions so the staged file is created like File::create would
    let mut staged = tempfile::Builder::new()
        .prefix(".sendfile-")
        .make_in(dir, |p| OpenOptions::new().write(true).create_new(true).open(p))
        .with_context(|| format!("create {}", path.display()))?;
    if let Ok(meta) = fs::metadata(path) {
        if meta.is_file() {
            staged
                .as_file()
                .set_permissions(meta.permissions())
                .with_context(|| format!("copy permissions of {}", path.display()))?;
        }
    }

    let mut buf = vec![0u8; chunk_size.max(1).min(header.size.max(1) as usize)];
    let mut remaining = header.size;
    let mut chunks = 0u64;
    while remaining > 0 {
        let n = remaining.min(buf.len() as u64) as usize;
        recv_exact(stream, &mut buf[..n]).context("recv payload")?;
        staged
            .write_all(&buf[..n])
            .with_context(|| format!("write {}", path.display()))?;
        remaining -= n as u64;
        chunks += 1;
        on_chunk(n);
    }

    staged
        .as_file()
        .sync_all()
        .with_context(|| format!("sync {}", path.display()))?;
    staged
        .persist(path)
        .with_context(|| format!("persist {}", path.display()))?;
    Ok(chunks)
}

/// Receive one complete file from `stream` into `config.root`.
pub fn receive_file<R: Read + ?Sized>(
    stream: &mut R,
    config: &ServerConfig,
    on_chunk: &mut dyn FnMut(usize),
) -> Result<ReceivedFile> {
    let header = recv_header(stream, config)?;
    let chunks = recv_payload(stream, &header, config.chunk_size, on_chunk)?;
    Ok(ReceivedFile {
        name: header.name,
        path: header.path,
        bytes: header.size,
        chunks,
    })
}

fn peer_name(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Run one accepted connection to completion. Errors are logged here and
/// never escape; the stream and any staged file are dropped on every path.
pub fn handle_conn(mut stream: TcpStream, config: &ServerConfig, logger: &dyn Logger) {
    tune_socket(&stream);
    let peer = peer_name(&stream);
    eprintln!("conn from {}", peer);
    logger.accepted(&peer);

    let start = Instant::now();
    let result = recv_header(&mut stream, config).and_then(|header| {
        eprintln!("receiving file: {} ({} bytes)...", header.name, header.size);
        logger.receiving(&peer, &header.name, header.size);
        let mut on_chunk = |n: usize| logger.chunk(&peer, n);
        let chunks = recv_payload(&mut stream, &header, config.chunk_size, &mut on_chunk)?;
        Ok((header, chunks))
    });
    match result {
        Ok((header, chunks)) => {
            let secs = start.elapsed().as_secs_f64();
            eprintln!(
                "received {} ({} bytes, {} chunks) from {} in {:.3}s",
                header.path.display(),
                header.size,
                chunks,
                peer,
                secs
            );
            logger.received(&peer, &header.path, header.size, chunks, secs);
        }
        Err(e) => {
            let ctx = if is_premature_close(&e) {
                "client disconnected"
            } else {
                "transfer failed"
            };
            eprintln!("{} ({}): {:#}", ctx, peer, e);
            logger.error(ctx, &peer, &format!("{:#}", e));
        }
    }
}

/// Pause after `consecutive` failed accepts in a row: doubles from
/// `ACCEPT_BACKOFF_MIN_MS` and stays at `ACCEPT_BACKOFF_MAX_MS`.
pub fn accept_backoff(consecutive: u32) -> Duration {
    let shift = consecutive.saturating_sub(1).min(16);
    let ms = ACCEPT_BACKOFF_MIN_MS.saturating_mul(1u64 << shift);
    Duration::from_millis(ms.min(ACCEPT_BACKOFF_MAX_MS))
}

/// Accept connections forever, handing each to `handle_conn`.
/// Persistent accept failures (e.g. EMFILE) back off instead of spinning.
pub fn serve_listener(
    listener: TcpListener,
    config: &ServerConfig,
    logger: Arc<dyn Logger>,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        eprintln!("waiting for connections on {} root={}", addr, config.root.display());
        logger.listening(&addr.to_string());
    }
    let mut accept_errors = 0u32;
    for conn in listener.incoming() {
        match conn {
            Ok(stream) => {
                accept_errors = 0;
                if config.concurrent {
                    let cfg = config.clone();
                    let lg = Arc::clone(&logger);
                    thread::spawn(move || handle_conn(stream, &cfg, lg.as_ref()));
                } else {
                    handle_conn(stream, config, logger.as_ref());
                }
            }
            Err(e) => {
                accept_errors = accept_errors.saturating_add(1);
                eprintln!("accept error: {}", e);
                logger.error("accept", "-", &e.to_string());
                thread::sleep(accept_backoff(accept_errors));
            }
        }
    }
    Ok(())
}

pub fn serve(config: &ServerConfig, logger: Arc<dyn Logger>) -> Result<()> {
    ensure_root(&config.root)?;
    let addr = SocketAddrV4::new(config.bind, config.port);
    let listener = bind_listener(addr, LISTEN_BACKLOG)?;
    serve_listener(listener, config, logger)
}

fn ensure_root(root: &Path) -> Result<()> {
    let meta = std::fs::metadata(root)
        .with_context(|| format!("root directory does not exist: {}", root.display()))?;
    if !meta.is_dir() {
        anyhow::bail!("root path is not a directory: {}", root.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::send_header;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn wire(name: &str, payload: &[u8]) -> Vec<u8> {
        let mut w = Vec::new();
        send_header(&mut w, name, payload.len() as u64).unwrap();
        w.extend_from_slice(payload);
        w
    }

    fn config(root: &Path, chunk_size: usize) -> ServerConfig {
        let mut cfg = ServerConfig::new(0, root);
        cfg.chunk_size = chunk_size;
        cfg
    }

    #[test]
    fn test_receive_empty_file() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path(), 16);
        let rf = receive_file(&mut Cursor::new(wire("empty.txt", b"")), &cfg, &mut |_| {}).unwrap();
        assert_eq!(rf.bytes, 0);
        assert_eq!(rf.chunks, 0);
        assert_eq!(std::fs::metadata(tmp.path().join("empty.txt")).unwrap().len(), 0);
    }

    #[test]
    fn test_receive_chunking() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path(), 16);

        let exact = vec![7u8; 16];
        let rf = receive_file(&mut Cursor::new(wire("exact.bin", &exact)), &cfg, &mut |_| {}).unwrap();
        assert_eq!(rf.chunks, 1);

        let over: Vec<u8> = (0..17u8).collect();
        let mut sizes = Vec::new();
        let rf = receive_file(&mut Cursor::new(wire("over.bin", &over)), &cfg, &mut |n| sizes.push(n))
            .unwrap();
        assert_eq!(rf.chunks, 2);
        assert_eq!(sizes, vec![16, 1]);
        assert_eq!(std::fs::read(tmp.path().join("over.bin")).unwrap(), over);
    }

    #[test]
    fn test_receive_truncates_existing_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f.txt"), b"old contents that are longer").unwrap();
        let cfg = config(tmp.path(), 1024);
        receive_file(&mut Cursor::new(wire("f.txt", b"new")), &cfg, &mut |_| {}).unwrap();
        assert_eq!(std::fs::read(tmp.path().join("f.txt")).unwrap(), b"new");
    }

    #[cfg(unix)]
    #[test]
    fn test_received_file_mode_matches_file_create() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path(), 1024);
        receive_file(&mut Cursor::new(wire("new.txt", b"hello")), &cfg, &mut |_| {}).unwrap();

        let reference = tmp.path().join("reference.txt");
        std::fs::File::create(&reference).unwrap();
        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&tmp.path().join("new.txt")), mode(&reference));
    }

    #[cfg(unix)]
    #[test]
    fn test_received_file_keeps_existing_mode() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("kept.txt");
        std::fs::write(&target, b"old").unwrap();
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o640)).unwrap();

        let cfg = config(tmp.path(), 1024);
        receive_file(&mut Cursor::new(wire("kept.txt", b"new")), &cfg, &mut |_| {}).unwrap();
        let meta = std::fs::metadata(&target).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn test_accept_backoff_doubles_up_to_cap() {
        assert_eq!(accept_backoff(1), Duration::from_millis(ACCEPT_BACKOFF_MIN_MS));
        assert_eq!(accept_backoff(2), Duration::from_millis(ACCEPT_BACKOFF_MIN_MS * 2));
        assert_eq!(accept_backoff(3), Duration::from_millis(ACCEPT_BACKOFF_MIN_MS * 4));
        assert_eq!(accept_backoff(1000), Duration::from_millis(ACCEPT_BACKOFF_MAX_MS));
        assert!(accept_backoff(u32::MAX) <= Duration::from_millis(ACCEPT_BACKOFF_MAX_MS));
    }

    #[test]
    fn test_oversized_name_rejected_before_reading_it() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path(), 1024);
        let name = "n".repeat(MAX_FILE_NAME_SIZE);
        let mut input = Cursor::new(wire(&name, b"data"));
        let err = receive_file(&mut input, &cfg, &mut |_| {}).unwrap_err();
        assert!(err.to_string().contains("too long"));
        // Only the length field was consumed
        assert_eq!(input.position() as usize, crate::protocol::SIZE_FIELD_WIDTH);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_truncated_payload_leaves_no_file() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path(), 4);
        let mut bytes = wire("partial.bin", &[1u8; 10]);
        bytes.truncate(bytes.len() - 3);
        let err = receive_file(&mut Cursor::new(bytes), &cfg, &mut |_| {}).unwrap_err();
        assert!(is_premature_close(&err));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_traversal_name_rejected() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path(), 64);
        let err = receive_file(&mut Cursor::new(wire("../escape", b"x")), &cfg, &mut |_| {})
            .unwrap_err();
        assert!(err.to_string().contains("path separator"));
    }

    #[test]
    fn test_serve_rejects_missing_root() {
        let tmp = TempDir::new().unwrap();
        let cfg = ServerConfig::new(0, tmp.path().join("missing"));
        let logger: Arc<dyn Logger> = Arc::new(crate::logger::NoopLogger);
        assert!(serve(&cfg, logger).is_err());
    }
}
