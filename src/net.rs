//! Socket setup and the file-to-socket payload path

use anyhow::{bail, Context, Result};
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::fs::File;
use std::io::Read;
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::time::Duration;

use crate::framing::send_exact;
#[cfg(target_os = "linux")]
use crate::protocol::SENDFILE_CHUNK;
use crate::protocol::COPY_BUFFER_SIZE;

/// Create, bind, and listen on an IPv4 TCP socket with an explicit backlog.
pub fn bind_listener(addr: SocketAddrV4, backlog: i32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).context("socket")?;
    // Restarting the server must not fail on sockets left in TIME_WAIT
    socket
        .set_reuse_address(true)
        .context("set SO_REUSEADDR")?;
    socket
        .bind(&SocketAddr::V4(addr).into())
        .with_context(|| format!("bind {}", addr))?;
    socket
        .listen(backlog)
        .with_context(|| format!("listen {} backlog={}", addr, backlog))?;
    Ok(socket.into())
}

/// Keepalive settings for transfer sockets: first check after 60s idle, then every 10s, 6 tries
pub fn keepalive_params() -> TcpKeepalive {
    let ka = TcpKeepalive::new().with_time(Duration::from_secs(60));
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
    let ka = ka.with_interval(Duration::from_secs(10)).with_retries(6);
    ka
}

// Socket tuning: disable Nagle and enable keepalive so dead peers are noticed
pub fn tune_socket(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let _ = SockRef::from(stream).set_tcp_keepalive(&keepalive_params());
}

/// Send exactly `len` bytes of `file` (from its current position) to `stream`.
/// `on_progress` is called with the byte count of every completed step.
#[cfg(target_os = "linux")]
pub fn sendfile_to_stream(
    file: &File,
    stream: &TcpStream,
    len: u64,
    on_progress: &mut dyn FnMut(u64),
) -> Result<u64> {
    use std::os::fd::AsRawFd;
    let in_fd = file.as_raw_fd();
    let out_fd = stream.as_raw_fd();
    let mut remaining = len;
    while remaining > 0 {
        let to_send = remaining.min(SENDFILE_CHUNK as u64) as usize;
        let sent = unsafe { libc::sendfile(out_fd, in_fd, std::ptr::null_mut(), to_send) };
        if sent < 0 {
            let e = std::io::Error::last_os_error();
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e).context("sendfile");
        }
        if sent == 0 {
            bail!("source file ended after {} of {} bytes", len - remaining, len);
        }
        remaining -= sent as u64;
        on_progress(sent as u64);
    }
    Ok(len)
}

#[cfg(not(target_os = "linux"))]
pub fn sendfile_to_stream(
    file: &File,
    stream: &TcpStream,
    len: u64,
    on_progress: &mut dyn FnMut(u64),
) -> Result<u64> {
    let mut f = file;
    let mut s = stream;
    copy_to_stream(&mut f, &mut s, len, on_progress)
}

/// Buffered read/send loop for exactly `len` bytes
pub fn copy_to_stream<R: Read + ?Sized, W: std::io::Write + ?Sized>(
    src: &mut R,
    dst: &mut W,
    len: u64,
    on_progress: &mut dyn FnMut(u64),
) -> Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE.min(len.max(1) as usize)];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match src.read(&mut buf[..want]) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("read source file"),
        };
        if n == 0 {
            bail!("source file ended after {} of {} bytes", len - remaining, len);
        }
        send_exact(dst, &buf[..n]).context("send payload")?;
        remaining -= n as u64;
        on_progress(n as u64);
    }
    Ok(len)
}
