//! Zero-copy file-to-socket streaming, normalized across platforms.
//!
//! Linux's `sendfile(2)` and macOS's `sendfile(2)` take different
//! argument orders and report progress differently (Linux updates an
//! in/out `off_t*`; macOS takes a separate input offset and an in/out
//! length). Both are wrapped here behind one `{done, would_block,
//! error}` contract so `response.rs` never touches a raw errno.

use std::os::fd::RawFd;

pub enum SendFileOutcome {
    Done,
    WouldBlock,
    Error(std::io::Error),
}

/// Streams up to `remaining` bytes from `src_fd` to `dest_fd`, starting
/// at `*offset`, advancing `*offset` by however much actually
/// transferred before returning. Loops across successive kernel calls
/// (mirroring `response::write_chunk`'s retry-while-accepted behavior)
/// until either `remaining` bytes have moved or the socket would block.
pub fn send_file(dest_fd: RawFd, src_fd: RawFd, offset: &mut u64, mut remaining: u64) -> SendFileOutcome {
    while remaining > 0 {
        match sendfile_once(dest_fd, src_fd, offset, remaining) {
            Ok(0) => return SendFileOutcome::Done,
            Ok(n) => remaining = remaining.saturating_sub(n as u64),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return SendFileOutcome::WouldBlock,
            Err(e) => return SendFileOutcome::Error(e),
        }
    }
    SendFileOutcome::Done
}

#[cfg(target_os = "linux")]
fn sendfile_once(dest_fd: RawFd, src_fd: RawFd, offset: &mut u64, count: u64) -> std::io::Result<usize> {
    let mut off: libc::off_t = *offset as libc::off_t;
    let ret = unsafe { libc::sendfile(dest_fd, src_fd, &mut off, count as libc::size_t) };
    *offset = off as u64;
    if ret < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(ret as usize)
}

#[cfg(target_os = "macos")]
fn sendfile_once(dest_fd: RawFd, src_fd: RawFd, offset: &mut u64, count: u64) -> std::io::Result<usize> {
    let mut len: libc::off_t = count as libc::off_t;
    // macOS: args are (file, socket, ...), the reverse of Linux's
    // (socket, file, ...); the input offset is read-only, `len` is the
    // in/out byte count.
    let ret = unsafe { libc::sendfile(src_fd, dest_fd, *offset as libc::off_t, &mut len, std::ptr::null_mut(), 0) };
    let transferred = len as u64;
    *offset += transferred;
    if ret < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(transferred as usize)
}

/// Portable fallback for Unix targets with no native zero-copy
/// primitive wired up above. Not used on Linux or macOS; kept so the
/// crate still builds elsewhere rather than hard-failing the platform
/// match.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn sendfile_once(dest_fd: RawFd, src_fd: RawFd, offset: &mut u64, count: u64) -> std::io::Result<usize> {
    use std::{
        io::{Read, Seek, Write},
        os::fd::FromRawFd,
    };

    let mut file = unsafe { std::fs::File::from_raw_fd(libc::dup(src_fd)) };
    file.seek(std::io::SeekFrom::Start(*offset))?;

    let mut buf = vec![0u8; count.min(64 * 1024) as usize];
    let n = file.read(&mut buf)?;
    std::mem::forget(file); // fd is a dup; the original owner still closes src_fd

    if n == 0 {
        return Ok(0);
    }

    let dest = unsafe { std::fs::File::from_raw_fd(libc::dup(dest_fd)) };
    let mut dest = dest;
    let written = dest.write(&buf[..n])?;
    std::mem::forget(dest);
    *offset += written as u64;
    Ok(written)
}
