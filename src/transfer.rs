//! Sending a file as a complete response.

use std::convert::TryFrom;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use thiserror::Error;

use crate::mime::MimeMap;
use crate::response::{write_error, Header, Status};

/// Upper bound for a single sendfile() call.
#[cfg(target_os = "linux")]
const SENDFILE_SIZE_LIMIT: usize = 1 << 20;

/// Size of the staging buffer used by the read/write loop.
const COPY_BUFFER_SIZE: usize = 1 << 14;

/// How file bytes get from the file to the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Kernel-assisted copy where the platform has one, otherwise `Copy`.
    Sendfile,
    /// Read into a bounded buffer and write it out.
    Copy,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Sendfile
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to send response: {0}")]
    Io(#[from] io::Error),
    #[error("file ended after {sent} of {expected} bytes")]
    Truncated { sent: u64, expected: u64 },
}

/// A response that was written in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    /// Header and body bytes.
    pub sent: u64,
}

/// Send `root/path` as a response on `out`.
///
/// Files that can't be served get an error reply and an `Ok` result, so the connection can carry
/// on. An `Err` means the response was abandoned part way and the connection must be closed.
pub fn serve<S: Write + AsRawFd>(
    out: &mut S,
    root: &Path,
    path: &str,
    mime_map: &MimeMap,
    strategy: Strategy,
) -> Result<Reply, TransferError> {
    let mut file = match OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(root.join(path))
    {
        Ok(file) => file,
        Err(e) => {
            let status = match e.kind() {
                io::ErrorKind::NotFound => Status::NotFound,
                io::ErrorKind::PermissionDenied => Status::Forbidden,
                _ => Status::InternalServerError,
            };
            return reply_error(out, status);
        }
    };

    let metadata = match file.metadata() {
        Ok(metadata) => metadata,
        Err(_) => return reply_error(out, Status::InternalServerError),
    };
    if metadata.is_dir() {
        // No listings; a directory looks the same as a missing file.
        return reply_error(out, Status::NotFound);
    } else if !metadata.is_file() {
        return reply_error(out, Status::Forbidden);
    }

    let header = Header {
        status: Status::Ok,
        content_type: mime_map.content_type(path),
        content_length: metadata.len(),
    }
    .to_string();
    out.write_all(header.as_bytes())?;

    let body_sent = match strategy {
        Strategy::Sendfile => send_file(out, &mut file, metadata.len())?,
        Strategy::Copy => copy_file(&mut file, out, metadata.len())?,
    };
    Ok(Reply {
        status: Status::Ok,
        sent: header.len() as u64 + body_sent,
    })
}

fn reply_error<W: Write>(out: &mut W, status: Status) -> Result<Reply, TransferError> {
    let sent = write_error(out, status)?;
    Ok(Reply { status, sent })
}

/// Copy exactly `len` bytes from `file` to `out` through a bounded buffer.
pub fn copy_file<R: Read, W: Write>(
    file: &mut R,
    out: &mut W,
    len: u64,
) -> Result<u64, TransferError> {
    let mut buf = [0; COPY_BUFFER_SIZE];
    let mut sent = 0;
    while sent < len {
        let want = usize::try_from(len - sent).map_or(buf.len(), |left| left.min(buf.len()));
        let read = match file.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(TransferError::Truncated {
                    sent,
                    expected: len,
                })
            }
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        // write_all resumes after short writes
        out.write_all(&buf[..read])?;
        sent += read as u64;
    }
    Ok(sent)
}

/// Safe wrapper for `libc::sendfile64`.
#[cfg(target_os = "linux")]
fn sendfile64(
    out_fd: std::os::unix::io::RawFd,
    in_fd: std::os::unix::io::RawFd,
    offset: Option<&mut libc::off64_t>,
    count: usize,
) -> nix::Result<usize> {
    let offset = offset
        .map(|offset| offset as *mut _)
        .unwrap_or(std::ptr::null_mut());
    let ret = unsafe { libc::sendfile64(out_fd, in_fd, offset, count) };
    nix::errno::Errno::result(ret).map(|r| r as usize)
}

/// Send exactly `len` bytes of `file` to `out` without staging them in userspace.
#[cfg(target_os = "linux")]
fn send_file<S: Write + AsRawFd>(
    out: &mut S,
    file: &mut File,
    len: u64,
) -> Result<u64, TransferError> {
    use nix::errno::Errno;

    // The kernel advances `offset`; the file position itself is left alone.
    let mut offset: libc::off64_t = 0;
    let mut sent = 0;
    while sent < len {
        let size = usize::try_from(len - sent).map_or(SENDFILE_SIZE_LIMIT, |left| {
            left.min(SENDFILE_SIZE_LIMIT)
        });
        match sendfile64(out.as_raw_fd(), file.as_raw_fd(), Some(&mut offset), size) {
            Ok(0) => {
                return Err(TransferError::Truncated {
                    sent,
                    expected: len,
                })
            }
            Ok(n) => sent += n as u64,
            Err(nix::Error::Sys(Errno::EINTR)) => {}
            Err(nix::Error::Sys(Errno::EINVAL)) | Err(nix::Error::Sys(Errno::ENOSYS))
                if sent == 0 =>
            {
                // this pair of descriptors can't do sendfile()
                return copy_file(file, out, len);
            }
            Err(e) => return Err(TransferError::Io(to_io_error(e))),
        }
    }
    Ok(sent)
}

#[cfg(not(target_os = "linux"))]
fn send_file<S: Write + AsRawFd>(
    out: &mut S,
    file: &mut File,
    len: u64,
) -> Result<u64, TransferError> {
    copy_file(file, out, len)
}

#[cfg(target_os = "linux")]
fn to_io_error(e: nix::Error) -> io::Error {
    match e {
        nix::Error::Sys(errno) => io::Error::from_raw_os_error(errno as i32),
        e => io::Error::new(io::ErrorKind::Other, e),
    }
}
