//! Borrowed socket transport
//!
//! The TLS engine needs a `Read + Write` stream underneath it. Sessions do
//! not own the caller's socket, so the engine is handed an [`FdTransport`]:
//! a borrowed descriptor plus byte counters. Dropping it never closes the
//! socket, and the borrow keeps the socket alive for as long as the
//! transport exists.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use socket2::SockRef;

/// Readiness the caller should wait for before retrying an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// Non-owning view of a connected, non-blocking socket.
///
/// Counts every byte that crosses the descriptor so sessions can report
/// raw (ciphertext) traffic.
#[derive(Debug)]
pub struct FdTransport<'a> {
    fd: BorrowedFd<'a>,
    bytes_read: u64,
    bytes_written: u64,
}

impl<'a> FdTransport<'a> {
    /// Borrow the descriptor of `socket` for the life of the transport
    pub fn new<S: AsFd>(socket: &'a S) -> Self {
        FdTransport {
            fd: socket.as_fd(),
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// The underlying descriptor
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Ciphertext bytes received so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Ciphertext bytes sent so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Whether the socket is in non-blocking mode
    pub fn is_nonblocking(&self) -> io::Result<bool> {
        let flags = unsafe { libc::fcntl(self.fd(), libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(flags & libc::O_NONBLOCK != 0)
    }

    fn socket(&self) -> SockRef<'_> {
        SockRef::from(&self.fd)
    }
}

impl AsFd for FdTransport<'_> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd
    }
}

impl AsRawFd for FdTransport<'_> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

impl Read for FdTransport<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (&*self.socket()).read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl Write for FdTransport<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = (&*self.socket()).write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Wait until `fd` is ready for `interest`.
///
/// Returns `Ok(false)` if the timeout expired first. `None` waits forever.
pub fn wait_ready(fd: RawFd, interest: Interest, timeout: Option<Duration>) -> io::Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match interest {
            Interest::Read => POLLIN,
            Interest::Write => POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = poll_timeout_ms(timeout);

    loop {
        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(result > 0);
    }
}

/// Milliseconds for `poll(2)`, rounded up so a non-zero timeout never
/// becomes an immediate return. -1 waits forever.
fn poll_timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        Some(d) => ((d.as_nanos() + 999_999) / 1_000_000).min(i32::MAX as u128) as i32,
        None => -1,
    }
}
