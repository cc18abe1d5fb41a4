//! Line-based I/O over pipes.
//!
//! Workers block on [`LineReader::read_line`]; the coordinator only ever
//! calls [`LineReader::poll_line`], which never waits.

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Buffer size for IPC (16KB). Messages are a few hundred bytes at most.
const BUFFER_SIZE: usize = 16 * 1024;

/// A file descriptor wrapper that implements Read/Write with EINTR handling.
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Create from a raw file descriptor (takes ownership).
    ///
    /// # Safety
    /// The caller must ensure `fd` is a valid file descriptor that can be owned.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Outcome of a non-blocking read attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum LineStatus {
    /// A complete line, without its terminator.
    Ready(String),
    /// Nothing to read yet.
    Pending,
    /// The other end closed the pipe.
    Closed,
}

/// Buffered line reader for IPC.
pub struct LineReader {
    reader: BufReader<PipeFd>,
    line_buffer: String,
}

impl LineReader {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, fd),
            line_buffer: String::with_capacity(512),
        }
    }

    /// Read a line, returning a reference to the internal buffer.
    /// Returns `None` on EOF.
    pub fn read_line(&mut self) -> io::Result<Option<&str>> {
        self.line_buffer.clear();
        if self.reader.read_line(&mut self.line_buffer)? == 0 {
            return Ok(None);
        }
        if self.line_buffer.ends_with('\n') {
            self.line_buffer.pop();
        }
        if self.line_buffer.ends_with('\r') {
            self.line_buffer.pop();
        }
        Ok(Some(&self.line_buffer))
    }

    /// Read a line only if one can be had without waiting.
    ///
    /// Writers send each message with a single `write(2)` well under
    /// `PIPE_BUF`, so a readable pipe always holds a whole line.
    pub fn poll_line(&mut self) -> io::Result<LineStatus> {
        if !self.reader.buffer().contains(&b'\n') && !self.readable()? {
            return Ok(LineStatus::Pending);
        }
        Ok(match self.read_line()? {
            Some(line) => LineStatus::Ready(line.to_string()),
            None => LineStatus::Closed,
        })
    }

    /// Zero-timeout poll on the underlying descriptor. A hung-up pipe counts
    /// as readable so the caller observes EOF.
    fn readable(&self) -> io::Result<bool> {
        let mut fds = [PollFd::new(self.reader.get_ref().as_fd(), PollFlags::POLLIN)];
        loop {
            match poll(&mut fds, PollTimeout::ZERO) {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    return Ok(fds[0].revents().is_some_and(|r| {
                        r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
                    }));
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

/// Buffered line writer for IPC.
pub struct LineWriter {
    writer: BufWriter<PipeFd>,
}

impl LineWriter {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: BufWriter::with_capacity(BUFFER_SIZE, fd),
        }
    }

    /// Write a line (appends newline if not present) and flush.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}
