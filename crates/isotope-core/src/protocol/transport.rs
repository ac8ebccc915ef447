//! Line transport over a [`CommunicationChannel`]
//!
//! The transport owns the physical link. The link is split in two handles
//! right after it is opened: the write half stays here behind a mutex (one
//! physical line at a time), the read half is handed to the reader task as a
//! [`LineReader`] and never touched by anything else.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::Span;

use super::serial::open_port;
use super::stream::{CommunicationChannel, SerialChannel, TcpChannel};
use super::{IsotopeError, Result, MAX_FRAME_SIZE};

/// Address prefix selecting a TCP serial bridge instead of a local device
pub const TCP_PREFIX: &str = "tcp://";

type Channel = Box<dyn CommunicationChannel>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A writer panicking mid-line leaves nothing half-updated in the guarded data
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owner of the link to the board
pub struct Transport {
    writer: Mutex<Option<Channel>>,
    reader: Mutex<Option<Channel>>,
    open: AtomicBool,
    span: Span,
}

impl Transport {
    /// Create a closed transport
    pub fn new(span: Span) -> Self {
        Self {
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            open: AtomicBool::new(false),
            span,
        }
    }

    /// Open the device at `address`: a serial device path, or `tcp://host:port`
    pub fn open(&self, address: &str, baud_rate: u32, read_timeout: Duration) -> Result<()> {
        if self.is_open() {
            return Err(IsotopeError::AlreadyConnected);
        }

        let channel: Channel = if let Some(host) = address.strip_prefix(TCP_PREFIX) {
            let stream = TcpStream::connect(host)
                .map_err(|e| IsotopeError::ConnectionFailed(format!("{}: {}", address, e)))?;
            stream.set_nodelay(true)?;
            Box::new(TcpChannel::new(stream))
        } else {
            Box::new(SerialChannel::new(open_port(address, baud_rate, read_timeout)?))
        };

        tracing::debug!(parent: &self.span, address, baud_rate, "link opened");
        self.attach(channel, read_timeout)
    }

    /// Use an already open channel (simulated board, custom links)
    pub fn attach(&self, mut channel: Channel, read_timeout: Duration) -> Result<()> {
        if self.is_open() {
            return Err(IsotopeError::AlreadyConnected);
        }

        channel.set_timeout(read_timeout)?;
        channel.clear_input_buffer()?;
        let read_half = channel.try_clone()?;
        tracing::debug!(parent: &self.span, link = %channel.describe(), "link attached");

        *lock(&self.reader) = Some(read_half);
        *lock(&self.writer) = Some(channel);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Hand the read half to the (single) reader. Returns `None` once taken.
    pub fn take_reader(&self) -> Option<LineReader> {
        lock(&self.reader)
            .take()
            .map(|channel| LineReader::new(channel, self.span.clone()))
    }

    /// Close the link. Idempotent, never fails.
    pub fn close(&self) {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        if let Some(mut channel) = lock(&self.writer).take() {
            let _ = channel.flush();
        }
        lock(&self.reader).take();
        if was_open {
            tracing::debug!(parent: &self.span, "link closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Write exactly one frame
    pub fn write_line(&self, line: &str) -> Result<()> {
        self.write_line_with(|| ((), line.to_string()))
    }

    /// Build and write a frame while holding the write lock.
    ///
    /// `build` runs under the lock, so anything it allocates (sequence
    /// numbers) is ordered exactly like the lines on the wire.
    pub fn write_line_with<T>(&self, build: impl FnOnce() -> (T, String)) -> Result<T> {
        let mut guard = lock(&self.writer);
        let channel = match guard.as_mut() {
            Some(channel) if self.is_open() => channel,
            _ => return Err(IsotopeError::NotConnected),
        };

        let (value, line) = build();
        channel
            .write_all(line.as_bytes())
            .and_then(|_| channel.flush())
            .map_err(|e| IsotopeError::SerialError(e.to_string()))?;
        tracing::trace!(parent: &self.span, "Outgoing >> {}", line.trim_end());
        Ok(value)
    }
}

/// Read half of the link, splitting the byte stream into lines
pub struct LineReader {
    channel: Channel,
    buffer: Vec<u8>,
    span: Span,
}

impl LineReader {
    fn new(channel: Channel, span: Span) -> Self {
        Self {
            channel,
            buffer: Vec::with_capacity(256),
            span,
        }
    }

    /// Return one complete line (without terminator), or `None` if no complete
    /// line arrived before `timeout` elapsed. Partial data is kept for the next call.
    pub fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];

        loop {
            if let Some(line) = self.next_buffered_line() {
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            match self.channel.read(&mut chunk) {
                Ok(0) => {
                    return Err(IsotopeError::ConnectionFailed(
                        "link closed by the remote end".to_string(),
                    ))
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if self.buffer.len() > MAX_FRAME_SIZE && !self.buffer.contains(&b'\n') {
                        tracing::warn!(
                            parent: &self.span,
                            "discarding {} bytes without a line terminator",
                            self.buffer.len()
                        );
                        self.buffer.clear();
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(IsotopeError::IoError(e)),
            }
        }
    }

    fn next_buffered_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.buffer.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        Some(line)
    }
}
