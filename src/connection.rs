//! Stream transport to the relay controller.
//!
//! The serial-to-ethernet adaptor exposes a raw telnet-like TCP socket. Writes
//! from the poller and from callers share one mutex so lines never interleave.

use std::io;
use std::io::Read;
use std::io::Write;
use std::net::Shutdown;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use log::info;
use log::warn;

use crate::error::Error;
use crate::error::Result;
use crate::pencom_codec::LineBuffer;

const READ_CHUNK_SIZE: usize = 256;

pub trait Transport: Send + Sync {
    /// Writes `line` followed by a newline.
    fn send_line(&self, line: &str) -> Result<()>;

    /// Waits up to `timeout` for the next carriage-return terminated line.
    /// `Ok(None)` means the timeout elapsed.
    fn receive_line(&self, timeout: Duration) -> Result<Option<String>>;

    /// Releases the transport. Calling it again does nothing.
    fn close(&self);
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LineReader {
    stream: TcpStream,
    lines: LineBuffer,
}

pub struct TcpConnection {
    peer: String,
    writer: Mutex<Option<TcpStream>>,
    reader: Mutex<LineReader>,
    closed: AtomicBool,
}

impl TcpConnection {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpConnection> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::connect(host, port, e))?;

        let mut last_error = io::Error::new(
            io::ErrorKind::NotFound,
            "host did not resolve to any address",
        );
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    info!("Connected to relay controller at {}", addr);
                    return TcpConnection::from_stream(format!("{}:{}", host, port), stream)
                        .map_err(|e| match e {
                            Error::Io(e) => Error::connect(host, port, e),
                            e => e,
                        });
                }
                Err(e) => {
                    debug!("Connecting to {} failed: {}", addr, e);
                    last_error = e;
                }
            }
        }
        Err(Error::connect(host, port, last_error))
    }

    pub fn from_stream<S: Into<String>>(peer: S, stream: TcpStream) -> Result<TcpConnection> {
        stream.set_nodelay(true)?;
        let read_stream = stream.try_clone()?;
        Ok(TcpConnection {
            peer: peer.into(),
            writer: Mutex::new(Some(stream)),
            reader: Mutex::new(LineReader {
                stream: read_stream,
                lines: LineBuffer::new(),
            }),
            closed: AtomicBool::new(false),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Transport for TcpConnection {
    fn send_line(&self, line: &str) -> Result<()> {
        let mut writer = lock(&self.writer);
        let stream = writer.as_mut().ok_or(Error::Closed)?;

        debug!("SENDING: {}", line);
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        stream.write_all(&data)?;
        stream.flush()?;
        Ok(())
    }

    fn receive_line(&self, timeout: Duration) -> Result<Option<String>> {
        let mut reader = lock(&self.reader);
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_CHUNK_SIZE];

        loop {
            if let Some(line) = reader.lines.next_line() {
                debug!("RECEIVED: {}", line);
                return Ok(Some(line));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            reader.stream.set_read_timeout(Some(remaining))?;
            match reader.stream.read(&mut buf) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(n) => reader.lines.extend(&buf[..n]),
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted => {}
                    _ => return Err(e.into()),
                },
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = lock(&self.writer).take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                if e.kind() != io::ErrorKind::NotConnected {
                    warn!("Failed to shut down connection to {}: {}", self.peer, e);
                }
            }
        }
        info!("Closed connection to {}", self.peer);
    }
}
