//! TCP transport — same interface as [`super::usb::UsbTransport`], for
//! devices reachable over `adb connect host:port` (or a plain `host:port`
//! fastboot-over-tcp bridge).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::TransportError;
use crate::transport::{Transport, DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS};

pub struct TcpTransport {
    stream: TcpStream,
    serial: String,
    timeout_ms: u32,
}

impl TcpTransport {
    /// `serial` is `host` or `host:port`; `port` defaults to 5555.
    pub fn connect(serial: &str, timeout_ms: Option<u32>) -> Result<Self, TransportError> {
        let (host, port) = match serial.split_once(':') {
            Some((h, p)) => (
                h,
                p.parse::<u16>()
                    .map_err(|_| TransportError::DeviceNotFound(format!("bad port in {serial}")))?,
            ),
            None => (serial, DEFAULT_TCP_PORT),
        };
        let timeout = timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let stream = TcpStream::connect((host, port)).map_err(|e| {
            TransportError::DeviceNotFound(format!("connecting to {host}:{port}: {e}"))
        })?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            stream,
            serial: format!("{host}:{port}"),
            timeout_ms: timeout,
        })
    }

    fn timeout_duration(&self, timeout_ms: Option<u32>) -> Option<Duration> {
        let ms = timeout_ms.unwrap_or(self.timeout_ms);
        if ms == 0 {
            None
        } else {
            Some(Duration::from_millis(ms as u64))
        }
    }
}

impl Transport for TcpTransport {
    fn bulk_write(&mut self, data: &[u8], timeout_ms: Option<u32>) -> Result<usize, TransportError> {
        self.stream.set_write_timeout(self.timeout_duration(timeout_ms)).ok();
        let effective_timeout_ms = timeout_ms.unwrap_or(self.timeout_ms);
        self.stream.write(data).map_err(|e| {
            if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) {
                TransportError::TcpTimeout(format!("sending data to {}", self.serial), effective_timeout_ms)
            } else {
                TransportError::WriteFailed {
                    message: format!("could not send data to {} ({e})", self.serial),
                    timed_out: false,
                }
            }
        })
    }

    fn bulk_read(&mut self, max_len: usize, timeout_ms: Option<u32>) -> Result<Vec<u8>, TransportError> {
        self.stream.set_read_timeout(self.timeout_duration(timeout_ms)).ok();
        let effective_timeout_ms = timeout_ms.unwrap_or(self.timeout_ms);
        let mut buf = vec![0u8; max_len];
        let n = self.stream.read(&mut buf).map_err(|e| {
            if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) {
                TransportError::TcpTimeout(format!("reading from {}", self.serial), effective_timeout_ms)
            } else {
                TransportError::ReadFailed {
                    message: format!("could not receive data from {} ({e})", self.serial),
                    timed_out: false,
                }
            }
        })?;
        if n == 0 {
            return Err(TransportError::ReadFailed {
                message: format!("connection to {} closed", self.serial),
                timed_out: false,
            });
        }
        buf.truncate(n);
        Ok(buf)
    }

    fn default_timeout_ms(&self) -> u32 {
        self.timeout_ms
    }
}
