//! The transport seam: an opaque bidirectional byte pipe with a millisecond
//! timeout, as consumed by the ADB and Fastboot protocol layers. Two
//! concrete implementations exist, [`usb::UsbTransport`] and
//! [`tcp::TcpTransport`]; library code is generic over the [`Transport`]
//! trait so the protocol layers can be driven by an in-memory loopback in
//! tests.

pub mod tcp;
pub mod usb;

pub use tcp::TcpTransport;
pub use usb::{DeviceSelector, UsbTransport};

use crate::error::TransportError;

/// Default timeout applied when a call doesn't specify its own, in
/// milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 10_000;

/// Interface triple (class, subclass, protocol) USB devices must present to
/// be recognized as an ADB interface.
pub const ADB_INTERFACE: (u8, u8, u8) = (0xFF, 0x42, 0x01);

/// Interface triple for the Fastboot bootloader interface.
pub const FASTBOOT_INTERFACE: (u8, u8, u8) = (0xFF, 0x42, 0x03);

/// Default TCP port for `adb connect host:port`-style destinations.
pub const DEFAULT_TCP_PORT: u16 = 5555;

/// Either concrete transport, so the CLI can pick USB or TCP at runtime
/// without making every protocol type generic over a trait object. No other
/// variance is needed — §9 calls this "a small capability set... no other
/// variance".
pub enum AnyTransport {
    Usb(UsbTransport),
    Tcp(TcpTransport),
}

impl Transport for AnyTransport {
    fn bulk_write(&mut self, data: &[u8], timeout_ms: Option<u32>) -> Result<usize, TransportError> {
        match self {
            AnyTransport::Usb(t) => t.bulk_write(data, timeout_ms),
            AnyTransport::Tcp(t) => t.bulk_write(data, timeout_ms),
        }
    }

    fn bulk_read(&mut self, max_len: usize, timeout_ms: Option<u32>) -> Result<Vec<u8>, TransportError> {
        match self {
            AnyTransport::Usb(t) => t.bulk_read(max_len, timeout_ms),
            AnyTransport::Tcp(t) => t.bulk_read(max_len, timeout_ms),
        }
    }

    fn default_timeout_ms(&self) -> u32 {
        match self {
            AnyTransport::Usb(t) => t.default_timeout_ms(),
            AnyTransport::Tcp(t) => t.default_timeout_ms(),
        }
    }
}

/// A bidirectional bulk byte pipe. Not safe to drive from two streams or two
/// threads concurrently — see §5 of the design notes.
pub trait Transport {
    /// Write `data` to the device, returning the number of bytes actually
    /// written. `timeout_ms` overrides [`Transport::default_timeout_ms`] for
    /// this call only; `None` uses the default.
    fn bulk_write(&mut self, data: &[u8], timeout_ms: Option<u32>) -> Result<usize, TransportError>;

    /// Read up to `max_len` bytes. May return fewer bytes than requested if
    /// the underlying pipe fragments the response; never blocks past
    /// `timeout_ms` (or the default).
    fn bulk_read(&mut self, max_len: usize, timeout_ms: Option<u32>) -> Result<Vec<u8>, TransportError>;

    /// The timeout used when a call passes `None`.
    fn default_timeout_ms(&self) -> u32 {
        DEFAULT_TIMEOUT_MS
    }

    /// Reads exactly `buf.len()` bytes, issuing further `bulk_read` calls as
    /// needed when the transport fragments the response.
    fn read_exact(&mut self, buf: &mut [u8], timeout_ms: Option<u32>) -> Result<(), TransportError> {
        let mut read = 0;
        while read < buf.len() {
            let chunk = self.bulk_read(buf.len() - read, timeout_ms)?;
            if chunk.is_empty() {
                continue;
            }
            buf[read..read + chunk.len()].copy_from_slice(&chunk);
            read += chunk.len();
        }
        Ok(())
    }
}
