//! USB bulk transport, built on `rusb`.
//!
//! Grounded in the teacher's `adb_usb.rs` prototype (endpoint discovery by
//! interface triple, raw bulk read/write) and generalized with the
//! process-wide handle cache described in the design notes: opening the
//! same port-path twice forcibly closes the earlier handle instead of
//! racing it for the USB endpoint.

use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use crate::error::TransportError;
use crate::transport::{Transport, DEFAULT_TIMEOUT_MS};

/// Bus number followed by the port-number chain; identifies a physical USB
/// connection point independent of device re-enumeration.
pub type PortPath = Vec<u8>;

fn handle_cache() -> &'static Mutex<HashMap<PortPath, Weak<HandleGuard>>> {
    static CACHE: OnceLock<Mutex<HashMap<PortPath, Weak<HandleGuard>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Owns the live `rusb` handle for one port-path. Evicted entries have
/// their interface released and handle dropped by [`HandleGuard::force_close`]
/// before the new handle claims the interface.
struct HandleGuard {
    inner: Mutex<Option<DeviceHandle<Context>>>,
    interface_number: u8,
}

impl HandleGuard {
    fn force_close(&self) {
        if let Some(handle) = self.inner.lock().expect("handle guard poisoned").take() {
            let _ = handle.release_interface(self.interface_number);
        }
    }
}

/// Returns the device matcher path: bus number then port-number chain.
fn port_path_of(device: &Device<Context>) -> PortPath {
    let mut path = vec![device.bus_number()];
    path.extend(device.port_numbers().unwrap_or_default());
    path
}

pub struct UsbTransport {
    guard: Arc<HandleGuard>,
    read_endpoint: u8,
    write_endpoint: u8,
    timeout_ms: u32,
    usb_info: String,
}

/// How to pick one USB device out of several when opening a transport;
/// mirrors the CLI's `--serial`/`--port-path` selection flags (§6).
#[derive(Debug, Clone)]
pub enum DeviceSelector {
    /// Open the first device presenting the wanted interface.
    Any,
    /// Match by USB serial number string.
    Serial(String),
    /// Match by bus-number + port-number chain (see [`PortPath`]).
    PortPath(PortPath),
}

impl UsbTransport {
    /// Finds the first device presenting `interface` and matching
    /// `selector`, claims it, and evicts any previously cached handle for
    /// the same port-path.
    pub fn find_and_open(
        interface: (u8, u8, u8),
        selector: &DeviceSelector,
        timeout_ms: Option<u32>,
    ) -> Result<Self, TransportError> {
        let ctx = Context::new().map_err(|e| {
            TransportError::DeviceNotFound(format!("libusb initialization failed: {e}"))
        })?;
        let devices = ctx.devices().map_err(|e| {
            TransportError::DeviceNotFound(format!("listing USB devices failed: {e}"))
        })?;

        for device in devices.iter() {
            let config = match device.active_config_descriptor() {
                Ok(c) => c,
                Err(_) => continue,
            };
            if let DeviceSelector::PortPath(want) = selector {
                if &port_path_of(&device) != want {
                    continue;
                }
            }
            for iface in config.interfaces() {
                for setting in iface.descriptors() {
                    let this = (
                        setting.class_code(),
                        setting.sub_class_code(),
                        setting.protocol_code(),
                    );
                    if this != interface {
                        continue;
                    }
                    if let DeviceSelector::Serial(want_serial) = selector {
                        let handle = match device.open() {
                            Ok(h) => h,
                            Err(_) => continue,
                        };
                        let matches_serial = handle
                            .read_serial_number_string_ascii(&device.device_descriptor().unwrap())
                            .map(|s| &s == want_serial)
                            .unwrap_or(false);
                        if !matches_serial {
                            continue;
                        }
                    }

                    let mut read_endpoint = None;
                    let mut write_endpoint = None;
                    for ep in setting.endpoint_descriptors() {
                        if ep.transfer_type() != rusb::TransferType::Bulk {
                            continue;
                        }
                        if ep.direction() == rusb::Direction::In {
                            read_endpoint = Some(ep.address());
                        } else {
                            write_endpoint = Some(ep.address());
                        }
                    }
                    let (read_endpoint, write_endpoint) = match (read_endpoint, write_endpoint) {
                        (Some(r), Some(w)) => (r, w),
                        _ => continue,
                    };

                    return Self::claim(
                        device,
                        setting.interface_number(),
                        read_endpoint,
                        write_endpoint,
                        timeout_ms,
                    );
                }
            }
        }
        Err(TransportError::DeviceNotFound(
            "no device available, or it is in the wrong configuration".to_string(),
        ))
    }

    fn claim(
        device: Device<Context>,
        interface_number: u8,
        read_endpoint: u8,
        write_endpoint: u8,
        timeout_ms: Option<u32>,
    ) -> Result<Self, TransportError> {
        let port_path = port_path_of(&device);
        {
            let mut cache = handle_cache().lock().expect("handle cache poisoned");
            if let Some(old) = cache.get(&port_path).and_then(Weak::upgrade) {
                old.force_close();
            }
            cache.retain(|_, weak| weak.strong_count() > 0);
        }

        let mut handle = device
            .open()
            .map_err(|e| TransportError::DeviceNotFound(format!("opening USB device: {e}")))?;
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            let _ = handle.set_auto_detach_kernel_driver(true);
        }
        handle.claim_interface(interface_number).map_err(|e| {
            TransportError::DeviceNotFound(format!("claiming interface {interface_number}: {e}"))
        })?;

        let usb_info = device
            .device_descriptor()
            .ok()
            .and_then(|d| handle.read_serial_number_string_ascii(&d).ok())
            .unwrap_or_else(|| format!("{port_path:?}"));

        let guard = Arc::new(HandleGuard {
            inner: Mutex::new(Some(handle)),
            interface_number,
        });
        handle_cache()
            .lock()
            .expect("handle cache poisoned")
            .insert(port_path, Arc::downgrade(&guard));

        let transport = Self {
            guard,
            read_endpoint,
            write_endpoint,
            timeout_ms: timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            usb_info,
        };
        transport.flush_buffers();
        Ok(transport)
    }

    /// Drains any stale data left on the read endpoint from a previous
    /// session, mirroring `UsbHandle.FlushBuffers` in the original.
    fn flush_buffers(&self) {
        loop {
            match self.bulk_read(64, Some(10)) {
                Ok(data) if !data.is_empty() => continue,
                _ => break,
            }
        }
    }

    fn with_handle<R>(
        &self,
        f: impl FnOnce(&DeviceHandle<Context>) -> Result<R, rusb::Error>,
    ) -> Result<R, rusb::Error> {
        let guard = self.guard.inner.lock().expect("handle guard poisoned");
        match guard.as_ref() {
            Some(handle) => f(handle),
            None => Err(rusb::Error::NoDevice),
        }
    }
}

impl Transport for UsbTransport {
    fn bulk_write(&mut self, data: &[u8], timeout_ms: Option<u32>) -> Result<usize, TransportError> {
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(self.timeout_ms) as u64);
        self.with_handle(|h| h.write_bulk(self.write_endpoint, data, timeout))
            .map_err(|e| TransportError::WriteFailed {
                message: format!("could not send data to {} ({e})", self.usb_info),
                timed_out: e == rusb::Error::Timeout,
            })
    }

    fn bulk_read(&mut self, max_len: usize, timeout_ms: Option<u32>) -> Result<Vec<u8>, TransportError> {
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(self.timeout_ms) as u64);
        let mut buf = vec![0u8; max_len];
        let n = self
            .with_handle(|h| h.read_bulk(self.read_endpoint, &mut buf, timeout))
            .map_err(|e| TransportError::ReadFailed {
                message: format!("could not receive data from {} ({e})", self.usb_info),
                timed_out: e == rusb::Error::Timeout,
            })?;
        buf.truncate(n);
        Ok(buf)
    }

    fn default_timeout_ms(&self) -> u32 {
        self.timeout_ms
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.guard.force_close();
    }
}
