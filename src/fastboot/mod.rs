//! The Fastboot protocol: one bulk write per command, 64-byte
//! `INFO`/`OKAY`/`FAIL`/`DATA`-tagged responses (§4.4).

use crate::callback::{guarded_info, guarded_progress};
use crate::error::FastbootError;
use crate::transport::Transport;

/// A text line the bootloader sent back (`INFO` or the final `OKAY`
/// message).
#[derive(Debug, Clone)]
pub struct FastbootMessage {
    pub header: &'static str,
    pub message: String,
}

const RESPONSE_CHUNK: usize = 64;
const DEFAULT_CHUNK_KB: usize = 1024;

/// Drives the request/response framing for one Fastboot session. Generic
/// over [`Transport`] so it runs against USB, TCP, or a loopback in tests.
pub struct FastbootProtocol<T: Transport> {
    transport: T,
    chunk_kb: usize,
}

impl<T: Transport> FastbootProtocol<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            chunk_kb: DEFAULT_CHUNK_KB,
        }
    }

    /// Overrides the upload chunk size; older bootloaders sometimes need 4
    /// instead of the 1024 KiB default.
    pub fn with_chunk_kb(mut self, chunk_kb: usize) -> Self {
        self.chunk_kb = chunk_kb;
        self
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn send_command(&mut self, command: &str, arg: Option<&str>) -> Result<(), FastbootError> {
        let line = match arg {
            Some(arg) => format!("{command}:{arg}"),
            None => command.to_string(),
        };
        log::debug!("fastboot -> {line}");
        self.transport.bulk_write(line.as_bytes(), None)?;
        Ok(())
    }

    /// Reads 64-byte responses until `OKAY`, `FAIL`, or (if `expect_data`)
    /// `DATA`; routes `INFO` lines to `on_info` along the way.
    fn accept_responses(
        &mut self,
        expect_data: bool,
        mut on_info: impl FnMut(&FastbootMessage),
        timeout_ms: Option<u32>,
    ) -> Result<String, FastbootError> {
        loop {
            let response = self.transport.bulk_read(RESPONSE_CHUNK, timeout_ms)?;
            if response.len() < 4 {
                return Err(FastbootError::InvalidResponse {
                    header: String::from_utf8_lossy(&response).into_owned(),
                    trailing: Vec::new(),
                });
            }
            let header = String::from_utf8_lossy(&response[..4]).into_owned();
            let remaining = response[4..].to_vec();
            let remaining_str = String::from_utf8_lossy(&remaining).into_owned();
            log::debug!("fastboot <- {header}{remaining_str}");

            match header.as_str() {
                "INFO" => {
                    guarded_info(&mut on_info, &FastbootMessage {
                        header: "INFO",
                        message: remaining_str,
                    });
                }
                "OKAY" if !expect_data => {
                    guarded_info(&mut on_info, &FastbootMessage {
                        header: "OKAY",
                        message: remaining_str.clone(),
                    });
                    return Ok(remaining_str);
                }
                "DATA" if expect_data => return Ok(remaining_str),
                "OKAY" | "DATA" => {
                    return Err(FastbootError::StateMismatch {
                        expected: if expect_data { "DATA" } else { "OKAY" },
                        got: header,
                    })
                }
                "FAIL" => {
                    guarded_info(&mut on_info, &FastbootMessage {
                        header: "FAIL",
                        message: remaining_str.clone(),
                    });
                    return Err(FastbootError::RemoteFailure(remaining_str));
                }
                _ => {
                    return Err(FastbootError::InvalidResponse {
                        header,
                        trailing: remaining,
                    })
                }
            }
        }
    }

    fn simple_command(
        &mut self,
        command: &str,
        arg: Option<&str>,
        on_info: impl FnMut(&FastbootMessage),
        timeout_ms: Option<u32>,
    ) -> Result<String, FastbootError> {
        self.send_command(command, arg)?;
        self.accept_responses(false, on_info, timeout_ms)
    }

    /// `download:<size>` then a chunked bulk upload, used by [`download`](Self::download).
    fn handle_data_sending(
        &mut self,
        mut source: impl FnMut(&mut [u8]) -> std::io::Result<usize>,
        source_len: u32,
        mut on_info: impl FnMut(&FastbootMessage),
        mut on_progress: impl FnMut(u64, u64),
        timeout_ms: Option<u32>,
    ) -> Result<String, FastbootError> {
        let accepted_hex = self.accept_responses(true, &mut on_info, timeout_ms)?;
        let accepted_size = u32::from_str_radix(accepted_hex.get(..8).unwrap_or(""), 16)
            .map_err(|_| FastbootError::InvalidResponse {
                header: "DATA".to_string(),
                trailing: accepted_hex.clone().into_bytes(),
            })?;
        if accepted_size != source_len {
            return Err(FastbootError::TransferError {
                requested: source_len,
                accepted: accepted_size,
            });
        }

        let chunk_size = self.chunk_kb * 1024;
        let mut sent: u64 = 0;
        let mut buf = vec![0u8; chunk_size];
        let mut remaining = source_len as usize;
        while remaining > 0 {
            let want = remaining.min(chunk_size);
            let n = source(&mut buf[..want]).map_err(|e| FastbootError::Transport(
                crate::error::TransportError::WriteFailed {
                    message: format!("reading upload source: {e}"),
                    timed_out: false,
                },
            ))?;
            if n == 0 {
                break;
            }
            self.transport.bulk_write(&buf[..n], timeout_ms)?;
            sent += n as u64;
            remaining -= n;
            guarded_progress(&mut on_progress, sent, source_len as u64);
        }
        self.accept_responses(false, on_info, timeout_ms)
    }

    /// Downloads `data` to the device's staging buffer.
    pub fn download(
        &mut self,
        data: &[u8],
        on_info: impl FnMut(&FastbootMessage),
        on_progress: impl FnMut(u64, u64),
        timeout_ms: Option<u32>,
    ) -> Result<String, FastbootError> {
        self.send_command("download", Some(&format!("{:08x}", data.len())))?;
        let mut cursor = data;
        self.handle_data_sending(
            move |buf| std::io::Read::read(&mut cursor, buf),
            data.len() as u32,
            on_info,
            on_progress,
            timeout_ms,
        )
    }

    pub fn flash(
        &mut self,
        partition: &str,
        on_info: impl FnMut(&FastbootMessage),
        timeout_ms: Option<u32>,
    ) -> Result<String, FastbootError> {
        self.simple_command("flash", Some(partition), on_info, timeout_ms)
    }

    pub fn erase(&mut self, partition: &str, timeout_ms: Option<u32>) -> Result<(), FastbootError> {
        self.simple_command("erase", Some(partition), |_| {}, timeout_ms)?;
        Ok(())
    }

    pub fn getvar(
        &mut self,
        var: &str,
        on_info: impl FnMut(&FastbootMessage),
    ) -> Result<String, FastbootError> {
        self.simple_command("getvar", Some(var), on_info, None)
    }

    pub fn oem(
        &mut self,
        command: &str,
        on_info: impl FnMut(&FastbootMessage),
        timeout_ms: Option<u32>,
    ) -> Result<String, FastbootError> {
        self.simple_command(&format!("oem {command}"), None, on_info, timeout_ms)
    }

    pub fn cont(&mut self) -> Result<String, FastbootError> {
        self.simple_command("continue", None, |_| {}, None)
    }

    /// `reboot[:target_mode]`. Does not wait for the device to re-enumerate
    /// after rebooting — the bulk pipe is typically gone by the time the
    /// response would arrive, so a mismatched or missing `OKAY` here isn't
    /// treated as an error by callers (§9).
    pub fn reboot(&mut self, target_mode: Option<&str>, timeout_ms: Option<u32>) -> Result<String, FastbootError> {
        self.simple_command("reboot", target_mode, |_| {}, timeout_ms)
    }

    pub fn reboot_bootloader(&mut self, timeout_ms: Option<u32>) -> Result<String, FastbootError> {
        self.simple_command("reboot-bootloader", None, |_| {}, timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::collections::VecDeque;

    struct FakeTransport {
        inbound: VecDeque<Vec<u8>>,
        pub outbound: Vec<Vec<u8>>,
    }

    impl FakeTransport {
        fn new(responses: Vec<&[u8]>) -> Self {
            Self {
                inbound: responses.into_iter().map(|r| r.to_vec()).collect(),
                outbound: Vec::new(),
            }
        }
    }

    impl Transport for FakeTransport {
        fn bulk_write(&mut self, data: &[u8], _timeout_ms: Option<u32>) -> Result<usize, TransportError> {
            self.outbound.push(data.to_vec());
            Ok(data.len())
        }

        fn bulk_read(&mut self, _max_len: usize, _timeout_ms: Option<u32>) -> Result<Vec<u8>, TransportError> {
            self.inbound
                .pop_front()
                .ok_or_else(|| TransportError::ReadFailed {
                    message: "no more responses queued".to_string(),
                    timed_out: false,
                })
        }
    }

    #[test]
    fn getvar_returns_okay_payload() {
        let transport = FakeTransport::new(vec![b"OKAY0.4"]);
        let mut proto = FastbootProtocol::new(transport);
        let value = proto.getvar("version", |_| {}).unwrap();
        assert_eq!(value, "0.4");
        assert_eq!(proto.transport_mut().outbound[0], b"getvar:version");
    }

    #[test]
    fn flash_surfaces_remote_failure() {
        let transport = FakeTransport::new(vec![b"FAILpartition table doesn't exist"]);
        let mut proto = FastbootProtocol::new(transport);
        let err = proto.flash("boot", |_| {}, None).unwrap_err();
        assert!(matches!(err, FastbootError::RemoteFailure(_)));
    }

    #[test]
    fn download_rejects_size_mismatch() {
        let transport = FakeTransport::new(vec![b"DATA00000001"]);
        let mut proto = FastbootProtocol::new(transport);
        let err = proto.download(b"abcd", |_| {}, |_, _| {}, None).unwrap_err();
        assert!(matches!(
            err,
            FastbootError::TransferError { requested: 4, accepted: 1 }
        ));
    }

    #[test]
    fn download_accepts_matching_size_then_sends_payload() {
        let transport = FakeTransport::new(vec![b"DATA00000004", b"OKAY"]);
        let mut proto = FastbootProtocol::new(transport);
        let result = proto.download(b"abcd", |_| {}, |_, _| {}, None).unwrap();
        assert_eq!(result, "");
        assert_eq!(proto.transport_mut().outbound[1], b"abcd");
    }
}
