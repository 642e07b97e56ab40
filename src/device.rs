//! High-level device facades: [`AdbDevice`] and [`FastbootDevice`].
//! Grounded in `adb_commands.py`'s `AdbCommands` and `fastboot.py`'s
//! `FastbootCommands` — the thin, memorable verbs a CLI or another tool
//! wants, built on top of the lower-level protocol/filesync/fastboot
//! modules.

use std::io::{Read, Write};
use std::path::Path;

use crate::error::{AdbError, FastbootError};
use crate::fastboot::{FastbootMessage, FastbootProtocol};
use crate::filesync::FilesyncConnection;
use crate::protocol::{AdbConnection, ShellSession};
use crate::signer::AuthSigner;
use crate::transport::Transport;

/// A connected, authenticated ADB session plus the convenience verbs
/// scripts actually call.
pub struct AdbDevice<T: Transport> {
    conn: AdbConnection<T>,
}

impl<T: Transport> AdbDevice<T> {
    pub fn connect(
        transport: T,
        signers: &[Box<dyn AuthSigner>],
        rsa_key_auth_timeout_ms: Option<u32>,
    ) -> Result<Self, AdbError> {
        let conn = AdbConnection::connect(transport, signers, rsa_key_auth_timeout_ms)?;
        Ok(Self { conn })
    }

    pub fn device_banner(&self) -> &str {
        &self.conn.device_banner
    }

    /// Runs `command` and returns its full output, matching `adb shell
    /// <command>`.
    pub fn shell(&mut self, command: &str) -> Result<String, AdbError> {
        let out = self.conn.command(&format!("shell:{command}"))?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Streams shell output to `on_output` as it arrives, for long-running
    /// commands like `logcat`.
    pub fn streaming_shell(
        &mut self,
        command: &str,
        on_output: impl FnMut(&[u8]),
    ) -> Result<(), AdbError> {
        self.conn.streaming_command(&format!("shell:{command}"), on_output)
    }

    /// Like [`streaming_shell`](Self::streaming_shell), but with no read
    /// timeout — for `logcat`, the one caller §5 names as explicitly opting
    /// into an unbounded wait between chunks.
    pub fn streaming_shell_unbounded(
        &mut self,
        command: &str,
        on_output: impl FnMut(&[u8]),
    ) -> Result<(), AdbError> {
        self.conn
            .streaming_command_with_timeout(&format!("shell:{command}"), on_output, Some(0))
    }

    /// Pumps `input` to an interactive `shell:` stream and forwards output
    /// to `on_output`, matching `adb shell` with no command (a pty-backed
    /// session on the device side).
    pub fn interactive_shell(
        &mut self,
        input: impl Read,
        on_output: impl FnMut(&[u8]),
    ) -> Result<(), AdbError> {
        crate::protocol::stream::interactive_shell(self.conn.transport_mut(), input, on_output)
    }

    /// Opens a persistent `shell:` session for scripted, one-command-at-a-time
    /// use (§4.2's `ShellSession`). The returned session borrows the
    /// connection's transport for its lifetime, so any other `AdbDevice`
    /// method call is rejected by the borrow checker until it is closed or
    /// dropped — the compile-time half of the single-stream constraint.
    pub fn open_shell_session(&mut self) -> Result<ShellSession<'_, T>, AdbError> {
        ShellSession::open(self.conn.transport_mut())
    }

    /// `STAT` on one on-device path.
    pub fn stat(&mut self, path: &str) -> Result<(u32, u32, u32), AdbError> {
        let mut stream = self.conn.open("sync:")?;
        FilesyncConnection::new(&mut stream).stat(path)
    }

    /// `LIST` on one on-device directory.
    pub fn list(&mut self, path: &str) -> Result<Vec<crate::filesync::DeviceFile>, AdbError> {
        let mut stream = self.conn.open("sync:")?;
        FilesyncConnection::new(&mut stream).list(path)
    }

    /// Pushes a single local file to a single on-device destination.
    pub fn push_file(&mut self, local: &Path, remote: &str, mtime: u32) -> Result<(), AdbError> {
        let mut source = std::fs::File::open(local)
            .map_err(|e| AdbError::PushFailed(format!("opening {}: {e}", local.display())))?;
        let mut stream = self.conn.open("sync:")?;
        FilesyncConnection::new(&mut stream).send_file(
            remote,
            crate::filesync::DEFAULT_PUSH_MODE,
            mtime,
            |buf| source.read(buf),
        )
    }

    /// Pulls a single on-device file to a single local destination.
    pub fn pull_file(&mut self, remote: &str, local: &Path) -> Result<(), AdbError> {
        let mut dest = std::fs::File::create(local)
            .map_err(|e| AdbError::PushFailed(format!("creating {}: {e}", local.display())))?;
        let mut stream = self.conn.open("sync:")?;
        FilesyncConnection::new(&mut stream).recv(remote, |chunk| {
            let _ = dest.write_all(chunk);
        })
    }

    /// Pushes `local_apk` to `dest_dir` (default `/data/local/tmp/` when
    /// empty), runs `pm install [-r] [-g] "<path>"` over `shell:`, then
    /// removes the pushed file, mirroring `AdbCommands.Install`.
    pub fn install(
        &mut self,
        local_apk: &Path,
        dest_dir: &str,
        replace: bool,
        grant_permissions: bool,
    ) -> Result<String, AdbError> {
        let dest_dir = if dest_dir.is_empty() {
            "/data/local/tmp/"
        } else {
            dest_dir
        };
        let file_name = local_apk
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AdbError::PushFailed(format!("{}: not a file path", local_apk.display())))?;
        let remote_path = format!("{}/{file_name}", dest_dir.trim_end_matches('/'));

        self.push_file(local_apk, &remote_path, 0)?;

        let mut flags = String::new();
        if replace {
            flags.push_str("-r ");
        }
        if grant_permissions {
            flags.push_str("-g ");
        }
        let result = self.shell(&format!("pm install {flags}\"{remote_path}\""));

        let _ = self.shell(&format!("rm \"{remote_path}\""));
        result
    }

    /// `pm uninstall [-k] "<package>"`, keeping the app's data/cache
    /// directories when `keep_data` is set.
    pub fn uninstall(&mut self, package_name: &str, keep_data: bool) -> Result<String, AdbError> {
        let flag = if keep_data { "-k " } else { "" };
        self.shell(&format!("pm uninstall {flag}\"{package_name}\""))
    }

    /// Reboots the device, optionally into `target_mode` (`"bootloader"`,
    /// `"recovery"`, or empty for a normal reboot). Per §9, does not wait
    /// for a response — the device tears down the USB/TCP pipe before one
    /// would arrive.
    pub fn reboot(&mut self, target_mode: &str) -> Result<(), AdbError> {
        let service = if target_mode.is_empty() {
            "reboot:".to_string()
        } else {
            format!("reboot:{target_mode}")
        };
        let _ = self.conn.open(&service)?;
        Ok(())
    }

    pub fn remount(&mut self) -> Result<String, AdbError> {
        let out = self.conn.command("remount:")?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    pub fn root(&mut self) -> Result<String, AdbError> {
        let out = self.conn.command("root:")?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    pub fn enable_verity(&mut self) -> Result<String, AdbError> {
        let out = self.conn.command("enable-verity:")?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    pub fn disable_verity(&mut self) -> Result<String, AdbError> {
        let out = self.conn.command("disable-verity:")?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    pub fn connection(&mut self) -> &mut AdbConnection<T> {
        &mut self.conn
    }
}

/// A Fastboot session plus the bootloader verbs a flashing tool calls.
pub struct FastbootDevice<T: Transport> {
    protocol: FastbootProtocol<T>,
}

impl<T: Transport> FastbootDevice<T> {
    pub fn new(transport: T) -> Self {
        Self {
            protocol: FastbootProtocol::new(transport),
        }
    }

    pub fn with_chunk_kb(mut self, chunk_kb: usize) -> Self {
        self.protocol = self.protocol.with_chunk_kb(chunk_kb);
        self
    }

    pub fn download(
        &mut self,
        data: &[u8],
        on_info: impl FnMut(&FastbootMessage),
        on_progress: impl FnMut(u64, u64),
    ) -> Result<String, FastbootError> {
        self.protocol.download(data, on_info, on_progress, None)
    }

    pub fn flash(&mut self, partition: &str) -> Result<String, FastbootError> {
        self.protocol.flash(partition, |_| {}, None)
    }

    /// Downloads the file at `path` then flashes it to `partition`, per
    /// `FastbootCommands.FlashFromFile`.
    pub fn flash_from_file(
        &mut self,
        partition: &str,
        path: &Path,
        on_progress: impl FnMut(u64, u64),
    ) -> Result<String, FastbootError> {
        let data = std::fs::read(path).map_err(|e| {
            FastbootError::Transport(crate::error::TransportError::WriteFailed {
                message: format!("reading {}: {e}", path.display()),
                timed_out: false,
            })
        })?;
        let download_resp = self.download(&data, |_| {}, on_progress)?;
        let flash_resp = self.flash(partition)?;
        Ok(download_resp + &flash_resp)
    }

    pub fn erase(&mut self, partition: &str) -> Result<(), FastbootError> {
        self.protocol.erase(partition, None)
    }

    pub fn getvar(&mut self, var: &str) -> Result<String, FastbootError> {
        self.protocol.getvar(var, |_| {})
    }

    pub fn oem(&mut self, command: &str) -> Result<String, FastbootError> {
        self.protocol.oem(command, |_| {}, None)
    }

    pub fn cont(&mut self) -> Result<String, FastbootError> {
        self.protocol.cont()
    }

    pub fn reboot(&mut self) -> Result<String, FastbootError> {
        self.protocol.reboot(None, None)
    }

    pub fn reboot_bootloader(&mut self) -> Result<String, FastbootError> {
        self.protocol.reboot_bootloader(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{AdbMessage, Cmd};
    use crate::protocol::stream::test_support::LoopbackTransport;

    const LOCAL_ID: u32 = 1;
    const REMOTE_ID: u32 = 2;

    fn filesync_packet(tag: &[u8; 4], header: &[u32], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&u32::from_le_bytes(*tag).to_le_bytes());
        for word in header {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(data);
        out
    }

    fn connected_loopback() -> LoopbackTransport {
        let mut transport = LoopbackTransport::new();
        transport.push_message(&AdbMessage::new(
            Cmd::Cnxn,
            0x0100_0000,
            4096,
            b"device::\0".to_vec(),
        ));
        transport
    }

    /// End-to-end push transcript (§8 scenario 4): one buffered `WRTE`
    /// carries `SEND`+`DATA`+`DONE`; the device first acks it at the ADB
    /// flow-control layer, then replies with its own `WRTE` carrying the
    /// filesync `OKAY`, then closes cleanly.
    #[test]
    fn push_file_matches_wire_transcript() {
        let content = b"alo there, govnah";
        let local = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(local.path(), content).unwrap();

        let mut transport = connected_loopback();
        transport.push_message(&AdbMessage::new(Cmd::Okay, REMOTE_ID, LOCAL_ID, Vec::new()));
        transport.push_message(&AdbMessage::new(Cmd::Okay, REMOTE_ID, LOCAL_ID, Vec::new()));
        let okay_packet = filesync_packet(b"OKAY", &[0], &[]);
        transport.push_message(&AdbMessage::new(Cmd::Wrte, REMOTE_ID, LOCAL_ID, okay_packet));
        transport.push_message(&AdbMessage::new(Cmd::Clse, REMOTE_ID, LOCAL_ID, Vec::new()));

        let mut dev = AdbDevice::connect(transport, &[], None).unwrap();
        dev.push_file(local.path(), "/data", 100).unwrap();

        let outbound = &dev.connection().transport_mut().outbound;
        let send_tag = u32::from_le_bytes(*b"SEND").to_le_bytes();
        let pos = outbound.windows(4).position(|w| w == send_tag).expect("SEND packet sent");
        let fileinfo_len = u32::from_le_bytes(outbound[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let fileinfo = &outbound[pos + 8..pos + 8 + fileinfo_len];
        assert_eq!(fileinfo, b"/data,33272");

        let data_tag = u32::from_le_bytes(*b"DATA").to_le_bytes();
        let pos = outbound.windows(4).position(|w| w == data_tag).expect("DATA packet sent");
        let data_len = u32::from_le_bytes(outbound[pos + 4..pos + 8].try_into().unwrap()) as usize;
        assert_eq!(&outbound[pos + 8..pos + 8 + data_len], content);

        let done_tag = u32::from_le_bytes(*b"DONE").to_le_bytes();
        let pos = outbound.windows(4).position(|w| w == done_tag).expect("DONE packet sent");
        let mtime = u32::from_le_bytes(outbound[pos + 4..pos + 8].try_into().unwrap());
        assert_eq!(mtime, 100);
    }

    /// End-to-end pull transcript (§8 scenario 5): one `WRTE` carries a
    /// `DATA` packet followed immediately by `DONE`.
    #[test]
    fn pull_file_matches_wire_transcript() {
        let payload = b"g'ddayta, govnah";

        let mut transport = connected_loopback();
        transport.push_message(&AdbMessage::new(Cmd::Okay, REMOTE_ID, LOCAL_ID, Vec::new()));
        transport.push_message(&AdbMessage::new(Cmd::Okay, REMOTE_ID, LOCAL_ID, Vec::new()));
        let mut wrte_payload = filesync_packet(b"DATA", &[payload.len() as u32], payload);
        wrte_payload.extend(filesync_packet(b"DONE", &[0], &[]));
        transport.push_message(&AdbMessage::new(Cmd::Wrte, REMOTE_ID, LOCAL_ID, wrte_payload));
        transport.push_message(&AdbMessage::new(Cmd::Clse, REMOTE_ID, LOCAL_ID, Vec::new()));

        let mut dev = AdbDevice::connect(transport, &[], None).unwrap();
        let local = tempfile::NamedTempFile::new().unwrap();
        dev.pull_file("/data", local.path()).unwrap();

        assert_eq!(std::fs::read(local.path()).unwrap(), payload);
    }
}
