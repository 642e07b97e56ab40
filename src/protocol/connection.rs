//! `AdbConnection` — drives the `CNXN`/`AUTH` handshake over a [`Transport`]
//! and hands out [`AdbStream`]s one at a time (§4.1, §5).

use crate::error::AdbError;
use crate::protocol::message::{
    AdbMessage, Cmd, AUTH_RSAPUBLICKEY, AUTH_SIGNATURE, AUTH_TOKEN, VERSION,
};
use crate::protocol::stream::{read_message, read_message_with_timeout, AdbStream};
use crate::signer::AuthSigner;
use crate::transport::Transport;

const MAX_ADB_DATA: u32 = crate::protocol::message::MAX_ADB_DATA as u32;
const DEFAULT_BANNER: &str = "host::";

/// A connected, authenticated ADB session. Only one [`AdbStream`] may be
/// live at a time — every stream-opening method takes `&mut self` and
/// returns a value borrowing it, so the borrow checker enforces the
/// single-stream constraint at compile time (§5).
pub struct AdbConnection<T: Transport> {
    transport: T,
    pub device_banner: String,
}

impl<T: Transport> AdbConnection<T> {
    /// Performs `CNXN`, then iterates `signers` against each `AUTH` token
    /// the device sends until one is accepted, finally falling back to
    /// registering a public key and waiting for the user to accept it on
    /// the device (mirroring `AdbCommands._Connect`).
    pub fn connect(
        mut transport: T,
        signers: &[Box<dyn AuthSigner>],
        rsa_key_auth_timeout_ms: Option<u32>,
    ) -> Result<Self, AdbError> {
        send(
            &mut transport,
            &AdbMessage::new(Cmd::Cnxn, VERSION, MAX_ADB_DATA, banner_payload()),
        )?;

        let mut msg = read_message(&mut transport)?;
        let mut tried_signers = 0usize;

        loop {
            match msg.cmd {
                Cmd::Cnxn => {
                    let device_banner = String::from_utf8_lossy(&msg.data)
                        .trim_end_matches('\0')
                        .to_string();
                    log::info!("connected: {device_banner}");
                    return Ok(Self {
                        transport,
                        device_banner,
                    });
                }
                Cmd::Auth if msg.arg0 == AUTH_TOKEN => {
                    if let Some(signer) = signers.get(tried_signers) {
                        log::debug!("trying signer {tried_signers} against AUTH token");
                        tried_signers += 1;
                        let signature = signer.sign(&msg.data).map_err(|e| {
                            AdbError::DeviceAuthError(format!("signing auth token: {e}"))
                        })?;
                        send(
                            &mut transport,
                            &AdbMessage::new(Cmd::Auth, AUTH_SIGNATURE, 0, signature),
                        )?;
                        msg = read_message(&mut transport)?;
                        continue;
                    }

                    let Some(signer) = signers.first() else {
                        return Err(AdbError::DeviceAuthError(
                            "no signer available to answer device challenge".to_string(),
                        ));
                    };
                    log::info!("no signer accepted; registering public key and waiting for on-device approval");
                    let mut pubkey = signer.public_key().as_bytes().to_vec();
                    pubkey.push(0);
                    send(
                        &mut transport,
                        &AdbMessage::new(Cmd::Auth, AUTH_RSAPUBLICKEY, 0, pubkey),
                    )?;
                    // The device won't respond until the user accepts the key
                    // on-screen; a long wait that times out reads as an
                    // unaccepted key rather than a transport failure.
                    msg = read_message_with_timeout(&mut transport, rsa_key_auth_timeout_ms).map_err(
                        |e| match e {
                            AdbError::Transport(t) => AdbError::from_auth_wait(t),
                            other => other,
                        },
                    )?;
                    continue;
                }
                other => {
                    return Err(AdbError::InvalidResponse(format!(
                        "expected CNXN or AUTH, got {}",
                        other.name()
                    )))
                }
            }
        }
    }

    /// Opens a new stream to `destination`. Consumes `&mut self` for the
    /// returned stream's lifetime, so only one stream can be outstanding.
    pub fn open(&mut self, destination: &str) -> Result<AdbStream<'_, T>, AdbError> {
        AdbStream::open(&mut self.transport, destination)
    }

    /// Runs a one-shot service command and returns its full output.
    pub fn command(&mut self, service: &str) -> Result<Vec<u8>, AdbError> {
        AdbStream::command(&mut self.transport, service)
    }

    /// Runs a command, streaming each `WRTE` chunk to `on_chunk` as it
    /// arrives rather than buffering the whole response.
    pub fn streaming_command(
        &mut self,
        service: &str,
        on_chunk: impl FnMut(&[u8]),
    ) -> Result<(), AdbError> {
        AdbStream::streaming_command(&mut self.transport, service, on_chunk)
    }

    /// Like [`streaming_command`](Self::streaming_command), overriding the
    /// per-read timeout — `Some(0)` waits indefinitely, for long-running
    /// streams such as `logcat` that explicitly opt into it (§5).
    pub fn streaming_command_with_timeout(
        &mut self,
        service: &str,
        on_chunk: impl FnMut(&[u8]),
        read_timeout_ms: Option<u32>,
    ) -> Result<(), AdbError> {
        AdbStream::streaming_command_with_timeout(&mut self.transport, service, on_chunk, read_timeout_ms)
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

fn banner_payload() -> Vec<u8> {
    let mut payload = DEFAULT_BANNER.as_bytes().to_vec();
    payload.push(0);
    payload
}

fn send<T: Transport>(transport: &mut T, msg: &AdbMessage) -> Result<(), AdbError> {
    transport.bulk_write(&msg.pack_header(), None)?;
    if !msg.data.is_empty() {
        transport.bulk_write(&msg.data, None)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::stream::test_support::LoopbackTransport;
    use crate::signer::{AuthSigner, SignerError};

    struct StubSigner {
        public_key: String,
        accepted_signature: Vec<u8>,
    }

    impl AuthSigner for StubSigner {
        fn sign(&self, _token: &[u8]) -> Result<Vec<u8>, SignerError> {
            Ok(self.accepted_signature.clone())
        }

        fn public_key(&self) -> &str {
            &self.public_key
        }
    }

    #[test]
    fn connect_accepts_cnxn_immediately_if_device_skips_auth() {
        let mut transport = LoopbackTransport::new();
        transport.push_message(&AdbMessage::new(
            Cmd::Cnxn,
            VERSION,
            4096,
            b"device::ro.product.name=test\0".to_vec(),
        ));

        let conn = AdbConnection::connect(transport, &[], None).unwrap();
        assert!(conn.device_banner.starts_with("device::"));
    }

    #[test]
    fn connect_signs_auth_token_then_accepts_cnxn() {
        let mut transport = LoopbackTransport::new();
        transport.push_message(&AdbMessage::new(Cmd::Auth, AUTH_TOKEN, 0, vec![0u8; 20]));
        transport.push_message(&AdbMessage::new(Cmd::Cnxn, VERSION, 4096, b"device::\0".to_vec()));

        let signer: Box<dyn AuthSigner> = Box::new(StubSigner {
            public_key: "fake-key".to_string(),
            accepted_signature: vec![1, 2, 3],
        });
        let conn = AdbConnection::connect(transport, &[signer], None).unwrap();
        assert_eq!(conn.device_banner, "device::");
    }
}
