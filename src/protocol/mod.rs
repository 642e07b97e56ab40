//! The ADB wire protocol: message framing, stream multiplexing, and the
//! connection handshake (§3, §4.1, §4.2).

pub mod connection;
pub mod message;
pub mod stream;

pub use connection::AdbConnection;
pub use message::{AdbMessage, Cmd, MAX_ADB_DATA};
pub use stream::{AdbStream, ShellSession};
