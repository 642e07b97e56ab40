//! The 24-byte ADB wire header and opcode set (§3, §4.1).
//!
//! The opcode constants are the ASCII tag read as a little-endian `u32` —
//! e.g. `CNXN` packs as `0x4e584e43` — and are reused verbatim from the
//! teacher prototype, which computed them the same way against real
//! devices.

use crate::error::AdbError;

/// Maximum payload size for one ADB message.
pub const MAX_ADB_DATA: usize = 4096;
/// ADB protocol version sent in `CNXN`.
pub const VERSION: u32 = 0x0100_0000;

pub const AUTH_TOKEN: u32 = 1;
pub const AUTH_SIGNATURE: u32 = 2;
pub const AUTH_RSAPUBLICKEY: u32 = 3;

const HEADER_LEN: usize = 24;

#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum Cmd {
    Sync = 0x434e_5953,
    Cnxn = 0x4e58_4e43,
    Auth = 0x4854_5541,
    Open = 0x4e45_504f,
    Okay = 0x5941_4b4f,
    Clse = 0x4553_4c43,
    Wrte = 0x4554_5257,
}

impl Cmd {
    pub fn magic(self) -> u32 {
        (self as u32) ^ 0xFFFF_FFFF
    }

    pub fn name(self) -> &'static str {
        match self {
            Cmd::Sync => "SYNC",
            Cmd::Cnxn => "CNXN",
            Cmd::Auth => "AUTH",
            Cmd::Open => "OPEN",
            Cmd::Okay => "OKAY",
            Cmd::Clse => "CLSE",
            Cmd::Wrte => "WRTE",
        }
    }
}

impl TryFrom<u32> for Cmd {
    type Error = u32;
    fn try_from(value: u32) -> Result<Self, u32> {
        match value {
            v if v == Cmd::Sync as u32 => Ok(Cmd::Sync),
            v if v == Cmd::Cnxn as u32 => Ok(Cmd::Cnxn),
            v if v == Cmd::Auth as u32 => Ok(Cmd::Auth),
            v if v == Cmd::Open as u32 => Ok(Cmd::Open),
            v if v == Cmd::Okay as u32 => Ok(Cmd::Okay),
            v if v == Cmd::Clse as u32 => Ok(Cmd::Clse),
            v if v == Cmd::Wrte as u32 => Ok(Cmd::Wrte),
            other => Err(other),
        }
    }
}

/// Sum of payload bytes modulo 2^32, per §3's checksum invariant.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

/// A decoded ADB header plus payload.
#[derive(Debug)]
pub struct AdbMessage {
    pub cmd: Cmd,
    pub arg0: u32,
    pub arg1: u32,
    pub data: Vec<u8>,
}

impl AdbMessage {
    pub fn new(cmd: Cmd, arg0: u32, arg1: u32, data: Vec<u8>) -> Self {
        Self { cmd, arg0, arg1, data }
    }

    /// Packs the 24-byte header. The payload is written separately by the
    /// caller (two back-to-back bulk writes, per §4.1).
    pub fn pack_header(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&(self.cmd as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.arg0.to_le_bytes());
        buf[8..12].copy_from_slice(&self.arg1.to_le_bytes());
        buf[12..16].copy_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf[16..20].copy_from_slice(&checksum(&self.data).to_le_bytes());
        buf[20..24].copy_from_slice(&self.cmd.magic().to_le_bytes());
        buf
    }

    /// Decodes a 24-byte header. Validates the magic invariant
    /// (`magic == cmd ^ 0xFFFFFFFF`) and returns `InvalidCommand` if it
    /// doesn't hold.
    pub fn unpack_header(buf: &[u8; HEADER_LEN]) -> Result<(Cmd, u32, u32, u32, u32), AdbError> {
        let read_u32 = |i: usize| u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
        let raw_cmd = read_u32(0);
        let arg0 = read_u32(4);
        let arg1 = read_u32(8);
        let data_len = read_u32(12);
        let data_checksum = read_u32(16);
        let magic = read_u32(20);
        let cmd = Cmd::try_from(raw_cmd)
            .map_err(|raw| AdbError::InvalidCommand(format!("unknown command: {raw:#x}")))?;
        if magic != cmd.magic() {
            return Err(AdbError::InvalidCommand(format!(
                "magic mismatch for {}: expected {:#010x}, got {:#010x}",
                cmd.name(),
                cmd.magic(),
                magic
            )));
        }
        Ok((cmd, arg0, arg1, data_len, data_checksum))
    }
}

pub const fn header_len() -> usize {
    HEADER_LEN
}

/// Validates the checksum of a received payload against the header's
/// declared `data_checksum`.
pub fn verify_checksum(data: &[u8], declared: u32) -> Result<(), AdbError> {
    let actual = checksum(data);
    if actual != declared {
        return Err(AdbError::InvalidChecksum {
            expected: declared,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_is_cmd_xor_all_ones() {
        for cmd in [Cmd::Sync, Cmd::Cnxn, Cmd::Auth, Cmd::Open, Cmd::Okay, Cmd::Clse, Cmd::Wrte] {
            assert_eq!(cmd.magic(), (cmd as u32) ^ 0xFFFF_FFFF);
        }
    }

    #[test]
    fn pack_then_unpack_round_trips() {
        let msg = AdbMessage::new(Cmd::Wrte, 1, 2, b"hello".to_vec());
        let header = msg.pack_header();
        let (cmd, arg0, arg1, data_len, data_checksum) = AdbMessage::unpack_header(&header).unwrap();
        assert_eq!(cmd, Cmd::Wrte);
        assert_eq!(arg0, 1);
        assert_eq!(arg1, 2);
        assert_eq!(data_len as usize, msg.data.len());
        assert_eq!(data_checksum, checksum(&msg.data));
    }

    #[test]
    fn checksum_is_sum_mod_2_32() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[1, 2, 3]), 6);
        assert_eq!(checksum(&[255u8; 4]), 255 * 4);
    }

    #[test]
    fn unpack_rejects_unknown_opcode() {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        assert!(AdbMessage::unpack_header(&buf).is_err());
    }

    #[test]
    fn unpack_rejects_bad_magic() {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&(Cmd::Okay as u32).to_le_bytes());
        buf[20..24].copy_from_slice(&0u32.to_le_bytes());
        assert!(AdbMessage::unpack_header(&buf).is_err());
    }
}
