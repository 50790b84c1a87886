//! Protocol revision and per-opcode length rules

use serde::{Deserialize, Serialize};
use std::fmt;

/// Client protocol revision, written as a date (`YYYYMMDD`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketVersion(pub u32);

impl PacketVersion {
    /// Matches every revision; used for messages that never changed
    pub const ANY: PacketVersion = PacketVersion(0);
    pub const DEFAULT: PacketVersion = PacketVersion(20190530);

    pub fn at_least(self, since: PacketVersion) -> bool {
        self >= since
    }
}

impl Default for PacketVersion {
    fn default() -> Self {
        PacketVersion::DEFAULT
    }
}

impl fmt::Display for PacketVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Size of the 16-bit opcode that starts every message
pub const OPCODE_SIZE: usize = 2;
/// Opcode plus the 16-bit length prefix of variable-length messages
pub const VARIABLE_HEADER_SIZE: usize = 4;

/// How the length of a message is determined once its opcode is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketLength {
    /// Total length, opcode included
    Fixed(usize),
    /// A u16 total length follows the opcode
    Variable,
    /// Everything currently buffered belongs to the message
    Unbounded,
}

impl PacketLength {
    /// Offset of the first body byte within a frame
    pub fn header_size(self) -> usize {
        match self {
            PacketLength::Variable => VARIABLE_HEADER_SIZE,
            PacketLength::Fixed(_) | PacketLength::Unbounded => OPCODE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        let old = PacketVersion(20060109);
        let new = PacketVersion(20190530);
        assert!(new.at_least(old));
        assert!(!old.at_least(new));
        assert!(old.at_least(PacketVersion::ANY));
    }

    #[test]
    fn test_header_size() {
        assert_eq!(PacketLength::Fixed(4).header_size(), 2);
        assert_eq!(PacketLength::Variable.header_size(), 4);
        assert_eq!(PacketLength::Unbounded.header_size(), 2);
    }
}
