//! Capabilities implemented by every message type.
//!
//! Each opcode gets exactly one struct. `Packet` covers the wire form and
//! `Handle<S>` covers what a session of type `S` does when it receives one.

use crate::buffer::{PacketReader, PacketWriter};
use crate::error::{CodecError, HandleError};
use crate::version::{PacketLength, PacketVersion, OPCODE_SIZE};
use bytes::Bytes;

pub trait Packet: Sized {
    const NAME: &'static str;
    const OPCODE: u16;
    const LENGTH: PacketLength;
    /// First protocol revision in which this message exists
    const SINCE: PacketVersion = PacketVersion::ANY;

    /// Writes the fields that follow the opcode (and length prefix)
    fn write_body(&self, writer: &mut PacketWriter);

    /// Reads the fields that follow the opcode (and length prefix)
    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError>;

    /// Encodes the whole frame. Variable-length messages fail with
    /// [`CodecError::Oversize`] when they do not fit their u16 length prefix.
    fn serialize(&self) -> Result<Bytes, CodecError> {
        let mut writer = match Self::LENGTH {
            PacketLength::Fixed(len) => PacketWriter::with_capacity(len),
            _ => PacketWriter::with_capacity(64),
        };
        writer.write_u16(Self::OPCODE);
        if Self::LENGTH == PacketLength::Variable {
            writer.write_u16(0);
        }
        self.write_body(&mut writer);
        if Self::LENGTH == PacketLength::Variable {
            let len = u16::try_from(writer.len()).map_err(|_| CodecError::Oversize {
                packet: Self::NAME,
                len: writer.len(),
            })?;
            writer.patch_u16(OPCODE_SIZE, len);
        }
        if let PacketLength::Fixed(len) = Self::LENGTH {
            debug_assert_eq!(writer.len(), len, "{} encoded to wrong size", Self::NAME);
        }
        Ok(writer.freeze())
    }

    /// Decodes one complete frame, opcode included
    fn deserialize(frame: &[u8]) -> Result<Self, CodecError> {
        let mut reader = PacketReader::new(frame);
        reader.skip(Self::LENGTH.header_size())?;
        Self::read_body(&mut reader)
    }
}

pub trait Handle<S>: Packet {
    fn handle(self, session: &mut S) -> Result<(), HandleError>;
}
