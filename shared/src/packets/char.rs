//! Client <-> character server messages

use crate::buffer::{FixedString, PacketReader, PacketWriter};
use crate::error::CodecError;
use crate::packet::Packet;
use crate::version::{PacketLength, PacketVersion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChEnter {
    pub account_id: u32,
    pub auth_code: u32,
    pub user_level: u32,
    pub unused: u16,
    pub gender: u8,
}

impl Packet for ChEnter {
    const NAME: &'static str = "CH_ENTER";
    const OPCODE: u16 = 0x0065;
    const LENGTH: PacketLength = PacketLength::Fixed(17);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.account_id);
        writer.write_u32(self.auth_code);
        writer.write_u32(self.user_level);
        writer.write_u16(self.unused);
        writer.write_u8(self.gender);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(ChEnter {
            account_id: reader.read_u32()?,
            auth_code: reader.read_u32()?,
            user_level: reader.read_u32()?,
            unused: reader.read_u16()?,
            gender: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChSelectChar {
    pub slot: u8,
}

impl Packet for ChSelectChar {
    const NAME: &'static str = "CH_SELECT_CHAR";
    const OPCODE: u16 = 0x0066;
    const LENGTH: PacketLength = PacketLength::Fixed(3);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.slot);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(ChSelectChar {
            slot: reader.read_u8()?,
        })
    }
}

/// Keepalive from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChPing {
    pub account_id: u32,
}

impl Packet for ChPing {
    const NAME: &'static str = "CH_PING";
    const OPCODE: u16 = 0x0187;
    const LENGTH: PacketLength = PacketLength::Fixed(6);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.account_id);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(ChPing {
            account_id: reader.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChDeleteChar3 {
    pub character_id: u32,
    pub birthdate: FixedString<6>,
}

impl Packet for ChDeleteChar3 {
    const NAME: &'static str = "CH_DELETE_CHAR3";
    const OPCODE: u16 = 0x0829;
    const LENGTH: PacketLength = PacketLength::Fixed(12);
    const SINCE: PacketVersion = PacketVersion(20100713);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.character_id);
        writer.write_fixed_string(&self.birthdate);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(ChDeleteChar3 {
            character_id: reader.read_u32()?,
            birthdate: reader.read_fixed_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChSelectAccessibleMapname {
    pub slot: u8,
    pub map_index: u8,
}

impl Packet for ChSelectAccessibleMapname {
    const NAME: &'static str = "CH_SELECT_ACCESSIBLE_MAPNAME";
    const OPCODE: u16 = 0x0841;
    const LENGTH: PacketLength = PacketLength::Fixed(4);
    const SINCE: PacketVersion = PacketVersion(20100713);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.slot);
        writer.write_u8(self.map_index);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(ChSelectAccessibleMapname {
            slot: reader.read_u8()?,
            map_index: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChMakeSecondPasswd {
    pub account_id: u32,
    pub pin: [u8; 4],
}

impl Packet for ChMakeSecondPasswd {
    const NAME: &'static str = "CH_MAKE_SECOND_PASSWD";
    const OPCODE: u16 = 0x08ba;
    const LENGTH: PacketLength = PacketLength::Fixed(10);
    const SINCE: PacketVersion = PacketVersion(20110222);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.account_id);
        writer.write_bytes(&self.pin);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(ChMakeSecondPasswd {
            account_id: reader.read_u32()?,
            pin: reader.read_array()?,
        })
    }
}

/// Slot summary sent once the session is accepted.
/// Character rows would follow the header; none are stored here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HcAcceptEnter {
    pub total_slots: u8,
    pub premium_slots: u8,
    pub valid_slots: u8,
    pub reserved: [u8; 20],
}

impl HcAcceptEnter {
    pub fn new(total_slots: u8) -> Self {
        HcAcceptEnter {
            total_slots,
            premium_slots: 0,
            valid_slots: total_slots,
            reserved: [0; 20],
        }
    }
}

impl Packet for HcAcceptEnter {
    const NAME: &'static str = "HC_ACCEPT_ENTER";
    const OPCODE: u16 = 0x006b;
    const LENGTH: PacketLength = PacketLength::Variable;

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.total_slots);
        writer.write_u8(self.premium_slots);
        writer.write_u8(self.valid_slots);
        writer.write_bytes(&self.reserved);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(HcAcceptEnter {
            total_slots: reader.read_u8()?,
            premium_slots: reader.read_u8()?,
            valid_slots: reader.read_u8()?,
            reserved: reader.read_array()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CharEnterError {
    Rejected = 0,
    ServerClosed = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HcRefuseEnter {
    pub error: u8,
}

impl HcRefuseEnter {
    pub fn new(error: CharEnterError) -> Self {
        HcRefuseEnter { error: error as u8 }
    }
}

impl Packet for HcRefuseEnter {
    const NAME: &'static str = "HC_REFUSE_ENTER";
    const OPCODE: u16 = 0x006c;
    const LENGTH: PacketLength = PacketLength::Fixed(3);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.error);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(HcRefuseEnter {
            error: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CharacterDeleteResult {
    Accepted = 1,
    DatabaseError = 3,
    BirthdateMismatch = 5,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HcDeleteChar3 {
    pub character_id: u32,
    pub result: u32,
}

impl Packet for HcDeleteChar3 {
    const NAME: &'static str = "HC_DELETE_CHAR3";
    const OPCODE: u16 = 0x082a;
    const LENGTH: PacketLength = PacketLength::Fixed(10);
    const SINCE: PacketVersion = PacketVersion(20100713);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.character_id);
        writer.write_u32(self.result);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(HcDeleteChar3 {
            character_id: reader.read_u32()?,
            result: reader.read_u32()?,
        })
    }
}
