//! Client <-> zone server messages

use crate::buffer::{PacketReader, PacketWriter};
use crate::error::CodecError;
use crate::packet::Packet;
use crate::version::PacketLength;

/// Map cell coordinates packed into three bytes: 10 bits x, 10 bits y,
/// 4 bits facing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedPosition(pub [u8; 3]);

impl PackedPosition {
    pub fn new(x: u16, y: u16, dir: u8) -> Self {
        let x = x & 0x3ff;
        let y = y & 0x3ff;
        PackedPosition([
            (x >> 2) as u8,
            (((x & 0x3) << 6) | (y >> 4)) as u8,
            (((y & 0xf) << 4) as u8) | (dir & 0xf),
        ])
    }

    pub fn x(&self) -> u16 {
        ((self.0[0] as u16) << 2) | ((self.0[1] as u16) >> 6)
    }

    pub fn y(&self) -> u16 {
        (((self.0[1] & 0x3f) as u16) << 4) | ((self.0[2] as u16) >> 4)
    }

    pub fn dir(&self) -> u8 {
        self.0[2] & 0xf
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CzEnter {
    pub account_id: u32,
    pub character_id: u32,
    pub auth_code: u32,
    pub client_time: u32,
    pub gender: u8,
}

impl Packet for CzEnter {
    const NAME: &'static str = "CZ_ENTER";
    const OPCODE: u16 = 0x0072;
    const LENGTH: PacketLength = PacketLength::Fixed(19);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.account_id);
        writer.write_u32(self.character_id);
        writer.write_u32(self.auth_code);
        writer.write_u32(self.client_time);
        writer.write_u8(self.gender);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(CzEnter {
            account_id: reader.read_u32()?,
            character_id: reader.read_u32()?,
            auth_code: reader.read_u32()?,
            client_time: reader.read_u32()?,
            gender: reader.read_u8()?,
        })
    }
}

/// Client finished loading the map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CzNotifyActorinit;

impl Packet for CzNotifyActorinit {
    const NAME: &'static str = "CZ_NOTIFY_ACTORINIT";
    const OPCODE: u16 = 0x007d;
    const LENGTH: PacketLength = PacketLength::Fixed(2);

    fn write_body(&self, _writer: &mut PacketWriter) {}

    fn read_body(_reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(CzNotifyActorinit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CzRequestTime {
    pub client_time: u32,
}

impl Packet for CzRequestTime {
    const NAME: &'static str = "CZ_REQUEST_TIME";
    const OPCODE: u16 = 0x007e;
    const LENGTH: PacketLength = PacketLength::Fixed(6);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.client_time);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(CzRequestTime {
            client_time: reader.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CzRequestMove {
    pub destination: PackedPosition,
}

impl Packet for CzRequestMove {
    const NAME: &'static str = "CZ_REQUEST_MOVE";
    const OPCODE: u16 = 0x0085;
    const LENGTH: PacketLength = PacketLength::Fixed(5);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_bytes(&self.destination.0);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(CzRequestMove {
            destination: PackedPosition(reader.read_array()?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CzRequestQuit {
    pub kind: u16,
}

impl Packet for CzRequestQuit {
    const NAME: &'static str = "CZ_REQUEST_QUIT";
    const OPCODE: u16 = 0x018a;
    const LENGTH: PacketLength = PacketLength::Fixed(4);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u16(self.kind);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(CzRequestQuit {
            kind: reader.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZcAcceptEnter {
    pub start_time: u32,
    pub position: PackedPosition,
    pub x_size: u8,
    pub y_size: u8,
}

impl Packet for ZcAcceptEnter {
    const NAME: &'static str = "ZC_ACCEPT_ENTER";
    const OPCODE: u16 = 0x0073;
    const LENGTH: PacketLength = PacketLength::Fixed(11);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.start_time);
        writer.write_bytes(&self.position.0);
        writer.write_u8(self.x_size);
        writer.write_u8(self.y_size);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(ZcAcceptEnter {
            start_time: reader.read_u32()?,
            position: PackedPosition(reader.read_array()?),
            x_size: reader.read_u8()?,
            y_size: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ZoneEnterError {
    Normal = 0,
    ServerClosed = 1,
    MapUnavailable = 2,
    SessionInvalid = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZcRefuseEnter {
    pub error: u8,
}

impl ZcRefuseEnter {
    pub fn new(error: ZoneEnterError) -> Self {
        ZcRefuseEnter { error: error as u8 }
    }
}

impl Packet for ZcRefuseEnter {
    const NAME: &'static str = "ZC_REFUSE_ENTER";
    const OPCODE: u16 = 0x0074;
    const LENGTH: PacketLength = PacketLength::Fixed(3);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.error);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(ZcRefuseEnter {
            error: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZcNotifyTime {
    pub server_time: u32,
}

impl Packet for ZcNotifyTime {
    const NAME: &'static str = "ZC_NOTIFY_TIME";
    const OPCODE: u16 = 0x007f;
    const LENGTH: PacketLength = PacketLength::Fixed(6);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.server_time);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(ZcNotifyTime {
            server_time: reader.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZcAcceptQuit {
    pub result: u16,
}

impl Packet for ZcAcceptQuit {
    const NAME: &'static str = "ZC_ACCEPT_QUIT";
    const OPCODE: u16 = 0x018b;
    const LENGTH: PacketLength = PacketLength::Fixed(4);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u16(self.result);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(ZcAcceptQuit {
            result: reader.read_u16()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_position() {
        let pos = PackedPosition::new(156, 191, 4);
        assert_eq!(pos.x(), 156);
        assert_eq!(pos.y(), 191);
        assert_eq!(pos.dir(), 4);

        let max = PackedPosition::new(1023, 1023, 15);
        assert_eq!((max.x(), max.y(), max.dir()), (1023, 1023, 15));
    }
}
