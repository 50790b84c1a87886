//! Client <-> auth server messages

use crate::buffer::{FixedString, PacketReader, PacketWriter};
use crate::error::CodecError;
use crate::packet::Packet;
use crate::version::{PacketLength, PacketVersion};

pub const USERNAME_LENGTH: usize = 24;
pub const PASSWORD_LENGTH: usize = 24;
pub const SERVER_NAME_LENGTH: usize = 20;

/// Login with plain credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaLogin {
    pub version: u32,
    pub username: FixedString<USERNAME_LENGTH>,
    pub password: FixedString<PASSWORD_LENGTH>,
    pub client_type: u8,
}

impl Packet for CaLogin {
    const NAME: &'static str = "CA_LOGIN";
    const OPCODE: u16 = 0x0064;
    const LENGTH: PacketLength = PacketLength::Fixed(55);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.version);
        writer.write_fixed_string(&self.username);
        writer.write_fixed_string(&self.password);
        writer.write_u8(self.client_type);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(CaLogin {
            version: reader.read_u32()?,
            username: reader.read_fixed_string()?,
            password: reader.read_fixed_string()?,
            client_type: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaReqHash;

impl Packet for CaReqHash {
    const NAME: &'static str = "CA_REQ_HASH";
    const OPCODE: u16 = 0x01db;
    const LENGTH: PacketLength = PacketLength::Fixed(2);

    fn write_body(&self, _writer: &mut PacketWriter) {}

    fn read_body(_reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(CaReqHash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaConnectInfoChanged {
    pub username: FixedString<USERNAME_LENGTH>,
}

impl Packet for CaConnectInfoChanged {
    const NAME: &'static str = "CA_CONNECT_INFO_CHANGED";
    const OPCODE: u16 = 0x0200;
    const LENGTH: PacketLength = PacketLength::Fixed(26);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_fixed_string(&self.username);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(CaConnectInfoChanged {
            username: reader.read_fixed_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaExeHashcheck {
    pub hash: [u8; 16],
}

impl Packet for CaExeHashcheck {
    const NAME: &'static str = "CA_EXE_HASHCHECK";
    const OPCODE: u16 = 0x0204;
    const LENGTH: PacketLength = PacketLength::Fixed(18);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_bytes(&self.hash);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(CaExeHashcheck {
            hash: reader.read_array()?,
        })
    }
}

/// Login from an internet-cafe client, carrying its address and MAC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaLoginPcbang {
    pub version: u32,
    pub username: FixedString<USERNAME_LENGTH>,
    pub password: FixedString<PASSWORD_LENGTH>,
    pub client_type: u8,
    pub ip: FixedString<16>,
    pub mac_address: FixedString<13>,
}

impl Packet for CaLoginPcbang {
    const NAME: &'static str = "CA_LOGIN_PCBANG";
    const OPCODE: u16 = 0x0277;
    const LENGTH: PacketLength = PacketLength::Fixed(84);
    const SINCE: PacketVersion = PacketVersion(20060109);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.version);
        writer.write_fixed_string(&self.username);
        writer.write_fixed_string(&self.password);
        writer.write_u8(self.client_type);
        writer.write_fixed_string(&self.ip);
        writer.write_fixed_string(&self.mac_address);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(CaLoginPcbang {
            version: reader.read_u32()?,
            username: reader.read_fixed_string()?,
            password: reader.read_fixed_string()?,
            client_type: reader.read_u8()?,
            ip: reader.read_fixed_string()?,
            mac_address: reader.read_fixed_string()?,
        })
    }
}

/// Single sign-on login; the token takes the rest of the message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaSsoLoginReq {
    pub version: u32,
    pub client_type: u8,
    pub username: FixedString<USERNAME_LENGTH>,
    pub password: FixedString<27>,
    pub mac_address: FixedString<17>,
    pub ip: FixedString<15>,
    pub token: Vec<u8>,
}

impl Packet for CaSsoLoginReq {
    const NAME: &'static str = "CA_SSO_LOGIN_REQ";
    const OPCODE: u16 = 0x0825;
    const LENGTH: PacketLength = PacketLength::Variable;
    const SINCE: PacketVersion = PacketVersion(20100112);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.version);
        writer.write_u8(self.client_type);
        writer.write_fixed_string(&self.username);
        writer.write_fixed_string(&self.password);
        writer.write_fixed_string(&self.mac_address);
        writer.write_fixed_string(&self.ip);
        writer.write_bytes(&self.token);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(CaSsoLoginReq {
            version: reader.read_u32()?,
            client_type: reader.read_u8()?,
            username: reader.read_fixed_string()?,
            password: reader.read_fixed_string()?,
            mac_address: reader.read_fixed_string()?,
            ip: reader.read_fixed_string()?,
            token: reader.read_rest().to_vec(),
        })
    }
}

/// One entry of the character-server list sent on login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharServerEntry {
    pub ip: u32,
    pub port: u16,
    pub name: FixedString<SERVER_NAME_LENGTH>,
    pub users: u16,
    pub server_type: u16,
    pub is_new: u16,
}

impl CharServerEntry {
    pub const SIZE: usize = 32;

    fn write(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.ip);
        writer.write_u16(self.port);
        writer.write_fixed_string(&self.name);
        writer.write_u16(self.users);
        writer.write_u16(self.server_type);
        writer.write_u16(self.is_new);
    }

    fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(CharServerEntry {
            ip: reader.read_u32()?,
            port: reader.read_u16()?,
            name: reader.read_fixed_string()?,
            users: reader.read_u16()?,
            server_type: reader.read_u16()?,
            is_new: reader.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcAcceptLogin {
    pub auth_code: u32,
    pub account_id: u32,
    pub user_level: u32,
    pub last_login_ip: u32,
    pub last_login_time: FixedString<26>,
    pub gender: u8,
    pub servers: Vec<CharServerEntry>,
}

impl AcAcceptLogin {
    pub const HEADER_SIZE: usize = 47;
    /// Most server entries that fit under the u16 length prefix
    pub const MAX_SERVERS: usize = (u16::MAX as usize - Self::HEADER_SIZE) / CharServerEntry::SIZE;
}

impl Packet for AcAcceptLogin {
    const NAME: &'static str = "AC_ACCEPT_LOGIN";
    const OPCODE: u16 = 0x0069;
    const LENGTH: PacketLength = PacketLength::Variable;

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.auth_code);
        writer.write_u32(self.account_id);
        writer.write_u32(self.user_level);
        writer.write_u32(self.last_login_ip);
        writer.write_fixed_string(&self.last_login_time);
        writer.write_u8(self.gender);
        for server in &self.servers {
            server.write(writer);
        }
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        let auth_code = reader.read_u32()?;
        let account_id = reader.read_u32()?;
        let user_level = reader.read_u32()?;
        let last_login_ip = reader.read_u32()?;
        let last_login_time = reader.read_fixed_string()?;
        let gender = reader.read_u8()?;

        let mut servers = Vec::with_capacity(reader.remaining() / CharServerEntry::SIZE);
        while reader.remaining() >= CharServerEntry::SIZE {
            servers.push(CharServerEntry::read(reader)?);
        }

        Ok(AcAcceptLogin {
            auth_code,
            account_id,
            user_level,
            last_login_ip,
            last_login_time,
            gender,
            servers,
        })
    }
}

/// Reasons carried by `AC_REFUSE_LOGIN`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoginError {
    UnregisteredId = 0,
    IncorrectPassword = 1,
    IdExpired = 2,
    Rejected = 3,
    Blocked = 4,
    InvalidVersion = 5,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcRefuseLogin {
    pub error: u8,
    pub block_date: FixedString<20>,
}

impl AcRefuseLogin {
    pub fn new(error: LoginError) -> Self {
        AcRefuseLogin {
            error: error as u8,
            block_date: FixedString::default(),
        }
    }
}

impl Packet for AcRefuseLogin {
    const NAME: &'static str = "AC_REFUSE_LOGIN";
    const OPCODE: u16 = 0x006a;
    const LENGTH: PacketLength = PacketLength::Fixed(23);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.error);
        writer.write_fixed_string(&self.block_date);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(AcRefuseLogin {
            error: reader.read_u8()?,
            block_date: reader.read_fixed_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcAckHash {
    pub salt: Vec<u8>,
}

impl Packet for AcAckHash {
    const NAME: &'static str = "AC_ACK_HASH";
    const OPCODE: u16 = 0x01dc;
    const LENGTH: PacketLength = PacketLength::Variable;

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_bytes(&self.salt);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(AcAckHash {
            salt: reader.read_rest().to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcAckEkeyFailNotusedekey {
    pub message_id: u16,
}

impl Packet for AcAckEkeyFailNotusedekey {
    const NAME: &'static str = "AC_ACK_EKEY_FAIL_NOTUSEDEKEY";
    const OPCODE: u16 = 0x0269;
    const LENGTH: PacketLength = PacketLength::Fixed(4);

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u16(self.message_id);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(AcAckEkeyFailNotusedekey {
            message_id: reader.read_u16()?,
        })
    }
}
