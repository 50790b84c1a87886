//! Messages between game roles and the coordination (inter) server.
//!
//! Every request has exactly one reply opcode, declared through
//! [`InterRequest::Reply`]. Records travel bincode-encoded inside
//! variable-length messages.

use crate::buffer::{PacketReader, PacketWriter};
use crate::error::CodecError;
use crate::packet::Packet;
use crate::records::{decode_record, encode_record, GameAccount, ServerRole, SessionRecord};
use crate::version::PacketLength;

/// A request whose completion is a single reply message
pub trait InterRequest: Packet {
    type Reply: Packet;
}

/// Result byte of every acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterResult {
    Ok = 0,
    BadPassword = 1,
    BadRole = 2,
    NotFound = 3,
    /// The request carried a record that could not be decoded
    Malformed = 4,
}

impl InterResult {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(InterResult::Ok),
            1 => Some(InterResult::BadPassword),
            2 => Some(InterResult::BadRole),
            3 => Some(InterResult::NotFound),
            4 => Some(InterResult::Malformed),
            _ => None,
        }
    }
}

/// First message on every inter connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterConnectInit {
    pub role: u8,
    pub password: String,
}

impl InterConnectInit {
    pub fn new(role: ServerRole, password: &str) -> Self {
        InterConnectInit {
            role: role.as_u8(),
            password: password.to_string(),
        }
    }
}

impl Packet for InterConnectInit {
    const NAME: &'static str = "INTER_CONNECT_INIT";
    const OPCODE: u16 = 0x4000;
    const LENGTH: PacketLength = PacketLength::Variable;

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.role);
        writer.write_bytes(self.password.as_bytes());
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(InterConnectInit {
            role: reader.read_u8()?,
            password: String::from_utf8_lossy(reader.read_rest()).into_owned(),
        })
    }
}

impl InterRequest for InterConnectInit {
    type Reply = InterConnectAck;
}

/// Fixed three-byte acknowledgement carrying an [`InterResult`] code
macro_rules! ack_packet {
    ($name:ident, $wire:literal, $opcode:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub result: u8,
        }

        impl $name {
            pub fn new(result: InterResult) -> Self {
                $name {
                    result: result as u8,
                }
            }

            pub fn is_ok(&self) -> bool {
                self.result == InterResult::Ok as u8
            }
        }

        impl Packet for $name {
            const NAME: &'static str = $wire;
            const OPCODE: u16 = $opcode;
            const LENGTH: PacketLength = PacketLength::Fixed(3);

            fn write_body(&self, writer: &mut PacketWriter) {
                writer.write_u8(self.result);
            }

            fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
                Ok($name {
                    result: reader.read_u8()?,
                })
            }
        }
    };
}

ack_packet!(InterConnectAck, "INTER_CONNECT_ACK", 0x4001);
ack_packet!(InterSessionSetAck, "INTER_SESSION_SET_ACK", 0x4013);
ack_packet!(InterSessionDelAck, "INTER_SESSION_DEL_ACK", 0x4015);
ack_packet!(InterGameAccountSetAck, "INTER_GAME_ACCOUNT_SET_ACK", 0x4023);
ack_packet!(InterGameAccountDelAck, "INTER_GAME_ACCOUNT_DEL_ACK", 0x4025);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterPing;

impl Packet for InterPing {
    const NAME: &'static str = "INTER_PING";
    const OPCODE: u16 = 0x4002;
    const LENGTH: PacketLength = PacketLength::Fixed(2);

    fn write_body(&self, _writer: &mut PacketWriter) {}

    fn read_body(_reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(InterPing)
    }
}

impl InterRequest for InterPing {
    type Reply = InterPong;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterPong;

impl Packet for InterPong {
    const NAME: &'static str = "INTER_PONG";
    const OPCODE: u16 = 0x4003;
    const LENGTH: PacketLength = PacketLength::Fixed(2);

    fn write_body(&self, _writer: &mut PacketWriter) {}

    fn read_body(_reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(InterPong)
    }
}

/// Request keyed by a single u32 (auth code or account id)
macro_rules! keyed_request {
    ($name:ident, $wire:literal, $opcode:literal, $field:ident, $reply:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub $field: u32,
        }

        impl Packet for $name {
            const NAME: &'static str = $wire;
            const OPCODE: u16 = $opcode;
            const LENGTH: PacketLength = PacketLength::Fixed(6);

            fn write_body(&self, writer: &mut PacketWriter) {
                writer.write_u32(self.$field);
            }

            fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
                Ok($name {
                    $field: reader.read_u32()?,
                })
            }
        }

        impl InterRequest for $name {
            type Reply = $reply;
        }
    };
}

keyed_request!(InterSessionReq, "INTER_SESSION_REQ", 0x4010, auth_code, InterSessionGet);
keyed_request!(InterSessionDel, "INTER_SESSION_DEL", 0x4014, auth_code, InterSessionDelAck);
keyed_request!(InterGameAccountReq, "INTER_GAME_ACCOUNT_REQ", 0x4020, account_id, InterGameAccountGet);
keyed_request!(InterGameAccountDel, "INTER_GAME_ACCOUNT_DEL", 0x4024, account_id, InterGameAccountDelAck);

/// Lookup reply: a found flag followed by the encoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterSessionGet {
    pub record: Option<Vec<u8>>,
}

impl InterSessionGet {
    pub fn found(record: &SessionRecord) -> Result<Self, CodecError> {
        Ok(InterSessionGet {
            record: Some(encode_record(record)?),
        })
    }

    pub fn not_found() -> Self {
        InterSessionGet { record: None }
    }

    pub fn decode(&self) -> Result<Option<SessionRecord>, CodecError> {
        self.record.as_deref().map(decode_record::<SessionRecord>).transpose()
    }
}

impl Packet for InterSessionGet {
    const NAME: &'static str = "INTER_SESSION_GET";
    const OPCODE: u16 = 0x4011;
    const LENGTH: PacketLength = PacketLength::Variable;

    fn write_body(&self, writer: &mut PacketWriter) {
        write_optional_record(writer, self.record.as_deref());
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(InterSessionGet {
            record: read_optional_record(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterSessionSet {
    pub record: Vec<u8>,
}

impl InterSessionSet {
    pub fn new(record: &SessionRecord) -> Result<Self, CodecError> {
        Ok(InterSessionSet {
            record: encode_record(record)?,
        })
    }

    pub fn decode(&self) -> Result<SessionRecord, CodecError> {
        decode_record(&self.record)
    }
}

impl Packet for InterSessionSet {
    const NAME: &'static str = "INTER_SESSION_SET";
    const OPCODE: u16 = 0x4012;
    const LENGTH: PacketLength = PacketLength::Variable;

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_bytes(&self.record);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(InterSessionSet {
            record: reader.read_rest().to_vec(),
        })
    }
}

impl InterRequest for InterSessionSet {
    type Reply = InterSessionSetAck;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterGameAccountGet {
    pub record: Option<Vec<u8>>,
}

impl InterGameAccountGet {
    pub fn found(account: &GameAccount) -> Result<Self, CodecError> {
        Ok(InterGameAccountGet {
            record: Some(encode_record(account)?),
        })
    }

    pub fn not_found() -> Self {
        InterGameAccountGet { record: None }
    }

    pub fn decode(&self) -> Result<Option<GameAccount>, CodecError> {
        self.record.as_deref().map(decode_record::<GameAccount>).transpose()
    }
}

impl Packet for InterGameAccountGet {
    const NAME: &'static str = "INTER_GAME_ACCOUNT_GET";
    const OPCODE: u16 = 0x4021;
    const LENGTH: PacketLength = PacketLength::Variable;

    fn write_body(&self, writer: &mut PacketWriter) {
        write_optional_record(writer, self.record.as_deref());
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(InterGameAccountGet {
            record: read_optional_record(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterGameAccountSet {
    pub record: Vec<u8>,
}

impl InterGameAccountSet {
    pub fn new(account: &GameAccount) -> Result<Self, CodecError> {
        Ok(InterGameAccountSet {
            record: encode_record(account)?,
        })
    }

    pub fn decode(&self) -> Result<GameAccount, CodecError> {
        decode_record(&self.record)
    }
}

impl Packet for InterGameAccountSet {
    const NAME: &'static str = "INTER_GAME_ACCOUNT_SET";
    const OPCODE: u16 = 0x4022;
    const LENGTH: PacketLength = PacketLength::Variable;

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write_bytes(&self.record);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(InterGameAccountSet {
            record: reader.read_rest().to_vec(),
        })
    }
}

impl InterRequest for InterGameAccountSet {
    type Reply = InterGameAccountSetAck;
}

fn write_optional_record(writer: &mut PacketWriter, record: Option<&[u8]>) {
    match record {
        Some(bytes) => {
            writer.write_u8(1);
            writer.write_bytes(bytes);
        }
        None => writer.write_u8(0),
    }
}

fn read_optional_record(reader: &mut PacketReader<'_>) -> Result<Option<Vec<u8>>, CodecError> {
    match reader.read_u8()? {
        0 => Ok(None),
        1 => Ok(Some(reader.read_rest().to_vec())),
        other => Err(CodecError::InvalidField {
            field: "found",
            value: other as u64,
        }),
    }
}
