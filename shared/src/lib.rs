//! # Shared wire protocol
//!
//! Everything that both ends of a connection have to agree on: the
//! little-endian field codec, message framing under a protocol revision,
//! the `Packet`/`Handle` capabilities, every message type, and the records
//! that roles exchange through the coordination server.
//!
//! A message is a 16-bit opcode followed by a body whose length is fixed,
//! given by a 16-bit prefix, or "whatever is buffered", depending on the
//! opcode. Each role builds one [`DispatchTable`] for its revision at
//! startup and never changes it.

pub mod buffer;
pub mod dispatch;
pub mod error;
pub mod packet;
pub mod packets;
pub mod records;
pub mod version;

pub use buffer::{FixedString, PacketReader, PacketWriter};
pub use dispatch::{DispatchTable, DispatchTableBuilder, Frame, HandlerFn};
pub use error::{CodecError, DispatchError, FrameError, HandleError};
pub use packet::{Handle, Packet};
pub use records::{GameAccount, ServerRole, SessionRecord};
pub use version::{PacketLength, PacketVersion};

/// Default listening ports per role
pub const AUTH_PORT: u16 = 6900;
pub const CHAR_PORT: u16 = 6121;
pub const ZONE_PORT: u16 = 5121;
pub const INTER_PORT: u16 = 9998;
