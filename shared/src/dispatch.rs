//! Opcode routing tables.
//!
//! A role builds one `DispatchTable` for its protocol revision at startup.
//! The table knows the length rule of every opcode it handles (inbound) and
//! of every opcode it transmits (outbound); the two sets are kept apart
//! because the same number can mean different messages in each direction.

use crate::error::{FrameError, HandleError};
use crate::packet::{Handle, Packet};
use crate::version::{PacketLength, PacketVersion, OPCODE_SIZE, VARIABLE_HEADER_SIZE};
use std::collections::HashMap;

/// Decodes a frame and runs the handler against the session
pub type HandlerFn<S> = fn(&mut S, &[u8]) -> Result<(), HandleError>;

struct Route<S> {
    name: &'static str,
    length: PacketLength,
    handler: HandlerFn<S>,
}

/// Location of one complete message at the start of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u16,
    pub len: usize,
}

pub struct DispatchTable<S> {
    version: PacketVersion,
    handled: HashMap<u16, Route<S>>,
    transmitted: HashMap<u16, (&'static str, PacketLength)>,
}

pub struct DispatchTableBuilder<S> {
    table: DispatchTable<S>,
}

fn invoke<S, M: Handle<S>>(session: &mut S, frame: &[u8]) -> Result<(), HandleError> {
    let message = M::deserialize(frame).map_err(|source| HandleError::Malformed {
        packet: M::NAME,
        source,
    })?;
    message.handle(session)
}

impl<S> DispatchTableBuilder<S> {
    pub fn new(version: PacketVersion) -> Self {
        Self {
            table: DispatchTable {
                version,
                handled: HashMap::new(),
                transmitted: HashMap::new(),
            },
        }
    }

    /// Registers `M` as handled if it exists in the table's revision.
    /// A later registration of the same opcode replaces the earlier one.
    pub fn handle<M: Handle<S>>(self) -> Self {
        if !self.table.version.at_least(M::SINCE) {
            return self;
        }
        self.handle_raw(M::OPCODE, M::NAME, M::LENGTH, invoke::<S, M>)
    }

    pub fn handle_raw(
        mut self,
        opcode: u16,
        name: &'static str,
        length: PacketLength,
        handler: HandlerFn<S>,
    ) -> Self {
        self.table.handled.insert(
            opcode,
            Route {
                name,
                length,
                handler,
            },
        );
        self
    }

    pub fn transmit<M: Packet>(mut self) -> Self {
        if self.table.version.at_least(M::SINCE) {
            self.table
                .transmitted
                .insert(M::OPCODE, (M::NAME, M::LENGTH));
        }
        self
    }

    pub fn build(self) -> DispatchTable<S> {
        self.table
    }
}

impl<S> DispatchTable<S> {
    pub fn builder(version: PacketVersion) -> DispatchTableBuilder<S> {
        DispatchTableBuilder::new(version)
    }

    pub fn version(&self) -> PacketVersion {
        self.version
    }

    pub fn handled_length(&self, opcode: u16) -> Option<PacketLength> {
        self.handled.get(&opcode).map(|route| route.length)
    }

    pub fn handled_name(&self, opcode: u16) -> Option<&'static str> {
        self.handled.get(&opcode).map(|route| route.name)
    }

    pub fn transmitted_length(&self, opcode: u16) -> Option<PacketLength> {
        self.transmitted.get(&opcode).map(|(_, length)| *length)
    }

    pub fn handled_count(&self) -> usize {
        self.handled.len()
    }

    pub fn transmitted_count(&self) -> usize {
        self.transmitted.len()
    }

    /// Locates the first complete message in `buf`.
    ///
    /// Returns `Ok(None)` while the message is still incomplete.
    pub fn frame(&self, buf: &[u8]) -> Result<Option<Frame>, FrameError> {
        if buf.len() < OPCODE_SIZE {
            return Ok(None);
        }
        let opcode = u16::from_le_bytes([buf[0], buf[1]]);
        let length = self
            .handled_length(opcode)
            .ok_or(FrameError::UnknownOpcode(opcode))?;

        let len = match length {
            PacketLength::Fixed(len) if len < OPCODE_SIZE => {
                return Err(FrameError::InvalidLength {
                    opcode,
                    declared: len,
                })
            }
            PacketLength::Fixed(len) => len,
            PacketLength::Variable => {
                if buf.len() < VARIABLE_HEADER_SIZE {
                    return Ok(None);
                }
                let declared = u16::from_le_bytes([buf[2], buf[3]]) as usize;
                if declared < VARIABLE_HEADER_SIZE {
                    return Err(FrameError::InvalidLength { opcode, declared });
                }
                declared
            }
            PacketLength::Unbounded => buf.len(),
        };

        if buf.len() < len {
            return Ok(None);
        }
        Ok(Some(Frame { opcode, len }))
    }

    /// Runs the handler for a frame previously located by [`frame`](Self::frame)
    pub fn dispatch(&self, session: &mut S, frame: &[u8]) -> Result<(), HandleError> {
        let opcode = match frame {
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            _ => return Err(HandleError::rejected("unknown", "frame shorter than opcode")),
        };
        match self.handled.get(&opcode) {
            Some(route) => (route.handler)(session, frame),
            None => Err(HandleError::rejected("unknown", format!("opcode {:#06x}", opcode))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{PacketReader, PacketWriter};
    use crate::error::CodecError;

    #[derive(Default)]
    struct Recorder {
        frames: Vec<Vec<u8>>,
        values: Vec<u16>,
    }

    struct Beacon {
        value: u16,
    }

    impl Packet for Beacon {
        const NAME: &'static str = "BEACON";
        const OPCODE: u16 = 0x0269;
        const LENGTH: PacketLength = PacketLength::Fixed(4);

        fn write_body(&self, writer: &mut PacketWriter) {
            writer.write_u16(self.value);
        }

        fn read_body(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
            Ok(Beacon {
                value: reader.read_u16()?,
            })
        }
    }

    impl Handle<Recorder> for Beacon {
        fn handle(self, session: &mut Recorder) -> Result<(), HandleError> {
            session.values.push(self.value);
            Ok(())
        }
    }

    struct LatePacket;

    impl Packet for LatePacket {
        const NAME: &'static str = "LATE";
        const OPCODE: u16 = 0x0825;
        const LENGTH: PacketLength = PacketLength::Variable;
        const SINCE: PacketVersion = PacketVersion(20100112);

        fn write_body(&self, _writer: &mut PacketWriter) {}

        fn read_body(_reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
            Ok(LatePacket)
        }
    }

    impl Handle<Recorder> for LatePacket {
        fn handle(self, _session: &mut Recorder) -> Result<(), HandleError> {
            Ok(())
        }
    }

    fn record_frame(session: &mut Recorder, frame: &[u8]) -> Result<(), HandleError> {
        session.frames.push(frame.to_vec());
        Ok(())
    }

    fn table(version: PacketVersion) -> DispatchTable<Recorder> {
        DispatchTable::builder(version)
            .handle::<Beacon>()
            .handle::<LatePacket>()
            .handle_raw(0x0100, "REST", PacketLength::Unbounded, record_frame)
            .transmit::<Beacon>()
            .build()
    }

    #[test]
    fn test_partial_fixed_message_is_incomplete() {
        let table = table(PacketVersion::DEFAULT);
        assert_eq!(table.frame(&[0x69, 0x02]).unwrap(), None);
        assert_eq!(
            table.frame(&[0x69, 0x02, 0x01, 0x00]).unwrap(),
            Some(Frame {
                opcode: 0x0269,
                len: 4
            })
        );
    }

    #[test]
    fn test_frame_ignores_trailing_bytes() {
        let table = table(PacketVersion::DEFAULT);
        let buf = [0x69, 0x02, 0x01, 0x00, 0x69, 0x02];
        let frame = table.frame(&buf).unwrap().unwrap();
        assert_eq!(frame.len, 4);
    }

    #[test]
    fn test_variable_length_uses_prefix() {
        let table = table(PacketVersion::DEFAULT);
        assert_eq!(table.frame(&[0x25, 0x08, 0x06]).unwrap(), None);
        assert_eq!(table.frame(&[0x25, 0x08, 0x06, 0x00, 0xAA]).unwrap(), None);
        let frame = table
            .frame(&[0x25, 0x08, 0x06, 0x00, 0xAA, 0xBB, 0xCC])
            .unwrap()
            .unwrap();
        assert_eq!(frame.len, 6);
    }

    #[test]
    fn test_variable_length_prefix_too_small() {
        let table = table(PacketVersion::DEFAULT);
        assert_eq!(
            table.frame(&[0x25, 0x08, 0x02, 0x00]),
            Err(FrameError::InvalidLength {
                opcode: 0x0825,
                declared: 2
            })
        );
    }

    #[test]
    fn test_unbounded_takes_everything_buffered() {
        let table = table(PacketVersion::DEFAULT);
        let frame = table.frame(&[0x00, 0x01, 9, 9, 9]).unwrap().unwrap();
        assert_eq!(frame.len, 5);
    }

    #[test]
    fn test_unknown_opcode() {
        let table = table(PacketVersion::DEFAULT);
        assert_eq!(
            table.frame(&[0xFF, 0xFF, 0, 0]),
            Err(FrameError::UnknownOpcode(0xFFFF))
        );
    }

    #[test]
    fn test_version_gating() {
        let old = table(PacketVersion(20090101));
        assert!(old.handled_length(0x0825).is_none());
        let new = table(PacketVersion(20100112));
        assert_eq!(new.handled_length(0x0825), Some(PacketLength::Variable));
    }

    #[test]
    fn test_inbound_and_outbound_are_separate() {
        let table = table(PacketVersion::DEFAULT);
        assert_eq!(table.transmitted_length(0x0269), Some(PacketLength::Fixed(4)));
        assert_eq!(table.transmitted_length(0x0100), None);
        assert_eq!(table.handled_count(), 3);
        assert_eq!(table.transmitted_count(), 1);
    }

    #[test]
    fn test_dispatch_decodes_and_handles() {
        let table = table(PacketVersion::DEFAULT);
        let mut session = Recorder::default();
        let bytes = Beacon { value: 0xBEEF }.serialize().unwrap();
        assert_eq!(&bytes[..], &[0x69, 0x02, 0xEF, 0xBE]);

        table.dispatch(&mut session, &bytes).unwrap();
        assert_eq!(session.values, vec![0xBEEF]);
    }

    #[test]
    fn test_handler_sees_exact_frame() {
        let table = table(PacketVersion::DEFAULT);
        let mut session = Recorder::default();
        let buf = [0x00, 0x01, 1, 2, 3];
        let frame = table.frame(&buf).unwrap().unwrap();
        table.dispatch(&mut session, &buf[..frame.len]).unwrap();
        assert_eq!(session.frames, vec![buf.to_vec()]);
    }

    #[test]
    fn test_malformed_body() {
        let table = table(PacketVersion::DEFAULT);
        let mut session = Recorder::default();
        let err = table.dispatch(&mut session, &[0x69, 0x02, 0x01]).unwrap_err();
        assert!(matches!(err, HandleError::Malformed { packet: "BEACON", .. }));
        assert!(!err.closes_connection());
    }
}
