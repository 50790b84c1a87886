//! Message types, one per opcode, grouped by the link they travel on

pub mod auth;
pub mod char;
pub mod inter;
pub mod zone;

#[cfg(test)]
mod tests {
    use super::auth::*;
    use super::char::*;
    use super::zone::*;
    use crate::buffer::FixedString;
    use crate::error::CodecError;
    use crate::packet::Packet;
    use crate::version::PacketLength;

    fn assert_reencodes<P: Packet>(bytes: &[u8]) {
        if let PacketLength::Fixed(len) = P::LENGTH {
            assert_eq!(bytes.len(), len, "{} sample has wrong size", P::NAME);
        }
        let decoded = P::deserialize(bytes).unwrap();
        assert_eq!(&decoded.serialize().unwrap()[..], bytes, "{} did not re-encode", P::NAME);
    }

    fn filled(opcode: u16, len: usize) -> Vec<u8> {
        let mut bytes = opcode.to_le_bytes().to_vec();
        bytes.extend((0..len - 2).map(|i| (i * 7 + 3) as u8));
        bytes
    }

    #[test]
    fn test_fixed_messages_reencode_byte_for_byte() {
        assert_reencodes::<CaLogin>(&filled(CaLogin::OPCODE, 55));
        assert_reencodes::<CaReqHash>(&filled(CaReqHash::OPCODE, 2));
        assert_reencodes::<CaConnectInfoChanged>(&filled(CaConnectInfoChanged::OPCODE, 26));
        assert_reencodes::<CaExeHashcheck>(&filled(CaExeHashcheck::OPCODE, 18));
        assert_reencodes::<CaLoginPcbang>(&filled(CaLoginPcbang::OPCODE, 84));
        assert_reencodes::<AcRefuseLogin>(&filled(AcRefuseLogin::OPCODE, 23));
        assert_reencodes::<AcAckEkeyFailNotusedekey>(&filled(0x0269, 4));

        assert_reencodes::<ChEnter>(&filled(ChEnter::OPCODE, 17));
        assert_reencodes::<ChSelectChar>(&filled(ChSelectChar::OPCODE, 3));
        assert_reencodes::<ChPing>(&filled(ChPing::OPCODE, 6));
        assert_reencodes::<ChDeleteChar3>(&filled(ChDeleteChar3::OPCODE, 12));
        assert_reencodes::<ChSelectAccessibleMapname>(&filled(ChSelectAccessibleMapname::OPCODE, 4));
        assert_reencodes::<ChMakeSecondPasswd>(&filled(ChMakeSecondPasswd::OPCODE, 10));
        assert_reencodes::<HcRefuseEnter>(&filled(HcRefuseEnter::OPCODE, 3));
        assert_reencodes::<HcDeleteChar3>(&filled(HcDeleteChar3::OPCODE, 10));

        assert_reencodes::<CzEnter>(&filled(CzEnter::OPCODE, 19));
        assert_reencodes::<CzNotifyActorinit>(&filled(CzNotifyActorinit::OPCODE, 2));
        assert_reencodes::<CzRequestTime>(&filled(CzRequestTime::OPCODE, 6));
        assert_reencodes::<CzRequestMove>(&filled(CzRequestMove::OPCODE, 5));
        assert_reencodes::<CzRequestQuit>(&filled(CzRequestQuit::OPCODE, 4));
        assert_reencodes::<ZcAcceptEnter>(&filled(ZcAcceptEnter::OPCODE, 11));
        assert_reencodes::<ZcRefuseEnter>(&filled(ZcRefuseEnter::OPCODE, 3));
        assert_reencodes::<ZcNotifyTime>(&filled(ZcNotifyTime::OPCODE, 6));
        assert_reencodes::<ZcAcceptQuit>(&filled(ZcAcceptQuit::OPCODE, 4));
    }

    #[test]
    fn test_login_layout() {
        let login = CaLogin {
            version: 55,
            username: FixedString::new("user"),
            password: FixedString::new("pass"),
            client_type: 22,
        };
        let bytes = login.serialize().unwrap();
        assert_eq!(bytes.len(), 55);
        assert_eq!(&bytes[..2], &[0x64, 0x00]);
        assert_eq!(&bytes[2..6], &55u32.to_le_bytes());
        assert_eq!(&bytes[6..10], b"user");
        assert_eq!(&bytes[30..34], b"pass");
        assert_eq!(bytes[54], 22);
    }

    #[test]
    fn test_accept_login_carries_server_list() {
        let accept = AcAcceptLogin {
            auth_code: 0x1234_5678,
            account_id: 2000000,
            user_level: 0,
            last_login_ip: 0,
            last_login_time: FixedString::default(),
            gender: 1,
            servers: vec![
                CharServerEntry {
                    ip: u32::from_le_bytes([127, 0, 0, 1]),
                    port: 6121,
                    name: FixedString::new("Horizon"),
                    users: 0,
                    server_type: 0,
                    is_new: 1,
                },
                CharServerEntry {
                    ip: 0,
                    port: 6122,
                    name: FixedString::new("Second"),
                    users: 10,
                    server_type: 1,
                    is_new: 0,
                },
            ],
        };

        let bytes = accept.serialize().unwrap();
        assert_eq!(bytes.len(), AcAcceptLogin::HEADER_SIZE + 2 * CharServerEntry::SIZE);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]) as usize, bytes.len());

        let decoded = AcAcceptLogin::deserialize(&bytes).unwrap();
        assert_eq!(decoded, accept);
        assert_eq!(decoded.servers[1].name.as_str(), "Second");
    }

    #[test]
    fn test_accept_login_length_limit() {
        let entry = CharServerEntry {
            ip: 0x0100007f,
            port: 6121,
            name: FixedString::new("Horizon"),
            users: 0,
            server_type: 0,
            is_new: 0,
        };
        let mut accept = AcAcceptLogin {
            auth_code: 1,
            account_id: 2,
            user_level: 0,
            last_login_ip: 0,
            last_login_time: FixedString::default(),
            gender: 0,
            servers: vec![entry; AcAcceptLogin::MAX_SERVERS],
        };

        let bytes = accept.serialize().unwrap();
        assert!(bytes.len() <= u16::MAX as usize);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]) as usize, bytes.len());

        accept.servers.push(accept.servers[0].clone());
        match accept.serialize() {
            Err(CodecError::Oversize { packet, len }) => {
                assert_eq!(packet, "AC_ACCEPT_LOGIN");
                let entries = AcAcceptLogin::MAX_SERVERS + 1;
                assert_eq!(len, AcAcceptLogin::HEADER_SIZE + entries * CharServerEntry::SIZE);
            }
            other => panic!("unexpected result: {:?}", other.map(|bytes| bytes.len())),
        }
    }

    #[test]
    fn test_variable_messages_reencode() {
        let sso = CaSsoLoginReq {
            version: 1,
            client_type: 2,
            username: FixedString::new("sso"),
            password: FixedString::new("secret"),
            mac_address: FixedString::new("00-00-00-00-00-00"),
            ip: FixedString::new("10.0.0.1"),
            token: b"opaque-token".to_vec(),
        };
        let bytes = sso.serialize().unwrap();
        assert_eq!(bytes.len(), 4 + 4 + 1 + 24 + 27 + 17 + 15 + 12);
        assert_reencodes::<CaSsoLoginReq>(&bytes);

        let hash = AcAckHash {
            salt: vec![1, 2, 3, 4],
        };
        assert_reencodes::<AcAckHash>(&hash.serialize().unwrap());
        assert_reencodes::<HcAcceptEnter>(&HcAcceptEnter::new(9).serialize().unwrap());
    }

    #[test]
    fn test_short_fixed_message_fails() {
        let bytes = filled(ChEnter::OPCODE, 17);
        assert!(ChEnter::deserialize(&bytes[..16]).is_err());
    }
}
