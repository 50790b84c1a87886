//! Records exchanged between roles through the coordination server

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Which role a process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerRole {
    Auth,
    Char,
    Zone,
    Inter,
}

impl ServerRole {
    pub fn as_u8(self) -> u8 {
        match self {
            ServerRole::Auth => 0,
            ServerRole::Char => 1,
            ServerRole::Zone => 2,
            ServerRole::Inter => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ServerRole::Auth),
            1 => Some(ServerRole::Char),
            2 => Some(ServerRole::Zone),
            3 => Some(ServerRole::Inter),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ServerRole::Auth => "auth",
            ServerRole::Char => "char",
            ServerRole::Zone => "zone",
            ServerRole::Inter => "inter",
        }
    }
}

/// Login session shared by auth, char and zone.
/// Keyed by the auth code handed to the client at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub auth_code: u32,
    pub account_id: u32,
    pub current_server: ServerRole,
    pub client_version: u32,
    pub client_type: u8,
    pub map_name: String,
    pub login_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameAccount {
    pub account_id: u32,
    pub username: String,
    pub gender: u8,
    pub group_id: u32,
    pub character_slots: u8,
    pub last_ip: String,
    pub last_login: u64,
}

pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serialize(record)?)
}

pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(bincode::deserialize(bytes)?)
}
