//! Configuration loaded from a TOML file.
//!
//! Every optional setting falls back to a default with a warning naming the
//! key. List entries (`[[character_servers]]`, `[[accounts]]`) are checked
//! one at a time; a malformed entry is logged and skipped while the rest of
//! the list still loads.

use crate::error::ConfigError;
use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::{PacketVersion, ServerRole};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub listen_ip: String,
    pub listen_port: u16,
    pub thread_count: usize,
}

impl NetworkConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.listen_ip, self.listen_port)
    }
}

/// How game roles reach the coordination server
#[derive(Debug, Clone, PartialEq)]
pub struct InterServerConfig {
    pub ip_address: String,
    pub port: u16,
    pub password: String,
    pub call_timeout: Duration,
    pub reconnect_interval: Duration,
}

impl InterServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    pub update_interval: Duration,
    pub packet_version: PacketVersion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneConfig {
    pub map_cache_path: PathBuf,
    pub shard_count: usize,
    pub shard_tick: Duration,
    /// Map used when a session record does not name one
    pub start_map: String,
}

/// One character server advertised to clients after login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharServerConfig {
    pub id: u32,
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub server_type: u16,
    pub is_new: bool,
}

/// Login credentials accepted by the auth role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub account_id: u32,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub gender: u8,
    #[serde(default)]
    pub group_id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub role: ServerRole,
    pub network: NetworkConfig,
    pub inter_server: InterServerConfig,
    pub core: CoreConfig,
    pub zone: ZoneConfig,
    pub character_servers: Vec<CharServerConfig>,
    pub accounts: Vec<AccountConfig>,
}

/// Listening port used when `network.listen_port` is absent
pub fn default_port(role: ServerRole) -> u16 {
    match role {
        ServerRole::Auth => shared::AUTH_PORT,
        ServerRole::Char => shared::CHAR_PORT,
        ServerRole::Zone => shared::ZONE_PORT,
        ServerRole::Inter => shared::INTER_PORT,
    }
}

impl ServerConfig {
    pub fn load(path: &Path, role: ServerRole) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, role)
    }

    pub fn from_toml_str(text: &str, role: ServerRole) -> Result<Self, ConfigError> {
        let root: toml::Table = toml::from_str(text)?;

        let network = NetworkConfig {
            listen_ip: setting(&root, "network", "listen_ip", "127.0.0.1".to_string()),
            listen_port: setting(&root, "network", "listen_port", default_port(role)),
            thread_count: setting(&root, "network", "thread_count", 1usize).max(1),
        };

        let inter_server = InterServerConfig {
            ip_address: setting(&root, "inter_server", "ip_address", "127.0.0.1".to_string()),
            port: setting(&root, "inter_server", "port", shared::INTER_PORT),
            password: setting(&root, "inter_server", "password", "ABCDEF".to_string()),
            call_timeout: Duration::from_millis(setting(
                &root,
                "inter_server",
                "call_timeout_ms",
                5000u64,
            )),
            reconnect_interval: Duration::from_secs(setting(
                &root,
                "inter_server",
                "reconnect_interval_secs",
                12u64,
            )),
        };

        let core = CoreConfig {
            update_interval: Duration::from_millis(
                setting(&root, "core", "update_interval_ms", 100u64).max(1),
            ),
            packet_version: PacketVersion(setting(
                &root,
                "core",
                "packet_version",
                PacketVersion::DEFAULT.0,
            )),
        };

        // Zone settings only matter to the zone role; stay quiet elsewhere
        let zone = if role == ServerRole::Zone {
            ZoneConfig {
                map_cache_path: PathBuf::from(setting(
                    &root,
                    "zone",
                    "map_cache_path",
                    "db/maps.dat".to_string(),
                )),
                shard_count: setting(&root, "zone", "shard_count", 4usize).max(1),
                shard_tick: Duration::from_millis(setting(&root, "zone", "shard_tick_ms", 50u64).max(1)),
                start_map: setting(&root, "zone", "start_map", "prontera".to_string()),
            }
        } else {
            ZoneConfig::default()
        };

        let character_servers: Vec<_> = entries::<CharServerConfig>(&root, "character_servers")
            .into_iter()
            .filter(|server| {
                if server.server_type > 4 {
                    error!(
                        "character_servers: `{}` has invalid type {}, skipping",
                        server.name, server.server_type
                    );
                    return false;
                }
                true
            })
            .collect();

        let accounts = entries(&root, "accounts");

        Ok(ServerConfig {
            role,
            network,
            inter_server,
            core,
            zone,
            character_servers,
            accounts,
        })
    }

    /// All defaults, without reading any file
    pub fn defaults(role: ServerRole) -> Self {
        ServerConfig {
            role,
            network: NetworkConfig {
                listen_ip: "127.0.0.1".to_string(),
                listen_port: default_port(role),
                thread_count: 1,
            },
            inter_server: InterServerConfig {
                ip_address: "127.0.0.1".to_string(),
                port: shared::INTER_PORT,
                password: "ABCDEF".to_string(),
                call_timeout: Duration::from_millis(5000),
                reconnect_interval: Duration::from_secs(12),
            },
            core: CoreConfig {
                update_interval: Duration::from_millis(100),
                packet_version: PacketVersion::DEFAULT,
            },
            zone: ZoneConfig::default(),
            character_servers: Vec::new(),
            accounts: Vec::new(),
        }
    }
}

impl Default for ZoneConfig {
    fn default() -> Self {
        ZoneConfig {
            map_cache_path: PathBuf::from("db/maps.dat"),
            shard_count: 4,
            shard_tick: Duration::from_millis(50),
            start_map: "prontera".to_string(),
        }
    }
}

fn setting<T>(root: &toml::Table, section: &str, key: &str, default: T) -> T
where
    T: DeserializeOwned + fmt::Debug,
{
    match root.get(section).and_then(|table| table.get(key)) {
        Some(value) => match value.clone().try_into::<T>() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(
                    "{}.{} is invalid ({}), using default {:?}",
                    section, key, e, default
                );
                default
            }
        },
        None => {
            warn!("{}.{} not set, using default {:?}", section, key, default);
            default
        }
    }
}

fn entries<T: DeserializeOwned>(root: &toml::Table, list: &str) -> Vec<T> {
    let Some(value) = root.get(list) else {
        warn!("no [[{}]] entries configured", list);
        return Vec::new();
    };
    let Some(items) = value.as_array() else {
        error!("{} must be an array of tables, ignoring it", list);
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match item.clone().try_into::<T>() {
            Ok(entry) => Some(entry),
            Err(e) => {
                error!("{}[{}] is malformed, skipping it: {}", list, index, e);
                None
            }
        })
        .collect()
}
