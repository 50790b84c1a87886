//! Error types for the server runtime

use shared::CodecError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a request/reply exchange with the coordination server
#[derive(Debug, Error)]
pub enum InterError {
    #[error("a call is already outstanding on this channel")]
    Busy,
    #[error("no reply to {packet} within {timeout_ms} ms")]
    Timeout { packet: &'static str, timeout_ms: u64 },
    #[error("inter channel is down")]
    ChannelDown,
    #[error("{packet} refused with code {code}")]
    Refused { packet: &'static str, code: u8 },
    #[error("inter message encoding: {0}")]
    Codec(#[from] CodecError),
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Failure while loading the map cache.
/// Every variant aborts zone startup.
#[derive(Debug, Error)]
pub enum MapCacheError {
    #[error("map cache {0} does not exist")]
    NonexistentFile(PathBuf),
    #[error("could not read map cache: {0}")]
    Read(#[from] io::Error),
    #[error("map cache header is invalid: {0}")]
    BadHeader(String),
    #[error("map cache checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    InvalidChecksum { expected: u32, computed: u32 },
    #[error("map cache decompression failed: {0}")]
    Decompress(String),
    #[error("invalid map record: {0}")]
    MapInfo(String),
    #[error("map {map} has {actual} cells, expected {expected}")]
    CellInfo {
        map: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level startup and runtime failure of a role
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    MapCache(#[from] MapCacheError),
    #[error(transparent)]
    Inter(#[from] InterError),
    #[error("network error: {0}")]
    Io(#[from] io::Error),
    #[error("shard {0} failed to start: {1}")]
    Shard(u32, String),
}
