//! Precomputed map cache file.
//!
//! Layout:
//! ```text
//! magic "HMC1" | version u16 | map_count u32 | crc32 u32 | body_len u32 | body
//! ```
//! All integers are little-endian. The body is a zlib stream of the
//! bincode-encoded map list; the checksum covers the compressed body.

use crate::error::MapCacheError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"HMC1";
const FORMAT_VERSION: u16 = 1;
const HEADER_SIZE: usize = 18;

/// Bit set in a cell when entities may stand on it
pub const CELL_WALKABLE: u8 = 0x01;

/// Static layout of one map as stored in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapCacheEntry {
    pub name: String,
    pub width: u16,
    pub height: u16,
    /// Row-major cell flags, `width * height` of them
    pub cells: Vec<u8>,
}

impl MapCacheEntry {
    /// A map where every cell is walkable
    pub fn open(name: &str, width: u16, height: u16) -> Self {
        MapCacheEntry {
            name: name.to_string(),
            width,
            height,
            cells: vec![CELL_WALKABLE; width as usize * height as usize],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheHeader {
    map_count: u32,
    crc32: u32,
    body_len: u32,
}

impl CacheHeader {
    fn to_bytes(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&self.map_count.to_le_bytes());
        bytes.extend_from_slice(&self.crc32.to_le_bytes());
        bytes.extend_from_slice(&self.body_len.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, MapCacheError> {
        if bytes.len() < HEADER_SIZE {
            return Err(MapCacheError::BadHeader(format!(
                "{} byte(s), header needs {}",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(MapCacheError::BadHeader("wrong magic".to_string()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(MapCacheError::BadHeader(format!(
                "unsupported version {}",
                version
            )));
        }
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Ok(CacheHeader {
            map_count: u32_at(6),
            crc32: u32_at(10),
            body_len: u32_at(14),
        })
    }
}

/// Map names key every lookup, so a cache may list each name only once
pub fn check_unique_names(maps: &[MapCacheEntry]) -> Result<(), MapCacheError> {
    let mut seen = HashSet::with_capacity(maps.len());
    for map in maps {
        if !seen.insert(map.name.as_str()) {
            return Err(MapCacheError::MapInfo(format!("map `{}` is listed twice", map.name)));
        }
    }
    Ok(())
}

/// Reads and validates a map cache, returning maps in file order
pub fn load(path: &Path) -> Result<Vec<MapCacheEntry>, MapCacheError> {
    if !path.exists() {
        return Err(MapCacheError::NonexistentFile(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    let maps = decode(&bytes)?;
    info!("Loaded {} map(s) from {}", maps.len(), path.display());
    Ok(maps)
}

pub fn decode(bytes: &[u8]) -> Result<Vec<MapCacheEntry>, MapCacheError> {
    let header = CacheHeader::from_bytes(bytes)?;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != header.body_len as usize {
        return Err(MapCacheError::Read(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("body is {} byte(s), header says {}", body.len(), header.body_len),
        )));
    }

    let computed = crc32fast::hash(body);
    if computed != header.crc32 {
        return Err(MapCacheError::InvalidChecksum {
            expected: header.crc32,
            computed,
        });
    }

    let mut raw = Vec::new();
    ZlibDecoder::new(body)
        .read_to_end(&mut raw)
        .map_err(|e| MapCacheError::Decompress(e.to_string()))?;

    let maps: Vec<MapCacheEntry> =
        bincode::deserialize(&raw).map_err(|e| MapCacheError::MapInfo(e.to_string()))?;
    if maps.len() != header.map_count as usize {
        return Err(MapCacheError::MapInfo(format!(
            "header lists {} map(s), body holds {}",
            header.map_count,
            maps.len()
        )));
    }

    for map in &maps {
        if map.name.is_empty() || map.width == 0 || map.height == 0 {
            return Err(MapCacheError::MapInfo(format!(
                "map `{}` has size {}x{}",
                map.name, map.width, map.height
            )));
        }
        let expected = map.width as usize * map.height as usize;
        if map.cells.len() != expected {
            return Err(MapCacheError::CellInfo {
                map: map.name.clone(),
                expected,
                actual: map.cells.len(),
            });
        }
    }
    check_unique_names(&maps)?;
    Ok(maps)
}

pub fn encode(maps: &[MapCacheEntry]) -> Result<Vec<u8>, MapCacheError> {
    check_unique_names(maps)?;
    let raw = bincode::serialize(maps).map_err(|e| MapCacheError::MapInfo(e.to_string()))?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    let body = encoder.finish()?;

    let header = CacheHeader {
        map_count: maps.len() as u32,
        crc32: crc32fast::hash(&body),
        body_len: body.len() as u32,
    };
    let mut bytes = header.to_bytes();
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Writes a map cache that [`load`] accepts
pub fn save(path: &Path, maps: &[MapCacheEntry]) -> Result<(), MapCacheError> {
    fs::write(path, encode(maps)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Vec<MapCacheEntry> {
        let mut walls = MapCacheEntry::open("prt_fild01", 4, 3);
        walls.cells[0] = 0;
        vec![MapCacheEntry::open("prontera", 8, 8), walls]
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("maps.dat");
        save(&path, &sample()).unwrap();
        assert_eq!(load(&path).unwrap(), sample());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = load(&dir.path().join("nope.dat")).unwrap_err();
        assert!(matches!(err, MapCacheError::NonexistentFile(_)));
    }

    #[test]
    fn test_bad_header() {
        assert!(matches!(decode(b"HMC1"), Err(MapCacheError::BadHeader(_))));

        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(MapCacheError::BadHeader(_))));
    }

    #[test]
    fn test_truncated_body_is_read_error() {
        let bytes = encode(&sample()).unwrap();
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, MapCacheError::Read(_)));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = encode(&sample()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            decode(&bytes),
            Err(MapCacheError::InvalidChecksum { .. })
        ));
    }

    #[test]
    fn test_undecompressable_body() {
        let body = vec![0xAB; 16];
        let mut bytes = CacheHeader {
            map_count: 1,
            crc32: crc32fast::hash(&body),
            body_len: body.len() as u32,
        }
        .to_bytes();
        bytes.extend_from_slice(&body);
        assert!(matches!(decode(&bytes), Err(MapCacheError::Decompress(_))));
    }

    #[test]
    fn test_map_count_mismatch() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[6] = 5;
        assert!(matches!(decode(&bytes), Err(MapCacheError::MapInfo(_))));
    }

    #[test]
    fn test_duplicate_map_name() {
        let maps = vec![
            MapCacheEntry::open("prontera", 8, 8),
            MapCacheEntry::open("geffen", 6, 6),
            MapCacheEntry::open("prontera", 4, 4),
        ];
        assert!(matches!(encode(&maps), Err(MapCacheError::MapInfo(_))));

        // A file written by another tool must not get past decode either
        let raw = bincode::serialize(&maps).unwrap();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let body = encoder.finish().unwrap();
        let mut bytes = CacheHeader {
            map_count: 3,
            crc32: crc32fast::hash(&body),
            body_len: body.len() as u32,
        }
        .to_bytes();
        bytes.extend_from_slice(&body);

        match decode(&bytes) {
            Err(MapCacheError::MapInfo(message)) => assert!(message.contains("prontera")),
            other => panic!("unexpected result: {:?}", other.map(|maps| maps.len())),
        }
    }

    #[test]
    fn test_cell_count_mismatch() {
        let mut maps = sample();
        maps[1].cells.pop();
        let err = decode(&encode(&maps).unwrap()).unwrap_err();
        match err {
            MapCacheError::CellInfo {
                map,
                expected,
                actual,
            } => {
                assert_eq!(map, "prt_fild01");
                assert_eq!(expected, 12);
                assert_eq!(actual, 11);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
