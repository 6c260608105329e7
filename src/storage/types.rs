//! Addressing Types
//!
//! Identifiers shared by the master and the volume servers: volume ids,
//! replication policies, file ids (the public address of a needle), the needle
//! itself and the per-volume facts reported by heartbeats.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of one volume, unique across the whole cluster.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VolumeId(pub u32);

impl VolumeId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VolumeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .map(VolumeId)
            .map_err(|_| Error::InvalidVolumeId(s.to_string()))
    }
}

/// Replication policy as a three digit code `xyz`.
///
/// - `x`: copies placed in other data centers
/// - `y`: copies placed in other racks of the same data center
/// - `z`: copies placed on other servers of the same rack
///
/// A volume belongs to exactly one policy for its whole life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReplicationType {
    pub diff_data_center: u8,
    pub diff_rack: u8,
    pub same_rack: u8,
}

impl ReplicationType {
    /// Total number of replicas a volume of this policy needs.
    pub fn copy_count(&self) -> usize {
        (self.diff_data_center + self.diff_rack + self.same_rack) as usize + 1
    }
}

impl fmt::Display for ReplicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.diff_data_center, self.diff_rack, self.same_rack
        )
    }
}

impl FromStr for ReplicationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits: Vec<u8> = s
            .trim()
            .chars()
            .map(|c| c.to_digit(10).map(|d| d as u8))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| Error::InvalidReplication(s.to_string()))?;

        if digits.len() != 3 || digits.iter().any(|&d| d > 2) || digits.iter().sum::<u8>() > 3 {
            return Err(Error::InvalidReplication(s.to_string()));
        }

        Ok(Self {
            diff_data_center: digits[0],
            diff_rack: digits[1],
            same_rack: digits[2],
        })
    }
}

impl TryFrom<String> for ReplicationType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ReplicationType> for String {
    fn from(value: ReplicationType) -> Self {
        value.to_string()
    }
}

/// Public address of a needle: `<volumeId>,<keyHex><cookieHex>`.
///
/// The key is written as lowercase hex with leading zero bytes stripped (so
/// always an even number of digits, `00` for key 0), the cookie as exactly
/// eight hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    pub volume_id: VolumeId,
    pub key: u64,
    pub cookie: u32,
}

impl FileId {
    pub fn new(volume_id: VolumeId, key: u64, cookie: u32) -> Self {
        Self {
            volume_id,
            key,
            cookie,
        }
    }

    /// Parses the part after the comma into `(key, cookie)`.
    pub fn parse_key_cookie(s: &str) -> Result<(u64, u32)> {
        let invalid = |reason: &str| Error::InvalidFileId {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        if s.len() <= 8 {
            return Err(invalid("too short"));
        }
        if s.len() > 24 {
            return Err(invalid("too long"));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("not hexadecimal"));
        }

        let (key_hex, cookie_hex) = s.split_at(s.len() - 8);
        let key = u64::from_str_radix(key_hex, 16).map_err(|_| invalid("bad key"))?;
        let cookie = u32::from_str_radix(cookie_hex, 16).map_err(|_| invalid("bad cookie"))?;

        Ok((key, cookie))
    }

    /// The `<keyHex><cookieHex>` part of the text form.
    pub fn key_cookie_hex(&self) -> String {
        let mut key_hex = format!("{:x}", self.key);
        if key_hex.len() % 2 == 1 {
            key_hex.insert(0, '0');
        }
        format!("{}{:08x}", key_hex, self.cookie)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.volume_id, self.key_cookie_hex())
    }
}

impl FromStr for FileId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (vid, rest) = s.split_once(',').ok_or_else(|| Error::InvalidFileId {
            input: s.to_string(),
            reason: "missing comma".to_string(),
        })?;
        let volume_id: VolumeId = vid.parse()?;
        let (key, cookie) = Self::parse_key_cookie(rest)?;

        Ok(Self::new(volume_id, key, cookie))
    }
}

/// The parts of a volume server request path.
///
/// Accepted forms: `/3,01637037d6`, `/3,01637037d6.jpg`, `/3/01637037d6.jpg`
/// and `/3/01637037d6/my_preferred_name.jpg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeedlePath {
    pub file_id: FileId,
    pub filename: Option<String>,
    pub ext: Option<String>,
}

impl NeedlePath {
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidFileId {
            input: path.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = path.trim_start_matches('/');
        let parts: Vec<&str> = trimmed.split('/').collect();

        let (vid, fid, filename, ext) = match parts.as_slice() {
            [vid, fid, filename] => {
                let ext = extension(filename);
                (*vid, fid.to_string(), Some(filename.to_string()), ext)
            }
            [vid, fid] => {
                let (fid, ext) = split_extension(fid);
                (*vid, fid, None, ext)
            }
            [single] => {
                let (vid, fid) = single
                    .split_once(',')
                    .ok_or_else(|| invalid("volume id only"))?;
                let (fid, ext) = split_extension(fid);
                (vid, fid, None, ext)
            }
            _ => return Err(invalid("unexpected path shape")),
        };

        let volume_id: VolumeId = vid.parse()?;
        let (key, cookie) = FileId::parse_key_cookie(&fid)?;

        Ok(Self {
            file_id: FileId::new(volume_id, key, cookie),
            filename: filename.filter(|f| !f.is_empty()),
            ext,
        })
    }
}

fn extension(name: &str) -> Option<String> {
    match name.rfind('.') {
        Some(idx) if idx > 0 => Some(name[idx..].to_string()),
        _ => None,
    }
}

fn split_extension(fid: &str) -> (String, Option<String>) {
    match fid.rfind('.') {
        Some(idx) if idx > 0 => (fid[..idx].to_string(), Some(fid[idx..].to_string())),
        _ => (fid.to_string(), None),
    }
}

pub const FLAG_GZIP: u8 = 0x01;
pub const FLAG_HAS_NAME: u8 = 0x02;
pub const FLAG_HAS_MIME: u8 = 0x04;
pub const FLAG_HAS_LAST_MODIFIED: u8 = 0x08;

/// One stored object, as seen by the replication protocol.
///
/// The binary on-disk layout belongs to the storage engine; this is only the
/// addressing view plus payload and the optional metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Needle {
    pub key: u64,
    pub cookie: u32,
    pub data: Vec<u8>,
    pub name: Option<String>,
    pub mime: Option<String>,
    /// Seconds since the unix epoch, 0 when unknown.
    pub last_modified: u64,
    pub flags: u8,
}

impl Needle {
    pub fn new(key: u64, cookie: u32, data: Vec<u8>) -> Self {
        Self {
            key,
            cookie,
            data,
            name: None,
            mime: None,
            last_modified: 0,
            flags: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() && name.len() < 256 {
            self.name = Some(name);
            self.flags |= FLAG_HAS_NAME;
        }
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        let mime = mime.into();
        if !mime.is_empty() && mime.len() < 256 {
            self.mime = Some(mime);
            self.flags |= FLAG_HAS_MIME;
        }
        self
    }

    pub fn with_last_modified(mut self, last_modified: u64) -> Self {
        if last_modified > 0 {
            self.last_modified = last_modified;
            self.flags |= FLAG_HAS_LAST_MODIFIED;
        }
        self
    }

    pub fn gzipped(mut self) -> Self {
        self.flags |= FLAG_GZIP;
        self
    }

    pub fn is_gzipped(&self) -> bool {
        self.flags & FLAG_GZIP != 0
    }

    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn file_id(&self, volume_id: VolumeId) -> FileId {
        FileId::new(volume_id, self.key, self.cookie)
    }
}

/// Heartbeat-reported facts about one volume on one volume server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub id: VolumeId,
    pub collection: String,
    pub replication: ReplicationType,
    pub size: u64,
    pub file_count: u64,
    pub delete_count: u64,
    pub deleted_byte_count: u64,
    pub read_only: bool,
    pub max_file_key: u64,
}

impl VolumeInfo {
    pub fn new(id: VolumeId, collection: &str, replication: ReplicationType) -> Self {
        Self {
            id,
            collection: collection.to_string(),
            replication,
            size: 0,
            file_count: 0,
            delete_count: 0,
            deleted_byte_count: 0,
            read_only: false,
            max_file_key: 0,
        }
    }
}
