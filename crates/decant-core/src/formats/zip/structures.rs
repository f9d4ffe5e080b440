//! On-disk ZIP records.

use std::io::Cursor;
use std::io::Read;
use std::time::SystemTime;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;

use crate::ArchiveError;
use crate::Result;
use crate::formats::common::unix_time;

pub const LOCAL_HEADER_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const CENTRAL_HEADER_SIGNATURE: &[u8] = b"PK\x01\x02";
/// Marker at the start of the first segment of a spanned archive.
pub const SPANNING_SIGNATURE: &[u8] = b"PK\x07\x08";
/// Marker left by spanning tools that ended up writing a single segment.
pub const SINGLE_SEGMENT_SIGNATURE: &[u8] = b"PK00";

pub const LOCAL_HEADER_LEN: u64 = 30;

/// General purpose flag bits.
pub mod flags {
    pub const ENCRYPTED: u16 = 0x0001;
    pub const DATA_DESCRIPTOR: u16 = 0x0008;
    pub const STRONG_ENCRYPTION: u16 = 0x0040;
    pub const UTF8: u16 = 0x0800;
}

/// Host system code (high byte of "version made by") for Unix.
pub const HOST_UNIX: u8 = 3;

const ZIP64_EXTRA: u16 = 0x0001;
const EXTENDED_TIMESTAMP_EXTRA: u16 = 0x5455;
const UNIX_OWNER_EXTRA: u16 = 0x7875;
const UNICODE_PATH_EXTRA: u16 = 0x7075;
const AES_EXTRA: u16 = 0x9901;

fn corrupt_record(what: &str) -> ArchiveError {
    ArchiveError::corrupt(format!("{what} truncated"))
}

/// End of central directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[..4] != Self::SIGNATURE {
            return Err(ArchiveError::corrupt("invalid end of central directory record"));
        }
        let mut cursor = Cursor::new(&data[4..]);
        let read = |c: &mut Cursor<&[u8]>| c.read_u16::<LittleEndian>();
        let err = |_| corrupt_record("end of central directory");
        Ok(Self {
            disk_number: read(&mut cursor).map_err(err)?,
            disk_with_cd: read(&mut cursor).map_err(err)?,
            disk_entries: read(&mut cursor).map_err(err)?,
            total_entries: read(&mut cursor).map_err(err)?,
            cd_size: cursor.read_u32::<LittleEndian>().map_err(err)?,
            cd_offset: cursor.read_u32::<LittleEndian>().map_err(err)?,
            comment_len: read(&mut cursor).map_err(err)?,
        })
    }

    /// Returns `true` if any field is saturated and the ZIP64 record
    /// carries the real value.
    pub fn needs_zip64(&self) -> bool {
        self.disk_number == 0xFFFF
            || self.disk_with_cd == 0xFFFF
            || self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFF_FFFF
            || self.cd_offset == 0xFFFF_FFFF
    }
}

/// ZIP64 end of central directory locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64Locator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64Locator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    /// Parses a locator, or returns `None` if the signature is absent.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE || &data[..4] != Self::SIGNATURE {
            return None;
        }
        let mut cursor = Cursor::new(&data[4..]);
        Some(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>().ok()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>().ok()?,
            total_disks: cursor.read_u32::<LittleEndian>().ok()?,
        })
    }
}

/// ZIP64 end of central directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectory {
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[..4] != Self::SIGNATURE {
            return Err(ArchiveError::corrupt("invalid ZIP64 end of central directory record"));
        }
        // record size, version made by, version needed
        let mut cursor = Cursor::new(&data[16..]);
        let err = |_| corrupt_record("ZIP64 end of central directory");
        Ok(Self {
            disk_number: cursor.read_u32::<LittleEndian>().map_err(err)?,
            disk_with_cd: cursor.read_u32::<LittleEndian>().map_err(err)?,
            disk_entries: cursor.read_u64::<LittleEndian>().map_err(err)?,
            total_entries: cursor.read_u64::<LittleEndian>().map_err(err)?,
            cd_size: cursor.read_u64::<LittleEndian>().map_err(err)?,
            cd_offset: cursor.read_u64::<LittleEndian>().map_err(err)?,
        })
    }
}

/// One central directory file header, with ZIP64 values already applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CentralHeader {
    pub version_made_by: u16,
    pub flags: u16,
    pub method: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub disk_start: u32,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub local_offset: u64,
    pub name: Vec<u8>,
    pub comment: Vec<u8>,
    pub extras: ExtraFields,
}

impl CentralHeader {
    /// Fixed part of the record.
    pub const FIXED_LEN: usize = 46;

    /// Reads one header. `limit` bounds the variable-length fields.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut fixed = [0u8; Self::FIXED_LEN];
        reader
            .read_exact(&mut fixed)
            .map_err(|_| corrupt_record("central directory"))?;
        if &fixed[..4] != CENTRAL_HEADER_SIGNATURE {
            return Err(ArchiveError::corrupt("central directory header signature missing"));
        }

        let mut cursor = Cursor::new(&fixed[4..]);
        let mut u16_field = || cursor.read_u16::<LittleEndian>();
        let version_made_by = u16_field().map_err(|_| corrupt_record("central directory"))?;
        let _version_needed = u16_field().map_err(|_| corrupt_record("central directory"))?;
        let flags = u16_field().map_err(|_| corrupt_record("central directory"))?;
        let method = u16_field().map_err(|_| corrupt_record("central directory"))?;
        let dos_time = u16_field().map_err(|_| corrupt_record("central directory"))?;
        let dos_date = u16_field().map_err(|_| corrupt_record("central directory"))?;

        let le32 = |at: usize| u32::from_le_bytes([fixed[at], fixed[at + 1], fixed[at + 2], fixed[at + 3]]);
        let le16 = |at: usize| u16::from_le_bytes([fixed[at], fixed[at + 1]]);
        let crc32 = le32(16);
        let compressed_size = le32(20);
        let uncompressed_size = le32(24);
        let name_len = le16(28);
        let extra_len = le16(30);
        let comment_len = le16(32);
        let disk_start = le16(34);
        let internal_attrs = le16(36);
        let external_attrs = le32(38);
        let local_offset = le32(42);

        let mut variable = vec![0u8; usize::from(name_len) + usize::from(extra_len) + usize::from(comment_len)];
        reader
            .read_exact(&mut variable)
            .map_err(|_| corrupt_record("central directory"))?;
        let (name, rest) = variable.split_at(usize::from(name_len));
        let (extra, comment) = rest.split_at(usize::from(extra_len));

        let mut header = Self {
            version_made_by,
            flags,
            method,
            dos_time,
            dos_date,
            crc32,
            compressed_size: u64::from(compressed_size),
            uncompressed_size: u64::from(uncompressed_size),
            disk_start: u32::from(disk_start),
            internal_attrs,
            external_attrs,
            local_offset: u64::from(local_offset),
            name: name.to_vec(),
            comment: comment.to_vec(),
            extras: ExtraFields::default(),
        };
        header.apply_extra(extra)?;
        Ok(header)
    }

    /// Walks the extra field blocks.
    fn apply_extra(&mut self, mut extra: &[u8]) -> Result<()> {
        while extra.len() >= 4 {
            let id = u16::from_le_bytes([extra[0], extra[1]]);
            let len = usize::from(u16::from_le_bytes([extra[2], extra[3]]));
            let Some(data) = extra.get(4..4 + len) else {
                // some writers pad the extra field; ignore a dangling tail
                break;
            };
            match id {
                ZIP64_EXTRA => self.apply_zip64(data)?,
                EXTENDED_TIMESTAMP_EXTRA => {
                    if data.len() >= 5 && data[0] & 0x01 != 0 {
                        let mtime = i32::from_le_bytes([data[1], data[2], data[3], data[4]]);
                        self.extras.mtime = Some(i64::from(mtime));
                    }
                }
                UNIX_OWNER_EXTRA => self.apply_unix_owner(data),
                UNICODE_PATH_EXTRA => {
                    if data.len() >= 5 && data[0] == 1 {
                        let name_crc = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
                        if name_crc == crc32(&self.name)
                            && let Ok(name) = std::str::from_utf8(&data[5..])
                        {
                            self.extras.unicode_name = Some(name.to_string());
                        }
                    }
                }
                AES_EXTRA => self.extras.aes = true,
                _ => {}
            }
            extra = &extra[4 + len..];
        }
        Ok(())
    }

    /// ZIP64 values appear in a fixed order, each only when the matching
    /// 32-bit field is saturated.
    fn apply_zip64(&mut self, data: &[u8]) -> Result<()> {
        let mut cursor = Cursor::new(data);
        let err = |_| ArchiveError::corrupt("ZIP64 extra field too short");
        if self.uncompressed_size == 0xFFFF_FFFF {
            self.uncompressed_size = cursor.read_u64::<LittleEndian>().map_err(err)?;
        }
        if self.compressed_size == 0xFFFF_FFFF {
            self.compressed_size = cursor.read_u64::<LittleEndian>().map_err(err)?;
        }
        if self.local_offset == 0xFFFF_FFFF {
            self.local_offset = cursor.read_u64::<LittleEndian>().map_err(err)?;
        }
        if self.disk_start == 0xFFFF {
            self.disk_start = cursor.read_u32::<LittleEndian>().map_err(err)?;
        }
        Ok(())
    }

    fn apply_unix_owner(&mut self, data: &[u8]) {
        // version, uid size, uid, gid size, gid
        let mut rest = match data.split_first() {
            Some((1, rest)) => rest,
            _ => return,
        };
        let mut ids = [None, None];
        for id in &mut ids {
            let Some((&len, tail)) = rest.split_first() else {
                return;
            };
            let len = usize::from(len);
            if len > 8 || tail.len() < len {
                return;
            }
            *id = Some(
                tail[..len]
                    .iter()
                    .rev()
                    .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
            );
            rest = &tail[len..];
        }
        self.extras.uid = ids[0];
        self.extras.gid = ids[1];
    }

    /// Host system that wrote the entry.
    pub fn host(&self) -> u8 {
        (self.version_made_by >> 8) as u8
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }

    /// Unix mode bits, when written by a Unix host.
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.external_attrs >> 16;
        (self.host() == HOST_UNIX && mode != 0).then_some(mode)
    }

    /// Decoded entry name, preferring the Info-ZIP Unicode path.
    pub fn decoded_name(&self) -> String {
        self.extras.unicode_name.clone().unwrap_or_else(|| {
            super::cp437::decode_name(&self.name, self.flags & flags::UTF8 != 0)
        })
    }

    /// Modification time from the extended timestamp, else the DOS fields.
    pub fn modified(&self) -> Option<SystemTime> {
        self.extras
            .mtime
            .and_then(unix_time)
            .or_else(|| dos_datetime(self.dos_date, self.dos_time))
    }
}

/// Values recovered from extra field blocks other than ZIP64.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    pub mtime: Option<i64>,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub unicode_name: Option<String>,
    pub aes: bool,
}

/// Reads the name and extra lengths of a local header and returns the
/// offset of the entry data relative to the header.
pub fn local_data_start(header: &[u8; LOCAL_HEADER_LEN as usize]) -> Result<u64> {
    if &header[..4] != LOCAL_HEADER_SIGNATURE {
        return Err(ArchiveError::corrupt("local file header signature missing"));
    }
    let name_len = u16::from_le_bytes([header[26], header[27]]);
    let extra_len = u16::from_le_bytes([header[28], header[29]]);
    Ok(LOCAL_HEADER_LEN + u64::from(name_len) + u64::from(extra_len))
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

/// Converts MS-DOS date and time fields, read as UTC.
pub fn dos_datetime(date: u16, time: u16) -> Option<SystemTime> {
    let year = i64::from(date >> 9) + 1980;
    let month = i64::from((date >> 5) & 0x0F);
    let day = i64::from(date & 0x1F);
    if !(1..=12).contains(&month) || day == 0 {
        return None;
    }
    let hours = i64::from(time >> 11);
    let minutes = i64::from((time >> 5) & 0x3F);
    let seconds = i64::from(time & 0x1F) * 2;

    // days from civil date, proleptic Gregorian calendar
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;

    unix_time(days * 86_400 + hours * 3_600 + minutes * 60 + seconds)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;
    use std::time::UNIX_EPOCH;

    use super::*;

    fn central(name: &[u8], extra: &[u8], fields: impl FnOnce(&mut [u8; 46])) -> Vec<u8> {
        let mut fixed = [0u8; 46];
        fixed[..4].copy_from_slice(CENTRAL_HEADER_SIGNATURE);
        fixed[28..30].copy_from_slice(&(name.len() as u16).to_le_bytes());
        fixed[30..32].copy_from_slice(&(extra.len() as u16).to_le_bytes());
        fields(&mut fixed);
        let mut record = fixed.to_vec();
        record.extend_from_slice(name);
        record.extend_from_slice(extra);
        record
    }

    #[test]
    fn test_eocd() {
        let mut data = EndOfCentralDirectory::SIGNATURE.to_vec();
        data.extend([0, 0, 0, 0, 2, 0, 2, 0, 100, 0, 0, 0, 50, 0, 0, 0, 0, 0]);
        let eocd = EndOfCentralDirectory::from_bytes(&data).unwrap();
        assert_eq!(eocd.total_entries, 2);
        assert_eq!(eocd.cd_offset, 50);
        assert!(!eocd.needs_zip64());
        assert!(EndOfCentralDirectory::from_bytes(&data[..10]).is_err());
    }

    #[test]
    fn test_zip64_extra_order() {
        let mut extra = vec![0x01, 0x00, 16, 0];
        extra.extend(5_000_000_000u64.to_le_bytes());
        extra.extend(7u64.to_le_bytes());
        let record = central(b"big.bin", &extra, |f| {
            f[20..24].copy_from_slice(&[0xFF; 4]);
            f[24..28].copy_from_slice(&[0xFF; 4]);
        });
        let header = CentralHeader::read(&mut &record[..]).unwrap();
        // uncompressed first, then compressed
        assert_eq!(header.uncompressed_size, 5_000_000_000);
        assert_eq!(header.compressed_size, 7);
    }

    #[test]
    fn test_zip64_extra_too_short() {
        let extra = [0x01, 0x00, 4, 0, 1, 2, 3, 4];
        let record = central(b"x", &extra, |f| f[24..28].copy_from_slice(&[0xFF; 4]));
        assert!(CentralHeader::read(&mut &record[..]).is_err());
    }

    #[test]
    fn test_info_zip_extras() {
        let mut extra = vec![0x55, 0x54, 5, 0, 1];
        extra.extend(60i32.to_le_bytes());
        extra.extend([0x75, 0x78, 7, 0, 1, 2, 0xE8, 0x03, 2, 0xE9, 0x03]);
        let record = central(b"f", &extra, |_| {});
        let header = CentralHeader::read(&mut &record[..]).unwrap();
        assert_eq!(header.extras.uid, Some(1000));
        assert_eq!(header.extras.gid, Some(1001));
        assert_eq!(
            header.modified().unwrap(),
            UNIX_EPOCH + Duration::from_secs(60)
        );
    }

    #[test]
    fn test_unicode_path_requires_matching_crc() {
        let raw = [b'n', 0x82];
        let mut extra = vec![0x75, 0x70, 0, 0, 1];
        extra.extend(crc32(&raw).to_le_bytes());
        extra.extend("né".as_bytes());
        let len = (extra.len() - 4) as u16;
        extra[2..4].copy_from_slice(&len.to_le_bytes());
        let header = CentralHeader::read(&mut &central(&raw, &extra, |_| {})[..]).unwrap();
        assert_eq!(header.decoded_name(), "né");

        extra[5] ^= 0xFF;
        let header = CentralHeader::read(&mut &central(&raw, &extra, |_| {})[..]).unwrap();
        assert_eq!(header.decoded_name(), "né");
        assert_eq!(header.extras.unicode_name, None);
    }

    #[test]
    fn test_dos_datetime() {
        // 2024-03-01 12:30:10
        let date = ((2024 - 1980) << 9) | (3 << 5) | 1;
        let time = (12 << 11) | (30 << 5) | 5;
        let secs = dos_datetime(date, time)
            .unwrap()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert_eq!(secs, 1_709_296_210);
        assert_eq!(dos_datetime(0, 0), None);
    }

    #[test]
    fn test_local_data_start() {
        let mut header = [0u8; 30];
        header[..4].copy_from_slice(LOCAL_HEADER_SIGNATURE);
        header[26] = 5;
        header[28] = 4;
        assert_eq!(local_data_start(&header).unwrap(), 39);
        header[0] = b'X';
        assert!(local_data_start(&header).is_err());
    }
}
