//! Decryption layers.
//!
//! Only the traditional PKWARE stream cipher ("ZipCrypto") is implemented.
//! It is weak and exists for reading legacy archives.

use std::io;
use std::io::Read;

use crate::ArchiveError;

/// CRC-32 lookup table (polynomial 0xEDB88320, reflected).
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

const INITIAL_KEY0: u32 = 0x1234_5678;
const INITIAL_KEY1: u32 = 0x2345_6789;
const INITIAL_KEY2: u32 = 0x3456_7890;

/// Size of the encryption header preceding ZipCrypto data.
pub const ZIPCRYPTO_HEADER_LEN: usize = 12;

#[inline]
fn crc32_update(crc: u32, byte: u8) -> u32 {
    let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
    CRC32_TABLE[index] ^ (crc >> 8)
}

/// Key state of the ZipCrypto stream cipher.
#[derive(Debug, Clone)]
pub struct ZipCryptoKeys {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl ZipCryptoKeys {
    /// Initializes the key state from a password.
    #[must_use]
    pub fn new(password: &[u8]) -> Self {
        let mut keys = Self {
            key0: INITIAL_KEY0,
            key1: INITIAL_KEY1,
            key2: INITIAL_KEY2,
        };
        for &byte in password {
            keys.update(byte);
        }
        keys
    }

    #[inline]
    fn update(&mut self, byte: u8) {
        self.key0 = crc32_update(self.key0, byte);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xFF)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.key2 = crc32_update(self.key2, (self.key1 >> 24) as u8);
    }

    #[inline]
    fn stream_byte(&self) -> u8 {
        let temp = (self.key2 | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    /// Decrypts one byte.
    #[inline]
    pub fn decrypt_byte(&mut self, byte: u8) -> u8 {
        let plain = byte ^ self.stream_byte();
        self.update(plain);
        plain
    }

    /// Encrypts one byte.
    #[inline]
    pub fn encrypt_byte(&mut self, byte: u8) -> u8 {
        let cipher = byte ^ self.stream_byte();
        self.update(byte);
        cipher
    }

    /// Decrypts a buffer in place.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte = self.decrypt_byte(*byte);
        }
    }

    /// Encrypts a buffer in place.
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte = self.encrypt_byte(*byte);
        }
    }
}

/// Returns `true` if `password` decrypts `header` to the expected check byte.
pub fn zipcrypto_header_matches(
    password: &[u8],
    header: &[u8; ZIPCRYPTO_HEADER_LEN],
    check_byte: u8,
) -> bool {
    let mut keys = ZipCryptoKeys::new(password);
    let mut plain = *header;
    keys.decrypt(&mut plain);
    plain[ZIPCRYPTO_HEADER_LEN - 1] == check_byte
}

/// Decrypting reader that validates the password lazily, on the first read.
pub(crate) struct ZipCryptoReader<R> {
    inner: R,
    password: Option<Vec<u8>>,
    check_byte: u8,
    entry: String,
    keys: Option<ZipCryptoKeys>,
}

impl<R: Read> ZipCryptoReader<R> {
    pub(crate) fn new(inner: R, password: Option<Vec<u8>>, check_byte: u8, entry: String) -> Self {
        Self {
            inner,
            password,
            check_byte,
            entry,
            keys: None,
        }
    }

    fn unlock(&mut self) -> io::Result<ZipCryptoKeys> {
        let Some(password) = self.password.take() else {
            return Err(ArchiveError::AuthenticationRequired {
                entry: self.entry.clone(),
            }
            .into_io());
        };

        let mut header = [0u8; ZIPCRYPTO_HEADER_LEN];
        self.inner.read_exact(&mut header).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ArchiveError::corrupt("encryption header truncated").into_io()
            } else {
                e
            }
        })?;

        let mut keys = ZipCryptoKeys::new(&password);
        keys.decrypt(&mut header);
        if header[ZIPCRYPTO_HEADER_LEN - 1] != self.check_byte {
            return Err(ArchiveError::AuthenticationFailed {
                entry: self.entry.clone(),
            }
            .into_io());
        }
        Ok(keys)
    }
}

impl<R: Read> Read for ZipCryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.keys.is_none() {
            self.keys = Some(self.unlock()?);
        }
        let n = self.inner.read(buf)?;
        if let Some(keys) = self.keys.as_mut() {
            keys.decrypt(&mut buf[..n]);
        }
        Ok(n)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encrypted(password: &[u8], check_byte: u8, plain: &[u8]) -> Vec<u8> {
        let mut keys = ZipCryptoKeys::new(password);
        let mut header = [0x5Au8; ZIPCRYPTO_HEADER_LEN];
        header[ZIPCRYPTO_HEADER_LEN - 1] = check_byte;
        keys.encrypt(&mut header);
        let mut body = plain.to_vec();
        keys.encrypt(&mut body);
        let mut out = header.to_vec();
        out.extend(body);
        out
    }

    #[test]
    fn test_round_trip() {
        let data = encrypted(b"secret", 0x42, b"attack at dawn");
        let mut reader =
            ZipCryptoReader::new(&data[..], Some(b"secret".to_vec()), 0x42, "e".into());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"attack at dawn");
    }

    #[test]
    fn test_missing_password() {
        let data = encrypted(b"secret", 0x42, b"x");
        let mut reader = ZipCryptoReader::new(&data[..], None, 0x42, "e".into());
        let err = ArchiveError::from(reader.read(&mut [0u8; 4]).unwrap_err());
        assert!(matches!(err, ArchiveError::AuthenticationRequired { .. }));
    }

    #[test]
    fn test_wrong_password() {
        let data = encrypted(b"secret", 0x42, b"x");
        let header: [u8; ZIPCRYPTO_HEADER_LEN] = data[..ZIPCRYPTO_HEADER_LEN].try_into().unwrap();
        // Pick a wrong password the check byte rejects.
        let wrong = ["wrong", "Secret", "secret!", "hunter2", "letmein", "12345"]
            .into_iter()
            .find(|p| !zipcrypto_header_matches(p.as_bytes(), &header, 0x42))
            .unwrap();

        let mut reader =
            ZipCryptoReader::new(&data[..], Some(wrong.as_bytes().to_vec()), 0x42, "e".into());
        let err = ArchiveError::from(reader.read(&mut [0u8; 4]).unwrap_err());
        assert!(matches!(err, ArchiveError::AuthenticationFailed { .. }));
    }

    #[test]
    fn test_truncated_header() {
        let mut reader = ZipCryptoReader::new(&[1u8, 2, 3][..], Some(b"p".to_vec()), 0, "e".into());
        let err = ArchiveError::from(reader.read(&mut [0u8; 4]).unwrap_err());
        assert!(matches!(err, ArchiveError::CorruptArchive { .. }));
    }

    #[test]
    fn test_header_matches_correct_password() {
        let data = encrypted(b"pw", 0x99, b"");
        let header: [u8; ZIPCRYPTO_HEADER_LEN] = data[..ZIPCRYPTO_HEADER_LEN].try_into().unwrap();
        assert!(zipcrypto_header_matches(b"pw", &header, 0x99));
    }
}
