//! Record types and the on-disk frame format
//!
//! Each store log is a sequence of frames:
//!
//! ```text
//! +------------------+
//! | Frame Length     | (u32 LE, includes itself)
//! +------------------+
//! | Key              | (length-prefixed string)
//! +------------------+
//! | Schema Version   | (u32 LE)
//! +------------------+
//! | Timestamp        | (i64 LE, unix millis)
//! +------------------+
//! | Flags            | (u8: bit0 tombstone, bit1 synced)
//! +------------------+
//! | Checksum         | (length-prefixed string, payload checksum)
//! +------------------+
//! | Header CRC       | (u32 LE, over every byte above)
//! +------------------+
//! | Payload          | (length-prefixed canonical JSON bytes)
//! +------------------+
//! ```
//!
//! The header CRC catches structural damage. The payload is guarded only by
//! the record checksum, which is verified when the payload is read.

use std::io::{self, Read};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::integrity;

const FLAG_TOMBSTONE: u8 = 0b01;
const FLAG_SYNCED: u8 = 0b10;

/// Smallest possible frame: length + empty key + version + timestamp +
/// flags + empty checksum + header crc + empty payload
pub const MIN_FRAME_SIZE: usize = 4 + 4 + 4 + 8 + 1 + 4 + 4 + 4;

/// A stored record as seen by callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Key, unique within its store
    pub id: String,
    /// Owning store
    pub store: String,
    /// Opaque tool state
    pub payload: Value,
    /// Unix millis of the write, non-decreasing per id
    pub timestamp: i64,
    /// `integrity::hash(payload)` at write time
    pub checksum: String,
    /// Schema version the record was written under
    pub schema_version: u32,
    /// Whether a remote copy is known to be current
    #[serde(default)]
    pub synced: bool,
}

impl Record {
    /// Builds a record, computing its checksum
    pub fn new(
        store: impl Into<String>,
        id: impl Into<String>,
        payload: Value,
        timestamp: i64,
        schema_version: u32,
    ) -> Self {
        let checksum = integrity::hash(&payload);
        Self {
            id: id.into(),
            store: store.into(),
            payload,
            timestamp,
            checksum,
            schema_version,
            synced: false,
        }
    }

    /// Recomputes the payload checksum and compares it to the stored one
    pub fn verify(&self) -> bool {
        integrity::verify(&self.payload, &self.checksum)
    }
}

/// One frame of a store log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFrame {
    pub key: String,
    pub schema_version: u32,
    pub timestamp: i64,
    pub tombstone: bool,
    pub synced: bool,
    pub checksum: String,
    pub payload: Vec<u8>,
}

impl RecordFrame {
    /// Frame for a live record; payload is stored in canonical form
    pub fn live(key: &str, schema_version: u32, timestamp: i64, payload: &Value) -> Self {
        let bytes = integrity::canonical_bytes(payload);
        Self {
            key: key.to_string(),
            schema_version,
            timestamp,
            tombstone: false,
            synced: false,
            checksum: integrity::checksum_bytes(&bytes),
            payload: bytes,
        }
    }

    /// Frame marking `key` deleted
    pub fn tombstone(key: &str, schema_version: u32, timestamp: i64) -> Self {
        Self {
            key: key.to_string(),
            schema_version,
            timestamp,
            tombstone: true,
            synced: false,
            checksum: integrity::checksum_bytes(&[]),
            payload: Vec::new(),
        }
    }

    /// Verifies the payload checksum and parses the payload.
    ///
    /// Returns a human-readable reason on mismatch or malformed JSON.
    pub fn payload_value(&self) -> Result<Value, String> {
        if !integrity::verify_bytes(&self.payload, &self.checksum) {
            return Err(format!(
                "Checksum mismatch: stored {}, computed {}",
                self.checksum,
                integrity::checksum_bytes(&self.payload)
            ));
        }
        serde_json::from_slice(&self.payload)
            .map_err(|e| format!("Payload is not valid JSON: {}", e))
    }

    /// Converts a verified live frame into a [`Record`]
    pub fn to_record(&self, store: &str) -> Result<Record, String> {
        let payload = self.payload_value()?;
        Ok(Record {
            id: self.key.clone(),
            store: store.to_string(),
            payload,
            timestamp: self.timestamp,
            checksum: self.checksum.clone(),
            schema_version: self.schema_version,
            synced: self.synced,
        })
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.tombstone {
            flags |= FLAG_TOMBSTONE;
        }
        if self.synced {
            flags |= FLAG_SYNCED;
        }
        flags
    }

    /// Serialize the complete frame
    pub fn encode(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(64 + self.key.len());
        // Length placeholder, patched below
        header.extend_from_slice(&0u32.to_le_bytes());
        put_bytes(&mut header, self.key.as_bytes());
        header.extend_from_slice(&self.schema_version.to_le_bytes());
        header.extend_from_slice(&self.timestamp.to_le_bytes());
        header.push(self.flags());
        put_bytes(&mut header, self.checksum.as_bytes());

        let frame_len = (header.len() + 4 + 4 + self.payload.len()) as u32;
        header[0..4].copy_from_slice(&frame_len.to_le_bytes());

        let header_crc = {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&header);
            hasher.finalize()
        };

        let mut frame = header;
        frame.reserve(8 + self.payload.len());
        frame.extend_from_slice(&header_crc.to_le_bytes());
        put_bytes(&mut frame, &self.payload);
        frame
    }

    /// Deserialize one frame from the start of `data`.
    ///
    /// Verifies the header CRC but not the payload checksum. Returns the
    /// frame and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> io::Result<(Self, usize)> {
        if data.len() < MIN_FRAME_SIZE {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "Frame too short"));
        }

        let frame_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if frame_len < MIN_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid frame length: {}", frame_len),
            ));
        }
        if data.len() < frame_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Frame truncated: expected {} bytes, got {}", frame_len, data.len()),
            ));
        }

        let mut cursor = io::Cursor::new(&data[4..frame_len]);
        let key = read_string(&mut cursor)?;
        let schema_version = read_u32(&mut cursor)?;
        let mut ts = [0u8; 8];
        cursor.read_exact(&mut ts)?;
        let timestamp = i64::from_le_bytes(ts);
        let mut flags = [0u8; 1];
        cursor.read_exact(&mut flags)?;
        let checksum = read_string(&mut cursor)?;

        let header_end = 4 + cursor.position() as usize;
        let stored_crc = read_u32(&mut cursor)?;
        let computed_crc = {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&data[..header_end]);
            hasher.finalize()
        };
        if stored_crc != computed_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Header checksum mismatch: computed {:08x}, stored {:08x}",
                    computed_crc, stored_crc
                ),
            ));
        }

        let payload = read_bytes(&mut cursor)?;
        if 4 + cursor.position() as usize != frame_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Frame length does not match its contents",
            ));
        }

        Ok((
            Self {
                key,
                schema_version,
                timestamp,
                tombstone: flags[0] & FLAG_TOMBSTONE != 0,
                synced: flags[0] & FLAG_SYNCED != 0,
                checksum,
                payload,
            },
            frame_len,
        ))
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_bytes<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    let mut buf = Vec::new();
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Length prefix exceeds frame",
        ));
    }
    Ok(buf)
}

fn read_string<R: Read>(reader: &mut R) -> io::Result<String> {
    let bytes = read_bytes(reader)?;
    String::from_utf8(bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("Invalid UTF-8: {}", e)))
}
