//! CRC-framed hint record codec.
//!
//! Frame layout (little-endian):
//! `magic(4) | version(2) | flags(2) | replay_position(8) | schema_version(4)
//! | table_len(2) | payload_len(4) | crc32(4) | table bytes | payload bytes`
//!
//! The CRC covers schema_version, table bytes and payload bytes — not the
//! header fields that precede it, mirroring the teacher's replication frame
//! codec.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::constants::{FRAME_MAGIC, FRAME_VERSION, MAX_FRAME_PAYLOAD_BYTES};
use crate::error::{HintError, Result};
use crate::types::{ReplayPosition, SchemaVersion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintFrame {
  pub replay_position: ReplayPosition,
  pub schema_version: SchemaVersion,
  pub table: String,
  pub payload: Vec<u8>,
}

impl HintFrame {
  pub fn encoded_len(&self) -> usize {
    crate::constants::FRAME_HEADER_SIZE + self.table.len() + self.payload.len()
  }
}

pub fn write_frame<W: Write>(writer: &mut W, frame: &HintFrame) -> Result<()> {
  let table_bytes = frame.table.as_bytes();
  if table_bytes.len() > u16::MAX as usize {
    return Err(HintError::io("<frame>", io::Error::new(io::ErrorKind::InvalidInput, "table name too long")));
  }
  if frame.payload.len() as u64 > MAX_FRAME_PAYLOAD_BYTES as u64 {
    return Err(HintError::io(
      "<frame>",
      io::Error::new(io::ErrorKind::InvalidInput, "payload exceeds MAX_FRAME_PAYLOAD_BYTES"),
    ));
  }

  let mut crc = crc32fast::Hasher::new();
  crc.update(&frame.schema_version.0.to_le_bytes());
  crc.update(table_bytes);
  crc.update(&frame.payload);
  let checksum = crc.finalize();

  let map_io = |e: io::Error| HintError::io("<frame>", e);

  writer.write_u32::<LittleEndian>(FRAME_MAGIC).map_err(map_io)?;
  writer.write_u16::<LittleEndian>(FRAME_VERSION).map_err(map_io)?;
  writer.write_u16::<LittleEndian>(0).map_err(map_io)?; // flags
  writer.write_u64::<LittleEndian>(frame.replay_position.0).map_err(map_io)?;
  writer.write_u32::<LittleEndian>(frame.schema_version.0).map_err(map_io)?;
  writer.write_u16::<LittleEndian>(table_bytes.len() as u16).map_err(map_io)?;
  writer.write_u32::<LittleEndian>(frame.payload.len() as u32).map_err(map_io)?;
  writer.write_u32::<LittleEndian>(checksum).map_err(map_io)?;
  writer.write_all(table_bytes).map_err(map_io)?;
  writer.write_all(&frame.payload).map_err(map_io)?;
  Ok(())
}

/// Reads one frame. Returns `Ok(None)` on a clean end-of-file (zero bytes
/// read before the magic field) — the signal that the reader has reached
/// the end of a well-formed, fully-flushed segment.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<HintFrame>> {
  let map_io = |e: io::Error| HintError::io("<frame>", e);

  let magic = match reader.read_u32::<LittleEndian>() {
    Ok(v) => v,
    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
    Err(e) => return Err(map_io(e)),
  };
  if magic != FRAME_MAGIC {
    return Err(HintError::io("<frame>", io::Error::new(io::ErrorKind::InvalidData, "bad frame magic")));
  }
  let version = reader.read_u16::<LittleEndian>().map_err(map_io)?;
  if version != FRAME_VERSION {
    return Err(HintError::VersionMismatch { required: version, current: FRAME_VERSION });
  }
  let _flags = reader.read_u16::<LittleEndian>().map_err(map_io)?;
  let replay_position = reader.read_u64::<LittleEndian>().map_err(map_io)?;
  let schema_version = reader.read_u32::<LittleEndian>().map_err(map_io)?;
  let table_len = reader.read_u16::<LittleEndian>().map_err(map_io)? as usize;
  let payload_len = reader.read_u32::<LittleEndian>().map_err(map_io)?;
  if payload_len > MAX_FRAME_PAYLOAD_BYTES {
    return Err(HintError::io("<frame>", io::Error::new(io::ErrorKind::InvalidData, "payload_len too large")));
  }
  let stored_crc = reader.read_u32::<LittleEndian>().map_err(map_io)?;

  let mut table_buf = vec![0u8; table_len];
  reader.read_exact(&mut table_buf).map_err(map_io)?;
  let mut payload = vec![0u8; payload_len as usize];
  reader.read_exact(&mut payload).map_err(map_io)?;

  let mut crc = crc32fast::Hasher::new();
  crc.update(&schema_version.to_le_bytes());
  crc.update(&table_buf);
  crc.update(&payload);
  let computed = crc.finalize();
  if computed != stored_crc {
    return Err(HintError::CrcMismatch { stored: stored_crc, computed });
  }

  let table = String::from_utf8(table_buf)
    .map_err(|e| HintError::io("<frame>", io::Error::new(io::ErrorKind::InvalidData, e)))?;

  Ok(Some(HintFrame { replay_position: ReplayPosition(replay_position), schema_version: SchemaVersion(schema_version), table, payload }))
}
