//! Append-only segment file: a writer that assigns replay positions and
//! seals on size, and a sequential reader used by the replay sender.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{HintError, Result};
use crate::types::{ReplayPosition, SchemaVersion};

use super::frame::{read_frame, write_frame, HintFrame};

/// A single segment file open for append. Assigns monotonically increasing
/// replay positions starting from whatever was already on disk (so
/// reopening a partially-written segment after a crash resumes numbering
/// correctly).
pub struct SegmentLog {
  path: PathBuf,
  writer: Mutex<BufWriter<File>>,
  next_rp: AtomicU64,
  len_bytes: AtomicU64,
}

impl SegmentLog {
  /// Opens `path` for append, creating it if absent. If the file already
  /// contains frames (recovery after a crash, or a writer reattaching to
  /// an existing active segment) scans them first to recover the next
  /// replay position and current length.
  pub fn open_or_create_append(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| HintError::io(parent, e))?;
    }
    let (next_rp, len_bytes) = if path.exists() {
      let (next_rp, offset) = scan_tail(&path)?;
      // `scan_tail` stops at the last complete frame; a crash mid-append
      // can leave a partial frame's garbage bytes trailing at true EOF.
      // `OpenOptions::append` always writes at EOF regardless of any seek,
      // so that garbage must be physically truncated away now or every
      // frame appended after reopening is stranded behind it on replay.
      let truncator = OpenOptions::new().write(true).open(&path).map_err(|e| HintError::io(&path, e))?;
      truncator.set_len(offset).map_err(|e| HintError::io(&path, e))?;
      (next_rp, offset)
    } else {
      (0, 0)
    };
    let file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)
      .map_err(|e| HintError::io(&path, e))?;
    Ok(SegmentLog {
      path,
      writer: Mutex::new(BufWriter::new(file)),
      next_rp: AtomicU64::new(next_rp),
      len_bytes: AtomicU64::new(len_bytes),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn size_bytes(&self) -> u64 {
    self.len_bytes.load(Ordering::Acquire)
  }

  /// Appends one hint, assigning it the next replay position. Synchronous
  /// file I/O; callers on the async path run this inside
  /// `tokio::task::spawn_blocking`.
  pub fn append(&self, schema_version: SchemaVersion, table: &str, payload: &[u8]) -> Result<ReplayPosition> {
    let rp = ReplayPosition(self.next_rp.fetch_add(1, Ordering::AcqRel));
    let frame = HintFrame { replay_position: rp, schema_version, table: table.to_string(), payload: payload.to_vec() };
    let encoded_len = frame.encoded_len() as u64;
    let mut writer = self.writer.lock();
    write_frame(&mut *writer, &frame)?;
    self.len_bytes.fetch_add(encoded_len, Ordering::AcqRel);
    Ok(rp)
  }

  pub fn flush(&self) -> Result<()> {
    self.writer.lock().flush().map_err(|e| HintError::io(&self.path, e))
  }

  pub fn sync(&self) -> Result<()> {
    let mut writer = self.writer.lock();
    writer.flush().map_err(|e| HintError::io(&self.path, e))?;
    writer.get_ref().sync_data().map_err(|e| HintError::io(&self.path, e))
  }
}

fn scan_tail(path: &Path) -> Result<(u64, u64)> {
  let file = File::open(path).map_err(|e| HintError::io(path, e))?;
  let mut reader = BufReader::new(file);
  let mut last_rp: Option<ReplayPosition> = None;
  let mut offset = 0u64;
  loop {
    let before = offset;
    match read_frame(&mut reader) {
      Ok(Some(frame)) => {
        last_rp = Some(frame.replay_position);
        offset = reader.stream_position().map_err(|e| HintError::io(path, e))?;
        let _ = before;
      }
      Ok(None) => break,
      Err(_) => {
        // Trailing partial frame from a crash mid-append: truncate our view
        // at the last complete frame; the writer will overwrite the tail.
        break;
      }
    }
  }
  let next_rp = last_rp.map(|rp| rp.next().0).unwrap_or(0);
  Ok((next_rp, offset))
}

/// Sequential reader over a sealed or in-progress segment file, yielding
/// frames and the byte offset immediately after each one.
pub struct SegmentReader {
  reader: BufReader<File>,
}

impl SegmentReader {
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| HintError::io(path, e))?;
    Ok(SegmentReader { reader: BufReader::new(file) })
  }

  pub fn read_next(&mut self) -> Result<Option<HintFrame>> {
    read_frame(&mut self.reader)
  }

  pub fn seek_to_start(&mut self) -> Result<()> {
    self.reader.seek(SeekFrom::Start(0)).map_err(|e| HintError::io("<segment>", e))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn append_assigns_monotonic_positions() {
    let dir = tempfile::tempdir().unwrap();
    let log = SegmentLog::open_or_create_append(dir.path().join("hint-0000000000")).unwrap();
    let a = log.append(SchemaVersion(1), "users", b"one").unwrap();
    let b = log.append(SchemaVersion(1), "users", b"two").unwrap();
    assert_eq!(a, ReplayPosition(0));
    assert_eq!(b, ReplayPosition(1));
    log.sync().unwrap();

    let mut reader = SegmentReader::open(log.path()).unwrap();
    let f1 = reader.read_next().unwrap().unwrap();
    let f2 = reader.read_next().unwrap().unwrap();
    assert_eq!(f1.payload, b"one");
    assert_eq!(f2.payload, b"two");
    assert!(reader.read_next().unwrap().is_none());
  }

  #[test]
  fn reopen_resumes_replay_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hint-0000000000");
    {
      let log = SegmentLog::open_or_create_append(&path).unwrap();
      log.append(SchemaVersion(1), "users", b"one").unwrap();
      log.sync().unwrap();
    }
    let log2 = SegmentLog::open_or_create_append(&path).unwrap();
    let rp = log2.append(SchemaVersion(1), "users", b"two").unwrap();
    assert_eq!(rp, ReplayPosition(1));
  }
}
