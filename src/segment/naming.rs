//! Segment filename scheme: a fixed prefix and a zero-padded, strictly
//! increasing sequence number, so a directory listing sorts lexicographically
//! in write order (§6 filesystem layout).

use std::path::{Path, PathBuf};

use crate::constants::{SEGMENT_FILENAME_PREFIX, SEGMENT_FILENAME_SUFFIX_WIDTH};

pub fn segment_file_name(seq: u64) -> String {
  format!("{SEGMENT_FILENAME_PREFIX}{seq:0width$}", width = SEGMENT_FILENAME_SUFFIX_WIDTH)
}

pub fn segment_path(dir: &Path, seq: u64) -> PathBuf {
  dir.join(segment_file_name(seq))
}

/// Parses the sequence number back out of a segment filename, returning
/// `None` for anything not matching the fixed prefix/width scheme (so a
/// directory scan can silently skip foreign files).
pub fn parse_segment_seq(file_name: &str) -> Option<u64> {
  let suffix = file_name.strip_prefix(SEGMENT_FILENAME_PREFIX)?;
  if suffix.len() != SEGMENT_FILENAME_SUFFIX_WIDTH {
    return None;
  }
  suffix.parse::<u64>().ok()
}

/// Lists segment files under `dir` in ascending write order. Ignores
/// entries that don't match the naming scheme.
pub fn list_segment_files(dir: &Path) -> std::io::Result<Vec<(u64, PathBuf)>> {
  if !dir.exists() {
    return Ok(Vec::new());
  }
  let mut out = Vec::new();
  for entry in std::fs::read_dir(dir)? {
    let entry = entry?;
    let name = entry.file_name();
    let Some(name) = name.to_str() else { continue };
    if let Some(seq) = parse_segment_seq(name) {
      out.push((seq, entry.path()));
    }
  }
  out.sort_by_key(|(seq, _)| *seq);
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_sequence_number() {
    let name = segment_file_name(42);
    assert_eq!(parse_segment_seq(&name), Some(42));
  }

  #[test]
  fn ignores_foreign_files() {
    assert_eq!(parse_segment_seq("manifest.json"), None);
    assert_eq!(parse_segment_seq("hint-notanumber"), None);
  }

  #[test]
  fn lists_in_ascending_order() {
    let dir = tempfile::tempdir().unwrap();
    for seq in [3u64, 1, 2] {
      std::fs::write(segment_path(dir.path(), seq), b"x").unwrap();
    }
    std::fs::write(dir.path().join("not-a-segment.txt"), b"x").unwrap();
    let files = list_segment_files(dir.path()).unwrap();
    let seqs: Vec<u64> = files.iter().map(|(s, _)| *s).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
  }
}
