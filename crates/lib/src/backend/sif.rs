//! Just enough of the SIF container format to find the root filesystem
//! partition inside a `.sif` file.
//!
//! All integers are little-endian. The global header is 128 bytes; object
//! descriptors are fixed 585-byte records starting at `descriptors_offset`.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

pub(crate) const SIF_MAGIC: &[u8; 9] = b"SIF_MAGIC";
const MAGIC_OFFSET: usize = 32;
const HEADER_LEN: usize = 128;
const DESCRIPTOR_LEN: usize = 585;

/// Descriptors beyond this count mean the file is corrupt.
const MAX_DESCRIPTORS: u64 = 4096;

const DATA_PARTITION: i32 = 0x4004;
const FS_SQUASH: i32 = 1;
const PART_PRIM_SYS: i32 = 2;

/// A squashfs partition embedded in a SIF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Partition {
  pub offset: u64,
  pub size: u64,
  pub primary: bool,
}

/// Whether `prefix` starts with the SIF launch script and magic.
pub(crate) fn is_sif(prefix: &[u8]) -> bool {
  prefix.len() >= MAGIC_OFFSET + SIF_MAGIC.len() && &prefix[MAGIC_OFFSET..MAGIC_OFFSET + SIF_MAGIC.len()] == SIF_MAGIC
}

fn le_i32(buf: &[u8], at: usize) -> i32 {
  let mut b = [0u8; 4];
  b.copy_from_slice(&buf[at..at + 4]);
  i32::from_le_bytes(b)
}

fn le_i64(buf: &[u8], at: usize) -> i64 {
  let mut b = [0u8; 8];
  b.copy_from_slice(&buf[at..at + 8]);
  i64::from_le_bytes(b)
}

fn invalid(message: &str) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// Find the primary system partition of a SIF file, falling back to the
/// first squashfs partition. `Ok(None)` when the file has no usable partition.
pub(crate) fn find_root_partition(path: &Path) -> io::Result<Option<Partition>> {
  let mut file = File::open(path)?;
  let mut header = [0u8; HEADER_LEN];
  file.read_exact(&mut header)?;
  if !is_sif(&header) {
    return Err(invalid("not a SIF file"));
  }

  // launch[32] magic[10] version[3] arch[3] id[16], then eight i64 fields
  let descriptors_total = le_i64(&header, 88);
  let descriptors_offset = le_i64(&header, 96);
  if descriptors_total < 0 || descriptors_total as u64 > MAX_DESCRIPTORS || descriptors_offset < 0 {
    return Err(invalid("corrupt SIF header"));
  }

  file.seek(SeekFrom::Start(descriptors_offset as u64))?;
  let mut partitions = Vec::new();
  let mut record = [0u8; DESCRIPTOR_LEN];
  for _ in 0..descriptors_total {
    file.read_exact(&mut record)?;
    if let Some(partition) = parse_descriptor(&record) {
      partitions.push(partition);
    }
  }

  Ok(
    partitions
      .iter()
      .find(|p| p.primary)
      .or_else(|| partitions.first())
      .copied(),
  )
}

// datatype i32, used u8, id u32, groupid u32, link u32, offset i64, size i64,
// size_with_padding i64, ctime i64, mtime i64, uid i64, gid i64, name[128],
// extra[384]; for partitions extra starts with fstype i32, parttype i32
fn parse_descriptor(record: &[u8; DESCRIPTOR_LEN]) -> Option<Partition> {
  let datatype = le_i32(record, 0);
  let used = record[4] != 0;
  if !used || datatype != DATA_PARTITION {
    return None;
  }

  let offset = le_i64(record, 17);
  let size = le_i64(record, 25);
  let fstype = le_i32(record, 201);
  let parttype = le_i32(record, 205);
  if fstype != FS_SQUASH || offset < 0 || size <= 0 {
    return None;
  }

  Some(Partition {
    offset: offset as u64,
    size: size as u64,
    primary: parttype == PART_PRIM_SYS,
  })
}

/// Build a SIF image around `partitions` (`(payload, parttype)`), for tests.
#[cfg(test)]
pub(crate) fn build_test_sif(partitions: &[(&[u8], i32)]) -> Vec<u8> {
  let descriptors_offset = HEADER_LEN;
  let data_offset = descriptors_offset + DESCRIPTOR_LEN * partitions.len();

  let mut out = vec![0u8; data_offset];
  out[..10].copy_from_slice(b"#!/bin/sh\n");
  out[MAGIC_OFFSET..MAGIC_OFFSET + SIF_MAGIC.len()].copy_from_slice(SIF_MAGIC);
  out[88..96].copy_from_slice(&(partitions.len() as i64).to_le_bytes());
  out[96..104].copy_from_slice(&(descriptors_offset as i64).to_le_bytes());

  let mut cursor = data_offset;
  for (index, (payload, parttype)) in partitions.iter().enumerate() {
    let at = descriptors_offset + index * DESCRIPTOR_LEN;
    out[at..at + 4].copy_from_slice(&DATA_PARTITION.to_le_bytes());
    out[at + 4] = 1;
    out[at + 17..at + 25].copy_from_slice(&(cursor as i64).to_le_bytes());
    out[at + 25..at + 33].copy_from_slice(&(payload.len() as i64).to_le_bytes());
    out[at + 201..at + 205].copy_from_slice(&FS_SQUASH.to_le_bytes());
    out[at + 205..at + 209].copy_from_slice(&parttype.to_le_bytes());
    cursor += payload.len();
  }
  for (payload, _) in partitions {
    out.extend_from_slice(payload);
  }
  out
}
