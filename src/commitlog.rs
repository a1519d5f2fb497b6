use crate::series::{Datapoint, SeriesId};
use crate::shard::ShardId;
use crate::time::UnixNanos;
use crc32fast::Hasher as Crc32Hasher;
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SEGMENT_PREFIX: &str = "commitlog-";
const SEGMENT_SUFFIX: &str = ".db";
const COMMITLOG_DIR: &str = "commitlog";

// namespace_len + series_len + shard + timestamp + value
const FRAME_HEADER_LEN: usize = 2 + 2 + 4 + 8 + 8;
const CRC_LEN: usize = 4;

/// One recorded write: enough to route the datapoint back to its series.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitLogEntry {
    pub namespace: String,
    pub shard: ShardId,
    pub series: SeriesId,
    pub datapoint: Datapoint,
}

pub fn commitlog_dir(root: &Path) -> PathBuf {
    root.join(COMMITLOG_DIR)
}

/// Append-only writer for one segment. Every append is followed by a data
/// sync so replay never observes a frame ahead of its datapoint.
#[derive(Debug)]
pub struct CommitLogWriter {
    path: PathBuf,
    file: File,
    cursor: u64,
}

impl CommitLogWriter {
    pub fn open(root: &Path, seq: u64) -> Result<Self, CommitLogError> {
        let dir = commitlog_dir(root);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{SEGMENT_PREFIX}{seq:010}{SEGMENT_SUFFIX}"));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let cursor = file.seek(SeekFrom::End(0))?;
        Ok(Self { path, file, cursor })
    }

    pub fn append(&mut self, entry: &CommitLogEntry) -> Result<(), CommitLogError> {
        let frame = encode_frame(entry)?;
        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        self.cursor += frame.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitLogSegmentRef {
    pub seq: u64,
    pub path: PathBuf,
}

/// Segments under `<root>/commitlog/`, ascending by sequence. A missing
/// directory means no segments.
pub fn discover_segments(root: &Path) -> Result<Vec<CommitLogSegmentRef>, CommitLogError> {
    let dir = commitlog_dir(root);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(digits) = name
            .strip_prefix(SEGMENT_PREFIX)
            .and_then(|rest| rest.strip_suffix(SEGMENT_SUFFIX))
        else {
            continue;
        };
        let seq = digits
            .parse()
            .map_err(|_| CommitLogError::InvalidSegmentName { path: entry.path() })?;
        segments.push(CommitLogSegmentRef {
            seq,
            path: entry.path(),
        });
    }
    segments.sort_by_key(|segment| segment.seq);
    Ok(segments)
}

#[derive(Debug)]
pub struct CommitLogReplayResult {
    pub entries: Vec<CommitLogEntry>,
    pub truncation: Option<CommitLogTruncation>,
}

/// A torn tail: everything before `offset` replayed cleanly, the remainder
/// of the segment is unusable.
#[derive(Debug, Clone)]
pub struct CommitLogTruncation {
    pub segment_seq: u64,
    pub path: PathBuf,
    pub offset: u64,
    pub truncated_bytes: u64,
}

pub struct CommitLogReplayScanner;

impl CommitLogReplayScanner {
    pub fn scan(segments: &[CommitLogSegmentRef]) -> Result<CommitLogReplayResult, CommitLogError> {
        let mut entries = Vec::new();
        for segment in segments {
            let mut file = File::open(&segment.path)?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            let mut cursor = 0usize;
            while cursor < buf.len() {
                match decode_frame(&buf, cursor) {
                    Ok((entry, next_cursor)) => {
                        entries.push(entry);
                        cursor = next_cursor;
                    }
                    Err(_) => {
                        let truncated_bytes = (buf.len() - cursor) as u64;
                        debug!(
                            "event=commitlog_torn_tail segment={} offset={} truncated_bytes={}",
                            segment.seq, cursor, truncated_bytes
                        );
                        return Ok(CommitLogReplayResult {
                            entries,
                            truncation: Some(CommitLogTruncation {
                                segment_seq: segment.seq,
                                path: segment.path.clone(),
                                offset: cursor as u64,
                                truncated_bytes,
                            }),
                        });
                    }
                }
            }
        }
        Ok(CommitLogReplayResult {
            entries,
            truncation: None,
        })
    }
}

#[derive(Debug, Error)]
pub enum CommitLogError {
    #[error("commit log I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid commit log segment filename: {path:?}")]
    InvalidSegmentName { path: PathBuf },
    #[error("commit log identifier exceeds frame limit ({len} bytes)")]
    IdentifierTooLong { len: usize },
}

fn encode_frame(entry: &CommitLogEntry) -> Result<Vec<u8>, CommitLogError> {
    if entry.namespace.len() > u16::MAX as usize {
        return Err(CommitLogError::IdentifierTooLong {
            len: entry.namespace.len(),
        });
    }
    if entry.series.len() > u16::MAX as usize {
        return Err(CommitLogError::IdentifierTooLong {
            len: entry.series.len(),
        });
    }
    let mut frame =
        Vec::with_capacity(FRAME_HEADER_LEN + entry.namespace.len() + entry.series.len() + CRC_LEN);
    frame.extend_from_slice(&(entry.namespace.len() as u16).to_le_bytes());
    frame.extend_from_slice(&(entry.series.len() as u16).to_le_bytes());
    frame.extend_from_slice(&entry.shard.to_le_bytes());
    frame.extend_from_slice(&entry.datapoint.timestamp.nanos().to_le_bytes());
    frame.extend_from_slice(&entry.datapoint.value.to_bits().to_le_bytes());
    frame.extend_from_slice(entry.namespace.as_bytes());
    frame.extend_from_slice(entry.series.as_bytes());

    let mut hasher = Crc32Hasher::new();
    hasher.update(&frame);
    frame.extend_from_slice(&hasher.finalize().to_le_bytes());
    Ok(frame)
}

#[derive(Debug)]
struct FrameDecodeError;

fn decode_frame(buf: &[u8], cursor: usize) -> Result<(CommitLogEntry, usize), FrameDecodeError> {
    if buf.len() - cursor < FRAME_HEADER_LEN + CRC_LEN {
        return Err(FrameDecodeError);
    }
    let read_u16 = |offset: usize| -> Result<u16, FrameDecodeError> {
        buf[offset..offset + 2]
            .try_into()
            .map(u16::from_le_bytes)
            .map_err(|_| FrameDecodeError)
    };
    let read_u32 = |offset: usize| -> Result<u32, FrameDecodeError> {
        buf[offset..offset + 4]
            .try_into()
            .map(u32::from_le_bytes)
            .map_err(|_| FrameDecodeError)
    };
    let read_u64 = |offset: usize| -> Result<u64, FrameDecodeError> {
        buf[offset..offset + 8]
            .try_into()
            .map(u64::from_le_bytes)
            .map_err(|_| FrameDecodeError)
    };

    let namespace_len = read_u16(cursor)? as usize;
    let series_len = read_u16(cursor + 2)? as usize;
    let frame_len = FRAME_HEADER_LEN + namespace_len + series_len;
    if buf.len() - cursor < frame_len + CRC_LEN {
        return Err(FrameDecodeError);
    }

    let crc_offset = cursor + frame_len;
    let mut hasher = Crc32Hasher::new();
    hasher.update(&buf[cursor..crc_offset]);
    if hasher.finalize() != read_u32(crc_offset)? {
        return Err(FrameDecodeError);
    }

    let shard = read_u32(cursor + 4)?;
    let nanos = read_u64(cursor + 8)? as i64;
    let bits = read_u64(cursor + 16)?;
    let strings_start = cursor + FRAME_HEADER_LEN;
    let namespace = std::str::from_utf8(&buf[strings_start..strings_start + namespace_len])
        .map_err(|_| FrameDecodeError)?
        .to_string();
    let series = std::str::from_utf8(
        &buf[strings_start + namespace_len..strings_start + namespace_len + series_len],
    )
    .map_err(|_| FrameDecodeError)?
    .to_string();

    let entry = CommitLogEntry {
        namespace,
        shard,
        series,
        datapoint: Datapoint {
            timestamp: UnixNanos::from_nanos(nanos),
            value: f64::from_bits(bits),
        },
    };
    Ok((entry, crc_offset + CRC_LEN))
}
