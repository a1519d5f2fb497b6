use crate::series::{Datapoint, SeriesBlock, SeriesId};
use crate::shard::ShardId;
use crate::time::UnixNanos;
use crc32fast::Hasher as Crc32Hasher;
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const FILESET_PREFIX: &str = "fileset-";
const DATA_SUFFIX: &str = ".db";
const DIGEST_SUFFIX: &str = ".digest";
const INFO_SUFFIX: &str = ".info";
const SHARD_DIR_PREFIX: &str = "shard-";
const DATA_DIR: &str = "data";

/// Sidecar metadata persisted beside every volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesetInfo {
    pub block_start: i64,
    pub series_count: usize,
    pub datapoint_count: usize,
}

/// Canonical on-disk layout for durable series volumes:
/// `<root>/data/<namespace>/shard-<id>/fileset-<block_start>.db` plus a
/// `.digest` sidecar holding the SHA-256 of the volume.
#[derive(Debug, Clone)]
pub struct FilesetLayout {
    root: PathBuf,
}

impl FilesetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shard_dir(&self, namespace: &str, shard: ShardId) -> PathBuf {
        self.root
            .join(DATA_DIR)
            .join(namespace)
            .join(format!("{SHARD_DIR_PREFIX}{shard}"))
    }

    pub fn data_path(&self, namespace: &str, shard: ShardId, block_start: UnixNanos) -> PathBuf {
        self.shard_dir(namespace, shard)
            .join(format!("{FILESET_PREFIX}{}{DATA_SUFFIX}", block_start.nanos()))
    }

    pub fn digest_path(&self, namespace: &str, shard: ShardId, block_start: UnixNanos) -> PathBuf {
        self.shard_dir(namespace, shard)
            .join(format!("{FILESET_PREFIX}{}{DIGEST_SUFFIX}", block_start.nanos()))
    }

    pub fn info_path(&self, namespace: &str, shard: ShardId, block_start: UnixNanos) -> PathBuf {
        self.shard_dir(namespace, shard)
            .join(format!("{FILESET_PREFIX}{}{INFO_SUFFIX}", block_start.nanos()))
    }
}

/// Persists one shard's block as a frame-per-series volume.
#[derive(Debug, Clone)]
pub struct FilesetWriter {
    layout: FilesetLayout,
}

impl FilesetWriter {
    pub fn new(layout: FilesetLayout) -> Self {
        Self { layout }
    }

    pub fn write_block(
        &self,
        namespace: &str,
        shard: ShardId,
        block_start: UnixNanos,
        series: &BTreeMap<SeriesId, SeriesBlock>,
    ) -> Result<(), FilesetError> {
        let dir = self.layout.shard_dir(namespace, shard);
        fs::create_dir_all(&dir)?;

        let mut volume = Vec::new();
        for (id, block) in series {
            encode_frame(&mut volume, id, block)?;
        }

        let data_path = self.layout.data_path(namespace, shard, block_start);
        persist_atomically(&data_path, &volume)?;

        let digest = hex::encode(Sha256::digest(&volume));
        let digest_path = self.layout.digest_path(namespace, shard, block_start);
        persist_atomically(&digest_path, digest.as_bytes())?;

        let info = FilesetInfo {
            block_start: block_start.nanos(),
            series_count: series.len(),
            datapoint_count: series.values().map(|block| block.len()).sum(),
        };
        let info_path = self.layout.info_path(namespace, shard, block_start);
        persist_atomically(&info_path, &serde_json::to_vec_pretty(&info)?)?;

        debug!(
            "event=fileset_written namespace={} shard={} block_start={} series={} bytes={}",
            namespace,
            shard,
            block_start,
            series.len(),
            volume.len()
        );
        Ok(())
    }
}

/// Reads volumes back, verifying the digest sidecar and per-frame checksums.
#[derive(Debug, Clone)]
pub struct FilesetReader {
    layout: FilesetLayout,
}

impl FilesetReader {
    pub fn new(layout: FilesetLayout) -> Self {
        Self { layout }
    }

    /// Block starts with a volume present for this shard, ascending. A
    /// missing shard directory means no volumes, not an error.
    pub fn block_starts(
        &self,
        namespace: &str,
        shard: ShardId,
    ) -> Result<Vec<UnixNanos>, FilesetError> {
        let dir = self.layout.shard_dir(namespace, shard);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut starts = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(DATA_SUFFIX) {
                continue;
            }
            let start = parse_block_start(name)
                .ok_or_else(|| FilesetError::InvalidName { path: entry.path() })?;
            starts.push(start);
        }
        starts.sort();
        Ok(starts)
    }

    pub fn read_block(
        &self,
        namespace: &str,
        shard: ShardId,
        block_start: UnixNanos,
    ) -> Result<BTreeMap<SeriesId, SeriesBlock>, FilesetError> {
        let data_path = self.layout.data_path(namespace, shard, block_start);
        let volume = fs::read(&data_path)?;
        self.verify_digest(namespace, shard, block_start, &volume, &data_path)?;
        let info = self.read_info(namespace, shard, block_start)?;
        if info.block_start != block_start.nanos() {
            return Err(FilesetError::InfoMismatch {
                path: data_path,
                expected: block_start.nanos(),
                found: info.block_start,
            });
        }
        decode_volume(&volume, &data_path)
    }

    pub fn read_info(
        &self,
        namespace: &str,
        shard: ShardId,
        block_start: UnixNanos,
    ) -> Result<FilesetInfo, FilesetError> {
        let info_path = self.layout.info_path(namespace, shard, block_start);
        let bytes = fs::read(&info_path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn verify_digest(
        &self,
        namespace: &str,
        shard: ShardId,
        block_start: UnixNanos,
        volume: &[u8],
        data_path: &Path,
    ) -> Result<(), FilesetError> {
        let digest_path = self.layout.digest_path(namespace, shard, block_start);
        let expected = fs::read_to_string(&digest_path)?;
        let computed = hex::encode(Sha256::digest(volume));
        if expected.trim() != computed {
            return Err(FilesetError::DigestMismatch {
                path: data_path.to_path_buf(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum FilesetError {
    #[error("fileset I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("fileset metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("fileset digest mismatch for {path:?}")]
    DigestMismatch { path: PathBuf },
    #[error("fileset info mismatch for {path:?}: expected block start {expected}, found {found}")]
    InfoMismatch {
        path: PathBuf,
        expected: i64,
        found: i64,
    },
    #[error("corrupt fileset frame in {path:?} at offset {offset}")]
    CorruptFrame { path: PathBuf, offset: usize },
    #[error("invalid fileset filename: {path:?}")]
    InvalidName { path: PathBuf },
    #[error("series id exceeds frame limit ({len} bytes)")]
    SeriesIdTooLong { len: usize },
}

fn parse_block_start(name: &str) -> Option<UnixNanos> {
    let digits = name.strip_prefix(FILESET_PREFIX)?.strip_suffix(DATA_SUFFIX)?;
    digits.parse().ok().map(UnixNanos::from_nanos)
}

fn persist_atomically(path: &Path, bytes: &[u8]) -> Result<(), io::Error> {
    let tmp_path = path.with_extension("tmp");
    let mut file = File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(tmp_path, path)?;
    Ok(())
}

fn encode_frame(out: &mut Vec<u8>, id: &str, block: &SeriesBlock) -> Result<(), FilesetError> {
    if id.len() > u16::MAX as usize {
        return Err(FilesetError::SeriesIdTooLong { len: id.len() });
    }
    let mut payload = Vec::with_capacity(id.len() + block.len() * 16);
    payload.extend_from_slice(id.as_bytes());
    for dp in block.datapoints() {
        payload.extend_from_slice(&dp.timestamp.nanos().to_le_bytes());
        payload.extend_from_slice(&dp.value.to_bits().to_le_bytes());
    }
    let mut hasher = Crc32Hasher::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    out.extend_from_slice(&(id.len() as u16).to_le_bytes());
    out.extend_from_slice(&(block.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(())
}

fn decode_volume(
    volume: &[u8],
    path: &Path,
) -> Result<BTreeMap<SeriesId, SeriesBlock>, FilesetError> {
    let corrupt = |offset: usize| FilesetError::CorruptFrame {
        path: path.to_path_buf(),
        offset,
    };
    let mut series = BTreeMap::new();
    let mut cursor = 0usize;
    while cursor < volume.len() {
        let frame_start = cursor;
        if volume.len() - cursor < 2 + 4 {
            return Err(corrupt(frame_start));
        }
        let id_len = u16::from_le_bytes(
            volume[cursor..cursor + 2]
                .try_into()
                .map_err(|_| corrupt(frame_start))?,
        ) as usize;
        cursor += 2;
        let point_count = u32::from_le_bytes(
            volume[cursor..cursor + 4]
                .try_into()
                .map_err(|_| corrupt(frame_start))?,
        ) as usize;
        cursor += 4;

        let payload_len = id_len + point_count * 16;
        if volume.len() - cursor < payload_len + 4 {
            return Err(corrupt(frame_start));
        }
        let payload = &volume[cursor..cursor + payload_len];
        cursor += payload_len;
        let crc = u32::from_le_bytes(
            volume[cursor..cursor + 4]
                .try_into()
                .map_err(|_| corrupt(frame_start))?,
        );
        cursor += 4;

        let mut hasher = Crc32Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != crc {
            return Err(corrupt(frame_start));
        }

        let id = std::str::from_utf8(&payload[..id_len])
            .map_err(|_| corrupt(frame_start))?
            .to_string();
        let mut block = SeriesBlock::new();
        let mut point_cursor = id_len;
        for _ in 0..point_count {
            let nanos = i64::from_le_bytes(
                payload[point_cursor..point_cursor + 8]
                    .try_into()
                    .map_err(|_| corrupt(frame_start))?,
            );
            let bits = u64::from_le_bytes(
                payload[point_cursor + 8..point_cursor + 16]
                    .try_into()
                    .map_err(|_| corrupt(frame_start))?,
            );
            block.push(Datapoint {
                timestamp: UnixNanos::from_nanos(nanos),
                value: f64::from_bits(bits),
            });
            point_cursor += 16;
        }
        series.insert(id, block);
    }
    Ok(series)
}
