use crate::bootstrap::bootstrapper::{Bootstrapper, FatalBootstrapError, NamespaceRequest};
use crate::bootstrap::result::{BootstrapResult, ShardBlocks, ShardResult};
use crate::bootstrap::targets::RunOptions;
use crate::commitlog::{discover_segments, CommitLogReplayScanner};
use crate::shard::ShardId;
use crate::time::RangeSet;
use log::warn;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Replays commit-log segments to recover the most recent, unflushed
/// window.
///
/// A readable log claims every range requested of this stage: the log is
/// the authoritative record of recent writes, so an absent datapoint means
/// nothing was written, not that data is missing. Replayed datapoints are
/// clipped to the requested ranges and grouped into block-aligned buckets.
/// An unreadable directory leaves the request unfulfilled.
pub struct CommitLogBootstrapper {
    root: PathBuf,
}

impl CommitLogBootstrapper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn decline(request: &NamespaceRequest) -> BootstrapResult {
        let mut result = BootstrapResult::new();
        for (&shard, requested) in &request.shard_ranges {
            result.insert(shard, ShardResult::unfulfilled_only(requested.clone()));
        }
        result
    }
}

impl Bootstrapper for CommitLogBootstrapper {
    fn name(&self) -> &'static str {
        "commitlog"
    }

    fn bootstrap(
        &self,
        request: &NamespaceRequest,
        _run_options: RunOptions,
    ) -> Result<BootstrapResult, FatalBootstrapError> {
        let segments = match discover_segments(&self.root) {
            Ok(segments) => segments,
            Err(err) => {
                warn!(
                    "event=commitlog_discovery_failed namespace={} error={}",
                    request.namespace, err
                );
                return Ok(Self::decline(request));
            }
        };
        let replay = match CommitLogReplayScanner::scan(&segments) {
            Ok(replay) => replay,
            Err(err) => {
                warn!(
                    "event=commitlog_replay_failed namespace={} error={}",
                    request.namespace, err
                );
                return Ok(Self::decline(request));
            }
        };
        if let Some(truncation) = &replay.truncation {
            warn!(
                "event=commitlog_torn_tail namespace={} segment={} truncated_bytes={}",
                request.namespace, truncation.segment_seq, truncation.truncated_bytes
            );
        }

        let mut buckets: BTreeMap<ShardId, ShardBlocks> = BTreeMap::new();
        for entry in replay.entries {
            if entry.namespace != request.namespace {
                continue;
            }
            let Some(requested) = request.shard_ranges.get(&entry.shard) else {
                continue;
            };
            if !requested.contains(entry.datapoint.timestamp) {
                continue;
            }
            let block_start = entry.datapoint.timestamp.truncate_to(request.block_size);
            buckets
                .entry(entry.shard)
                .or_default()
                .entry(entry.series)
                .or_default()
                .entry(block_start)
                .or_default()
                .push(entry.datapoint);
        }

        let mut result = BootstrapResult::new();
        for &shard in request.shard_ranges.keys() {
            let mut shard_result = ShardResult::new();
            if let Some(blocks) = buckets.remove(&shard) {
                for (series, starts) in blocks {
                    for (block_start, block) in starts {
                        if let Err(err) = shard_result.add_block(&series, block_start, block) {
                            warn!(
                                "event=commitlog_duplicate_block namespace={} shard={} error={}",
                                request.namespace, shard, err
                            );
                        }
                    }
                }
            }
            shard_result.set_unfulfilled(RangeSet::new());
            result.insert(shard, shard_result);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::{CommitLogEntry, CommitLogWriter};
    use crate::series::Datapoint;
    use crate::time::{TimeRange, UnixNanos};
    use std::time::Duration;
    use tempfile::TempDir;

    fn at(nanos: i64) -> UnixNanos {
        UnixNanos::from_nanos(nanos)
    }

    fn entry(namespace: &str, shard: ShardId, series: &str, nanos: i64, value: f64) -> CommitLogEntry {
        CommitLogEntry {
            namespace: namespace.to_string(),
            shard,
            series: series.to_string(),
            datapoint: Datapoint {
                timestamp: at(nanos),
                value,
            },
        }
    }

    fn request(shards: &[ShardId], start: i64, end: i64) -> NamespaceRequest {
        let ranges = RangeSet::from_range(TimeRange::new(at(start), at(end)));
        NamespaceRequest::new(
            "metrics",
            Duration::from_nanos(10),
            shards.iter().map(|&shard| (shard, ranges.clone())).collect(),
        )
    }

    #[test]
    fn replays_clips_and_buckets_by_block() {
        let tmp = TempDir::new().unwrap();
        let mut writer = CommitLogWriter::open(tmp.path(), 1).unwrap();
        writer.append(&entry("metrics", 0, "cpu", 12, 1.0)).unwrap();
        writer.append(&entry("metrics", 0, "cpu", 25, 2.0)).unwrap();
        writer.append(&entry("metrics", 0, "cpu", 95, 9.0)).unwrap(); // outside request
        writer.append(&entry("metrics", 1, "mem", 14, 3.0)).unwrap();
        writer.append(&entry("other", 0, "cpu", 15, 4.0)).unwrap(); // other namespace

        let bootstrapper = CommitLogBootstrapper::new(tmp.path());
        let result = bootstrapper
            .bootstrap(&request(&[0, 1], 0, 30), RunOptions::new())
            .unwrap();

        let shard0 = result.shard_result(0).expect("present");
        assert!(shard0.is_fulfilled());
        assert_eq!(shard0.num_blocks(), 2);
        assert!(shard0.blocks()["cpu"].contains_key(&at(10)));
        assert!(shard0.blocks()["cpu"].contains_key(&at(20)));

        let shard1 = result.shard_result(1).expect("present");
        assert!(shard1.is_fulfilled());
        assert_eq!(shard1.num_blocks(), 1);
    }

    #[test]
    fn empty_log_still_claims_the_request() {
        let tmp = TempDir::new().unwrap();
        let bootstrapper = CommitLogBootstrapper::new(tmp.path());
        let result = bootstrapper
            .bootstrap(&request(&[0], 0, 30), RunOptions::new())
            .unwrap();
        let shard_result = result.shard_result(0).expect("present");
        assert!(shard_result.is_fulfilled());
        assert_eq!(shard_result.num_blocks(), 0);
    }

    #[test]
    fn torn_tail_replays_clean_prefix() {
        let tmp = TempDir::new().unwrap();
        let mut writer = CommitLogWriter::open(tmp.path(), 1).unwrap();
        writer.append(&entry("metrics", 0, "cpu", 5, 1.0)).unwrap();
        writer.append(&entry("metrics", 0, "cpu", 6, 2.0)).unwrap();
        let path = writer.path().to_path_buf();
        drop(writer);

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();

        let bootstrapper = CommitLogBootstrapper::new(tmp.path());
        let result = bootstrapper
            .bootstrap(&request(&[0], 0, 30), RunOptions::new())
            .unwrap();
        let shard_result = result.shard_result(0).expect("present");
        assert!(shard_result.is_fulfilled());
        assert_eq!(shard_result.blocks()["cpu"][&at(0)].len(), 1);
    }
}
