use crate::bootstrap::bootstrapper::{Bootstrapper, FatalBootstrapError, NamespaceRequest};
use crate::bootstrap::result::{BootstrapResult, ShardResult};
use crate::bootstrap::targets::RunOptions;
use crate::fileset::{FilesetLayout, FilesetReader};
use crate::series::{SeriesBlock, SeriesId};
use crate::shard::ShardId;
use crate::time::{RangeSet, TimeRange, UnixNanos};
use log::warn;
use std::collections::BTreeMap;

/// Reads durable fileset volumes for the requested block windows.
///
/// Fulfills exactly the intersection of the request with the blocks present
/// on disk. Unreadable volumes leave their window unfulfilled for a later
/// stage; nothing here is fatal. In incremental runs volumes are decoded
/// one at a time so scratch memory stays bounded by a single block;
/// otherwise the window is materialized before any block lands.
pub struct FilesystemBootstrapper {
    reader: FilesetReader,
}

impl FilesystemBootstrapper {
    pub fn new(layout: FilesetLayout) -> Self {
        Self {
            reader: FilesetReader::new(layout),
        }
    }

    fn load_shard(
        &self,
        namespace: &str,
        shard: ShardId,
        requested: &RangeSet,
        block_size: std::time::Duration,
        incremental: bool,
    ) -> ShardResult {
        let mut shard_result = ShardResult::new();
        let mut fulfilled = RangeSet::new();

        let starts = match self.reader.block_starts(namespace, shard) {
            Ok(starts) => starts,
            Err(err) => {
                warn!(
                    "event=fileset_discovery_failed namespace={} shard={} error={}",
                    namespace, shard, err
                );
                return ShardResult::unfulfilled_only(requested.clone());
            }
        };

        let wanted: Vec<UnixNanos> = starts
            .into_iter()
            .filter(|&start| requested.covers(&TimeRange::new(start, start + block_size)))
            .collect();

        let absorb = |start: UnixNanos,
                      series: BTreeMap<SeriesId, SeriesBlock>,
                      shard_result: &mut ShardResult,
                      fulfilled: &mut RangeSet| {
            for (id, block) in series {
                if let Err(err) = shard_result.add_block(&id, start, block) {
                    warn!(
                        "event=fileset_duplicate_block namespace={} shard={} error={}",
                        namespace, shard, err
                    );
                    return;
                }
            }
            fulfilled.add(TimeRange::new(start, start + block_size));
        };

        if incremental {
            for start in wanted {
                match self.reader.read_block(namespace, shard, start) {
                    Ok(series) => absorb(start, series, &mut shard_result, &mut fulfilled),
                    Err(err) => warn!(
                        "event=fileset_read_failed namespace={} shard={} block_start={} error={}",
                        namespace, shard, start, err
                    ),
                }
            }
        } else {
            let mut decoded = Vec::with_capacity(wanted.len());
            for start in wanted {
                match self.reader.read_block(namespace, shard, start) {
                    Ok(series) => decoded.push((start, series)),
                    Err(err) => warn!(
                        "event=fileset_read_failed namespace={} shard={} block_start={} error={}",
                        namespace, shard, start, err
                    ),
                }
            }
            for (start, series) in decoded {
                absorb(start, series, &mut shard_result, &mut fulfilled);
            }
        }

        shard_result.set_unfulfilled(requested.subtract(&fulfilled));
        shard_result
    }
}

impl Bootstrapper for FilesystemBootstrapper {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn bootstrap(
        &self,
        request: &NamespaceRequest,
        run_options: RunOptions,
    ) -> Result<BootstrapResult, FatalBootstrapError> {
        let mut result = BootstrapResult::new();
        for (&shard, requested) in &request.shard_ranges {
            let shard_result = self.load_shard(
                &request.namespace,
                shard,
                requested,
                request.block_size,
                run_options.incremental,
            );
            result.insert(shard, shard_result);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::FilesetWriter;
    use crate::series::Datapoint;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn at(nanos: i64) -> UnixNanos {
        UnixNanos::from_nanos(nanos)
    }

    fn block(points: &[(i64, f64)]) -> SeriesBlock {
        SeriesBlock::from_datapoints(
            points
                .iter()
                .map(|&(nanos, value)| Datapoint {
                    timestamp: at(nanos),
                    value,
                })
                .collect(),
        )
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
    fn fulfills_exactly_what_is_on_disk() {
        let tmp = TempDir::new().unwrap();
        let layout = FilesetLayout::new(tmp.path());
        let writer = FilesetWriter::new(layout.clone());

        let mut series = BTreeMap::new();
        series.insert("cpu".to_string(), block(&[(12, 1.0)]));
        writer.write_block("metrics", 0, at(10), &series).unwrap();

        let bootstrapper = FilesystemBootstrapper::new(layout);
        for incremental in [true, false] {
            let result = bootstrapper
                .bootstrap(
                    &request(&[0], 0, 30),
                    RunOptions::new().with_incremental(incremental),
                )
                .unwrap();
            let shard_result = result.shard_result(0).expect("present");
            assert_eq!(shard_result.num_blocks(), 1);
            assert_eq!(
                shard_result.unfulfilled().as_slice(),
                &[
                    TimeRange::new(at(0), at(10)),
                    TimeRange::new(at(20), at(30))
                ]
            );
        }
    }

    #[test]
    fn unreadable_volume_is_left_unfulfilled() {
        let tmp = TempDir::new().unwrap();
        let layout = FilesetLayout::new(tmp.path());
        let writer = FilesetWriter::new(layout.clone());

        let mut series = BTreeMap::new();
        series.insert("cpu".to_string(), block(&[(2, 1.0)]));
        writer.write_block("metrics", 0, at(0), &series).unwrap();

        // Corrupt the volume so the digest check fails.
        let data_path = layout.data_path("metrics", 0, at(0));
        let mut bytes = fs::read(&data_path).unwrap();
        bytes[0] ^= 0xFF;
        fs::write(&data_path, bytes).unwrap();

        let bootstrapper = FilesystemBootstrapper::new(layout);
        let result = bootstrapper
            .bootstrap(&request(&[0], 0, 10), RunOptions::new())
            .unwrap();
        let shard_result = result.shard_result(0).expect("present");
        assert_eq!(shard_result.num_blocks(), 0);
        assert_eq!(
            shard_result.unfulfilled().as_slice(),
            &[TimeRange::new(at(0), at(10))]
        );
    }

    #[test]
    fn blocks_outside_the_request_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let layout = FilesetLayout::new(tmp.path());
        let writer = FilesetWriter::new(layout.clone());

        let mut series = BTreeMap::new();
        series.insert("cpu".to_string(), block(&[(52, 1.0)]));
        writer.write_block("metrics", 0, at(50), &series).unwrap();

        let bootstrapper = FilesystemBootstrapper::new(layout);
        let result = bootstrapper
            .bootstrap(&request(&[0], 0, 30), RunOptions::new())
            .unwrap();
        let shard_result = result.shard_result(0).expect("present");
        assert_eq!(shard_result.num_blocks(), 0);
    }

    #[test]
    fn empty_shard_dir_leaves_request_unfulfilled() {
        let tmp = TempDir::new().unwrap();
        let bootstrapper = FilesystemBootstrapper::new(FilesetLayout::new(tmp.path()));
        let result = bootstrapper
            .bootstrap(&request(&[3], 0, 20), RunOptions::new())
            .unwrap();
        let shard_result = result.shard_result(3).expect("present");
        assert_eq!(
            shard_result.unfulfilled().as_slice(),
            &[TimeRange::new(at(0), at(20))]
        );
    }
}
