use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tidestore::{
    BootstrapManager, BootstrapManagerOptions, BootstrapPhase, ClockOptions, Database, Datapoint,
    FileOpsMediator, FilesetLayout, FilesetWriter, FilesystemBootstrapper, Namespace,
    NoOpAllBootstrapper, Process, RetentionOptions, SeriesBlock, SeriesId, ShardId, TimeRange,
    UnixNanos,
};

const HOUR: i64 = 3_600_000_000_000;
const MINUTE: i64 = 60_000_000_000;
const SECOND: i64 = 1_000_000_000;

fn at(nanos: i64) -> UnixNanos {
    UnixNanos::from_nanos(nanos)
}

fn retention() -> RetentionOptions {
    RetentionOptions::new()
        .with_period(Duration::from_secs(2 * 3600))
        .with_block_size(Duration::from_secs(3600))
        .with_buffer_past(Duration::from_secs(600))
        .with_buffer_future(Duration::from_secs(120))
}

struct StaticDatabase {
    namespaces: Vec<Arc<Namespace>>,
}

impl Database for StaticDatabase {
    fn owned_namespaces(&self) -> Vec<Arc<Namespace>> {
        self.namespaces.clone()
    }
}

/// `count` datapoints at one-second spacing from `start`.
fn generate_points(start: i64, count: usize, seed: f64) -> Vec<Datapoint> {
    (0..count)
        .map(|idx| Datapoint {
            timestamp: at(start + idx as i64 * SECOND),
            value: seed + idx as f64 * 0.25,
        })
        .collect()
}

/// Writes one volume per (shard, block start), routing each series the way
/// the namespace routes writes. Blocks with no series for a shard get an
/// empty volume, as a flush of an idle window would.
fn write_fixtures(
    layout: &FilesetLayout,
    namespace: &Namespace,
    block_starts: &[i64],
    series_by_block: &BTreeMap<i64, Vec<(SeriesId, Vec<Datapoint>)>>,
) {
    let writer = FilesetWriter::new(layout.clone());
    let shard_ids: Vec<ShardId> = namespace.shards().iter().map(|shard| shard.id()).collect();
    for &block_start in block_starts {
        let mut per_shard: BTreeMap<ShardId, BTreeMap<SeriesId, SeriesBlock>> = shard_ids
            .iter()
            .map(|&shard| (shard, BTreeMap::new()))
            .collect();
        if let Some(series_list) = series_by_block.get(&block_start) {
            for (series, points) in series_list {
                let shard = namespace.shard_for(series).expect("routable").id();
                per_shard
                    .entry(shard)
                    .or_default()
                    .insert(series.clone(), SeriesBlock::from_datapoints(points.clone()));
            }
        }
        for (shard, series) in per_shard {
            writer
                .write_block(namespace.id(), shard, at(block_start), &series)
                .expect("fixture volume written");
        }
    }
}

#[test]
fn filesystem_only_recovery_restores_written_series() {
    let tmp = TempDir::new().unwrap();
    let layout = FilesetLayout::new(tmp.path());

    let now = 500 * HOUR + 30 * MINUTE;
    // historical [498h, 500h) incremental, recent [500h, 501h).
    let block_starts = [498 * HOUR, 499 * HOUR, 500 * HOUR];

    let ns1 = Arc::new(Namespace::new("metrics", retention(), [0, 1, 2]));
    let ns2 = Arc::new(Namespace::new("traces", retention(), [0, 1, 2]));

    let foo_old = generate_points(now - HOUR, 100, 1.0);
    let bar_old = generate_points(now - HOUR, 100, 2.0);
    let foo_new = generate_points(now, 50, 3.0);
    let baz_new = generate_points(now, 50, 4.0);

    let mut series_by_block: BTreeMap<i64, Vec<(SeriesId, Vec<Datapoint>)>> = BTreeMap::new();
    series_by_block.insert(
        499 * HOUR,
        vec![
            ("foo".to_string(), foo_old.clone()),
            ("bar".to_string(), bar_old.clone()),
        ],
    );
    series_by_block.insert(
        500 * HOUR,
        vec![
            ("foo".to_string(), foo_new.clone()),
            ("baz".to_string(), baz_new.clone()),
        ],
    );
    write_fixtures(&layout, &ns1, &block_starts, &series_by_block);
    write_fixtures(&layout, &ns2, &block_starts, &BTreeMap::new());

    let manager = BootstrapManager::new(
        Arc::new(StaticDatabase {
            namespaces: vec![ns1.clone(), ns2.clone()],
        }),
        Arc::new(FileOpsMediator::new()),
        Process::new(vec![
            Arc::new(FilesystemBootstrapper::new(layout)),
            Arc::new(NoOpAllBootstrapper::new()),
        ]),
        BootstrapManagerOptions {
            retention: retention(),
            clock: ClockOptions::new().with_now_fn(Arc::new(move || at(now))),
            ..BootstrapManagerOptions::default()
        },
    );

    assert_eq!(manager.phase(), BootstrapPhase::NotStarted);
    manager.bootstrap().unwrap();
    assert_eq!(manager.phase(), BootstrapPhase::Bootstrapped);
    assert!(manager.is_bootstrapped());

    for namespace in [&ns1, &ns2] {
        assert!(namespace.is_bootstrapped(), "{} ready", namespace.id());
        for shard in namespace.shards() {
            assert!(shard.is_bootstrapped_to_read());
            assert!(shard.is_bootstrapped_to_flush());
            assert!(shard.unfulfilled().is_empty());
        }
    }

    let window = TimeRange::new(at(498 * HOUR), at(501 * HOUR));
    assert_eq!(
        ns1.fetch("foo", window).unwrap(),
        [foo_old, foo_new].concat()
    );
    assert_eq!(ns1.fetch("bar", window).unwrap(), bar_old);
    assert_eq!(ns1.fetch("baz", window).unwrap(), baz_new);
    assert!(ns2.fetch("foo", window).unwrap().is_empty());
}

#[test]
fn missing_volumes_leave_exactly_their_windows_unfulfilled() {
    let tmp = TempDir::new().unwrap();
    let layout = FilesetLayout::new(tmp.path());

    let now = 500 * HOUR + 30 * MINUTE;
    let namespace = Arc::new(Namespace::new("metrics", retention(), [0]));

    // Volumes only for 499h and 500h; 498h never flushed.
    let points = generate_points(now - HOUR, 10, 1.0);
    let mut series_by_block: BTreeMap<i64, Vec<(SeriesId, Vec<Datapoint>)>> = BTreeMap::new();
    series_by_block.insert(499 * HOUR, vec![("foo".to_string(), points)]);
    write_fixtures(
        &layout,
        &namespace,
        &[499 * HOUR, 500 * HOUR],
        &series_by_block,
    );

    let manager = BootstrapManager::new(
        Arc::new(StaticDatabase {
            namespaces: vec![namespace.clone()],
        }),
        Arc::new(FileOpsMediator::new()),
        Process::new(vec![
            Arc::new(FilesystemBootstrapper::new(layout)),
            Arc::new(NoOpAllBootstrapper::new()),
        ]),
        BootstrapManagerOptions {
            retention: retention(),
            clock: ClockOptions::new().with_now_fn(Arc::new(move || at(now))),
            ..BootstrapManagerOptions::default()
        },
    );

    manager.bootstrap().unwrap();
    let shard = namespace.shard(0).unwrap();
    assert!(!shard.is_bootstrapped_to_read());
    assert_eq!(
        shard.unfulfilled().as_slice(),
        &[TimeRange::new(at(498 * HOUR), at(499 * HOUR))]
    );
}
