use crate::bootstrap::bootstrapper::{Bootstrapper, FatalBootstrapError, NamespaceRequest};
use crate::bootstrap::result::{BootstrapResult, ShardBlocks, ShardResult};
use crate::bootstrap::targets::RunOptions;
use crate::retry::RetryPolicy;
use crate::shard::ShardId;
use crate::time::RangeSet;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Capability the peers stage fetches through; the transport behind it is
/// the caller's concern.
pub trait PeerBlockClient: Send + Sync {
    fn fetch_blocks(
        &self,
        namespace: &str,
        shard: ShardId,
        ranges: &RangeSet,
    ) -> Result<ShardBlocks, PeerFetchError>;
}

#[derive(Debug, Clone, Error)]
#[error("peer fetch failed: {0}")]
pub struct PeerFetchError(pub String);

#[derive(Debug, Clone)]
pub struct PeersBootstrapperOptions {
    /// Shards fetched per batch.
    pub fetch_batch_size: usize,
    /// Batches in flight at once.
    pub batch_concurrency: usize,
    pub retry_policy: RetryPolicy,
}

impl Default for PeersBootstrapperOptions {
    fn default() -> Self {
        Self {
            fetch_batch_size: 64,
            batch_concurrency: 4,
            retry_policy: RetryPolicy::exponential(4, Duration::from_millis(50))
                .with_max_delay(Duration::from_secs(2))
                .with_jitter(0.25),
        }
    }
}

/// Fetches blocks from replicas for ranges earlier stages left unfulfilled.
///
/// Shards are fetched in batches on scoped threads; a batch that exhausts
/// its retries leaves its shards unfulfilled rather than failing the call.
pub struct PeersBootstrapper {
    client: Arc<dyn PeerBlockClient>,
    options: PeersBootstrapperOptions,
}

impl PeersBootstrapper {
    pub fn new(client: Arc<dyn PeerBlockClient>, options: PeersBootstrapperOptions) -> Self {
        Self { client, options }
    }

    fn fetch_shard(
        &self,
        namespace: &str,
        shard: ShardId,
        requested: &RangeSet,
        block_size: Duration,
    ) -> ShardResult {
        let mut handle = self.options.retry_policy.handle();
        loop {
            match self.client.fetch_blocks(namespace, shard, requested) {
                Ok(blocks) => {
                    let mut shard_result = ShardResult::new();
                    for (series, starts) in blocks {
                        for (block_start, block) in starts {
                            if let Err(err) = shard_result.add_block(&series, block_start, block) {
                                warn!(
                                    "event=peer_duplicate_block namespace={} shard={} error={}",
                                    namespace, shard, err
                                );
                            }
                        }
                    }
                    shard_result.retain_within(requested, block_size);
                    shard_result.set_unfulfilled(RangeSet::new());
                    return shard_result;
                }
                Err(err) => match handle.next_delay() {
                    Some(delay) => {
                        debug!(
                            "event=peer_fetch_retry namespace={} shard={} attempt={} error={}",
                            namespace,
                            shard,
                            handle.attempts(),
                            err
                        );
                        thread::sleep(delay);
                    }
                    None => {
                        warn!(
                            "event=peer_fetch_exhausted namespace={} shard={} error={}",
                            namespace, shard, err
                        );
                        return ShardResult::unfulfilled_only(requested.clone());
                    }
                },
            }
        }
    }
}

impl Bootstrapper for PeersBootstrapper {
    fn name(&self) -> &'static str {
        "peers"
    }

    fn bootstrap(
        &self,
        request: &NamespaceRequest,
        _run_options: RunOptions,
    ) -> Result<BootstrapResult, FatalBootstrapError> {
        let pairs: Vec<(ShardId, RangeSet)> = request
            .shard_ranges
            .iter()
            .map(|(&shard, ranges)| (shard, ranges.clone()))
            .collect();
        let fetched: Mutex<BTreeMap<ShardId, ShardResult>> = Mutex::new(BTreeMap::new());

        let batch_size = self.options.fetch_batch_size.max(1);
        let concurrency = self.options.batch_concurrency.max(1);
        let batches: Vec<&[(ShardId, RangeSet)]> = pairs.chunks(batch_size).collect();
        for window in batches.chunks(concurrency) {
            thread::scope(|scope| {
                for &batch in window {
                    let fetched = &fetched;
                    scope.spawn(move || {
                        for (shard, requested) in batch {
                            let shard_result = self.fetch_shard(
                                &request.namespace,
                                *shard,
                                requested,
                                request.block_size,
                            );
                            fetched.lock().insert(*shard, shard_result);
                        }
                    });
                }
            });
        }

        let mut result = BootstrapResult::new();
        for (shard, shard_result) in fetched.into_inner() {
            result.insert(shard, shard_result);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Datapoint, SeriesBlock};
    use crate::time::{TimeRange, UnixNanos};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(nanos: i64) -> UnixNanos {
        UnixNanos::from_nanos(nanos)
    }

    fn request(shards: &[ShardId], start: i64, end: i64) -> NamespaceRequest {
        let ranges = RangeSet::from_range(TimeRange::new(at(start), at(end)));
        NamespaceRequest::new(
            "metrics",
            Duration::from_nanos(10),
            shards.iter().map(|&shard| (shard, ranges.clone())).collect(),
        )
    }

    struct FlakyClient {
        failures_before_success: usize,
        attempts: AtomicUsize,
    }

    impl PeerBlockClient for FlakyClient {
        fn fetch_blocks(
            &self,
            _namespace: &str,
            _shard: ShardId,
            ranges: &RangeSet,
        ) -> Result<ShardBlocks, PeerFetchError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures_before_success {
                return Err(PeerFetchError("replica unavailable".into()));
            }
            let start = ranges.as_slice()[0].start;
            let mut blocks = ShardBlocks::new();
            blocks.entry("cpu".to_string()).or_default().insert(
                start,
                SeriesBlock::from_datapoints(vec![Datapoint {
                    timestamp: start,
                    value: 1.0,
                }]),
            );
            Ok(blocks)
        }
    }

    fn fast_options() -> PeersBootstrapperOptions {
        PeersBootstrapperOptions {
            fetch_batch_size: 2,
            batch_concurrency: 2,
            retry_policy: RetryPolicy::linear(3, Duration::from_millis(1)),
        }
    }

    #[test]
    fn retries_until_a_replica_answers() {
        let client = Arc::new(FlakyClient {
            failures_before_success: 2,
            attempts: AtomicUsize::new(0),
        });
        let bootstrapper = PeersBootstrapper::new(client.clone(), fast_options());
        let result = bootstrapper
            .bootstrap(&request(&[0], 0, 10), RunOptions::new())
            .unwrap();
        let shard_result = result.shard_result(0).expect("present");
        assert!(shard_result.is_fulfilled());
        assert_eq!(shard_result.num_blocks(), 1);
        assert_eq!(client.attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhausted_retries_leave_shard_unfulfilled() {
        let client = Arc::new(FlakyClient {
            failures_before_success: usize::MAX,
            attempts: AtomicUsize::new(0),
        });
        let bootstrapper = PeersBootstrapper::new(client, fast_options());
        let result = bootstrapper
            .bootstrap(&request(&[0], 0, 10), RunOptions::new())
            .unwrap();
        let shard_result = result.shard_result(0).expect("present");
        assert!(!shard_result.is_fulfilled());
        assert_eq!(shard_result.num_blocks(), 0);
    }

    #[test]
    fn fetches_every_shard_across_batches() {
        let client = Arc::new(FlakyClient {
            failures_before_success: 0,
            attempts: AtomicUsize::new(0),
        });
        let bootstrapper = PeersBootstrapper::new(client, fast_options());
        let shards: Vec<ShardId> = (0..7).collect();
        let result = bootstrapper
            .bootstrap(&request(&shards, 0, 10), RunOptions::new())
            .unwrap();
        for shard in shards {
            assert!(
                result.shard_result(shard).expect("present").is_fulfilled(),
                "shard {shard} unfulfilled"
            );
        }
    }

    #[test]
    fn out_of_range_peer_blocks_are_clipped() {
        struct OverreachingClient;
        impl PeerBlockClient for OverreachingClient {
            fn fetch_blocks(
                &self,
                _namespace: &str,
                _shard: ShardId,
                _ranges: &RangeSet,
            ) -> Result<ShardBlocks, PeerFetchError> {
                let mut blocks = ShardBlocks::new();
                let series = blocks.entry("cpu".to_string()).or_default();
                for start in [0i64, 500] {
                    series.insert(
                        at(start),
                        SeriesBlock::from_datapoints(vec![Datapoint {
                            timestamp: at(start),
                            value: 1.0,
                        }]),
                    );
                }
                Ok(blocks)
            }
        }

        let bootstrapper = PeersBootstrapper::new(Arc::new(OverreachingClient), fast_options());
        let result = bootstrapper
            .bootstrap(&request(&[0], 0, 10), RunOptions::new())
            .unwrap();
        let shard_result = result.shard_result(0).expect("present");
        assert_eq!(shard_result.num_blocks(), 1);
        assert!(shard_result.blocks()["cpu"].contains_key(&at(0)));
    }
}
