use crate::bootstrap::bootstrapper::{Bootstrapper, FatalBootstrapError, NamespaceRequest};
use crate::bootstrap::result::{BootstrapResult, ShardResult};
use crate::bootstrap::targets::{RunOptions, TargetRange};
use crate::error::{BootstrapError, MultiError};
use crate::shard::ShardId;
use crate::time::RangeSet;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything a process run produced: merged per-shard results plus the
/// run's accumulated non-fatal and fatal errors.
#[derive(Debug)]
pub struct ProcessOutput {
    pub result: BootstrapResult,
    pub errors: MultiError,
}

/// Drives the bootstrapper chain over a set of target ranges.
///
/// The chain is a fold: each stage sees only the residue the previous stage
/// left unfulfilled, and the residue after the last stage is the run's
/// unfulfilled set. Ranges sharing identical run options are batched into a
/// single chain invocation, in the order they were given.
#[derive(Clone)]
pub struct Process {
    stages: Vec<Arc<dyn Bootstrapper>>,
}

impl Process {
    pub fn new(stages: Vec<Arc<dyn Bootstrapper>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn run(
        &self,
        namespace: &str,
        block_size: Duration,
        shards: &[ShardId],
        targets: &[TargetRange],
    ) -> ProcessOutput {
        let mut groups: Vec<(RunOptions, RangeSet)> = Vec::new();
        for target in targets {
            match groups
                .iter_mut()
                .find(|(options, _)| *options == target.run_options)
            {
                Some((_, ranges)) => ranges.add(target.range),
                None => groups.push((target.run_options, RangeSet::from_range(target.range))),
            }
        }

        let mut merged = BootstrapResult::new();
        for &shard in shards {
            merged.shard_entry(shard);
        }
        let mut errors = MultiError::new();
        let mut fatal_hit = false;

        for (run_options, ranges) in groups {
            if fatal_hit {
                // The first fatal aborts the whole call; later groups go
                // straight to unfulfilled.
                for &shard in shards {
                    merged.shard_entry(shard).add_unfulfilled(&ranges);
                }
                continue;
            }
            let (group_result, group_fatal) =
                self.run_group(namespace, block_size, shards, &ranges, run_options, &mut errors);
            fatal_hit |= group_fatal;
            if let Err((shard, err)) = merged.merge(group_result) {
                errors.push(BootstrapError::Install { shard, source: err });
            }
        }

        ProcessOutput {
            result: merged,
            errors,
        }
    }

    fn run_group(
        &self,
        namespace: &str,
        block_size: Duration,
        shards: &[ShardId],
        ranges: &RangeSet,
        run_options: RunOptions,
        errors: &mut MultiError,
    ) -> (BootstrapResult, bool) {
        let mut remaining: BTreeMap<ShardId, RangeSet> =
            shards.iter().map(|&shard| (shard, ranges.clone())).collect();
        let mut acc = BootstrapResult::new();
        let mut fatal_hit = false;

        for stage in &self.stages {
            let pending: BTreeMap<ShardId, RangeSet> = remaining
                .iter()
                .filter(|(_, ranges)| !ranges.is_empty())
                .map(|(&shard, ranges)| (shard, ranges.clone()))
                .collect();
            if pending.is_empty() {
                break;
            }
            let request = NamespaceRequest::new(namespace, block_size, pending);
            debug!(
                "event=bootstrap_stage namespace={} stage={} shards={} incremental={}",
                namespace,
                stage.name(),
                request.shard_ranges.len(),
                run_options.incremental
            );

            match stage.bootstrap(&request, run_options) {
                Ok(mut result) => {
                    for (&shard, requested) in &request.shard_ranges {
                        let shard_result = result
                            .remove(shard)
                            .unwrap_or_else(|| ShardResult::unfulfilled_only(requested.clone()));
                        Self::absorb_shard_result(
                            &mut acc,
                            &mut remaining,
                            shard,
                            requested,
                            shard_result,
                            block_size,
                            errors,
                        );
                    }
                }
                Err(fatal) => {
                    let FatalBootstrapError {
                        bootstrapper,
                        shard,
                        message,
                        partial,
                    } = fatal;
                    for (shard_id, shard_result) in partial.into_shards() {
                        if let Some(requested) = request.shard_ranges.get(&shard_id) {
                            Self::absorb_shard_result(
                                &mut acc,
                                &mut remaining,
                                shard_id,
                                requested,
                                shard_result,
                                block_size,
                                errors,
                            );
                        }
                    }
                    errors.push(BootstrapError::Fatal {
                        bootstrapper,
                        shard,
                        message,
                    });
                    fatal_hit = true;
                    break;
                }
            }
        }

        for (shard, unfulfilled) in remaining {
            acc.shard_entry(shard).set_unfulfilled(unfulfilled);
        }
        (acc, fatal_hit)
    }

    fn absorb_shard_result(
        acc: &mut BootstrapResult,
        remaining: &mut BTreeMap<ShardId, RangeSet>,
        shard: ShardId,
        requested: &RangeSet,
        mut shard_result: ShardResult,
        block_size: Duration,
        errors: &mut MultiError,
    ) {
        shard_result.retain_within(requested, block_size);
        let unfulfilled = shard_result.unfulfilled().intersect(requested);
        remaining.insert(shard, unfulfilled);
        shard_result.set_unfulfilled(RangeSet::new());
        if let Err(err) = acc.shard_entry(shard).merge(shard_result) {
            errors.push(BootstrapError::Install { shard, source: err });
        }
    }
}
