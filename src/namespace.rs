use crate::bootstrap::{Process, ShardResult, TargetRange};
use crate::error::{BootstrapError, GateError};
use crate::retention::RetentionOptions;
use crate::series::Datapoint;
use crate::shard::{Shard, ShardBootstrapState, ShardId};
use crate::time::{RangeSet, TimeRange, UnixNanos};
use log::info;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceBootstrapState {
    NotBootstrapped,
    Bootstrapping,
    /// Every owned shard is readable.
    Bootstrapped,
    /// Readable only for shards individually bootstrapped.
    BootstrappedPartial,
}

#[derive(Debug)]
struct NamespaceState {
    bootstrap_state: NamespaceBootstrapState,
    closed: bool,
}

/// Resets an interrupted bootstrap back to `NotBootstrapped` so a later run
/// is not refused against an attempt that no longer exists.
struct BootstrapScope<'a> {
    state: &'a Mutex<NamespaceState>,
    armed: bool,
}

impl BootstrapScope<'_> {
    fn finish(mut self, outcome: NamespaceBootstrapState) {
        self.state.lock().bootstrap_state = outcome;
        self.armed = false;
    }
}

impl Drop for BootstrapScope<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().bootstrap_state = NamespaceBootstrapState::NotBootstrapped;
        }
    }
}

/// A tenant: owns retention options, a shard set, and the readiness gates
/// over them.
pub struct Namespace {
    id: String,
    retention: RetentionOptions,
    shards: RwLock<BTreeMap<ShardId, Arc<Shard>>>,
    state: Mutex<NamespaceState>,
}

impl Namespace {
    pub fn new(
        id: impl Into<String>,
        retention: RetentionOptions,
        shard_ids: impl IntoIterator<Item = ShardId>,
    ) -> Self {
        let shards = shard_ids
            .into_iter()
            .map(|id| (id, Arc::new(Shard::new(id))))
            .collect();
        Self {
            id: id.into(),
            retention,
            shards: RwLock::new(shards),
            state: Mutex::new(NamespaceState {
                bootstrap_state: NamespaceBootstrapState::NotBootstrapped,
                closed: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn retention(&self) -> RetentionOptions {
        self.retention
    }

    pub fn shards(&self) -> Vec<Arc<Shard>> {
        self.shards.read().values().cloned().collect()
    }

    pub fn shard(&self, id: ShardId) -> Option<Arc<Shard>> {
        self.shards.read().get(&id).cloned()
    }

    /// Replaces the owned shard set; shards that survive keep their state
    /// and buffers, new shards start unbootstrapped.
    pub fn assign_shards(&self, shard_ids: impl IntoIterator<Item = ShardId>) {
        let mut shards = self.shards.write();
        let mut next = BTreeMap::new();
        for id in shard_ids {
            let shard = shards
                .remove(&id)
                .unwrap_or_else(|| Arc::new(Shard::new(id)));
            next.insert(id, shard);
        }
        *shards = next;
    }

    pub fn bootstrap_state(&self) -> NamespaceBootstrapState {
        self.state.lock().bootstrap_state
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrap_state() == NamespaceBootstrapState::Bootstrapped
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Deterministic series -> shard routing over the owned set.
    pub fn shard_for(&self, series: &str) -> Option<Arc<Shard>> {
        let shards = self.shards.read();
        if shards.is_empty() {
            return None;
        }
        let index = (crc32fast::hash(series.as_bytes()) as usize) % shards.len();
        shards.values().nth(index).cloned()
    }

    /// Writes are admitted whenever the namespace is open; they may precede
    /// bootstrap and are folded in when results install.
    pub fn write(&self, series: &str, timestamp: UnixNanos, value: f64) -> Result<(), GateError> {
        if self.is_closed() {
            return Err(GateError::NamespaceClosed);
        }
        let shard = self.shard_for(series).ok_or(GateError::ShardNotOwned)?;
        shard.write(
            series,
            Datapoint { timestamp, value },
            self.retention.block_size(),
        );
        Ok(())
    }

    pub fn fetch(&self, series: &str, range: TimeRange) -> Result<Vec<Datapoint>, GateError> {
        let shard = self.shard_for(series).ok_or(GateError::ShardNotOwned)?;
        shard.fetch(series, range)
    }

    /// Runs the process over the owned shards and installs the results.
    ///
    /// Refused while another bootstrap of this namespace is in flight. A
    /// namespace with no owned shards is trivially bootstrapped. Each shard
    /// ends `Bootstrapped` only if nothing stayed unfulfilled and no error
    /// named it; the namespace is `Bootstrapped` when every shard is,
    /// `BootstrappedPartial` otherwise.
    pub fn bootstrap(
        &self,
        process: &Process,
        targets: &[TargetRange],
    ) -> Result<(), BootstrapError> {
        {
            let mut state = self.state.lock();
            if state.bootstrap_state == NamespaceBootstrapState::Bootstrapping {
                return Err(GateError::NamespaceIsBootstrapping.into());
            }
            state.bootstrap_state = NamespaceBootstrapState::Bootstrapping;
        }
        let scope = BootstrapScope {
            state: &self.state,
            armed: true,
        };

        let shards = self.shards();
        if shards.is_empty() {
            scope.finish(NamespaceBootstrapState::Bootstrapped);
            info!(
                "event=namespace_bootstrap_finished namespace={} outcome=bootstrapped shards=0",
                self.id
            );
            return Ok(());
        }
        let shard_ids: Vec<ShardId> = shards.iter().map(|shard| shard.id()).collect();

        let output = process.run(
            &self.id,
            self.retention.block_size(),
            &shard_ids,
            targets,
        );
        let mut errors = output.errors;
        let tainted: BTreeSet<ShardId> = errors
            .errors()
            .iter()
            .filter_map(|error| error.shard())
            .collect();

        let requested: RangeSet = targets.iter().map(|target| target.range).collect();
        let mut shard_results = output.result.into_shards();
        let mut all_bootstrapped = true;
        for shard in &shards {
            let shard_result = shard_results
                .remove(&shard.id())
                .unwrap_or_else(|| ShardResult::unfulfilled_only(requested.clone()));
            let (blocks, unfulfilled) = shard_result.into_parts();
            let had_error = tainted.contains(&shard.id());
            match shard.install(blocks, unfulfilled, had_error) {
                Ok(state) => {
                    if state != ShardBootstrapState::Bootstrapped {
                        all_bootstrapped = false;
                    }
                }
                Err(gate) => {
                    all_bootstrapped = false;
                    errors.push(gate.into());
                }
            }
        }

        let outcome = if all_bootstrapped {
            NamespaceBootstrapState::Bootstrapped
        } else {
            NamespaceBootstrapState::BootstrappedPartial
        };
        scope.finish(outcome);
        info!(
            "event=namespace_bootstrap_finished namespace={} outcome={:?} shards={} errors={}",
            self.id,
            outcome,
            shards.len(),
            errors.len()
        );
        errors.final_error()
    }
}
