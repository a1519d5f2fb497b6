use crate::bootstrap::{target_ranges, Process};
use crate::clock::ClockOptions;
use crate::error::{BootstrapError, GateError, MultiError};
use crate::mediator::{FileOpsPause, Mediator};
use crate::namespace::Namespace;
use crate::retention::RetentionOptions;
use crate::telemetry::SharedMetricsRegistry;
use log::info;
use parking_lot::RwLock;
use std::sync::Arc;

/// The node-level view the manager drives: which namespaces it owns right
/// now. Re-read at the start of every loop pass so a reshard between passes
/// is picked up by the replay.
pub trait Database: Send + Sync {
    fn owned_namespaces(&self) -> Vec<Arc<Namespace>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    NotStarted,
    Bootstrapping,
    Bootstrapped,
}

#[derive(Debug)]
struct ManagerState {
    phase: BootstrapPhase,
    // Invariant: has_pending implies phase == Bootstrapping.
    has_pending: bool,
}

/// Returns the phase to `NotStarted` if the run unwinds, so the next call
/// runs instead of enqueueing behind a run that no longer exists.
struct PhaseScope<'a> {
    state: &'a RwLock<ManagerState>,
    armed: bool,
}

impl Drop for PhaseScope<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.write();
            state.phase = BootstrapPhase::NotStarted;
            state.has_pending = false;
        }
    }
}

#[derive(Clone)]
pub struct BootstrapManagerOptions {
    pub retention: RetentionOptions,
    pub clock: ClockOptions,
    pub metrics: SharedMetricsRegistry,
}

impl Default for BootstrapManagerOptions {
    fn default() -> Self {
        Self {
            retention: RetentionOptions::default(),
            clock: ClockOptions::default(),
            metrics: SharedMetricsRegistry::default(),
        }
    }
}

/// Node-level bootstrap state machine.
///
/// Single-flight: one run at a time, with callers that arrive mid-run
/// coalesced into a single replay via the pending flag. File operations on
/// the mediator are disabled for the whole run and re-enabled exactly once
/// on every exit path.
pub struct BootstrapManager {
    database: Arc<dyn Database>,
    mediator: Arc<dyn Mediator>,
    process: Process,
    options: BootstrapManagerOptions,
    state: RwLock<ManagerState>,
}

impl BootstrapManager {
    pub fn new(
        database: Arc<dyn Database>,
        mediator: Arc<dyn Mediator>,
        process: Process,
        options: BootstrapManagerOptions,
    ) -> Self {
        Self {
            database,
            mediator,
            process,
            options,
            state: RwLock::new(ManagerState {
                phase: BootstrapPhase::NotStarted,
                has_pending: false,
            }),
        }
    }

    pub fn phase(&self) -> BootstrapPhase {
        self.state.read().phase
    }

    pub fn has_pending(&self) -> bool {
        self.state.read().has_pending
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.phase() == BootstrapPhase::Bootstrapped
    }

    pub fn ensure_bootstrapped(&self) -> Result<(), GateError> {
        if self.is_bootstrapped() {
            Ok(())
        } else {
            Err(GateError::DatabaseNotBootstrapped)
        }
    }

    pub fn report(&self) {
        let value = u64::from(self.is_bootstrapped());
        self.options.metrics.set_gauge("bootstrap.bootstrapped", value);
    }

    /// Drives a full bootstrap pass over every owned namespace, replaying
    /// while requests were coalesced behind it.
    ///
    /// A call that lands mid-run flips the pending flag and returns
    /// `BootstrapEnqueued`: the caller's request will be honored by the
    /// in-flight run's replay, so the signal is informational, not a
    /// failure.
    pub fn bootstrap(&self) -> Result<(), BootstrapError> {
        {
            let mut state = self.state.write();
            if state.phase == BootstrapPhase::Bootstrapping {
                state.has_pending = true;
                drop(state);
                self.options.metrics.inc_counter("bootstrap.enqueued_total", 1);
                return Err(GateError::BootstrapEnqueued.into());
            }
            state.phase = BootstrapPhase::Bootstrapping;
        }

        let _pause = FileOpsPause::new(self.mediator.clone());
        let mut scope = PhaseScope {
            state: &self.state,
            armed: true,
        };

        let mut errors = MultiError::new();
        loop {
            self.run_once(&mut errors);
            let mut state = self.state.write();
            if state.has_pending {
                state.has_pending = false;
                continue;
            }
            state.phase = BootstrapPhase::Bootstrapped;
            break;
        }
        scope.armed = false;

        // No flush here: the tick path drains bootstrapped buffers on its
        // own cadence.
        errors.final_error()
    }

    fn run_once(&self, errors: &mut MultiError) {
        let now_fn = self.options.clock.now_fn();
        let targets = target_ranges(now_fn(), &self.options.retention);
        for namespace in self.database.owned_namespaces() {
            let begin = now_fn();
            let outcome = namespace.bootstrap(&self.process, &targets);
            let took = now_fn().saturating_duration_since(begin);
            info!(
                "event=bootstrap_namespace_finished namespace={} duration_ms={} ok={}",
                namespace.id(),
                took.as_millis(),
                outcome.is_ok()
            );
            if let Err(err) = outcome {
                errors.push(err);
            }
        }
        self.options.metrics.inc_counter("bootstrap.runs_total", 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{NoOpAllBootstrapper, NoOpNoneBootstrapper};
    use crate::mediator::FileOpsMediator;
    use crate::time::UnixNanos;
    use std::time::Duration;

    struct StaticDatabase {
        namespaces: Vec<Arc<Namespace>>,
    }

    impl Database for StaticDatabase {
        fn owned_namespaces(&self) -> Vec<Arc<Namespace>> {
            self.namespaces.clone()
        }
    }

    fn options() -> BootstrapManagerOptions {
        let retention = RetentionOptions::new()
            .with_period(Duration::from_nanos(100))
            .with_block_size(Duration::from_nanos(10))
            .with_buffer_past(Duration::from_nanos(5))
            .with_buffer_future(Duration::from_nanos(5));
        BootstrapManagerOptions {
            retention,
            clock: ClockOptions::new()
                .with_now_fn(Arc::new(|| UnixNanos::from_nanos(1_000_000))),
            metrics: SharedMetricsRegistry::default(),
        }
    }

    fn manager_with(process: Process, namespaces: Vec<Arc<Namespace>>) -> BootstrapManager {
        BootstrapManager::new(
            Arc::new(StaticDatabase { namespaces }),
            Arc::new(FileOpsMediator::new()),
            process,
            options(),
        )
    }

    #[test]
    fn clean_run_reaches_bootstrapped() {
        let opts = options();
        let namespace = Arc::new(Namespace::new("metrics", opts.retention, [0, 1]));
        let manager = manager_with(
            Process::new(vec![Arc::new(NoOpNoneBootstrapper::new())]),
            vec![namespace.clone()],
        );

        assert_eq!(manager.phase(), BootstrapPhase::NotStarted);
        assert!(manager.ensure_bootstrapped().is_err());
        manager.bootstrap().unwrap();
        assert_eq!(manager.phase(), BootstrapPhase::Bootstrapped);
        assert!(manager.is_bootstrapped());
        assert!(manager.ensure_bootstrapped().is_ok());
        assert!(namespace.is_bootstrapped());
    }

    #[test]
    fn rebootstrap_of_a_bootstrapped_node_still_runs_the_chain() {
        let opts = options();
        let namespace = Arc::new(Namespace::new("metrics", opts.retention, [0]));
        let manager = manager_with(
            Process::new(vec![Arc::new(NoOpNoneBootstrapper::new())]),
            vec![namespace],
        );
        let metrics = manager.options.metrics.clone();

        manager.bootstrap().unwrap();
        manager.bootstrap().unwrap();
        assert_eq!(manager.phase(), BootstrapPhase::Bootstrapped);
        assert_eq!(metrics.counter("bootstrap.runs_total"), 2);
    }

    #[test]
    fn unfulfilled_run_is_not_an_error_but_gates_stay_shut() {
        let opts = options();
        let namespace = Arc::new(Namespace::new("metrics", opts.retention, [0]));
        let manager = manager_with(
            Process::new(vec![Arc::new(NoOpAllBootstrapper::new())]),
            vec![namespace.clone()],
        );

        manager.bootstrap().unwrap();
        assert!(manager.is_bootstrapped());
        assert!(!namespace.is_bootstrapped());
        for shard in namespace.shards() {
            assert!(!shard.is_bootstrapped_to_read());
        }
    }

    #[test]
    fn report_publishes_the_gauge() {
        let manager = manager_with(
            Process::new(vec![Arc::new(NoOpNoneBootstrapper::new())]),
            Vec::new(),
        );
        let metrics = manager.options.metrics.clone();

        manager.report();
        assert_eq!(metrics.gauge("bootstrap.bootstrapped"), Some(0));
        manager.bootstrap().unwrap();
        manager.report();
        assert_eq!(metrics.gauge("bootstrap.bootstrapped"), Some(1));
    }
}
