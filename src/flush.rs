use crate::error::{BootstrapError, GateError, MultiError};
use crate::fileset::{FilesetLayout, FilesetWriter};
use crate::mediator::Mediator;
use crate::namespace::{Namespace, NamespaceBootstrapState};
use crate::telemetry::SharedMetricsRegistry;
use crate::time::UnixNanos;
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;

/// What one flush pass did, for the tick path's accounting.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct FlushReport {
    pub skipped_file_ops_disabled: bool,
    pub shards_visited: usize,
    pub blocks_written: usize,
}

/// Persists sealed blocks to fileset volumes on the regular tick path.
///
/// Stands down without touching disk while the mediator has file ops
/// disabled; an active bootstrap owns the device until it finishes.
pub struct FlushManager {
    writer: FilesetWriter,
    mediator: Arc<dyn Mediator>,
    metrics: SharedMetricsRegistry,
}

impl FlushManager {
    pub fn new(
        layout: FilesetLayout,
        mediator: Arc<dyn Mediator>,
        metrics: SharedMetricsRegistry,
    ) -> Self {
        Self {
            writer: FilesetWriter::new(layout),
            mediator,
            metrics,
        }
    }

    /// Flushes every sealed block of every readable shard. Shards that are
    /// not bootstrapped to flush are recorded and skipped; their data stays
    /// buffered for a later pass.
    pub fn flush_namespace(
        &self,
        namespace: &Namespace,
        now: UnixNanos,
    ) -> Result<FlushReport, BootstrapError> {
        let mut report = FlushReport::default();
        // A namespace that never completed a bootstrap pass has nothing
        // durable to add; partial readiness falls through to the per-shard
        // gates.
        if matches!(
            namespace.bootstrap_state(),
            NamespaceBootstrapState::NotBootstrapped | NamespaceBootstrapState::Bootstrapping
        ) {
            return Err(GateError::NamespaceNotBootstrapped.into());
        }
        if !self.mediator.file_ops_enabled() {
            self.metrics.inc_counter("flush.skipped_file_ops_disabled_total", 1);
            debug!(
                "event=flush_skipped namespace={} reason=file_ops_disabled",
                namespace.id()
            );
            report.skipped_file_ops_disabled = true;
            return Ok(report);
        }

        let retention = namespace.retention();
        let mut errors = MultiError::new();
        for shard in namespace.shards() {
            report.shards_visited += 1;
            if !shard.is_bootstrapped_to_flush() {
                errors.push(GateError::ShardNotBootstrappedToFlush.into());
                continue;
            }
            let sealed = shard.flushable_block_starts(
                now,
                retention.block_size(),
                retention.buffer_past(),
            );
            for block_start in sealed {
                let series = shard.block_snapshot(block_start);
                if series.is_empty() {
                    shard.mark_flushed(block_start);
                    continue;
                }
                match self
                    .writer
                    .write_block(namespace.id(), shard.id(), block_start, &series)
                {
                    Ok(()) => {
                        shard.mark_flushed(block_start);
                        report.blocks_written += 1;
                        self.metrics.inc_counter("flush.blocks_written_total", 1);
                    }
                    Err(err) => {
                        errors.push(BootstrapError::Flush {
                            shard: shard.id(),
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            "event=flush_finished namespace={} shards={} blocks_written={} errors={}",
            namespace.id(),
            report.shards_visited,
            report.blocks_written,
            errors.len()
        );
        errors.final_error()?;
        Ok(report)
    }
}
