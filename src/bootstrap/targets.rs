use crate::retention::RetentionOptions;
use crate::time::{TimeRange, UnixNanos};

/// Per-chain-call execution options. Ranges sharing identical options are
/// batched into one chain invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RunOptions {
    /// Stream and install blocks one at a time, releasing working memory as
    /// each lands, instead of holding the whole window resident.
    pub incremental: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }
}

/// A window the coordinator asks bootstrappers to fulfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetRange {
    pub range: TimeRange,
    pub run_options: RunOptions,
}

/// Derives the bootstrap target ranges from the retention policy.
///
/// The historical window from the retention horizon up to the last sealed
/// block runs incrementally; the recent window abutting the live buffer is
/// kept resident. Endpoints are block-aligned, half-open, and the two
/// windows touch without overlapping. An inverted historical window is
/// omitted rather than emitted.
pub fn target_ranges(now: UnixNanos, opts: &RetentionOptions) -> Vec<TargetRange> {
    let block_size = opts.block_size();
    let start = (now - opts.period()).truncate_to(block_size);
    let mid = (now - block_size - opts.buffer_past()).truncate_to(block_size) + block_size;
    let cutover = (now + opts.buffer_future()).truncate_to(block_size) + block_size;

    let mut ranges = Vec::with_capacity(2);
    let historical = TimeRange::new(start, mid);
    if !historical.is_empty() {
        ranges.push(TargetRange {
            range: historical,
            run_options: RunOptions::new().with_incremental(true),
        });
    }
    let recent = TimeRange::new(mid, cutover);
    if !recent.is_empty() {
        ranges.push(TargetRange {
            range: recent,
            run_options: RunOptions::new().with_incremental(false),
        });
    }
    ranges
}
