use std::time::Duration;

/// Retention policy for a namespace: how far back data is kept, the block
/// granularity it is stored at, and the mutable buffers either side of now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionOptions {
    period: Duration,
    block_size: Duration,
    buffer_past: Duration,
    buffer_future: Duration,
}

impl Default for RetentionOptions {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(2 * 24 * 60 * 60),
            block_size: Duration::from_secs(2 * 60 * 60),
            buffer_past: Duration::from_secs(10 * 60),
            buffer_future: Duration::from_secs(2 * 60),
        }
    }
}

impl RetentionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_block_size(mut self, block_size: Duration) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_buffer_past(mut self, buffer_past: Duration) -> Self {
        self.buffer_past = buffer_past;
        self
    }

    pub fn with_buffer_future(mut self, buffer_future: Duration) -> Self {
        self.buffer_future = buffer_future;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn block_size(&self) -> Duration {
        self.block_size
    }

    pub fn buffer_past(&self) -> Duration {
        self.buffer_past
    }

    pub fn buffer_future(&self) -> Duration {
        self.buffer_future
    }
}
