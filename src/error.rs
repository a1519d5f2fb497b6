use crate::bootstrap::ResultMergeError;
use crate::shard::ShardId;
use std::fmt;
use thiserror::Error;

/// Non-fatal state signals surfaced by the readiness gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("database is not yet bootstrapped")]
    DatabaseNotBootstrapped,
    #[error("namespace is bootstrapping")]
    NamespaceIsBootstrapping,
    #[error("namespace is not yet bootstrapped")]
    NamespaceNotBootstrapped,
    #[error("namespace is closed")]
    NamespaceClosed,
    #[error("shard is not owned by this namespace")]
    ShardNotOwned,
    #[error("shard is bootstrapping")]
    ShardIsBootstrapping,
    #[error("shard is not yet bootstrapped to read")]
    ShardNotBootstrappedToRead,
    #[error("shard is not yet bootstrapped to flush")]
    ShardNotBootstrappedToFlush,
    #[error("bootstrap enqueued behind in-flight run")]
    BootstrapEnqueued,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Gate(#[from] GateError),
    /// A bootstrapper aborted its chain call. The run keeps going for other
    /// namespaces; affected ranges stay unfulfilled.
    #[error("bootstrapper {bootstrapper} aborted{}: {message}", .shard.map(|s| format!(" (shard {s})")).unwrap_or_default())]
    Fatal {
        bootstrapper: &'static str,
        shard: Option<ShardId>,
        message: String,
    },
    /// Combining or installing shard results hit overlapping data at the
    /// same block start.
    #[error("install failed for shard {shard}: {source}")]
    Install {
        shard: ShardId,
        #[source]
        source: ResultMergeError,
    },
    #[error("flush failed for shard {shard}: {message}")]
    Flush { shard: ShardId, message: String },
    #[error(transparent)]
    Multi(MultiError),
}

impl BootstrapError {
    /// The shard this error taints, when it names one.
    pub fn shard(&self) -> Option<ShardId> {
        match self {
            BootstrapError::Fatal { shard, .. } => *shard,
            BootstrapError::Install { shard, .. } => Some(*shard),
            BootstrapError::Flush { shard, .. } => Some(*shard),
            _ => None,
        }
    }

    pub fn is_enqueued(&self) -> bool {
        matches!(self, BootstrapError::Gate(GateError::BootstrapEnqueued))
    }
}

/// Ordered error accumulator. Mirrors the usual multi-error discipline:
/// collect everything, then reduce with [`MultiError::final_error`].
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<BootstrapError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: BootstrapError) {
        self.errors.push(error);
    }

    pub fn absorb(&mut self, other: MultiError) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[BootstrapError] {
        &self.errors
    }

    /// `Ok(())` when empty, the sole error when singular, otherwise the
    /// composite.
    pub fn final_error(mut self) -> Result<(), BootstrapError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(BootstrapError::Multi(self)),
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred: ", self.errors.len())?;
        for (idx, error) in self.errors.iter().enumerate() {
            if idx > 0 {
                write!(f, "; ")?;
            }
            write!(f, "[{error}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
