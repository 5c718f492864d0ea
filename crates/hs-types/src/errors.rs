use thiserror::Error;

/// Main error type for hyperspace search
#[derive(Error, Debug)]
pub enum HsError {
    #[error("Space error: {0}")]
    Space(#[from] SpaceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised while interpreting or partitioning the search space
#[derive(Error, Debug)]
pub enum SpaceError {
    #[error("Invalid dimension {name}: {spec}. Expected (low, high), (low, high, prior) or a list of categories")]
    InvalidDimension { name: String, spec: String },

    #[error("Dimension {name} cannot be split: {bounds} ({reason})")]
    DegenerateDimension {
        name: String,
        bounds: String,
        reason: String,
    },

    #[error("Dimension {name} has inverted bounds: low {low} must be less than high {high}")]
    InvertedBounds {
        name: String,
        low: String,
        high: String,
    },

    #[error("Cannot draw {requested} samples from dimension {name}: only {available} distinct values")]
    InsufficientValues {
        name: String,
        requested: usize,
        available: usize,
    },

    #[error("Point has {actual} coordinates but the space has {expected} dimensions")]
    PointMismatch { expected: usize, actual: usize },
}

/// Run configuration errors, raised before any work is dispatched
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Conflicting options: {message}")]
    ConfigConflict { message: String },

    #[error("Sampler {sampler} requires n_samples > 0, got {n_samples:?}")]
    MissingSamplerSampleCount {
        sampler: String,
        n_samples: Option<usize>,
    },

    #[error("Invalid model {model}. Supported models: GP, RF, GBRT, RAND")]
    UnknownModel { model: String },

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Coordinator/worker protocol errors
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Peer {peer} is not part of a cluster of size {size}")]
    UnknownPeer { peer: usize, size: usize },

    #[error("Transport disconnected: {message}")]
    Disconnected { message: String },

    #[error("Unexpected message from {source_rank}: expected {expected}, got {actual}")]
    UnexpectedMessage {
        source_rank: usize,
        expected: String,
        actual: String,
    },

    #[error("Worker {worker} unresponsive for {silent_ms} ms while holding hyperspace {hyperspace}")]
    WorkerUnresponsive {
        worker: usize,
        hyperspace: usize,
        silent_ms: u64,
    },

    #[error("No live workers remain; {pending} hyperspaces were never processed")]
    FleetExhausted { pending: usize },
}

/// Result type alias for hyperspace operations
pub type HsResult<T> = Result<T, HsError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::HsError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::HsError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration conflict errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HsError::Config($crate::ConfigError::ConfigConflict {
            message: format!($($arg)*),
        })
    };
}
