use thiserror::Error;

/// Result type for cares_rl operations
pub type Result<T> = std::result::Result<T, RlError>;

/// Main error type for the training core
#[derive(Debug, Clone, Error)]
pub enum RlError {
    /// Not enough stored transitions to draw a batch. Expected during warm-up.
    #[error("Insufficient data: need {required} transitions, have {available}")]
    InsufficientData {
        required: usize,
        available: usize,
    },

    /// Observation, action or parameter tensor has the wrong shape
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        expected: String,
        actual: String,
    },

    /// Discrete action index outside the action space
    #[error("Invalid action {action}: must be less than {num_actions}")]
    InvalidAction {
        action: usize,
        num_actions: usize,
    },

    /// Loss, gradients or parameters became NaN or infinite
    #[error("Numeric instability: {0}")]
    NumericInstability(String),

    /// The environment broke the reset/step contract
    #[error("Environment protocol violation: {0}")]
    EnvironmentProtocol(String),

    /// Invalid configuration value
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// IO errors (file operations)
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for RlError {
    fn from(err: std::io::Error) -> Self {
        RlError::Io(err.to_string())
    }
}

impl From<bincode::Error> for RlError {
    fn from(err: bincode::Error) -> Self {
        RlError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for RlError {
    fn from(err: serde_json::Error) -> Self {
        RlError::Serialization(err.to_string())
    }
}

// Helper functions for common error patterns
impl RlError {
    pub fn shape_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        RlError::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        RlError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error must end a training run.
    ///
    /// `InsufficientData` is the only error a training loop may treat as a no-op.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RlError::InsufficientData { .. })
    }
}
