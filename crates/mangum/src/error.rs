use std::path::PathBuf;
use thiserror::Error;

/// Failures the CLI reports to the user.
///
/// Configuration errors are raised before any AWS call is made; provider
/// errors wrap a failed AWS request or external tool.
#[derive(Debug, Error)]
pub enum MangumError {
    #[error("File not found: '{0}' does not exist (run `mangum init <name>` first)")]
    DescriptorNotFound(PathBuf),

    #[error("malformed descriptor {path}: {source}")]
    MalformedDescriptor {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("illegal stack name '{0}' (alphabetic first character, letters and hyphens only, at most 128 characters)")]
    IllegalStackName(String),

    #[error("no bucket_name configured in mangum.yml (run `mangum create-bucket` and set it)")]
    MissingBucket,

    #[error("build directory '{0}' is missing or empty (run `mangum build`)")]
    EmptyBuild(PathBuf),

    #[error("nothing packaged yet (run `mangum package`)")]
    NotPackaged,

    #[error("{operation} failed: {message}")]
    Provider { operation: String, message: String },
}

impl MangumError {
    pub fn provider(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
