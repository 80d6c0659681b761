use std::process::ExitStatus;

use thiserror::Error;

/// Failure of the store to run a query
///
/// Diagnostics from the store are kept verbatim so the user sees exactly
/// what the store reported.
#[derive(Debug, Error)]
pub enum QueryExecutionError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("query failed ({status}): {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("failed to read query output: {0}")]
    Read(#[source] std::io::Error),

    #[error("malformed store output: {0}")]
    Malformed(String),
}
