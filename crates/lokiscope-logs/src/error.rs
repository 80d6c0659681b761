use thiserror::Error;

use lokiscope_query::QueryExecutionError;

/// A store line that could not be turned into a record
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid timestamp `{0}`")]
    Timestamp(String),

    #[error("malformed label block: {0}")]
    Labels(String),

    #[error("line has no payload")]
    MissingPayload,

    #[error("payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("malformed JSON envelope: {0}")]
    Envelope(#[source] serde_json::Error),
}

/// Failure while writing rendered output
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("upstream entry could not be rendered: {0}")]
    Upstream(#[source] DecodeError),

    #[error("raw output only takes store lines, not decoded records")]
    RawRecord,

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal failure of a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Query(#[from] QueryExecutionError),

    #[error(transparent)]
    Render(#[from] RenderError),
}
