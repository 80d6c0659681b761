//! Log processing for lokiscope
//!
//! This crate provides line decoding, repeat compaction, output rendering,
//! and the pipeline that drives them over a store's line stream.

mod compact;
mod error;
mod parser;
mod pipeline;
mod render;

pub use compact::{Compacted, RepetitionCompactor, compact};
pub use error::{DecodeError, PipelineError, RenderError};
pub use parser::LineDecoder;
pub use pipeline::{Pipeline, PipelineRequest, PipelineStats};
pub use render::{OutputRenderer, bare_timestamp};

// Re-export types used in our public API
pub use lokiscope_types::{CompactedEntry, LogRecord, OutputMode};
