//! Query construction and log store access for lokiscope
//!
//! This crate turns user filters into a LogQL expression, normalizes time
//! tokens, and runs the expression against the store.

mod error;
mod expr;
mod store;
mod time;

pub use error::QueryExecutionError;
pub use expr::{DEFAULT_SELECTOR, NoisePatterns, QueryExpression, QueryExpressionBuilder};
pub use store::{LineStream, LogStore, LogcliStore, StoreQuery};
pub use time::{resolve, resolve_range};

// Re-export types used in our public API
pub use lokiscope_types::{
    Direction, FieldConstraints, FieldKey, NoiseFilters, Polarity, StoreEncoding,
    TextMatchTerm, TimeRange,
};
