//! Report export
//!
//! Serializes rewrite results to JSON for inspection outside the profiler.

pub mod report;

pub use report::{ClauseRecord, InstrumentationReport, OffsetRecord, ProbeSiteRecord};
