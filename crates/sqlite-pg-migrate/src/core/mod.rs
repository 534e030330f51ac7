//! Core abstractions shared by the reader, writer and orchestrator.
//!
//! - [`value`]: row values and batches
//! - [`traits`]: the [`SourceReader`] and [`TargetWriter`] seams
//!
//! The orchestrator only talks to the traits, so the SQLite reader and the
//! PostgreSQL writer can be swapped for test doubles.

pub mod traits;
pub mod value;

pub use traits::{BatchStream, SourceReader, TargetWriter};
pub use value::{Batch, Row, SqlValue};
