//! Exporting committed records to external consumers.
//!
//! - [`cursor`] - Resumable position cursor over the committed log
//! - [`director`] - Exporter trait, positions and pause/resume

pub mod cursor;
pub mod director;

pub use cursor::ExporterCursor;
pub use director::{Exporter, ExporterDirector, RecordingExporter, TracingExporter};
