//! Ingest core: the diff engine, the per-article stage transforms, and the
//! pipeline wiring that runs one ingest pass end to end.

mod diff;
mod ingest;
mod process;

pub use diff::diff_chunks;
pub use ingest::{IngestReport, build_pipeline, ingest};
pub use process::ProcessContext;
