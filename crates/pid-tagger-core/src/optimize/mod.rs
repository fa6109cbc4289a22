//! Parameter searches that calibrate extraction and linking.
//!
//! - [`tolerance`] tunes instrument pairing and auto-link distances against
//!   a sample of pages.
//! - [`notes`] calibrates the note search radius and holds the production
//!   note linker.
//!
//! Neither search ever fails for lack of improvement: the starting
//! configuration is scored first and returned unless something beats it.

pub mod notes;
pub mod tolerance;

pub use notes::{
    create_optimized_note_connections, note_connection_score, optimize_note_connections,
    quick_optimize_note_connections, NoteConnectionOptimization,
};
pub use tolerance::{
    optimize_tolerances, quick_optimize_tolerances, sample_pages, ToleranceOptimization,
    ToleranceSearchSpace,
};
