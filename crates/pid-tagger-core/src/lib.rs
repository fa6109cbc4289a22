//! # P&ID Tagger Core
//!
//! Shared, I/O-free logic for P&ID Tagger: data models, the coordinate
//! transform, tag extraction, note description detection, the tolerance and
//! note-connection optimizers, and the relationship/loop graph engine.
//!
//! Every algorithm here is a pure function over explicit inputs. The calling
//! application owns the project state and re-invokes these functions; nothing
//! in this crate holds state between calls. The only asynchrony is the
//! [`page::PageSource`] collaborator the optimizers await between iterations.
//!
//! This crate contains no tokio, filesystem I/O, or other native-only
//! dependencies.
//!
//! ## Pipeline
//!
//! ```text
//! text runs ──▶ geometry ──▶ extract ──▶ {tags, raw items}
//!                                            │
//!                     ┌──────────────────────┼──────────────────┐
//!                     ▼                      ▼                  ▼
//!                   notes                optimize         relationships/loops
//! ```

pub mod error;
pub mod export;
pub mod extract;
pub mod geometry;
pub mod loops;
pub mod models;
pub mod notes;
pub mod optimize;
pub mod page;
pub mod progress;
pub mod project;
pub mod relationships;
pub mod settings;

pub use error::{LoopError, ProjectError};
