//! # P&ID Tagger
//!
//! Tag extraction and relationship building for piping and instrumentation
//! diagrams.
//!
//! The pure logic (extraction passes, note detection, optimizers, the
//! relationship and loop engine, project validation) lives in
//! [`pid_tagger_core`]. This crate wraps it with a TOML configuration, page
//! dump loading, project file I/O, CSV export and the `pidtag` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Page dump  │──▶│  Extraction  │──▶│   Project    │
//! │ (JSON runs) │   │ 3 passes +   │   │    file      │
//! └─────────────┘   │ note detect  │   └──────┬───────┘
//!        │          └──────────────┘          │
//!        ▼                             ┌──────┴───────┐
//! ┌─────────────┐                      ▼              ▼
//! │  Optimizer  │                ┌──────────┐   ┌──────────┐
//! │ tolerances  │                │   Link   │   │  Export  │
//! └─────────────┘                │ + loops  │   │  (CSV)   │
//!                                └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pidtag init                                   # write ./pidtag.toml
//! pidtag extract unit-100.pages.json -o unit-100.json --detect-notes
//! pidtag optimize tolerances unit-100.pages.json --quick
//! pidtag link unit-100.json                     # annotations, notes, loops
//! pidtag export unit-100.json -o instruments.csv
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`pages`] | JSON page dumps as a page source |
//! | [`progress`] | Progress reporters on stderr |
//! | [`project_io`] | Project file load/save |
//! | [`extract`] | `pidtag extract` |
//! | [`optimize`] | `pidtag optimize` |
//! | [`link`] | `pidtag link` |
//! | [`export`] | `pidtag export` (CSV) |
//! | [`stats`] | `pidtag stats` |
//! | [`validate`] | `pidtag validate` |

pub mod config;
pub mod export;
pub mod extract;
pub mod link;
pub mod optimize;
pub mod pages;
pub mod progress;
pub mod project_io;
pub mod stats;
pub mod validate;
