//! `pidtag optimize`: search for better extraction and linking parameters.
//!
//! # Tolerances
//!
//! Scores instrument tolerances on a sample of pages from a page dump and
//! reports the best set found. The result is a suggestion; copy it into
//! `[tolerances]` to use it.
//!
//! ```text
//! pages.json ──▶ sample_pages ──▶ grid(v × h) ──▶ sweep(d) ──▶ best
//!                                 or presets ──▶ ±5 px fine tune
//! ```
//!
//! # Notes
//!
//! Scores note-to-instrument radius multipliers on an extracted project.
//! Nothing is written back; `pidtag link --notes` uses the production
//! multiplier.

use anyhow::Result;
use std::path::Path;
use tracing::info;

use pid_tagger_core::optimize::{
    optimize_note_connections, optimize_tolerances, quick_optimize_note_connections,
    quick_optimize_tolerances, NoteConnectionOptimization, ToleranceOptimization,
};

use crate::config::Config;
use crate::pages::JsonPageSource;
use crate::progress::{format_number, ProgressMode};
use crate::project_io::load_project;

/// Run `pidtag optimize tolerances`.
pub async fn run_optimize_tolerances(
    config: &Config,
    pages_path: &Path,
    quick: bool,
    json: bool,
    progress: ProgressMode,
) -> Result<()> {
    let source = JsonPageSource::load(pages_path)?;
    let patterns = config.pattern_config();
    let initial = config.tolerance_config();
    let app = config.app_settings();
    let reporter = progress.reporter("optimize");

    let result = if quick {
        quick_optimize_tolerances(&source, &patterns, &initial, &app, reporter.as_ref()).await
    } else {
        optimize_tolerances(
            &source,
            &patterns,
            &initial,
            &app,
            &config.search_space(),
            reporter.as_ref(),
        )
        .await
    };
    info!(
        evaluations = result.evaluations,
        score = result.score,
        improved = result.improved,
        "tolerance search finished"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_tolerances(&result);
    }
    Ok(())
}

fn print_tolerances(result: &ToleranceOptimization) {
    let tol = &result.tolerances.instrument;
    if result.pages_tested.is_empty() {
        println!("No pages could be evaluated; keeping the configured tolerances.");
        return;
    }
    let pages: Vec<String> = result.pages_tested.iter().map(|p| p.to_string()).collect();
    println!("Tolerance search over pages {}", pages.join(", "));
    println!("  evaluations:   {}", format_number(result.evaluations as u64));
    println!("  baseline:      {:.2}", result.baseline_score);
    println!("  best score:    {:.2}", result.score);
    println!("  instruments:   {}", format_number(result.tag_count as u64));
    println!();
    if result.improved {
        println!("Suggested [tolerances]:");
    } else {
        println!("Configured [tolerances] are already the best found:");
    }
    println!("  vertical = {}", tol.vertical);
    println!("  horizontal = {}", tol.horizontal);
    println!("  auto_link_distance = {}", tol.auto_link_distance);
}

/// Run `pidtag optimize notes`.
pub fn run_optimize_notes(project_path: &Path, quick: bool, json: bool, progress: ProgressMode) -> Result<()> {
    let project = load_project(project_path)?;
    let reporter = progress.reporter("optimize");
    let result = if quick {
        quick_optimize_note_connections(&project.tags, reporter.as_ref())
    } else {
        optimize_note_connections(&project.tags, reporter.as_ref())
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_notes(&result);
    }
    Ok(())
}

fn print_notes(result: &NoteConnectionOptimization) {
    if result.note_count == 0 || result.instrument_count == 0 {
        println!(
            "Nothing to optimize: {} notes, {} instruments.",
            result.note_count, result.instrument_count
        );
        return;
    }
    println!("Note connection search");
    println!("  notes:         {}", format_number(result.note_count as u64));
    println!("  instruments:   {}", format_number(result.instrument_count as u64));
    println!("  evaluations:   {}", format_number(result.evaluations as u64));
    println!("  multiplier:    {}", result.multiplier);
    println!("  score:         {:.2}", result.score);
    println!(
        "  connected:     {} of {} notes on {} pages",
        result.connections.len(),
        result.note_count,
        result.pages
    );
}
