//! `pidtag extract`: build a project from a page dump.
//!
//! Runs the three-pass tag extraction over every page, optionally detects
//! numbered note descriptions among the leftovers, and writes the result as
//! a project file.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use pid_tagger_core::extract::{extract_all, PreparedPage};
use pid_tagger_core::models::{DescriptionScope, DescriptionType};
use pid_tagger_core::notes::detect_note_descriptions;
use pid_tagger_core::project::Project;

use crate::config::Config;
use crate::pages::JsonPageSource;
use crate::progress::{format_number, ProgressMode};
use crate::project_io::save_project;

/// What an extraction run produced.
#[derive(Debug, Clone, Default)]
pub struct ExtractSummary {
    pub pages: usize,
    pub tags_by_category: BTreeMap<&'static str, usize>,
    pub raw_text_items: usize,
    pub descriptions: usize,
    pub dropped_runs: usize,
}

/// Extract a project from `source` using the configured settings.
pub async fn extract_project(
    config: &Config,
    source: &JsonPageSource,
    detect_notes: bool,
    progress: ProgressMode,
) -> Result<(Project, ExtractSummary)> {
    let settings = config.project_settings();
    let reporter = progress.reporter("extract");
    let extractions = extract_all(
        source,
        &settings.patterns,
        &settings.tolerances,
        &settings.app_settings,
        reporter.as_ref(),
    )
    .await?;

    let mut summary = ExtractSummary {
        pages: extractions.len(),
        dropped_runs: extractions.iter().map(|e| e.dropped_runs).sum(),
        ..Default::default()
    };

    let mut project = Project::new(source.pdf_file_name(), settings);
    project.apply_extraction(extractions);

    if detect_notes {
        let pattern = project.settings.app_settings.note_description;
        for page in source.pages() {
            let (width, height) = PreparedPage::new(page).size();
            let detected =
                detect_note_descriptions(&project.raw_text_items, page.page_number, width, height, &pattern);
            summary.descriptions +=
                project.apply_detected_notes(&detected, DescriptionType::Note, DescriptionScope::Specific);
        }
    }

    for tag in &project.tags {
        *summary.tags_by_category.entry(tag.category.as_str()).or_default() += 1;
    }
    summary.raw_text_items = project.raw_text_items.len();
    info!(
        pages = summary.pages,
        tags = project.tags.len(),
        raw_items = summary.raw_text_items,
        "extraction finished"
    );
    Ok((project, summary))
}

/// Run `pidtag extract`.
pub async fn run_extract(
    config: &Config,
    pages_path: &Path,
    output: &Path,
    detect_notes: bool,
    progress: ProgressMode,
) -> Result<()> {
    let source = JsonPageSource::load(pages_path)?;
    let (project, summary) = extract_project(config, &source, detect_notes, progress).await?;
    save_project(&project, output)?;

    println!("extract {}", source.pdf_file_name());
    println!("  pages:          {}", format_number(summary.pages as u64));
    for (category, count) in &summary.tags_by_category {
        println!("  {:<15} {}", format!("{}:", category), format_number(*count as u64));
    }
    println!("  raw items:      {}", format_number(summary.raw_text_items as u64));
    if detect_notes {
        println!("  descriptions:   {}", format_number(summary.descriptions as u64));
    }
    if summary.dropped_runs > 0 {
        println!("  dropped runs:   {}", format_number(summary.dropped_runs as u64));
    }
    println!("  wrote {}", output.display());
    Ok(())
}
