//! `pidtag validate`: check a project file without changing it.

use anyhow::Result;
use std::path::Path;

use crate::project_io::load_project;

/// Load the project through the same validation `link` and `export` use
/// and report what it holds. Invalid files fail with the reason.
pub fn run_validate(project_path: &Path) -> Result<()> {
    let project = load_project(project_path)?;
    println!(
        "ok: {} ({} tags, {} raw items, {} descriptions, {} relationships, {} loops)",
        project_path.display(),
        project.tags.len(),
        project.raw_text_items.len(),
        project.descriptions.len(),
        project.relationships.len(),
        project.loops.len()
    );
    Ok(())
}
