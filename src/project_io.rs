//! Reading and writing project files.

use anyhow::{Context, Result};
use std::path::Path;

use pid_tagger_core::project::Project;

/// Load a project file. Validation failures reject the whole file.
pub fn load_project(path: &Path) -> Result<Project> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read project file: {}", path.display()))?;
    Project::from_json(&content).with_context(|| format!("Failed to load project: {}", path.display()))
}

/// Write a project file, stamping a fresh export date.
pub fn save_project(project: &Project, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let json = project.to_json_pretty()?;
    std::fs::write(path, json).with_context(|| format!("Failed to write project file: {}", path.display()))
}
