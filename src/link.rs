//! `pidtag link`: derive relationships and loops for a saved project.
//!
//! Each step only adds what is missing, so running it twice leaves the
//! project unchanged. Steps run in the order annotations, notes,
//! descriptions, loops; when no step is selected, all of them run.

use anyhow::Result;
use std::path::Path;
use tracing::info;

use pid_tagger_core::relationships::LinkOutcome;

use crate::project_io::{load_project, save_project};

/// Which linking steps to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSteps {
    pub annotations: bool,
    pub notes: bool,
    pub descriptions: bool,
    pub loops: bool,
}

impl LinkSteps {
    pub fn all() -> Self {
        Self {
            annotations: true,
            notes: true,
            descriptions: true,
            loops: true,
        }
    }

    /// The selected steps, or every step when none is selected.
    pub fn or_all(self) -> Self {
        if self == Self::default() {
            Self::all()
        } else {
            self
        }
    }
}

/// Run `pidtag link`. The project file is rewritten in place.
pub fn run_link(project_path: &Path, steps: LinkSteps) -> Result<()> {
    let mut project = load_project(project_path)?;
    let steps = steps.or_all();

    if steps.annotations {
        report("annotations", &project.link_annotations());
    }
    if steps.notes {
        report("notes", &project.link_notes());
    }
    if steps.descriptions {
        report("descriptions", &project.link_descriptions());
    }
    if steps.loops {
        let loops = project.generate_loops();
        println!("  loops: {} created", loops.len());
        for l in &loops {
            info!(loop_id = %l.id, tags = l.tag_ids.len(), "loop generated");
        }
    }

    save_project(&project, project_path)?;
    println!("  wrote {}", project_path.display());
    Ok(())
}

fn report(step: &str, outcome: &LinkOutcome) {
    match &outcome.message {
        Some(message) if outcome.is_empty() => println!("  {}: {}", step, message),
        _ => println!("  {}: {} relationships added", step, outcome.relationships.len()),
    }
}
