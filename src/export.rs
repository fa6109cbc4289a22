//! Export the instrument list as CSV.
//!
//! One row per Instrument tag with its drawing number, loop, nearest line,
//! configured instrument and I/O type, and attached notes. Column order
//! follows the instrument index sheets engineers already keep.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::io::{self, Write};
use std::path::Path;

use pid_tagger_core::export::{instrument_rows, InstrumentRow};

use crate::config::Config;
use crate::project_io::load_project;

pub const HEADER: [&str; 8] = [
    "No.",
    "Drawing Number",
    "Loop No.",
    "Tag",
    "Line",
    "Instrument Type",
    "IO Type",
    "Notes",
];

/// Export the project's instrument list.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub fn run_export(config: &Config, project_path: &Path, output: Option<&Path>) -> Result<()> {
    let project = load_project(project_path)?;
    let rows = instrument_rows(&project, &config.instrument_types());

    let mut writer = create_output_writer(output)?;
    write_rows(&mut writer, &rows)?;
    writer.flush()?;

    if let Some(path) = output {
        eprintln!("Exported {} instruments to {}", rows.len(), path.display());
    }
    Ok(())
}

pub fn write_rows<W: Write>(writer: &mut csv::Writer<W>, rows: &[InstrumentRow]) -> Result<()> {
    writer.write_record(HEADER)?;
    for row in rows {
        writer.write_record([
            row.sequence.to_string().as_str(),
            row.drawing_number.as_str(),
            row.loop_number.as_str(),
            row.tag.as_str(),
            row.line.as_str(),
            row.instrument_type.as_str(),
            row.io_type.as_str(),
            row.notes.as_str(),
        ])?;
    }
    Ok(())
}

fn create_output_writer(output: Option<&Path>) -> Result<csv::Writer<Box<dyn Write>>> {
    let writer: Box<dyn Write> = if let Some(path) = output {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?,
        )
    } else {
        Box::new(io::stdout())
    };

    Ok(WriterBuilder::new().from_writer(writer))
}
